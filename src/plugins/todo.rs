//! Task Ledger.
//!
//! Units of work survive restarts in `ledger.db` inside the state root.
//! Every mutation is also appended to `ledger.events.jsonl`, and the database
//! can be rebuilt from that log alone. Live writes and rebuilds go through
//! the same `apply_event`.
//!
//! Legal transitions: TODO→DONE, TODO→BLOCKED, BLOCKED→TODO (reopen), and
//! BLOCKED→DONE/BLOCKED. DONE is terminal.

use crate::core::db;
use crate::core::error;
use crate::core::output::{self, OutputFormat};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(name = "ledger", about = "Track units of work across restarts.")]
pub struct LedgerCli {
    #[clap(subcommand)]
    pub command: LedgerCommand,
}

#[derive(Subcommand, Debug)]
pub enum LedgerCommand {
    /// Add a new TODO entry.
    Add {
        #[clap(value_name = "DESCRIPTION")]
        description: String,
    },
    /// Mark an entry done with its result.
    Done {
        #[clap(long)]
        id: String,
        #[clap(long, default_value = "")]
        result: String,
    },
    /// Mark an entry blocked with a reason.
    Block {
        #[clap(long)]
        id: String,
        #[clap(long)]
        reason: String,
    },
    /// Move a blocked entry back to TODO.
    Reopen {
        #[clap(long)]
        id: String,
    },
    /// Mark an entry as replaced by another one.
    Supersede {
        #[clap(long)]
        id: String,
        #[clap(long)]
        by: String,
    },
    /// Show one entry.
    Get {
        #[clap(long)]
        id: String,
    },
    /// List entries, optionally for one status bucket.
    List {
        #[clap(long, value_enum)]
        status: Option<TaskStatus>,
    },
    /// Rebuild the ledger database from its event log.
    Rebuild,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Todo,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::Done => "DONE",
            TaskStatus::Blocked => "BLOCKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TODO" => Some(TaskStatus::Todo),
            "DONE" => Some(TaskStatus::Done),
            "BLOCKED" => Some(TaskStatus::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub seq: i64,
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub result_or_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub superseded_by: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct LedgerEvent {
    ts: String,
    event_id: String,
    event_type: String,
    task_id: String,
    payload: JsonValue,
    actor: String,
}

const TASK_COLUMNS: &str = "seq, id, description, status, result_or_reason, created_at, updated_at, completed_at, superseded_by";

pub fn ledger_db_path(root: &Path) -> PathBuf {
    root.join(schemas::LEDGER_DB_NAME)
}

fn events_path(root: &Path) -> PathBuf {
    root.join(schemas::LEDGER_EVENTS_NAME)
}

fn ensure_schema(conn: &Connection) -> Result<(), error::WakeguardError> {
    conn.execute(schemas::LEDGER_DB_SCHEMA_META, [])?;
    conn.execute(schemas::LEDGER_DB_SCHEMA_TASKS, [])?;
    conn.execute(schemas::LEDGER_DB_SCHEMA_TASKS_INDEX, [])?;
    conn.execute(schemas::LEDGER_DB_SCHEMA_TASK_EVENTS, [])?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES('schema_version', ?1)",
        rusqlite::params![schemas::LEDGER_SCHEMA_VERSION],
    )?;
    Ok(())
}

fn connect_ledger(db_path: &Path) -> Result<Connection, error::WakeguardError> {
    let conn = db::db_connect(db_path)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn initialize_ledger_db(root: &Path) -> Result<(), error::WakeguardError> {
    fs::create_dir_all(root)?;
    connect_ledger(&ledger_db_path(root))?;
    Ok(())
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(3)?;
    let status = TaskStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown task status {}", status).into(),
        )
    })?;
    Ok(Task {
        seq: row.get(0)?,
        id: row.get(1)?,
        description: row.get(2)?,
        status,
        result_or_reason: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        completed_at: row.get(7)?,
        superseded_by: row.get(8)?,
    })
}

fn fetch_task(conn: &Connection, id: &str) -> Result<Option<Task>, error::WakeguardError> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS);
    Ok(conn
        .query_row(&sql, rusqlite::params![id], row_to_task)
        .optional()?)
}

fn append_event(root: &Path, ev: &LedgerEvent) -> Result<(), error::WakeguardError> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(events_path(root))?;
    writeln!(f, "{}", serde_json::to_string(ev)?)?;
    f.sync_data()?;
    Ok(())
}

fn events_len(root: &Path) -> Result<u64, error::WakeguardError> {
    match fs::metadata(events_path(root)) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Cut the event log back to `len` bytes.
fn truncate_events(root: &Path, len: u64) -> Result<(), error::WakeguardError> {
    let f = OpenOptions::new().write(true).open(events_path(root))?;
    f.set_len(len)?;
    f.sync_data()?;
    Ok(())
}

/// Append `ev` to the log, then run `commit`. If either step fails the log
/// is truncated to its previous length, so it never records an event whose
/// table change was not committed.
fn publish_event(
    root: &Path,
    ev: &LedgerEvent,
    commit: impl FnOnce() -> Result<(), error::WakeguardError>,
) -> Result<(), error::WakeguardError> {
    let log_len = events_len(root)?;
    let result = append_event(root, ev).and_then(|()| commit());
    if let Err(e) = result {
        if let Err(undo) = truncate_events(root, log_len) {
            tracing::warn!(event = %ev.event_id, error = %undo, "failed to drop uncommitted ledger event");
        }
        return Err(e);
    }
    Ok(())
}

fn payload_str(ev: &LedgerEvent, key: &str) -> Option<String> {
    ev.payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Apply one event to the tables. No transition checks happen here.
fn apply_event(conn: &Connection, ev: &LedgerEvent) -> Result<(), error::WakeguardError> {
    conn.execute(
        "INSERT INTO task_events(event_id, ts, event_type, task_id, payload) VALUES(?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            ev.event_id,
            ev.ts,
            ev.event_type,
            ev.task_id,
            serde_json::to_string(&ev.payload)?
        ],
    )?;

    match ev.event_type.as_str() {
        "task.add" => {
            conn.execute(
                "INSERT INTO tasks(id, description, status, created_at, updated_at) VALUES(?1, ?2, 'TODO', ?3, ?3)",
                rusqlite::params![
                    ev.task_id,
                    payload_str(ev, "description").unwrap_or_default(),
                    ev.ts
                ],
            )?;
        }
        "task.done" => {
            conn.execute(
                "UPDATE tasks SET status = 'DONE', result_or_reason = ?1, updated_at = ?2, completed_at = ?2 WHERE id = ?3",
                rusqlite::params![payload_str(ev, "result"), ev.ts, ev.task_id],
            )?;
        }
        "task.block" => {
            conn.execute(
                "UPDATE tasks SET status = 'BLOCKED', result_or_reason = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![payload_str(ev, "reason"), ev.ts, ev.task_id],
            )?;
        }
        "task.reopen" => {
            conn.execute(
                "UPDATE tasks SET status = 'TODO', updated_at = ?1 WHERE id = ?2",
                rusqlite::params![ev.ts, ev.task_id],
            )?;
        }
        "task.supersede" => {
            conn.execute(
                "UPDATE tasks SET superseded_by = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![payload_str(ev, "superseded_by"), ev.ts, ev.task_id],
            )?;
        }
        other => {
            tracing::warn!(event_type = other, "ignoring unknown ledger event");
        }
    }
    Ok(())
}

fn new_event(event_type: &str, task_id: &str, payload: JsonValue) -> LedgerEvent {
    LedgerEvent {
        ts: time::now_rfc3339(),
        event_id: time::new_event_id(),
        event_type: event_type.to_string(),
        task_id: task_id.to_string(),
        payload,
        actor: "wakeguard".to_string(),
    }
}

/// Apply `ev` inside a transaction, make the log line durable, then commit.
///
/// A failure anywhere rolls the table change back and leaves the log as it
/// was.
fn commit_event(
    root: &Path,
    conn: &mut Connection,
    ev: &LedgerEvent,
    check: impl FnOnce(&Connection) -> Result<(), error::WakeguardError>,
) -> Result<Task, error::WakeguardError> {
    let tx = conn.transaction()?;
    check(&tx)?;
    apply_event(&tx, ev)?;
    let task = fetch_task(&tx, &ev.task_id)?
        .ok_or_else(|| error::WakeguardError::UnknownTask(ev.task_id.clone()))?;
    publish_event(root, ev, || Ok(tx.commit()?))?;
    tracing::debug!(task = %ev.task_id, event = %ev.event_type, "ledger event committed");
    Ok(task)
}

/// Add a TODO entry and return its id.
pub fn add_task(root: &Path, description: &str) -> Result<String, error::WakeguardError> {
    fs::create_dir_all(root)?;
    let mut conn = connect_ledger(&ledger_db_path(root))?;
    let id = format!("T_{}", time::new_event_id());
    let ev = new_event(
        "task.add",
        &id,
        serde_json::json!({ "description": description }),
    );
    commit_event(root, &mut conn, &ev, |_| Ok(()))?;
    Ok(id)
}

fn transition(
    root: &Path,
    id: &str,
    event_type: &str,
    to: TaskStatus,
    allowed_from: &[TaskStatus],
    payload: JsonValue,
) -> Result<Task, error::WakeguardError> {
    let mut conn = connect_ledger(&ledger_db_path(root))?;
    let ev = new_event(event_type, id, payload);
    commit_event(root, &mut conn, &ev, |conn| {
        let task = fetch_task(conn, id)?
            .ok_or_else(|| error::WakeguardError::UnknownTask(id.to_string()))?;
        if !allowed_from.contains(&task.status) {
            return Err(error::WakeguardError::InvalidTransition {
                id: id.to_string(),
                from: task.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    })
}

pub fn complete(root: &Path, id: &str, result: &str) -> Result<Task, error::WakeguardError> {
    transition(
        root,
        id,
        "task.done",
        TaskStatus::Done,
        &[TaskStatus::Todo, TaskStatus::Blocked],
        serde_json::json!({ "result": result }),
    )
}

pub fn block(root: &Path, id: &str, reason: &str) -> Result<Task, error::WakeguardError> {
    transition(
        root,
        id,
        "task.block",
        TaskStatus::Blocked,
        &[TaskStatus::Todo, TaskStatus::Blocked],
        serde_json::json!({ "reason": reason }),
    )
}

pub fn reopen(root: &Path, id: &str) -> Result<Task, error::WakeguardError> {
    transition(
        root,
        id,
        "task.reopen",
        TaskStatus::Todo,
        &[TaskStatus::Blocked],
        serde_json::json!({}),
    )
}

/// Mark `id` as replaced by `replacement_id`. Both stay in the ledger.
pub fn supersede(
    root: &Path,
    id: &str,
    replacement_id: &str,
) -> Result<Task, error::WakeguardError> {
    let mut conn = connect_ledger(&ledger_db_path(root))?;
    let ev = new_event(
        "task.supersede",
        id,
        serde_json::json!({ "superseded_by": replacement_id }),
    );
    commit_event(root, &mut conn, &ev, |conn| {
        let task = fetch_task(conn, id)?
            .ok_or_else(|| error::WakeguardError::UnknownTask(id.to_string()))?;
        if fetch_task(conn, replacement_id)?.is_none() {
            return Err(error::WakeguardError::UnknownTask(replacement_id.to_string()));
        }
        if id == replacement_id || task.superseded_by.is_some() {
            return Err(error::WakeguardError::InvalidTransition {
                id: id.to_string(),
                from: task.status.to_string(),
                to: "SUPERSEDED".to_string(),
            });
        }
        Ok(())
    })
}

pub fn get_task(root: &Path, id: &str) -> Result<Option<Task>, error::WakeguardError> {
    let db_path = ledger_db_path(root);
    if !db_path.exists() {
        return Ok(None);
    }
    let conn = connect_ledger(&db_path)?;
    fetch_task(&conn, id)
}

/// Entries in insertion order, optionally restricted to one status.
pub fn list_tasks(
    root: &Path,
    status: Option<TaskStatus>,
) -> Result<Vec<Task>, error::WakeguardError> {
    let db_path = ledger_db_path(root);
    if !db_path.exists() {
        return Ok(Vec::new());
    }
    let conn = connect_ledger(&db_path)?;
    let sql = format!(
        "SELECT {} FROM tasks WHERE (?1 IS NULL OR status = ?1) ORDER BY seq",
        TASK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params![status.map(|s| s.as_str())], row_to_task)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn list_by_status(
    root: &Path,
    status: TaskStatus,
) -> Result<Vec<Task>, error::WakeguardError> {
    list_tasks(root, Some(status))
}

/// Replay `ledger.events.jsonl` into a fresh database and swap it in.
///
/// Returns the number of events replayed. Without a log there is nothing to
/// replay: an existing database is kept as is and only gets its schema
/// ensured, so entries are never dropped.
pub fn rebuild_from_events(root: &Path) -> Result<u64, error::WakeguardError> {
    fs::create_dir_all(root)?;
    if !events_path(root).is_file() {
        let conn = connect_ledger(&ledger_db_path(root))?;
        let kept: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        if kept > 0 {
            tracing::warn!(entries = kept, "no ledger event log; keeping existing ledger");
        }
        return Ok(0);
    }
    let tmp_db = root.join(format!(".{}.tmp", schemas::LEDGER_DB_NAME));
    if tmp_db.exists() {
        fs::remove_file(&tmp_db)?;
    }

    let count = {
        let mut conn = connect_ledger(&tmp_db)?;
        let tx = conn.transaction()?;
        let mut count = 0u64;
        let reader = BufReader::new(fs::File::open(events_path(root))?);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let ev: LedgerEvent = serde_json::from_str(line).map_err(|e| {
                error::WakeguardError::Config(format!(
                    "invalid ledger event on line {}: {}",
                    lineno + 1,
                    e
                ))
            })?;
            apply_event(&tx, &ev)?;
            count += 1;
        }
        tx.commit()?;
        count
    };

    let final_db = ledger_db_path(root);
    fs::rename(&tmp_db, &final_db)?;
    tracing::info!(events = count, "ledger rebuilt from events");
    Ok(count)
}

fn task_line(task: &Task) -> String {
    let mut line = format!(
        "{} [{}] {}",
        task.id,
        task.status,
        output::compact_line(&task.description, 80)
    );
    if let Some(note) = task.result_or_reason.as_deref().filter(|n| !n.is_empty()) {
        line.push_str(&format!(" ({})", output::compact_line(note, 60)));
    }
    if let Some(by) = &task.superseded_by {
        line.push_str(&format!(" -> superseded by {}", by));
    }
    line
}

pub fn run_ledger_cli(
    store: &Store,
    cli: LedgerCli,
    format: OutputFormat,
) -> Result<(), error::WakeguardError> {
    let root = &store.root;
    let (cmd, extra, text) = match &cli.command {
        LedgerCommand::Add { description } => {
            let id = add_task(root, description)?;
            (
                "ledger.add",
                serde_json::json!({ "id": id }),
                format!("Added {}", id),
            )
        }
        LedgerCommand::Done { id, result } => {
            let task = complete(root, id, result)?;
            ("ledger.done", serde_json::json!({ "item": task }), task_line(&task))
        }
        LedgerCommand::Block { id, reason } => {
            let task = block(root, id, reason)?;
            ("ledger.block", serde_json::json!({ "item": task }), task_line(&task))
        }
        LedgerCommand::Reopen { id } => {
            let task = reopen(root, id)?;
            ("ledger.reopen", serde_json::json!({ "item": task }), task_line(&task))
        }
        LedgerCommand::Supersede { id, by } => {
            let task = supersede(root, id, by)?;
            ("ledger.supersede", serde_json::json!({ "item": task }), task_line(&task))
        }
        LedgerCommand::Get { id } => {
            let task = get_task(root, id)?
                .ok_or_else(|| error::WakeguardError::UnknownTask(id.clone()))?;
            ("ledger.get", serde_json::json!({ "item": task }), task_line(&task))
        }
        LedgerCommand::List { status } => {
            let items = list_tasks(root, *status)?;
            let text = if items.is_empty() {
                "No entries".to_string()
            } else {
                items.iter().map(task_line).collect::<Vec<_>>().join("\n")
            };
            ("ledger.list", serde_json::json!({ "items": items }), text)
        }
        LedgerCommand::Rebuild => {
            let events = rebuild_from_events(root)?;
            (
                "ledger.rebuild",
                serde_json::json!({ "events": events }),
                format!("Rebuilt ledger from {} event(s)", events),
            )
        }
    };
    let envelope = time::command_envelope(cmd, "ok", extra);
    output::emit(format, &envelope, &text)
}
