//! Schema and file-name constants for everything wakeguard writes.
//!
//! Inside the state root: the task ledger database and its event log.
//! Inside the backups directory: artifacts, safety snapshots, the backups
//! index and the broker audit log.

// --- Task ledger (state root) ---
pub const LEDGER_DB_NAME: &str = "ledger.db";
pub const LEDGER_EVENTS_NAME: &str = "ledger.events.jsonl";

pub const LEDGER_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const LEDGER_DB_SCHEMA_TASKS: &str = "
    CREATE TABLE IF NOT EXISTS tasks (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'TODO',
        result_or_reason TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        completed_at TEXT,
        superseded_by TEXT
    )
";

pub const LEDGER_DB_SCHEMA_TASKS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, seq)";

pub const LEDGER_DB_SCHEMA_TASK_EVENTS: &str = "
    CREATE TABLE IF NOT EXISTS task_events (
        event_id TEXT PRIMARY KEY,
        ts TEXT NOT NULL,
        event_type TEXT NOT NULL,
        task_id TEXT NOT NULL,
        payload TEXT NOT NULL
    )
";

pub const LEDGER_SCHEMA_VERSION: &str = "1";

// --- Backups directory ---
pub const BACKUP_PREFIX: &str = "backup-";
pub const BACKUP_SUFFIX: &str = ".tar.zst.enc";
pub const SAFETY_PREFIX: &str = "safety-";
pub const SAFETY_SUFFIX: &str = ".tar.zst";
pub const BACKUP_INDEX_NAME: &str = "backups.index.jsonl";

/// SQLite side files that are never consistent on their own.
pub const TRANSIENT_SUFFIXES: &[&str] = &["-journal", "-wal", "-shm"];
