use crate::core::error::WakeguardError;
use crate::core::store::Store;
use crate::core::time;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

/// The broker is the single gate for operations that read or rewrite a whole
/// state root. It serializes them in-process, holds the advisory file lock
/// for the duration, and appends a pending and a terminal audit event.
pub struct StateBroker {
    lock_path: PathBuf,
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub status: String,
}

/// Exclusive advisory lock, released when dropped.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    pub fn acquire(path: &Path) -> Result<Self, WakeguardError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| WakeguardError::Locked(path.to_path_buf()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release state lock");
        }
    }
}

impl StateBroker {
    pub fn new(store: &Store) -> Self {
        Self {
            lock_path: store.lock_path(),
            audit_log_path: store.backups_dir.join(AUDIT_LOG_NAME),
        }
    }

    /// Run `f` while holding the state-root lock.
    pub fn with_lock<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R, WakeguardError>
    where
        F: FnOnce() -> Result<R, WakeguardError>,
    {
        static OP_LOCK: Mutex<()> = Mutex::new(());
        let _serial = OP_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let lock = StateLock::acquire(&self.lock_path)?;
        tracing::debug!(op = op_name, lock = %lock.path().display(), "state lock acquired");
        self.log_event(actor, op_name, "pending")?;

        let result = f();

        let status = match &result {
            Ok(_) => "success",
            Err(_) => "error",
        };
        if let Err(e) = self.log_event(actor, op_name, status) {
            tracing::warn!(op = op_name, error = %e, "failed to append terminal audit event");
        }
        drop(lock);

        result
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) -> Result<(), WakeguardError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }

    /// Read back the audit log, oldest first.
    pub fn events(&self) -> Result<Vec<BrokerEvent>, WakeguardError> {
        if !self.audit_log_path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.audit_log_path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }
}
