use crate::core::error;
use rusqlite::Connection;
use std::path::Path;

/// Open a SQLite database for durable single-writer use.
///
/// The ledger lives inside the archived state root, so it uses a rollback
/// journal instead of WAL: the main database file is complete on its own
/// after every commit. `synchronous=FULL` flushes before commit returns.
pub fn db_connect(db_path: &Path) -> Result<Connection, error::WakeguardError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=DELETE;", [], |_| Ok(()))?;
    conn.execute_batch("PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}
