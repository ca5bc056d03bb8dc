use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WakeguardError {
    /// The byte stream is not a well-formed archive container.
    #[error("Archive is corrupt: {0}")]
    ArchiveCorrupt(String),
    /// Decryption or authentication failed. Wrong passphrase and damaged
    /// artifact are deliberately indistinguishable.
    #[error("Wrong passphrase or corrupt artifact")]
    WrongPassphraseOrCorrupt,
    #[error("Unknown task: {0}")]
    UnknownTask(String),
    #[error("Invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },
    #[error("Operation not confirmed: {0}")]
    NotConfirmed(String),
    #[error("State root is locked by another operation: {}", .0.display())]
    Locked(PathBuf),
    #[error("Aborted before {0}")]
    Aborted(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}
