//! Store handle for one agent instance.
//!
//! A `Store` is the explicit configuration every component receives at
//! construction: where the state root lives, where artifacts go, and which
//! files are critical. Nothing in the crate reads a global home directory.

use crate::core::config::{self, WakeguardConfig};
use crate::core::error::WakeguardError;
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = ".wakeguard.lock";

/// Store handle representing one instance's persistent state.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the state root directory
    pub root: PathBuf,
    /// Directory holding backup artifacts, safety snapshots and the index
    pub backups_dir: PathBuf,
    /// Critical file manifest, relative to `root`
    pub manifest: Vec<PathBuf>,
    /// Primary state document and file index, relative to `root`
    pub core_files: Vec<PathBuf>,
    pub kdf_iterations: u32,
    pub stale_backup_hours: u64,
    pub scheduler_marker: String,
    pub mailbox_dir: Option<PathBuf>,
}

impl Store {
    /// Store with default manifest and settings for the given directories.
    pub fn new(root: impl Into<PathBuf>, backups_dir: impl Into<PathBuf>) -> Self {
        let defaults = WakeguardConfig::default();
        Self {
            root: root.into(),
            backups_dir: backups_dir.into(),
            manifest: defaults.manifest.iter().map(PathBuf::from).collect(),
            core_files: defaults.core_files.iter().map(PathBuf::from).collect(),
            kdf_iterations: defaults.kdf_iterations,
            stale_backup_hours: defaults.stale_backup_hours,
            scheduler_marker: defaults.scheduler_marker,
            mailbox_dir: None,
        }
    }

    /// Resolve the store for an instance home, reading `wakeguard.toml` if present.
    pub fn open(home: &Path) -> Result<Self, WakeguardError> {
        let cfg = WakeguardConfig::load(home)?;
        Self::from_config(home, &cfg)
    }

    pub fn from_config(home: &Path, cfg: &WakeguardConfig) -> Result<Self, WakeguardError> {
        cfg.validate()?;
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                home.join(p)
            }
        };
        Ok(Self {
            root: resolve(&cfg.state_root),
            backups_dir: resolve(&cfg.backups_dir),
            manifest: cfg.manifest.iter().map(PathBuf::from).collect(),
            core_files: cfg.core_files.iter().map(PathBuf::from).collect(),
            kdf_iterations: cfg.kdf_iterations,
            stale_backup_hours: cfg.stale_backup_hours,
            scheduler_marker: cfg.scheduler_marker.clone(),
            mailbox_dir: cfg.mailbox_dir.as_deref().map(resolve),
        })
    }

    pub fn with_manifest<I, P>(mut self, entries: I) -> Result<Self, WakeguardError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let manifest: Vec<PathBuf> = entries.into_iter().map(Into::into).collect();
        for entry in &manifest {
            config::validate_relative(&entry.to_string_lossy())?;
        }
        self.manifest = manifest;
        Ok(self)
    }

    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    pub fn lock_path(&self) -> PathBuf {
        self.backups_dir.join(LOCK_FILE_NAME)
    }
}
