//! Instance configuration loaded from `wakeguard.toml`.
//!
//! Every path in the file is relative to the instance home unless absolute.
//! A missing file is not an error: the defaults describe the conventional
//! layout (state in the home itself, artifacts under `backups/`).

use crate::core::error::WakeguardError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "wakeguard.toml";

/// Relative paths every healthy instance must carry, in audit order.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "state.json",
    "index.json",
    "IDENTITY.md",
    "identity.md",
    "experience.py",
];

/// Primary state document and file index.
pub const DEFAULT_CORE_FILES: &[&str] = &["state.json", "index.json"];

pub const DEFAULT_KDF_ITERATIONS: u32 = 210_000;
pub const DEFAULT_STALE_BACKUP_HOURS: u64 = 24;
pub const DEFAULT_SCHEDULER_MARKER: &str = "wakeguard";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WakeguardConfig {
    pub state_root: PathBuf,
    pub backups_dir: PathBuf,
    pub manifest: Vec<String>,
    pub core_files: Vec<String>,
    pub kdf_iterations: u32,
    pub stale_backup_hours: u64,
    pub scheduler_marker: String,
    pub mailbox_dir: Option<PathBuf>,
}

impl Default for WakeguardConfig {
    fn default() -> Self {
        Self {
            state_root: PathBuf::from("."),
            backups_dir: PathBuf::from("backups"),
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
            core_files: DEFAULT_CORE_FILES.iter().map(|s| s.to_string()).collect(),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            stale_backup_hours: DEFAULT_STALE_BACKUP_HOURS,
            scheduler_marker: DEFAULT_SCHEDULER_MARKER.to_string(),
            mailbox_dir: None,
        }
    }
}

impl WakeguardConfig {
    /// Load `<home>/wakeguard.toml`, falling back to defaults when absent.
    pub fn load(home: &Path) -> Result<Self, WakeguardError> {
        let path = home.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, WakeguardError> {
        let cfg: WakeguardConfig = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), WakeguardError> {
        if self.manifest.is_empty() {
            return Err(WakeguardError::Config(
                "manifest must list at least one file".to_string(),
            ));
        }
        for entry in self.manifest.iter().chain(self.core_files.iter()) {
            validate_relative(entry)?;
        }
        if self.kdf_iterations == 0 {
            return Err(WakeguardError::Config(
                "kdf_iterations must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Manifest and snapshot entries must stay inside the state root.
pub fn validate_relative(entry: &str) -> Result<(), WakeguardError> {
    let path = Path::new(entry);
    if entry.is_empty() || path.is_absolute() {
        return Err(WakeguardError::Config(format!(
            "'{}' must be a relative path",
            entry
        )));
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(WakeguardError::Config(format!(
            "'{}' must not leave the state root",
            entry
        )));
    }
    Ok(())
}
