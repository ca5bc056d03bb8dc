//! Restore Manager.
//!
//! Steps run strictly in order and each failure stops the sequence:
//! confirm, decrypt, validate, safety snapshot, unpack, check. Nothing under
//! the state root is written before the unpack step, and unpack only starts
//! after a safety snapshot has been attempted.

use crate::core::broker::StateBroker;
use crate::core::error::WakeguardError;
use crate::core::prompt::{ConfirmationProvider, Passphrase};
use crate::core::schemas;
use crate::core::store::Store;
use crate::plugins::backup::publish_stamped;
use crate::plugins::{archive, crypto};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStage {
    Decrypt,
    Validate,
    Snapshot,
    Unpack,
    Check,
}

impl RestoreStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreStage::Decrypt => "decrypt",
            RestoreStage::Validate => "validate",
            RestoreStage::Snapshot => "snapshot",
            RestoreStage::Unpack => "unpack",
            RestoreStage::Check => "check",
        }
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook invoked before each restore stage.
///
/// Returning an error before [`RestoreStage::Unpack`] cancels the restore and
/// leaves the state root untouched. Once unpack has started the remaining
/// hooks are still called but their errors are only logged.
pub trait RestoreObserver {
    fn on_stage(&self, _stage: RestoreStage) -> Result<(), WakeguardError> {
        Ok(())
    }
}

pub struct NoopObserver;

impl RestoreObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "missing", rename_all = "snake_case")]
pub enum RestoreResult {
    Restored,
    /// Extraction succeeded but these core files are still absent.
    PartialFilesMissing(Vec<String>),
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub artifact: PathBuf,
    pub result: RestoreResult,
    pub safety_snapshot: Option<PathBuf>,
    pub snapshot_taken_at: Option<DateTime<Utc>>,
    pub restored_files: usize,
    pub completed_at: DateTime<Utc>,
}

fn stage(observer: &dyn RestoreObserver, s: RestoreStage) -> Result<(), WakeguardError> {
    tracing::debug!(stage = %s, "restore stage");
    observer.on_stage(s)
}

/// Archive the configured core files of the current state root into the
/// backups directory as an unencrypted safety snapshot.
///
/// Missing core files are skipped. Returns the snapshot path and its
/// creation time.
pub fn take_safety_snapshot(store: &Store) -> Result<(PathBuf, DateTime<Utc>), WakeguardError> {
    let packed = archive::pack(
        &store.root,
        Some(store.core_files.as_slice()),
        &[store.backups_dir.clone()],
    )?;
    let (taken_at, path) = publish_stamped(
        &store.backups_dir,
        schemas::SAFETY_PREFIX,
        schemas::SAFETY_SUFFIX,
        &packed.bytes,
    )?;
    tracing::info!(
        snapshot = %path.display(),
        files = packed.listing.file_count(),
        "safety snapshot written"
    );
    Ok((path, taken_at))
}

fn missing_core_files(store: &Store) -> Vec<String> {
    store
        .core_files
        .iter()
        .filter(|rel| !store.root.join(rel).is_file())
        .map(|rel| rel.to_string_lossy().to_string())
        .collect()
}

/// Replace the state root with the contents of `artifact`.
pub fn restore(
    store: &Store,
    artifact: &Path,
    passphrase: &Passphrase,
    confirmation: &dyn ConfirmationProvider,
    observer: &dyn RestoreObserver,
) -> Result<RestoreReport, WakeguardError> {
    let action = format!(
        "Restore {} over {}? Files present in the artifact will be overwritten.",
        artifact.display(),
        store.root.display()
    );
    if !confirmation.confirm(&action)? {
        return Err(WakeguardError::NotConfirmed("restore".to_string()));
    }
    if !artifact.is_file() {
        return Err(WakeguardError::NotFound(format!(
            "artifact {}",
            artifact.display()
        )));
    }

    let broker = StateBroker::new(store);
    broker.with_lock("wakeguard", "restore", || {
        stage(observer, RestoreStage::Decrypt)?;
        let sealed = fs::read(artifact)?;
        let plain = crypto::decrypt(&sealed, passphrase)?;

        stage(observer, RestoreStage::Validate)?;
        archive::validate(&plain)?;

        stage(observer, RestoreStage::Snapshot)?;
        let snapshot = match take_safety_snapshot(store) {
            Ok(taken) => Some(taken),
            Err(e) => {
                tracing::warn!(error = %e, "safety snapshot failed; continuing restore");
                None
            }
        };

        stage(observer, RestoreStage::Unpack)?;
        let listing = archive::unpack(&plain, &store.root)?;

        if let Err(e) = observer.on_stage(RestoreStage::Check) {
            tracing::warn!(error = %e, "observer error after unpack ignored");
        }
        let missing = missing_core_files(store);
        let result = if missing.is_empty() {
            RestoreResult::Restored
        } else {
            tracing::warn!(missing = ?missing, "restore completed with core files missing");
            RestoreResult::PartialFilesMissing(missing)
        };

        let (safety_snapshot, snapshot_taken_at) = match snapshot {
            Some((path, at)) => (Some(path), Some(at)),
            None => (None, None),
        };
        tracing::info!(
            artifact = %artifact.display(),
            files = listing.file_count(),
            "restore complete"
        );
        Ok(RestoreReport {
            artifact: artifact.to_path_buf(),
            result,
            safety_snapshot,
            snapshot_taken_at,
            restored_files: listing.file_count(),
            completed_at: Utc::now(),
        })
    })
}
