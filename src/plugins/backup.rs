//! Backup Manager: pack, encrypt and atomically publish state-root artifacts.

use crate::core::broker::StateBroker;
use crate::core::error::WakeguardError;
use crate::core::prompt::Passphrase;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::{archive, crypto};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One line of `backups.index.jsonl`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub id: String,
    pub file: String,
    pub created_at: String,
    pub bytes: u64,
    pub sha256: String,
    pub files: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupSummary {
    pub file: String,
    pub created_at: Option<String>,
    pub bytes: Option<u64>,
    pub sha256: Option<String>,
    /// The artifact exists on disk.
    pub present: bool,
    /// The artifact has an index record.
    pub recorded: bool,
}

/// Result of a round-trip check of one artifact against the live state root.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupCheck {
    pub artifact: PathBuf,
    pub recorded_sha256: Option<String>,
    pub actual_sha256: String,
    pub files_in_archive: usize,
    pub matched: Vec<String>,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
}

impl BackupCheck {
    pub fn hash_matches(&self) -> Option<bool> {
        self.recorded_sha256
            .as_ref()
            .map(|recorded| recorded == &self.actual_sha256)
    }

    pub fn passed(&self) -> bool {
        self.hash_matches() != Some(false) && self.mismatched.is_empty() && self.missing.is_empty()
    }
}

pub fn backup_index_path(store: &Store) -> PathBuf {
    store.backups_dir.join(schemas::BACKUP_INDEX_NAME)
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn hash_file(path: &Path) -> Result<String, WakeguardError> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn is_backup_artifact(name: &str) -> bool {
    name.starts_with(schemas::BACKUP_PREFIX) && name.ends_with(schemas::BACKUP_SUFFIX)
}

pub fn is_safety_snapshot(name: &str) -> bool {
    name.starts_with(schemas::SAFETY_PREFIX) && name.ends_with(schemas::SAFETY_SUFFIX)
}

/// Creation time embedded in an artifact or snapshot file name.
pub fn stamp_of(name: &str) -> Option<DateTime<Utc>> {
    let rest = name
        .strip_prefix(schemas::BACKUP_PREFIX)
        .and_then(|r| r.strip_suffix(schemas::BACKUP_SUFFIX))
        .or_else(|| {
            name.strip_prefix(schemas::SAFETY_PREFIX)
                .and_then(|r| r.strip_suffix(schemas::SAFETY_SUFFIX))
        })?;
    time::parse_artifact_stamp(rest)
}

/// Resolve an artifact path given on the command line.
///
/// Absolute paths are used as given. A relative path names a file in the
/// backups directory if one exists there, otherwise it is taken relative to
/// the instance home. The working directory is never consulted.
pub fn resolve_artifact(store: &Store, home: &Path, artifact: &Path) -> PathBuf {
    if artifact.is_absolute() {
        return artifact.to_path_buf();
    }
    let in_backups = store.backups_dir.join(artifact);
    if in_backups.is_file() {
        return in_backups;
    }
    home.join(artifact)
}

/// Files in `dir` accepted by `matches`, sorted by name (and so by stamp).
pub fn find_artifacts(dir: &Path, matches: fn(&str) -> bool) -> Result<Vec<PathBuf>, WakeguardError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if matches(&entry.file_name().to_string_lossy()) {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// Write `bytes` under `dir` as `<prefix><stamp><suffix>` without ever
/// exposing a partial file under the final name.
///
/// The data is flushed to a hidden temp file first and then linked into
/// place without clobbering. A name collision within the same millisecond is
/// retried with a fresh stamp.
pub(crate) fn publish_stamped(
    dir: &Path,
    prefix: &str,
    suffix: &str,
    bytes: &[u8],
) -> Result<(DateTime<Utc>, PathBuf), WakeguardError> {
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    let mut attempts = 0;
    loop {
        let created = Utc::now();
        let path = dir.join(format!("{}{}{}", prefix, time::artifact_stamp(created), suffix));
        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                sync_dir(dir);
                return Ok((created, path));
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists && attempts < 5 => {
                attempts += 1;
                tmp = e.file;
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
            Err(e) => return Err(e.error.into()),
        }
    }
}

fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), error = %e, "directory fsync failed");
    }
    #[cfg(not(unix))]
    let _ = dir;
}

fn append_record(store: &Store, record: &BackupRecord) -> Result<(), WakeguardError> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(backup_index_path(store))?;
    writeln!(f, "{}", serde_json::to_string(record)?)?;
    f.sync_data()?;
    Ok(())
}

pub fn read_records(store: &Store) -> Result<Vec<BackupRecord>, WakeguardError> {
    let path = backup_index_path(store);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BackupRecord>(&line) {
            Ok(record) => out.push(record),
            Err(e) => tracing::warn!(error = %e, "skipping malformed backup index line"),
        }
    }
    Ok(out)
}

/// Pack the whole state root, encrypt it and publish a new artifact.
///
/// The state root is only read. If any step fails no artifact appears under
/// a final name and the index is unchanged.
pub fn create_backup(store: &Store, passphrase: &Passphrase) -> Result<BackupRecord, WakeguardError> {
    if !store.root.is_dir() {
        return Err(WakeguardError::NotFound(format!(
            "state root {}",
            store.root.display()
        )));
    }
    fs::create_dir_all(&store.backups_dir)?;
    let broker = StateBroker::new(store);
    broker.with_lock("wakeguard", "backup.create", || {
        let packed = archive::pack(&store.root, None, &[store.backups_dir.clone()])?;
        let sealed = crypto::encrypt(&packed.bytes, passphrase, store.kdf_iterations)?;
        let (created, path) = publish_stamped(
            &store.backups_dir,
            schemas::BACKUP_PREFIX,
            schemas::BACKUP_SUFFIX,
            &sealed,
        )?;

        let record = BackupRecord {
            id: time::new_event_id(),
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            created_at: created.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            bytes: sealed.len() as u64,
            sha256: hash_bytes(&sealed),
            files: packed.listing.file_count(),
        };
        append_record(store, &record)?;
        tracing::info!(
            artifact = %path.display(),
            files = record.files,
            bytes = record.bytes,
            "backup artifact written"
        );
        Ok(record)
    })
}

/// Index records merged with what is actually on disk.
pub fn list_backups(store: &Store) -> Result<Vec<BackupSummary>, WakeguardError> {
    let records = read_records(store)?;
    let on_disk: Vec<String> = find_artifacts(&store.backups_dir, is_backup_artifact)?
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .collect();

    let mut out: Vec<BackupSummary> = records
        .iter()
        .map(|r| BackupSummary {
            file: r.file.clone(),
            created_at: Some(r.created_at.clone()),
            bytes: Some(r.bytes),
            sha256: Some(r.sha256.clone()),
            present: on_disk.contains(&r.file),
            recorded: true,
        })
        .collect();
    for name in on_disk {
        if records.iter().any(|r| r.file == name) {
            continue;
        }
        let path = store.backups_dir.join(&name);
        out.push(BackupSummary {
            created_at: stamp_of(&name)
                .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            bytes: fs::metadata(&path).ok().map(|m| m.len()),
            sha256: None,
            present: true,
            recorded: false,
            file: name,
        });
    }
    out.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(out)
}

/// Decrypt and unpack `artifact` into a scratch directory and compare every
/// manifest file of the live state root with its restored copy.
///
/// Nothing under the state root is written.
pub fn verify_backup(
    store: &Store,
    artifact: &Path,
    passphrase: &Passphrase,
) -> Result<BackupCheck, WakeguardError> {
    let sealed = fs::read(artifact)?;
    let actual_sha256 = hash_bytes(&sealed);
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let recorded_sha256 = read_records(store)?
        .into_iter()
        .rev()
        .find(|r| r.file == name)
        .map(|r| r.sha256);

    let plain = crypto::decrypt(&sealed, passphrase)?;
    let scratch = tempfile::tempdir()?;
    let listing = archive::unpack(&plain, scratch.path())?;

    let mut check = BackupCheck {
        artifact: artifact.to_path_buf(),
        recorded_sha256,
        actual_sha256,
        files_in_archive: listing.file_count(),
        matched: Vec::new(),
        mismatched: Vec::new(),
        missing: Vec::new(),
    };
    for rel in &store.manifest {
        let live = store.root.join(rel);
        if !live.is_file() {
            continue;
        }
        let label = rel.to_string_lossy().to_string();
        let restored = scratch.path().join(rel);
        if !restored.is_file() {
            check.missing.push(label);
        } else if hash_file(&live)? == hash_file(&restored)? {
            check.matched.push(label);
        } else {
            check.mismatched.push(label);
        }
    }
    tracing::info!(
        artifact = %artifact.display(),
        matched = check.matched.len(),
        mismatched = check.mismatched.len(),
        missing = check.missing.len(),
        "backup round-trip verified"
    );
    Ok(check)
}
