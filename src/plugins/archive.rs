//! Archiver: packs a state root into one zstd-compressed tar container.
//!
//! Entries are written in lexicographic order of their relative path with
//! normalized ownership, so the same tree always yields the same layout.
//! Only regular files and directories are stored; symlinks are skipped on
//! pack and any other entry type is rejected on unpack.

use crate::core::error::WakeguardError;
use crate::core::schemas;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveListing {
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveListing {
    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_dir).count()
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.entries.iter().any(|e| e.path == rel)
    }
}

#[derive(Debug)]
pub struct PackedArchive {
    pub bytes: Vec<u8>,
    pub listing: ArchiveListing,
}

struct SourceEntry {
    rel_path: String,
    fs_path: PathBuf,
    is_dir: bool,
}

fn corrupt(e: impl std::fmt::Display) -> WakeguardError {
    WakeguardError::ArchiveCorrupt(e.to_string())
}

fn normalize_rel_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_transient(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    schemas::TRANSIENT_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

fn canonical_or_raw(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Pack `source` (or only `subset`, relative to it) into a compressed container.
///
/// Subset entries that do not exist are skipped. Anything under one of the
/// `exclude` paths is left out, which keeps a nested backups directory from
/// being archived into itself.
pub fn pack(
    source: &Path,
    subset: Option<&[PathBuf]>,
    exclude: &[PathBuf],
) -> Result<PackedArchive, WakeguardError> {
    let source = canonical_or_raw(source);
    let excluded: Vec<PathBuf> = exclude
        .iter()
        .filter_map(|p| {
            canonical_or_raw(p)
                .strip_prefix(&source)
                .ok()
                .map(Path::to_path_buf)
        })
        .filter(|rel| !rel.as_os_str().is_empty())
        .collect();

    let mut entries = Vec::new();
    match subset {
        None => collect_tree(&source, &source, &excluded, &mut entries)?,
        Some(paths) => {
            for rel in paths {
                let full = source.join(rel);
                let meta = match fs::symlink_metadata(&full) {
                    Ok(meta) => meta,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        tracing::debug!(path = %rel.display(), "subset path missing, skipped");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                if meta.is_dir() {
                    collect_tree(&source, &full, &excluded, &mut entries)?;
                } else if meta.is_file() {
                    entries.push(SourceEntry {
                        rel_path: normalize_rel_path(rel),
                        fs_path: full,
                        is_dir: false,
                    });
                }
            }
        }
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    entries.dedup_by(|a, b| a.rel_path == b.rel_path);

    let encoder = zstd::Encoder::new(Vec::new(), COMPRESSION_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);
    let mut listing = ArchiveListing::default();
    for entry in entries {
        let metadata = fs::metadata(&entry.fs_path)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut header = tar::Header::new_gnu();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(mtime);
        if entry.is_dir {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, &entry.rel_path, io::empty())?;
        } else {
            let data = fs::read(&entry.fs_path)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(file_mode(&metadata));
            header.set_size(data.len() as u64);
            builder.append_data(&mut header, &entry.rel_path, data.as_slice())?;
        }
        listing.entries.push(ArchiveEntry {
            path: entry.rel_path,
            is_dir: entry.is_dir,
            size: if entry.is_dir { 0 } else { header.size()? },
        });
    }
    let encoder = builder.into_inner()?;
    let bytes = encoder.finish()?;
    Ok(PackedArchive { bytes, listing })
}

fn collect_tree(
    source: &Path,
    start: &Path,
    excluded: &[PathBuf],
    out: &mut Vec<SourceEntry>,
) -> Result<(), WakeguardError> {
    let mut iter = WalkDir::new(start)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = iter.next() {
        let entry = entry.map_err(|e| WakeguardError::IoError(io::Error::other(e)))?;
        let path = entry.path();
        if path == source {
            continue;
        }
        let Ok(rel) = path.strip_prefix(source) else {
            continue;
        };
        if excluded.iter().any(|ex| rel.starts_with(ex)) {
            if entry.file_type().is_dir() {
                iter.skip_current_dir();
            }
            continue;
        }
        if entry.file_type().is_symlink() || is_transient(path) {
            continue;
        }
        out.push(SourceEntry {
            rel_path: normalize_rel_path(rel),
            fs_path: path.to_path_buf(),
            is_dir: entry.file_type().is_dir(),
        });
    }
    Ok(())
}

fn file_mode(metadata: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 != 0 {
            return 0o755;
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;
    0o644
}

fn check_entry_path(path: &Path) -> Result<(), WakeguardError> {
    if path.as_os_str().is_empty() {
        return Err(corrupt("empty entry path"));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(corrupt(format!(
                    "entry '{}' escapes the destination",
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

/// Decode the whole container in memory and list its entries.
pub fn validate(bytes: &[u8]) -> Result<ArchiveListing, WakeguardError> {
    if bytes.is_empty() {
        return Err(corrupt("empty container"));
    }
    let decoder = zstd::Decoder::new(bytes).map_err(corrupt)?;
    let mut archive = tar::Archive::new(decoder);
    let mut listing = ArchiveListing::default();
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();
        check_entry_path(&path)?;
        let is_dir = match entry.header().entry_type() {
            tar::EntryType::Regular => false,
            tar::EntryType::Directory => true,
            other => {
                return Err(corrupt(format!(
                    "unsupported entry type {:?} for '{}'",
                    other,
                    path.display()
                )));
            }
        };
        let size = io::copy(&mut entry, &mut io::sink()).map_err(corrupt)?;
        listing.entries.push(ArchiveEntry {
            path: normalize_rel_path(&path),
            is_dir,
            size,
        });
    }
    Ok(listing)
}

/// Extract into `dest`, overwriting files at the same relative paths.
///
/// The container is validated first, so a malformed stream fails with
/// `ArchiveCorrupt` before anything in `dest` is touched.
pub fn unpack(bytes: &[u8], dest: &Path) -> Result<ArchiveListing, WakeguardError> {
    let listing = validate(bytes)?;
    fs::create_dir_all(dest)?;

    let decoder = zstd::Decoder::new(bytes)?;
    let mut archive = tar::Archive::new(decoder);
    archive.set_overwrite(true);
    archive.set_preserve_mtime(true);
    for entry in archive.entries()? {
        let mut entry = entry?;
        entry.unpack_in(dest)?;
    }
    Ok(listing)
}

/// Read a single file out of a container without extracting it.
pub fn read_entry(bytes: &[u8], rel: &str) -> Result<Option<Vec<u8>>, WakeguardError> {
    let decoder = zstd::Decoder::new(bytes).map_err(corrupt)?;
    let mut archive = tar::Archive::new(decoder);
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = normalize_rel_path(&entry.path().map_err(corrupt)?);
        if path == rel {
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(corrupt)?;
            return Ok(Some(data));
        }
    }
    Ok(None)
}
