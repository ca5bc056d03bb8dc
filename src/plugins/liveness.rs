//! External liveness signals consumed by the verifier.
//!
//! Both queries are read-only and must never fail the audit: a probe that
//! cannot reach its facility answers `false` / `None`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub trait LivenessProbe {
    /// Whether a scheduler entry for this instance is installed.
    fn check_scheduled(&self) -> bool;
    /// Number of messages waiting, or `None` if the mailbox is unreachable.
    fn check_mailbox(&self) -> Option<usize>;
}

/// Probe backed by the host: `crontab -l` and a mailbox directory.
pub struct SystemProbe {
    pub scheduler_marker: String,
    pub mailbox_dir: Option<PathBuf>,
}

impl SystemProbe {
    pub fn new(scheduler_marker: impl Into<String>, mailbox_dir: Option<PathBuf>) -> Self {
        Self {
            scheduler_marker: scheduler_marker.into(),
            mailbox_dir,
        }
    }
}

impl LivenessProbe for SystemProbe {
    fn check_scheduled(&self) -> bool {
        let output = match Command::new("crontab").arg("-l").output() {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(error = %e, "crontab not available");
                return false;
            }
        };
        if !output.status.success() {
            return false;
        }
        crontab_has_marker(&String::from_utf8_lossy(&output.stdout), &self.scheduler_marker)
    }

    fn check_mailbox(&self) -> Option<usize> {
        let dir = self.mailbox_dir.as_deref()?;
        count_mailbox(dir)
    }
}

/// True if an active (uncommented) crontab line mentions `marker`.
pub fn crontab_has_marker(listing: &str, marker: &str) -> bool {
    if marker.is_empty() {
        return false;
    }
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .any(|line| line.contains(marker))
}

/// Count messages in a maildir (`new/` + `cur/`) or a flat directory.
pub fn count_mailbox(dir: &Path) -> Option<usize> {
    let new = dir.join("new");
    let cur = dir.join("cur");
    if new.is_dir() || cur.is_dir() {
        let mut total = 0;
        for sub in [new, cur] {
            if sub.is_dir() {
                total += count_files(&sub)?;
            }
        }
        return Some(total);
    }
    count_files(dir)
}

fn count_files(dir: &Path) -> Option<usize> {
    let entries = fs::read_dir(dir).ok()?;
    Some(
        entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .count(),
    )
}

/// Fixed answers, for tests and for callers that have no scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProbe {
    pub scheduled: bool,
    pub mailbox: Option<usize>,
}

impl LivenessProbe for StaticProbe {
    fn check_scheduled(&self) -> bool {
        self.scheduled
    }

    fn check_mailbox(&self) -> Option<usize> {
        self.mailbox
    }
}
