//! Integrity Verifier.
//!
//! An audit always produces a report. A broken state root is described, not
//! raised: the only pass/fail signal is [`HealthStatus`], which is
//! `Healthy` iff no manifest entry is missing.

use crate::core::store::Store;
use crate::plugins::backup;
use crate::plugins::liveness::LivenessProbe;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStatus {
    pub path: String,
    pub present: bool,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct BackupSurvey {
    pub count: usize,
    pub latest: Option<String>,
    pub latest_modified: Option<DateTime<Utc>>,
    pub age_hours: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LivenessReport {
    pub scheduled: bool,
    pub mailbox_reachable: bool,
    pub mailbox_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub generated_at: DateTime<Utc>,
    pub state_root: String,
    pub status: HealthStatus,
    pub files: Vec<FileStatus>,
    pub missing: Vec<String>,
    pub backups: BackupSurvey,
    pub liveness: LivenessReport,
    pub warnings: Vec<String>,
}

impl VerificationReport {
    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

fn modified_utc(meta: &fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

fn file_status(root: &Path, rel: &Path) -> FileStatus {
    let label = rel.to_string_lossy().to_string();
    match fs::metadata(root.join(rel)) {
        Ok(meta) if meta.is_file() => FileStatus {
            path: label,
            present: true,
            size: Some(meta.len()),
            modified: modified_utc(&meta),
        },
        _ => FileStatus {
            path: label,
            present: false,
            size: None,
            modified: None,
        },
    }
}

fn survey_backups(store: &Store, now: DateTime<Utc>, warnings: &mut Vec<String>) -> BackupSurvey {
    let artifacts = match backup::find_artifacts(&store.backups_dir, backup::is_backup_artifact) {
        Ok(found) => found,
        Err(e) => {
            warnings.push(format!(
                "cannot read backups directory {}: {}",
                store.backups_dir.display(),
                e
            ));
            return BackupSurvey::default();
        }
    };

    let mut survey = BackupSurvey {
        count: artifacts.len(),
        ..BackupSurvey::default()
    };
    for path in &artifacts {
        let Some(modified) = fs::metadata(path).ok().as_ref().and_then(modified_utc) else {
            continue;
        };
        if survey.latest_modified.is_none_or(|best| modified > best) {
            survey.latest_modified = Some(modified);
            survey.latest = path.file_name().map(|n| n.to_string_lossy().to_string());
        }
    }
    survey.age_hours = survey
        .latest_modified
        .map(|at| (now - at).num_seconds().max(0) as f64 / 3600.0);

    match survey.age_hours {
        None => warnings.push("no backup artifacts found".to_string()),
        Some(age) if age > store.stale_backup_hours as f64 => warnings.push(format!(
            "latest backup is {:.1}h old (threshold {}h)",
            age, store.stale_backup_hours
        )),
        Some(_) => {}
    }
    survey
}

/// Audit the state root as of now.
pub fn audit(store: &Store, probe: &dyn LivenessProbe) -> VerificationReport {
    audit_at(store, probe, Utc::now())
}

/// Audit with an explicit clock, used for backup age.
pub fn audit_at(
    store: &Store,
    probe: &dyn LivenessProbe,
    now: DateTime<Utc>,
) -> VerificationReport {
    let files: Vec<FileStatus> = store
        .manifest
        .iter()
        .map(|rel| file_status(&store.root, rel))
        .collect();
    let missing: Vec<String> = files
        .iter()
        .filter(|f| !f.present)
        .map(|f| f.path.clone())
        .collect();

    let mut warnings = Vec::new();
    let backups = survey_backups(store, now, &mut warnings);

    let mailbox_count = probe.check_mailbox();
    let liveness = LivenessReport {
        scheduled: probe.check_scheduled(),
        mailbox_reachable: mailbox_count.is_some(),
        mailbox_count,
    };
    if !liveness.scheduled {
        warnings.push("no scheduler entry found".to_string());
    }

    let status = if missing.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };
    tracing::info!(%status, missing = missing.len(), backups = backups.count, "audit complete");

    VerificationReport {
        generated_at: now,
        state_root: store.root.to_string_lossy().to_string(),
        status,
        files,
        missing,
        backups,
        liveness,
        warnings,
    }
}

/// Per-file status lines followed by the overall verdict.
pub fn render_text(report: &VerificationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "State root: {}", report.state_root);
    for file in &report.files {
        if file.present {
            let _ = writeln!(
                out,
                "  {} {} ({} bytes, modified {})",
                "✓".bright_green(),
                file.path,
                file.size.unwrap_or(0),
                file.modified
                    .map(|m| m.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            );
        } else {
            let _ = writeln!(out, "  {} {} MISSING", "✗".bright_red(), file.path);
        }
    }

    match (&report.backups.latest, report.backups.age_hours) {
        (Some(latest), Some(age)) => {
            let _ = writeln!(
                out,
                "Backups: {} (latest {}, {:.1}h ago)",
                report.backups.count, latest, age
            );
        }
        _ => {
            let _ = writeln!(out, "Backups: {}", report.backups.count);
        }
    }
    let _ = writeln!(
        out,
        "Scheduler entry: {}",
        if report.liveness.scheduled { "present" } else { "absent" }
    );
    let _ = writeln!(
        out,
        "Mailbox: {}",
        match report.liveness.mailbox_count {
            Some(n) => format!("reachable, {} message(s)", n),
            None => "unreachable".to_string(),
        }
    );
    for warning in &report.warnings {
        let _ = writeln!(out, "{} {}", "⚠".bright_yellow(), warning);
    }

    match report.status {
        HealthStatus::Healthy => {
            let _ = writeln!(out, "{}", "HEALTHY".bright_green().bold());
        }
        HealthStatus::Unhealthy => {
            let _ = writeln!(
                out,
                "{} ({} critical file(s) missing)",
                "UNHEALTHY".bright_red().bold(),
                report.missing_count()
            );
        }
    }
    out
}
