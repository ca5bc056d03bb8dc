//! Wakeguard: persistence and recovery for a single agent instance.
//!
//! An agent that wakes, works and sleeps keeps everything it knows in one
//! **state root** directory. Wakeguard protects that directory:
//!
//! - **Backup**: pack the state root, encrypt it with a passphrase and publish
//!   a timestamped artifact atomically.
//! - **Restore**: confirm, decrypt, validate, take a safety snapshot, then
//!   unpack over the state root.
//! - **Verify**: audit a fixed manifest of critical files, backup freshness
//!   and external liveness signals.
//! - **Ledger**: a small durable state machine of units of work, so a fresh
//!   wake neither repeats nor loses work.
//!
//! # Layout
//!
//! ```text
//! <home>/wakeguard.toml         optional configuration
//! <state_root>/ledger.db        task ledger (plus ledger.events.jsonl)
//! <backups_dir>/backup-*.tar.zst.enc
//! <backups_dir>/safety-*.tar.zst
//! <backups_dir>/backups.index.jsonl
//! <backups_dir>/broker.events.jsonl
//! ```
//!
//! # Examples
//!
//! ```bash
//! WAKEGUARD_PASS=... wakeguard --passphrase-env WAKEGUARD_PASS backup create
//! wakeguard verify --self
//! wakeguard restore --from backups/backup-20261019T081500123Z.tar.zst.enc
//! wakeguard ledger add "Summarize overnight mail"
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: configuration, store handle, broker, prompts, errors
//! - [`plugins`]: archive, crypto, backup, restore, health, liveness, ledger

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{BackupCommand, Cli, Command};
use crate::core::error::WakeguardError;
use crate::core::output::{self, OutputFormat};
use crate::core::prompt::{
    Confirmation, ConfirmationProvider, EnvSecret, SecretProvider, StdinConfirmation, StdinSecret,
};
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::liveness::SystemProbe;
use crate::plugins::restore::{NoopObserver, RestoreResult};
use crate::plugins::{backup, health, restore, todo};
use clap::Parser;
use std::path::{Path, PathBuf};

/// Exit code for `verify --self` on an unhealthy instance.
pub const EXIT_UNHEALTHY: u8 = 2;

fn resolve_home(home: Option<PathBuf>) -> Result<PathBuf, WakeguardError> {
    let home = match home {
        Some(home) => home,
        None => std::env::current_dir()?,
    };
    Ok(std::fs::canonicalize(&home).unwrap_or(home))
}

fn secret_provider(passphrase_env: Option<String>) -> Box<dyn SecretProvider> {
    match passphrase_env {
        Some(var) => Box::new(EnvSecret { var }),
        None => Box::new(StdinSecret),
    }
}

/// Parse the command line, run one command and return the process exit code.
pub fn run() -> Result<u8, WakeguardError> {
    let cli = Cli::parse();
    let home = resolve_home(cli.home)?;
    let store = Store::open(&home)?;
    let format = cli.format;
    let secrets = secret_provider(cli.passphrase_env);
    tracing::debug!(root = %store.root.display(), backups = %store.backups_dir.display(), "store resolved");

    match cli.command {
        Command::Backup(backup_cli) => {
            run_backup(&store, &home, backup_cli.command, secrets.as_ref(), format)
        }
        Command::Restore(restore_cli) => {
            let confirmation: Box<dyn ConfirmationProvider> = if restore_cli.yes {
                Box::new(Confirmation::Explicit(true))
            } else {
                Box::new(StdinConfirmation)
            };
            let artifact = backup::resolve_artifact(&store, &home, &restore_cli.from);
            let passphrase = secrets.passphrase("restore")?;
            let report = restore::restore(
                &store,
                &artifact,
                &passphrase,
                confirmation.as_ref(),
                &NoopObserver,
            )?;
            let mut text = format!(
                "Restored {} file(s) from {}",
                report.restored_files,
                report.artifact.display()
            );
            match &report.safety_snapshot {
                Some(path) => text.push_str(&format!("\nSafety snapshot: {}", path.display())),
                None => text.push_str("\nSafety snapshot: not taken (see log)"),
            }
            if let RestoreResult::PartialFilesMissing(missing) = &report.result {
                text.push_str(&format!(
                    "\nWarning: core file(s) still missing: {}",
                    missing.join(", ")
                ));
            }
            let status = match report.result {
                RestoreResult::Restored => "ok",
                RestoreResult::PartialFilesMissing(_) => "partial",
            };
            let envelope =
                time::command_envelope("restore", status, serde_json::json!({ "report": report }));
            output::emit(format, &envelope, &text)?;
            Ok(0)
        }
        Command::Verify(_) => {
            let probe = SystemProbe::new(store.scheduler_marker.clone(), store.mailbox_dir.clone());
            let report = health::audit(&store, &probe);
            let status = if report.is_healthy() { "ok" } else { "unhealthy" };
            let envelope =
                time::command_envelope("verify", status, serde_json::json!({ "report": report }));
            output::emit(format, &envelope, &health::render_text(&report))?;
            Ok(if report.is_healthy() { 0 } else { EXIT_UNHEALTHY })
        }
        Command::Ledger(ledger_cli) => {
            todo::run_ledger_cli(&store, ledger_cli, format)?;
            Ok(0)
        }
    }
}

fn run_backup(
    store: &Store,
    home: &Path,
    command: BackupCommand,
    secrets: &dyn SecretProvider,
    format: OutputFormat,
) -> Result<u8, WakeguardError> {
    match command {
        BackupCommand::Create => {
            let passphrase = secrets.passphrase("backup")?;
            let record = backup::create_backup(store, &passphrase)?;
            let text = format!(
                "Backup written: {} ({} file(s), {} bytes)",
                store.backups_dir.join(&record.file).display(),
                record.files,
                record.bytes
            );
            let envelope = time::command_envelope(
                "backup.create",
                "ok",
                serde_json::json!({ "record": record }),
            );
            output::emit(format, &envelope, &text)?;
            Ok(0)
        }
        BackupCommand::List => {
            let items = backup::list_backups(store)?;
            let text = if items.is_empty() {
                "No backups".to_string()
            } else {
                items
                    .iter()
                    .map(|b| {
                        let mut line = format!(
                            "{}  {}  {}",
                            b.file,
                            b.created_at.as_deref().unwrap_or("-"),
                            b.bytes.map(|n| format!("{} bytes", n)).unwrap_or_default()
                        );
                        if !b.present {
                            line.push_str("  [missing]");
                        }
                        if !b.recorded {
                            line.push_str("  [unrecorded]");
                        }
                        line
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            let envelope =
                time::command_envelope("backup.list", "ok", serde_json::json!({ "items": items }));
            output::emit(format, &envelope, &text)?;
            Ok(0)
        }
        BackupCommand::Verify { artifact } => {
            let passphrase = secrets.passphrase("verify")?;
            let artifact = backup::resolve_artifact(store, home, &artifact);
            let check = backup::verify_backup(store, &artifact, &passphrase)?;
            let mut text = format!(
                "{}: {} file(s) in archive; {} matched, {} changed, {} missing",
                check.artifact.display(),
                check.files_in_archive,
                check.matched.len(),
                check.mismatched.len(),
                check.missing.len()
            );
            match check.hash_matches() {
                Some(true) => text.push_str("\nChecksum matches the backup index"),
                Some(false) => text.push_str("\nChecksum DOES NOT match the backup index"),
                None => text.push_str("\nNo index record for this artifact"),
            }
            for name in &check.mismatched {
                text.push_str(&format!("\n  changed: {}", name));
            }
            for name in &check.missing {
                text.push_str(&format!("\n  missing: {}", name));
            }
            let status = if check.passed() { "ok" } else { "mismatch" };
            let envelope =
                time::command_envelope("backup.verify", status, serde_json::json!({ "check": check }));
            output::emit(format, &envelope, &text)?;
            Ok(if check.passed() { 0 } else { 1 })
        }
    }
}
