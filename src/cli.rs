//! CLI struct definitions for the wakeguard command-line interface.
//!
//! All clap-derived types for the top-level surface live here. The ledger
//! group keeps its own types next to its implementation in `plugins::todo`.

use crate::core::output::OutputFormat;
use crate::plugins::todo::LedgerCli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "wakeguard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Encrypted backup, guarded restore, integrity audit and a durable task ledger for one agent's state root."
)]
pub(crate) struct Cli {
    /// Instance home holding `wakeguard.toml` (defaults to $WAKEGUARD_HOME, then the current directory).
    #[clap(long, global = true, env = "WAKEGUARD_HOME")]
    pub home: Option<PathBuf>,
    /// Output format for command results.
    #[clap(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
    /// Read the passphrase from this environment variable instead of prompting.
    #[clap(long, global = true, value_name = "VAR")]
    pub passphrase_env: Option<String>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create, list and verify encrypted backup artifacts.
    Backup(BackupCli),
    /// Restore the state root from an artifact (asks for confirmation).
    Restore(RestoreCli),
    /// Audit the critical file manifest, backup freshness and liveness signals.
    Verify(VerifyCli),
    /// Track units of work across restarts.
    Ledger(LedgerCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct BackupCli {
    #[clap(subcommand)]
    pub command: BackupCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum BackupCommand {
    /// Pack and encrypt the whole state root into a new artifact.
    Create,
    /// List recorded and on-disk artifacts.
    List,
    /// Decrypt an artifact into a scratch directory and compare it with the live state.
    Verify {
        #[clap(long)]
        artifact: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct RestoreCli {
    /// Artifact to restore from.
    #[clap(long = "from", value_name = "ARTIFACT")]
    pub from: PathBuf,
    /// Confirm the overwrite up front instead of answering the prompt.
    #[clap(long)]
    pub yes: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct VerifyCli {
    /// Audit this instance.
    #[clap(long = "self", required = true)]
    pub self_check: bool,
}
