//! Confirmation and secret providers.
//!
//! Destructive operations never prompt on their own: they ask an injected
//! provider. Interactive callers plug in the stdin implementations, batch
//! callers pass explicit values, and tests use the fixed variants.

use crate::core::error::WakeguardError;
use std::io::{self, BufRead, Write};
use zeroize::{Zeroize, Zeroizing};

/// A passphrase held only for the duration of one call.
///
/// The buffer is zeroized when the value is dropped. It is never written to
/// disk and has no `Display`; `Debug` is redacted.
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(secret: impl Into<String>) -> Self {
        Passphrase(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

pub trait SecretProvider {
    fn passphrase(&self, purpose: &str) -> Result<Passphrase, WakeguardError>;
}

pub trait ConfirmationProvider {
    /// Return `true` only if the operator explicitly agreed to `action`.
    fn confirm(&self, action: &str) -> Result<bool, WakeguardError>;
}

/// Programmatic confirmation: the caller states its decision up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Explicit(bool),
}

impl ConfirmationProvider for Confirmation {
    fn confirm(&self, _action: &str) -> Result<bool, WakeguardError> {
        match self {
            Confirmation::Explicit(confirmed) => Ok(*confirmed),
        }
    }
}

/// Asks on stderr, reads the answer from stdin. Only `yes` counts.
pub struct StdinConfirmation;

impl ConfirmationProvider for StdinConfirmation {
    fn confirm(&self, action: &str) -> Result<bool, WakeguardError> {
        let mut stderr = io::stderr();
        write!(stderr, "{}\nType 'yes' to continue: ", action)?;
        stderr.flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim() == "yes")
    }
}

/// Reads one line from stdin after printing a prompt on stderr.
pub struct StdinSecret;

impl SecretProvider for StdinSecret {
    fn passphrase(&self, purpose: &str) -> Result<Passphrase, WakeguardError> {
        let mut stderr = io::stderr();
        write!(stderr, "Passphrase for {}: ", purpose)?;
        stderr.flush()?;
        let mut line = Zeroizing::new(String::new());
        io::stdin().lock().read_line(&mut line)?;
        let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
        line.zeroize();
        non_empty(Passphrase::new(trimmed))
    }
}

/// Reads the passphrase from a caller-named environment variable.
pub struct EnvSecret {
    pub var: String,
}

impl SecretProvider for EnvSecret {
    fn passphrase(&self, _purpose: &str) -> Result<Passphrase, WakeguardError> {
        let value = std::env::var(&self.var).map_err(|_| {
            WakeguardError::Config(format!("environment variable {} is not set", self.var))
        })?;
        non_empty(Passphrase::new(value))
    }
}

/// Fixed secret for programmatic callers and tests.
pub struct FixedSecret(pub String);

impl SecretProvider for FixedSecret {
    fn passphrase(&self, _purpose: &str) -> Result<Passphrase, WakeguardError> {
        non_empty(Passphrase::new(self.0.clone()))
    }
}

fn non_empty(p: Passphrase) -> Result<Passphrase, WakeguardError> {
    if p.is_empty() {
        return Err(WakeguardError::Config("passphrase must not be empty".to_string()));
    }
    Ok(p)
}
