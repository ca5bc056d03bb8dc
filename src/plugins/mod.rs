//! Subsystem implementations: archiving, encryption, backup, restore,
//! verification and the task ledger.

pub mod archive;
pub mod backup;
pub mod crypto;
pub mod health;
pub mod liveness;
pub mod restore;
pub mod todo;
