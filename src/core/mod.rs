//! Core modules shared by every subsystem.
//!
//! Configuration, the store handle, the lock-and-audit broker, SQLite
//! connection setup, prompts and the crate error type live here.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod output;
pub mod prompt;
pub mod schemas;
pub mod store;
pub mod time;
