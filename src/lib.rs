//! Safe Delay Guard Library
//!
//! Cooldown gate for multisig wallet transactions. Exposes the guard engine,
//! its storage and event seams, and configuration for the `delay-guard` CLI.

pub mod cli;
pub mod config;
pub mod error;
pub mod guard;

pub use config::Config;
pub use error::{Error, Result};
pub use guard::{
    Address, CheckContext, DelayGuard, Fingerprint, GuardConfig, GuardError, Permit,
    SafeTransaction,
};
