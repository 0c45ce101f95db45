//! # sluice-common
//!
//! Shared utilities and types for the sluice process runner.
//!
//! This crate provides functionality used by every sluice front end:
//! - The error taxonomy for setting up and running a child process
//! - The outcome record a finished invocation resolves to
//! - Path helpers for file sinks and sources

#![warn(missing_docs)]

pub mod error;
pub mod outcome;
pub mod paths;

pub use error::{SluiceError, SluiceResult};
pub use outcome::{CaptureSlot, Captured, Escalation, ExitOutcome, Outcome};
pub use paths::{clear_path_for, resolve_in};
