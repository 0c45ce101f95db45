//! # Sluice
//!
//! Run a child process with its standard streams wired to many places at once.
//!
//! ## Features
//!
//! - **Input combination**: feed stdin from text, files, readers and streams,
//!   joined end to end (merge) or chunk by chunk (zip)
//! - **Output fan-out**: copy stdout and stderr to any number of files,
//!   writers and an in-memory capture through a balanced tee tree
//! - **Joined output**: sinks that want both channels get them interleaved
//! - **Timeouts**: SIGINT after a grace period, SIGKILL if that is ignored
//!
//! ## Usage
//!
//! ```no_run
//! use sluice::runtime::{Output, RunConfig, run};
//! use sluice::stdio::{Input, Sink};
//!
//! # async fn example() -> sluice_common::SluiceResult<()> {
//! let config = RunConfig::new(["sort"])
//!     .with_input(Input::new().then("b\n").then("a\n"))
//!     .with_stdout(Output::To(vec![Sink::Capture, Sink::append("sorted.log")]));
//!
//! let outcome = run(config).await?.await?;
//! assert_eq!(outcome.captured_text(), Some("a\nb\n"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod exec;
pub mod runtime;
pub mod stdio;

pub use exec::{Signal, TimeoutPolicy};
pub use runtime::{Invocation, RunConfig, run};
pub use sluice_common::{Outcome, SluiceError, SluiceResult};
