//! Process execution: spawning, signals and timeout supervision.

pub mod process;
pub mod signal;
pub mod timeout;

pub use process::{ChildStdio, ProcessControl, spawn_process, wait_exited};
pub use signal::Signal;
pub use timeout::{ForceDelay, Supervisor, SupervisorState, TimeoutPolicy};
