//! Running commands.
//!
//! [`run`] takes a [`RunConfig`], wires the stdio engine around a freshly
//! spawned child and hands back an [`Invocation`].

mod config;
pub mod events;
mod invocation;
mod state;

pub use config::{EngineTuning, Output, RunConfig, StdinSetting};
pub use events::{EventBus, InvocationEvent};
pub use invocation::{ChildControl, InputWriter, Invocation, run};
pub use state::{StatusCell, StatusSnapshot};
