//! Invocation lifecycle events and the bus they are published on.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::exec::signal::Signal;

/// Something that happened to a child process.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InvocationEvent {
    /// The child was spawned.
    Spawned {
        pid: u32,
        command: Vec<String>,
        timestamp: i64,
    },
    /// A signal was delivered, by the caller or the timeout supervisor.
    SignalSent {
        pid: u32,
        signal: Signal,
        timestamp: i64,
    },
    /// The child exited and all output was delivered.
    Exited {
        pid: u32,
        code: i32,
        timestamp: i64,
    },
}

impl InvocationEvent {
    /// The child the event is about.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        match self {
            Self::Spawned { pid, .. } | Self::SignalSent { pid, .. } | Self::Exited { pid, .. } => *pid,
        }
    }
}

/// Broadcast bus for invocation events. Clones share the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<InvocationEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InvocationEvent> {
        self.sender.subscribe()
    }

    /// Publish an event.
    pub fn publish(&self, event: InvocationEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub(crate) fn spawned(&self, pid: u32, command: &[String]) {
        self.publish(InvocationEvent::Spawned {
            pid,
            command: command.to_vec(),
            timestamp: now(),
        });
    }

    pub(crate) fn signal_sent(&self, pid: u32, signal: Signal) {
        self.publish(InvocationEvent::SignalSent {
            pid,
            signal,
            timestamp: now(),
        });
    }

    pub(crate) fn exited(&self, pid: u32, code: i32) {
        self.publish(InvocationEvent::Exited {
            pid,
            code,
            timestamp: now(),
        });
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
