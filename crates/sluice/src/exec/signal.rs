//! Signals the engine can deliver to a child.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sluice_common::SluiceError;

/// A supported signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// `SIGHUP`.
    Hangup,
    /// `SIGINT`, the polite stop used by the timeout supervisor.
    Interrupt,
    /// `SIGTERM`.
    Terminate,
    /// `SIGKILL`, cannot be caught.
    Kill,
}

impl Signal {
    /// The platform signal number.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Hangup => libc::SIGHUP,
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }

    /// Conventional `SIG*` name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Signal {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "HUP" | "HANGUP" | "1" => Ok(Self::Hangup),
            "INT" | "INTERRUPT" | "2" => Ok(Self::Interrupt),
            "TERM" | "TERMINATE" | "15" => Ok(Self::Terminate),
            "KILL" | "9" => Ok(Self::Kill),
            _ => Err(SluiceError::Config {
                message: format!("unsupported signal: {s}"),
            }),
        }
    }
}
