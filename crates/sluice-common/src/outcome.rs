//! The record a finished invocation resolves to.

use serde::{Deserialize, Serialize};

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitOutcome {
    /// Exit code. Signal deaths are reported shell style as `128 + signal`.
    pub code: i32,
    /// The signal that terminated the child, if any.
    pub signal: Option<i32>,
    /// Whether the child exited normally with code zero.
    pub success: bool,
}

impl ExitOutcome {
    /// Outcome of a normal exit.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        Self {
            code,
            signal: None,
            success: code == 0,
        }
    }

    /// Outcome of a death by signal.
    #[must_use]
    pub const fn from_signal(signal: i32) -> Self {
        Self {
            code: 128 + signal,
            signal: Some(signal),
            success: false,
        }
    }

    /// Convert a platform exit status.
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::from_signal(signal);
            }
        }
        Self::from_code(status.code().unwrap_or(1))
    }
}

/// Which output a capture sink collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSlot {
    /// Only the child's stdout.
    Stdout,
    /// Only the child's stderr.
    Stderr,
    /// Stdout and stderr interleaved.
    Combined,
}

/// Text collected by a capture sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Captured {
    /// Which channel(s) the text came from.
    pub slot: CaptureSlot,
    /// Decoded text; invalid UTF-8 is replaced.
    pub text: String,
}

/// How far the timeout supervisor had to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    /// The child exited within its grace period.
    NotNeeded,
    /// The polite signal was sent.
    Polite,
    /// The forceful signal was sent.
    Forced,
}

/// Everything a finished invocation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// The command that ran.
    pub command: Vec<String>,
    /// Process ID of the child.
    pub pid: u32,
    /// How the child ended.
    pub exit: ExitOutcome,
    /// Output collected by a capture sink.
    pub captured: Option<Captured>,
    /// Timeout escalation, when a timeout policy was configured.
    pub escalation: Option<Escalation>,
    /// Sinks whose writes failed mid-run, with the reason.
    pub sink_failures: Vec<String>,
}

impl Outcome {
    /// Whether the child exited successfully.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit.success
    }

    /// Captured text, if a capture sink was configured.
    #[must_use]
    pub fn captured_text(&self) -> Option<&str> {
        self.captured.as_ref().map(|c| c.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_codes_follow_shell_convention() {
        let outcome = ExitOutcome::from_signal(9);
        assert_eq!(outcome.code, 137);
        assert!(!outcome.success);
    }

    #[cfg(unix)]
    #[test]
    fn converts_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let ok = ExitOutcome::from_status(std::process::ExitStatus::from_raw(0));
        assert!(ok.success);
        let failed = ExitOutcome::from_status(std::process::ExitStatus::from_raw(3 << 8));
        assert_eq!(failed, ExitOutcome::from_code(3));
        let killed = ExitOutcome::from_status(std::process::ExitStatus::from_raw(9));
        assert_eq!(killed.signal, Some(9));
    }

    #[test]
    fn outcome_serializes_slots_in_lowercase() {
        let outcome = Outcome {
            command: vec!["echo".to_string()],
            pid: 1,
            exit: ExitOutcome::from_code(0),
            captured: Some(Captured {
                slot: CaptureSlot::Combined,
                text: "hi".to_string(),
            }),
            escalation: Some(Escalation::NotNeeded),
            sink_failures: Vec::new(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["captured"]["slot"], "combined");
        assert_eq!(json["escalation"], "not_needed");
        assert_eq!(outcome.captured_text(), Some("hi"));
    }
}
