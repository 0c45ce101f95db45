//! Run configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sluice_common::{SluiceError, SluiceResult};

use crate::exec::signal::Signal;
use crate::exec::timeout::TimeoutPolicy;
use crate::stdio::{Input, Sink};

use super::events::EventBus;

/// What the child reads on stdin.
#[derive(Debug, Default)]
pub enum StdinSetting {
    /// Share the parent's stdin.
    #[default]
    Inherit,
    /// Empty stdin.
    Null,
    /// A pipe the caller writes to through the invocation's input writer.
    Open,
    /// A pipe fed from the combined sources.
    Feed(Input),
}

/// Where one output channel goes.
#[derive(Debug, Clone, Default)]
pub enum Output {
    /// Share the parent's stream.
    #[default]
    Inherit,
    /// Discard.
    Null,
    /// Copy to every sink in the list. An empty list discards.
    To(Vec<Sink>),
}

/// A channel's resolved routing once combined sinks are folded in.
#[derive(Debug, Clone)]
pub(crate) enum Route {
    Inherit,
    Null,
    Sinks(Vec<Sink>),
}

impl Route {
    /// Fold the combined sinks into a channel's own setting.
    ///
    /// Combined sinks take the channel over: it becomes piped, carrying its
    /// own sinks (if any) followed by the combined ones.
    pub(crate) fn resolve(own: &Output, combined: &[Sink]) -> Self {
        match (own, combined.is_empty()) {
            (Output::Inherit, true) => Self::Inherit,
            (Output::Null, true) => Self::Null,
            (Output::To(sinks), true) if sinks.is_empty() => Self::Null,
            (Output::To(sinks), _) => Self::Sinks(sinks.iter().chain(combined).cloned().collect()),
            (Output::Inherit | Output::Null, false) => Self::Sinks(combined.to_vec()),
        }
    }

    pub(crate) fn sinks(&self) -> &[Sink] {
        match self {
            Self::Sinks(sinks) => sinks,
            Self::Inherit | Self::Null => &[],
        }
    }
}

/// Knobs of the stdio engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTuning {
    /// Largest chunk read from a pipe or file at once.
    pub chunk_size: usize,
    /// Chunks buffered per tee branch before the slower side backpressures.
    pub tee_capacity: usize,
    /// Signal sent when the grace period expires.
    pub polite_signal: Signal,
    /// Signal sent when the force delay expires.
    pub forceful_signal: Signal,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            chunk_size: 8 * 1024,
            tee_capacity: 16,
            polite_signal: Signal::Interrupt,
            forceful_signal: Signal::Kill,
        }
    }
}

/// Everything needed to run one command.
#[derive(Debug, Default)]
pub struct RunConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Working directory; also the base for relative file paths.
    pub cwd: Option<PathBuf>,
    /// Environment overrides on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Stdin setting.
    pub stdin: StdinSetting,
    /// Stdout routing.
    pub stdout: Output,
    /// Stderr routing.
    pub stderr: Output,
    /// Sinks that receive stdout and stderr interleaved.
    pub combined: Vec<Sink>,
    /// Optional timeout.
    pub timeout: Option<TimeoutPolicy>,
    /// Turn an unsuccessful exit into an error.
    pub fail_loudly: bool,
    /// Engine knobs.
    pub tuning: EngineTuning,
    /// Where lifecycle events are published.
    pub events: EventBus,
}

impl RunConfig {
    /// Configure a run of `command`.
    #[must_use]
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the stdin setting.
    #[must_use]
    pub fn with_stdin(mut self, stdin: StdinSetting) -> Self {
        self.stdin = stdin;
        self
    }

    /// Feed stdin from `input`.
    #[must_use]
    pub fn with_input(self, input: Input) -> Self {
        self.with_stdin(StdinSetting::Feed(input))
    }

    /// Route stdout.
    #[must_use]
    pub fn with_stdout(mut self, output: Output) -> Self {
        self.stdout = output;
        self
    }

    /// Route stderr.
    #[must_use]
    pub fn with_stderr(mut self, output: Output) -> Self {
        self.stderr = output;
        self
    }

    /// Add a sink receiving both channels interleaved.
    #[must_use]
    pub fn with_combined(mut self, sink: Sink) -> Self {
        self.combined.push(sink);
        self
    }

    /// Set the timeout policy.
    #[must_use]
    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fail with the outcome attached when the child exits unsuccessfully.
    #[must_use]
    pub fn with_fail_loudly(mut self, fail_loudly: bool) -> Self {
        self.fail_loudly = fail_loudly;
        self
    }

    /// Override the engine knobs.
    #[must_use]
    pub fn with_tuning(mut self, tuning: EngineTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Publish lifecycle events on `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Check the parts of the configuration that can be checked before spawn.
    pub async fn validate(&self) -> SluiceResult<()> {
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(SluiceError::Config {
                message: "command must name a program".to_string(),
            });
        }
        if let Some(cwd) = &self.cwd {
            let is_dir = tokio::fs::metadata(cwd).await.is_ok_and(|m| m.is_dir());
            if !is_dir {
                return Err(SluiceError::InvalidCwd {
                    command: self.command.clone(),
                    path: cwd.clone(),
                });
            }
        }
        Ok(())
    }

    /// The working directory, if one was set.
    #[must_use]
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_config() {
        let config = RunConfig::new(["true"]);
        assert!(matches!(config.stdin, StdinSetting::Inherit));
        assert!(matches!(config.stdout, Output::Inherit));
        assert!(config.timeout.is_none());
        assert!(!config.fail_loudly);
        assert_eq!(config.tuning.chunk_size, 8192);
        assert_eq!(config.tuning.polite_signal, Signal::Interrupt);
        assert_eq!(config.tuning.forceful_signal, Signal::Kill);
    }

    #[test]
    fn builder_pattern() {
        let config = RunConfig::new(["sh", "-c", "exit 0"])
            .with_cwd("/tmp")
            .with_env("A", "1")
            .with_stdout(Output::To(vec![Sink::Capture]))
            .with_timeout(TimeoutPolicy::new(Duration::from_secs(1), Duration::from_secs(2)))
            .with_fail_loudly(true);

        assert_eq!(config.command, ["sh", "-c", "exit 0"]);
        assert_eq!(config.cwd(), Some(Path::new("/tmp")));
        assert_eq!(config.env.get("A").map(String::as_str), Some("1"));
        assert!(config.fail_loudly);
        assert!(config.timeout.is_some());
    }

    #[test]
    fn routes_fold_in_combined_sinks() {
        let file = Sink::overwrite("log");
        assert!(matches!(Route::resolve(&Output::Inherit, &[]), Route::Inherit));
        assert!(matches!(Route::resolve(&Output::Null, &[]), Route::Null));
        assert!(matches!(Route::resolve(&Output::To(vec![]), &[]), Route::Null));

        let route = Route::resolve(&Output::To(vec![Sink::Capture]), &[file.clone()]);
        let keys: Vec<_> = route.sinks().iter().map(Sink::key).collect();
        assert_eq!(keys, [Sink::Capture.key(), file.key()]);

        let route = Route::resolve(&Output::Inherit, &[file.clone()]);
        assert_eq!(route.sinks().len(), 1);
    }

    #[tokio::test]
    async fn validate_rejects_bad_cwd_and_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, "").unwrap();

        let err = RunConfig::new(["true"]).with_cwd(&file).validate().await.unwrap_err();
        assert!(matches!(err, SluiceError::InvalidCwd { .. }));
        let err = RunConfig::new(["true"])
            .with_cwd(dir.path().join("missing"))
            .validate()
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::InvalidCwd { .. }));
        let err = RunConfig::default().validate().await.unwrap_err();
        assert!(matches!(err, SluiceError::Config { .. }));

        RunConfig::new(["true"]).with_cwd(dir.path()).validate().await.unwrap();
    }
}
