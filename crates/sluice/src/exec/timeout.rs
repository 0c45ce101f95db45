//! Timeout supervision: a polite signal after the grace period, then force.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sluice_common::{Escalation, SluiceError, SluiceResult};
use tokio::sync::watch;

use super::process::ProcessControl;
use super::signal::Signal;

/// How long to wait after the polite signal before using force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceDelay {
    /// Send the forceful signal after this long.
    After(Duration),
    /// Never use force.
    Never,
}

/// When to stop a child that runs too long.
///
/// The polite signal goes out `grace` after spawn. If the child is still
/// running `force` later, the forceful signal follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Time from spawn to the polite signal.
    pub grace: Duration,
    /// Time from the polite signal to the forceful one.
    pub force: ForceDelay,
}

impl TimeoutPolicy {
    /// Polite signal after `grace`, force `force` later.
    #[must_use]
    pub const fn new(grace: Duration, force: Duration) -> Self {
        Self {
            grace,
            force: ForceDelay::After(force),
        }
    }

    /// Polite signal after `grace` and nothing more.
    #[must_use]
    pub const fn never_force(grace: Duration) -> Self {
        Self {
            grace,
            force: ForceDelay::Never,
        }
    }

    /// Build a policy from loosely typed millisecond values.
    ///
    /// Both values absent means no timeout. An infinite force delay means
    /// never use force.
    pub fn from_millis(
        command: &[String],
        grace_ms: Option<f64>,
        force_ms: Option<f64>,
    ) -> SluiceResult<Option<Self>> {
        let invalid = |message: String| SluiceError::InvalidTimeout {
            command: command.to_vec(),
            message,
        };

        let (grace_ms, force_ms) = match (grace_ms, force_ms) {
            (None, None) => return Ok(None),
            (Some(grace), Some(force)) => (grace, force),
            (Some(_), None) => return Err(invalid("grace period given without a force delay".into())),
            (None, Some(_)) => return Err(invalid("force delay given without a grace period".into())),
        };

        if grace_ms.is_infinite() {
            return Err(invalid("grace period must be finite".into()));
        }
        let grace = millis(grace_ms).map_err(|m| invalid(format!("grace period {m}")))?;

        let force = if force_ms == f64::INFINITY {
            ForceDelay::Never
        } else {
            ForceDelay::After(millis(force_ms).map_err(|m| invalid(format!("force delay {m}")))?)
        };

        Ok(Some(Self { grace, force }))
    }
}

fn millis(ms: f64) -> Result<Duration, String> {
    if ms.is_nan() {
        return Err("is not a number".to_string());
    }
    if ms < 0.0 {
        return Err(format!("is negative ({ms}ms)"));
    }
    Duration::try_from_secs_f64(ms / 1000.0).map_err(|e| format!("is out of range: {e}"))
}

/// Where the supervisor is in its escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Grace period running.
    Running,
    /// Polite signal sent, waiting out the force delay.
    GracePeriodExpired,
    /// The child exited; no more signals.
    Terminated,
    /// Forceful signal sent.
    ForceKilled,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::GracePeriodExpired => write!(f, "grace-period-expired"),
            Self::Terminated => write!(f, "terminated"),
            Self::ForceKilled => write!(f, "force-killed"),
        }
    }
}

/// Resolves once `exited` reads `true` or its sender is gone.
///
/// Yields `()` so no `watch::Ref` outlives the wait.
async fn child_exit(exited: &mut watch::Receiver<bool>) {
    let _ = exited.wait_for(|done| *done).await;
}

/// Escalates signals against one child according to a [`TimeoutPolicy`].
pub struct Supervisor {
    policy: TimeoutPolicy,
    control: Arc<dyn ProcessControl>,
    polite: Signal,
    forceful: Signal,
    state: SupervisorState,
}

impl Supervisor {
    /// Supervise `control`, escalating from `polite` to `forceful`.
    pub fn new(
        policy: TimeoutPolicy,
        control: Arc<dyn ProcessControl>,
        polite: Signal,
        forceful: Signal,
    ) -> Self {
        Self {
            policy,
            control,
            polite,
            forceful,
            state: SupervisorState::Running,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SupervisorState {
        self.state
    }

    /// Run until the child exits or escalation is complete.
    ///
    /// The clock starts when this is first polled, which the caller arranges
    /// to be right after spawn. `exited` flips to `true` when the child has
    /// been reaped; a dropped sender counts as exited too.
    pub async fn run(mut self, mut exited: watch::Receiver<bool>) -> Escalation {
        let pid = self.control.pid();

        tokio::select! {
            biased;
            () = child_exit(&mut exited) => {
                self.transition(SupervisorState::Terminated);
                return Escalation::NotNeeded;
            }
            () = tokio::time::sleep(self.policy.grace) => {}
        }

        tracing::info!(pid, signal = %self.polite, grace = ?self.policy.grace, "Grace period expired");
        self.send(self.polite).await;
        self.transition(SupervisorState::GracePeriodExpired);

        let ForceDelay::After(delay) = self.policy.force else {
            return Escalation::Polite;
        };

        tokio::select! {
            biased;
            () = child_exit(&mut exited) => {
                self.transition(SupervisorState::Terminated);
                Escalation::Polite
            }
            () = tokio::time::sleep(delay) => {
                tracing::info!(pid, signal = %self.forceful, "Child ignored polite signal, using force");
                self.send(self.forceful).await;
                self.transition(SupervisorState::ForceKilled);
                Escalation::Forced
            }
        }
    }

    async fn send(&self, signal: Signal) {
        if let Err(e) = self.control.signal(signal).await {
            tracing::warn!(pid = self.control.pid(), %signal, error = %e, "Failed to deliver signal");
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        tracing::debug!(pid = self.control.pid(), from = %self.state, to = %next, "Supervisor state change");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    struct Recorder {
        started: Instant,
        sent: Mutex<Vec<(Signal, Duration)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: Instant::now(),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(Signal, Duration)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl ProcessControl for Recorder {
        fn pid(&self) -> u32 {
            4242
        }

        async fn signal(&self, signal: Signal) -> SluiceResult<()> {
            self.sent.lock().push((signal, self.started.elapsed()));
            Ok(())
        }
    }

    fn supervisor(policy: TimeoutPolicy, control: Arc<Recorder>) -> Supervisor {
        Supervisor::new(policy, control, Signal::Interrupt, Signal::Kill)
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_child_is_force_killed_after_both_delays() {
        let control = Recorder::new();
        let (_tx, rx) = watch::channel(false);
        let policy = TimeoutPolicy::new(Duration::from_millis(100), Duration::from_millis(200));

        let escalation = supervisor(policy, control.clone()).run(rx).await;

        assert_eq!(escalation, Escalation::Forced);
        let sent = control.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, Signal::Interrupt);
        assert!(sent[0].1 >= Duration::from_millis(100));
        assert_eq!(sent[1].0, Signal::Kill);
        assert!(sent[1].1 >= Duration::from_millis(300));
        assert!(sent[1].1 < Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_runs_on_a_spawned_task() {
        let control = Recorder::new();
        let (tx, rx) = watch::channel(false);
        let policy = TimeoutPolicy::new(Duration::from_millis(100), Duration::from_millis(200));

        let handle = tokio::spawn(supervisor(policy, control.clone()).run(rx));
        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), Escalation::Polite);
        assert_eq!(control.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quick_exit_gets_no_signal() {
        let control = Recorder::new();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });
        let policy = TimeoutPolicy::new(Duration::from_millis(100), Duration::from_millis(200));

        let escalation = supervisor(policy, control.clone()).run(rx).await;

        assert_eq!(escalation, Escalation::NotNeeded);
        assert!(control.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exit_after_polite_signal_stops_escalation() {
        let control = Recorder::new();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = tx.send(true);
        });
        let policy = TimeoutPolicy::new(Duration::from_millis(100), Duration::from_millis(200));

        let escalation = supervisor(policy, control.clone()).run(rx).await;

        assert_eq!(escalation, Escalation::Polite);
        assert_eq!(control.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn infinite_force_delay_never_kills() {
        let control = Recorder::new();
        let (_tx, rx) = watch::channel(false);
        let policy = TimeoutPolicy::never_force(Duration::from_millis(10));

        let escalation = supervisor(policy, control.clone()).run(rx).await;

        assert_eq!(escalation, Escalation::Polite);
        assert_eq!(control.sent().iter().map(|(s, _)| *s).collect::<Vec<_>>(), [Signal::Interrupt]);
    }

    #[test]
    fn from_millis_validates() {
        let cmd = vec!["sleep".to_string()];
        assert_eq!(TimeoutPolicy::from_millis(&cmd, None, None).unwrap(), None);
        assert_eq!(
            TimeoutPolicy::from_millis(&cmd, Some(1000.0), Some(500.0)).unwrap(),
            Some(TimeoutPolicy::new(Duration::from_secs(1), Duration::from_millis(500)))
        );
        assert_eq!(
            TimeoutPolicy::from_millis(&cmd, Some(10.0), Some(f64::INFINITY)).unwrap(),
            Some(TimeoutPolicy::never_force(Duration::from_millis(10)))
        );

        for (grace, force) in [
            (Some(100.0), None),
            (None, Some(100.0)),
            (Some(-1.0), Some(100.0)),
            (Some(100.0), Some(-5.0)),
            (Some(f64::NAN), Some(100.0)),
            (Some(f64::INFINITY), Some(100.0)),
        ] {
            let err = TimeoutPolicy::from_millis(&cmd, grace, force).unwrap_err();
            assert!(matches!(err, SluiceError::InvalidTimeout { .. }), "{grace:?}/{force:?}");
        }
    }
}
