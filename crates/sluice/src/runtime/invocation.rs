//! Running a command: setup, the driver task, and the handle callers hold.
#![allow(unsafe_code)]

use std::future::{Future, IntoFuture};
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use sluice_common::{ExitOutcome, Outcome, SluiceError, SluiceResult};
use tokio::io::AsyncWriteExt;
use parking_lot::Mutex as SyncMutex;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::exec::process::{ChildStdio, ProcessControl, spawn_process, wait_exited};
use crate::exec::signal::Signal;
use crate::exec::timeout::Supervisor;
use crate::stdio::{
    Delivery, DeliveryReport, DemandMap, Feed, combine, fan_out, reader_stream, wire,
};

use super::config::{Route, RunConfig, StdinSetting};
use super::events::EventBus;
use super::state::{StatusCell, StatusSnapshot};

/// Signals a spawned child by pid.
///
/// Once the child has been reaped, signalling is a no-op so a recycled pid
/// is never hit. Reaping and signalling take the same lock.
#[derive(Debug)]
pub struct ChildControl {
    pid: u32,
    reaped: Arc<SyncMutex<bool>>,
    events: EventBus,
}

impl ChildControl {
    /// Deliver `signal` unless the child is already gone. Returns whether
    /// it was sent.
    fn deliver(&self, signal: Signal) -> SluiceResult<bool> {
        let pid = libc::pid_t::try_from(self.pid).map_err(|_| SluiceError::Internal {
            message: format!("pid {} out of range", self.pid),
        })?;

        let reaped = self.reaped.lock();
        if *reaped {
            tracing::debug!(pid, %signal, "Child already reaped, not signalling");
            return Ok(false);
        }

        tracing::debug!(pid, %signal, "Sending signal to child");

        // SAFETY: kill(2) takes plain integers and touches no memory of ours.
        if unsafe { libc::kill(pid, signal.as_raw()) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(false);
            }
            return Err(SluiceError::Process {
                message: format!("Failed to send {signal} to {pid}: {err}"),
            });
        }
        Ok(true)
    }
}

#[async_trait]
impl ProcessControl for ChildControl {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn signal(&self, signal: Signal) -> SluiceResult<()> {
        if self.deliver(signal)? {
            self.events.signal_sent(self.pid, signal);
        }
        Ok(())
    }
}

/// Writes to a child's stdin when it was configured as open.
///
/// Clones share the pipe. Closing it from any clone closes it for all.
#[derive(Debug, Clone)]
pub struct InputWriter {
    pid: u32,
    pipe: Arc<Mutex<Option<ChildStdin>>>,
}

impl InputWriter {
    fn new(pid: u32, stdin: Option<ChildStdin>) -> Self {
        Self {
            pid,
            pipe: Arc::new(Mutex::new(stdin)),
        }
    }

    /// Write `data` to the child's stdin.
    pub async fn send(&self, data: impl AsRef<[u8]>) -> SluiceResult<()> {
        let mut pipe = self.pipe.lock().await;
        let stdin = pipe.as_mut().ok_or(SluiceError::StdinClosed { pid: self.pid })?;
        stdin.write_all(data.as_ref()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close the child's stdin so it sees end of file. Closing twice is fine.
    pub async fn close(&self) -> SluiceResult<()> {
        if let Some(mut stdin) = self.pipe.lock().await.take() {
            stdin.shutdown().await?;
            tracing::debug!(pid = self.pid, "Closed child stdin");
        }
        Ok(())
    }

    /// Whether writes can still go through.
    pub async fn is_open(&self) -> bool {
        self.pipe.lock().await.is_some()
    }
}

#[derive(Debug, Clone)]
enum Completion {
    Finished(Outcome),
    Failed(String),
}

type ExitSlot = Option<Result<ExitOutcome, String>>;

/// Handle to a running (or finished) command.
///
/// Every accessor can be awaited any number of times. The exit accessors
/// resolve once the child is reaped; the rest also wait for every sink to
/// finish.
#[derive(Debug)]
pub struct Invocation {
    pid: u32,
    stdin: InputWriter,
    control: Arc<ChildControl>,
    status: StatusCell,
    exit: watch::Receiver<ExitSlot>,
    done: watch::Receiver<Option<Completion>>,
    fail_loudly: bool,
}

impl Invocation {
    /// Process id of the child.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Writer for the child's stdin. Closed unless stdin was configured open.
    #[must_use]
    pub fn stdin(&self) -> InputWriter {
        self.stdin.clone()
    }

    /// Status as of now, without waiting.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Whether the child has exited.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status.snapshot().done
    }

    /// Send `signal` to the child.
    pub async fn signal(&self, signal: Signal) -> SluiceResult<()> {
        self.control.signal(signal).await
    }

    /// The finished record, whatever the exit status.
    pub async fn finished(&self) -> SluiceResult<Outcome> {
        let mut done = self.done.clone();
        let completion = done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SluiceError::Internal {
                message: format!("driver for process {} ended without a result", self.pid),
            })?
            .clone();
        match completion {
            Some(Completion::Finished(outcome)) => Ok(outcome),
            Some(Completion::Failed(message)) => Err(SluiceError::Process { message }),
            None => Err(SluiceError::Internal {
                message: "completion observed empty".to_string(),
            }),
        }
    }

    /// The finished record; an unsuccessful exit is an error when the run
    /// was configured to fail loudly.
    pub async fn outcome(&self) -> SluiceResult<Outcome> {
        let outcome = self.finished().await?;
        if self.fail_loudly && !outcome.success() {
            return Err(SluiceError::NonZeroExit {
                outcome: Box::new(outcome),
            });
        }
        Ok(outcome)
    }

    /// How the child ended. Does not wait for output delivery.
    pub async fn exit(&self) -> SluiceResult<ExitOutcome> {
        let mut exit = self.exit.clone();
        let slot = exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SluiceError::Internal {
                message: format!("driver for process {} ended without an exit status", self.pid),
            })?
            .clone();
        match slot {
            Some(Ok(exit)) => Ok(exit),
            Some(Err(message)) => Err(SluiceError::Process { message }),
            None => Err(SluiceError::Internal {
                message: "exit status observed empty".to_string(),
            }),
        }
    }

    /// Whether the child exited successfully.
    pub async fn success(&self) -> SluiceResult<bool> {
        Ok(self.exit().await?.success)
    }

    /// The child's exit code.
    pub async fn exit_code(&self) -> SluiceResult<i32> {
        Ok(self.exit().await?.code)
    }

    /// Text collected by the capture sink, if one was configured.
    pub async fn captured(&self) -> SluiceResult<Option<String>> {
        Ok(self.finished().await?.captured.map(|c| c.text))
    }
}

impl IntoFuture for Invocation {
    type Output = SluiceResult<Outcome>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.outcome().await })
    }
}

/// Start `config.command` and return a handle to it.
///
/// Everything that can fail before the child exists (configuration, input
/// sources, output files, the spawn itself) fails here.
pub async fn run(config: RunConfig) -> SluiceResult<Invocation> {
    config.validate().await?;
    let cwd = config.cwd.clone();
    let cwd = cwd.as_deref();
    let tuning = config.tuning;

    let (stdin_stdio, feed, open_stdin) = match config.stdin {
        StdinSetting::Inherit => (Stdio::inherit(), None, false),
        StdinSetting::Null => (Stdio::null(), None, false),
        StdinSetting::Open => (Stdio::piped(), None, true),
        StdinSetting::Feed(input) => match combine(input, cwd, tuning.chunk_size).await? {
            Feed::Null => (Stdio::null(), None, false),
            feed => (Stdio::piped(), Some(feed), false),
        },
    };

    let stdout_route = Route::resolve(&config.stdout, &config.combined);
    let stderr_route = Route::resolve(&config.stderr, &config.combined);
    let demand = DemandMap::build_in(
        stdout_route.sinks().to_vec(),
        stderr_route.sinks().to_vec(),
        cwd,
    );
    let (stdout_count, stderr_count) = (demand.primary_count(), demand.secondary_count());

    let mut entries = Vec::with_capacity(demand.len());
    for (sink, want) in demand.into_entries() {
        entries.push((sink.open(cwd).await?, want));
    }

    let stdio = ChildStdio {
        stdin: stdin_stdio,
        stdout: stdio_for(&stdout_route),
        stderr: stdio_for(&stderr_route),
    };
    let mut child = spawn_process(&config.command, &config.env, cwd, stdio)?;
    let pid = child.id().ok_or_else(|| SluiceError::Process {
        message: "child exited before its pid could be read".to_string(),
    })?;

    tracing::info!(pid, command = ?config.command, "Spawned child");
    config.events.spawned(pid, &config.command);

    let span = tracing::info_span!("invocation", pid);

    let piped_stdin = child.stdin.take();
    let (writer_pipe, feeder) = match (feed, piped_stdin) {
        (Some(feed), Some(stdin)) => {
            let task = tokio::spawn(feed_stdin(pid, stdin, feed).instrument(span.clone()));
            (None, Some(task))
        }
        (_, stdin) if open_stdin => (stdin, None),
        _ => (None, None),
    };

    let stdout_leaves = match child.stdout.take() {
        Some(pipe) => fan_out(reader_stream(pipe, tuning.chunk_size), stdout_count, tuning.tee_capacity),
        None => Vec::new(),
    };
    let stderr_leaves = match child.stderr.take() {
        Some(pipe) => fan_out(reader_stream(pipe, tuning.chunk_size), stderr_count, tuning.tee_capacity),
        None => Vec::new(),
    };
    let branches = wire(entries, stdout_leaves, stderr_leaves)?;

    let reaped = Arc::new(SyncMutex::new(false));
    let control = Arc::new(ChildControl {
        pid,
        reaped: reaped.clone(),
        events: config.events.clone(),
    });

    let (exited_tx, exited_rx) = watch::channel(false);
    let supervisor = config.timeout.map(|policy| {
        let supervisor = Supervisor::new(
            policy,
            control.clone(),
            tuning.polite_signal,
            tuning.forceful_signal,
        );
        tokio::spawn(supervisor.run(exited_rx).instrument(span.clone()))
    });

    let status = StatusCell::default();
    let (exit_tx, exit_rx) = watch::channel(None);
    let (done_tx, done_rx) = watch::channel(None);
    let driver = Driver {
        command: config.command,
        pid,
        reaped,
        exited_tx,
        exit_tx,
        feeder,
        branches,
        supervisor,
        status: status.clone(),
        events: config.events,
    };
    tokio::spawn(
        async move {
            let completion = match driver.drive(child).await {
                Ok(outcome) => Completion::Finished(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Invocation failed");
                    Completion::Failed(e.to_string())
                }
            };
            let _ = done_tx.send(Some(completion));
        }
        .instrument(span),
    );

    Ok(Invocation {
        pid,
        stdin: InputWriter::new(pid, writer_pipe),
        control,
        status,
        exit: exit_rx,
        done: done_rx,
        fail_loudly: config.fail_loudly,
    })
}

fn stdio_for(route: &Route) -> Stdio {
    match route {
        Route::Inherit => Stdio::inherit(),
        Route::Null => Stdio::null(),
        Route::Sinks(_) => Stdio::piped(),
    }
}

async fn feed_stdin(pid: u32, mut stdin: ChildStdin, feed: Feed) {
    tracing::debug!(pid, ?feed, "Feeding stdin");
    let written = match feed {
        Feed::Null => Ok(()),
        Feed::Buffer(bytes) => stdin.write_all(&bytes).await,
        Feed::Stream(mut stream) => {
            let mut result = Ok(());
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        if let Err(e) = stdin.write_all(&chunk).await {
                            result = Err(e);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(pid, error = %e, "Stdin source failed, closing stdin");
                        break;
                    }
                }
            }
            result
        }
    };

    match written {
        Ok(()) => {
            let _ = stdin.shutdown().await;
            tracing::debug!(pid, "Stdin feed complete");
        }
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            tracing::debug!(pid, "Child closed stdin before the feed ended");
        }
        Err(e) => tracing::warn!(pid, error = %e, "Writing to child stdin failed"),
    }
}

struct Driver {
    command: Vec<String>,
    pid: u32,
    reaped: Arc<SyncMutex<bool>>,
    exited_tx: watch::Sender<bool>,
    exit_tx: watch::Sender<ExitSlot>,
    feeder: Option<JoinHandle<()>>,
    branches: Vec<JoinHandle<Delivery>>,
    supervisor: Option<JoinHandle<sluice_common::Escalation>>,
    status: StatusCell,
    events: EventBus,
}

impl Driver {
    async fn drive(self, mut child: Child) -> SluiceResult<Outcome> {
        let waited = self.reap(&mut child).await;
        let _ = self.exited_tx.send(true);

        let status = match waited {
            Ok(status) => status,
            Err(e) => {
                let message = format!("waiting for process {} failed: {e}", self.pid);
                self.status.record_failure();
                let _ = self.exit_tx.send(Some(Err(message.clone())));
                return Err(SluiceError::Process { message });
            }
        };
        let exit = ExitOutcome::from_status(status);
        tracing::info!(pid = self.pid, code = exit.code, signal = ?exit.signal, "Child exited");
        self.status.record_exit(&exit);
        self.events.exited(self.pid, exit.code);
        let _ = self.exit_tx.send(Some(Ok(exit)));

        // Nothing reads stdin any more; a source that never ends must not hold the run open.
        if let Some(feeder) = self.feeder {
            feeder.abort();
        }

        let report = DeliveryReport::collect(self.branches).await;
        let escalation = match self.supervisor {
            Some(handle) => handle.await.ok(),
            None => None,
        };

        let outcome = Outcome {
            command: self.command,
            pid: self.pid,
            exit,
            captured: report.captured,
            escalation,
            sink_failures: report.failures,
        };
        Ok(outcome)
    }

    /// Wait for the child to exit, then reap it under the lock signalling
    /// takes.
    async fn reap(&self, child: &mut Child) -> io::Result<ExitStatus> {
        match wait_exited(self.pid).await {
            Ok(()) => {
                let mut reaped = self.reaped.lock();
                if let Some(status) = child.try_wait()? {
                    *reaped = true;
                    return Ok(status);
                }
            }
            Err(e) => {
                tracing::debug!(pid = self.pid, error = %e, "Cannot wait without reaping, reaping directly");
            }
        }
        let status = child.wait().await;
        *self.reaped.lock() = true;
        status
    }
}
