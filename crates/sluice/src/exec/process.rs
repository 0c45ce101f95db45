//! Spawning the child and controlling it afterwards.
#![allow(unsafe_code)]

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use sluice_common::{SluiceError, SluiceResult};
use tokio::process::{Child, Command};

use super::signal::Signal;

/// How the child's three standard streams are wired.
#[derive(Debug)]
pub struct ChildStdio {
    /// The child's stdin.
    pub stdin: Stdio,
    /// The child's stdout.
    pub stdout: Stdio,
    /// The child's stderr.
    pub stderr: Stdio,
}

impl Default for ChildStdio {
    fn default() -> Self {
        Self {
            stdin: Stdio::inherit(),
            stdout: Stdio::inherit(),
            stderr: Stdio::inherit(),
        }
    }
}

/// Spawn `command` with the given environment overrides and working directory.
///
/// The child keeps running if the returned handle is dropped.
pub fn spawn_process(
    command: &[String],
    env: &BTreeMap<String, String>,
    cwd: Option<&Path>,
    stdio: ChildStdio,
) -> SluiceResult<Child> {
    let Some((program, args)) = command.split_first() else {
        return Err(SluiceError::Config {
            message: "command must name a program".to_string(),
        });
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(env)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr)
        .kill_on_drop(false);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    tracing::debug!(?command, "Spawning process");

    cmd.spawn().map_err(|source| SluiceError::Spawn {
        command: command.to_vec(),
        source,
    })
}

/// Wait until process `pid` has exited, without reaping it.
///
/// The exited child stays a zombie, so its pid cannot be reused until the
/// caller reaps it.
pub async fn wait_exited(pid: u32) -> io::Result<()> {
    let id = libc::id_t::from(pid);
    tokio::task::spawn_blocking(move || loop {
        // SAFETY: siginfo_t is plain old data, all zeroes is a valid value.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: `info` is a valid, exclusively borrowed siginfo_t for the call.
        let rc = unsafe { libc::waitid(libc::P_PID, id, &mut info, libc::WEXITED | libc::WNOWAIT) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    })
    .await
    .map_err(io::Error::other)?
}

/// Something that can be signalled like a running child.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Process id of the child.
    fn pid(&self) -> u32;

    /// Deliver `signal`. Signalling a child that already exited is not an error.
    async fn signal(&self, signal: Signal) -> SluiceResult<()>;
}
