//! Start/stop capability for slots and the proxy.
//!
//! The orchestrator never fires and forgets: every call resolves once the
//! underlying process has exited, with its output captured.

use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::ExitStatus;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => f.write_str("start"),
            Action::Stop => f.write_str("stop"),
        }
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Code(i32),
    /// Terminated by a signal (unix only).
    Signal(i32),
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitKind::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitKind::Signal(signal);
            }
        }
        ExitKind::Code(-1)
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Code(code) => write!(f, "exit code {code}"),
            ExitKind::Signal(sig) => write!(f, "signal {sig}"),
        }
    }
}

/// Captured result of one start/stop call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub action: Action,
    pub component: String,
    pub exit: ExitKind,
    pub stdout: String,
    pub stderr: String,
}

impl Invocation {
    /// Forward captured output to the log.
    fn log_output(&self) {
        for line in self.stdout.lines().filter(|l| !l.trim().is_empty()) {
            info!(component = %self.component, action = %self.action, "{line}");
        }
        for line in self.stderr.lines().filter(|l| !l.trim().is_empty()) {
            warn!(component = %self.component, action = %self.action, "{line}");
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to launch {action} for {component}: {source}")]
    Spawn {
        action: Action,
        component: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{action} {component} failed with {exit}: {stderr}")]
    Failed {
        action: Action,
        component: String,
        exit: ExitKind,
        stderr: String,
    },
}

/// Starts and stops named runtime components (slots, the proxy).
#[async_trait]
pub trait SlotRuntime: Send + Sync {
    /// Bring `component` up in the background. Resolves once the runtime
    /// has acknowledged the request.
    async fn start(&self, component: &str) -> RuntimeResult<Invocation>;

    /// Stop `component`. Resolves once the runtime reports it stopped.
    async fn stop(&self, component: &str) -> RuntimeResult<Invocation>;
}

/// Whether an invocation counts as successful.
///
/// A stop that dies from SIGTERM (directly or as shell code 143) is what
/// stopping an already-stopping component looks like.
pub fn is_success(action: Action, exit: ExitKind) -> bool {
    match (action, exit) {
        (_, ExitKind::Code(0)) => true,
        (Action::Stop, ExitKind::Signal(sig)) => sig == libc::SIGTERM,
        (Action::Stop, ExitKind::Code(code)) => code == 128 + libc::SIGTERM,
        _ => false,
    }
}

/// `SlotRuntime` backed by `docker compose`.
///
/// Runs `<program> <base args> up -d <component>` and
/// `<program> <base args> stop <component>`.
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    program: OsString,
    base_args: Vec<OsString>,
}

impl ComposeRuntime {
    /// `docker compose -f <compose_file>`.
    pub fn docker(docker_bin: &str, compose_file: &Path) -> Self {
        Self::command(
            docker_bin,
            vec![
                OsString::from("compose"),
                OsString::from("-f"),
                compose_file.as_os_str().to_os_string(),
            ],
        )
    }

    /// Arbitrary program and leading arguments.
    pub fn command(program: impl Into<OsString>, base_args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    async fn invoke(&self, action: Action, component: &str) -> RuntimeResult<Invocation> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args);
        match action {
            Action::Start => cmd.args(["up", "-d"]),
            Action::Stop => cmd.arg("stop"),
        };
        cmd.arg(component);
        debug!(?cmd, "invoking runtime");

        let output = cmd.output().await.map_err(|source| RuntimeError::Spawn {
            action,
            component: component.to_string(),
            source,
        })?;

        let invocation = Invocation {
            action,
            component: component.to_string(),
            exit: ExitKind::from(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        invocation.log_output();

        if is_success(action, invocation.exit) {
            Ok(invocation)
        } else {
            Err(RuntimeError::Failed {
                action,
                component: invocation.component,
                exit: invocation.exit,
                stderr: invocation.stderr,
            })
        }
    }
}

#[async_trait]
impl SlotRuntime for ComposeRuntime {
    async fn start(&self, component: &str) -> RuntimeResult<Invocation> {
        self.invoke(Action::Start, component).await
    }

    async fn stop(&self, component: &str) -> RuntimeResult<Invocation> {
        self.invoke(Action::Stop, component).await
    }
}
