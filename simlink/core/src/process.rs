//! Simulation Process Supervision
//!
//! Launches the simulation executable and owns its handle. At most one
//! instance is alive per session. Stopping is cooperative: the session sends
//! a terminate request over the socket first, then the supervisor waits for
//! the process to exit on its own (optionally with a deadline, after which it
//! is killed).
//!
//! The [`SimulationProcess`] trait is the seam the session drives, so tests
//! can stand in a fake simulator for the real executable.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wait_timeout::ChildExt;

/// Flag that precedes the payload path on the command line
pub const PAYLOAD_FLAG: &str = "--main-pack";

/// Flags appended when rendering is disabled
pub const HEADLESS_FLAGS: [&str; 2] = ["--disable-render-loop", "--no-window"];

/// Process supervision errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable could not be started
    #[error("failed to launch `{command}`: {reason}")]
    Launch {
        /// Command line that was attempted
        command: String,
        /// Why the launch failed
        reason: String,
    },

    /// Waiting for the process to exit failed
    #[error("failed to wait for simulation process: {0}")]
    Wait(#[source] std::io::Error),

    /// Killing an unresponsive process failed
    #[error("failed to kill simulation process: {0}")]
    Kill(#[source] std::io::Error),
}

/// Lifecycle of one simulation instance, as seen by the session
pub trait SimulationProcess {
    /// Start the simulation unless one is already running
    ///
    /// A no-op when an instance is alive, whatever its render mode; the
    /// session tears the old one down first when the mode changes.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Launch`] if the process cannot be started.
    fn ensure_running(&mut self, render: bool) -> Result<(), ProcessError>;

    /// Whether a process handle is currently owned
    fn is_launched(&self) -> bool;

    /// Wait, without bound, for a process told to stop to exit
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Wait`] if waiting fails.
    fn terminate(&mut self) -> Result<(), ProcessError>;

    /// Wait up to `timeout` for the process to exit, then kill it
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Wait`] or [`ProcessError::Kill`].
    fn terminate_within(&mut self, timeout: Duration) -> Result<(), ProcessError>;
}

/// How to start the simulation executable
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Simulation executable
    pub executable: PathBuf,
    /// Packaged environment loaded by the executable
    pub payload: PathBuf,
    /// Extra arguments appended after the standard ones
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl LaunchSpec {
    /// Create a launch spec with no extra arguments
    pub fn new(executable: impl Into<PathBuf>, payload: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            payload: payload.into(),
            extra_args: Vec::new(),
        }
    }

    /// Append extra arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Arguments passed to the executable
    #[must_use]
    pub fn args(&self, render: bool) -> Vec<OsString> {
        let mut args = vec![OsString::from(PAYLOAD_FLAG), self.payload.clone().into_os_string()];
        if !render {
            args.extend(HEADLESS_FLAGS.iter().copied().map(OsString::from));
        }
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }

    /// Human-readable command line, for logs and errors
    ///
    /// The process is spawned directly with an argument vector, never via a
    /// shell, so this string is never executed.
    #[must_use]
    pub fn command_line(&self, render: bool) -> String {
        std::iter::once(self.executable.as_os_str().to_os_string())
            .chain(self.args(render))
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn check_executable(&self, command: &str) -> Result<(), ProcessError> {
        // Bare names are resolved through PATH by the OS at spawn time
        let has_dir = self.executable.components().count() > 1;
        if has_dir && !self.executable.exists() {
            return Err(ProcessError::Launch {
                command: command.to_string(),
                reason: format!("executable not found: {}", self.executable.display()),
            });
        }
        Ok(())
    }
}

/// Supervisor for a real simulation executable
#[derive(Debug)]
pub struct ProcessSupervisor {
    spec: LaunchSpec,
    child: Option<Child>,
    render: Option<bool>,
}

impl ProcessSupervisor {
    /// Create a supervisor; nothing is launched yet
    #[must_use]
    pub fn new(spec: LaunchSpec) -> Self {
        Self {
            spec,
            child: None,
            render: None,
        }
    }

    /// The launch spec
    #[must_use]
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Path of the executable
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.spec.executable
    }

    /// OS process id of the running instance
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Render mode the running instance was launched with
    #[must_use]
    pub fn render_mode(&self) -> Option<bool> {
        self.child.as_ref().and(self.render)
    }

    /// Exit status if the process has already exited, without blocking
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Wait`] if the status cannot be queried.
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
        match self.child.as_mut() {
            Some(child) => child.try_wait().map_err(ProcessError::Wait),
            None => Ok(None),
        }
    }

    /// Whether an owned process is still alive
    ///
    /// Unlike [`SimulationProcess::is_launched`] this polls the OS, so a
    /// simulation that crashed is observed.
    pub fn is_running(&mut self) -> bool {
        self.child.is_some() && matches!(self.try_status(), Ok(None))
    }

    fn reap(child: &mut Child) -> Result<ExitStatus, ProcessError> {
        let status = child.wait().map_err(ProcessError::Wait)?;
        tracing::info!(pid = child.id(), %status, "Simulation exited");
        Ok(status)
    }
}

impl SimulationProcess for ProcessSupervisor {
    fn ensure_running(&mut self, render: bool) -> Result<(), ProcessError> {
        if let Some(child) = &self.child {
            tracing::debug!(pid = child.id(), "Simulation already running");
            return Ok(());
        }

        let command = self.spec.command_line(render);
        self.spec.check_executable(&command)?;

        let child = Command::new(&self.spec.executable)
            .args(self.spec.args(render))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| ProcessError::Launch {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(pid = child.id(), %command, render, "Simulation launched");
        self.child = Some(child);
        self.render = Some(render);
        Ok(())
    }

    fn is_launched(&self) -> bool {
        self.child.is_some()
    }

    fn terminate(&mut self) -> Result<(), ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        self.render = None;
        Self::reap(&mut child).map(|_| ())
    }

    fn terminate_within(&mut self, timeout: Duration) -> Result<(), ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        self.render = None;

        match child.wait_timeout(timeout).map_err(ProcessError::Wait)? {
            Some(status) => {
                tracing::info!(pid = child.id(), %status, "Simulation exited");
                Ok(())
            }
            None => {
                tracing::warn!(
                    pid = child.id(),
                    timeout_ms = timeout.as_millis(),
                    "Simulation did not exit in time, killing"
                );
                child.kill().map_err(ProcessError::Kill)?;
                Self::reap(&mut child).map(|_| ())
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(None) = child.try_wait() {
            tracing::warn!(pid = child.id(), "Killing simulation left running at drop");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
