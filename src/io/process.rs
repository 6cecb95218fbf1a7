//! Process management layer
//!
//! Spawns the agent with piped stdio and reports its exit through a watch
//! channel. Stream handling and restart policy live with the caller; this
//! layer only launches, signals and reaps.

use crate::io::launch::LaunchPlan;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::watch;
#[cfg(not(unix))]
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};
#[cfg(not(unix))]
use tracing::warn;

// ============================================================================
// Exit and Signals
// ============================================================================

/// Signal sent while stopping a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Ask the process to exit (SIGTERM)
    Terminate,
    /// Force kill (SIGKILL)
    Kill,
}

/// How a child process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Reaped normally; `signal` is set when a signal terminated it
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Waiting on the child failed
    WaitFailed(String),
}

impl ProcessExit {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        ProcessExit::Exited {
            code: status.code(),
            signal,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ProcessExit::WaitFailed(_))
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn or_none(value: Option<i32>) -> String {
            value.map_or_else(|| "none".to_string(), |value| value.to_string())
        }

        match self {
            ProcessExit::Exited { code, signal } => write!(
                f,
                "exited:code={}:signal={}",
                or_none(*code),
                or_none(*signal)
            ),
            ProcessExit::WaitFailed(reason) => write!(f, "wait_failed:{reason}"),
        }
    }
}

/// Receiver side of a child's exit; `None` while it is alive
pub type ExitWatch = watch::Receiver<Option<ProcessExit>>;

/// Wait until the child has exited or `timeout` elapsed
pub async fn wait_for_exit(exit: &mut ExitWatch, timeout: Duration) -> Option<ProcessExit> {
    if tokio::time::timeout(timeout, exit.wait_for(Option::is_some))
        .await
        .is_err()
    {
        return None;
    }
    exit.borrow().clone()
}

// ============================================================================
// Process Management
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,

    #[error("Process signalling not supported on this platform")]
    Unsupported,
}

/// Delivers stop signals to one child
pub trait ProcessSignaller: Send + Sync {
    fn signal(&self, signal: StopSignal) -> Result<(), ProcessError>;
}

/// A launched child: its pipes, its exit watch and a way to signal it
pub struct AgentProcess {
    pub pid: Option<u32>,
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    pub exit: ExitWatch,
    pub signaller: Arc<dyn ProcessSignaller>,
}

impl fmt::Debug for AgentProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentProcess")
            .field("pid", &self.pid)
            .field("exit", &*self.exit.borrow())
            .finish_non_exhaustive()
    }
}

/// Seam between the supervisor and the operating system
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, plan: &LaunchPlan) -> Result<AgentProcess, ProcessError>;
}

/// Launches real child processes via `tokio::process::Command`
#[derive(Debug, Default, Clone)]
pub struct ChildProcessLauncher;

impl ChildProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Spawn the wait task that reaps the child and publishes its exit
    fn spawn_wait_task(
        mut child: Child,
        pid: Option<u32>,
        exit_sender: watch::Sender<Option<ProcessExit>>,
        #[cfg(not(unix))] mut kill_receiver: mpsc::UnboundedReceiver<()>,
    ) {
        tokio::spawn(async move {
            trace!("ChildProcessLauncher: Starting wait task for PID {:?}", pid);

            #[cfg(unix)]
            let status = child.wait().await;

            #[cfg(not(unix))]
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    Some(()) = kill_receiver.recv() => {
                        if let Err(e) = child.start_kill() {
                            warn!("Failed to kill process {:?}: {}", pid, e);
                        }
                    }
                }
            };

            let exit = match status {
                Ok(status) => {
                    info!("Process PID {:?} exited with status: {}", pid, status);
                    ProcessExit::from_status(status)
                }
                Err(e) => {
                    error!("Error waiting for child process: {}", e);
                    ProcessExit::WaitFailed(e.to_string())
                }
            };

            exit_sender.send_replace(Some(exit));
            trace!("ChildProcessLauncher: Wait task finished for PID {:?}", pid);
        });
    }
}

#[async_trait]
impl ProcessLauncher for ChildProcessLauncher {
    async fn launch(&self, plan: &LaunchPlan) -> Result<AgentProcess, ProcessError> {
        let (program, args) = plan.argv();
        info!("Starting process: {} {:?}", program.display(), args);

        let mut command_builder = Command::new(&program);
        command_builder
            .args(&args)
            .env_clear()
            .envs(&plan.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Set working directory if specified
        if let Some(working_dir) = &plan.working_directory {
            command_builder.current_dir(working_dir);
        }

        let mut child = command_builder
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pid = child.id();
        info!("Process started with PID: {:?}", pid);

        // Extract stdio streams before moving child to wait task
        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        let (exit_sender, exit) = watch::channel(None);

        #[cfg(unix)]
        let signaller = ChildSignaller {
            pid,
            exit: exit.clone(),
        };
        #[cfg(unix)]
        Self::spawn_wait_task(child, pid, exit_sender);

        #[cfg(not(unix))]
        let (kill_sender, kill_receiver) = mpsc::unbounded_channel();
        #[cfg(not(unix))]
        let signaller = ChildSignaller {
            pid,
            exit: exit.clone(),
            kill_sender,
        };
        #[cfg(not(unix))]
        Self::spawn_wait_task(child, pid, exit_sender, kill_receiver);

        Ok(AgentProcess {
            pid,
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit,
            signaller: Arc::new(signaller),
        })
    }
}

/// Signals a child spawned by [`ChildProcessLauncher`]
struct ChildSignaller {
    pid: Option<u32>,
    exit: ExitWatch,
    #[cfg(not(unix))]
    kill_sender: mpsc::UnboundedSender<()>,
}

impl ChildSignaller {
    #[cfg(unix)]
    fn deliver(&self, signal: StopSignal) -> Result<(), ProcessError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let signo = match signal {
            StopSignal::Terminate => libc::SIGTERM,
            StopSignal::Kill => libc::SIGKILL,
        };
        if unsafe { libc::kill(pid as libc::pid_t, signo) } != 0 {
            return Err(ProcessError::Io(io::Error::last_os_error()));
        }
        info!("Sent {:?} to process {}", signal, pid);
        Ok(())
    }

    #[cfg(not(unix))]
    fn deliver(&self, signal: StopSignal) -> Result<(), ProcessError> {
        // No graceful signal here; both steps become a hard kill
        warn!(
            "No {:?} on this platform, killing process {:?}",
            signal, self.pid
        );
        self.kill_sender
            .send(())
            .map_err(|_| ProcessError::Unsupported)
    }
}

impl ProcessSignaller for ChildSignaller {
    fn signal(&self, signal: StopSignal) -> Result<(), ProcessError> {
        // A reaped pid may already belong to someone else
        if self.exit.borrow().is_some() {
            debug!("Process {:?} already exited, not sending {:?}", self.pid, signal);
            return Ok(());
        }
        self.deliver(signal)
    }
}
