//! Transcoder process handle
//!
//! One `ProcessHandle` owns one external transcoder process. The child itself
//! lives in a reaper task spawned next to it, which waits for the exit,
//! drains stderr and publishes an [`ExitOutcome`] on a watch channel. Any
//! number of callers can therefore wait on the same process while another
//! one terminates it.

use parking_lot::Mutex;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{watch, Notify};

use super::command::TranscodeCommand;
use super::stderr::{self, StderrTail};
use crate::config::TranscoderConfig;
use crate::error::SpawnError;

/// Upper bound on waiting for stderr EOF after the process exited.
/// Grandchildren that inherited the pipe can keep it open.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a transcoder process ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stderr_tail: Vec<String>,
}

impl ExitOutcome {
    fn from_status(status: ExitStatus, stderr_tail: Vec<String>) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            exit_code: status.code(),
            signal,
            stderr_tail,
        }
    }

    /// Outcome used when the exit status could not be observed
    fn lost(stderr_tail: Vec<String>) -> Self {
        Self {
            exit_code: None,
            signal: None,
            stderr_tail,
        }
    }

    /// Short human readable exit status
    pub fn status_text(&self) -> String {
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exit code {}", code),
            (None, Some(signal)) => format!("signal {}", signal),
            (None, None) => "unknown status".to_string(),
        }
    }
}

/// Handle to a running (or exited) transcoder process
pub struct ProcessHandle {
    label: String,
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    kill: Arc<Notify>,
    force_killed: AtomicBool,
    kill_timeout: Duration,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
}

impl ProcessHandle {
    /// Create `output_dir` and start the transcoder for `source_uri`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        label: &str,
        source_uri: &str,
        output_dir: &Path,
        config: &TranscoderConfig,
    ) -> Result<Self, SpawnError> {
        std::fs::create_dir_all(output_dir).map_err(|source| SpawnError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let command = TranscodeCommand::from_config(source_uri, output_dir, config);
        let args = command.build();
        tracing::debug!("Spawning {} with args: {:?}", config.executable, args);

        let mut child = Command::new(&config.executable)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SpawnError::ExecutableNotFound(config.executable.clone())
                }
                _ => SpawnError::Io(e),
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let tail = Arc::new(Mutex::new(StderrTail::new(config.stderr_tail_lines)));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(stderr::collect(pipe, Arc::clone(&tail), label.to_string())));

        let kill = Arc::new(Notify::new());
        let (exit_tx, exit_rx) = watch::channel(None);

        let reaper_kill = Arc::clone(&kill);
        let reaper_label = label.to_string();
        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = reaper_kill.notified() => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("transcoder ({}): kill failed: {}", reaper_label, e);
                    }
                    child.wait().await
                }
            };

            if let Some(task) = stderr_task {
                if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await.is_err() {
                    tracing::debug!("transcoder ({}): stderr still open after exit", reaper_label);
                }
            }
            let stderr_tail = tail.lock().snapshot();

            let outcome = match status {
                Ok(status) => ExitOutcome::from_status(status, stderr_tail),
                Err(e) => {
                    tracing::warn!("transcoder ({}): wait failed: {}", reaper_label, e);
                    ExitOutcome::lost(stderr_tail)
                }
            };
            tracing::debug!(
                "transcoder ({}) exited: {}",
                reaper_label,
                outcome.status_text()
            );
            exit_tx.send_replace(Some(outcome));
        });

        tracing::info!(
            "Started transcoder for {} (pid {:?}) -> {:?}",
            label,
            pid,
            command.manifest_path()
        );

        Ok(Self {
            label: label.to_string(),
            pid,
            stdin: tokio::sync::Mutex::new(stdin),
            kill,
            force_killed: AtomicBool::new(false),
            kill_timeout: config.kill_timeout(),
            exit_rx,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The exit outcome, if the process has already exited
    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        self.exit_rx.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Whether `terminate` had to escalate to a kill
    pub fn was_force_killed(&self) -> bool {
        self.force_killed.load(Ordering::SeqCst)
    }

    /// Wait until the process exits. Never blocks a thread; the exit itself
    /// is observed by the reaper task.
    pub async fn wait(&self) -> ExitOutcome {
        let mut rx = self.exit_rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone().unwrap_or_default(),
            Err(_) => ExitOutcome::lost(Vec::new()),
        };
        outcome
    }

    /// Ask the transcoder to quit (`q` on stdin, then EOF). If it is still
    /// running after `grace_period`, kill it. Returns whether the exit was
    /// observed.
    pub async fn terminate(&self, grace_period: Duration) -> bool {
        if self.has_exited() {
            return true;
        }

        if let Some(mut pipe) = self.stdin.lock().await.take() {
            if let Err(e) = pipe.write_all(b"q").await {
                tracing::debug!("transcoder ({}): quit request not delivered: {}", self.label, e);
            }
            // dropping the pipe closes stdin
        }

        if tokio::time::timeout(grace_period, self.wait()).await.is_ok() {
            return true;
        }

        tracing::warn!(
            "transcoder ({}) still running after {:?}, killing pid {:?}",
            self.label,
            grace_period,
            self.pid
        );
        self.force_killed.store(true, Ordering::SeqCst);
        self.kill.notify_one();

        match tokio::time::timeout(self.kill_timeout, self.wait()).await {
            Ok(_) => true,
            Err(_) => {
                tracing::error!(
                    "transcoder ({}) pid {:?} not reaped {:?} after kill",
                    self.label,
                    self.pid,
                    self.kill_timeout
                );
                false
            }
        }
    }
}
