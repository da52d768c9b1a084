//! Ownership of one worker OS process: its launch recipe, the live child
//! (if any), an exit-observer task, and a two-phase stop.
//!
//! The exit observer is the only writer of the cached exit flag and of the
//! private exit-notification channel shared with the owning reactor; the
//! zero-signal liveness probe is consulted only after that flag, so a
//! recycled pid can never read as alive.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{LivenessError, ProcessError};

/// How often [`ProcessHandle::terminate`] re-probes liveness while waiting
/// out a grace period.
const PROBE_INTERVAL: Duration = Duration::from_millis(25);

/// Everything needed to (re)launch one worker process.
///
/// The env overlay is merged onto the supervisor's own environment at spawn
/// time; program and argument list are fixed for the owning reactor's
/// lifetime.
#[derive(Clone, Debug)]
pub struct ProcessRecipe {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Handle to one live-or-not-yet-started worker process.
pub struct ProcessHandle {
    recipe: ProcessRecipe,
    pid: Option<u32>,
    exit_seen: Arc<AtomicBool>,
    exit_tx: mpsc::Sender<String>,
    exit_rx: mpsc::Receiver<String>,
}

impl ProcessHandle {
    /// Stores the recipe without touching the OS; nothing runs until
    /// [`ProcessHandle::start`].
    pub fn new(recipe: ProcessRecipe) -> Self {
        let (exit_tx, exit_rx) = mpsc::channel(1);
        Self {
            recipe,
            pid: None,
            exit_seen: Arc::new(AtomicBool::new(false)),
            exit_tx,
            exit_rx,
        }
    }

    pub fn recipe(&self) -> &ProcessRecipe {
        &self.recipe
    }

    /// Launches the worker process. Succeeds as a no-op when one is already
    /// alive.
    ///
    /// On success an observer task is spawned that waits for the process to
    /// exit and publishes a single textual exit reason on the handle's
    /// private notification channel. Each successful launch installs a
    /// fresh channel, so a relaunch on the same handle can never observe
    /// the previous worker's exit.
    pub fn start(&mut self) -> Result<(), ProcessError> {
        if self.is_alive() {
            return Ok(());
        }

        let mut child = Command::new(&self.recipe.program)
            .args(&self.recipe.args)
            .envs(self.recipe.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ProcessError::StartFailure { source })?;

        let pid = child.id();
        let exit_seen = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = mpsc::channel(1);
        self.pid = pid;
        self.exit_seen = exit_seen.clone();
        self.exit_tx = exit_tx.clone();
        self.exit_rx = exit_rx;

        tokio::spawn(async move {
            let reason = match child.wait().await {
                Ok(status) if status.success() => "normal exit".to_string(),
                Ok(status) => status.to_string(),
                Err(_) => "unknown error condition".to_string(),
            };
            exit_seen.store(true, Ordering::SeqCst);
            let _ = exit_tx.send(reason).await;
        });

        info!(pid, program = %self.recipe.program, "worker process started");
        Ok(())
    }

    /// Resolves when the current worker process exits, yielding the
    /// observer's textual exit reason.
    pub async fn exit_observed(&mut self) -> String {
        self.exit_rx
            .recv()
            .await
            .unwrap_or_else(|| "unknown error condition".to_string())
    }

    /// Best-effort liveness check with an explanatory reason on the
    /// negative path.
    pub fn liveness(&self) -> Result<(), LivenessError> {
        let pid = self.pid.ok_or(LivenessError::NeverStarted)?;
        if self.exit_seen.load(Ordering::SeqCst) {
            return Err(LivenessError::AlreadyExited);
        }
        signal_process(pid, 0).map_err(LivenessError::Unsignalable)
    }

    pub fn is_alive(&self) -> bool {
        self.liveness().is_ok()
    }

    /// Stops the worker process: graceful signal, grace-period wait,
    /// forceful kill, grace-period wait, give up.
    ///
    /// Succeeds as a no-op when nothing is alive. Each wait ends as soon as
    /// the exit is observed, so a cooperative worker costs far less than a
    /// full grace period; an uncooperative one is killed only after the
    /// grace period elapses.
    pub async fn terminate(&mut self, grace: Duration) -> Result<(), ProcessError> {
        let pid = match self.pid {
            Some(pid) if self.is_alive() => pid,
            _ => return Ok(()),
        };

        if let Err(cause) = signal_process(pid, libc::SIGTERM) {
            warn!(pid, %cause, "termination signal could not be delivered, killing outright");
            signal_process(pid, libc::SIGKILL)
                .map_err(|source| ProcessError::KillFailure { pid, source })?;
        }

        self.wait_for_exit(grace).await;
        if self.is_alive() {
            warn!(pid, "worker ignored the termination signal, killing");
            signal_process(pid, libc::SIGKILL)
                .map_err(|source| ProcessError::KillFailure { pid, source })?;

            self.wait_for_exit(grace).await;
            if self.is_alive() {
                return Err(ProcessError::StopFailure { pid });
            }
        }

        Ok(())
    }

    /// Re-probes liveness until the worker is gone or `grace` has elapsed.
    async fn wait_for_exit(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        while self.is_alive() {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return;
            }
            tokio::time::sleep(PROBE_INTERVAL.min(deadline - now)).await;
        }
    }
}

fn signal_process(pid: u32, signal: libc::c_int) -> io::Result<()> {
    if unsafe { libc::kill(pid as libc::pid_t, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
