//! Error types used across the supervisor.
//!
//! Split per concern: [`ProcessError`] for launching and stopping worker
//! processes, [`ReactorError`] for lifecycle misuse of a reactor,
//! [`PlanError`] for the launch-plan boundary, and [`ConfigError`] for
//! startup configuration. Plan and config errors are fatal before any
//! reactor starts; process errors are recovered inside the reactor loop
//! wherever possible.

use std::io;
use thiserror::Error;

use crate::events::Status;

/// Failures while starting or stopping a worker process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The OS could not launch the worker executable.
    #[error("unexpected error starting worker process: {source}")]
    StartFailure {
        #[source]
        source: io::Error,
    },

    /// A kill signal could not be delivered to the worker.
    #[error("unexpected error killing worker process (pid {pid}): {source}")]
    KillFailure {
        pid: u32,
        #[source]
        source: io::Error,
    },

    /// The worker outlived both the graceful signal and the forceful kill.
    #[error("worker process (pid {pid}) has not stopped")]
    StopFailure { pid: u32 },
}

/// Why a liveness probe reported the worker as not alive.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("no worker process was ever started")]
    NeverStarted,

    #[error("worker process state is already marked as exited")]
    AlreadyExited,

    #[error("worker process cannot be signalled: {0}")]
    Unsignalable(#[source] io::Error),
}

/// Lifecycle misuse of a reactor, or a failure on its way out.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ReactorError {
    /// The reactor loop may only be entered from the initialized state;
    /// everything afterwards goes through the event stream.
    #[error("reactor is outside of the initialized state ({status:?}) and cannot be started this way, use the event stream instead")]
    InvalidState { status: Status },

    /// The final defensive stop at loop exit failed.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Failures while building the launch plan. Always fatal to startup.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("unexpected error while querying the gateway for shard recommendations: {0}")]
    Gateway(#[from] reqwest::Error),

    #[error("invalid shard count returned from gateway query: {0}")]
    InvalidShardCount(u32),
}

/// Unusable startup configuration. Always fatal.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing or invalid value for required parameter: '{0}'")]
    Missing(&'static str),

    #[error("invalid value for parameter '{var}': {reason}")]
    Invalid { var: &'static str, reason: String },
}
