//! Error types for process execution and process-tree teardown.

use std::io;
use std::process::ExitStatus;

use thiserror::Error;

/// Failure of a single supervised process. Never affects sibling processes.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to wait for exit: {0}")]
    Wait(#[source] io::Error),
    #[error("{0}")]
    Status(ExitStatus),
}

/// Failure to tear down a process tree.
#[derive(Debug, Error)]
pub enum KillError {
    /// The handle was registered but its process never started.
    #[error("process was never started")]
    NotStarted,
    /// The process tree is already gone; its pid may belong to someone else now.
    #[error("process {pid} already exited")]
    Exited { pid: u32 },
    #[cfg(unix)]
    #[error("could not signal process group {pgid}: {source}")]
    Signal {
        pgid: i32,
        #[source]
        source: io::Error,
    },
    #[cfg(windows)]
    #[error("could not run taskkill: {0}")]
    Helper(#[source] io::Error),
    #[cfg(windows)]
    #[error("taskkill failed with {0}")]
    HelperStatus(ExitStatus),
}
