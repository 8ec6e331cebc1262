//! Termination-signal listening.
//!
//! Handlers are installed eagerly by [`ShutdownSignals::install`] so that a
//! request arriving right after the first child starts is not lost.

use std::future::pending;
use std::io;

use tracing::warn;

/// Interrupt, terminate and quit requests delivered to the supervisor.
pub struct ShutdownSignals {
    inner: Option<Platform>,
}

#[cfg(unix)]
struct Platform {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sigquit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Platform {
    fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigquit.recv() => "SIGQUIT",
        }
    }
}

#[cfg(windows)]
struct Platform {
    ctrl_c: tokio::signal::windows::CtrlC,
    ctrl_break: tokio::signal::windows::CtrlBreak,
}

#[cfg(windows)]
impl Platform {
    fn install() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
            ctrl_break: tokio::signal::windows::ctrl_break()?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.ctrl_c.recv() => "ctrl-c",
            _ = self.ctrl_break.recv() => "ctrl-break",
        }
    }
}

impl ShutdownSignals {
    /// Installs the handlers. Must be called inside a tokio runtime.
    ///
    /// If installation fails the failure is logged and [`recv`](Self::recv)
    /// never resolves.
    pub fn install() -> Self {
        match Platform::install() {
            Ok(platform) => Self {
                inner: Some(platform),
            },
            Err(err) => {
                warn!(error = %err, "could not install signal handlers");
                Self { inner: None }
            }
        }
    }

    /// Waits for the next request and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        match self.inner.as_mut() {
            Some(platform) => platform.recv().await,
            None => pending().await,
        }
    }
}
