//! Concurrent launching and supervision of process specs.
//!
//! The supervisor starts every spec at once, one task per process, and waits
//! for all of them. A listener task runs for the whole run; when it fires it
//! kills every registered process tree and the run ends as `Interrupted`
//! without waiting for the remaining processes.

use std::fmt;
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::ProcessError;
use crate::kill::{Killable, PlatformKiller, Registry};
use crate::output::forward;
use crate::process::{palette_color, ProcessSpec};
use crate::signal::ShutdownSignals;

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// Every process exited on its own.
    Completed(Vec<Exit>),
    /// A termination request tore the run down.
    Interrupted,
}

/// Completion report for one process.
#[derive(Debug)]
pub struct Exit {
    pub name: String,
    pub result: Result<(), ProcessError>,
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(()) => write!(f, "{} exited", self.name),
            Err(err) => write!(f, "{} exited with an error: {}", self.name, err),
        }
    }
}

pub struct Supervisor {
    registry: Arc<Registry>,
    colored: bool,
}

impl Supervisor {
    pub fn new(colored: bool) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            colored,
        }
    }

    /// Runs `specs` until they all exit or a termination signal arrives.
    pub async fn run(&self, specs: Vec<ProcessSpec>) -> Outcome {
        let mut signals = ShutdownSignals::install();
        self.run_until(specs, async move {
            let signal = signals.recv().await;
            info!(signal, "received termination signal, killing processes");
        })
        .await
    }

    /// Runs `specs` until they all exit or `shutdown` resolves.
    pub async fn run_until<F>(&self, specs: Vec<ProcessSpec>, shutdown: F) -> Outcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let mut listener = tokio::spawn(async move {
            shutdown.await;
            let failed = registry.kill_all();
            debug!(killed = registry.len() - failed, failed, "teardown finished");
        });

        let mut units = JoinSet::new();
        for (index, mut spec) in specs.into_iter().enumerate() {
            spec.color = palette_color(index);
            units.spawn(launch(spec, Arc::clone(&self.registry), self.colored));
        }

        let completed = async {
            let mut exits = Vec::with_capacity(units.len());
            while let Some(joined) = units.join_next().await {
                match joined {
                    Ok(exit) => exits.push(exit),
                    Err(err) => warn!(error = %err, "process task failed"),
                }
            }
            exits
        };

        tokio::select! {
            exits = completed => {
                listener.abort();
                Outcome::Completed(exits)
            }
            _ = &mut listener => Outcome::Interrupted,
        }
    }
}

// Starts one process, forwards its output and reports how it exited.
async fn launch(mut spec: ProcessSpec, registry: Arc<Registry>, colored: bool) -> Exit {
    let name = spec.name.clone();
    let (mut stdout, mut stderr) = spec.output_writers(colored);
    debug!(process = %name, command = %spec.display_command(), "launching");

    let command = spec.build_command();
    let killer = Arc::new(PlatformKiller::prepare(command));
    let handle: Arc<dyn Killable> = Arc::clone(&killer) as Arc<dyn Killable>;
    let spawned = registry.register_and_start(&name, handle, || {
        let child = command.spawn()?;
        if let Some(pid) = child.id() {
            killer.bind(pid);
        }
        Ok(child)
    });
    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => return report(name, Err(ProcessError::Spawn(err))),
    };

    let mut pumps = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        pumps.push(tokio::spawn(async move { forward(out, &mut stdout).await }));
    }
    if let Some(err) = child.stderr.take() {
        pumps.push(tokio::spawn(async move { forward(err, &mut stderr).await }));
    }

    let result = match child.wait().await {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(ProcessError::Status(status)),
        Err(err) => Err(ProcessError::Wait(err)),
    };
    // Background members of the group may still hold the pipes open and stay
    // killable until the pumps see end of file.
    for pump in pumps {
        if let Ok(Err(err)) = pump.await {
            warn!(process = %name, error = %err, "output forwarding failed");
        }
    }
    killer.mark_exited();
    report(name, result)
}

fn report(name: String, result: Result<(), ProcessError>) -> Exit {
    let exit = Exit { name, result };
    if let Err(err) = writeln!(io::stdout().lock(), "{}", exit) {
        warn!(process = %exit.name, error = %err, "could not write exit report");
    }
    exit
}
