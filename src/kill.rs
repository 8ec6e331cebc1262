//! Process-tree teardown.
//!
//! A `Killable` terminates a running process together with everything it
//! spawned. Unix places each child in its own process group and kills the
//! group; Windows asks `taskkill` to walk the tree. The `Registry` collects
//! one handle per launched process so the interrupt path can reach all of
//! them.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::KillError;

/// Something that can terminate a process and all of its descendants.
pub trait Killable: Send + Sync {
    fn kill(&self) -> Result<(), KillError>;
}

#[cfg(unix)]
pub type PlatformKiller = ProcessGroupKiller;
#[cfg(windows)]
pub type PlatformKiller = TreeKiller;

/// Pid of a spawned child, cleared for kill purposes once its process tree is
/// known to be gone.
#[derive(Debug, Default)]
struct ChildPid {
    pid: OnceLock<u32>,
    exited: AtomicBool,
}

impl ChildPid {
    fn bind(&self, pid: u32) {
        let _ = self.pid.set(pid);
    }

    fn mark_exited(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }

    fn live_pid(&self) -> Result<u32, KillError> {
        let pid = *self.pid.get().ok_or(KillError::NotStarted)?;
        if self.exited.load(Ordering::SeqCst) {
            return Err(KillError::Exited { pid });
        }
        Ok(pid)
    }
}

/// Kills the whole process group the child leads.
///
/// The child calls `setpgid(0, 0)` before exec, so the group id equals its
/// pid and stays valid after the leader itself was reaped, as long as any
/// member of the group is still running.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct ProcessGroupKiller {
    child: ChildPid,
}

#[cfg(unix)]
impl ProcessGroupKiller {
    /// Makes `command` start in a new process group and returns the handle
    /// that will kill that group once [`bind`](Self::bind) is called.
    pub fn prepare(command: &mut Command) -> Self {
        unsafe {
            command.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        Self::default()
    }

    pub fn bind(&self, pid: u32) {
        self.child.bind(pid);
    }

    pub fn mark_exited(&self) {
        self.child.mark_exited();
    }
}

#[cfg(unix)]
impl Killable for ProcessGroupKiller {
    fn kill(&self) -> Result<(), KillError> {
        let pid = self.child.live_pid()?;
        let pgid = pid as libc::pid_t;
        if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
            let source = io::Error::last_os_error();
            // No member of the group is left.
            if source.raw_os_error() == Some(libc::ESRCH) {
                return Err(KillError::Exited { pid });
            }
            return Err(KillError::Signal { pgid, source });
        }
        Ok(())
    }
}

/// Kills the process tree through `taskkill /T /F`.
#[cfg(windows)]
#[derive(Debug, Default)]
pub struct TreeKiller {
    child: ChildPid,
}

#[cfg(windows)]
impl TreeKiller {
    pub fn prepare(_command: &mut Command) -> Self {
        Self::default()
    }

    pub fn bind(&self, pid: u32) {
        self.child.bind(pid);
    }

    pub fn mark_exited(&self) {
        self.child.mark_exited();
    }
}

#[cfg(windows)]
impl Killable for TreeKiller {
    fn kill(&self) -> Result<(), KillError> {
        let pid = self.child.live_pid()?;
        let status = std::process::Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .stdout(std::process::Stdio::null())
            .status()
            .map_err(KillError::Helper)?;
        if !status.success() {
            return Err(KillError::HelperStatus(status));
        }
        Ok(())
    }
}

struct Entry {
    name: String,
    handle: Arc<dyn Killable>,
}

#[derive(Default)]
struct Entries {
    list: Vec<Entry>,
    closed: bool,
}

/// Lock-guarded list of kill handles for every process started in a run.
///
/// Entries are only ever appended; the list is walked once when the run is
/// interrupted, which also closes the registry to further starts.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<Entries>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` and runs `start` while still holding the lock, so
    /// an interrupt either sees the started process or runs before it exists.
    ///
    /// Once [`kill_all`](Self::kill_all) ran, `start` is never called and an
    /// [`io::ErrorKind::Interrupted`] error is returned instead.
    pub fn register_and_start<T>(
        &self,
        name: &str,
        handle: Arc<dyn Killable>,
        start: impl FnOnce() -> io::Result<T>,
    ) -> io::Result<T> {
        let mut entries = self.lock();
        if entries.closed {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "run is shutting down",
            ));
        }
        entries.list.push(Entry {
            name: name.to_string(),
            handle,
        });
        start()
    }

    pub fn len(&self) -> usize {
        self.lock().list.len()
    }

    /// Kills every registered process tree, continuing past failures, and
    /// refuses any later start.
    ///
    /// Returns the number of handles that could not be killed. Processes
    /// that already exited are skipped and not counted.
    pub fn kill_all(&self) -> usize {
        let mut entries = self.lock();
        entries.closed = true;
        let mut failed = 0;
        for entry in entries.list.iter() {
            match entry.handle.kill() {
                Ok(()) => {}
                Err(err @ KillError::Exited { .. }) => {
                    debug!(process = %entry.name, error = %err, "skipping finished process");
                }
                Err(err) => {
                    failed += 1;
                    error!(process = %entry.name, error = %err, "could not kill process");
                }
            }
        }
        failed
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Killable for Counting {
        fn kill(&self) -> Result<(), KillError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(KillError::NotStarted)
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn kill_all_continues_past_failures() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for (idx, fail) in [false, true, false].into_iter().enumerate() {
            let handle = Arc::new(Counting {
                calls: Arc::clone(&calls),
                fail,
            });
            registry
                .register_and_start(&format!("p{idx}"), handle, || Ok(()))
                .unwrap();
        }
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.kill_all(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Entries stay registered after teardown.
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn failed_start_keeps_registration() {
        let registry = Registry::new();
        let handle = Arc::new(Counting {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        });
        let result: io::Result<()> = registry.register_and_start("bad", handle, || {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such shell"))
        });
        assert!(result.is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn starts_are_refused_after_teardown() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = Arc::new(Counting {
            calls: Arc::clone(&calls),
            fail: false,
        });
        registry.register_and_start("early", handle, || Ok(())).unwrap();
        assert_eq!(registry.kill_all(), 0);

        let started = AtomicBool::new(false);
        let late = Arc::new(Counting {
            calls: Arc::clone(&calls),
            fail: false,
        });
        let err = registry
            .register_and_start("late", late, || {
                started.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
        assert!(!started.load(Ordering::SeqCst));
        assert_eq!(registry.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[test]
    fn unbound_handle_reports_not_started() {
        let killer = ProcessGroupKiller::default();
        assert!(matches!(killer.kill(), Err(KillError::NotStarted)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kills_the_whole_process_group() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 30 & sleep 30");
        let killer = ProcessGroupKiller::prepare(&mut command);
        let mut child = command.spawn().unwrap();
        killer.bind(child.id().unwrap());

        let pgid = unsafe { libc::getpgid(child.id().unwrap() as libc::pid_t) };
        assert_eq!(pgid as u32, child.id().unwrap());

        killer.kill().unwrap();
        let status = tokio::time::timeout(std::time::Duration::from_secs(10), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[test]
    fn exited_handle_is_not_signaled() {
        let killer = ProcessGroupKiller::default();
        killer.bind(u32::MAX);
        killer.mark_exited();
        assert!(matches!(
            killer.kill(),
            Err(KillError::Exited { pid: u32::MAX })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_group_reports_exited() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("exit 0");
        let killer = ProcessGroupKiller::prepare(&mut command);
        let mut child = command.spawn().unwrap();
        let pid = child.id().unwrap();
        killer.bind(pid);
        child.wait().await.unwrap();
        assert!(matches!(killer.kill(), Err(KillError::Exited { pid: p }) if p == pid));
    }

    #[cfg(target_os = "linux")]
    fn running(pid: libc::pid_t) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            return false;
        };
        match stat.rsplit_once(')') {
            Some((_, rest)) => !matches!(rest.trim_start().chars().next(), Some('Z' | 'X')),
            None => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn kills_group_members_after_the_leader_was_reaped() {
        use tokio::io::AsyncBufReadExt;

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("sleep 30 > /dev/null & echo $!")
            .stdout(std::process::Stdio::piped());
        let killer = ProcessGroupKiller::prepare(&mut command);
        let mut child = command.spawn().unwrap();
        killer.bind(child.id().unwrap());

        let mut line = String::new();
        tokio::io::BufReader::new(child.stdout.take().unwrap())
            .read_line(&mut line)
            .await
            .unwrap();
        let sleeper: libc::pid_t = line.trim().parse().unwrap();
        assert!(child.wait().await.unwrap().success());
        assert!(running(sleeper));

        killer.kill().unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while running(sleeper) && std::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(!running(sleeper), "sleeper {} survived", sleeper);
    }
}
