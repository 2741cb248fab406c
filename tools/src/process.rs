//! Subprocess lifetime management: session setup, group kill, kill-on-drop.

use std::time::{Duration, Instant};

use tokio::process::{Child, Command};

/// RAII guard that kills a child process (and its process group on Unix) on drop.
///
/// Wrap a spawned `tokio::process::Child` immediately after `spawn()` to ensure
/// cleanup if the owning future is cancelled. Call `disarm()` after the process
/// exits normally to prevent the kill.
#[derive(Debug)]
pub struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child, armed: true }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    fn kill_now(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id()
            && matches!(try_kill_process_group(pid), Ok(KillOutcome::Killed))
        {
            return;
        }
        let _ = self.child.start_kill();
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.kill_now();
        let _ = self.child.try_wait();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Killed,
}

/// Terminate a process group best-effort.
///
/// Children are spawned with [`set_new_session`], so the child pid is also the
/// process group id.
#[cfg(unix)]
pub fn try_kill_process_group(pid: u32) -> std::io::Result<KillOutcome> {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return Ok(KillOutcome::NotRunning);
    };
    // SAFETY: killpg has no memory-safety preconditions.
    unsafe {
        if libc::killpg(pgid, libc::SIGKILL) == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(KillOutcome::NotRunning);
            }
            return Err(err);
        }
    }
    Ok(KillOutcome::Killed)
}

/// Put the child process in its own session (Unix only) so the entire process
/// group can be killed via `killpg`.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: the closure only calls async-signal-safe functions.
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Linux-only: the child dies with us even on SIGKILL or a crash.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn set_new_session(_cmd: &mut Command) {}

/// A running subprocess: pid, start time, and a kill-on-drop guard.
///
/// Ends in exactly one of: normal exit (`wait`), or a kill (`kill`, or drop
/// while still armed).
#[derive(Debug)]
pub struct SubprocessHandle {
    pid: Option<u32>,
    started_at: Instant,
    guard: ChildGuard,
}

impl SubprocessHandle {
    /// Spawn `cmd` in a new session and guard it.
    pub fn spawn(cmd: &mut Command) -> std::io::Result<Self> {
        set_new_session(cmd);
        let child = cmd.spawn()?;
        let pid = child.id();
        tracing::debug!(pid, "Spawned subprocess");
        Ok(Self {
            pid,
            started_at: Instant::now(),
            guard: ChildGuard::new(child),
        })
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn child_mut(&mut self) -> &mut Child {
        self.guard.child_mut()
    }

    /// Wait for a normal exit, then sweep any processes the child left in its group.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        let status = self.guard.child_mut().wait().await?;
        self.guard.disarm();
        #[cfg(unix)]
        if let Some(pid) = self.pid
            && let Ok(KillOutcome::Killed) = try_kill_process_group(pid)
        {
            tracing::debug!(pid, "Killed leftover process group members");
        }
        Ok(status)
    }

    /// SIGKILL the whole group and reap the child.
    pub async fn kill(&mut self) {
        self.guard.kill_now();
        let _ = self.guard.child_mut().wait().await;
        self.guard.disarm();
        tracing::debug!(pid = self.pid, elapsed = ?self.elapsed(), "Killed subprocess");
    }
}
