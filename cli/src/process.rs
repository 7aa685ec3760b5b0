//! Process management utilities for termly.
//!
//! Liveness checks and graceful termination of recorded session processes,
//! used by `list`, `status`, `stop` and `cleanup` to reconcile the session
//! registry with what is actually running.
//!
//! # Platform Support
//!
//! Both operations use POSIX signals through `libc`. On other platforms
//! every pid is reported dead and termination is a no-op.

// Rust guideline compliant 2026-02

use std::time::{Duration, Instant};

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The process was not running.
    NotRunning,
    /// The process exited after SIGTERM.
    Terminated,
    /// The process ignored SIGTERM and was sent SIGKILL.
    Killed,
}

/// Returns `true` if a process with `pid` exists.
///
/// A process owned by another user still counts as alive (`EPERM`).
#[must_use]
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: signal 0 performs only the existence and permission check;
        // no signal is delivered.
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: plain kill(2) on a positive pid taken from the session registry.
    unsafe { libc::kill(pid, signal) == 0 }
}

/// Sends SIGTERM, waits up to `grace` for the process to exit, then sends
/// SIGKILL.
///
/// # Example
///
/// ```ignore
/// use termly::process::{graceful_kill, KillOutcome};
///
/// let outcome = graceful_kill(record.pid, GRACEFUL_KILL_TIMEOUT);
/// assert_ne!(outcome, KillOutcome::NotRunning);
/// ```
pub fn graceful_kill(pid: u32, grace: Duration) -> KillOutcome {
    if pid == std::process::id() || !is_pid_alive(pid) {
        return KillOutcome::NotRunning;
    }

    #[cfg(unix)]
    {
        log::debug!("[Process] Sending SIGTERM to PID {pid}");
        if !send_signal(pid, libc::SIGTERM) {
            return KillOutcome::NotRunning;
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
            if !is_pid_alive(pid) {
                log::debug!("[Process] PID {pid} exited gracefully");
                return KillOutcome::Terminated;
            }
        }

        log::debug!("[Process] Force killing PID {pid} with SIGKILL");
        send_signal(pid, libc::SIGKILL);
        KillOutcome::Killed
    }

    #[cfg(not(unix))]
    {
        let _ = (grace, Instant::now());
        KillOutcome::NotRunning
    }
}
