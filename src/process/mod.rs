//! Game process supervision.
//!
//! The supervisor runs as its own executable (`fluorine-process-helper`) and is
//! driven over a line protocol on stdin/stdout. The launcher side talks to it
//! through [`client::SupervisorClient`].

pub mod client;
pub mod protocol;
pub mod supervisor;
pub mod tracker;

use chrono::{DateTime, Local};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

pub use client::SupervisorClient;
pub use protocol::{Command, LaunchConfig, ProtocolError, Report};
pub use tracker::{any_alive, descendants_of};

// ============================================================================
// Process Handle
// ============================================================================

/// Root of a monitored process tree.
///
/// Only the pid is ever shared with the tracker; nothing holds on to OS
/// process objects between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: i32,
    pub launched_at: DateTime<Local>,
}

impl ProcessHandle {
    pub fn new(pid: i32) -> Self {
        Self {
            pid,
            launched_at: Local::now(),
        }
    }
}

// ============================================================================
// Exit Codes
// ============================================================================

/// Map a raw `waitpid` status to the protocol exit code.
///
/// Normal exits keep their code, signal deaths become `128 + signal`.
pub fn exit_code_from_wait_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        0
    }
}

/// Same mapping as [`exit_code_from_wait_status`] for a std `ExitStatus`.
pub fn exit_code_from_status(status: &ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 0,
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Liveness check. A permission error still means the pid exists, it just
/// belongs to someone else.
pub fn process_exists(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs error checking only.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    matches!(io::Error::last_os_error().raw_os_error(), Some(code) if code == libc::EPERM)
}

/// Whether any process is still a member of group `pgid`.
pub fn process_group_exists(pgid: i32) -> bool {
    if pgid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs error checking only.
    if unsafe { libc::kill(-pgid, 0) } == 0 {
        return true;
    }
    matches!(io::Error::last_os_error().raw_os_error(), Some(code) if code == libc::EPERM)
}

/// Send `signal` to the process group led by `pid`.
///
/// A group that no longer exists is not an error.
pub fn signal_process_group(pid: i32, signal: libc::c_int) -> io::Result<()> {
    if pid <= 0 {
        return Ok(());
    }

    // SAFETY: plain kill(2) on a negative pid, no memory is touched.
    if unsafe { libc::kill(-pid, signal) } == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err)
}
