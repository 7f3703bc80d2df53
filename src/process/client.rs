//! Launcher-side handle on a running `fluorine-process-helper`.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

use super::protocol::{Command, LaunchConfig, LineReader, ProtocolError, Report};
use crate::logging::{log_error, log_info, log_warning};
use crate::runtime_wrap::command_for;

/// How long to wait for `started`/`error` after sending the config.
const START_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace given to the helper to exit once it lost its caller.
const HELPER_EXIT_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub enum SupervisorError {
    Spawn(io::Error),
    Protocol(ProtocolError),
    /// The helper answered `error <message>`
    Rejected(String),
    UnexpectedReport(Report),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::Spawn(e) => write!(f, "Failed to start process helper: {}", e),
            SupervisorError::Protocol(e) => write!(f, "Process helper protocol error: {}", e),
            SupervisorError::Rejected(msg) => write!(f, "Process helper failed to launch: {}", msg),
            SupervisorError::UnexpectedReport(r) => {
                write!(f, "Unexpected report from process helper: '{}'", r)
            }
        }
    }
}

impl std::error::Error for SupervisorError {}

impl From<ProtocolError> for SupervisorError {
    fn from(e: ProtocolError) -> Self {
        SupervisorError::Protocol(e)
    }
}

/// A game running under the process helper.
///
/// Dropping the client closes the helper's stdin, which makes the helper
/// terminate the game's process group.
pub struct SupervisorClient {
    helper: Child,
    stdin: Option<ChildStdin>,
    pid: i32,
    reports: Receiver<Report>,
    exit_code: Option<i32>,
}

impl SupervisorClient {
    /// Start the helper at `helper_path` and hand it `config`.
    ///
    /// Returns once the helper reported `started`.
    pub fn start(helper_path: &Path, config: &LaunchConfig) -> Result<Self, SupervisorError> {
        let payload = config.encode()?;

        log_info(&format!(
            "Starting process helper {} for {}",
            helper_path.display(),
            config.program.display()
        ));

        let mut helper = command_for(helper_path, false)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(SupervisorError::Spawn)?;

        let (Some(mut stdin), Some(stdout)) = (helper.stdin.take(), helper.stdout.take()) else {
            let _ = helper.kill();
            let _ = helper.wait();
            return Err(SupervisorError::Spawn(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "helper pipes unavailable",
            )));
        };

        if let Err(e) = stdin.write_all(payload.as_bytes()).and_then(|_| stdin.flush()) {
            let _ = helper.kill();
            let _ = helper.wait();
            return Err(SupervisorError::Spawn(e));
        }

        let mut reader = LineReader::new(stdout);
        let first = match reader.read_line(Some(START_TIMEOUT)) {
            Ok(line) => line.parse::<Report>(),
            Err(e) => Err(e),
        };

        let pid = match first {
            Ok(Report::Started(pid)) => pid,
            Ok(Report::Error(msg)) => {
                log_error(&format!("Process helper rejected launch: {}", msg));
                drop(stdin);
                let _ = helper.wait_timeout(HELPER_EXIT_GRACE);
                return Err(SupervisorError::Rejected(msg));
            }
            Ok(other) => {
                drop(stdin);
                let _ = helper.kill();
                let _ = helper.wait();
                return Err(SupervisorError::UnexpectedReport(other));
            }
            Err(e) => {
                drop(stdin);
                let _ = helper.kill();
                let _ = helper.wait();
                return Err(SupervisorError::Protocol(e));
            }
        };

        log_info(&format!("Process helper started game with pid {}", pid));

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || loop {
            let line = match reader.read_line(None) {
                Ok(line) => line,
                Err(_) => break,
            };
            match line.parse::<Report>() {
                Ok(report) => {
                    let done = matches!(report, Report::Exited(_));
                    if tx.send(report).is_err() || done {
                        break;
                    }
                }
                Err(e) => log_warning(&format!("Ignoring helper output: {}", e)),
            }
        });

        Ok(Self {
            helper,
            stdin: Some(stdin),
            pid,
            reports: rx,
            exit_code: None,
        })
    }

    /// Pid of the game's root process (also its process group id).
    pub fn pid(&self) -> i32 {
        self.pid
    }

    fn send(&mut self, command: Command) -> io::Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "helper stdin closed"));
        };
        stdin.write_all(command.as_line().as_bytes())?;
        stdin.flush()
    }

    /// Ask the helper to SIGTERM the game's process group. The helper keeps
    /// monitoring and will still report `exited`.
    pub fn kill(&mut self) -> io::Result<()> {
        self.send(Command::Kill)
    }

    /// Tell the helper to stop monitoring and exit immediately.
    pub fn quit(&mut self) -> io::Result<()> {
        self.send(Command::Quit)
    }

    fn record(&mut self, report: Report) -> Option<i32> {
        match report {
            Report::Exited(code) => {
                self.exit_code = Some(code);
                self.stdin = None;
                let _ = self.helper.wait_timeout(HELPER_EXIT_GRACE);
                Some(code)
            }
            other => {
                log_warning(&format!("Unexpected helper report after start: {}", other));
                None
            }
        }
    }

    /// Exit code of the whole tree, if the helper already reported it.
    pub fn try_exit_code(&mut self) -> Option<i32> {
        if self.exit_code.is_some() {
            return self.exit_code;
        }
        loop {
            match self.reports.try_recv() {
                Ok(report) => {
                    if let Some(code) = self.record(report) {
                        return Some(code);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    /// Wait up to `timeout` for the tree to exit.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<i32>, SupervisorError> {
        if self.exit_code.is_some() {
            return Ok(self.exit_code);
        }
        match self.reports.recv_timeout(timeout) {
            Ok(report) => Ok(self.record(report)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SupervisorError::Protocol(ProtocolError::Closed))
            }
        }
    }

    /// Block until the helper reports `exited`.
    pub fn wait(&mut self) -> Result<i32, SupervisorError> {
        loop {
            if let Some(code) = self.exit_code {
                return Ok(code);
            }
            match self.reports.recv() {
                Ok(report) => {
                    self.record(report);
                }
                Err(_) => return Err(SupervisorError::Protocol(ProtocolError::Closed)),
            }
        }
    }
}

impl Drop for SupervisorClient {
    fn drop(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        // Closing stdin is the helper's signal to tear the game down.
        self.stdin = None;
        if let Ok(None) = self.helper.wait_timeout(HELPER_EXIT_GRACE) {
            log_warning("Process helper did not exit after disconnect, killing it");
            let _ = self.helper.kill();
            let _ = self.helper.wait();
        }
    }
}
