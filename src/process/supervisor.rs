//! The process helper: starts one program and watches its whole process tree.
//!
//! Runs as the standalone `fluorine-process-helper` executable. Under Flatpak it
//! is started on the host through `flatpak-spawn --host`, which keeps the
//! portal proxy alive for as long as the game tree runs.
//!
//! States: `AwaitingConfig -> Starting -> Monitoring -> Exited -> Terminated`.
//! Any failure before `started` is reported as `error <message>` and the
//! helper exits non-zero without forking.

use std::collections::HashSet;
use std::ffi::{CString, OsStr, OsString};
use std::fs;
use std::fmt;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use std::time::{Duration, Instant};

use super::protocol::{Command, LaunchConfig, LineReader, ProtocolError, Readiness, Report};
use super::{exit_code_from_wait_status, signal_process_group, tracker};
use crate::logging::{log_debug, log_info, log_warning};

/// How long the caller gets to deliver the config block.
pub const CONFIG_TIMEOUT: Duration = Duration::from_secs(30);

/// Monitoring tick. Also the worst-case latency for `kill`/`quit`.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Exit status of the forked child when chdir/exec fails. Never reported as
/// the game's exit code because the parent sees the exec-status pipe first.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// After the caller disappears we signal the group and give the root this
/// long to be reaped before exiting anyway.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Errors
// ============================================================================

/// Step of the child setup that failed before the target took over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStage {
    Chdir,
    Exec,
}

impl ExecStage {
    fn code(self) -> i32 {
        match self {
            ExecStage::Chdir => 1,
            ExecStage::Exec => 2,
        }
    }

    fn from_code(code: i32) -> Self {
        if code == 1 {
            ExecStage::Chdir
        } else {
            ExecStage::Exec
        }
    }
}

#[derive(Debug)]
pub enum SpawnError {
    /// Program, argument, env or workdir contained a NUL byte
    InvalidArgument(String),
    Pipe(io::Error),
    Fork(io::Error),
    Exec { stage: ExecStage, errno: i32 },
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            SpawnError::Pipe(e) => write!(f, "pipe2 failed: {}", e),
            SpawnError::Fork(e) => write!(f, "fork failed: {}", e),
            SpawnError::Exec { stage, errno } => {
                let err = io::Error::from_raw_os_error(*errno);
                match stage {
                    ExecStage::Chdir => write!(f, "chdir failed: {}", err),
                    ExecStage::Exec => write!(f, "exec failed: {}", err),
                }
            }
        }
    }
}

impl std::error::Error for SpawnError {}

// ============================================================================
// State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    AwaitingConfig,
    Starting,
    Monitoring { pid: i32, kill_requested: bool },
    /// Tree ended on its own, or the caller quit or hung up
    Exited { code: i32 },
    /// Tree ended after a `kill` command
    Killed { code: i32 },
    Terminated,
}

/// Why the monitoring loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Root reaped and no descendant left
    TreeExited(i32),
    /// `quit` received
    Quit(i32),
    /// Input hung up; the group was signalled
    Disconnected(i32),
}

impl MonitorOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitorOutcome::TreeExited(code)
            | MonitorOutcome::Quit(code)
            | MonitorOutcome::Disconnected(code) => *code,
        }
    }
}

pub struct Supervisor<R: AsRawFd, W: Write> {
    input: LineReader<R>,
    output: W,
    state: SupervisorState,
}

impl<R: AsRawFd, W: Write> Supervisor<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: LineReader::new(input),
            output,
            state: SupervisorState::AwaitingConfig,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    fn transition(&mut self, next: SupervisorState) {
        log_debug(&format!("supervisor: {:?} -> {:?}", self.state, next));
        self.state = next;
    }

    fn report(&mut self, report: Report) {
        log_info(&format!("supervisor: reporting '{}'", report));
        // Nobody to tell if the caller went away.
        let _ = writeln!(self.output, "{}", report);
        let _ = self.output.flush();
    }

    fn fail(&mut self, message: String) -> i32 {
        self.report(Report::Error(message));
        self.transition(SupervisorState::Terminated);
        1
    }

    /// Drive the whole lifecycle. Returns the helper's own exit status.
    pub fn run(mut self) -> i32 {
        let config = match LaunchConfig::read_from(&mut self.input, CONFIG_TIMEOUT) {
            Ok(config) => config,
            Err(ProtocolError::MissingProgram) => {
                return self.fail("no program specified".to_string());
            }
            Err(e) => {
                return self.fail(format!("stdin closed or timeout during config ({})", e));
            }
        };

        self.transition(SupervisorState::Starting);
        log_info(&format!(
            "supervisor: starting '{}' with {} args, {} env overrides",
            config.program.display(),
            config.args.len(),
            config.env.len()
        ));

        if let Err(e) = become_subreaper() {
            log_warning(&format!("supervisor: PR_SET_CHILD_SUBREAPER failed: {}", e));
        }

        let pid = match spawn_target(&config) {
            Ok(pid) => pid,
            Err(e) => return self.fail(e.to_string()),
        };

        self.report(Report::Started(pid));
        self.transition(SupervisorState::Monitoring {
            pid,
            kill_requested: false,
        });

        let outcome = self.monitor(pid);
        log_info(&format!("supervisor: monitoring ended with {:?}", outcome));

        self.conclude(outcome);
        self.transition(SupervisorState::Terminated);
        0
    }

    /// Record how the tree ended and send the single `exited` report.
    fn conclude(&mut self, outcome: MonitorOutcome) {
        let code = outcome.exit_code();
        let killed = matches!(
            (self.state, outcome),
            (
                SupervisorState::Monitoring {
                    kill_requested: true,
                    ..
                },
                MonitorOutcome::TreeExited(_)
            )
        );
        self.transition(if killed {
            SupervisorState::Killed { code }
        } else {
            SupervisorState::Exited { code }
        });
        self.report(Report::Exited(code));
    }

    /// Poll the command stream and the root's status until the tree is gone.
    pub fn monitor(&mut self, pid: i32) -> MonitorOutcome {
        let own_pid = std::process::id() as i32;
        let mut root_status: Option<libc::c_int> = None;

        loop {
            match self.next_command() {
                Ok(Some(Command::Kill)) => {
                    log_info(&format!("supervisor: kill requested for group {}", pid));
                    if let Err(e) = signal_process_group(pid, libc::SIGTERM) {
                        log_warning(&format!("supervisor: failed to signal group {}: {}", pid, e));
                    }
                    self.state = SupervisorState::Monitoring {
                        pid,
                        kill_requested: true,
                    };
                }
                Ok(Some(Command::Quit)) => {
                    let status = root_status.or_else(|| try_reap(pid));
                    return MonitorOutcome::Quit(status.map(exit_code_from_wait_status).unwrap_or(0));
                }
                Ok(None) => {}
                Err(e) => {
                    log_warning(&format!(
                        "supervisor: caller went away ({}), terminating group {}",
                        e, pid
                    ));
                    let _ = signal_process_group(pid, libc::SIGTERM);
                    let status = root_status.or_else(|| reap_with_grace(pid, DISCONNECT_GRACE));
                    return MonitorOutcome::Disconnected(
                        status.map(exit_code_from_wait_status).unwrap_or(0),
                    );
                }
            }

            if root_status.is_none() {
                root_status = poll_root(pid);
                if let Some(status) = root_status {
                    log_info(&format!(
                        "supervisor: root {} exited with code {}, checking descendants",
                        pid,
                        exit_code_from_wait_status(status)
                    ));
                }
            }

            if let Some(status) = root_status {
                reap_orphans();
                // Orphans of the root were reparented to us (we are a subreaper).
                let table = tracker::process_table();
                let mut remaining: HashSet<i32> = tracker::descendants_in(pid, &table);
                remaining.extend(tracker::descendants_in(own_pid, &table));
                if !tracker::any_alive(&remaining) {
                    return MonitorOutcome::TreeExited(exit_code_from_wait_status(status));
                }
            }
        }
    }

    /// Wait up to one poll interval for a command.
    ///
    /// `Ok(None)` covers both "nothing arrived" and unknown commands.
    /// `Err` means the caller hung up or the stream broke.
    fn next_command(&mut self) -> Result<Option<Command>, ProtocolError> {
        match self.input.poll(POLL_INTERVAL)? {
            Readiness::Idle => Ok(None),
            Readiness::HungUp => Err(ProtocolError::Closed),
            Readiness::Readable => match self.input.read_line(Some(POLL_INTERVAL)) {
                Ok(line) => {
                    let command = Command::parse(&line);
                    if command.is_none() && !line.is_empty() {
                        log_debug(&format!("supervisor: ignoring unknown command '{}'", line));
                    }
                    Ok(command)
                }
                // Partial line; the rest arrives on a later tick.
                Err(ProtocolError::Timeout) => Ok(None),
                Err(e) => Err(e),
            },
        }
    }
}

/// Run the helper on this process's stdin/stdout.
pub fn run_stdio() -> i32 {
    Supervisor::new(io::stdin(), io::stdout()).run()
}

// ============================================================================
// Spawning
// ============================================================================

fn cstring(bytes: &[u8], what: &str) -> Result<CString, SpawnError> {
    CString::new(bytes).map_err(|_| SpawnError::InvalidArgument(format!("{} contains a NUL byte", what)))
}

/// Inherited environment with the config's overrides applied, as `KEY=VALUE` C strings.
fn build_envp(config: &LaunchConfig) -> Result<Vec<CString>, SpawnError> {
    let mut merged: Vec<(OsString, OsString)> = std::env::vars_os()
        .filter(|(key, _)| {
            let key = key.to_string_lossy();
            !config.env.contains_key(&*key) && !config.unset_env.iter().any(|k| *k == key)
        })
        .collect();
    merged.extend(
        config
            .env
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v))),
    );

    merged
        .iter()
        .map(|(key, value)| {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            cstring(&entry, "environment entry")
        })
        .collect()
}

/// `PATH` as the target will see it.
fn target_search_path(config: &LaunchConfig) -> Option<OsString> {
    if let Some(path) = config.env.get("PATH") {
        return Some(OsString::from(path));
    }
    if config.unset_env.iter().any(|k| k == "PATH") {
        return None;
    }
    std::env::var_os("PATH")
}

/// Look a bare program name up in `search_path` (the libc default when
/// unset). Names with a slash, and names not found, are returned unchanged.
fn resolve_program(program: &Path, search_path: Option<&OsStr>) -> PathBuf {
    if program.as_os_str().as_bytes().contains(&b'/') {
        return program.to_path_buf();
    }
    let search_path = search_path.unwrap_or(OsStr::new("/bin:/usr/bin"));
    let candidates: Vec<PathBuf> = std::env::split_paths(search_path)
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                PathBuf::from(".").join(program)
            } else {
                dir.join(program)
            }
        })
        .collect();
    // Not found anywhere: exec the first candidate so it fails with ENOENT
    // instead of falling back to our own PATH.
    candidates
        .iter()
        .find(|candidate| {
            fs::metadata(candidate)
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
        .or(candidates.first())
        .cloned()
        .unwrap_or_else(|| program.to_path_buf())
}

fn become_subreaper() -> io::Result<()> {
    // SAFETY: prctl with integer arguments only.
    let ret = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1 as libc::c_ulong, 0, 0, 0) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Fork and exec the target in a new session.
///
/// Exec failure is detected through a close-on-exec pipe: a successful exec
/// closes the write end so the parent reads EOF, while a failing child writes
/// its stage and errno before exiting with [`EXEC_FAILURE_STATUS`].
pub fn spawn_target(config: &LaunchConfig) -> Result<i32, SpawnError> {
    // Everything the child needs is allocated before fork.
    let resolved = resolve_program(&config.program, target_search_path(config).as_deref());
    let program = cstring(resolved.as_os_str().as_bytes(), "program")?;
    // argv[0] keeps the name the caller asked for, as execvp would.
    let mut argv = vec![cstring(config.program.as_os_str().as_bytes(), "program")?];
    for arg in &config.args {
        argv.push(cstring(arg.as_bytes(), "argument")?);
    }
    let envp = build_envp(config)?;
    let workdir = match &config.working_dir {
        Some(dir) => Some(cstring(dir.as_os_str().as_bytes(), "workdir")?),
        None => None,
    };

    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
    argv_ptrs.push(ptr::null());
    let mut envp_ptrs: Vec<*const libc::c_char> = envp.iter().map(|s| s.as_ptr()).collect();
    envp_ptrs.push(ptr::null());

    let mut fds = [-1 as libc::c_int; 2];
    // SAFETY: fds points to two writable c_ints.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(SpawnError::Pipe(io::Error::last_os_error()));
    }
    let [read_fd, write_fd] = fds;

    // Flush our own buffered output so the child doesn't inherit it.
    let _ = io::stdout().flush();

    // SAFETY: the child only calls async-signal-safe functions before exec/_exit.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let err = io::Error::last_os_error();
        // SAFETY: closing fds we own.
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        return Err(SpawnError::Fork(err));
    }

    if pid == 0 {
        // SAFETY: in the child after fork; never returns.
        unsafe {
            libc::close(read_fd);
            child_exec(
                write_fd,
                &program,
                &argv_ptrs,
                &envp_ptrs,
                workdir.as_ref(),
            )
        }
    }

    // SAFETY: the write end belongs to the child now.
    unsafe {
        libc::close(write_fd);
    }

    let failure = read_exec_failure(read_fd);
    // SAFETY: closing our read end.
    unsafe {
        libc::close(read_fd);
    }

    if let Some((stage, errno)) = failure {
        let mut status = 0;
        // SAFETY: reaping our own child.
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
        return Err(SpawnError::Exec { stage, errno });
    }

    Ok(pid)
}

/// Child side of [`spawn_target`].
///
/// # Safety
///
/// Must only be called in the freshly forked child.
unsafe fn child_exec(
    status_fd: libc::c_int,
    program: &CString,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
    workdir: Option<&CString>,
) -> ! {
    // New session: the child leads its own process group, so `kill` can
    // reach the whole tree with one signal.
    libc::setsid();

    // Rust ignores SIGPIPE; restore the default before handing over.
    libc::signal(libc::SIGPIPE, libc::SIG_DFL);

    if let Some(dir) = workdir {
        if libc::chdir(dir.as_ptr()) != 0 {
            exit_with_failure(status_fd, ExecStage::Chdir);
        }
    }

    libc::execve(program.as_ptr(), argv.as_ptr(), envp.as_ptr());
    exit_with_failure(status_fd, ExecStage::Exec);
}

/// Write `stage` and the current errno to the status pipe, then `_exit`.
///
/// # Safety
///
/// Child side only.
unsafe fn exit_with_failure(status_fd: libc::c_int, stage: ExecStage) -> ! {
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&stage.code().to_ne_bytes());
    payload[4..].copy_from_slice(&errno.to_ne_bytes());
    let _ = libc::write(status_fd, payload.as_ptr() as *const libc::c_void, payload.len());
    libc::_exit(EXEC_FAILURE_STATUS);
}

/// Read the child's failure payload. `None` means EOF: exec succeeded.
fn read_exec_failure(fd: libc::c_int) -> Option<(ExecStage, i32)> {
    let mut payload = [0u8; 8];
    let mut filled = 0usize;

    while filled < payload.len() {
        // SAFETY: reading into the unfilled tail of a stack buffer.
        let n = unsafe {
            libc::read(
                fd,
                payload[filled..].as_mut_ptr() as *mut libc::c_void,
                payload.len() - filled,
            )
        };
        if n < 0 {
            if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        if n == 0 {
            break;
        }
        filled += n as usize;
    }

    if filled == 0 {
        return None;
    }

    let mut stage = [0u8; 4];
    let mut errno = [0u8; 4];
    stage.copy_from_slice(&payload[..4]);
    errno.copy_from_slice(&payload[4..]);
    Some((
        ExecStage::from_code(i32::from_ne_bytes(stage)),
        i32::from_ne_bytes(errno),
    ))
}

// ============================================================================
// Reaping
// ============================================================================

/// Non-blocking check on the root. `Some(status)` once it has been reaped.
fn poll_root(pid: i32) -> Option<libc::c_int> {
    let mut status = 0;
    // SAFETY: waitpid on our own child with a valid status pointer.
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if ret == pid {
        return Some(status);
    }
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            // Lost track of the child (ECHILD); treat as a clean exit.
            log_warning(&format!("supervisor: waitpid({}) failed: {}", pid, err));
            return Some(0);
        }
    }
    None
}

fn try_reap(pid: i32) -> Option<libc::c_int> {
    poll_root(pid)
}

fn reap_with_grace(pid: i32, grace: Duration) -> Option<libc::c_int> {
    let start = Instant::now();
    loop {
        if let Some(status) = poll_root(pid) {
            return Some(status);
        }
        if start.elapsed() >= grace {
            return None;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Reap any reparented descendants that already exited, so zombies don't
/// count as alive.
fn reap_orphans() {
    loop {
        let mut status = 0;
        // SAFETY: waitpid(-1) with WNOHANG and a valid status pointer.
        let ret = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if ret <= 0 {
            break;
        }
        log_debug(&format!("supervisor: reaped orphan {}", ret));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_spawn_error_messages() {
        let err = SpawnError::Exec {
            stage: ExecStage::Exec,
            errno: libc::ENOENT,
        };
        assert!(err.to_string().starts_with("exec failed: "));

        let err = SpawnError::Exec {
            stage: ExecStage::Chdir,
            errno: libc::ENOENT,
        };
        assert!(err.to_string().starts_with("chdir failed: "));
    }

    #[test]
    fn test_exec_stage_codes() {
        assert_eq!(ExecStage::from_code(ExecStage::Chdir.code()), ExecStage::Chdir);
        assert_eq!(ExecStage::from_code(ExecStage::Exec.code()), ExecStage::Exec);
    }

    #[test]
    fn test_envp_overrides_inherited_values() {
        let config = LaunchConfig::new("/bin/true")
            .env("PATH", "/opt/override")
            .env("FLUORINE_TEST_VAR", "1");
        let envp = build_envp(&config).unwrap();
        let entries: Vec<String> = envp
            .iter()
            .map(|c| c.to_string_lossy().into_owned())
            .collect();

        assert!(entries.contains(&"PATH=/opt/override".to_string()));
        assert!(entries.contains(&"FLUORINE_TEST_VAR=1".to_string()));
        assert_eq!(entries.iter().filter(|e| e.starts_with("PATH=")).count(), 1);
    }

    #[test]
    fn test_envp_drops_unset_variables() {
        std::env::set_var("FLUORINE_UNSET_ME", "1");
        let config = LaunchConfig::new("/bin/true").unset_env("FLUORINE_UNSET_ME");
        let envp = build_envp(&config).unwrap();

        assert!(!envp
            .iter()
            .any(|c| c.to_string_lossy().starts_with("FLUORINE_UNSET_ME=")));
    }

    #[test]
    fn test_program_is_resolved_against_target_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fluorine-test-game");
        fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let not_executable = dir.path().join("readme");
        fs::write(&not_executable, "").unwrap();

        let config = LaunchConfig::new("fluorine-test-game")
            .env("PATH", format!("/nonexistent:{}", dir.path().display()));
        let search = target_search_path(&config);
        assert_eq!(resolve_program(&config.program, search.as_deref()), script);

        let search = Some(dir.path().as_os_str());
        assert_eq!(
            resolve_program(Path::new("readme"), search),
            dir.path().join("readme")
        );
        assert_eq!(
            resolve_program(Path::new("./fluorine-test-game"), search),
            PathBuf::from("./fluorine-test-game")
        );
    }

    #[test]
    fn test_program_missing_from_target_path_fails_exec() {
        // `sh` is on our PATH but not on the one the target gets.
        let dir = tempfile::tempdir().unwrap();
        let config = LaunchConfig::new("sh")
            .arg("-c")
            .arg("exit 0")
            .env("PATH", dir.path().to_string_lossy());
        match spawn_target(&config) {
            Err(SpawnError::Exec { stage, errno }) => {
                assert_eq!(stage, ExecStage::Exec);
                assert_eq!(errno, libc::ENOENT);
            }
            other => panic!("expected exec failure, got {:?}", other),
        }
    }

    #[test]
    fn test_path_override_selects_program() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fluorine-path-game");
        fs::write(&script, "#!/bin/sh\nexit 6\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let config = LaunchConfig::new("fluorine-path-game")
            .env("PATH", format!("{}:/usr/bin:/bin", dir.path().display()));
        let pid = spawn_target(&config).unwrap();
        let mut status = 0;
        // SAFETY: reaping our own child.
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
        assert_eq!(exit_code_from_wait_status(status), 6);
    }

    #[test]
    fn test_spawn_target_reports_exec_failure() {
        let config = LaunchConfig::new("/definitely/not/a/real/binary");
        match spawn_target(&config) {
            Err(SpawnError::Exec { stage, errno }) => {
                assert_eq!(stage, ExecStage::Exec);
                assert_eq!(errno, libc::ENOENT);
            }
            other => panic!("expected exec failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_spawn_target_reports_chdir_failure() {
        let config = LaunchConfig::new("/bin/true").working_dir(PathBuf::from("/no/such/dir"));
        match spawn_target(&config) {
            Err(SpawnError::Exec { stage, .. }) => assert_eq!(stage, ExecStage::Chdir),
            other => panic!("expected chdir failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_spawn_target_starts_session_leader() {
        let config = LaunchConfig::new("sleep").arg("2");
        let pid = spawn_target(&config).unwrap();

        // SAFETY: querying and signalling our own child.
        let pgid = unsafe { libc::getpgid(pid) };
        let _ = signal_process_group(pid, libc::SIGKILL);
        let mut status = 0;
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }

        assert_eq!(pgid, pid);
        assert_eq!(exit_code_from_wait_status(status), 128 + libc::SIGKILL);
    }

    fn supervisor() -> Supervisor<UnixStream, Vec<u8>> {
        let (input, _peer) = UnixStream::pair().unwrap();
        Supervisor::new(input, Vec::new())
    }

    #[test]
    fn test_kill_then_tree_exit_concludes_killed() {
        let mut sup = supervisor();
        assert_eq!(sup.state(), SupervisorState::AwaitingConfig);
        sup.transition(SupervisorState::Monitoring {
            pid: 4242,
            kill_requested: true,
        });

        sup.conclude(MonitorOutcome::TreeExited(143));

        assert_eq!(sup.state(), SupervisorState::Killed { code: 143 });
        assert_eq!(String::from_utf8_lossy(&sup.output), "exited 143\n");
    }

    #[test]
    fn test_natural_exit_and_quit_conclude_exited() {
        let mut sup = supervisor();
        sup.transition(SupervisorState::Monitoring {
            pid: 4242,
            kill_requested: false,
        });
        sup.conclude(MonitorOutcome::TreeExited(3));
        assert_eq!(sup.state(), SupervisorState::Exited { code: 3 });

        let mut sup = supervisor();
        sup.transition(SupervisorState::Monitoring {
            pid: 4242,
            kill_requested: true,
        });
        sup.conclude(MonitorOutcome::Quit(0));
        assert_eq!(sup.state(), SupervisorState::Exited { code: 0 });
        assert_eq!(String::from_utf8_lossy(&sup.output), "exited 0\n");
    }

    #[test]
    fn test_monitor_outcome_exit_code() {
        assert_eq!(MonitorOutcome::TreeExited(3).exit_code(), 3);
        assert_eq!(MonitorOutcome::Quit(0).exit_code(), 0);
    }
}
