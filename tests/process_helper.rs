//! End-to-end tests driving the `fluorine-process-helper` binary over its
//! stdin/stdout line protocol.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use fluorine_compat::config::LaunchSettings;
use fluorine_compat::launcher::{self, LaunchStrategy};
use fluorine_compat::process::{process_group_exists, LaunchConfig, SupervisorClient};

fn helper_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fluorine-process-helper"))
}

struct Helper {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    _logs: tempfile::TempDir,
}

impl Helper {
    fn spawn() -> Self {
        let logs = tempfile::tempdir().unwrap();
        let mut child = Command::new(helper_path())
            .env("FLUORINE_LOG_DIR", logs.path())
            .env("FLUORINE_LOG_QUIET", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let stdin = child.stdin.take();
        let stdout = BufReader::new(child.stdout.take().unwrap());
        Self {
            child,
            stdin,
            stdout,
            _logs: logs,
        }
    }

    fn send(&mut self, text: &str) {
        let stdin = self.stdin.as_mut().unwrap();
        stdin.write_all(text.as_bytes()).unwrap();
        stdin.flush().unwrap();
    }

    fn start(config: &LaunchConfig) -> Self {
        let mut helper = Self::spawn();
        helper.send(&config.encode().unwrap());
        helper
    }

    fn line(&mut self) -> String {
        let mut line = String::new();
        self.stdout.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    fn started_pid(&mut self) -> i32 {
        let line = self.line();
        line.strip_prefix("started ")
            .unwrap_or_else(|| panic!("expected started, got '{}'", line))
            .parse()
            .unwrap()
    }

    fn close_stdin(&mut self) {
        self.stdin = None;
    }

    fn status(mut self) -> i32 {
        self.close_stdin();
        self.child.wait().unwrap().code().unwrap_or(-1)
    }
}

fn sh(script: &str) -> LaunchConfig {
    LaunchConfig::new("/bin/sh").arg("-c").arg(script)
}

#[test]
fn test_reports_exit_code() {
    let mut helper = Helper::start(&sh("exit 7"));
    let pid = helper.started_pid();
    assert!(pid > 0);
    assert_eq!(helper.line(), "exited 7");
    // The helper itself succeeded; the game's code travels in the report.
    assert_eq!(helper.status(), 0);
}

#[test]
fn test_kill_terminates_tree() {
    let mut helper = Helper::start(&LaunchConfig::new("sleep").arg("30"));
    let pid = helper.started_pid();

    helper.send("kill\n");
    assert_eq!(helper.line(), "exited 143");
    assert!(!process_group_exists(pid));
    assert_eq!(helper.status(), 0);
}

#[test]
fn test_exec_failure_is_reported() {
    let mut helper = Helper::start(&LaunchConfig::new("/nonexistent/game.exe"));
    let line = helper.line();
    assert!(line.starts_with("error exec failed"), "got '{}'", line);
    assert_eq!(helper.status(), 1);
}

#[test]
fn test_bad_working_dir_is_reported() {
    let mut helper = Helper::start(&sh("exit 0").working_dir("/nonexistent/dir"));
    let line = helper.line();
    assert!(line.starts_with("error chdir failed"), "got '{}'", line);
    assert_eq!(helper.status(), 1);
}

#[test]
fn test_missing_program_is_rejected() {
    let mut helper = Helper::spawn();
    helper.send("arg=--flag\n\n");
    assert_eq!(helper.line(), "error no program specified");
    assert_eq!(helper.status(), 1);
}

#[test]
fn test_stdin_closed_during_config() {
    let mut helper = Helper::spawn();
    helper.send("program=/bin/true\n");
    helper.close_stdin();
    let line = helper.line();
    assert!(
        line.starts_with("error stdin closed or timeout during config"),
        "got '{}'",
        line
    );
    assert_eq!(helper.status(), 1);
}

#[test]
fn test_waits_for_orphaned_grandchild() {
    let started = Instant::now();
    // The shell exits right away, its background child keeps the tree alive.
    let mut helper = Helper::start(&sh("sleep 1 & exit 0"));
    helper.started_pid();

    assert_eq!(helper.line(), "exited 0");
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(helper.status(), 0);
}

#[test]
fn test_environment_and_working_dir_reach_target() {
    let dir = tempfile::tempdir().unwrap();
    let config = sh("test \"$FLUORINE_TEST\" = yes && test \"$(pwd)\" = \"$EXPECTED\" && exit 5")
        .env("FLUORINE_TEST", "yes")
        .env(
            "EXPECTED",
            dir.path().canonicalize().unwrap().to_string_lossy(),
        )
        .working_dir(dir.path().canonicalize().unwrap());

    let mut helper = Helper::start(&config);
    helper.started_pid();
    assert_eq!(helper.line(), "exited 5");
}

#[test]
fn test_quit_leaves_game_running() {
    let mut helper = Helper::start(&LaunchConfig::new("sleep").arg("30"));
    let pid = helper.started_pid();

    helper.send("quit\n");
    assert_eq!(helper.line(), "exited 0");
    assert_eq!(helper.status(), 0);

    assert!(process_group_exists(pid));
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

#[test]
fn test_disconnect_terminates_game() {
    let mut helper = Helper::start(&LaunchConfig::new("sleep").arg("30"));
    let pid = helper.started_pid();

    helper.close_stdin();
    assert_eq!(helper.line(), "exited 143");
    assert!(!process_group_exists(pid));
}

#[test]
fn test_unknown_commands_are_ignored() {
    let mut helper = Helper::start(&sh("sleep 0.5; exit 2"));
    helper.started_pid();
    helper.send("bogus\n");
    assert_eq!(helper.line(), "exited 2");
}

// ============================================================================
// Launcher side
// ============================================================================

fn quiet_logs() -> tempfile::TempDir {
    let logs = tempfile::tempdir().unwrap();
    std::env::set_var("FLUORINE_LOG_DIR", logs.path());
    std::env::set_var("FLUORINE_LOG_QUIET", "1");
    logs
}

#[test]
fn test_client_reports_exit_code() {
    let _logs = quiet_logs();
    let mut client = SupervisorClient::start(&helper_path(), &sh("exit 4")).unwrap();
    assert!(client.pid() > 0);
    assert_eq!(client.wait().unwrap(), 4);
    assert_eq!(client.try_exit_code(), Some(4));
}

#[test]
fn test_client_kill() {
    let _logs = quiet_logs();
    let mut client =
        SupervisorClient::start(&helper_path(), &LaunchConfig::new("sleep").arg("30")).unwrap();
    assert_eq!(
        client.wait_timeout(Duration::from_millis(300)).unwrap(),
        None
    );
    client.kill().unwrap();
    assert_eq!(client.wait().unwrap(), 143);
}

#[test]
fn test_client_surfaces_rejection() {
    let _logs = quiet_logs();
    let result = SupervisorClient::start(&helper_path(), &LaunchConfig::new("/nonexistent/x"));
    match result {
        Err(e) => assert!(e.to_string().contains("exec failed"), "got '{}'", e),
        Ok(_) => panic!("launch of a missing program succeeded"),
    }
}

#[test]
fn test_dropping_client_stops_game() {
    let _logs = quiet_logs();
    let client =
        SupervisorClient::start(&helper_path(), &LaunchConfig::new("sleep").arg("30")).unwrap();
    let pid = client.pid();
    drop(client);

    let deadline = Instant::now() + Duration::from_secs(5);
    while process_group_exists(pid) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(!process_group_exists(pid));
}

fn helper_settings(helper: &Path) -> LaunchSettings {
    LaunchSettings {
        use_process_helper: Some(true),
        helper_path: Some(helper.to_path_buf()),
        ..Default::default()
    }
}

#[test]
fn test_launcher_runs_through_helper() {
    let _logs = quiet_logs();
    let settings = helper_settings(&helper_path());
    let mut game = launcher::launch(&sh("exit 9"), &settings).unwrap();

    assert!(game.is_supervised());
    assert_eq!(game.strategy, LaunchStrategy::Direct);
    assert_eq!(game.wait().unwrap(), 9);
}

#[test]
fn test_launcher_kill_through_helper() {
    let _logs = quiet_logs();
    let settings = helper_settings(&helper_path());
    let mut game = launcher::launch(&LaunchConfig::new("sleep").arg("30"), &settings).unwrap();

    game.kill().unwrap();
    assert_eq!(game.wait().unwrap(), 143);
}
