//! Launch dispatch: UMU -> Proton -> direct, optionally through the process helper.
//!
//! Each strategy first turns the game's [`LaunchConfig`] into a [`LaunchPlan`]
//! (program, argv, environment). The plan is then either handed to the
//! out-of-process supervisor or spawned here in its own process group.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::config::LaunchSettings;
use crate::logging::{log_error, log_info, log_warning};
use crate::paths;
use crate::process::client::{SupervisorClient, SupervisorError};
use crate::process::{
    exit_code_from_status, process_group_exists, signal_process_group, LaunchConfig,
    ProcessHandle,
};
use crate::runtime_wrap::{self, UmuSource};
use crate::steam;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum LaunchError {
    ExeNotFound(PathBuf),
    HelperNotFound,
    InvalidWrapper(String),
    Helper(SupervisorError),
    Spawn(io::Error),
    AllStrategiesFailed(Vec<String>),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::ExeNotFound(p) => write!(f, "Executable not found: {}", p.display()),
            LaunchError::HelperNotFound => write!(
                f,
                "Process helper '{}' not found next to the application",
                paths::PROCESS_HELPER_NAME
            ),
            LaunchError::InvalidWrapper(e) => write!(f, "Invalid wrapper command: {}", e),
            LaunchError::Helper(e) => write!(f, "{}", e),
            LaunchError::Spawn(e) => write!(f, "Failed to spawn game: {}", e),
            LaunchError::AllStrategiesFailed(reasons) => {
                write!(f, "All launch strategies failed: {}", reasons.join("; "))
            }
        }
    }
}

impl std::error::Error for LaunchError {}

impl From<SupervisorError> for LaunchError {
    fn from(e: SupervisorError) -> Self {
        LaunchError::Helper(e)
    }
}

impl From<io::Error> for LaunchError {
    fn from(e: io::Error) -> Self {
        LaunchError::Spawn(e)
    }
}

// ============================================================================
// Strategies & Plans
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStrategy {
    Umu(UmuSource),
    Proton(PathBuf),
    Direct,
}

impl fmt::Display for LaunchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchStrategy::Umu(UmuSource::System(p)) => write!(f, "umu-run (system, {})", p.display()),
            LaunchStrategy::Umu(UmuSource::Bundled(p)) => {
                write!(f, "umu-run (bundled, {})", p.display())
            }
            LaunchStrategy::Proton(p) => write!(f, "proton ({})", p.display()),
            LaunchStrategy::Direct => write!(f, "direct"),
        }
    }
}

/// Fully resolved command line and environment for one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub strategy: LaunchStrategy,
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchPlan {
    /// Prepend `wrapper` (e.g. `gamemoderun mangohud`) to the command line.
    pub fn wrap(mut self, wrapper: &[String]) -> Self {
        let Some((first, rest)) = wrapper.split_first() else {
            return self;
        };
        let mut args: Vec<OsString> = rest.iter().map(OsString::from).collect();
        args.push(std::mem::replace(&mut self.program, OsString::from(first)));
        args.append(&mut self.args);
        self.args = args;
        self
    }

    /// Flattened argv, `program` first.
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv = vec![self.program.clone()];
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Strategies to try, in order.
pub fn strategy_order(settings: &LaunchSettings) -> Vec<LaunchStrategy> {
    let mut order = Vec::new();

    if settings.use_umu {
        match runtime_wrap::resolve_umu_run(settings.prefer_system_umu) {
            Some(source) => order.push(LaunchStrategy::Umu(source)),
            None => log_warning("UMU requested but umu-run was not found, falling back"),
        }
    }
    if let Some(proton) = &settings.proton_path {
        order.push(LaunchStrategy::Proton(proton.clone()));
    }
    order.push(LaunchStrategy::Direct);
    order
}

fn game_args(config: &LaunchConfig) -> Vec<OsString> {
    let mut args = vec![config.program.clone().into_os_string()];
    args.extend(config.args.iter().map(OsString::from));
    args
}

fn steam_ids(env: &mut BTreeMap<String, String>, settings: &LaunchSettings) {
    if let Some(id) = settings.steam_app_id {
        env.insert("SteamAppId".to_string(), id.to_string());
        env.insert("SteamGameId".to_string(), id.to_string());
    }
}

/// Layer the user's and the game's environment over the strategy's.
fn merge_env(
    mut base: BTreeMap<String, String>,
    settings: &LaunchSettings,
    config: &LaunchConfig,
) -> BTreeMap<String, String> {
    base.extend(settings.env_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
    base.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    base
}

/// Build the plan for `strategy`. Errors are human-readable reasons.
pub fn build_plan(
    strategy: &LaunchStrategy,
    config: &LaunchConfig,
    settings: &LaunchSettings,
) -> Result<LaunchPlan, String> {
    let mut env = BTreeMap::new();

    let (program, args) = match strategy {
        LaunchStrategy::Umu(source) => {
            if let Some(prefix) = settings.wine_prefix() {
                env.insert("WINEPREFIX".to_string(), prefix.to_string_lossy().to_string());
            }
            if let Some(proton) = &settings.proton_path {
                env.insert("PROTONPATH".to_string(), proton.to_string_lossy().to_string());
            }
            let game_id = settings
                .steam_app_id
                .map(|id| format!("umu-{}", id))
                .unwrap_or_else(|| "umu-0".to_string());
            env.insert("GAMEID".to_string(), game_id);
            steam_ids(&mut env, settings);

            (source.path().as_os_str().to_os_string(), game_args(config))
        }
        LaunchStrategy::Proton(proton_dir) => {
            let proton = proton_dir.join("proton");
            if !proton.is_file() {
                return Err(format!("proton script not found at {}", proton.display()));
            }
            let (Some(compat_data), Some(prefix)) =
                (settings.compat_data_path(), settings.wine_prefix())
            else {
                return Err("proton launch needs a prefix path".to_string());
            };

            env.insert(
                "STEAM_COMPAT_DATA_PATH".to_string(),
                compat_data.to_string_lossy().to_string(),
            );
            env.insert("WINEPREFIX".to_string(), prefix.to_string_lossy().to_string());
            if let Some(steam_path) = steam::find_steam_path() {
                env.insert(
                    "STEAM_COMPAT_CLIENT_INSTALL_PATH".to_string(),
                    steam_path.to_string_lossy().to_string(),
                );
            }
            let mounts = steam::detect_extra_mounts();
            if !mounts.is_empty() {
                env.insert("STEAM_COMPAT_MOUNTS".to_string(), mounts.join(":"));
            }
            steam_ids(&mut env, settings);

            let mut args = vec![OsString::from("run")];
            args.extend(game_args(config));
            (proton.into_os_string(), args)
        }
        LaunchStrategy::Direct => (
            config.program.clone().into_os_string(),
            config.args.iter().map(OsString::from).collect(),
        ),
    };

    Ok(LaunchPlan {
        strategy: strategy.clone(),
        program,
        args,
        env: merge_env(env, settings, config),
        working_dir: config.working_dir.clone(),
    })
}

// ============================================================================
// Running Game
// ============================================================================

enum GameProcess {
    Direct {
        child: Child,
        exit_code: Option<i32>,
    },
    Supervised(SupervisorClient),
}

/// A started game. Dropping it while supervised tears the game down.
pub struct RunningGame {
    pub handle: ProcessHandle,
    pub strategy: LaunchStrategy,
    process: GameProcess,
}

impl RunningGame {
    pub fn pid(&self) -> i32 {
        self.handle.pid
    }

    pub fn is_supervised(&self) -> bool {
        matches!(self.process, GameProcess::Supervised(_))
    }

    /// Ask the whole game tree to terminate. Fire-and-forget.
    pub fn kill(&mut self) -> io::Result<()> {
        log_info(&format!("Terminating game process group {}", self.handle.pid));
        match &mut self.process {
            GameProcess::Direct { .. } => signal_process_group(self.handle.pid, libc::SIGTERM),
            GameProcess::Supervised(client) => client.kill(),
        }
    }

    /// Wait up to `timeout` for the whole tree to exit.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<i32>, LaunchError> {
        let pid = self.handle.pid;
        match &mut self.process {
            GameProcess::Supervised(client) => Ok(client.wait_timeout(timeout)?),
            GameProcess::Direct { child, exit_code } => {
                if exit_code.is_none() {
                    *exit_code = child.wait_timeout(timeout)?.map(|s| exit_code_from_status(&s));
                    if exit_code.is_none() {
                        return Ok(None);
                    }
                } else if process_group_exists(pid) {
                    std::thread::sleep(timeout);
                }
                // Wrapper chains leave the real game running in our group.
                if process_group_exists(pid) {
                    Ok(None)
                } else {
                    Ok(*exit_code)
                }
            }
        }
    }

    /// Block until the whole tree exited.
    pub fn wait(&mut self) -> Result<i32, LaunchError> {
        if let GameProcess::Supervised(client) = &mut self.process {
            return Ok(client.wait()?);
        }
        loop {
            if let Some(code) = self.wait_timeout(Duration::from_millis(250))? {
                return Ok(code);
            }
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

fn resolve_executable(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }
    runtime_wrap::find_in_path(&program.to_string_lossy())
}

/// `Command` that runs `plan` on the host. Inside Flatpak the environment and
/// working directory have to be passed through `flatpak-spawn` explicitly.
fn host_command(plan: &LaunchPlan, steam_run: bool) -> Command {
    if runtime_wrap::is_flatpak() && !steam_run && !runtime_wrap::use_steam_run() {
        let mut cmd = Command::new("flatpak-spawn");
        cmd.arg("--host");
        for (key, value) in &plan.env {
            cmd.arg(format!("--env={}={}", key, value));
        }
        if let Some(dir) = &plan.working_dir {
            cmd.arg(format!("--directory={}", dir.display()));
        }
        cmd.arg(&plan.program).args(&plan.args);
        return cmd;
    }

    let mut cmd = runtime_wrap::command_for(&plan.program, steam_run);
    cmd.args(&plan.args).envs(&plan.env);
    if let Some(dir) = &plan.working_dir {
        cmd.current_dir(dir);
    }
    cmd
}

fn spawn_direct(plan: &LaunchPlan, settings: &LaunchSettings) -> io::Result<Child> {
    host_command(plan, settings.use_steam_run)
        .stdin(Stdio::null())
        .process_group(0)
        .spawn()
}

/// The helper's view of a plan. The helper already runs on the host, so only
/// `steam-run` is applied here, never the Flatpak portal.
pub fn helper_config(plan: &LaunchPlan, steam_run: bool) -> LaunchConfig {
    let mut argv = plan.argv();
    if steam_run {
        argv.insert(0, OsString::from("steam-run"));
    }
    let mut argv = argv.into_iter().map(|a| a.to_string_lossy().into_owned());

    let mut config = LaunchConfig::new(argv.next().unwrap_or_default());
    config.args = argv.collect();
    config.env = plan.env.clone();
    config.working_dir = plan.working_dir.clone();
    config
}

fn start_plan(
    plan: &LaunchPlan,
    settings: &LaunchSettings,
    helper: Option<&Path>,
) -> Result<RunningGame, LaunchError> {
    let steam_run = settings.use_steam_run || runtime_wrap::use_steam_run();

    let (pid, process) = match helper {
        Some(helper) => {
            let client = SupervisorClient::start(helper, &helper_config(plan, steam_run))?;
            (client.pid(), GameProcess::Supervised(client))
        }
        None => {
            let child = spawn_direct(plan, settings)?;
            (
                child.id() as i32,
                GameProcess::Direct {
                    child,
                    exit_code: None,
                },
            )
        }
    };

    Ok(RunningGame {
        handle: ProcessHandle::new(pid),
        strategy: plan.strategy.clone(),
        process,
    })
}

/// Start `config` using the first strategy that works.
pub fn launch(config: &LaunchConfig, settings: &LaunchSettings) -> Result<RunningGame, LaunchError> {
    if resolve_executable(&config.program).is_none() {
        log_error(&format!("Executable not found: {}", config.program.display()));
        return Err(LaunchError::ExeNotFound(config.program.clone()));
    }

    let wrapper = shell_words::split(&settings.wrapper_commands)
        .map_err(|e| LaunchError::InvalidWrapper(e.to_string()))?;

    let helper = if settings.process_helper_enabled() {
        match settings.helper_path.clone().or_else(paths::process_helper_path) {
            Some(path) => Some(path),
            None => return Err(LaunchError::HelperNotFound),
        }
    } else {
        None
    };

    let mut failures = Vec::new();
    for strategy in strategy_order(settings) {
        let plan = match build_plan(&strategy, config, settings) {
            Ok(plan) => plan.wrap(&wrapper),
            Err(reason) => {
                log_warning(&format!("Skipping {}: {}", strategy, reason));
                failures.push(format!("{}: {}", strategy, reason));
                continue;
            }
        };

        if !matches!(strategy, LaunchStrategy::Direct) && settings.steam_app_id.is_some() {
            steam::ensure_steam_running();
        }

        log_info(&format!(
            "Launching {} via {}{}",
            config.program.display(),
            strategy,
            if helper.is_some() { " (process helper)" } else { "" }
        ));

        match start_plan(&plan, settings, helper.as_deref()) {
            Ok(game) => {
                log_info(&format!("Game started with pid {}", game.pid()));
                return Ok(game);
            }
            Err(e) => {
                log_warning(&format!("{} failed: {}", strategy, e));
                failures.push(format!("{}: {}", strategy, e));
            }
        }
    }

    log_error("All launch strategies failed");
    Err(LaunchError::AllStrategiesFailed(failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn direct_only() -> LaunchSettings {
        LaunchSettings {
            use_process_helper: Some(false),
            ..Default::default()
        }
    }

    #[test]
    fn test_strategy_order_without_runtime_is_direct() {
        assert_eq!(strategy_order(&direct_only()), vec![LaunchStrategy::Direct]);

        let settings = LaunchSettings {
            proton_path: Some(PathBuf::from("/opt/proton")),
            ..direct_only()
        };
        assert_eq!(
            strategy_order(&settings),
            vec![
                LaunchStrategy::Proton(PathBuf::from("/opt/proton")),
                LaunchStrategy::Direct
            ]
        );
    }

    #[test]
    fn test_proton_plan_environment() {
        let dir = tempfile::tempdir().unwrap();
        let proton_dir = dir.path().join("GE-Proton9");
        fs::create_dir_all(&proton_dir).unwrap();
        fs::write(proton_dir.join("proton"), "#!/bin/sh\n").unwrap();
        let compat = dir.path().join("compatdata");
        fs::create_dir_all(compat.join("pfx")).unwrap();

        let mut settings = LaunchSettings {
            proton_path: Some(proton_dir.clone()),
            prefix_path: Some(compat.clone()),
            steam_app_id: Some(489830),
            ..direct_only()
        };
        settings
            .env_vars
            .insert("DXVK_HUD".to_string(), "fps".to_string());

        let config = LaunchConfig::new("/games/SkyrimSE.exe")
            .arg("-skipintro")
            .env("DXVK_HUD", "full");
        let plan = build_plan(&LaunchStrategy::Proton(proton_dir.clone()), &config, &settings)
            .unwrap();

        assert_eq!(plan.program, proton_dir.join("proton").into_os_string());
        assert_eq!(plan.args, vec!["run", "/games/SkyrimSE.exe", "-skipintro"]);
        assert_eq!(
            plan.env["STEAM_COMPAT_DATA_PATH"],
            compat.to_string_lossy().to_string()
        );
        assert_eq!(
            plan.env["WINEPREFIX"],
            compat.join("pfx").to_string_lossy().to_string()
        );
        assert_eq!(plan.env["SteamAppId"], "489830");
        // the game's own override wins over user settings
        assert_eq!(plan.env["DXVK_HUD"], "full");
    }

    #[test]
    fn test_proton_plan_requires_script_and_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = LaunchConfig::new("/games/game.exe");
        let settings = direct_only();

        assert!(build_plan(&LaunchStrategy::Proton(dir.path().to_path_buf()), &config, &settings)
            .is_err());

        fs::write(dir.path().join("proton"), "").unwrap();
        let err = build_plan(&LaunchStrategy::Proton(dir.path().to_path_buf()), &config, &settings)
            .unwrap_err();
        assert!(err.contains("prefix"));
    }

    #[test]
    fn test_umu_plan_sets_game_id() {
        let config = LaunchConfig::new("/games/FalloutNV.exe");
        let settings = LaunchSettings {
            steam_app_id: Some(22380),
            ..direct_only()
        };
        let source = UmuSource::System(PathBuf::from("/usr/bin/umu-run"));
        let plan = build_plan(&LaunchStrategy::Umu(source), &config, &settings).unwrap();

        assert_eq!(plan.program, OsString::from("/usr/bin/umu-run"));
        assert_eq!(plan.args, vec!["/games/FalloutNV.exe"]);
        assert_eq!(plan.env["GAMEID"], "umu-22380");
        assert!(!plan.env.contains_key("WINEPREFIX"));
    }

    #[test]
    fn test_wrapper_and_helper_config() {
        let config = LaunchConfig::new("/games/game.exe")
            .arg("-x")
            .working_dir("/games");
        let plan = build_plan(&LaunchStrategy::Direct, &config, &direct_only())
            .unwrap()
            .wrap(&shell_words::split("gamemoderun mangohud --dlsym").unwrap());

        assert_eq!(plan.program, OsString::from("gamemoderun"));
        assert_eq!(
            plan.args,
            vec!["mangohud", "--dlsym", "/games/game.exe", "-x"]
        );

        let helper = helper_config(&plan, true);
        assert_eq!(helper.program, PathBuf::from("steam-run"));
        assert_eq!(
            helper.args,
            vec!["gamemoderun", "mangohud", "--dlsym", "/games/game.exe", "-x"]
        );
        assert_eq!(helper.working_dir, Some(PathBuf::from("/games")));
    }

    #[test]
    fn test_missing_executable_is_rejected() {
        let config = LaunchConfig::new("/no/such/game.exe");
        assert!(matches!(
            launch(&config, &direct_only()),
            Err(LaunchError::ExeNotFound(_))
        ));
    }

    #[test]
    fn test_direct_launch_reports_exit_code() {
        let config = LaunchConfig::new("/bin/sh").args(["-c", "exit 3"]);
        let mut game = launch(&config, &direct_only()).unwrap();
        assert_eq!(game.strategy, LaunchStrategy::Direct);
        assert!(!game.is_supervised());
        assert_eq!(game.wait().unwrap(), 3);
    }

    #[test]
    fn test_direct_kill_terminates_group() {
        let config = LaunchConfig::new("/bin/sh").args(["-c", "sleep 30; exit 0"]);
        let mut game = launch(&config, &direct_only()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        game.kill().unwrap();
        assert_eq!(game.wait().unwrap(), 128 + libc::SIGTERM);
    }

    #[test]
    fn test_unrunnable_executable_fails_all_strategies() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("game.exe");
        fs::write(&exe, "MZ").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o644)).unwrap();

        match launch(&LaunchConfig::new(&exe), &direct_only()) {
            Err(LaunchError::AllStrategiesFailed(reasons)) => {
                assert_eq!(reasons.len(), 1);
                assert!(reasons[0].starts_with("direct"));
            }
            other => panic!("expected aggregate failure, got {:?}", other.map(|g| g.pid())),
        }
    }

    #[test]
    fn test_invalid_wrapper_is_rejected() {
        let settings = LaunchSettings {
            wrapper_commands: "gamemoderun 'unterminated".to_string(),
            ..direct_only()
        };
        assert!(matches!(
            launch(&LaunchConfig::new("/bin/true"), &settings),
            Err(LaunchError::InvalidWrapper(_))
        ));
    }
}
