//! Fluorine - Linux compatibility layer command-line front end.
//!
//! Launches games through UMU/Proton/the process helper and maintains the
//! Wine prefix around a session.

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use fluorine_compat::config::LaunchSettings;
use fluorine_compat::ini_writer::{write_ini_value_with_policy, ReadOnlyPolicy};
use fluorine_compat::launcher;
use fluorine_compat::logging::{init_logger, log_error, log_info, log_warning};
use fluorine_compat::prefix::WinePrefix;
use fluorine_compat::process::LaunchConfig;
use fluorine_compat::session::{GameSession, SessionSpec};

#[derive(Parser)]
#[command(name = "fluorine")]
#[command(about = "Run Windows games and tools under Proton with profile-aware prefixes")]
#[command(version)]
struct Cli {
    /// Launch settings file (defaults to launch_settings.json in the data dir)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a program and wait for its whole process tree
    Launch {
        /// Working directory for the program
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Extra environment variable, KEY=VALUE (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Program followed by its arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Run a full session described by a JSON file
    Session { spec: PathBuf },
    /// Restore backups an interrupted session left in a prefix
    RestoreBackups { prefix: PathBuf },
    /// Write Plugins.txt/loadorder.txt from a plugin list file
    DeployPlugins {
        prefix: PathBuf,
        /// Folder under AppData/Local, e.g. "Skyrim Special Edition"
        #[arg(long)]
        data_dir: String,
        /// One plugin per line, enabled ones prefixed with '*'
        plugins: PathBuf,
    },
    /// Copy INIs the game wrote back to the profile
    SyncInis {
        prefix: PathBuf,
        /// PROFILE_INI=PREFIX_INI (repeatable)
        #[arg(long = "map", value_name = "PROFILE=PREFIX", required = true)]
        mappings: Vec<String>,
    },
    /// Set one INI value, preserving the rest of the file
    WriteIni {
        file: PathBuf,
        section: String,
        key: String,
        value: String,
        /// What to do if the file is read-only
        #[arg(long, value_enum, default_value_t = ReadOnlyArg::Skip)]
        read_only: ReadOnlyArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReadOnlyArg {
    Clear,
    Once,
    Skip,
}

impl From<ReadOnlyArg> for ReadOnlyPolicy {
    fn from(arg: ReadOnlyArg) -> Self {
        match arg {
            ReadOnlyArg::Clear => ReadOnlyPolicy::ClearFlag,
            ReadOnlyArg::Once => ReadOnlyPolicy::AllowOnce,
            ReadOnlyArg::Skip => ReadOnlyPolicy::Skip,
        }
    }
}

fn main() {
    init_logger("fluorine");
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log_error(&e.to_string());
            std::process::exit(1);
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> LaunchSettings {
    match path {
        Some(path) => LaunchSettings::load_from(path),
        None => LaunchSettings::load(),
    }
}

/// Flag set by Ctrl-C; the waiting loop turns it into a `kill`.
fn install_cancel_handler() -> Result<Arc<AtomicBool>, Box<dyn Error>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(cancel)
}

fn split_pair(raw: &str) -> Result<(String, String), Box<dyn Error>> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw).into())
}

fn run(cli: Cli) -> Result<i32, Box<dyn Error>> {
    let settings = load_settings(cli.settings.as_ref());

    match cli.command {
        Commands::Launch {
            workdir,
            env,
            command,
        } => {
            let (program, args) = command
                .split_first()
                .ok_or("no program given")?;
            let mut config = LaunchConfig::new(program).args(args.iter().cloned());
            for pair in &env {
                let (key, value) = split_pair(pair)?;
                config = config.env(key, value);
            }
            config.working_dir = workdir;

            let cancel = install_cancel_handler()?;
            let mut game = launcher::launch(&config, &settings)?;
            log_info(&format!("Started pid {} via {}", game.pid(), game.strategy));

            let mut kill_sent = false;
            loop {
                if !kill_sent && cancel.load(Ordering::SeqCst) {
                    if let Err(e) = game.kill() {
                        log_warning(&format!("Failed to terminate game: {}", e));
                    }
                    kill_sent = true;
                }
                if let Some(code) = game.wait_timeout(Duration::from_millis(250))? {
                    log_info(&format!("Game exited with code {}", code));
                    return Ok(code);
                }
            }
        }
        Commands::Session { spec } => {
            let spec = SessionSpec::load(&spec)?;
            let cancel = install_cancel_handler()?;
            let outcome = GameSession::new(spec, settings).run(&cancel)?;

            if !outcome.deployed || !outcome.synced_back {
                log_warning(&format!(
                    "Session finished with problems (deployed: {}, synced back: {})",
                    outcome.deployed, outcome.synced_back
                ));
                return Ok(1);
            }
            Ok(outcome.exit_code.unwrap_or(1))
        }
        Commands::RestoreBackups { prefix } => {
            let prefix = WinePrefix::new(prefix);
            if !prefix.is_valid() {
                return Err(format!("'{}' is not a Wine prefix", prefix.root().display()).into());
            }
            let restored = prefix.restore_stale_backups();
            log_info(&format!("Restored {} stale backups", restored));
            Ok(0)
        }
        Commands::DeployPlugins {
            prefix,
            data_dir,
            plugins,
        } => {
            let list: Vec<String> = fs::read_to_string(&plugins)?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect();
            let ok = WinePrefix::new(prefix).deploy_plugins(&list, &data_dir);
            Ok(if ok { 0 } else { 1 })
        }
        Commands::SyncInis { prefix, mappings } => {
            let pairs = mappings
                .iter()
                .map(|raw| split_pair(raw).map(|(p, x)| (PathBuf::from(p), PathBuf::from(x))))
                .collect::<Result<Vec<_>, _>>()?;
            let ok = WinePrefix::new(prefix).sync_profile_inis_back(&pairs);
            Ok(if ok { 0 } else { 1 })
        }
        Commands::WriteIni {
            file,
            section,
            key,
            value,
            read_only,
        } => {
            let written =
                write_ini_value_with_policy(&section, &key, &value, &file, |_| read_only.into())?;
            if !written {
                log_warning(&format!("Skipped read-only file {}", file.display()));
            }
            Ok(0)
        }
    }
}
