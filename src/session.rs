//! One game session: recover, deploy, launch, wait, sync back.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::LaunchSettings;
use crate::launcher::{self, LaunchError, LaunchStrategy};
use crate::logging::{log_error, log_info, log_warning};
use crate::prefix::WinePrefix;
use crate::process::LaunchConfig;

const WAIT_TICK: Duration = Duration::from_millis(250);

// ============================================================================
// Session Description
// ============================================================================

/// A profile INI and where the game expects it inside the prefix.
///
/// A relative `profile` path is taken relative to the profile's settings
/// directory, a relative `prefix` path relative to the game's "My Games" folder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IniMapping {
    pub profile: PathBuf,
    pub prefix: PathBuf,
}

/// The parts of a mod-manager profile the session needs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ProfileInfo {
    /// Profile-specific INIs are deployed only when set
    pub local_settings: bool,
    /// Profile-specific saves are deployed only when set
    pub local_saves: bool,
    pub settings_dir: Option<PathBuf>,
    pub save_dir: Option<PathBuf>,
}

/// Everything needed to run one session, loadable from JSON.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSpec {
    /// Wine prefix (the directory holding `drive_c`)
    pub prefix: PathBuf,
    /// Folder name under "My Games"
    pub game_name: String,
    /// Folder name under `AppData/Local` holding `Plugins.txt`
    pub data_dir_name: String,
    /// Load order, enabled entries prefixed with `*`
    pub plugins: Vec<String>,
    pub profile: ProfileInfo,
    pub ini_mappings: Vec<IniMapping>,
    /// Save folder below the game's "My Games" folder, default `Saves`
    pub save_subpath: String,
    /// Move the prefix's own saves aside while the profile's are deployed
    pub clear_saves: bool,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl SessionSpec {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn launch_config(&self) -> LaunchConfig {
        let mut config = LaunchConfig::new(&self.program).args(self.args.iter().cloned());
        config.env = self.env.clone();
        config.working_dir = self.working_dir.clone();
        config
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub strategy: Option<LaunchStrategy>,
    pub exit_code: Option<i32>,
    pub deployed: bool,
    pub synced_back: bool,
}

// ============================================================================
// Game Session
// ============================================================================

pub struct GameSession {
    spec: SessionSpec,
    settings: LaunchSettings,
    prefix: WinePrefix,
}

impl GameSession {
    pub fn new(spec: SessionSpec, settings: LaunchSettings) -> Self {
        let prefix = WinePrefix::new(&spec.prefix);
        Self {
            spec,
            settings,
            prefix,
        }
    }

    pub fn prefix(&self) -> &WinePrefix {
        &self.prefix
    }

    /// `(profile, prefix)` INI pairs with relative paths resolved.
    pub fn ini_pairs(&self) -> Vec<(PathBuf, PathBuf)> {
        let game_root = self.prefix.my_games_path().join(&self.spec.game_name);
        let settings_dir = self.spec.profile.settings_dir.as_deref();
        self.spec
            .ini_mappings
            .iter()
            .map(|m| {
                let profile = match settings_dir {
                    Some(dir) if m.profile.is_relative() => dir.join(&m.profile),
                    _ => m.profile.clone(),
                };
                let target = if m.prefix.is_absolute() {
                    m.prefix.clone()
                } else {
                    game_root.join(&m.prefix)
                };
                (profile, target)
            })
            .collect()
    }

    fn save_dir(&self) -> Option<&Path> {
        if !self.spec.profile.local_saves {
            return None;
        }
        self.spec.profile.save_dir.as_deref()
    }

    /// Put the profile's state into the prefix. Stops at the first failure.
    pub fn deploy(&self) -> bool {
        let restored = self.prefix.restore_stale_backups();
        if restored > 0 {
            log_info(&format!(
                "Recovered {} stale backups from an interrupted session",
                restored
            ));
        }

        if !self.spec.plugins.is_empty()
            && !self
                .prefix
                .deploy_plugins(&self.spec.plugins, &self.spec.data_dir_name)
        {
            return false;
        }

        if self.spec.profile.local_settings {
            for (profile_ini, prefix_ini) in self.ini_pairs() {
                if !self.prefix.deploy_profile_ini(&profile_ini, &prefix_ini) {
                    log_error(&format!(
                        "Failed to deploy profile INI '{}'",
                        profile_ini.display()
                    ));
                    return false;
                }
            }
        }

        if let Some(save_dir) = self.save_dir() {
            if !self.prefix.deploy_profile_saves(
                save_dir,
                &self.spec.game_name,
                &self.spec.save_subpath,
                self.spec.clear_saves,
            ) {
                return false;
            }
        }

        true
    }

    /// Pull the session's state back into the profile and restore the prefix.
    /// Every step runs even if an earlier one failed.
    pub fn sync_back(&self) -> bool {
        let mut ok = true;

        if let Some(save_dir) = self.save_dir() {
            if !self
                .prefix
                .sync_saves_back(save_dir, &self.spec.game_name, &self.spec.save_subpath)
            {
                log_warning("Failed to sync saves back to the profile");
                ok = false;
            }
        }

        if self.spec.profile.local_settings && !self.prefix.sync_profile_inis_back(&self.ini_pairs())
        {
            log_warning("Failed to sync one or more profile INIs back");
            ok = false;
        }

        ok
    }

    /// Run the whole session. Setting `cancel` asks the game to terminate;
    /// the session still waits for it and syncs back.
    pub fn run(&self, cancel: &AtomicBool) -> Result<SessionOutcome, LaunchError> {
        let mut outcome = SessionOutcome {
            strategy: None,
            exit_code: None,
            deployed: self.deploy(),
            synced_back: false,
        };

        if !outcome.deployed {
            log_error("Deploy failed, not launching");
            outcome.synced_back = self.sync_back();
            return Ok(outcome);
        }

        let mut game = match launcher::launch(&self.spec.launch_config(), &self.settings) {
            Ok(game) => game,
            Err(e) => {
                log_error(&format!("Launch failed: {}", e));
                if !self.sync_back() {
                    log_warning("Sync back after failed launch did not complete cleanly");
                }
                return Err(e);
            }
        };
        outcome.strategy = Some(game.strategy.clone());

        let mut kill_sent = false;
        let exit_code = loop {
            if !kill_sent && cancel.load(Ordering::SeqCst) {
                if let Err(e) = game.kill() {
                    log_warning(&format!("Failed to terminate game: {}", e));
                }
                kill_sent = true;
            }
            match game.wait_timeout(WAIT_TICK) {
                Ok(Some(code)) => break Some(code),
                Ok(None) => {}
                Err(e) => {
                    log_error(&format!("Lost track of the game: {}", e));
                    break None;
                }
            }
        };

        log_info(&format!(
            "Game exited with code {:?} after {}s",
            exit_code,
            (Local::now() - game.handle.launched_at).num_seconds()
        ));
        outcome.exit_code = exit_code;
        outcome.synced_back = self.sync_back();
        Ok(outcome)
    }
}
