use std::fs;
use std::path::{Path, PathBuf};

use super::fs_ops::{copy_tree_contents, restore_backed_up_saves};
use super::{WinePrefix, SAVES_BACKUP_LOWER, SAVES_BACKUP_UPPER};
use crate::logging::{log_debug, log_error, log_info, log_warning};

const DEFAULT_SAVE_PATH: &str = "Saves";

/// Save subpath below the game's "My Games" folder: backslashes become
/// slashes and an empty value means `Saves`.
pub fn effective_save_path(save_relative_path: &str) -> String {
    let normalized = save_relative_path.replace('\\', "/");
    let normalized = normalized.trim();
    if normalized.is_empty() {
        DEFAULT_SAVE_PATH.to_string()
    } else {
        normalized.to_string()
    }
}

/// Live and backup save locations for one game.
struct SaveDirs {
    game_root: PathBuf,
    upper: PathBuf,
    lower: PathBuf,
    backup_upper: PathBuf,
    backup_lower: PathBuf,
}

impl SaveDirs {
    fn new(prefix: &WinePrefix, game_name: &str, save_relative_path: &str) -> Self {
        let game_root = prefix.my_games_path().join(game_name);
        let save_path = effective_save_path(save_relative_path);
        Self {
            upper: game_root.join(&save_path),
            lower: game_root.join(save_path.to_lowercase()),
            backup_upper: game_root.join(SAVES_BACKUP_UPPER),
            backup_lower: game_root.join(SAVES_BACKUP_LOWER),
            game_root,
        }
    }

    fn has_backup(&self) -> bool {
        self.backup_upper.is_dir() || self.backup_lower.is_dir()
    }
}

impl WinePrefix {
    /// Copy the profile's saves into the prefix.
    ///
    /// With `clear_destination`, the prefix's own saves are moved aside first
    /// (after recovering any backup an interrupted session left behind) so the
    /// game only sees the profile's saves.
    pub fn deploy_profile_saves(
        &self,
        profile_save_dir: &Path,
        game_name: &str,
        save_relative_path: &str,
        clear_destination: bool,
    ) -> bool {
        if !self.is_valid() {
            log_error(&format!(
                "deploy_profile_saves: prefix '{}' is not valid",
                self.root().display()
            ));
            return false;
        }

        log_debug(&format!(
            "deploy_profile_saves: profile_save_dir='{}', game_name='{}', save_relative_path='{}', clear_destination={}",
            profile_save_dir.display(),
            game_name,
            save_relative_path,
            clear_destination
        ));

        let dirs = SaveDirs::new(self, game_name, save_relative_path);

        if clear_destination {
            if dirs.has_backup() {
                log_info(&format!(
                    "Recovering save backup from an interrupted session in '{}'",
                    dirs.game_root.display()
                ));
                if let Err(e) = restore_backed_up_saves(
                    &dirs.upper,
                    &dirs.lower,
                    &dirs.backup_upper,
                    &dirs.backup_lower,
                ) {
                    log_error(&format!("deploy_profile_saves: recovery failed: {}", e));
                    return false;
                }
            }

            for (live, backup) in [
                (&dirs.upper, &dirs.backup_upper),
                (&dirs.lower, &dirs.backup_lower),
            ] {
                if live.is_dir() {
                    if let Err(e) = fs::rename(live, backup) {
                        log_error(&format!(
                            "deploy_profile_saves: failed to back up '{}': {}",
                            live.display(),
                            e
                        ));
                        return false;
                    }
                }
            }
        }

        if let Err(e) = fs::create_dir_all(&dirs.upper) {
            log_error(&format!(
                "deploy_profile_saves: failed to create '{}': {}",
                dirs.upper.display(),
                e
            ));
            return false;
        }

        if !profile_save_dir.is_dir() {
            return true;
        }

        match copy_tree_contents(profile_save_dir, &dirs.upper) {
            Ok(count) => {
                log_debug(&format!("deploy_profile_saves: copied {} save files", count));
                true
            }
            Err(e) => {
                log_error(&format!(
                    "deploy_profile_saves: failed copying '{}' -> '{}': {}",
                    profile_save_dir.display(),
                    dirs.upper.display(),
                    e
                ));
                false
            }
        }
    }

    /// Copy the session's saves back into the profile and put the prefix's
    /// own saves back in place.
    ///
    /// Restoration runs even if the copy failed; the result is `false` if
    /// either step failed.
    pub fn sync_saves_back(
        &self,
        profile_save_dir: &Path,
        game_name: &str,
        save_relative_path: &str,
    ) -> bool {
        if !self.is_valid() {
            log_error(&format!(
                "sync_saves_back: prefix '{}' is not valid",
                self.root().display()
            ));
            return false;
        }

        log_debug(&format!(
            "sync_saves_back: profile_save_dir='{}', game_name='{}', save_relative_path='{}'",
            profile_save_dir.display(),
            game_name,
            save_relative_path
        ));

        let dirs = SaveDirs::new(self, game_name, save_relative_path);

        let source = if dirs.upper.is_dir() {
            &dirs.upper
        } else if dirs.lower.is_dir() {
            &dirs.lower
        } else {
            return true;
        };

        if let Err(e) = fs::create_dir_all(profile_save_dir) {
            log_error(&format!(
                "sync_saves_back: failed to create '{}': {}",
                profile_save_dir.display(),
                e
            ));
            return false;
        }

        let copied = match copy_tree_contents(source, profile_save_dir) {
            Ok(_) => true,
            Err(e) => {
                log_warning(&format!(
                    "Failed syncing saves from '{}' to '{}': {}",
                    source.display(),
                    profile_save_dir.display(),
                    e
                ));
                false
            }
        };

        if let Err(e) = restore_backed_up_saves(
            &dirs.upper,
            &dirs.lower,
            &dirs.backup_upper,
            &dirs.backup_lower,
        ) {
            log_warning(&format!(
                "Failed restoring backed up saves in '{}': {}",
                dirs.game_root.display(),
                e
            ));
            return false;
        }

        copied
    }
}
