use std::fs;
use std::path::PathBuf;

use walkdir::WalkDir;

use super::fs_ops::{live_path_for_backup, restore_backed_up_file, restore_backed_up_saves};
use super::{WinePrefix, SAVES_BACKUP_LOWER, SAVES_BACKUP_UPPER};
use crate::logging::{log_info, log_warning};

impl WinePrefix {
    /// Undo whatever an interrupted session left deployed.
    ///
    /// Every `*.mo2linux_backup` file under `drive_c` is moved back over its
    /// live path, and save backups in each "My Games" folder are moved back
    /// to `Saves`/`saves`. A live file next to a stale backup is assumed to
    /// be a deployed copy and is overwritten. Returns the number of records
    /// restored.
    pub fn restore_stale_backups(&self) -> usize {
        if !self.is_valid() {
            return 0;
        }

        let mut restored = 0;

        // Collect first; restoring renames entries under the walker.
        let backups: Vec<(PathBuf, PathBuf)> = WalkDir::new(self.drive_c())
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| !entry.file_type().is_dir())
            .filter_map(|entry| {
                let live = live_path_for_backup(entry.path())?;
                Some((entry.into_path(), live))
            })
            .collect();

        for (backup, live) in backups {
            log_info(&format!(
                "Restoring stale INI backup '{}' -> '{}'",
                backup.display(),
                live.display()
            ));
            match restore_backed_up_file(&live, &backup) {
                Ok(()) => restored += 1,
                Err(e) => log_warning(&format!(
                    "Failed to restore stale INI backup '{}': {}",
                    backup.display(),
                    e
                )),
            }
        }

        let Ok(games) = fs::read_dir(self.my_games_path()) else {
            return restored;
        };

        for game in games.flatten() {
            let game_root = game.path();
            if !game_root.is_dir() {
                continue;
            }
            let backup_upper = game_root.join(SAVES_BACKUP_UPPER);
            let backup_lower = game_root.join(SAVES_BACKUP_LOWER);
            if !backup_upper.is_dir() && !backup_lower.is_dir() {
                continue;
            }

            log_info(&format!(
                "Restoring stale save backups in '{}'",
                game_root.display()
            ));
            match restore_backed_up_saves(
                &game_root.join("Saves"),
                &game_root.join("saves"),
                &backup_upper,
                &backup_lower,
            ) {
                Ok(()) => restored += 1,
                Err(e) => log_warning(&format!(
                    "Failed to restore stale save backups in '{}': {}",
                    game_root.display(),
                    e
                )),
            }
        }

        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::test_support::{listing, prefix};

    #[test]
    fn test_interrupted_ini_deploy_is_recovered() {
        let (dir, prefix) = prefix();
        let game_root = prefix.my_games_path().join("Skyrim");
        fs::create_dir_all(&game_root).unwrap();
        let profile_ini = dir.path().join("Skyrim.ini");
        fs::write(&profile_ini, "profile").unwrap();
        let live = game_root.join("Skyrim.ini");
        fs::write(&live, "pre-deploy").unwrap();

        assert!(prefix.deploy_profile_ini(&profile_ini, &live));
        // Crash: the deployed copy vanished, only the backup remains.
        fs::remove_file(&live).unwrap();

        assert_eq!(prefix.restore_stale_backups(), 1);
        assert_eq!(fs::read_to_string(&live).unwrap(), "pre-deploy");
        assert!(!game_root.join("Skyrim.ini.mo2linux_backup").exists());

        // Running again finds nothing to do.
        assert_eq!(prefix.restore_stale_backups(), 0);
        assert_eq!(fs::read_to_string(&live).unwrap(), "pre-deploy");
    }

    #[test]
    fn test_stale_backup_overwrites_live_copy() {
        let (_dir, prefix) = prefix();
        let local = prefix.appdata_local().join("Fallout4");
        fs::create_dir_all(&local).unwrap();
        fs::write(local.join("Fallout4Custom.ini"), "deployed").unwrap();
        fs::write(local.join("Fallout4Custom.ini.mo2linux_backup"), "user").unwrap();

        assert_eq!(prefix.restore_stale_backups(), 1);
        assert_eq!(listing(&local), vec!["Fallout4Custom.ini"]);
        assert_eq!(
            fs::read_to_string(local.join("Fallout4Custom.ini")).unwrap(),
            "user"
        );
    }

    #[test]
    fn test_stale_save_backups_are_restored() {
        let (_dir, prefix) = prefix();
        let game_root = prefix.my_games_path().join("Starfield");
        fs::create_dir_all(game_root.join("Saves")).unwrap();
        fs::write(game_root.join("Saves/deployed.sfs"), "profile").unwrap();
        fs::create_dir_all(game_root.join(SAVES_BACKUP_UPPER)).unwrap();
        fs::write(game_root.join(SAVES_BACKUP_UPPER).join("mine.sfs"), "mine").unwrap();

        assert_eq!(prefix.restore_stale_backups(), 1);
        assert_eq!(listing(&game_root), vec!["Saves"]);
        assert_eq!(listing(&game_root.join("Saves")), vec!["mine.sfs"]);
    }

    #[test]
    fn test_invalid_prefix_restores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(WinePrefix::new(dir.path()).restore_stale_backups(), 0);
    }
}
