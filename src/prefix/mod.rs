//! Wine prefix synchronization.
//!
//! Moves a profile's plugin lists, INIs and saves into a compatibility prefix
//! before a session and reconciles them back afterwards. Anything the deploy
//! step displaces is renamed to a backup name; the presence of such a backup
//! on disk is the only record that a restore is still owed, so a crash at any
//! point leaves the prefix recoverable by [`WinePrefix::restore_stale_backups`].

pub mod fs_ops;
mod ini;
mod plugins;
mod recovery;
mod saves;

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::logging::log_debug;

pub use saves::effective_save_path;

/// Suffix appended to a displaced INI (or any file) while a session runs.
pub const BACKUP_SUFFIX: &str = ".mo2linux_backup";
/// Backup name for the prefix's own `Saves` directory during a session.
pub const SAVES_BACKUP_UPPER: &str = ".mo2linux_backup_Saves";
/// Backup name for a lowercase `saves` directory during a session.
pub const SAVES_BACKUP_LOWER: &str = ".mo2linux_backup_saves";

const DEFAULT_USERNAME: &str = "steamuser";

// ============================================================================
// Prefix Paths
// ============================================================================

/// Well-known locations inside a prefix. Derived on demand, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixPaths {
    pub drive_c: PathBuf,
    pub documents: PathBuf,
    pub my_games: PathBuf,
    pub appdata_local: PathBuf,
}

/// Find the username from a Wine prefix users directory.
///
/// Proton prefixes always use `steamuser`; plain Wine prefixes use the
/// login name, so fall back to the first real user directory.
fn find_prefix_username(users_dir: &Path) -> String {
    if users_dir.join(DEFAULT_USERNAME).is_dir() {
        return DEFAULT_USERNAME.to_string();
    }
    if let Ok(entries) = fs::read_dir(users_dir) {
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name != "Public" && name != "root")
            .collect();
        names.sort();
        if let Some(name) = names.into_iter().next() {
            return name;
        }
    }
    DEFAULT_USERNAME.to_string()
}

/// Lexically normalise a path: drop `.` and repeated separators, fold `..`.
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ============================================================================
// Wine Prefix
// ============================================================================

#[derive(Debug, Clone)]
pub struct WinePrefix {
    root: PathBuf,
}

impl WinePrefix {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let root = clean_path(path.as_ref());
        log_debug(&format!("WinePrefix: initialized with path '{}'", root.display()));
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A prefix is usable once it has a `drive_c`.
    pub fn is_valid(&self) -> bool {
        self.drive_c().is_dir()
    }

    pub fn drive_c(&self) -> PathBuf {
        self.root.join("drive_c")
    }

    pub fn paths(&self) -> PrefixPaths {
        let drive_c = self.drive_c();
        let user_dir = drive_c
            .join("users")
            .join(find_prefix_username(&drive_c.join("users")));
        let documents = user_dir.join("Documents");

        PrefixPaths {
            my_games: documents.join("My Games"),
            appdata_local: user_dir.join("AppData").join("Local"),
            documents,
            drive_c,
        }
    }

    pub fn documents_path(&self) -> PathBuf {
        self.paths().documents
    }

    pub fn my_games_path(&self) -> PathBuf {
        self.paths().my_games
    }

    pub fn appdata_local(&self) -> PathBuf {
        self.paths().appdata_local
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A minimal Proton-style prefix in a temp dir.
    pub fn prefix() -> (tempfile::TempDir, WinePrefix) {
        let dir = tempfile::tempdir().unwrap();
        let pfx = dir.path().join("pfx");
        fs::create_dir_all(pfx.join("drive_c/users/steamuser/Documents/My Games")).unwrap();
        fs::create_dir_all(pfx.join("drive_c/users/steamuser/AppData/Local")).unwrap();
        let prefix = WinePrefix::new(&pfx);
        (dir, prefix)
    }

    /// Names in `dir`, sorted.
    pub fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}
