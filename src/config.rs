use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::log_warning;
use crate::runtime_wrap::is_flatpak;

// ============================================================================
// Launch Settings
// ============================================================================

/// Per-launch configuration context handed to the launcher and the session.
///
/// Persisted as `launch_settings.json` in the data directory. A missing or
/// unreadable file yields the defaults.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LaunchSettings {
    /// Proton install directory (the one containing the `proton` script)
    pub proton_path: Option<PathBuf>,
    /// Compatibility prefix; either the compatdata dir or its `pfx/` child
    pub prefix_path: Option<PathBuf>,
    pub steam_app_id: Option<u32>,
    pub use_umu: bool,
    pub prefer_system_umu: bool,
    pub use_steam_run: bool,
    /// `None` means auto: use the helper when running inside Flatpak
    pub use_process_helper: Option<bool>,
    /// Explicit helper binary instead of the one next to the executable
    pub helper_path: Option<PathBuf>,
    /// Wrapper command line prepended to the launch, e.g. `gamemoderun mangohud`
    pub wrapper_commands: String,
    pub env_vars: BTreeMap<String, String>,
}

impl LaunchSettings {
    fn get_path() -> PathBuf {
        crate::fluorine_path!("launch_settings.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::get_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                match serde_json::from_str(&content) {
                    Ok(settings) => return settings,
                    Err(e) => log_warning(&format!(
                        "Ignoring malformed launch settings {}: {}",
                        path.display(),
                        e
                    )),
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) {
        self.save_to(&Self::get_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = fs::write(path, json);
        }
    }

    /// Whether launches go through the out-of-process helper.
    pub fn process_helper_enabled(&self) -> bool {
        self.use_process_helper.unwrap_or_else(is_flatpak)
    }

    /// The Wine prefix proper (`.../pfx`) for the configured prefix path.
    pub fn wine_prefix(&self) -> Option<PathBuf> {
        self.prefix_path.as_ref().map(|p| {
            if p.join("pfx").is_dir() {
                p.join("pfx")
            } else {
                p.clone()
            }
        })
    }

    /// The compatdata directory Proton expects in `STEAM_COMPAT_DATA_PATH`.
    pub fn compat_data_path(&self) -> Option<PathBuf> {
        self.prefix_path.as_ref().map(|p| {
            if p.file_name().is_some_and(|n| n == "pfx") {
                p.parent().map(Path::to_path_buf).unwrap_or_else(|| p.clone())
            } else {
                p.clone()
            }
        })
    }
}
