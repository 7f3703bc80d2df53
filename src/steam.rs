//! Steam client helpers needed by managed launches.
//!
//! Proton and UMU launches that carry a Steam app id expect a running Steam
//! client (for DRM and the Steam overlay), and Proton wants to know where
//! Steam lives.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::logging::{log_info, log_warning};
use crate::process::tracker::find_processes_by_name;

/// How long to wait for a freshly started Steam to show up.
const STEAM_START_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Path Detection
// ============================================================================

/// Find the Steam installation path.
///
/// Checks common locations for native, Flatpak, and Snap Steam installs.
#[must_use]
pub fn find_steam_path() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    find_steam_path_in(&home)
}

fn find_steam_path_in(home: &Path) -> Option<PathBuf> {
    [
        ".steam/steam",
        ".local/share/Steam",
        ".var/app/com.valvesoftware.Steam/.steam/steam",
        "snap/steam/common/.steam/steam",
    ]
    .iter()
    .map(|rel| home.join(rel))
    .find(|p| p.exists())
}

// ============================================================================
// Client Process
// ============================================================================

/// Whether a Steam client process is running for any user.
pub fn is_steam_running() -> bool {
    !find_processes_by_name("steam").is_empty()
}

/// Launch the Steam client minimized in its own session.
///
/// Goes through [`command_for`](crate::runtime_wrap::command_for), so inside
/// a Flatpak sandbox the client is started on the host via `flatpak-spawn`,
/// and under `steam-run` when that wrapper is in use.
pub fn start_steam() -> Result<(), Box<dyn std::error::Error>> {
    start_command()
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    Ok(())
}

fn start_command() -> Command {
    let mut cmd = crate::runtime_wrap::command_for("setsid", false);
    // Steam outlives us; keep it off our session and our terminal.
    cmd.args(["steam", "-silent"]);
    cmd
}

/// Make sure Steam is up before a launch that needs it.
///
/// Returns `false` if Steam could not be started or didn't appear in time;
/// callers treat that as a warning and launch anyway.
pub fn ensure_steam_running() -> bool {
    if is_steam_running() {
        return true;
    }

    log_info("Steam is not running, starting it");
    if let Err(e) = start_steam() {
        log_warning(&format!("Failed to start Steam: {}", e));
        return false;
    }

    let start = Instant::now();
    while start.elapsed() < STEAM_START_TIMEOUT {
        if is_steam_running() {
            log_info("Steam is running");
            return true;
        }
        thread::sleep(Duration::from_millis(500));
    }

    log_warning("Steam did not start in time, continuing without it");
    false
}

// ============================================================================
// STEAM_COMPAT_MOUNTS Detection
// ============================================================================

/// Directories that pressure-vessel already exposes by default
const ALREADY_EXPOSED: &[&str] = &[
    "bin", "etc", "home", "lib", "lib32", "lib64", "overrides", "run", "sbin", "tmp", "usr",
    "var",
];

/// System directories that shouldn't be mounted
const SYSTEM_DIRS: &[&str] = &["proc", "sys", "dev", "boot", "root", "lost+found", "snap"];

/// Top-level directories the Steam Runtime container must be told about, so
/// games installed on e.g. `/mnt` or `/media` are reachable.
pub fn detect_extra_mounts() -> Vec<String> {
    detect_extra_mounts_in(Path::new("/"))
}

fn detect_extra_mounts_in(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    let mut mounts: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| {
            !name.starts_with('.')
                && !ALREADY_EXPOSED.contains(&name.as_str())
                && !SYSTEM_DIRS.contains(&name.as_str())
        })
        .map(|name| format!("/{}", name))
        .collect();

    mounts.sort();
    mounts
}
