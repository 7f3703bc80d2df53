//! Host runtime wrappers: Flatpak portal spawning, `steam-run` and `umu-run`
//! resolution.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn use_steam_run() -> bool {
    env_flag("FLUORINE_USE_STEAM_RUN")
}

pub fn prefer_system_umu() -> bool {
    env_flag("FLUORINE_PREFER_SYSTEM_UMU")
}

pub(crate) fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|entry| entry.join(binary))
        .find(|candidate| candidate.is_file())
}

/// Which `umu-run` a managed launch ended up using.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UmuSource {
    /// Found on `PATH` (or the host `PATH` inside Flatpak).
    System(PathBuf),
    /// Shipped next to the application.
    Bundled(PathBuf),
}

impl UmuSource {
    pub fn path(&self) -> &Path {
        match self {
            UmuSource::System(p) | UmuSource::Bundled(p) => p,
        }
    }
}

/// Resolve `umu-run`, choosing between the system install and the bundled
/// copy according to `prefer_system`.
pub fn resolve_umu_run(prefer_system: bool) -> Option<UmuSource> {
    // In Flatpak, umu-run must run on the host (it needs the Steam Runtime's
    // linker and 32-bit libs).  Return the bare name so command_for() wraps it
    // as `flatpak-spawn --host umu-run` and the host's PATH resolves it.
    if is_flatpak() {
        return Some(UmuSource::System(PathBuf::from("umu-run")));
    }

    let bundled = env::var("FLUORINE_BUNDLED_UMU_RUN")
        .ok()
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .or_else(|| bundled_umu_path_from_appdir(&crate::paths::base_dir()))
        .map(UmuSource::Bundled);
    let system = find_in_path("umu-run").map(UmuSource::System);

    if prefer_system || prefer_system_umu() {
        system.or(bundled)
    } else {
        bundled.or(system)
    }
}

pub fn is_flatpak() -> bool {
    Path::new("/.flatpak-info").exists()
}

/// Build a `Command` for `exe`, routed through `steam-run` or the Flatpak
/// host portal when needed.
pub fn command_for(exe: impl AsRef<OsStr>, steam_run: bool) -> Command {
    let mut parts = wrapped_argv(exe.as_ref(), steam_run).into_iter();
    // wrapped_argv always yields at least the executable itself
    let mut cmd = Command::new(parts.next().unwrap_or_default());
    cmd.args(parts);
    cmd
}

/// The argv prefix `command_for` would use, as plain strings. The process
/// helper needs this form because it receives its target over the protocol.
pub fn wrapped_argv(exe: &OsStr, steam_run: bool) -> Vec<std::ffi::OsString> {
    if steam_run || use_steam_run() {
        return vec!["steam-run".into(), exe.to_os_string()];
    }
    // Inside a Flatpak sandbox, Proton's Wine binaries are linked against
    // the Steam Runtime's linker and can't execute directly.  Spawn them
    // on the host via the Flatpak portal instead.
    if is_flatpak() {
        return vec!["flatpak-spawn".into(), "--host".into(), exe.to_os_string()];
    }
    vec![exe.to_os_string()]
}

pub fn bundled_umu_path_from_appdir(appdir: &Path) -> Option<PathBuf> {
    let path = appdir.join("umu-run");
    if path.exists() {
        Some(path)
    } else {
        None
    }
}
