//! Shared data and application directories for Fluorine.
//!
//! All runtime data (logs, launch settings) lives under
//! `~/.var/app/com.fluorine.manager/` unless `FLUORINE_DATA_DIR` is set.

use std::path::PathBuf;
use std::sync::LazyLock;

/// Name of the standalone supervisor binary shipped next to the main executable.
pub const PROCESS_HELPER_NAME: &str = "fluorine-process-helper";

pub static DEFAULT_DATA_PATH: LazyLock<PathBuf> = LazyLock::new(data_dir);

/// Returns the Fluorine data directory (`~/.var/app/com.fluorine.manager`).
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("FLUORINE_DATA_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }

    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
    home.join(".var/app/com.fluorine.manager")
}

/// Returns the application base directory.
///
/// `MO2_BASE_DIR` wins when set (AppImage and Flatpak wrappers export it),
/// otherwise the directory holding the running executable is used.
pub fn base_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("MO2_BASE_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Locate the process helper binary, checking the base directory first and
/// then a `bin/` subdirectory (the Flatpak layout).
pub fn process_helper_path() -> Option<PathBuf> {
    let base = base_dir();
    [base.join(PROCESS_HELPER_NAME), base.join("bin").join(PROCESS_HELPER_NAME)]
        .into_iter()
        .find(|candidate| candidate.is_file())
}

/// Computes a path inside the Fluorine data directory.
///
/// Returns a `&Path` referencing the data directory itself if no arguments are passed in, or a
/// `PathBuf` created by joining all of the arguments to the data directory if at least
/// one argument is passed in.
///
/// # Examples
///
/// ```
/// use fluorine_compat::fluorine_path;
///
/// let logs = fluorine_path!("logs");
/// assert!(logs.ends_with("logs"));
/// ```
#[macro_export]
macro_rules! fluorine_path {
    () => {
        $crate::paths::DEFAULT_DATA_PATH.as_path()
    };

    ( $( $path:expr ),+ $(,)? ) => {
        [
            $crate::paths::DEFAULT_DATA_PATH.as_path(),
            $( std::path::Path::new(&$path) ),+
        ].into_iter().collect::<std::path::PathBuf>()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fluorine_path_joins_segments() {
        let joined = fluorine_path!("logs", "today.log");
        assert_eq!(joined, DEFAULT_DATA_PATH.join("logs").join("today.log"));
        assert_eq!(fluorine_path!(), DEFAULT_DATA_PATH.as_path());
    }
}
