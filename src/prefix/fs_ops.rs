//! Filesystem primitives for prefix synchronization.
//!
//! Everything here returns `io::Result`; the public prefix operations decide
//! how a failure is logged and turned into their boolean result.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::BACKUP_SUFFIX;
use crate::logging::log_debug;

/// Exists without following a final symlink (dangling links count).
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// `path` with `suffix` appended to its file name.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Backup location for `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, BACKUP_SUFFIX)
}

/// Live location a backup belongs to, if `path` is a backup.
pub fn live_path_for_backup(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let live = name.strip_suffix(BACKUP_SUFFIX)?;
    if live.is_empty() {
        return None;
    }
    Some(path.with_file_name(live))
}

/// Non-directory siblings of `path` whose name matches its file name
/// case-insensitively, `path` itself included if it exists. Sorted.
pub fn find_case_variants(path: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(target)) = (path.parent(), path.file_name()) else {
        return Vec::new();
    };
    let target = target.to_string_lossy().to_lowercase();

    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut variants: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().to_lowercase() == target)
        .map(|entry| entry.path())
        .filter(|p| !p.is_dir())
        .collect();
    variants.sort();
    variants
}

/// Remove a file or symlink, reporting success only. Missing counts as removed.
pub fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            log_debug(&format!("Failed to remove '{}': {}", path.display(), e));
            false
        }
    }
}

/// Copy `source` to `destination`, creating parent directories and replacing
/// whatever is already there (including a symlink, which is not followed).
pub fn copy_file_with_parents(source: &Path, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if path_exists(destination) {
        fs::remove_file(destination)?;
    }
    fs::copy(source, destination)?;
    Ok(())
}

/// Recursively copy every file under `source_root` into `destination_root`,
/// keeping relative paths. Returns the number of files copied.
pub fn copy_tree_contents(source_root: &Path, destination_root: &Path) -> io::Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(source_root).follow_links(true) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source_root)
            .map_err(io::Error::other)?;
        copy_file_with_parents(entry.path(), &destination_root.join(relative))?;
        copied += 1;
    }
    Ok(copied)
}

/// Move `backup` back over `live`. A missing backup is a no-op.
pub fn restore_backed_up_file(live: &Path, backup: &Path) -> io::Result<()> {
    if !path_exists(backup) {
        return Ok(());
    }
    if path_exists(live) {
        fs::remove_file(live)?;
    }
    fs::rename(backup, live)
}

fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Drop the session's live save directories and move the backups back.
pub fn restore_backed_up_saves(
    live_upper: &Path,
    live_lower: &Path,
    backup_upper: &Path,
    backup_lower: &Path,
) -> io::Result<()> {
    remove_dir_if_present(live_upper)?;
    remove_dir_if_present(live_lower)?;

    if backup_upper.is_dir() {
        fs::rename(backup_upper, live_upper)?;
    }
    if backup_lower.is_dir() {
        fs::rename(backup_lower, live_lower)?;
    }
    Ok(())
}
