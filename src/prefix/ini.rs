use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use super::fs_ops::{
    backup_path, copy_file_with_parents, find_case_variants, live_path_for_backup, path_exists,
    remove_quietly, restore_backed_up_file,
};
use super::{clean_path, WinePrefix};
use crate::logging::{log_debug, log_error, log_warning};

/// A lowercase alias we created earlier: a symlink whose target is the
/// canonical file name in the same directory.
fn is_lowercase_alias(variant: &Path, canonical: &Path) -> bool {
    let Ok(target) = fs::read_link(variant) else {
        return false;
    };
    variant != canonical && canonical.file_name().is_some_and(|name| target.as_os_str() == name)
}

/// Back up every case variant of `destination` so exactly one backup per
/// variant exists afterwards, whatever state an earlier deploy left behind.
fn back_up_variants(destination: &Path) -> io::Result<()> {
    let variants = find_case_variants(destination);

    // Our alias pointing at a destination that has no backup means the
    // destination is the copy a previous deploy left, not user data.
    let own_copy = variants.iter().any(|v| is_lowercase_alias(v, destination))
        && !path_exists(&backup_path(destination));

    for variant in &variants {
        if own_copy && variant == destination {
            fs::remove_file(variant)?;
            continue;
        }
        let backup = backup_path(variant);
        // A backup from an earlier deploy holds the real original; put it
        // back first so it is what gets backed up again.
        restore_backed_up_file(variant, &backup)?;

        if is_lowercase_alias(variant, destination) {
            fs::remove_file(variant)?;
        } else if path_exists(variant) {
            fs::rename(variant, &backup)?;
        }
    }

    if !variants.iter().any(|v| v == destination) {
        restore_backed_up_file(destination, &backup_path(destination))?;
        if path_exists(destination) {
            fs::rename(destination, backup_path(destination))?;
        }
    }
    Ok(())
}

fn create_lowercase_alias(destination: &Path) {
    let Some(name) = destination.file_name().map(|n| n.to_string_lossy().to_string()) else {
        return;
    };
    let lower = name.to_lowercase();
    if lower == name {
        return;
    }

    let alias = destination.with_file_name(&lower);
    remove_quietly(&alias);
    // Relative target so the link survives the prefix being moved.
    if let Err(e) = symlink(&name, &alias) {
        log_warning(&format!(
            "Failed to create lowercase INI symlink {} -> {}: {}",
            lower, name, e
        ));
    }
}

/// The variant the game most recently wrote. Ties go to real files over
/// symlinks, since an alias resolves to the same mtime as its target.
fn newest_variant(variants: &[PathBuf]) -> Option<&PathBuf> {
    variants
        .iter()
        .filter_map(|v| {
            let modified = fs::metadata(v).and_then(|m| m.modified()).ok()?;
            let is_link = fs::symlink_metadata(v)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            Some((modified, !is_link, v))
        })
        .max_by_key(|(modified, is_real, _)| (*modified, *is_real))
        .map(|(_, _, v)| v)
}

impl WinePrefix {
    /// Deploy one profile INI over `target_ini`, backing up whatever the
    /// prefix had there (in any casing).
    ///
    /// Safe to repeat without a sync-back in between: the original
    /// pre-deploy content stays in the single backup.
    pub fn deploy_profile_ini(&self, source_ini: &Path, target_ini: &Path) -> bool {
        if !source_ini.is_file() {
            log_warning(&format!(
                "deploy_profile_ini: source '{}' does not exist or is not a file",
                source_ini.display()
            ));
            return false;
        }

        let destination = clean_path(target_ini);
        log_debug(&format!(
            "deploy_profile_ini: '{}' -> '{}'",
            source_ini.display(),
            destination.display()
        ));

        if let Err(e) = back_up_variants(&destination) {
            log_error(&format!(
                "deploy_profile_ini: failed to back up '{}': {}",
                destination.display(),
                e
            ));
            return false;
        }

        if let Err(e) = copy_file_with_parents(source_ini, &destination) {
            log_error(&format!(
                "deploy_profile_ini: failed to copy '{}' -> '{}': {}",
                source_ini.display(),
                destination.display(),
                e
            ));
            return false;
        }

        create_lowercase_alias(&destination);
        true
    }

    /// Copy the INIs the game wrote back into the profile and restore the
    /// prefix's originals. `mappings` are `(profile_ini, prefix_ini)` pairs.
    ///
    /// Every pair is attempted; the result is `true` only if all succeeded.
    pub fn sync_profile_inis_back(&self, mappings: &[(PathBuf, PathBuf)]) -> bool {
        log_debug(&format!(
            "sync_profile_inis_back: {} INI mappings to sync back",
            mappings.len()
        ));

        let mut all_copied = true;
        for (profile_ini, prefix_ini) in mappings {
            let profile_ini = clean_path(profile_ini);
            let prefix_ini = clean_path(prefix_ini);
            if !sync_one_ini_back(&profile_ini, &prefix_ini) {
                all_copied = false;
            }
        }
        all_copied
    }
}

fn sync_one_ini_back(profile_ini: &Path, prefix_ini: &Path) -> bool {
    log_debug(&format!(
        "sync_profile_inis_back: profile='{}' <- prefix='{}'",
        profile_ini.display(),
        prefix_ini.display()
    ));

    let variants = find_case_variants(prefix_ini);

    let Some(newest) = newest_variant(&variants) else {
        // The game never produced this INI; just put the original back.
        if let Err(e) = restore_backed_up_file(prefix_ini, &backup_path(prefix_ini)) {
            log_warning(&format!(
                "Failed to restore backup for '{}': {}",
                prefix_ini.display(),
                e
            ));
            return false;
        }
        return true;
    };

    let mut ok = true;
    if let Err(e) = copy_file_with_parents(newest, profile_ini) {
        log_warning(&format!(
            "Failed syncing INI '{}' -> '{}': {}",
            newest.display(),
            profile_ini.display(),
            e
        ));
        ok = false;
    }

    for variant in &variants {
        remove_quietly(variant);
    }

    for backup in find_case_variants(&backup_path(prefix_ini)) {
        let Some(live) = live_path_for_backup(&backup) else {
            continue;
        };
        if let Err(e) = restore_backed_up_file(&live, &backup) {
            log_warning(&format!("Failed to restore '{}': {}", backup.display(), e));
            ok = false;
        }
    }

    ok
}
