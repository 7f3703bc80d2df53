//! Line-preserving INI key writer.
//!
//! Only the targeted line changes; comments, ordering, unrelated sections and
//! the file's line-ending style survive a write. Section and key lookups are
//! case-insensitive, as they are for the games that read these files.

use std::fmt;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::logging::{log_info, log_warning};

#[derive(Debug)]
pub enum IniWriteError {
    Io(io::Error),
    /// Target is read-only and no policy was given
    ReadOnly(PathBuf),
}

impl fmt::Display for IniWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IniWriteError::Io(e) => write!(f, "INI write failed: {}", e),
            IniWriteError::ReadOnly(p) => write!(f, "INI file is read-only: {}", p.display()),
        }
    }
}

impl std::error::Error for IniWriteError {}

impl From<io::Error> for IniWriteError {
    fn from(e: io::Error) -> Self {
        IniWriteError::Io(e)
    }
}

/// What to do when the target INI carries the read-only flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOnlyPolicy {
    /// Make the file writable and leave it that way
    ClearFlag,
    /// Make it writable for this write, then put the flag back
    AllowOnce,
    /// Leave the file alone
    Skip,
}

fn section_name(trimmed: &str) -> Option<&str> {
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with(';') || trimmed.starts_with('#')
}

/// Return `content` with `section.key` set to `value`.
///
/// Missing keys are appended after the last entry of the section; a missing
/// section is appended at the end of the file.
pub fn set_ini_value(content: &str, section: &str, key: &str, value: &str) -> String {
    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    let mut in_section = false;
    let mut section_end: Option<usize> = None;
    let mut hit: Option<(usize, String)> = None;

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if let Some(name) = section_name(trimmed) {
            if in_section {
                break;
            }
            in_section = name.eq_ignore_ascii_case(section);
            if in_section {
                section_end = Some(i + 1);
            }
            continue;
        }
        if !in_section || trimmed.is_empty() {
            continue;
        }
        section_end = Some(i + 1);
        if is_comment(trimmed) {
            continue;
        }
        if let Some((k, _)) = line.split_once('=') {
            if k.trim().eq_ignore_ascii_case(key) {
                hit = Some((i, k.trim_end().to_string()));
                break;
            }
        }
    }

    match (hit, section_end) {
        (Some((i, original_key)), _) => {
            lines[i] = format!("{}={}", original_key, value);
        }
        (None, Some(end)) => {
            lines.insert(end, format!("{}={}", key, value));
        }
        (None, None) => {
            if lines.last().is_some_and(|l| !l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.push(format!("[{}]", section));
            lines.push(format!("{}={}", key, value));
        }
    }

    let mut out = lines.join(newline);
    out.push_str(newline);
    out
}

fn is_read_only(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o222 == 0)
        .unwrap_or(false)
}

fn rewrite(path: &Path, section: &str, key: &str, value: &str) -> io::Result<()> {
    let content = match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, set_ini_value(&content, section, key, value))
}

/// Set `section.key = value` in the INI at `path`, creating the file if needed.
///
/// Fails with [`IniWriteError::ReadOnly`] on a read-only target; use
/// [`write_ini_value_with_policy`] to decide what happens then.
pub fn write_ini_value(
    section: &str,
    key: &str,
    value: &str,
    path: &Path,
) -> Result<(), IniWriteError> {
    if is_read_only(path) {
        return Err(IniWriteError::ReadOnly(path.to_path_buf()));
    }
    rewrite(path, section, key, value)?;
    Ok(())
}

/// Like [`write_ini_value`], but a read-only target is resolved by asking
/// `decide` and retrying after the permission change.
///
/// Returns `Ok(false)` if the write was skipped.
pub fn write_ini_value_with_policy<D>(
    section: &str,
    key: &str,
    value: &str,
    path: &Path,
    decide: D,
) -> Result<bool, IniWriteError>
where
    D: FnOnce(&Path) -> ReadOnlyPolicy,
{
    match write_ini_value(section, key, value, path) {
        Ok(()) => return Ok(true),
        Err(IniWriteError::ReadOnly(_)) => {}
        Err(e) => return Err(e),
    }

    let original = fs::metadata(path)?.permissions();
    let policy = decide(path);
    log_info(&format!(
        "{} is read-only, applying policy {:?}",
        path.display(),
        policy
    ));

    if policy == ReadOnlyPolicy::Skip {
        return Ok(false);
    }

    let mut writable = original.clone();
    writable.set_mode(original.mode() | 0o200);
    fs::set_permissions(path, writable)?;

    let result = rewrite(path, section, key, value);

    if policy == ReadOnlyPolicy::AllowOnce {
        if let Err(e) = fs::set_permissions(path, original) {
            log_warning(&format!(
                "Failed to restore read-only flag on {}: {}",
                path.display(),
                e
            ));
        }
    }

    result?;
    Ok(true)
}
