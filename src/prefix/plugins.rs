use std::fs;
use std::io::{self, Write};
use std::path::Path;

use super::fs_ops::{find_case_variants, remove_quietly};
use super::WinePrefix;
use crate::logging::{log_debug, log_error, log_warning};

const PLUGINS_FILE: &str = "Plugins.txt";
const PLUGINS_FILE_LOWER: &str = "plugins.txt";
const LOAD_ORDER_FILE: &str = "loadorder.txt";

/// Marker in front of an enabled plugin in `Plugins.txt`.
const ENABLED_MARKER: char = '*';

fn write_crlf_lines<'a>(path: &Path, lines: impl IntoIterator<Item = &'a str>) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    for line in lines {
        file.write_all(line.as_bytes())?;
        file.write_all(b"\r\n")?;
    }
    file.flush()
}

impl WinePrefix {
    /// Write `Plugins.txt` (plus a lowercase copy) and `loadorder.txt` into
    /// `AppData/Local/<data_dir>`.
    ///
    /// `plugins` is in load order; enabled entries carry a leading `*`,
    /// which `loadorder.txt` drops.
    pub fn deploy_plugins(&self, plugins: &[String], data_dir: &str) -> bool {
        if !self.is_valid() {
            log_error(&format!(
                "deploy_plugins: prefix '{}' is not valid (drive_c not found)",
                self.root().display()
            ));
            return false;
        }

        let plugins_dir = self.appdata_local().join(data_dir);
        log_debug(&format!(
            "deploy_plugins: target dir='{}', {} plugins to deploy",
            plugins_dir.display(),
            plugins.len()
        ));

        if let Err(e) = fs::create_dir_all(&plugins_dir) {
            log_error(&format!(
                "deploy_plugins: failed to create directory '{}': {}",
                plugins_dir.display(),
                e
            ));
            return false;
        }

        // A stale differently-cased copy would shadow the fresh one for
        // games that look up a specific casing.
        let plugins_path = plugins_dir.join(PLUGINS_FILE);
        let load_order_path = plugins_dir.join(LOAD_ORDER_FILE);
        for variant in find_case_variants(&plugins_path)
            .into_iter()
            .chain(find_case_variants(&load_order_path))
        {
            log_debug(&format!("deploy_plugins: removing stale variant '{}'", variant.display()));
            remove_quietly(&variant);
        }

        if let Err(e) = write_crlf_lines(&plugins_path, plugins.iter().map(String::as_str)) {
            log_error(&format!(
                "deploy_plugins: failed to write '{}': {}",
                plugins_path.display(),
                e
            ));
            return false;
        }

        let plugins_lower = plugins_dir.join(PLUGINS_FILE_LOWER);
        if let Err(e) = fs::copy(&plugins_path, &plugins_lower) {
            log_warning(&format!(
                "deploy_plugins: failed to create lowercase copy '{}': {}",
                plugins_lower.display(),
                e
            ));
        }

        let load_order = plugins
            .iter()
            .map(|p| p.strip_prefix(ENABLED_MARKER).unwrap_or(p.as_str()));
        if let Err(e) = write_crlf_lines(&load_order_path, load_order) {
            log_error(&format!(
                "deploy_plugins: failed to write '{}': {}",
                load_order_path.display(),
                e
            ));
            return false;
        }

        log_debug(&format!(
            "deploy_plugins: wrote {} plugins to '{}'",
            plugins.len(),
            plugins_dir.display()
        ));
        true
    }
}
