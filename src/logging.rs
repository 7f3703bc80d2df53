//! Fluorine Logging System
//!
//! Provides structured logging with a session information header.
//! Logging is fire-and-forget: a failure to write a log line never
//! changes the caller's control flow.

use chrono::Local;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

use crate::runtime_wrap::is_flatpak;

static LOGGER: OnceLock<Mutex<FluorineLogger>> = OnceLock::new();

// ============================================================================
// Session Information
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub app_version: String,
    pub process_name: String,
    pub kernel: String,
    pub flatpak: bool,
}

impl SessionInfo {
    pub fn detect(process_name: &str) -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            process_name: process_name.to_string(),
            kernel: detect_kernel(),
            flatpak: is_flatpak(),
        }
    }

    pub fn to_log_header(&self) -> String {
        format!(
r#"================================================================================
Fluorine Log - {}
================================================================================
Process:       {} v{}
Kernel:        {}
Flatpak:       {}
================================================================================"#,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.process_name,
            self.app_version,
            self.kernel,
            if self.flatpak { "yes" } else { "no" },
        )
    }
}

fn detect_kernel() -> String {
    if let Ok(release) = fs::read_to_string("/proc/sys/kernel/osrelease") {
        return release.trim().to_string();
    }
    if let Ok(output) = Command::new("uname").arg("-r").output() {
        if output.status.success() {
            return String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
    }
    "Unknown".to_string()
}

// ============================================================================
// Log Levels
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Info => "[INFO]",
            LogLevel::Warning => "[WARNING]",
            LogLevel::Error => "[ERROR]",
        }
    }
}

// ============================================================================
// Fluorine Logger
// ============================================================================

pub struct FluorineLogger {
    log_file: Option<File>,
    echo: bool,
}

impl FluorineLogger {
    pub fn new(process_name: &str) -> Self {
        let log_dir = log_dir();
        let _ = fs::create_dir_all(&log_dir);

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!(
            "{}_{}_{}.log",
            process_name,
            timestamp,
            std::process::id()
        ));

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok();

        let echo = !matches!(
            std::env::var("FLUORINE_LOG_QUIET").unwrap_or_default().as_str(),
            "1" | "true" | "yes"
        );

        let mut logger = Self { log_file, echo };
        logger.write_raw(&SessionInfo::detect(process_name).to_log_header());
        logger
    }

    fn write_raw(&mut self, msg: &str) {
        if let Some(ref mut file) = self.log_file {
            let _ = writeln!(file, "{}", msg);
            let _ = file.flush();
        }

        // stdout belongs to the process helper protocol, so the console copy
        // always goes to stderr.
        if self.echo {
            eprintln!("{}", msg);
        }
    }

    pub fn log(&mut self, level: LogLevel, message: &str) {
        let timestamp = Local::now().format("%H:%M:%S%.3f");
        let formatted = format!("[{}] {} {}", timestamp, level.prefix(), message);
        self.write_raw(&formatted);
    }
}

fn log_dir() -> PathBuf {
    match std::env::var_os("FLUORINE_LOG_DIR").filter(|d| !d.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => crate::fluorine_path!("logs"),
    }
}

// ============================================================================
// Global Logger Access
// ============================================================================

/// Initialize the global logger (call once at startup).
///
/// `process_name` ends up in the log file name, so the GUI, the CLI and the
/// process helper each get their own file.
pub fn init_logger(process_name: &str) {
    LOGGER.get_or_init(|| Mutex::new(FluorineLogger::new(process_name)));
}

fn logger() -> &'static Mutex<FluorineLogger> {
    LOGGER.get_or_init(|| Mutex::new(FluorineLogger::new("fluorine")))
}

// ============================================================================
// Convenience Logging Functions
// ============================================================================

pub fn log_debug(message: &str) {
    logger().lock().log(LogLevel::Debug, message);
}

pub fn log_info(message: &str) {
    logger().lock().log(LogLevel::Info, message);
}

pub fn log_warning(message: &str) {
    logger().lock().log(LogLevel::Warning, message);
}

pub fn log_error(message: &str) {
    logger().lock().log(LogLevel::Error, message);
}
