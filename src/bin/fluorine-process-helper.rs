//! Fluorine process helper.
//!
//! Reads a launch config block on stdin, starts the program in its own
//! session and reports `started`/`error`/`exited` lines on stdout until the
//! whole process tree is gone. Logs go to the log file and stderr only,
//! never stdout.

use fluorine_compat::logging::{init_logger, log_info};
use fluorine_compat::process::supervisor;

fn main() {
    init_logger("fluorine-process-helper");
    log_info("Process helper starting");

    let code = supervisor::run_stdio();

    log_info(&format!("Process helper exiting with status {}", code));
    std::process::exit(code);
}
