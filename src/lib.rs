//! Fluorine - Linux compatibility layer
//!
//! Library crate shared by the `fluorine` front end and the standalone
//! `fluorine-process-helper` supervisor.

#[macro_use]
pub mod paths;

pub mod config;
pub mod ini_writer;
pub mod launcher;
pub mod logging;
pub mod prefix;
pub mod process;
pub mod runtime_wrap;
pub mod session;
pub mod steam;
