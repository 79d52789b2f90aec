#![deny(missing_docs)]
//! Shared logging utilities for the lore workspace.
//!
//! This crate provides the `lore_*` logging macros used across the codebase,
//! the logger initialization used by the command-line driver, and a minimal
//! test initializer for the global logger.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::str::FromStr;

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

/// Log file used by [`initialize`] when the destination includes a file.
pub const LOG_FILE: &str = "./lore.log";

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! lore_trace {
    ($($arg:tt)*) => {{
        log::trace!($($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! lore_debug {
    ($($arg:tt)*) => {{
        log::debug!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! lore_info {
    ($($arg:tt)*) => {{
        log::info!($($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! lore_warn {
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! lore_error {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

/// Destination for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogDestination {
    /// Append to the log file only.
    File,
    /// Write to stderr, leaving stdout to command output.
    #[default]
    Terminal,
    /// Append to the log file and write to stderr.
    Both,
}

impl FromStr for LogDestination {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "terminal" | "term" => Ok(Self::Terminal),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown log destination '{other}'")),
        }
    }
}

/// Initialize the global logger, writing file output to [`LOG_FILE`].
pub fn initialize(destination: LogDestination, level: LevelFilter) {
    initialize_with_file(destination, level, Path::new(LOG_FILE));
}

/// Initialize the global logger, appending file output to `log_path`.
///
/// A log file that cannot be opened falls back to the terminal, so a run is
/// never left without log output. Calling this twice keeps the first logger.
pub fn initialize_with_file(destination: LogDestination, level: LevelFilter, log_path: &Path) {
    let _ = CombinedLogger::init(build_loggers(destination, level, log_path));
}

/// Initializes a simple terminal logger for use in tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![terminal_logger(level, Config::default())]);
}

fn build_loggers(
    destination: LogDestination,
    level: LevelFilter,
    log_path: &Path,
) -> Vec<Box<dyn SharedLogger>> {
    let config = build_config();
    let wants_terminal = destination != LogDestination::File;
    let file_logger = match destination {
        LogDestination::Terminal => None,
        LogDestination::File | LogDestination::Both => {
            open_file_logger(log_path, level, config.clone())
        }
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    if wants_terminal || file_logger.is_none() {
        loggers.push(terminal_logger(level, config));
    }
    if let Some(file_logger) = file_logger {
        loggers.push(file_logger);
    }
    loggers
}

fn build_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Debug)
        .build()
}

fn terminal_logger(level: LevelFilter, config: Config) -> Box<TermLogger> {
    TermLogger::new(level, config, TerminalMode::Stderr, ColorChoice::Auto)
}

fn open_file_logger(
    log_path: &Path,
    level: LevelFilter,
    config: Config,
) -> Option<Box<WriteLogger<File>>> {
    let opened = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path);
    match opened {
        Ok(file) => Some(WriteLogger::new(level, config, file)),
        Err(err) => {
            eprintln!(
                "lore: cannot open log file {}: {}; logging to the terminal",
                log_path.display(),
                err
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_parses_case_insensitively() {
        assert_eq!("FILE".parse::<LogDestination>(), Ok(LogDestination::File));
        assert_eq!(" both ".parse::<LogDestination>(), Ok(LogDestination::Both));
        assert_eq!("term".parse::<LogDestination>(), Ok(LogDestination::Terminal));
        assert!("syslog".parse::<LogDestination>().is_err());
    }

    #[test]
    fn terminal_destination_opens_no_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lore.log");

        let loggers = build_loggers(LogDestination::Terminal, LevelFilter::Info, &path);

        assert_eq!(loggers.len(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn both_destination_appends_to_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lore.log");
        std::fs::write(&path, "earlier run\n").unwrap();

        let loggers = build_loggers(LogDestination::Both, LevelFilter::Info, &path);

        assert_eq!(loggers.len(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier run\n");
    }

    #[test]
    fn unopenable_log_file_falls_back_to_the_terminal() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing").join("lore.log");

        let loggers = build_loggers(LogDestination::File, LevelFilter::Info, &path);

        assert_eq!(loggers.len(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn macros_expand_without_logger() {
        initialize_for_tests();
        lore_info!("info {}", 1);
        lore_debug!("debug {}", 2);
        lore_trace!("trace");
        lore_warn!("warn");
        lore_error!("error");
    }
}
