//! Internal logging system for the Astral RHI
//!
//! Provides:
//! - Customizable logger via the `Logger` trait
//! - Severity levels (Trace, Debug, Info, Warn, Error)
//! - Colored console output by default
//! - Thread-safe global logger with RwLock
//! - File and line information for ERROR logs

use colored::*;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use chrono::{DateTime, Local};

/// Logger trait for custom logging implementations
///
/// Implement this trait to route RHI log output elsewhere
/// (file logging, test capture, etc.)
pub trait Logger: Send + Sync {
    /// Log an entry
    fn log(&self, entry: &LogEntry);
}

/// Log entry containing all information about a log message
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity level
    pub severity: LogSeverity,

    /// Timestamp when the log was created
    pub timestamp: SystemTime,

    /// Source module (e.g. "rhi::device", "rhi::vulkan::swapchain")
    pub source: &'static str,

    /// Log message
    pub message: String,

    /// Source file (ERROR logs only)
    pub file: Option<&'static str>,

    /// Source line (ERROR logs only)
    pub line: Option<u32>,
}

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    /// Very verbose debug information
    Trace,

    /// Development/debugging information
    Debug,

    /// Important informational messages
    Info,

    /// Potential issues
    Warn,

    /// Critical issues, logged with file:line details
    Error,
}

/// Default logger using colored console output
///
/// Format:
/// - Normal: `[timestamp] [SEVERITY] [source] message`
/// - Error: `[timestamp] [ERROR] [source] message (file:line)`
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn log(&self, entry: &LogEntry) {
        let datetime: DateTime<Local> = entry.timestamp.into();
        let timestamp = datetime.format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        let severity_str = match entry.severity {
            LogSeverity::Trace => "TRACE".bright_black(),
            LogSeverity::Debug => "DEBUG".cyan(),
            LogSeverity::Info => "INFO ".green(),
            LogSeverity::Warn => "WARN ".yellow(),
            LogSeverity::Error => "ERROR".red().bold(),
        };

        let source = entry.source.bright_blue();

        if let (Some(file), Some(line)) = (entry.file, entry.line) {
            println!(
                "[{}] [{}] [{}] {} ({}:{})",
                timestamp, severity_str, source, entry.message, file, line
            );
        } else {
            println!("[{}] [{}] [{}] {}", timestamp, severity_str, source, entry.message);
        }
    }
}

// ===== GLOBAL LOGGER =====

static GLOBAL_LOGGER: RwLock<Option<Arc<dyn Logger>>> = RwLock::new(None);

/// Install a custom logger, replacing the default console logger
pub fn set_logger(logger: Arc<dyn Logger>) {
    *GLOBAL_LOGGER.write().unwrap() = Some(logger);
}

/// Remove any installed logger and fall back to `DefaultLogger`
pub fn reset_logger() {
    *GLOBAL_LOGGER.write().unwrap() = None;
}

/// Log a message through the installed logger (or `DefaultLogger`)
pub fn log(severity: LogSeverity, source: &'static str, message: String) {
    log_detailed(severity, source, message, None, None)
}

/// Log a message with optional file:line details
pub fn log_detailed(
    severity: LogSeverity,
    source: &'static str,
    message: String,
    file: Option<&'static str>,
    line: Option<u32>,
) {
    let entry = LogEntry {
        severity,
        timestamp: SystemTime::now(),
        source,
        message,
        file,
        line,
    };

    let guard = GLOBAL_LOGGER.read().unwrap();
    match guard.as_ref() {
        Some(logger) => logger.log(&entry),
        None => DefaultLogger.log(&entry),
    }
}

// ===== LOGGING MACROS =====

/// Log a TRACE message (very verbose)
#[macro_export]
macro_rules! rhi_trace {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::log($crate::log::LogSeverity::Trace, $source, format!($($arg)*))
    };
}

/// Log a DEBUG message (development information)
#[macro_export]
macro_rules! rhi_debug {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::log($crate::log::LogSeverity::Debug, $source, format!($($arg)*))
    };
}

/// Log an INFO message (important events)
#[macro_export]
macro_rules! rhi_info {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::log($crate::log::LogSeverity::Info, $source, format!($($arg)*))
    };
}

/// Log a WARN message (potential issues)
#[macro_export]
macro_rules! rhi_warn {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::log($crate::log::LogSeverity::Warn, $source, format!($($arg)*))
    };
}

/// Log an ERROR message with file:line information
#[macro_export]
macro_rules! rhi_error {
    ($source:expr, $($arg:tt)*) => {
        $crate::log::log_detailed(
            $crate::log::LogSeverity::Error,
            $source,
            format!($($arg)*),
            Some(file!()),
            Some(line!()),
        )
    };
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
