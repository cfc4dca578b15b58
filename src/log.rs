//! Leveled stderr logging for the tracker.
//!
//! The level is process-wide so the CLI can set it once from `--log-level`.
//! Lines can additionally be captured per thread, which lets single-threaded
//! tokio tests assert on warnings such as low-confidence outcomes.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    /// Tag printed after the `[tracker]` prefix. Info lines carry none.
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Error => "error: ",
            LogLevel::Warn => "warn: ",
            LogLevel::Info => "",
            LogLevel::Debug => "debug: ",
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

thread_local! {
    static CAPTURED: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn current_log_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn enabled(level: LogLevel) -> bool {
    level == LogLevel::Error || current_log_level() >= level
}

/// Parse `--log-level`. Also accepts `warning` and `dbg`.
pub fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    match s.trim().to_lowercase().as_str() {
        "error" => Ok(LogLevel::Error),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "info" => Ok(LogLevel::Info),
        "debug" | "dbg" => Ok(LogLevel::Debug),
        _ => Err(format!(
            "Invalid log level '{}': expected error, warn, info, or debug",
            s
        )),
    }
}

/// Write one line if `level` is enabled. Called by the `log_*!` macros.
pub fn emit(level: LogLevel, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let line = format!("{}{}", level.tag(), args);
    eprintln!("[tracker] {}", line);
    CAPTURED.with(|captured| {
        if let Some(lines) = captured.borrow_mut().as_mut() {
            lines.push(line);
        }
    });
}

/// Start recording emitted lines on the current thread, discarding any
/// earlier recording.
pub fn start_capture() {
    CAPTURED.with(|captured| *captured.borrow_mut() = Some(Vec::new()));
}

/// Stop recording on the current thread and return what was emitted,
/// each line prefixed with its level tag (`warn: ...`).
pub fn take_captured() -> Vec<String> {
    CAPTURED.with(|captured| captured.borrow_mut().take().unwrap_or_default())
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::log::emit($crate::log::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::log::emit($crate::log::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::log::emit($crate::log::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::log::emit($crate::log::LogLevel::Debug, format_args!($($arg)*))
    };
}
