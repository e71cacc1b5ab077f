// mongolite-core/src/logging.rs
//! Leveled diagnostics without an external logger dependency.
//!
//! Verbosity is tracked per component, and components reuse the error-source
//! vocabulary (`mongolite`, `backend`, `bob`, `matcher`), so a log line and
//! the error it accompanies carry the same tag. Levels live in atomics and
//! hot paths check them without locking.
//!
//! `MONGOLITE_LOG` accepts either one level for everything (`debug`) or a
//! comma list of per-component overrides (`backend=trace,matcher=off`).

use crate::error::{ErrorSource, MongoliteError};
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Component silenced entirely
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse a level name (case-insensitive). `off`/`none` silence a
    /// component.
    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Some(LogLevel::Off),
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    fn decode(raw: u8) -> LogLevel {
        match raw {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

// One slot per ErrorSource, default WARN so embedded use stays quiet.
static LEVELS: [AtomicU8; 4] = [
    AtomicU8::new(LogLevel::Warn as u8),
    AtomicU8::new(LogLevel::Warn as u8),
    AtomicU8::new(LogLevel::Warn as u8),
    AtomicU8::new(LogLevel::Warn as u8),
];

fn slot(source: ErrorSource) -> &'static AtomicU8 {
    let index = match source {
        ErrorSource::Mongolite => 0,
        ErrorSource::Backend => 1,
        ErrorSource::Bob => 2,
        ErrorSource::Matcher => 3,
    };
    &LEVELS[index]
}

/// Set one level across every component.
pub fn set_log_level(level: LogLevel) {
    for source in [
        ErrorSource::Mongolite,
        ErrorSource::Backend,
        ErrorSource::Bob,
        ErrorSource::Matcher,
    ] {
        set_component_level(source, level);
    }
}

/// Set the level of a single component.
pub fn set_component_level(source: ErrorSource, level: LogLevel) {
    slot(source).store(level as u8, Ordering::Relaxed);
}

/// Current level of a component.
pub fn level_of(source: ErrorSource) -> LogLevel {
    LogLevel::decode(slot(source).load(Ordering::Relaxed))
}

#[inline]
pub fn enabled(source: ErrorSource, level: LogLevel) -> bool {
    level != LogLevel::Off && level <= level_of(source)
}

/// Component name as accepted by `MONGOLITE_LOG` overrides. The engine and
/// store answer to their layer aliases too.
fn source_from_name(name: &str) -> Option<ErrorSource> {
    match name.trim().to_ascii_lowercase().as_str() {
        "mongolite" | "engine" => Some(ErrorSource::Mongolite),
        "backend" | "store" => Some(ErrorSource::Backend),
        "bob" | "codec" => Some(ErrorSource::Bob),
        "matcher" | "query" => Some(ErrorSource::Matcher),
        _ => None,
    }
}

/// Apply a `MONGOLITE_LOG`-style specification. Unknown pieces are skipped
/// so a typo cannot make the library unusable.
pub fn apply_env_spec(spec: &str) {
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((component, level)) => {
                if let (Some(source), Some(level)) =
                    (source_from_name(component), LogLevel::parse(level))
                {
                    set_component_level(source, level);
                }
            }
            None => {
                if let Some(level) = LogLevel::parse(part) {
                    set_log_level(level);
                }
            }
        }
    }
}

/// Initialize levels from the MONGOLITE_LOG environment variable, if set.
pub fn init_from_env() {
    if let Ok(value) = std::env::var("MONGOLITE_LOG") {
        apply_env_spec(&value);
    }
}

/// Component a module's log lines belong to, derived from its path. The
/// store logs under the backend tag, the filter machinery under the matcher
/// tag, everything else is the engine itself.
#[doc(hidden)]
pub fn component_for_module(module: &str) -> ErrorSource {
    if module.contains("::store") {
        ErrorSource::Backend
    } else if module.contains("::query") {
        ErrorSource::Matcher
    } else {
        ErrorSource::Mongolite
    }
}

#[doc(hidden)]
pub fn write(source: ErrorSource, level: LogLevel, module: &str, message: &str) {
    if enabled(source, level) {
        eprintln!(
            "[{}/{}] {}: {}",
            source.as_str(),
            level.as_str(),
            module,
            message
        );
    }
}

/// Log an error through its own source tag and stable code, so the line
/// carries the same taxonomy the error value does.
pub fn report(err: &MongoliteError) {
    let source = err.source_lib();
    if enabled(source, LogLevel::Error) {
        eprintln!("[{}/error] code {}: {}", source.as_str(), err.code(), err);
    }
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::write(
            $crate::logging::component_for_module(module_path!()),
            $crate::logging::LogLevel::Error,
            module_path!(),
            &format!($($arg)*),
        )
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::write(
            $crate::logging::component_for_module(module_path!()),
            $crate::logging::LogLevel::Warn,
            module_path!(),
            &format!($($arg)*),
        )
    };
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::write(
            $crate::logging::component_for_module(module_path!()),
            $crate::logging::LogLevel::Info,
            module_path!(),
            &format!($($arg)*),
        )
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::write(
            $crate::logging::component_for_module(module_path!()),
            $crate::logging::LogLevel::Debug,
            module_path!(),
            &format!($($arg)*),
        )
    };
}

/// Log a trace message
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::logging::write(
            $crate::logging::component_for_module(module_path!()),
            $crate::logging::LogLevel::Trace,
            module_path!(),
            &format!($($arg)*),
        )
    };
}
