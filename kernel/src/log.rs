// Kernel Logging Subsystem
//
// Structured, leveled, timestamped logging for the concurrency core.
//
// Key responsibilities:
// - Provide standardized log levels (Debug, Info, Warn, Error, Panic)
// - Attach a tick-derived timestamp and subsystem origin to every entry
// - Include source location only for DEBUG entries (file:line)
// - Deliver every entry to the serial port
//
// Design principles:
// - Messages below the current level are dropped before any formatting
// - Early-boot friendly: usable before the scheduler or timer exist
//   (timestamps read 0.000s until the tick source runs)
// - No allocation anywhere on the logging path
//
// Convenience macros (`log_debug!` .. `log_panic!`) wrap `_log` and
// capture `file!()` / `line!()` automatically. The first macro argument is
// the subsystem origin tag ("sched", "timer", "sync", ...).

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
#[allow(dead_code)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Panic = 4,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
            LogLevel::Panic => "PANIC",
        }
    }

    fn from_raw(raw: u8) -> LogLevel {
        match raw {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Panic,
        }
    }
}

static CURRENT_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Debug as u8);

pub fn init() {
    set_level(LogLevel::Debug);
}

pub fn set_level(level: LogLevel) {
    CURRENT_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn get_level() -> LogLevel {
    LogLevel::from_raw(CURRENT_LOG_LEVEL.load(Ordering::Relaxed))
}

fn get_timestamp_ms() -> u64 {
    crate::timer::ticks() * 1_000 / crate::timer::TICK_HZ as u64
}

fn format_timestamp(ms: u64) -> (u64, u64) {
    (ms / 1000, ms % 1000)
}

pub fn _log(level: LogLevel, origin: &str, args: fmt::Arguments, file: &str, line: u32) {
    if level < get_level() {
        return;
    }

    let (seconds, milliseconds) = format_timestamp(get_timestamp_ms());
    let level_str = level.as_str();

    if level == LogLevel::Debug {
        crate::serial::_print(format_args!(
            "[t={}.{:03}s] [{}] [{}] {} ({}:{})\n",
            seconds, milliseconds, level_str, origin, args, file, line
        ));
    } else {
        crate::serial::_print(format_args!(
            "[t={}.{:03}s] [{}] [{}] {}\n",
            seconds, milliseconds, level_str, origin, args
        ));
    }
}

#[macro_export]
macro_rules! log_debug {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Debug,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_info {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Info,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Warn,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Error,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_panic {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Panic,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}
