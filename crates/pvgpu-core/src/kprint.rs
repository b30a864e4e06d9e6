//! Leveled stderr logging for the PV transport.
//!
//! Every line carries the level and the emitting module:
//!
//! ```text
//! [ERROR] pvgpu_module::channel: CT: fence 17 failed; reported fence=16
//! ```
//!
//! # Environment Variables
//!
//! - `PVGPU_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace or 0-5
//!   (default: info)
//! - `PVGPU_FLUSH_EPRINT=1` - flush stderr after every line
//!
//! # Usage
//!
//! ```ignore
//! use pvgpu_core::{kerror, kinfo};
//!
//! kinfo!("negotiated caps {}", caps);
//! kerror!("PV: send action {:#X} failed", code);
//! ```

use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

use crate::env::{env_get_bool, env_get_opt};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Off,
            1 => Self::Error,
            2 => Self::Warn,
            3 => Self::Info,
            4 => Self::Debug,
            _ => Self::Trace,
        }
    }

    pub const fn tag(self) -> &'static str {
        const TAGS: [&str; 6] = ["", "[ERROR]", "[WARN] ", "[INFO] ", "[DEBUG]", "[TRACE]"];
        TAGS[self as usize]
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(Self::Off),
            "error" | "1" => Ok(Self::Error),
            "warn" | "2" => Ok(Self::Warn),
            "info" | "3" => Ok(Self::Info),
            "debug" | "4" => Ok(Self::Debug),
            "trace" | "5" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

static INIT: Once = Once::new();
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);

/// Read `PVGPU_LOG_LEVEL` / `PVGPU_FLUSH_EPRINT`. Runs once; later calls
/// are no-ops. Logging calls this lazily.
pub fn init() {
    INIT.call_once(|| {
        if let Some(level) = env_get_opt::<LogLevel>("PVGPU_LOG_LEVEL") {
            LEVEL.store(level as u8, Ordering::Relaxed);
        }
        FLUSH.store(env_get_bool("PVGPU_FLUSH_EPRINT", false), Ordering::Relaxed);
    });
}

#[inline]
pub fn log_level() -> LogLevel {
    init();
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Override the level. Wins over the environment.
pub fn set_log_level(level: LogLevel) {
    init();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, target: &str, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = writeln!(out, "{} {}: {}", level.tag(), target, args);
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[doc(hidden)]
pub fn _kprintln_impl(args: std::fmt::Arguments<'_>) {
    init();
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = writeln!(out, "{}", args);
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

/// Unconditional line to stderr, no level tag.
#[macro_export]
macro_rules! kprintln {
    () => {{
        $crate::kprint::_kprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_kprintln_impl(format_args!($($arg)*));
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::$level,
            module_path!(),
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! kerror { ($($arg:tt)*) => { $crate::__klog!(Error, $($arg)*) }; }
#[macro_export]
macro_rules! kwarn { ($($arg:tt)*) => { $crate::__klog!(Warn, $($arg)*) }; }
#[macro_export]
macro_rules! kinfo { ($($arg:tt)*) => { $crate::__klog!(Info, $($arg)*) }; }
#[macro_export]
macro_rules! kdebug { ($($arg:tt)*) => { $crate::__klog!(Debug, $($arg)*) }; }
#[macro_export]
macro_rules! ktrace { ($($arg:tt)*) => { $crate::__klog!(Trace, $($arg)*) }; }
