//! Per-component logging control.
//!
//! Emulation hot paths log through [`log()`] with a [`LogCategory`] and a
//! [`LogLevel`]. The message closure only runs when that category is enabled,
//! so disabled logging costs one atomic load. Enabled messages are forwarded
//! to the `log` facade under a `nestor::<category>` target; the frontend
//! decides where they end up (the CLI installs `env_logger`).
//!
//! ```rust
//! use nestor_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::CPU, LogLevel::Debug, || {
//!     format!("BRK at PC={:04X}", 0x1234)
//! });
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }

    fn as_log_level(self) -> Option<log::Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(log::Level::Error),
            LogLevel::Warn => Some(log::Level::Warn),
            LogLevel::Info => Some(log::Level::Info),
            LogLevel::Debug => Some(log::Level::Debug),
            LogLevel::Trace => Some(log::Level::Trace),
        }
    }
}

/// Log category for different emulator components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Instruction execution, illegal opcodes
    CPU,
    /// CPU-visible memory map
    Bus,
    /// Picture unit register traffic and frame timing
    PPU,
    /// Audio unit and the sample bridge
    APU,
    /// Bank switching and cartridge IRQs
    Mapper,
    /// NMI / IRQ delivery
    Interrupts,
    /// Save states, battery RAM and session lifecycle
    State,
}

impl LogCategory {
    pub const ALL: [LogCategory; 7] = [
        LogCategory::CPU,
        LogCategory::Bus,
        LogCategory::PPU,
        LogCategory::APU,
        LogCategory::Mapper,
        LogCategory::Interrupts,
        LogCategory::State,
    ];

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Some(LogCategory::CPU),
            "bus" => Some(LogCategory::Bus),
            "ppu" => Some(LogCategory::PPU),
            "apu" | "audio" => Some(LogCategory::APU),
            "mapper" => Some(LogCategory::Mapper),
            "irq" | "interrupts" => Some(LogCategory::Interrupts),
            "state" => Some(LogCategory::State),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    fn target(self) -> &'static str {
        match self {
            LogCategory::CPU => "nestor::cpu",
            LogCategory::Bus => "nestor::bus",
            LogCategory::PPU => "nestor::ppu",
            LogCategory::APU => "nestor::apu",
            LogCategory::Mapper => "nestor::mapper",
            LogCategory::Interrupts => "nestor::interrupts",
            LogCategory::State => "nestor::state",
        }
    }
}

/// Global logging configuration
pub struct LogConfig {
    /// Applies to every category that has no level of its own
    global_level: AtomicU8,
    /// Indexed by `LogCategory as usize`
    category_levels: [AtomicU8; 7],
}

impl LogConfig {
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: Default::default(),
        }
    }

    /// Get the global singleton instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// A category-specific level wins; `Off` falls back to the global level.
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        let category_level = self.level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.global_level()
        }
    }

    /// Reset all logging to Off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
    }
}

/// Log a message with the specified category and level.
///
/// The closure is only evaluated when the category passes the filter.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    if !LogConfig::global().should_log(category, level) {
        return;
    }
    if let Some(lvl) = level.as_log_level() {
        log::log!(target: category.target(), lvl, "{}", message_fn());
    }
}
