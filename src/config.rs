//! Runtime Configuration
//!
//! This module provides configuration for the dm runtime. Configuration can
//! be set programmatically before first use, or loaded from environment
//! variables. Environment loading is the usual path when the library is
//! loaded into a simulator process that never calls Rust code directly.
//!
//! # Environment Variables
//!
//! All environment variables use the `DM_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DM_HEAP_BASE` | Base address of the global heap window | 0x0 |
//! | `DM_HEAP_SIZE` | Size of the global heap window in bytes | 2^47 |
//! | `DM_STRICT_ALIGN` | Enforce natural alignment on region access ("true"/"false") | false |
//! | `DM_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//! | `DM_LOG_FORMAT` | Log output format (plain/json) | plain |
//!
//! Numeric values accept decimal or `0x`-prefixed hexadecimal.
//!
//! # Example
//!
//! ```rust,ignore
//! use dm_runtime::config::RuntimeConfig;
//!
//! // Load from environment with defaults
//! let config = RuntimeConfig::from_env();
//!
//! // Or use the builder pattern
//! let config = RuntimeConfig::builder()
//!     .heap_base(0x8000_0000)
//!     .heap_size(0x1_0000_0000)
//!     .strict_alignment(true)
//!     .build();
//! ```

use std::env;

use crate::log::{LogFormat, LogLevel};

/// Default base address of the global heap window.
pub const DEFAULT_HEAP_BASE: u64 = 0;

/// Default size of the global heap window (covers a 47-bit address range).
pub const DEFAULT_HEAP_SIZE: u64 = 1 << 47;

/// Memory configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Base address of the global heap window.
    /// Default: 0.
    pub heap_base: u64,

    /// Size of the global heap window in bytes.
    /// Default: 2^47.
    pub heap_size: u64,

    /// Enforce natural alignment on multi-byte region accesses.
    /// Default: false (byte-granular backing permits unaligned access).
    pub strict_alignment: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            heap_base: DEFAULT_HEAP_BASE,
            heap_size: DEFAULT_HEAP_SIZE,
            strict_alignment: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Log level.
    /// Default: Info.
    pub level: LogLevel,

    /// Log output format.
    /// Default: Plain.
    pub format: LogFormat,
}

/// Complete runtime configuration.
///
/// Use `RuntimeConfig::default()` for sensible defaults, or
/// `RuntimeConfig::from_env()` to load from environment variables.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Memory configuration.
    pub memory: MemoryConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Create a new builder for `RuntimeConfig`.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Load configuration from `DM_*` environment variables.
    ///
    /// Unset or unparseable variables fall back to their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_u64("DM_HEAP_BASE") {
            config.memory.heap_base = v;
        }
        if let Some(v) = env_u64("DM_HEAP_SIZE") {
            config.memory.heap_size = v;
        }
        if let Some(v) = env_bool("DM_STRICT_ALIGN") {
            config.memory.strict_alignment = v;
        }
        if let Ok(v) = env::var("DM_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&v) {
                config.log.level = level;
            }
        }
        if let Ok(v) = env::var("DM_LOG_FORMAT") {
            if let Some(format) = LogFormat::parse(&v) {
                config.log.format = format;
            }
        }

        config
    }
}

/// Builder for `RuntimeConfig`.
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Set the global heap window base address.
    pub fn heap_base(mut self, base: u64) -> Self {
        self.config.memory.heap_base = base;
        self
    }

    /// Set the global heap window size in bytes.
    pub fn heap_size(mut self, size: u64) -> Self {
        self.config.memory.heap_size = size;
        self
    }

    /// Enable or disable natural-alignment enforcement.
    pub fn strict_alignment(mut self, strict: bool) -> Self {
        self.config.memory.strict_alignment = strict;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Set the log output format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log.format = format;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}

/// Parse a u64 environment variable, accepting decimal or 0x-prefixed hex.
fn env_u64(name: &str) -> Option<u64> {
    let value = env::var(name).ok()?;
    parse_u64(&value)
}

/// Parse a boolean environment variable.
fn env_bool(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a u64 from a string, accepting decimal or 0x-prefixed hex.
pub(crate) fn parse_u64(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}
