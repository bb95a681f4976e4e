//! Logging Infrastructure
//!
//! Runtime-owned structured logging for the dm runtime. Simulators embed
//! this library through a C boundary, so logging must work without any host
//! logging framework: a process-wide level filter, timestamped entries, and
//! plain or JSON output on stderr.
//!
//! # Example
//!
//! ```rust,ignore
//! use dm_runtime::log::{self, LogLevel, LogBuilder, LogValue};
//!
//! log::info("runtime initialized");
//!
//! LogBuilder::new(LogLevel::Error)
//!     .target("dm")
//!     .message("out of bounds access")
//!     .field("addr", LogValue::Addr(0x1f40))
//!     .field("size", LogValue::Addr(0x1000))
//!     .emit();
//! ```

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace = 0,
    /// Debug level.
    Debug = 1,
    /// Info level.
    Info = 2,
    /// Warning level.
    Warn = 3,
    /// Error level.
    Error = 4,
    /// Off (no logging).
    Off = 5,
}

impl LogLevel {
    /// Get the level name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Off => "OFF",
        }
    }

    /// Get the level from a u8.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(LogLevel::Trace),
            1 => Some(LogLevel::Debug),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Warn),
            4 => Some(LogLevel::Error),
            5 => Some(LogLevel::Off),
            _ => None,
        }
    }

    /// Parse a log level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" | "err" => Some(LogLevel::Error),
            "off" | "none" => Some(LogLevel::Off),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Output format for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogFormat {
    /// Plain text format (human readable).
    Plain = 0,
    /// JSON format (machine readable).
    Json = 1,
}

impl LogFormat {
    /// Parse a format from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plain" | "text" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Plain
    }
}

/// A value in a structured log entry.
#[derive(Debug, Clone)]
pub enum LogValue {
    /// String value.
    String(String),
    /// Integer value.
    Int(i64),
    /// Address or size value, rendered in hex.
    Addr(u64),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::String(s) => write!(f, "{}", s),
            LogValue::Int(i) => write!(f, "{}", i),
            LogValue::Addr(a) => write!(f, "{:#x}", a),
            LogValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl LogValue {
    /// Format as a JSON value.
    fn to_json(&self) -> String {
        match self {
            LogValue::String(s) => format!("\"{}\"", escape_json(s)),
            LogValue::Int(i) => i.to_string(),
            LogValue::Addr(a) => format!("\"{:#x}\"", a),
            LogValue::Bool(b) => b.to_string(),
        }
    }
}

/// A key-value field in a structured log entry.
#[derive(Debug, Clone)]
pub struct LogField {
    /// Field key.
    pub key: String,
    /// Field value.
    pub value: LogValue,
}

/// A log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level.
    pub level: LogLevel,
    /// Log message.
    pub message: String,
    /// Structured fields.
    pub fields: Vec<LogField>,
    /// Timestamp (Unix milliseconds).
    pub timestamp: u64,
    /// Module/target name.
    pub target: Option<String>,
}

impl LogEntry {
    /// Create a new log entry.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            level,
            message: message.into(),
            fields: Vec::new(),
            timestamp,
            target: None,
        }
    }

    /// Format as plain text.
    pub fn format_plain(&self) -> String {
        let mut output = String::new();

        let secs = self.timestamp / 1000;
        let millis = self.timestamp % 1000;
        output.push_str(&format!("[{}.{:03}] ", secs, millis));
        output.push_str(&format!("{:<5} ", self.level.as_str()));

        if let Some(target) = &self.target {
            output.push_str(&format!("[{}] ", target));
        }

        output.push_str(&self.message);

        if !self.fields.is_empty() {
            output.push_str(" {");
            for (i, field) in self.fields.iter().enumerate() {
                if i > 0 {
                    output.push_str(", ");
                }
                output.push_str(&format!("{}={}", field.key, field.value));
            }
            output.push('}');
        }

        output
    }

    /// Format as JSON.
    pub fn format_json(&self) -> String {
        let mut output = String::from("{");
        output.push_str(&format!("\"timestamp\":{}", self.timestamp));
        output.push_str(&format!(",\"level\":\"{}\"", self.level.as_str()));

        if let Some(target) = &self.target {
            output.push_str(&format!(",\"target\":\"{}\"", escape_json(target)));
        }

        output.push_str(&format!(",\"message\":\"{}\"", escape_json(&self.message)));

        if !self.fields.is_empty() {
            output.push_str(",\"fields\":{");
            for (i, field) in self.fields.iter().enumerate() {
                if i > 0 {
                    output.push(',');
                }
                output.push_str(&format!(
                    "\"{}\":{}",
                    escape_json(&field.key),
                    field.value.to_json()
                ));
            }
            output.push('}');
        }

        output.push('}');
        output
    }

    /// Format according to the given format.
    pub fn format(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Plain => self.format_plain(),
            LogFormat::Json => self.format_json(),
        }
    }
}

/// Escape a string for JSON output.
fn escape_json(s: &str) -> String {
    let mut output = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if (c as u32) < 0x20 => output.push_str(&format!("\\u{:04x}", c as u32)),
            c => output.push(c),
        }
    }
    output
}

/// Minimum level that will be emitted.
static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Active output format.
static FORMAT: AtomicU8 = AtomicU8::new(LogFormat::Plain as u8);

/// Set the minimum log level.
pub fn set_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// Get the current minimum log level.
pub fn level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::SeqCst)).unwrap_or(LogLevel::Info)
}

/// Set the output format.
pub fn set_format(format: LogFormat) {
    FORMAT.store(format as u8, Ordering::SeqCst);
}

/// Get the current output format.
pub fn format() -> LogFormat {
    match FORMAT.load(Ordering::SeqCst) {
        1 => LogFormat::Json,
        _ => LogFormat::Plain,
    }
}

/// Check if a log level would be logged.
pub fn would_log(level: LogLevel) -> bool {
    level != LogLevel::Off && level >= self::level()
}

/// Emit a log entry.
pub fn emit(entry: &LogEntry) {
    if !would_log(entry.level) {
        return;
    }
    let output = entry.format(format());
    let _ = writeln!(std::io::stderr(), "{}", output);
}

/// Builder for log entries.
#[derive(Debug)]
pub struct LogBuilder {
    entry: LogEntry,
}

impl LogBuilder {
    /// Create a new log builder.
    pub fn new(level: LogLevel) -> Self {
        Self {
            entry: LogEntry::new(level, ""),
        }
    }

    /// Set the message.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.entry.message = msg.into();
        self
    }

    /// Set the target.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.entry.target = Some(target.into());
        self
    }

    /// Add a field.
    pub fn field(mut self, key: impl Into<String>, value: LogValue) -> Self {
        self.entry.fields.push(LogField {
            key: key.into(),
            value,
        });
        self
    }

    /// Emit the log entry.
    pub fn emit(self) {
        emit(&self.entry);
    }
}

/// Log a message at the given level.
pub fn log(level: LogLevel, message: impl Into<String>) {
    if !would_log(level) {
        return;
    }
    let entry = LogEntry::new(level, message);
    emit(&entry);
}

/// Log a trace message.
pub fn trace(message: impl Into<String>) {
    log(LogLevel::Trace, message);
}

/// Log a debug message.
pub fn debug(message: impl Into<String>) {
    log(LogLevel::Debug, message);
}

/// Log an info message.
pub fn info(message: impl Into<String>) {
    log(LogLevel::Info, message);
}

/// Log a warning message.
pub fn warn(message: impl Into<String>) {
    log(LogLevel::Warn, message);
}

/// Log an error message.
pub fn error(message: impl Into<String>) {
    log(LogLevel::Error, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Off);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("Info"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("error"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("invalid"), None);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("plain"), Some(LogFormat::Plain));
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Plain));
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("invalid"), None);
    }

    #[test]
    fn test_entry_format_plain() {
        let mut entry = LogEntry::new(LogLevel::Warn, "write out of bounds");
        entry.target = Some("dm".into());
        entry.fields.push(LogField {
            key: "addr".into(),
            value: LogValue::Addr(0x1000),
        });

        let plain = entry.format_plain();
        assert!(plain.contains("WARN"));
        assert!(plain.contains("[dm]"));
        assert!(plain.contains("write out of bounds"));
        assert!(plain.contains("addr=0x1000"));
    }

    #[test]
    fn test_entry_format_json() {
        let mut entry = LogEntry::new(LogLevel::Error, "stale handle");
        entry.fields.push(LogField {
            key: "handle".into(),
            value: LogValue::Addr(0x2a),
        });

        let json = entry.format_json();
        assert!(json.contains("\"level\":\"ERROR\""));
        assert!(json.contains("\"message\":\"stale handle\""));
        assert!(json.contains("\"handle\":\"0x2a\""));
    }

    #[test]
    fn test_escape_json() {
        assert_eq!(escape_json("hello"), "hello");
        assert_eq!(escape_json("a\"b"), "a\\\"b");
        assert_eq!(escape_json("line1\nline2"), "line1\\nline2");
        assert_eq!(escape_json("path\\to"), "path\\\\to");
    }

    #[test]
    fn test_would_log() {
        let original = level();
        set_level(LogLevel::Warn);
        assert!(!would_log(LogLevel::Debug));
        assert!(!would_log(LogLevel::Info));
        assert!(would_log(LogLevel::Warn));
        assert!(would_log(LogLevel::Error));
        assert!(!would_log(LogLevel::Off));
        set_level(original); // Restore
    }

    #[test]
    fn test_log_builder() {
        let builder = LogBuilder::new(LogLevel::Info)
            .message("region allocated")
            .target("heap")
            .field("base", LogValue::Addr(0x8000_0000))
            .field("size", LogValue::Addr(0x100));

        assert_eq!(builder.entry.level, LogLevel::Info);
        assert_eq!(builder.entry.message, "region allocated");
        assert_eq!(builder.entry.target, Some("heap".to_string()));
        assert_eq!(builder.entry.fields.len(), 2);
    }
}
