//! Structured logging collaborators.
//!
//! A cache instance receives its logger at construction instead of reaching
//! for process-wide state, so two caches in one process (or two tests) never
//! see each other's output.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

/// Log level for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trace => write!(f, "TRACE"),
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// A structured log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Log level.
    pub level: LogLevel,
    /// Log message.
    pub message: String,
    /// Additional structured fields.
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogEntry {
    /// Create an entry without fields.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Get a field value.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    /// Format as JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }

    /// Format as human-readable string.
    pub fn to_human(&self) -> String {
        let mut s = format!("[{}] {}", self.level, self.message);

        if !self.fields.is_empty() {
            s.push_str(" | ");
            let fields: Vec<String> = self
                .fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            s.push_str(&fields.join(" "));
        }

        s
    }
}

/// Sink for the cache engine's log events.
pub trait CacheLogger: Send + Sync {
    /// Record an entry.
    fn log(&self, entry: LogEntry);

    /// Whether entries at `level` are recorded at all.
    fn enabled(&self, _level: LogLevel) -> bool {
        true
    }
}

impl dyn CacheLogger {
    /// Start building a debug log entry.
    pub fn debug(&self, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, LogLevel::Debug, message)
    }

    /// Start building an info log entry.
    pub fn info(&self, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, LogLevel::Info, message)
    }

    /// Start building a warn log entry.
    pub fn warn(&self, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, LogLevel::Warn, message)
    }

    /// Start building an error log entry.
    pub fn error(&self, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, LogLevel::Error, message)
    }
}

/// Builder for log entries with fluent API.
pub struct LogBuilder<'a> {
    logger: &'a dyn CacheLogger,
    entry: LogEntry,
}

impl<'a> LogBuilder<'a> {
    /// Create a new log builder.
    pub fn new(logger: &'a dyn CacheLogger, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            logger,
            entry: LogEntry::new(level, message),
        }
    }

    /// Add a string field.
    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.entry
            .fields
            .insert(key.to_string(), serde_json::json!(value.into()));
        self
    }

    /// Add an integer field.
    pub fn field_u64(mut self, key: &str, value: u64) -> Self {
        self.entry
            .fields
            .insert(key.to_string(), serde_json::json!(value));
        self
    }

    /// Add a boolean field.
    pub fn field_bool(mut self, key: &str, value: bool) -> Self {
        self.entry
            .fields
            .insert(key.to_string(), serde_json::json!(value));
        self
    }

    /// Add an error field, rendered with its display form.
    pub fn error(mut self, error: &dyn fmt::Display) -> Self {
        self.entry
            .fields
            .insert("error".to_string(), serde_json::json!(error.to_string()));
        self
    }

    /// Emit the log entry.
    pub fn emit(self) {
        if self.logger.enabled(self.entry.level) {
            self.logger.log(self.entry);
        }
    }
}

/// Logger that forwards entries to `tracing` events.
///
/// This is the default logger of a cache instance; the embedding application
/// decides where events go by installing a subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl CacheLogger for TracingLogger {
    fn log(&self, entry: LogEntry) {
        let fields = serde_json::Value::Object(entry.fields.into_iter().collect());
        match entry.level {
            LogLevel::Trace => tracing::trace!(target: "edge_cache", %fields, "{}", entry.message),
            LogLevel::Debug => tracing::debug!(target: "edge_cache", %fields, "{}", entry.message),
            LogLevel::Info => tracing::info!(target: "edge_cache", %fields, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(target: "edge_cache", %fields, "{}", entry.message),
            LogLevel::Error => tracing::error!(target: "edge_cache", %fields, "{}", entry.message),
        }
    }
}

/// Output format for logs.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON format (for production/log aggregation).
    #[default]
    Json,
    /// Human-readable format (for development).
    Human,
}

/// Logger that writes one line per entry to stderr.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    min_level: LogLevel,
    format: LogFormat,
}

impl StructuredLogger {
    /// Create a JSON logger at info level.
    pub fn new() -> Self {
        Self {
            min_level: LogLevel::Info,
            format: LogFormat::Json,
        }
    }

    /// Set minimum log level.
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Set output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Render an entry in the configured format.
    pub fn render(&self, entry: &LogEntry) -> String {
        match self.format {
            LogFormat::Json => entry.to_json(),
            LogFormat::Human => entry.to_human(),
        }
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheLogger for StructuredLogger {
    fn log(&self, entry: LogEntry) {
        eprintln!("{}", self.render(&entry));
    }

    fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }
}

/// Logger that keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemoryLogger {
    /// Create an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    /// Entries recorded at `level`.
    pub fn at_level(&self, level: LogLevel) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    /// Whether any entry's message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lock().iter().any(|e| e.message.contains(needle))
    }

    /// Drop all recorded entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CacheLogger for MemoryLogger {
    fn log(&self, entry: LogEntry) {
        self.lock().push(entry);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_builder_collects_fields() {
        let memory = Arc::new(MemoryLogger::new());
        let logger: Arc<dyn CacheLogger> = memory.clone();

        logger
            .warn("tag index unreadable")
            .field("key", "idx")
            .field_u64("attempt", 3)
            .field_bool("reset", true)
            .emit();

        let entries = memory.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Warn);
        assert_eq!(entries[0].field("key"), Some(&serde_json::json!("idx")));
        assert_eq!(entries[0].field("attempt"), Some(&serde_json::json!(3)));
        assert!(memory.contains("unreadable"));
    }

    #[test]
    fn test_loggers_are_isolated() {
        let first = Arc::new(MemoryLogger::new());
        let second = Arc::new(MemoryLogger::new());
        let logger: Arc<dyn CacheLogger> = first.clone();

        logger.info("only first").emit();

        assert_eq!(first.entries().len(), 1);
        assert!(second.entries().is_empty());
    }

    #[test]
    fn test_structured_logger_level_filter() {
        let logger = StructuredLogger::new().with_min_level(LogLevel::Warn);
        assert!(!logger.enabled(LogLevel::Info));
        assert!(logger.enabled(LogLevel::Error));
    }

    #[test]
    fn test_entry_formats() {
        let mut entry = LogEntry::new(LogLevel::Error, "revalidation failed");
        entry
            .fields
            .insert("key".to_string(), serde_json::json!("k1"));

        assert_eq!(entry.to_human(), r#"[ERROR] revalidation failed | key="k1""#);

        let json: serde_json::Value = serde_json::from_str(&entry.to_json()).unwrap();
        assert_eq!(json["level"], "error");
        assert_eq!(json["key"], "k1");
    }

    #[test]
    fn test_error_field() {
        let memory = Arc::new(MemoryLogger::new());
        let logger: Arc<dyn CacheLogger> = memory.clone();

        logger.error("write failed").error(&"disk full").emit();

        assert_eq!(
            memory.entries()[0].field("error"),
            Some(&serde_json::json!("disk full"))
        );
    }
}
