//! Request-scoped structured logging.
//!
//! Every entry a request produces carries its request id, the route pattern
//! once one matched, and the microseconds since the request arrived. Entries
//! are emitted as `tracing` events under the `edge` target, with the entry
//! serialised into a single `entry` field so log collectors receive one JSON
//! object per line.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use edge_core::RequestId;
use serde::Serialize;
use serde_json::Value;

/// Severity of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// One structured entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub request_id: String,
    /// Pattern of the matched route.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    pub elapsed_us: u64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl LogEntry {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }

    /// Typed field lookup, mostly for tests.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Logger bound to one request.
///
/// Cheap to clone: the renderer and deferred subtrees each hold a copy so
/// late entries keep the request id after the handler returned.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    request_id: RequestId,
    route: Option<String>,
    started: Instant,
    min_level: LogLevel,
}

impl StructuredLogger {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            route: None,
            started: Instant::now(),
            min_level: LogLevel::Debug,
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Record the matched route; later entries carry it.
    pub fn set_route(&mut self, route: impl Into<String>) {
        self.route = Some(route.into());
    }

    /// Drop entries below `level` before they reach `tracing`.
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn debug(&self, message: &str) {
        self.debug_builder(message).emit();
    }

    pub fn info(&self, message: &str) {
        self.info_builder(message).emit();
    }

    pub fn warn(&self, message: &str) {
        self.warn_builder(message).emit();
    }

    pub fn error(&self, message: &str) {
        self.error_builder(message).emit();
    }

    pub fn debug_builder(&self, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, LogLevel::Debug, message)
    }

    pub fn info_builder(&self, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, LogLevel::Info, message)
    }

    pub fn warn_builder(&self, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, LogLevel::Warn, message)
    }

    pub fn error_builder(&self, message: impl Into<String>) -> LogBuilder<'_> {
        LogBuilder::new(self, LogLevel::Error, message)
    }

    /// A control signal reached `at`. Signals are routing outcomes, so they
    /// log at debug level.
    pub fn signal(&self, signal: &str, at: &str) {
        self.debug_builder("control signal")
            .field("signal", signal)
            .field("at", at)
            .emit();
    }

    /// A failure in user code, logged with the digest the client receives
    /// so the two can be correlated.
    pub fn failure(&self, at: &str, error: &str, digest: &str) {
        self.error_builder(format!("{} failed", at))
            .field("error", error)
            .field("digest", digest)
            .emit();
    }

    fn entry(&self, level: LogLevel, message: String, fields: BTreeMap<String, Value>) -> Option<LogEntry> {
        (level >= self.min_level).then(|| LogEntry {
            level,
            message,
            request_id: self.request_id.to_string(),
            route: self.route.clone(),
            elapsed_us: self.started.elapsed().as_micros() as u64,
            fields,
        })
    }

    fn emit(&self, entry: &LogEntry) {
        let json = entry.to_json();
        let request_id = entry.request_id.as_str();
        match entry.level {
            LogLevel::Debug => tracing::debug!(target: "edge", request_id, entry = %json, "{}", entry.message),
            LogLevel::Info => tracing::info!(target: "edge", request_id, entry = %json, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(target: "edge", request_id, entry = %json, "{}", entry.message),
            LogLevel::Error => tracing::error!(target: "edge", request_id, entry = %json, "{}", entry.message),
        }
    }
}

/// Fields for a single entry.
pub struct LogBuilder<'a> {
    logger: &'a StructuredLogger,
    level: LogLevel,
    message: String,
    fields: BTreeMap<String, Value>,
}

impl<'a> LogBuilder<'a> {
    pub fn new(logger: &'a StructuredLogger, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            logger,
            level,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), Value::String(value.into()));
        self
    }

    pub fn field_i64(mut self, key: &str, value: i64) -> Self {
        self.fields.insert(key.to_string(), Value::from(value));
        self
    }

    pub fn field_bool(mut self, key: &str, value: bool) -> Self {
        self.fields.insert(key.to_string(), Value::Bool(value));
        self
    }

    /// Milliseconds.
    pub fn duration_ms(mut self, key: &str, duration: Duration) -> Self {
        self.fields
            .insert(key.to_string(), Value::from(duration.as_millis() as u64));
        self
    }

    /// Any serialisable value; falls back to its absence on failure.
    pub fn field_json(mut self, key: &str, value: &impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.fields.insert(key.to_string(), value);
        }
        self
    }

    /// The entry `emit` would send, or `None` below the logger's level.
    pub fn build(self) -> Option<LogEntry> {
        self.logger.entry(self.level, self.message, self.fields)
    }

    pub fn emit(self) {
        let logger = self.logger;
        if let Some(entry) = self.build() {
            logger.emit(&entry);
        }
    }
}
