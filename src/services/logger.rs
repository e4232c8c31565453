use crate::constants::limits::LOG_LINE_LENGTH;
use crate::utils::redact::{redact_text, redact_value};
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn from_env() -> Self {
        Self::parse(&std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }

    fn rank(self) -> u8 {
        match self {
            LogLevel::Error => 0,
            LogLevel::Warn => 1,
            LogLevel::Info => 2,
            LogLevel::Debug => 3,
        }
    }

    fn allows(self, other: LogLevel) -> bool {
        other.rank() <= self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: LogLevel,
    pub context: String,
    pub message: String,
    pub meta: Option<Value>,
}

impl LogRecord {
    pub fn render(&self) -> String {
        let meta_suffix = self
            .meta
            .as_ref()
            .filter(|m| !m.is_null())
            .map(|m| format!(" {}", m))
            .unwrap_or_default();
        format!(
            "[{}] {} [{}] {}{}",
            self.timestamp,
            self.level.as_str(),
            self.context,
            self.message,
            meta_suffix
        )
    }
}

/// Destination for log records. Shared by concurrent sessions, so every
/// implementation must tolerate concurrent appends.
pub trait LogSink: Send + Sync {
    fn append(&self, record: LogRecord);
}

#[derive(Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn append(&self, record: LogRecord) {
        eprintln!("{}", record.render());
    }
}

/// Keeps records in memory; used by tests and by callers that render the log
/// themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.records().iter().map(LogRecord::render).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.rendered().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn append(&self, record: LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(record);
    }
}

#[derive(Debug, Default)]
struct Counters {
    error: u64,
    warn: u64,
    info: u64,
    debug: u64,
}

#[derive(Clone)]
pub struct Logger {
    context: String,
    level: LogLevel,
    counters: Arc<Mutex<Counters>>,
    sink: Arc<dyn LogSink>,
    secrets: Arc<Vec<String>>,
}

impl Logger {
    pub fn new(context: &str) -> Self {
        Self::with_sink(context, Arc::new(StderrSink))
    }

    pub fn with_sink(context: &str, sink: Arc<dyn LogSink>) -> Self {
        Self {
            context: context.to_string(),
            level: LogLevel::from_env(),
            counters: Arc::new(Mutex::new(Counters::default())),
            sink,
            secrets: Arc::new(Vec::new()),
        }
    }

    pub fn child(&self, suffix: &str) -> Self {
        let context = if suffix.is_empty() {
            self.context.clone()
        } else {
            format!("{}:{}", self.context, suffix)
        };
        Self {
            context,
            level: self.level,
            counters: self.counters.clone(),
            sink: self.sink.clone(),
            secrets: self.secrets.clone(),
        }
    }

    /// Child logger that scrubs `secrets` from every message and metadata value.
    pub fn redacting(&self, secrets: Vec<String>) -> Self {
        let mut merged = (*self.secrets).clone();
        merged.extend(secrets.into_iter().filter(|s| !s.trim().is_empty()));
        let mut out = self.child("");
        out.secrets = Arc::new(merged);
        out
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.level = level;
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    fn log(&self, level: LogLevel, message: &str, meta: Option<&Value>) {
        if !self.level.allows(level) {
            return;
        }
        if let Ok(mut counters) = self.counters.lock() {
            match level {
                LogLevel::Error => counters.error += 1,
                LogLevel::Warn => counters.warn += 1,
                LogLevel::Info => counters.info += 1,
                LogLevel::Debug => counters.debug += 1,
            }
        }
        self.sink.append(LogRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            context: self.context.clone(),
            message: redact_text(message, LOG_LINE_LENGTH, &self.secrets),
            meta: meta.map(|m| redact_value(m, LOG_LINE_LENGTH, &self.secrets)),
        });
    }

    pub fn error(&self, message: &str, meta: Option<&Value>) {
        self.log(LogLevel::Error, message, meta);
    }

    pub fn warn(&self, message: &str, meta: Option<&Value>) {
        self.log(LogLevel::Warn, message, meta);
    }

    pub fn info(&self, message: &str, meta: Option<&Value>) {
        self.log(LogLevel::Info, message, meta);
    }

    pub fn debug(&self, message: &str, meta: Option<&Value>) {
        self.log(LogLevel::Debug, message, meta);
    }

    pub fn stats(&self) -> Value {
        let counters = self.counters.lock().unwrap_or_else(|err| err.into_inner());
        serde_json::json!({
            "level": format!("{:?}", self.level).to_lowercase(),
            "context": self.context,
            "error": counters.error,
            "warn": counters.warn,
            "info": counters.info,
            "debug": counters.debug,
        })
    }
}
