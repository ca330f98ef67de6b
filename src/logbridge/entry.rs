use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a streamed log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of session output as delivered to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(timestamp: i64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            message: message.into(),
        }
    }

    /// Entry stamped with the current wall-clock time
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self::new(chrono::Utc::now().timestamp_millis(), level, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::now(LogLevel::Error, message)
    }

    /// Text-event-stream framing: `data: <JSON>\n\n`
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("data: {}\n\n", json))
    }
}
