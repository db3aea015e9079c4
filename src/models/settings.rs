use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine log level, serialized the way the engine expects it (`"INFO"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Quiet,
    Err,
    Warning,
    #[default]
    Info,
    Debug,
    Debug2,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Quiet => "QUIET",
            LogLevel::Err => "ERR",
            LogLevel::Warning => "WARNING",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Debug2 => "DEBUG2",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single engine option value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

/// Settings document handed to the engine when a test starts.
///
/// Serializes as `{"name": ..., "log_level": ..., "options": {...}}` with the
/// options in insertion order. Built by
/// [`SettingsBuilder`](crate::services::SettingsBuilder), which enforces that
/// the GeoIP paths are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub name: String,
    pub log_level: LogLevel,
    pub options: IndexMap<String, OptionValue>,
}

impl Settings {
    /// Look up an option by name
    pub fn option(&self, key: &str) -> Option<&OptionValue> {
        self.options.get(key)
    }

    /// Look up a text option by name
    pub fn text_option(&self, key: &str) -> Option<&str> {
        match self.options.get(key) {
            Some(OptionValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Serialize to the JSON document the engine reads.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
