use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Discriminant of an engine event.
///
/// The engine names its events with dotted keys (`status.progress`,
/// `failure.startup`, ...). Only the kinds this application displays get their
/// own variant; everything else decodes as [`EventKind::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Log,
    Progress,
    MeasurementResult,
    PerformanceUpdate,
    Failure,
    TestComplete,
    Unknown,
}

impl EventKind {
    /// Map an engine event key to its kind.
    pub fn from_key(key: &str) -> Self {
        match key {
            "log" => EventKind::Log,
            "status.progress" => EventKind::Progress,
            "measurement" => EventKind::MeasurementResult,
            "status.update.performance" => EventKind::PerformanceUpdate,
            "task_terminated" => EventKind::TestComplete,
            k if k.starts_with("failure.") => EventKind::Failure,
            _ => EventKind::Unknown,
        }
    }

    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Log => "log",
            EventKind::Progress => "progress",
            EventKind::MeasurementResult => "measurement_result",
            EventKind::PerformanceUpdate => "performance_update",
            EventKind::Failure => "failure",
            EventKind::TestComplete => "test_complete",
            EventKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log severity as reported by the engine.
///
/// The low five bits carry the verbosity, bit 5 marks structured event
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LogSeverity(pub u32);

impl LogSeverity {
    pub const ERR: LogSeverity = LogSeverity(0);
    pub const WARNING: LogSeverity = LogSeverity(1);
    pub const INFO: LogSeverity = LogSeverity(2);
    pub const DEBUG: LogSeverity = LogSeverity(3);
    pub const DEBUG2: LogSeverity = LogSeverity(4);

    pub const VERBOSITY_MASK: u32 = 31;
    pub const EVENT: u32 = 32;

    pub fn verbosity(&self) -> u32 {
        self.0 & Self::VERBOSITY_MASK
    }

    pub fn is_event(&self) -> bool {
        self.0 & Self::EVENT != 0
    }

    /// Parse a level name such as `"WARNING"` (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ERR" | "ERROR" => Some(Self::ERR),
            "WARNING" | "WARN" => Some(Self::WARNING),
            "INFO" => Some(Self::INFO),
            "DEBUG" => Some(Self::DEBUG),
            "DEBUG2" => Some(Self::DEBUG2),
            _ => None,
        }
    }
}

/// Payload carried by an [`Event`], shaped by its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Log { severity: LogSeverity, message: String },
    Progress { percentage: f64, message: String },
    /// Serialized measurement record, passed through without inspection.
    MeasurementResult { result_json: String },
    /// The whole serialized event, unmodified.
    PerformanceUpdate { raw: String },
    Failure { failure: String },
    TestComplete,
    Unknown { key: Option<String>, raw: String },
}

/// One unit of progress, log or result information produced by a running test.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub payload: EventPayload,
}

/// Errors raised while decoding a serialized event
#[derive(Error, Debug)]
pub enum EventDecodeError {
    #[error("event is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("event is not a JSON object")]
    NotAnObject,

    #[error("malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize, Default)]
struct LogValue {
    #[serde(default, alias = "verbosity")]
    log_level: Option<Value>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Default)]
struct ProgressValue {
    #[serde(default)]
    percentage: f64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Default)]
struct MeasurementValue {
    #[serde(default)]
    json_str: String,
}

#[derive(Deserialize, Default)]
struct FailureValue {
    #[serde(default)]
    failure: String,
}

impl Event {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        Self { kind, payload }
    }

    /// Decode one serialized engine event.
    ///
    /// Unknown or missing keys are not an error: they decode to
    /// [`EventKind::Unknown`] so a newer engine never breaks a run.
    pub fn decode(raw: &str) -> Result<Event, EventDecodeError> {
        let document: Value = serde_json::from_str(raw).map_err(EventDecodeError::InvalidJson)?;
        let object = document.as_object().ok_or(EventDecodeError::NotAnObject)?;

        let key = object.get("key").and_then(Value::as_str);
        let kind = key.map(EventKind::from_key).unwrap_or(EventKind::Unknown);
        let value = object
            .get("value")
            .cloned()
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| Value::Object(Default::default()));

        let payload = match kind {
            EventKind::Log => {
                let v: LogValue = parse_value(kind, value)?;
                EventPayload::Log {
                    severity: severity_from_value(v.log_level.as_ref()),
                    message: v.message,
                }
            }
            EventKind::Progress => {
                let v: ProgressValue = parse_value(kind, value)?;
                EventPayload::Progress {
                    percentage: v.percentage.clamp(0.0, 1.0),
                    message: v.message,
                }
            }
            EventKind::MeasurementResult => {
                let v: MeasurementValue = parse_value(kind, value)?;
                EventPayload::MeasurementResult {
                    result_json: v.json_str,
                }
            }
            EventKind::PerformanceUpdate => EventPayload::PerformanceUpdate {
                raw: raw.to_string(),
            },
            EventKind::Failure => {
                let v: FailureValue = parse_value(kind, value)?;
                let failure = if v.failure.is_empty() {
                    key.unwrap_or_default().to_string()
                } else {
                    v.failure
                };
                EventPayload::Failure { failure }
            }
            EventKind::TestComplete => EventPayload::TestComplete,
            EventKind::Unknown => EventPayload::Unknown {
                key: key.map(str::to_string),
                raw: raw.to_string(),
            },
        };

        Ok(Event { kind, payload })
    }
}

fn parse_value<T: for<'de> Deserialize<'de>>(
    kind: EventKind,
    value: Value,
) -> Result<T, EventDecodeError> {
    serde_json::from_value(value).map_err(|source| EventDecodeError::MalformedPayload { kind, source })
}

fn severity_from_value(value: Option<&Value>) -> LogSeverity {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|bits| u32::try_from(bits).ok())
            .map(LogSeverity)
            .unwrap_or(LogSeverity::INFO),
        Some(Value::String(name)) => LogSeverity::from_name(name).unwrap_or(LogSeverity::INFO),
        _ => LogSeverity::INFO,
    }
}

/// Text shown for a progress event: the percentage scaled to 0-100 and
/// rounded, followed by the message.
pub fn format_progress(percentage: f64, message: &str) -> String {
    format!("{:.0}% {}", percentage * 100.0, message)
}
