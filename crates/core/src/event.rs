use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a classified event.
pub type EventId = Uuid;

/// Domain label assigned by the classifier. Each rule engine subscribes to
/// exactly one source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Wifi,
    Security,
    Network,
    System,
    Generic,
}

impl SourceType {
    pub const ALL: [SourceType; 5] = [
        SourceType::Wifi,
        SourceType::Security,
        SourceType::Network,
        SourceType::System,
        SourceType::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Wifi => "wifi",
            SourceType::Security => "security",
            SourceType::Network => "network",
            SourceType::System => "system",
            SourceType::Generic => "generic",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wifi" => Ok(SourceType::Wifi),
            "security" => Ok(SourceType::Security),
            "network" => Ok(SourceType::Network),
            "system" => Ok(SourceType::System),
            "generic" => Ok(SourceType::Generic),
            other => Err(format!("unknown source type: '{}'", other)),
        }
    }
}

/// How a raw line reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Udp,
    Tcp,
    Http,
    Stdin,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
            Protocol::Http => "http",
            Protocol::Stdin => "stdin",
        }
    }
}

/// Metadata supplied by the inbound transport alongside each raw line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMeta {
    pub source_address: String,
    pub arrival_time: DateTime<Utc>,
    pub protocol: Protocol,
}

impl TransportMeta {
    pub fn new(source_address: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            source_address: source_address.into(),
            arrival_time: Utc::now(),
            protocol,
        }
    }

    pub fn at(mut self, arrival_time: DateTime<Utc>) -> Self {
        self.arrival_time = arrival_time;
        self
    }
}

/// Scalar field values extracted by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl FieldValue {
    /// Extract as string slice, only for text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Integer(i) => serde_json::Value::from(*i),
            FieldValue::Float(f) => serde_json::Value::from(*f),
            FieldValue::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

/// A log line after classification. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    pub id: EventId,
    pub arrival_time: DateTime<Utc>,
    pub source_address: String,
    /// Timestamp from the syslog preamble, when one could be parsed.
    pub original_timestamp: Option<DateTime<Utc>>,
    pub hostname: Option<String>,
    pub process_name: Option<String>,
    /// Message body; the whole salvaged line when no preamble was recognised.
    pub message: String,
    pub source_type: SourceType,
    /// Extracted fields in extraction order.
    pub fields: IndexMap<String, FieldValue>,
}

impl ClassifiedEvent {
    /// Look up a value by name. Built-in attributes (`message`, `hostname`,
    /// `process`, `source_address`, `source_type`) shadow extracted fields.
    pub fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "message" => Some(self.message.clone()),
            "hostname" | "host" => self.hostname.clone(),
            "process" | "process_name" => self.process_name.clone(),
            "source_address" => Some(self.source_address.clone()),
            "source_type" => Some(self.source_type.to_string()),
            other => self.fields.get(other).map(|v| v.to_string()),
        }
    }

    /// The time used by rule windows and cooldowns. Arrival time is assigned
    /// by the transport and is monotonic per partition, unlike device clocks.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.arrival_time
    }
}
