use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event::SourceType;

/// Finding severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: '{}'", other)),
        }
    }
}

/// A single match expression. Exactly one of `regex` / `contains` must be set;
/// the engine rejects the rule otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PatternSpec {
    /// Event attribute to test. Defaults to the message body.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
    /// Case-insensitive substring match.
    #[serde(default)]
    pub contains: Option<String>,
}

impl PatternSpec {
    pub fn regex(expr: impl Into<String>) -> Self {
        Self {
            regex: Some(expr.into()),
            ..Self::default()
        }
    }

    pub fn contains(needle: impl Into<String>) -> Self {
        Self {
            contains: Some(needle.into()),
            ..Self::default()
        }
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn target_field(&self) -> &str {
        self.field.as_deref().unwrap_or("message")
    }
}

/// What happens to the sliding window after a finding fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowPolicy {
    /// Drop every retained match; the next finding needs a fresh accumulation.
    #[default]
    Clear,
    /// Drop only the oldest `threshold` matches.
    Decrement,
}

/// Detection rule owned by one agent domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub agent_domain: SourceType,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Stable key used to look up the playbook for findings of this rule.
    pub finding_type: String,
    pub patterns: Vec<PatternSpec>,
    pub severity: Severity,
    pub threshold: u32,
    pub window_seconds: u64,
    #[serde(default)]
    pub cooldown_seconds: u64,
    /// Event attributes composing the subject key. Empty means hostname.
    #[serde(default)]
    pub subject_fields: Vec<String>,
    #[serde(default)]
    pub window_policy: WindowPolicy,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// Subject key attributes, falling back to the hostname.
    pub fn subject_fields(&self) -> Vec<&str> {
        if self.subject_fields.is_empty() {
            vec!["hostname"]
        } else {
            self.subject_fields.iter().map(String::as_str).collect()
        }
    }
}
