use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::SourceType;
use crate::rule::Severity;

/// Unique identifier of a finding.
pub type FindingId = Uuid;

/// A condition detected by a rule. Append-only: never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,
    pub agent_domain: SourceType,
    pub rule_id: String,
    pub timestamp: DateTime<Utc>,
    pub subject_key: String,
    pub severity: Severity,
    pub finding_type: String,
    pub message: String,
    /// Structured payload for template rendering, including `event_ids`.
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl Finding {
    /// Ids of the events that contributed to this finding.
    pub fn event_ids(&self) -> Vec<Uuid> {
        self.details
            .get("event_ids")
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| Uuid::parse_str(s).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}
