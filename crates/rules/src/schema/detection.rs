//! `DetectionRule` documents.

use serde::{Deserialize, Serialize};

use logwarden_core::{PatternSpec, Rule, Severity, SourceType, WindowPolicy};

use super::CommonMetadata;

/// Detection rule as written in YAML.
///
/// ```yaml
/// apiVersion: v1
/// kind: DetectionRule
/// metadata:
///   id: ssh-auth-fail-flood
///   name: SSH brute force
/// agent_domain: security
/// finding_type: AUTH_FAIL_FLOOD
/// severity: high
/// patterns:
///   - contains: "bad password"
/// threshold: 5
/// window_seconds: 60
/// cooldown_seconds: 300
/// subject: [hostname, ip]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DetectionRuleDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: CommonMetadata,
    pub agent_domain: SourceType,
    pub finding_type: String,
    pub severity: Severity,
    pub patterns: Vec<PatternSpec>,
    pub threshold: u32,
    pub window_seconds: u64,
    #[serde(default)]
    pub cooldown_seconds: u64,
    /// Event attributes composing the subject key; hostname when empty.
    #[serde(default)]
    pub subject: Vec<String>,
    #[serde(default)]
    pub window_policy: WindowPolicy,
}

impl DetectionRuleDocument {
    pub fn to_rule(&self) -> Rule {
        Rule {
            id: self.metadata.id.clone(),
            agent_domain: self.agent_domain,
            name: self.metadata.name.clone(),
            description: self.metadata.description.clone(),
            finding_type: self.finding_type.clone(),
            patterns: self.patterns.clone(),
            severity: self.severity,
            threshold: self.threshold,
            window_seconds: self.window_seconds,
            cooldown_seconds: self.cooldown_seconds,
            subject_fields: self.subject.clone(),
            window_policy: self.window_policy,
            enabled: self.metadata.enabled,
        }
    }
}
