use serde::Serialize;

use logwarden_core::SourceType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidRuleStatus {
    pub rule_id: String,
    pub error: String,
}

/// Point-in-time engine status for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineHealth {
    pub domain: SourceType,
    pub generation: u64,
    pub rules_total: usize,
    pub rules_active: usize,
    pub rules_disabled: usize,
    pub invalid_rules: Vec<InvalidRuleStatus>,
    pub tracked_subjects: usize,
    pub events_evaluated: u64,
    pub findings_emitted: u64,
    pub findings_suppressed: u64,
}

impl EngineHealth {
    pub fn is_degraded(&self) -> bool {
        !self.invalid_rules.is_empty()
    }
}
