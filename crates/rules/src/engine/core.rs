//! [`RuleEngine`]: per-domain evaluation of classified events against rules.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use logwarden_core::{ClassifiedEvent, Finding, Rule, SourceType};

use crate::audit_log::{AuditLog, ExecutionPhase, LogLevel};

use super::health::{EngineHealth, InvalidRuleStatus};
use super::pattern::CompiledRule;
use super::state::RuleState;
use super::subject::subject_key;
use super::table::{RuleTable, RuleTableHandle};

/// (rule id, subject key)
type StateKey = (String, String);

/// Single-threaded evaluator for one source-type partition.
///
/// Owns every [`RuleState`] of its domain exclusively; callers must feed it
/// events in arrival order. Rules are read from a [`RuleTableHandle`]
/// snapshot per event, so a reload never blocks evaluation and state of rules
/// that keep their id survives it.
pub struct RuleEngine {
    domain: SourceType,
    table: RuleTableHandle,
    states: HashMap<StateKey, RuleState>,
    audit: Arc<AuditLog>,
    /// Last table generation whose invalid rules were written to the audit log.
    audited_generation: Option<u64>,
    events_evaluated: u64,
    findings_emitted: u64,
    findings_suppressed: u64,
}

impl RuleEngine {
    pub fn new(domain: SourceType, table: RuleTableHandle) -> Self {
        Self {
            domain,
            table,
            states: HashMap::new(),
            audit: Arc::new(AuditLog::new()),
            audited_generation: None,
            events_evaluated: 0,
            findings_emitted: 0,
            findings_suppressed: 0,
        }
    }

    /// Engine with its own table built from `rules`.
    pub fn with_rules(domain: SourceType, rules: &[Rule]) -> Self {
        Self::new(domain, RuleTableHandle::new(RuleTable::build(domain, rules, 1)))
    }

    pub fn with_audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn domain(&self) -> SourceType {
        self.domain
    }

    pub fn table_handle(&self) -> &RuleTableHandle {
        &self.table
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Swap in a new rule set. State for rule ids present in both the old and
    /// new table is kept; state of removed rules is dropped on the next sweep.
    pub fn reload(&self, rules: &[Rule]) -> u64 {
        let generation = self.table.reload(rules);
        info!(domain = %self.domain, generation, "rule table reloaded");
        generation
    }

    pub fn state(&self, rule_id: &str, subject: &str) -> Option<&RuleState> {
        self.states.get(&(rule_id.to_string(), subject.to_string()))
    }

    pub fn tracked_subjects(&self) -> usize {
        self.states.len()
    }

    /// Evaluate one event and return the findings it triggered, in rule order.
    ///
    /// Events of another source type are ignored.
    pub fn evaluate(&mut self, event: &ClassifiedEvent) -> Vec<Finding> {
        if event.source_type != self.domain {
            debug!(domain = %self.domain, event_domain = %event.source_type, "ignoring event from another partition");
            return Vec::new();
        }

        let table = self.table.snapshot();
        let now = event.event_time();
        self.audit_table(&table, now);
        self.events_evaluated += 1;

        let mut findings = Vec::new();
        for compiled in table.active() {
            if !compiled.matches(event) {
                continue;
            }
            if let Some(finding) = self.apply_match(compiled, event, now) {
                findings.push(finding);
            }
        }
        findings
    }

    fn apply_match(
        &mut self,
        compiled: &CompiledRule,
        event: &ClassifiedEvent,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        let rule = compiled.rule();
        let subject = subject_key(rule, event);
        let key = (rule.id.clone(), subject.clone());
        if !self.states.contains_key(&key) {
            self.audit.record(
                &rule.id,
                now,
                LogLevel::Debug,
                ExecutionPhase::Match,
                format!("tracking subject '{}'", subject),
            );
        }
        let state = self
            .states
            .entry(key)
            .or_insert_with(|| RuleState::new(subject.clone()));

        state.record(rule, now, event.id);

        if !state.threshold_reached(rule) {
            return None;
        }

        if !state.cooldown_elapsed(rule, now) {
            self.findings_suppressed += 1;
            debug!(rule_id = %rule.id, subject = %subject, "threshold reached during cooldown");
            self.audit.record(
                &rule.id,
                now,
                LogLevel::Debug,
                ExecutionPhase::Cooldown,
                format!("threshold reached for '{}' during cooldown", subject),
            );
            return None;
        }

        let event_ids: Vec<Uuid> = state.event_ids().copied().collect();
        let match_count = state.match_count();
        state.fire(rule, now);

        let finding = build_finding(compiled, event, &subject, now, &event_ids, match_count);
        self.findings_emitted += 1;

        info!(
            domain = %self.domain,
            rule_id = %rule.id,
            subject = %subject,
            finding_id = %finding.id,
            finding_type = %finding.finding_type,
            match_count,
            "finding emitted"
        );
        self.audit.record_with_details(
            &rule.id,
            now,
            LogLevel::Info,
            ExecutionPhase::Finding,
            finding.message.clone(),
            Some(serde_json::json!({
                "finding_id": finding.id,
                "subject_key": subject,
                "match_count": match_count,
            })),
        );

        Some(finding)
    }

    /// Evict idle state and state of rules no longer in the table.
    /// Returns the number of evicted entries.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let table = self.table.snapshot();
        self.audit_table(&table, now);
        let before = self.states.len();
        let mut per_rule: HashMap<String, usize> = HashMap::new();
        let rules: HashMap<&str, &Rule> =
            table.active().iter().map(|c| (c.id(), c.rule())).collect();

        self.states.retain(|(rule_id, _), state| {
            let keep = match rules.get(rule_id.as_str()) {
                Some(rule) => !state.is_idle(rule, now),
                None => false,
            };
            if !keep {
                *per_rule.entry(rule_id.clone()).or_default() += 1;
            }
            keep
        });

        for (rule_id, count) in &per_rule {
            self.audit.record(
                rule_id,
                now,
                LogLevel::Debug,
                ExecutionPhase::Sweep,
                format!("evicted {} idle subject(s)", count),
            );
        }

        let evicted = before - self.states.len();
        if evicted > 0 {
            debug!(domain = %self.domain, evicted, remaining = self.states.len(), "swept rule state");
        }
        evicted
    }

    pub fn health(&self) -> EngineHealth {
        let table = self.table.snapshot();
        EngineHealth {
            domain: self.domain,
            generation: table.generation(),
            rules_total: table.len(),
            rules_active: table.active().len(),
            rules_disabled: table.disabled().len(),
            invalid_rules: table
                .invalid()
                .iter()
                .map(|(rule_id, err)| InvalidRuleStatus {
                    rule_id: rule_id.clone(),
                    error: err.to_string(),
                })
                .collect(),
            tracked_subjects: self.states.len(),
            events_evaluated: self.events_evaluated,
            findings_emitted: self.findings_emitted,
            findings_suppressed: self.findings_suppressed,
        }
    }

    /// Record compile failures once per table generation.
    fn audit_table(&mut self, table: &RuleTable, now: DateTime<Utc>) {
        if self.audited_generation == Some(table.generation()) {
            return;
        }
        self.audited_generation = Some(table.generation());
        for (rule_id, err) in table.invalid() {
            self.audit
                .record(rule_id, now, LogLevel::Error, ExecutionPhase::Compile, err.to_string());
        }
    }
}

fn build_finding(
    compiled: &CompiledRule,
    event: &ClassifiedEvent,
    subject: &str,
    now: DateTime<Utc>,
    event_ids: &[Uuid],
    match_count: usize,
) -> Finding {
    let rule = compiled.rule();
    let mut details = serde_json::Map::new();
    details.insert(
        "event_ids".to_string(),
        serde_json::Value::Array(
            event_ids
                .iter()
                .map(|id| serde_json::Value::String(id.to_string()))
                .collect(),
        ),
    );
    details.insert("match_count".to_string(), match_count.into());
    details.insert("threshold".to_string(), rule.threshold.into());
    details.insert("window_seconds".to_string(), rule.window_seconds.into());
    details.insert("rule_name".to_string(), rule.name.clone().into());
    details.insert(
        "hostname".to_string(),
        event.hostname.clone().map_or(serde_json::Value::Null, Into::into),
    );
    details.insert(
        "process".to_string(),
        event.process_name.clone().map_or(serde_json::Value::Null, Into::into),
    );
    details.insert("source_address".to_string(), event.source_address.clone().into());
    details.insert("message".to_string(), event.message.clone().into());
    for (key, value) in &event.fields {
        details.entry(key.clone()).or_insert_with(|| value.to_json());
    }

    Finding {
        id: Uuid::new_v4(),
        agent_domain: rule.agent_domain,
        rule_id: rule.id.clone(),
        timestamp: now,
        subject_key: subject.to_string(),
        severity: rule.severity,
        finding_type: rule.finding_type.clone(),
        message: format!(
            "{}: {} matching events for {} within {}s",
            rule.name, match_count, subject, rule.window_seconds
        ),
        details,
    }
}
