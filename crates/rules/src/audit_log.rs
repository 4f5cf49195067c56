//! In-memory structured audit log for rule evaluation.
//!
//! Stores per-rule entries capped at a configurable maximum (default 500)
//! with FIFO eviction. Uses `std::sync::RwLock` so engine tasks and the
//! worker's status reporting can share one instance.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_ENTRIES_PER_RULE: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Engine step that produced the entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Compile,
    Match,
    Cooldown,
    Finding,
    Sweep,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub rule_id: String,
    pub level: LogLevel,
    pub phase: ExecutionPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    /// Minimum level (inclusive).
    pub level: Option<LogLevel>,
    pub phase: Option<ExecutionPhase>,
    /// Defaults to 100.
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

/// Per-rule audit log with FIFO eviction.
pub struct AuditLog {
    entries: RwLock<HashMap<String, VecDeque<LogEntry>>>,
    max_entries_per_rule: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES_PER_RULE)
    }

    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries_per_rule: max.max(1),
        }
    }

    /// Append an entry stamped with `at`, which is the engine's event time
    /// rather than the wall clock.
    pub fn record(
        &self,
        rule_id: &str,
        at: DateTime<Utc>,
        level: LogLevel,
        phase: ExecutionPhase,
        message: impl Into<String>,
    ) {
        self.record_with_details(rule_id, at, level, phase, message, None);
    }

    pub fn record_with_details(
        &self,
        rule_id: &str,
        at: DateTime<Utc>,
        level: LogLevel,
        phase: ExecutionPhase,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        let entry = LogEntry {
            timestamp: at,
            rule_id: rule_id.to_string(),
            level,
            phase,
            message: message.into(),
            details,
        };

        let mut guard = self.entries.write().expect("audit_log lock poisoned");
        let deque = guard.entry(rule_id.to_string()).or_default();
        deque.push_back(entry);
        while deque.len() > self.max_entries_per_rule {
            deque.pop_front();
        }
    }

    /// Entries for a rule, newest first.
    pub fn query(&self, rule_id: &str, query: &LogQuery) -> Vec<LogEntry> {
        let guard = self.entries.read().expect("audit_log lock poisoned");
        let Some(deque) = guard.get(rule_id) else {
            return Vec::new();
        };

        let min_level = query.level.unwrap_or(LogLevel::Debug);
        let limit = query.limit.unwrap_or(100);

        deque
            .iter()
            .rev()
            .filter(|e| e.level >= min_level)
            .filter(|e| query.phase.map_or(true, |p| e.phase == p))
            .filter(|e| query.since.map_or(true, |s| e.timestamp >= s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn rule_ids(&self) -> Vec<String> {
        let guard = self.entries.read().expect("audit_log lock poisoned");
        let mut ids: Vec<String> = guard.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop entries for rules not in `keep`.
    pub fn retain_rules(&self, keep: &[&str]) {
        let mut guard = self.entries.write().expect("audit_log lock poisoned");
        guard.retain(|id, _| keep.contains(&id.as_str()));
    }

    pub fn clear(&self, rule_id: &str) {
        let mut guard = self.entries.write().expect("audit_log lock poisoned");
        guard.remove(rule_id);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
