//! Sliding-window state for one (rule, subject) pair.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use logwarden_core::{EventId, Rule, WindowPolicy};

/// Matches retained within the rule window plus the last finding time.
///
/// The deque is bounded at twice the rule threshold: the threshold test
/// only needs the newest `threshold` entries, the slack keeps `match_count`
/// meaningful while a cooldown suppresses findings.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleState {
    subject_key: String,
    matches: VecDeque<(DateTime<Utc>, EventId)>,
    last_finding_time: Option<DateTime<Utc>>,
}

impl RuleState {
    pub fn new(subject_key: impl Into<String>) -> Self {
        Self {
            subject_key: subject_key.into(),
            matches: VecDeque::new(),
            last_finding_time: None,
        }
    }

    pub fn subject_key(&self) -> &str {
        &self.subject_key
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn last_finding_time(&self) -> Option<DateTime<Utc>> {
        self.last_finding_time
    }

    pub fn event_ids(&self) -> impl Iterator<Item = &EventId> {
        self.matches.iter().map(|(_, id)| id)
    }

    /// Drop matches with `now - t >= window`. Matches are kept in arrival
    /// order, which is not always timestamp order.
    pub fn evict_expired(&mut self, now: DateTime<Utc>, window: Duration) {
        self.matches.retain(|(t, _)| now - *t < window);
    }

    /// Evict, then append the current match. The current match is always
    /// retained, so a zero-second window counts exactly this event.
    ///
    /// A redelivered event id already in the window is not counted twice.
    pub fn record(&mut self, rule: &Rule, now: DateTime<Utc>, event_id: EventId) {
        self.evict_expired(now, window(rule));
        if self.matches.iter().any(|(_, id)| *id == event_id) {
            return;
        }
        self.matches.push_back((now, event_id));
        let cap = rule.threshold.max(1) as usize * 2;
        while self.matches.len() > cap {
            self.matches.pop_front();
        }
    }

    pub fn threshold_reached(&self, rule: &Rule) -> bool {
        self.matches.len() >= rule.threshold as usize
    }

    pub fn cooldown_elapsed(&self, rule: &Rule, now: DateTime<Utc>) -> bool {
        self.last_finding_time
            .map_or(true, |last| now - last >= cooldown(rule))
    }

    /// Mark a finding at `now` and apply the rule's window policy.
    pub fn fire(&mut self, rule: &Rule, now: DateTime<Utc>) {
        self.last_finding_time = Some(now);
        match rule.window_policy {
            WindowPolicy::Clear => self.matches.clear(),
            WindowPolicy::Decrement => {
                let n = (rule.threshold as usize).min(self.matches.len());
                self.matches.drain(..n);
            }
        }
    }

    /// No retained matches at `now` and no cooldown pending.
    pub fn is_idle(&mut self, rule: &Rule, now: DateTime<Utc>) -> bool {
        self.evict_expired(now, window(rule));
        self.matches.is_empty() && self.cooldown_elapsed(rule, now)
    }
}

/// Longer spans are clamped; chrono durations have a finite range.
const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 3600;

fn span(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_SPAN_SECS) as i64)
}

fn window(rule: &Rule) -> Duration {
    span(rule.window_seconds)
}

fn cooldown(rule: &Rule) -> Duration {
    span(rule.cooldown_seconds)
}
