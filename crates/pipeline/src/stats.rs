//! Throughput counters shared by every pipeline stage.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineStats {
    lines_received: AtomicU64,
    lines_dropped: AtomicU64,
    events_classified: AtomicU64,
    events_unrouted: AtomicU64,
    findings_emitted: AtomicU64,
    findings_handled: AtomicU64,
    findings_unpersisted: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lines_received: u64,
    /// Lines rejected by the classifier.
    pub lines_dropped: u64,
    pub events_classified: u64,
    /// Events whose source type has no engine.
    pub events_unrouted: u64,
    pub findings_emitted: u64,
    pub findings_handled: u64,
    pub findings_unpersisted: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line_received(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn line_dropped(&self) {
        self.lines_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_classified(&self) {
        self.events_classified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_unrouted(&self) {
        self.events_unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finding_emitted(&self) {
        self.findings_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finding_handled(&self, persisted: bool) {
        self.findings_handled.fetch_add(1, Ordering::Relaxed);
        if !persisted {
            self.findings_unpersisted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_received: self.lines_received.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            events_classified: self.events_classified.load(Ordering::Relaxed),
            events_unrouted: self.events_unrouted.load(Ordering::Relaxed),
            findings_emitted: self.findings_emitted.load(Ordering::Relaxed),
            findings_handled: self.findings_handled.load(Ordering::Relaxed),
            findings_unpersisted: self.findings_unpersisted.load(Ordering::Relaxed),
        }
    }
}
