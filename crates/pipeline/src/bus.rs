//! Typed channel routing between stages.
//!
//! [`EventBus`] partitions classified events by source type, one bounded
//! channel per engine. [`FindingRouter`] spreads findings over orchestrator
//! shards by a hash of the subject key, so findings for one subject are
//! always handled by the same shard.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use tokio::sync::mpsc;
use tracing::debug;

use logwarden_core::{ClassifiedEvent, Finding, SourceType};

use crate::error::PipelineError;

#[derive(Debug, Clone, Default)]
pub struct EventBus {
    routes: HashMap<SourceType, mpsc::Sender<ClassifiedEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the partition for `domain`. A second subscription replaces the first.
    pub fn subscribe(&mut self, domain: SourceType, capacity: usize) -> mpsc::Receiver<ClassifiedEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.routes.insert(domain, tx);
        rx
    }

    pub fn domains(&self) -> Vec<SourceType> {
        let mut domains: Vec<SourceType> = self.routes.keys().copied().collect();
        domains.sort();
        domains
    }

    /// Deliver `event` to its partition, waiting while the partition is full.
    ///
    /// Returns `Ok(false)` when no engine subscribes to the event's source type.
    pub async fn publish(&self, event: ClassifiedEvent) -> Result<bool, PipelineError> {
        let Some(tx) = self.routes.get(&event.source_type) else {
            debug!(source_type = %event.source_type, event_id = %event.id, "no engine for source type");
            return Ok(false);
        };
        tx.send(event)
            .await
            .map_err(|_| PipelineError::ChannelClosed("event"))?;
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct FindingRouter {
    shards: Vec<mpsc::Sender<Finding>>,
}

impl FindingRouter {
    /// Create `shards` bounded channels (at least one) and the router over them.
    pub fn channels(shards: usize, capacity: usize) -> (Self, Vec<mpsc::Receiver<Finding>>) {
        let (senders, receivers) = (0..shards.max(1))
            .map(|_| mpsc::channel(capacity.max(1)))
            .unzip();
        (Self { shards: senders }, receivers)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, subject_key: &str) -> usize {
        shard_index(subject_key, self.shards.len())
    }

    /// Send `finding` to its shard. Returns the shard index.
    pub async fn route(&self, finding: Finding) -> Result<usize, PipelineError> {
        let shard = self.shard_for(&finding.subject_key);
        self.shards[shard]
            .send(finding)
            .await
            .map_err(|_| PipelineError::ChannelClosed("finding"))?;
        Ok(shard)
    }
}

/// Stable shard for a subject key within one process.
pub fn shard_index(subject_key: &str, shards: usize) -> usize {
    if shards <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    subject_key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}
