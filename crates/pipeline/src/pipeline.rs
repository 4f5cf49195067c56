//! [`Pipeline`]: spawns and drains every stage.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use logwarden_classifier::Classifier;
use logwarden_core::{Config, Finding, Rule, SourceType};
use logwarden_orchestrator::{Orchestrator, OrchestratorStats};
use logwarden_rules::audit_log::AuditLog;
use logwarden_rules::{EngineHealth, RuleEngine, RuleTable, RuleTableHandle};

use crate::bus::{EventBus, FindingRouter};
use crate::error::PipelineError;
use crate::message::RawLine;
use crate::stages::{run_classifier, run_engine, run_shard};
use crate::stats::{PipelineStats, StatsSnapshot};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Domains that get an engine; events of other source types are counted
    /// as unrouted.
    pub domains: Vec<SourceType>,
    pub channel_capacity: usize,
    pub shards: usize,
    pub sweep_interval: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            domains: config.engine.domains.clone(),
            channel_capacity: config.ingest.channel_capacity,
            shards: config.orchestrator.shards,
            sweep_interval: Duration::from_secs(config.engine.sweep_interval_secs.max(1)),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            domains: SourceType::ALL.to_vec(),
            channel_capacity: 1024,
            shards: 2,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Final counters after [`Pipeline::shutdown`].
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub stats: StatsSnapshot,
    pub engines: Vec<EngineHealth>,
    pub orchestrator: OrchestratorStats,
    /// Findings the store never accepted, even after a last retry.
    pub unpersisted: Vec<Finding>,
}

/// Running classifier → engines → orchestrator shards.
pub struct Pipeline {
    input: mpsc::Sender<RawLine>,
    rule_tables: BTreeMap<SourceType, RuleTableHandle>,
    health: BTreeMap<SourceType, watch::Receiver<EngineHealth>>,
    audit: Arc<AuditLog>,
    orchestrator: Arc<Orchestrator>,
    stats: Arc<PipelineStats>,
    classifier_task: JoinHandle<()>,
    engine_tasks: Vec<JoinHandle<EngineHealth>>,
    shard_tasks: Vec<JoinHandle<usize>>,
}

impl Pipeline {
    /// Spawn every stage on the current tokio runtime.
    ///
    /// Each configured domain gets its own rule table built from `rules`,
    /// reachable through [`Pipeline::rule_tables`] for hot reload.
    pub fn start(
        config: &PipelineConfig,
        classifier: Classifier,
        rules: &[Rule],
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        let stats = Arc::new(PipelineStats::new());
        let audit = Arc::new(AuditLog::new());

        let (router, shard_inputs) = FindingRouter::channels(config.shards, config.channel_capacity);
        let shard_tasks = shard_inputs
            .into_iter()
            .enumerate()
            .map(|(shard, rx)| tokio::spawn(run_shard(shard, Arc::clone(&orchestrator), rx, Arc::clone(&stats))))
            .collect();

        let mut bus = EventBus::new();
        let mut rule_tables = BTreeMap::new();
        let mut health = BTreeMap::new();
        let mut engine_tasks = Vec::new();
        for &domain in &config.domains {
            if rule_tables.contains_key(&domain) {
                continue;
            }
            let table = RuleTableHandle::new(RuleTable::build(domain, rules, 1));
            let engine = RuleEngine::new(domain, table.clone()).with_audit_log(Arc::clone(&audit));
            let (health_tx, health_rx) = watch::channel(engine.health());
            let events = bus.subscribe(domain, config.channel_capacity);

            engine_tasks.push(tokio::spawn(run_engine(
                engine,
                events,
                router.clone(),
                config.sweep_interval,
                health_tx,
                Arc::clone(&stats),
            )));
            rule_tables.insert(domain, table);
            health.insert(domain, health_rx);
        }
        // Engines hold the only remaining routers, so the shards close once
        // every engine has drained.
        drop(router);

        let (input, lines) = mpsc::channel(config.channel_capacity.max(1));
        let classifier_task = tokio::spawn(run_classifier(classifier, lines, bus, Arc::clone(&stats)));

        info!(
            domains = ?rule_tables.keys().map(|d: &SourceType| d.as_str()).collect::<Vec<_>>(),
            shards = config.shards.max(1),
            "pipeline started"
        );

        Self {
            input,
            rule_tables,
            health,
            audit,
            orchestrator,
            stats,
            classifier_task,
            engine_tasks,
            shard_tasks,
        }
    }

    /// Sender for transports. Every clone must be dropped before
    /// [`Pipeline::shutdown`] can finish draining.
    pub fn sender(&self) -> mpsc::Sender<RawLine> {
        self.input.clone()
    }

    /// Feed one line, waiting while the input channel is full.
    pub async fn send(&self, line: RawLine) -> Result<(), PipelineError> {
        self.input
            .send(line)
            .await
            .map_err(|_| PipelineError::ChannelClosed("raw line"))
    }

    pub fn rule_tables(&self) -> Vec<RuleTableHandle> {
        self.rule_tables.values().cloned().collect()
    }

    pub fn rule_table(&self, domain: SourceType) -> Option<&RuleTableHandle> {
        self.rule_tables.get(&domain)
    }

    /// Latest health published by each engine, in domain order.
    pub fn health(&self) -> Vec<EngineHealth> {
        self.health.values().map(|rx| rx.borrow().clone()).collect()
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Close the input and wait for every stage to drain, in order.
    ///
    /// Findings whose persistence was given up on get one last retry.
    pub async fn shutdown(self) -> Result<PipelineReport, PipelineError> {
        let Pipeline {
            input,
            orchestrator,
            stats,
            classifier_task,
            engine_tasks,
            shard_tasks,
            ..
        } = self;

        info!("pipeline draining");
        drop(input);
        classifier_task.await.map_err(|e| PipelineError::Task(e.to_string()))?;

        let mut engines = Vec::with_capacity(engine_tasks.len());
        for task in engine_tasks {
            engines.push(task.await.map_err(|e| PipelineError::Task(e.to_string()))?);
        }

        for task in shard_tasks {
            task.await.map_err(|e| PipelineError::Task(e.to_string()))?;
        }

        if !orchestrator.unpersisted().is_empty() {
            orchestrator.retry_unpersisted().await;
        }
        let unpersisted = orchestrator.unpersisted();
        if !unpersisted.is_empty() {
            error!(count = unpersisted.len(), "findings left unpersisted at shutdown");
        }

        let report = PipelineReport {
            stats: stats.snapshot(),
            engines,
            orchestrator: orchestrator.stats(),
            unpersisted,
        };
        info!(
            lines = report.stats.lines_received,
            events = report.stats.events_classified,
            findings = report.stats.findings_emitted,
            "pipeline stopped"
        );
        Ok(report)
    }
}
