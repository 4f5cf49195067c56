//! The long-running task body of each pipeline stage.
//!
//! Every stage runs until its input channel closes, then drops its outputs,
//! so closing the raw-line input drains the whole pipeline in order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use logwarden_classifier::Classifier;
use logwarden_core::{ClassifiedEvent, Finding};
use logwarden_orchestrator::Orchestrator;
use logwarden_rules::{EngineHealth, RuleEngine};

use crate::bus::{EventBus, FindingRouter};
use crate::message::RawLine;
use crate::stats::PipelineStats;

/// Classify raw lines and publish them by source type.
///
/// Unclassifiable lines are logged and dropped; they never stop the stage.
pub async fn run_classifier(
    classifier: Classifier,
    mut lines: mpsc::Receiver<RawLine>,
    bus: EventBus,
    stats: Arc<PipelineStats>,
) {
    while let Some(line) = lines.recv().await {
        stats.line_received();
        let event = match classifier.classify(&line.bytes, &line.meta) {
            Ok(event) => event,
            Err(e) => {
                stats.line_dropped();
                warn!(source = %line.meta.source_address, error = %e, "dropping unclassifiable line");
                continue;
            }
        };
        stats.event_classified();

        match bus.publish(event).await {
            Ok(true) => {}
            Ok(false) => stats.event_unrouted(),
            Err(e) => {
                error!(error = %e, "engine partition closed, stopping classifier");
                break;
            }
        }
    }
    info!("classifier stage drained");
}

/// Evaluate one domain's events in arrival order and forward findings.
///
/// Sweeps idle state every `sweep_interval` and publishes health after each
/// sweep. Returns the final health once the event channel is closed and
/// every buffered event has been evaluated.
pub async fn run_engine(
    mut engine: RuleEngine,
    mut events: mpsc::Receiver<ClassifiedEvent>,
    router: FindingRouter,
    sweep_interval: Duration,
    health: watch::Sender<EngineHealth>,
    stats: Arc<PipelineStats>,
) -> EngineHealth {
    let domain = engine.domain();
    let mut ticker = tokio::time::interval(sweep_interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            received = events.recv() => {
                let Some(event) = received else { break };
                for finding in engine.evaluate(&event) {
                    stats.finding_emitted();
                    forward(&router, finding).await;
                }
            }
            _ = ticker.tick() => {
                let evicted = engine.sweep(Utc::now());
                if evicted > 0 {
                    debug!(domain = %domain, evicted, "sweep");
                }
                health.send_replace(engine.health());
            }
        }
    }

    let final_health = engine.health();
    health.send_replace(final_health.clone());
    info!(
        domain = %domain,
        events = final_health.events_evaluated,
        findings = final_health.findings_emitted,
        "engine drained"
    );
    final_health
}

async fn forward(router: &FindingRouter, finding: Finding) {
    let finding_id = finding.id;
    if let Err(e) = router.route(finding).await {
        error!(finding_id = %finding_id, error = %e, "orchestrator shards gone, finding not handled");
    }
}

/// Handle findings for one orchestrator shard. Returns how many were handled.
pub async fn run_shard(
    shard: usize,
    orchestrator: Arc<Orchestrator>,
    mut findings: mpsc::Receiver<Finding>,
    stats: Arc<PipelineStats>,
) -> usize {
    let mut handled = 0;
    while let Some(finding) = findings.recv().await {
        let report = orchestrator.handle_finding(&finding).await;
        stats.finding_handled(report.persisted);
        handled += 1;
    }
    info!(shard, handled, "orchestrator shard drained");
    handled
}
