//! logwarden-worker: classify device logs, detect findings, render playbooks.
//!
//! Loads rules and playbooks from YAML directories, listens for syslog over
//! UDP and/or reads lines from stdin, and persists findings with their
//! intended actions.
//!
//! # Usage
//!
//! ```bash
//! # UDP syslog on 5514, findings to a JSON-lines file
//! logwarden-worker --udp-bind 0.0.0.0:5514 --store-path var/findings.jsonl
//!
//! # Replay a log file
//! logwarden-worker --stdin < router1.log
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use logwarden_classifier::Classifier;
use logwarden_core::config::load_dotenv;
use logwarden_core::{Config, Protocol};
use logwarden_orchestrator::{
    FindingStore, JsonlStore, MemoryStore, Orchestrator, PlaybookTable, PlaybookTableHandle,
    RetryPolicy, TemplateRenderer,
};
use logwarden_pipeline::transport::{read_lines, serve_udp};
use logwarden_pipeline::{ConfigReloader, Pipeline, PipelineConfig, PipelineError};
use logwarden_rules::{ConfigLoader, LoadResult, LoadStatus};

// ── CLI ─────────────────────────────────────────────────────────────

/// Log classification, rule evaluation and playbook orchestration worker.
#[derive(Parser, Debug)]
#[command(name = "logwarden-worker", version, about)]
struct Cli {
    /// Configuration profile (keys are read as `{PROFILE}_{KEY}` first).
    #[arg(long, env = "LOGWARDEN_PROFILE")]
    profile: Option<String>,

    /// Directory of DetectionRule documents.
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// Directory of Playbook documents.
    #[arg(long)]
    playbooks_dir: Option<PathBuf>,

    /// UDP bind address for syslog (e.g. 0.0.0.0:5514).
    #[arg(long)]
    udp_bind: Option<String>,

    /// JSON-lines store for findings and actions (in-memory when unset).
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Read newline-delimited log lines from stdin; exits at EOF.
    #[arg(long)]
    stdin: bool,

    /// Do not watch config directories for changes.
    #[arg(long)]
    no_watch: bool,

    /// Interval in seconds between stats log lines (0 = disabled).
    #[arg(long, env = "LOGWARDEN_STATS_INTERVAL", default_value_t = 60)]
    stats_interval: u64,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.rules_dir {
            config.engine.rules_dir = dir.clone();
        }
        if let Some(dir) = &self.playbooks_dir {
            config.orchestrator.playbooks_dir = dir.clone();
        }
        if let Some(bind) = &self.udp_bind {
            config.ingest.udp_bind = Some(bind.clone());
        }
        if let Some(path) = &self.store_path {
            config.store.path = Some(path.clone());
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.profile {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    cli.apply(&mut config);
    config.log_summary();

    // Configuration documents.
    let mut rules_loader = ConfigLoader::new(config.engine.rules_dir.clone());
    log_load_results("rules", &rules_loader.load_all()?);
    let mut playbooks_loader = ConfigLoader::new(config.orchestrator.playbooks_dir.clone());
    log_load_results("playbooks", &playbooks_loader.load_all()?);
    if !cli.no_watch {
        rules_loader.watch()?;
        playbooks_loader.watch()?;
    }

    // Store and orchestrator.
    let store: Arc<dyn FindingStore> = match &config.store.path {
        Some(path) => Arc::new(
            JsonlStore::open(path)
                .await
                .with_context(|| format!("failed to open store {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    let renderer = Arc::new(TemplateRenderer::new());
    let playbooks = PlaybookTableHandle::new(PlaybookTable::build(
        &playbooks_loader.playbooks(),
        &renderer,
        1,
    ));
    let orchestrator = Arc::new(
        Orchestrator::new(store, playbooks.clone())
            .with_renderer(Arc::clone(&renderer))
            .with_retry(RetryPolicy::from_config(&config.orchestrator)),
    );

    let recovered = orchestrator.recover().await?;
    if !recovered.is_empty() {
        info!(count = recovered.len(), "recovered partially persisted findings");
    }

    // Pipeline.
    let classifier = Classifier::default().with_max_line_bytes(config.ingest.max_line_bytes);
    let pipeline = Pipeline::start(
        &PipelineConfig::from_config(&config),
        classifier,
        &rules_loader.rules(),
        Arc::clone(&orchestrator),
    );
    for health in pipeline.health() {
        for invalid in &health.invalid_rules {
            warn!(domain = %health.domain, rule_id = %invalid.rule_id, error = %invalid.error, "rule rejected");
        }
    }
    let reloader = ConfigReloader::new(pipeline.rule_tables(), playbooks, renderer);

    // Transports.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut transports: JoinSet<Result<u64, PipelineError>> = JoinSet::new();
    if let Some(bind) = config.ingest.udp_bind.clone() {
        let lines = pipeline.sender();
        let shutdown = shutdown_rx.clone();
        transports.spawn(async move { serve_udp(&bind, lines, shutdown).await });
    }
    if cli.stdin {
        let lines = pipeline.sender();
        let shutdown = shutdown_rx.clone();
        transports.spawn(async move {
            read_lines(BufReader::new(tokio::io::stdin()), "stdin", Protocol::Stdin, lines, shutdown)
                .await
        });
    }
    if transports.is_empty() {
        warn!("no transport configured (use --udp-bind or --stdin); waiting for shutdown signal");
    }

    let control = async {
        let mut stats_ticker =
            tokio::time::interval(Duration::from_secs(cli.stats_interval.max(1)));
        stats_ticker.tick().await;
        let had_transports = !transports.is_empty();
        let signal = shutdown_signal();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("shutdown signal received");
                    break;
                }
                Some(joined) = transports.join_next(), if !transports.is_empty() => {
                    match joined {
                        Ok(Ok(forwarded)) => info!(forwarded, "transport finished"),
                        Ok(Err(e)) => error!(error = %e, "transport failed"),
                        Err(e) => error!(error = %e, "transport task panicked"),
                    }
                    if had_transports && transports.is_empty() {
                        info!("all transports finished");
                        break;
                    }
                }
                _ = stats_ticker.tick(), if cli.stats_interval > 0 => {
                    log_stats(&pipeline);
                }
            }
        }

        let _ = shutdown_tx.send(true);
        while let Some(joined) = transports.join_next().await {
            if let Ok(Err(e)) = joined {
                error!(error = %e, "transport failed during shutdown");
            }
        }
    };

    tokio::join!(
        reloader.follow(&rules_loader, &playbooks_loader, shutdown_rx.clone()),
        control
    );

    let report = pipeline.shutdown().await?;
    info!(
        lines = report.stats.lines_received,
        dropped = report.stats.lines_dropped,
        findings = report.stats.findings_emitted,
        actions_complete = report.orchestrator.complete,
        actions_partial = report.orchestrator.partial,
        no_playbook = report.orchestrator.no_playbook,
        unpersisted = report.unpersisted.len(),
        "logwarden-worker exited cleanly"
    );
    Ok(())
}

fn log_load_results(kind: &str, results: &[LoadResult]) {
    let loaded = results.iter().filter(|r| r.is_loaded()).count();
    for result in results {
        if let LoadStatus::Failed { error } = &result.status {
            warn!(kind, path = %result.path.display(), error = %error, "document failed to load");
        }
    }
    info!(kind, loaded, total = results.len(), "configuration loaded");
}

fn log_stats(pipeline: &Pipeline) {
    let stats = pipeline.stats();
    info!(
        lines = stats.lines_received,
        dropped = stats.lines_dropped,
        unrouted = stats.events_unrouted,
        findings = stats.findings_emitted,
        handled = stats.findings_handled,
        unpersisted = stats.findings_unpersisted,
        "pipeline stats"
    );
    for health in pipeline.health() {
        if health.is_degraded() {
            warn!(
                domain = %health.domain,
                invalid = health.invalid_rules.len(),
                "engine running with invalid rules"
            );
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
    }
}
