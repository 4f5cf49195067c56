use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::event::SourceType;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub ingest: IngestConfig,
    pub engine: EngineConfig,
    pub orchestrator: OrchestratorConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `LOGWARDEN_PROFILE`. When set (e.g. `LAB`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("LOGWARDEN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            ingest: IngestConfig::from_env_profiled(p),
            engine: EngineConfig::from_env_profiled(p),
            orchestrator: OrchestratorConfig::from_env_profiled(p),
            store: StoreConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  ingest:       udp={}, max_line_bytes={}, channel_capacity={}",
            self.ingest.udp_bind.as_deref().unwrap_or("(disabled)"),
            self.ingest.max_line_bytes,
            self.ingest.channel_capacity
        );
        tracing::info!(
            "  engine:       rules_dir={}, sweep={}s, domains={}",
            self.engine.rules_dir.display(),
            self.engine.sweep_interval_secs,
            self.engine
                .domains
                .iter()
                .map(|d| d.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        tracing::info!(
            "  orchestrator: playbooks_dir={}, shards={}, persist_attempts={}",
            self.orchestrator.playbooks_dir.display(),
            self.orchestrator.shards,
            self.orchestrator.persist_max_attempts
        );
        tracing::info!(
            "  store:        path={}",
            self.store
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(memory)".to_string())
        );
    }
}

// ── Ingest ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// UDP bind address for the syslog listener (e.g. `0.0.0.0:5514`).
    pub udp_bind: Option<String>,
    pub max_line_bytes: usize,
    /// Capacity of every bounded channel in the pipeline.
    pub channel_capacity: usize,
}

impl IngestConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            udp_bind: profiled_env_opt(p, "INGEST_UDP_BIND"),
            max_line_bytes: profiled_env_u32(p, "INGEST_MAX_LINE_BYTES", 8192) as usize,
            channel_capacity: profiled_env_u32(p, "CHANNEL_CAPACITY", 1024) as usize,
        }
    }
}

// ── Engine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub rules_dir: PathBuf,
    pub sweep_interval_secs: u64,
    /// Domains that get their own engine task.
    pub domains: Vec<SourceType>,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let domains = profiled_env_opt(p, "ENGINE_DOMAINS")
            .map(|raw| parse_domains(&raw))
            .unwrap_or_else(|| SourceType::ALL.to_vec());
        Self {
            rules_dir: PathBuf::from(profiled_env_or(p, "RULES_DIR", "data/rules")),
            sweep_interval_secs: profiled_env_u64(p, "ENGINE_SWEEP_INTERVAL_SECS", 30),
            domains,
        }
    }
}

/// Parse a comma-separated domain list, ignoring unknown entries.
pub fn parse_domains(raw: &str) -> Vec<SourceType> {
    let mut domains: Vec<SourceType> = raw
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| match s.parse() {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unknown engine domain");
                None
            }
        })
        .collect();
    domains.sort();
    domains.dedup();
    domains
}

// ── Orchestrator ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub playbooks_dir: PathBuf,
    /// Number of parallel orchestrator workers (sharded by subject key).
    pub shards: usize,
    pub persist_max_attempts: u32,
    pub persist_base_delay_ms: u64,
    pub persist_max_delay_ms: u64,
}

impl OrchestratorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            playbooks_dir: PathBuf::from(profiled_env_or(p, "PLAYBOOKS_DIR", "data/playbooks")),
            shards: profiled_env_u32(p, "ORCHESTRATOR_SHARDS", 2).max(1) as usize,
            persist_max_attempts: profiled_env_u32(p, "PERSIST_MAX_ATTEMPTS", 5),
            persist_base_delay_ms: profiled_env_u64(p, "PERSIST_BASE_DELAY_MS", 200),
            persist_max_delay_ms: profiled_env_u64(p, "PERSIST_MAX_DELAY_MS", 10_000),
        }
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON-lines file for findings and actions; in-memory when unset.
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            path: profiled_env_opt(p, "STORE_PATH").map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_domains_skips_unknown_and_dedups() {
        let domains = parse_domains("security, wifi,bogus,,wifi");
        assert_eq!(domains, vec![SourceType::Wifi, SourceType::Security]);
    }

    #[test]
    fn profiled_lookup_prefers_prefixed_key() {
        // Unique key names so parallel tests do not interfere.
        env::set_var("LWTEST_ORCHESTRATOR_SHARDS", "7");
        let cfg = Config::for_profile("lwtest");
        assert_eq!(cfg.profile_label(), "LWTEST");
        assert_eq!(cfg.orchestrator.shards, 7);
        env::remove_var("LWTEST_ORCHESTRATOR_SHARDS");
    }
}
