//! Detection rule configuration and the per-domain rule evaluation engine.
//!
//! This crate provides:
//! - YAML documents for detection rules and playbooks (two-pass `kind` dispatch)
//! - Filesystem loader with hot-reload via `notify` watcher
//! - [`engine::RuleEngine`]: sliding windows, thresholds and cooldowns per (rule, subject)
//! - In-memory per-rule audit log

pub mod audit_log;
pub mod engine;
pub mod loader;
pub mod schema;

pub use engine::{EngineHealth, InvalidRuleError, RuleEngine, RuleTable, RuleTableHandle};
pub use loader::{ConfigError, ConfigLoader, LoadResult, LoadStatus};
pub use schema::ConfigDocument;
