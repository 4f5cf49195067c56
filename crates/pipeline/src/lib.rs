//! Channel wiring from raw log lines to persisted actions.
//!
//! This crate provides:
//! - [`RawLine`]: what transports hand to the classifier stage
//! - [`EventBus`] / [`FindingRouter`]: typed fan-out by source type and subject
//! - [`Pipeline`]: spawns the classifier, one engine task per domain and the
//!   orchestrator shards, and drains them in order on shutdown
//! - [`transport`]: UDP syslog and line-reader inputs
//! - [`ConfigReloader`]: pushes reloaded rules and playbooks into live tables

pub mod bus;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod reload;
pub mod stages;
pub mod stats;
pub mod transport;

pub use bus::{EventBus, FindingRouter};
pub use error::PipelineError;
pub use message::RawLine;
pub use pipeline::{Pipeline, PipelineConfig, PipelineReport};
pub use reload::ConfigReloader;
pub use stats::{PipelineStats, StatsSnapshot};
