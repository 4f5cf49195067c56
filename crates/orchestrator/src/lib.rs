//! Playbook orchestration for findings.
//!
//! This crate provides:
//! - [`TemplateRenderer`]: strict minijinja rendering of step command templates
//! - [`PlaybookTable`]: playbooks keyed by finding type, swapped atomically on reload
//! - [`FindingStore`] trait with in-memory and JSON-lines implementations
//! - [`Orchestrator`]: finding → intended actions, persisted with retry

pub mod error;
pub mod orchestrator;
pub mod playbooks;
pub mod render;
pub mod retry;
pub mod store;

pub use error::{PersistenceError, RenderError};
pub use orchestrator::{ActionPlan, CommitOutcome, HandleReport, Orchestrator, OrchestratorStats};
pub use playbooks::{PlaybookTable, PlaybookTableHandle};
pub use render::TemplateRenderer;
pub use retry::RetryPolicy;
pub use store::{FindingStore, JsonlStore, MemoryStore};
