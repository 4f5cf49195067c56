//! YAML configuration documents.
//!
//! - `ConfigEnvelope`: lightweight first-pass header (apiVersion, kind, metadata)
//! - `ConfigDocument`: enum dispatching to kind-specific types
//! - `DetectionRuleDocument` / `PlaybookDocument`: the two supported kinds

mod detection;
mod document;
mod envelope;
mod kind;
mod metadata;
mod playbook;

pub use detection::*;
pub use document::*;
pub use envelope::*;
pub use kind::*;
pub use metadata::*;
pub use playbook::*;
