//! Classification error types.

use thiserror::Error;

/// Transport-level failures. Malformed text is never an error; it degrades
/// to a `generic` event instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("empty payload from {source_address}")]
    EmptyPayload { source_address: String },

    #[error("undecodable payload from {source_address} ({len} bytes, no salvageable text)")]
    Undecodable { source_address: String, len: usize },
}
