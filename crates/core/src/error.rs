use thiserror::Error;

/// Structural problems with a playbook definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybookError {
    #[error("playbook '{0}' has no steps")]
    NoSteps(String),

    #[error("playbook '{playbook}' step '{step}' has order 0 (orders start at 1)")]
    ZeroOrder { playbook: String, step: String },

    #[error("playbook '{playbook}' has duplicate step order {order}")]
    DuplicateOrder { playbook: String, order: u32 },

    #[error("playbook '{playbook}' has duplicate step id '{step}'")]
    DuplicateStepId { playbook: String, step: String },

    #[error("playbook '{0}' has an empty finding_type")]
    EmptyFindingType(String),
}
