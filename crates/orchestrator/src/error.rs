//! Error types for rendering and persistence.

/// A step template that could not be rendered. Isolates that step only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("template syntax error: {0}")]
    Syntax(String),

    /// A placeholder referenced a value the finding does not carry.
    #[error("unresolved placeholder: {0}")]
    Unresolved(String),

    #[error("template evaluation failed: {0}")]
    Evaluation(String),
}

impl From<minijinja::Error> for RenderError {
    fn from(err: minijinja::Error) -> Self {
        use minijinja::ErrorKind;
        let message = err.to_string();
        match err.kind() {
            ErrorKind::SyntaxError | ErrorKind::UnknownFilter | ErrorKind::UnknownFunction => {
                RenderError::Syntax(message)
            }
            ErrorKind::UndefinedError => RenderError::Unresolved(message),
            _ => RenderError::Evaluation(message),
        }
    }
}

/// Store failure while writing a finding or its actions.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Actions or a commit record written for a finding the store never saw.
    #[error("finding {0} has not been stored")]
    UnknownFinding(uuid::Uuid),

    #[error("giving up after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl PersistenceError {
    /// Whether retrying the same write can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistenceError::Io(_) | PersistenceError::Unavailable(_))
    }
}
