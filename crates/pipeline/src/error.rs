use thiserror::Error;

/// Errors surfaced while wiring or running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] logwarden_rules::ConfigError),

    #[error("store error: {0}")]
    Persistence(#[from] logwarden_orchestrator::PersistenceError),

    #[error("{0} channel closed")]
    ChannelClosed(&'static str),

    #[error("pipeline task failed: {0}")]
    Task(String),
}
