use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayerGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed record #{index} ({source_path}): {reason}")]
    MalformedRecord {
        index: usize,
        source_path: String,
        reason: String,
    },

    /// An internal consistency check failed; the graph would have been corrupted.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

pub type Result<T> = std::result::Result<T, LayerGraphError>;
