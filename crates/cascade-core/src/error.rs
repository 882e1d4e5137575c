//! Error types for Cascade.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Cycle detected in stage dependencies")]
    CycleDetected,

    #[error("Output {path} is declared by both stage {first} and stage {second}")]
    DuplicateOutput {
        path: String,
        first: usize,
        second: usize,
    },

    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Pipeline has no stages")]
    EmptyPipeline,

    // Scheduling errors
    #[error("Stage not found: {0}")]
    StageNotFound(usize),

    // Checkpoint errors
    #[error("Checkpoint section {0} is missing or unreadable")]
    CheckpointCorrupt(String),

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    CheckpointVersion { found: u32, expected: u32 },

    // Infrastructure errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
