//! Error types for the preparation and batching pipeline.
//!
//! Unresolved labels and too-short subjects are *not* errors — they are
//! absorbed into data values (sentinel rows, zero windows). Everything in
//! [`PipelineError`] stops the pipeline.
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fatal pipeline failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required per-subject array is absent from the store.
    #[error("no {kind} array stored for subject {id}")]
    SubjectNotFound { id: String, kind: &'static str },

    /// Normalization was requested before statistics were computed or loaded.
    #[error("normalization statistics have not been computed yet")]
    StatisticsMissing,

    /// Statistics were requested over a partition contributing zero samples.
    #[error("statistics requested over an empty subject partition")]
    EmptyPartition,

    /// A subject's channel count disagrees with the rest of the pipeline.
    #[error("channel count mismatch for subject {id}: expected {expected}, got {actual}")]
    ChannelMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    /// Configuration violates a pipeline precondition.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `get_batch` was called with an index outside `0..num_batches()`.
    #[error("batch index {index} out of range (epoch has {len} batches)")]
    BatchIndexOutOfRange { index: usize, len: usize },

    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored file exists but does not match the expected layout.
    #[error("file format error: {0}")]
    Format(String),
}
