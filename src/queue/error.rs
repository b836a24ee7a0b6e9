//! Error types for segment logs and the round-robin queue

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a single durable segment log
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Segment log not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("IO error on segment log {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt segment log {}: {detail}", path.display())]
    Corrupt { path: PathBuf, detail: String },

    #[error("Segment log {} is empty", path.display())]
    Empty { path: PathBuf },

    #[error("Record of {len} bytes exceeds the segment log limit")]
    RecordTooLarge { len: usize },
}

impl LogError {
    /// Returns true for I/O failures and corruption, the faults callers should abort on
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Corrupt { .. })
    }
}

/// Errors raised by the round-robin queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error("Unsupported queue operation: {0}")]
    Unsupported(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Queue is closed")]
    Closed,

    #[error("Queue lock poisoned by a panicking thread")]
    Poisoned,

    #[error("Queue state is inconsistent: {0}")]
    Inconsistent(String),
}

/// Result type for segment log operations
pub type LogResult<T> = Result<T, LogError>;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
