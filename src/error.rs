//! Error types for the job event store.
//!
//! This module defines the unified error enum used throughout the crate. All fallible
//! operations return `Result<T, Error>`. The HTTP ingress maps these variants to
//! status codes; the binary treats fatal variants as process termination.

/// Unified error type for all store operations.
///
/// Each variant represents a distinct failure mode. The HTTP layer maps variants
/// to status codes:
///
/// - `InvalidRecord` -> `400 Bad Request`
/// - `StoreClosed` -> `503 Service Unavailable`
/// - `Io`, `StoreFailed`, `Serialization`, `CorruptRecord` -> `500 Internal Server Error`
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred during a file operation. Always fatal: the store's
    /// only durability guarantee is that what was appended is on disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded as a JSON line.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound event failed boundary validation (missing or malformed
    /// `job_id` / `time`, or not a JSON object).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A persisted line could not be decoded during replay.
    #[error("corrupt record at line {line}: {detail}")]
    CorruptRecord {
        /// 1-based line number in the log file.
        line: usize,
        /// Human-readable description of the decode failure.
        detail: String,
    },

    /// The store no longer accepts writes (flush has begun or the writer task
    /// has exited).
    #[error("store is closed")]
    StoreClosed,

    /// The writer task stopped after an unrecoverable error.
    #[error("store failed: {0}")]
    StoreFailed(String),
}

impl Error {
    /// Returns `true` for errors after which the process must not keep serving.
    ///
    /// A failed durable append leaves the index untouched, but continuing would
    /// let later appends land after a possibly torn line, so the writer stops.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::StoreFailed(_))
    }
}
