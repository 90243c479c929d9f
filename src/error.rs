//! Error types for snapshot operations.

use std::io;
use thiserror::Error;

/// Errors that can occur during snapshot operations.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// A collection, shard, or snapshot reference is unknown.
    #[error("{0} not found")]
    NotFound(String),

    /// A recovery location uses a disallowed scheme, is malformed, or is
    /// unreachable. Reported before any shard state is touched.
    #[error("invalid snapshot location: {0}")]
    InvalidLocation(String),

    /// The staged archive's digest does not match the caller-supplied checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The archive is structurally invalid and cannot be unpacked.
    #[error("corrupt snapshot archive: {0}")]
    CorruptArchive(String),

    /// Another create/recover operation already holds the shard.
    #[error("a snapshot operation is already in progress for shard {0}")]
    AlreadyInProgress(String),

    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP request error during download.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}
