//! Data structures shared across snapshot operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Identifies one shard of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardKey {
    /// Collection the shard belongs to.
    pub collection: String,
    /// Shard identifier within the collection.
    pub shard_id: u32,
}

impl ShardKey {
    pub fn new(collection: impl Into<String>, shard_id: u32) -> Self {
        Self {
            collection: collection.into(),
            shard_id,
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.shard_id)
    }
}

/// Metadata for one snapshot archive.
///
/// Immutable once written; archives are only ever created or deleted,
/// never mutated in place.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDescription {
    /// Archive name, unique within the shard. Embeds the collection,
    /// shard id and creation timestamp.
    pub name: String,
    /// Hex-encoded SHA-256 over the exact archive bytes.
    pub checksum: String,
    /// Archive size in bytes.
    pub size: u64,
    /// Unix timestamp (seconds) when the snapshot was created.
    pub created_at: i64,
}

/// Result of an operation that honors the `wait` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome<T> {
    /// `wait = true`: the operation ran to completion.
    Completed(T),
    /// `wait = false`: the operation was accepted and runs in the
    /// background. Completion is observable through `list` or the shard's
    /// subsequently served data, not through a returned handle.
    Accepted,
}

impl<T> OperationOutcome<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, OperationOutcome::Accepted)
    }

    /// The completed value, if the synchronous path was taken.
    pub fn into_completed(self) -> Option<T> {
        match self {
            OperationOutcome::Completed(value) => Some(value),
            OperationOutcome::Accepted => None,
        }
    }
}

/// Parameters of a shard recovery request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Untrusted source reference: a registered snapshot name or an
    /// http(s) URL. Validated before anything else happens.
    pub location: String,
    /// Expected SHA-256 of the archive bytes. When absent the integrity
    /// gate is skipped.
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Configuration for the snapshot service.
///
/// # Example
///
/// ```
/// use shardsnap::SnapshotConfig;
///
/// let config = SnapshotConfig {
///     data_root: "storage/shards".into(),
///     snapshots_root: "storage/snapshots".into(),
///     ..SnapshotConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Root directory for live shard data.
    pub data_root: PathBuf,
    /// Root directory for snapshot archives.
    pub snapshots_root: PathBuf,
    /// Fixed interval between remote fetch retries, in milliseconds.
    pub download_retry_interval_ms: u64,
    /// Additional fetch attempts after the first failure.
    ///
    /// Note: retries only cover transient transport failures. A source that
    /// is still unreachable after the last attempt is reported as an invalid
    /// location, matching the behavior of a source that never answered.
    pub download_retry_attempts: usize,
    /// How long finished task records stay visible before being pruned.
    pub task_retention: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("storage/shards"),
            snapshots_root: PathBuf::from("storage/snapshots"),
            download_retry_interval_ms: 500,
            download_retry_attempts: 2,
            task_retention: Duration::from_secs(300),
        }
    }
}
