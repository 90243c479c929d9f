//! ShardSnap - Shard snapshot management with checksummed archives
//!
//! This library provides the snapshot subsystem of a sharded data store:
//! point-in-time, self-contained archives of a single shard's on-disk
//! state, and recovery of a shard from an archive held locally or at a
//! remote URL, with integrity guaranteed by a SHA-256 content checksum.
//!
//! # Features
//!
//! - **Consistent Archives**: snapshots freeze the shard's live generation
//!   before packaging, so concurrent writes never leak into an archive
//! - **SHA-256 Verification**: checksums are computed at creation and
//!   enforced at recovery
//! - **Wait Semantics**: every mutating operation runs synchronously or as
//!   a tracked background task, one per shard at a time
//! - **Untrusted Locations**: recovery sources are allowlisted (registered
//!   snapshot names and http(s) URLs); local-file schemes are rejected
//! - **Atomic Recovery**: the shard's state is swapped wholesale or not at
//!   all, never partially
//!
//! # Example
//!
//! ```no_run
//! use shardsnap::{ShardKey, SnapshotConfig, SnapshotService};
//!
//! # async fn example() -> Result<(), shardsnap::SnapshotError> {
//! let service = SnapshotService::new(SnapshotConfig::default());
//!
//! let shard = ShardKey::new("articles", 0);
//! service.catalog().register(shard.clone())?;
//!
//! let outcome = service.create_snapshot(&shard, true).await?;
//! let description = outcome.into_completed().expect("synchronous create");
//! println!("created {} ({})", description.name, description.checksum);
//! # Ok(())
//! # }
//! ```

pub mod checksum;
mod download;
pub mod error;
pub mod location;
mod recover;
pub mod service;
pub mod shard;
pub mod store;
pub mod tasks;
pub mod types;

pub use checksum::{checksums_match, file_sha256};
pub use error::SnapshotError;
pub use location::SnapshotLocation;
pub use service::{SnapshotReader, SnapshotService};
pub use shard::{Shard, ShardCatalog};
pub use store::SnapshotStore;
pub use tasks::{TaskKind, TaskState, TaskStatus, TaskTracker};
pub use types::{
    OperationOutcome, RecoveryRequest, ShardKey, SnapshotConfig, SnapshotDescription,
};
