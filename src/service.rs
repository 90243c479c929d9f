//! Service façade wiring the snapshot components together.

use crate::error::SnapshotError;
use crate::location::SnapshotLocation;
use crate::recover;
use crate::shard::ShardCatalog;
use crate::store::SnapshotStore;
use crate::tasks::{self, TaskKind, TaskTracker};
use crate::types::{
    OperationOutcome, RecoveryRequest, ShardKey, SnapshotConfig, SnapshotDescription,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Open handle on one snapshot's archive bytes.
///
/// The recorded description travels with the handle so callers can verify
/// what they read: the SHA-256 of the streamed bytes equals
/// `description.checksum`.
pub struct SnapshotReader {
    pub description: SnapshotDescription,
    pub path: PathBuf,
    pub file: tokio::fs::File,
}

/// The shard snapshot subsystem's operation surface.
///
/// Exposes create, list, fetch-bytes, delete and recover for single
/// shards, with `wait = false` variants running on the background
/// execution context. Binding these operations to concrete routes is the
/// embedding layer's job.
pub struct SnapshotService {
    config: SnapshotConfig,
    catalog: Arc<ShardCatalog>,
    store: Arc<SnapshotStore>,
    tasks: TaskTracker,
    client: reqwest::Client,
}

impl SnapshotService {
    /// Builds a service rooted at the configured data/snapshot directories.
    pub fn new(config: SnapshotConfig) -> Self {
        let catalog = Arc::new(ShardCatalog::new(config.data_root.clone()));
        let store = Arc::new(SnapshotStore::new(config.snapshots_root.clone()));
        let tasks = TaskTracker::new(config.task_retention);
        Self {
            config,
            catalog,
            store,
            tasks,
            client: reqwest::Client::new(),
        }
    }

    /// The shard registry. The embedding layer registers every shard it
    /// considers to exist; unregistered keys fail with `NotFound`.
    pub fn catalog(&self) -> &ShardCatalog {
        &self.catalog
    }

    /// The task tracker gating create/recover per shard.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Lists the shard's snapshots in creation order.
    pub async fn list_snapshots(
        &self,
        key: &ShardKey,
    ) -> Result<Vec<SnapshotDescription>, SnapshotError> {
        self.catalog.get(key)?;
        self.store.list(key)
    }

    /// Takes a point-in-time snapshot of the shard.
    ///
    /// Synchronous callers get the new snapshot's description; asynchronous
    /// callers poll `list` until it appears.
    pub async fn create_snapshot(
        &self,
        key: &ShardKey,
        wait: bool,
    ) -> Result<OperationOutcome<SnapshotDescription>, SnapshotError> {
        let shard = self.catalog.get(key)?;
        let claim = self.tasks.claim(key, TaskKind::CreateSnapshot)?;

        let store = Arc::clone(&self.store);
        tasks::run(claim, wait, "snapshot creation", async move {
            store.create(&shard).await
        })
        .await
    }

    /// Opens a snapshot's archive for reading.
    pub async fn open_snapshot(
        &self,
        key: &ShardKey,
        name: &str,
    ) -> Result<SnapshotReader, SnapshotError> {
        self.catalog.get(key)?;
        let (path, description) = self.store.open(key, name)?;
        let file = tokio::fs::File::open(&path).await?;
        Ok(SnapshotReader {
            description,
            path,
            file,
        })
    }

    /// Deletes a snapshot's archive and metadata.
    ///
    /// Existence is checked synchronously on both paths, so an unknown
    /// name fails with `NotFound` even when `wait = false`.
    pub async fn delete_snapshot(
        &self,
        key: &ShardKey,
        name: &str,
        wait: bool,
    ) -> Result<OperationOutcome<()>, SnapshotError> {
        self.catalog.get(key)?;
        self.store.describe(key, name)?;

        if wait {
            self.store.delete(key, name)?;
            return Ok(OperationOutcome::Completed(()));
        }

        let store = Arc::clone(&self.store);
        let key = key.clone();
        let name = name.to_string();
        tasks::spawn_logged("snapshot deletion", async move { store.delete(&key, &name) });
        Ok(OperationOutcome::Accepted)
    }

    /// Recovers the shard's state from a snapshot location.
    ///
    /// The location is validated (and, for registered names, resolved)
    /// before the per-shard gate is claimed, so `NotFound` and
    /// `InvalidLocation` surface synchronously on both paths and no task
    /// is created for them.
    pub async fn recover_shard(
        &self,
        key: &ShardKey,
        request: RecoveryRequest,
        wait: bool,
    ) -> Result<OperationOutcome<()>, SnapshotError> {
        let shard = self.catalog.get(key)?;
        let location = SnapshotLocation::parse(&request.location)?;
        if let SnapshotLocation::Registered(name) = &location {
            self.store.describe(key, name)?;
        }

        let claim = self.tasks.claim(key, TaskKind::RecoverShard)?;
        let store = Arc::clone(&self.store);
        let client = self.client.clone();
        let retry_interval_ms = self.config.download_retry_interval_ms;
        let retry_attempts = self.config.download_retry_attempts;

        tasks::run(claim, wait, "shard recovery", async move {
            recover::run_recovery(
                store,
                client,
                retry_interval_ms,
                retry_attempts,
                shard,
                location,
                request.checksum,
            )
            .await
        })
        .await
    }
}
