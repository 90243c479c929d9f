//! Snapshot archive storage: create, list, open, delete.
//!
//! Layout: one archive plus one metadata sidecar per snapshot, under a
//! directory namespaced by collection and shard id. A snapshot is visible
//! iff both files exist; archives become visible only through an atomic
//! rename, so a crash mid-write never leaves a readable partial archive.

use crate::checksum::Sha256Writer;
use crate::error::SnapshotError;
use crate::shard::Shard;
use crate::types::{ShardKey, SnapshotDescription};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

const ARCHIVE_SUFFIX: &str = ".snapshot";
const META_SUFFIX: &str = ".snapshot.meta.json";

/// Manages the directory of snapshot archives for all shards.
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn shard_dir(&self, key: &ShardKey) -> PathBuf {
        self.root
            .join(&key.collection)
            .join(key.shard_id.to_string())
    }

    fn archive_path(&self, key: &ShardKey, name: &str) -> PathBuf {
        self.shard_dir(key).join(format!("{}{}", name, ARCHIVE_SUFFIX))
    }

    fn meta_path(&self, key: &ShardKey, name: &str) -> PathBuf {
        self.shard_dir(key).join(format!("{}{}", name, META_SUFFIX))
    }

    /// Creates the shard's snapshot directory, sweeping temp files a crash
    /// may have left behind.
    fn ensure_shard_dir(&self, key: &ShardKey) -> Result<PathBuf, SnapshotError> {
        let dir = self.shard_dir(key);
        fs::create_dir_all(&dir)?;
        sweep_stale(&dir);
        Ok(dir)
    }

    /// Takes a point-in-time archive of the shard's state.
    ///
    /// The shard's current generation is frozen via hard links (the
    /// consistency barrier), packaged as a gzip-compressed tar while the
    /// bytes stream through the SHA-256 hasher, written to a temporary
    /// name, fsynced, and atomically renamed into place. The metadata
    /// sidecar lands last, which is what makes the snapshot visible.
    pub async fn create(&self, shard: &Shard) -> Result<SnapshotDescription, SnapshotError> {
        let key = shard.key().clone();
        let dir = self.ensure_shard_dir(&key)?;
        let name = self.unique_name(&key, &dir);
        let created_at = unix_now();

        let frozen = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&dir)?;
        shard.freeze_into(frozen.path()).await?;

        let tmp_path = dir.join(format!("{}{}.tmp", name, ARCHIVE_SUFFIX));
        let final_path = self.archive_path(&key, &name);

        let frozen_dir = frozen.path().to_path_buf();
        let pack_dest = tmp_path.clone();
        let checksum = tokio::task::spawn_blocking(move || pack_archive(&frozen_dir, &pack_dest))
            .await
            .map_err(|e| {
                SnapshotError::IoError(io::Error::other(format!("task join error: {}", e)))
            })??;

        fs::rename(&tmp_path, &final_path)?;
        let size = fs::metadata(&final_path)?.len();

        let description = SnapshotDescription {
            name: name.clone(),
            checksum,
            size,
            created_at,
        };
        write_meta(&self.meta_path(&key, &name), &description)?;

        info!(
            "created snapshot {} for shard {} ({} bytes)",
            description.name, key, size
        );
        Ok(description)
    }

    /// Lists the shard's snapshots in creation order.
    ///
    /// Re-listing is idempotent and reflects the directory's current state;
    /// archives missing their sidecar (or vice versa) are invisible.
    pub fn list(&self, key: &ShardKey) -> Result<Vec<SnapshotDescription>, SnapshotError> {
        let dir = self.shard_dir(key);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(name) = file_name.strip_suffix(META_SUFFIX) else {
                continue;
            };
            if !self.archive_path(key, name).exists() {
                warn!("metadata without archive for snapshot {}, skipping", name);
                continue;
            }
            match read_meta(&entry.path()) {
                Ok(description) => snapshots.push(description),
                Err(e) => warn!("unreadable metadata for snapshot {}: {}", name, e),
            }
        }

        snapshots.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(snapshots)
    }

    /// Returns the recorded description of one snapshot.
    pub fn describe(
        &self,
        key: &ShardKey,
        name: &str,
    ) -> Result<SnapshotDescription, SnapshotError> {
        let meta_path = self.meta_path(key, name);
        if !meta_path.exists() || !self.archive_path(key, name).exists() {
            return Err(SnapshotError::NotFound(format!("snapshot {}", name)));
        }
        read_meta(&meta_path)
    }

    /// Returns the archive path and its recorded description.
    pub fn open(
        &self,
        key: &ShardKey,
        name: &str,
    ) -> Result<(PathBuf, SnapshotDescription), SnapshotError> {
        let description = self.describe(key, name)?;
        Ok((self.archive_path(key, name), description))
    }

    /// Removes the archive and its metadata.
    ///
    /// The sidecar goes first: a snapshot without its sidecar is already
    /// invisible to `list`, so the pair is removed visibility-atomically.
    /// A repeat delete correctly reports `NotFound`.
    pub fn delete(&self, key: &ShardKey, name: &str) -> Result<(), SnapshotError> {
        let meta_path = self.meta_path(key, name);
        let archive_path = self.archive_path(key, name);
        if !meta_path.exists() && !archive_path.exists() {
            return Err(SnapshotError::NotFound(format!("snapshot {}", name)));
        }

        if meta_path.exists() {
            fs::remove_file(&meta_path)?;
        }
        if archive_path.exists() {
            fs::remove_file(&archive_path)?;
        }
        info!("deleted snapshot {} for shard {}", name, key);
        Ok(())
    }

    /// Picks a name unique within the shard: collection, shard id and
    /// creation timestamp, with a numeric suffix when a second snapshot
    /// lands in the same second.
    fn unique_name(&self, key: &ShardKey, dir: &Path) -> String {
        let stamp = humantime::format_rfc3339_seconds(SystemTime::now())
            .to_string()
            .replace(':', "-");
        let base = format!("{}-shard{}-{}", key.collection, key.shard_id, stamp);

        let mut name = base.clone();
        let mut n = 1;
        while dir.join(format!("{}{}", name, ARCHIVE_SUFFIX)).exists() {
            n += 1;
            name = format!("{}-{}", base, n);
        }
        name
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Packages `src_dir` into a gzip-compressed tar at `dest`, returning the
/// SHA-256 of the bytes written.
fn pack_archive(src_dir: &Path, dest: &Path) -> Result<String, SnapshotError> {
    let file = fs::File::create(dest)?;
    let hashing = Sha256Writer::new(io::BufWriter::new(file));
    let encoder = GzEncoder::new(hashing, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    builder.append_dir_all(".", src_dir)?;
    let encoder = builder.into_inner()?;
    let hashing = encoder.finish()?;
    let (writer, checksum) = hashing.finalize();

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(checksum)
}

fn write_meta(path: &Path, description: &SnapshotDescription) -> Result<(), SnapshotError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(description)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_meta(path: &Path) -> Result<SnapshotDescription, SnapshotError> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

/// Removes interrupted-write leftovers from a snapshot directory.
fn sweep_stale(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".tmp") || name.starts_with(".staging-") {
            warn!("sweeping stale temp entry {}", entry.path().display());
            let result = if entry.path().is_dir() {
                fs::remove_dir_all(entry.path())
            } else {
                fs::remove_file(entry.path())
            };
            if let Err(e) = result {
                warn!("failed to sweep {}: {}", entry.path().display(), e);
            }
        }
    }
}
