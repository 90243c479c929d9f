//! Live shard state: one generation directory behind a `CURRENT` pointer.
//!
//! The shard's on-disk state lives in a `gen-<n>` directory; the `CURRENT`
//! file names the active generation. Recovery builds the next generation in
//! isolation and flips the pointer in one rename, so readers only ever see
//! the old state or the new one.

use crate::error::SnapshotError;
use crate::types::ShardKey;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::RwLock;
use tracing::warn;

const CURRENT_FILE: &str = "CURRENT";

fn generation_dir_name(generation: u64) -> String {
    format!("gen-{:06}", generation)
}

struct ShardState {
    generation: u64,
}

/// One shard's live state.
///
/// Two locks with a fixed order (barrier, then state): `write_barrier`
/// freezes writers during the snapshot link pass without stalling readers;
/// `state` guards the generation pointer so a reader never resolves a
/// half-swapped shard.
pub struct Shard {
    key: ShardKey,
    root: PathBuf,
    write_barrier: RwLock<()>,
    state: RwLock<ShardState>,
}

impl Shard {
    /// Opens the shard directory, creating generation 1 if it is empty.
    ///
    /// Leftovers from an interrupted recovery (`.recovery-*` staging
    /// directories, generation directories `CURRENT` never pointed at,
    /// `CURRENT.tmp`) are swept here.
    pub(crate) fn open(root: PathBuf, key: ShardKey) -> Result<Self, SnapshotError> {
        std::fs::create_dir_all(&root)?;

        let current_path = root.join(CURRENT_FILE);
        let generation = if current_path.exists() {
            let content = std::fs::read_to_string(&current_path)?;
            parse_generation(content.trim()).ok_or_else(|| {
                SnapshotError::IoError(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("malformed CURRENT pointer in {}", root.display()),
                ))
            })?
        } else {
            std::fs::create_dir_all(root.join(generation_dir_name(1)))?;
            persist_current(&root, 1)?;
            1
        };

        sweep_stale(&root, generation);

        Ok(Self {
            key,
            root,
            write_barrier: RwLock::new(()),
            state: RwLock::new(ShardState { generation }),
        })
    }

    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the active generation's files.
    pub async fn current_dir(&self) -> PathBuf {
        let state = self.state.read().await;
        self.root.join(generation_dir_name(state.generation))
    }

    /// Writes one file into the live generation, creating parent
    /// directories as needed.
    pub async fn write_file(&self, relative: &str, bytes: &[u8]) -> Result<(), SnapshotError> {
        let _writing = self.write_barrier.read().await;
        let state = self.state.read().await;
        let path = self
            .root
            .join(generation_dir_name(state.generation))
            .join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Reads one file from the live generation.
    pub async fn read_file(&self, relative: &str) -> Result<Vec<u8>, SnapshotError> {
        let state = self.state.read().await;
        let path = self
            .root
            .join(generation_dir_name(state.generation))
            .join(relative);
        Ok(tokio::fs::read(&path).await?)
    }

    /// Freezes the current generation into `dest` via hard links.
    ///
    /// The write barrier is held only for the link pass, so a snapshot
    /// never observes a half-written state and writers are paused only
    /// while links are created, never while the archive is packaged.
    /// Readers are not blocked at all.
    pub(crate) async fn freeze_into(&self, dest: &Path) -> Result<(), SnapshotError> {
        let _barrier = self.write_barrier.write().await;
        let state = self.state.read().await;
        let src = self.root.join(generation_dir_name(state.generation));
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || hard_link_tree(&src, &dest))
            .await
            .map_err(|e| {
                SnapshotError::IoError(io::Error::other(format!("task join error: {}", e)))
            })??;
        Ok(())
    }

    /// Atomically points the shard at a fully-built replacement state.
    ///
    /// `staged` must live on the same filesystem as the shard root. The
    /// previous generation stays on disk until the pointer flip succeeds,
    /// so any failure up to that point leaves the shard untouched.
    pub(crate) async fn install_generation(&self, staged: &Path) -> Result<(), SnapshotError> {
        let _barrier = self.write_barrier.write().await;
        let mut state = self.state.write().await;
        let next = state.generation + 1;
        let next_dir = self.root.join(generation_dir_name(next));

        if next_dir.exists() {
            // leftover from an interrupted install that never flipped CURRENT
            tokio::fs::remove_dir_all(&next_dir).await?;
        }
        tokio::fs::rename(staged, &next_dir).await?;

        let root = self.root.clone();
        tokio::task::spawn_blocking(move || persist_current(&root, next))
            .await
            .map_err(|e| {
                SnapshotError::IoError(io::Error::other(format!("task join error: {}", e)))
            })??;

        let old_dir = self.root.join(generation_dir_name(state.generation));
        state.generation = next;
        drop(state);

        // The old generation is unreachable once CURRENT points away.
        if let Err(e) = tokio::fs::remove_dir_all(&old_dir).await {
            warn!(
                "failed to remove old generation {}: {}",
                old_dir.display(),
                e
            );
        }
        Ok(())
    }
}

fn parse_generation(content: &str) -> Option<u64> {
    content.strip_prefix("gen-")?.parse::<u64>().ok()
}

/// Writes the `CURRENT` pointer durably: tmp file, fsync, rename.
fn persist_current(root: &Path, generation: u64) -> Result<(), SnapshotError> {
    let tmp = root.join(format!("{}.tmp", CURRENT_FILE));
    {
        let mut file = std::fs::File::create(&tmp)?;
        io::Write::write_all(&mut file, generation_dir_name(generation).as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, root.join(CURRENT_FILE))?;
    Ok(())
}

/// Removes recovery staging leftovers and generations `CURRENT` does not
/// point at.
fn sweep_stale(root: &Path, current: u64) {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let stale = name.starts_with(".recovery-")
            || name == format!("{}.tmp", CURRENT_FILE)
            || matches!(parse_generation(&name), Some(g) if g != current);
        if stale {
            warn!("sweeping stale entry {}", entry.path().display());
            let result = if entry.path().is_dir() {
                std::fs::remove_dir_all(entry.path())
            } else {
                std::fs::remove_file(entry.path())
            };
            if let Err(e) = result {
                warn!("failed to sweep {}: {}", entry.path().display(), e);
            }
        }
    }
}

/// Recursively hard-links a directory tree.
///
/// Hard links keep the freeze pass proportional to the entry count rather
/// than the data size; filesystems without hard-link support fall back to
/// copying.
fn hard_link_tree(src: &Path, dest: &Path) -> Result<(), SnapshotError> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            hard_link_tree(&entry.path(), &target)?;
        } else if std::fs::hard_link(entry.path(), &target).is_err() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Registry of the shards the embedding layer has opened.
///
/// Stands in for the surrounding store's "collection/shard exists"
/// predicate: operations against a key that was never registered fail with
/// `NotFound` before anything else happens.
pub struct ShardCatalog {
    data_root: PathBuf,
    shards: StdRwLock<HashMap<ShardKey, Arc<Shard>>>,
}

impl ShardCatalog {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            shards: StdRwLock::new(HashMap::new()),
        }
    }

    /// Opens (or creates) a shard's directory and registers it.
    pub fn register(&self, key: ShardKey) -> Result<Arc<Shard>, SnapshotError> {
        let root = self
            .data_root
            .join(&key.collection)
            .join(key.shard_id.to_string());
        let shard = Arc::new(Shard::open(root, key.clone())?);
        let mut shards = match self.shards.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        shards.insert(key, Arc::clone(&shard));
        Ok(shard)
    }

    /// Looks up a registered shard.
    pub fn get(&self, key: &ShardKey) -> Result<Arc<Shard>, SnapshotError> {
        let shards = match self.shards.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        shards.get(key).cloned().ok_or_else(|| {
            SnapshotError::NotFound(format!(
                "collection {} shard {}",
                key.collection, key.shard_id
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_first_generation() {
        let dir = tempfile::tempdir().unwrap();
        let key = ShardKey::new("books", 0);
        let shard = Shard::open(dir.path().join("books/0"), key).unwrap();

        let current = shard.current_dir().await;
        assert!(current.ends_with("gen-000001"));
        assert!(current.is_dir());
    }

    #[tokio::test]
    async fn install_generation_flips_pointer_and_drops_old_state() {
        let dir = tempfile::tempdir().unwrap();
        let shard = Shard::open(dir.path().join("books/0"), ShardKey::new("books", 0)).unwrap();
        shard.write_file("a.dat", b"old").await.unwrap();

        let staged = shard.root().join(".recovery-test");
        std::fs::create_dir_all(&staged).unwrap();
        std::fs::write(staged.join("b.dat"), b"new").unwrap();

        shard.install_generation(&staged).await.unwrap();

        assert!(shard.current_dir().await.ends_with("gen-000002"));
        assert_eq!(shard.read_file("b.dat").await.unwrap(), b"new");
        assert!(shard.read_file("a.dat").await.is_err());

        let persisted = std::fs::read_to_string(shard.root().join("CURRENT")).unwrap();
        assert_eq!(persisted.trim(), "gen-000002");
    }

    #[tokio::test]
    async fn reopen_sweeps_unreferenced_generations() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("books/0");
        {
            let shard = Shard::open(root.clone(), ShardKey::new("books", 0)).unwrap();
            shard.write_file("a.dat", b"live").await.unwrap();
        }
        // simulate a crashed recovery: staged generation, pointer untouched
        std::fs::create_dir_all(root.join("gen-000007")).unwrap();
        std::fs::create_dir_all(root.join(".recovery-abc")).unwrap();

        let shard = Shard::open(root.clone(), ShardKey::new("books", 0)).unwrap();
        assert!(!root.join("gen-000007").exists());
        assert!(!root.join(".recovery-abc").exists());
        assert_eq!(shard.read_file("a.dat").await.unwrap(), b"live");
    }
}
