//! Shard recovery pipeline: resolve, stage, verify, unpack, swap.
//!
//! The pipeline never touches the shard's live state until the staged
//! archive has passed the checksum gate and unpacked cleanly. The staging
//! directory is a drop-cleaned temporary directory inside the shard root
//! (so the final rename stays on one filesystem), which means every
//! failure path, including a synchronous caller disconnecting, discards
//! the staged data and leaves the shard exactly as it was.

use crate::checksum::{checksums_match, file_sha256};
use crate::download;
use crate::error::SnapshotError;
use crate::location::SnapshotLocation;
use crate::shard::Shard;
use crate::store::SnapshotStore;
use flate2::read::GzDecoder;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tar::Archive;
use tracing::info;

/// Runs the full recovery pipeline for one shard.
///
/// Steps: stage the source (download or copy of a registered archive)
/// while hashing, compare the digest against the caller's expected
/// checksum, unpack into an isolated replacement state, then atomically
/// swap the shard's generation pointer.
pub(crate) async fn run_recovery(
    store: Arc<SnapshotStore>,
    client: reqwest::Client,
    retry_interval_ms: u64,
    retry_attempts: usize,
    shard: Arc<Shard>,
    location: SnapshotLocation,
    expected_checksum: Option<String>,
) -> Result<(), SnapshotError> {
    let staging = tempfile::Builder::new()
        .prefix(".recovery-")
        .tempdir_in(shard.root())?;
    let archive_path = staging.path().join("incoming.snapshot");

    let actual = match &location {
        SnapshotLocation::Remote(url) => {
            let fetched = download::fetch_remote(
                &client,
                url,
                &archive_path,
                retry_interval_ms,
                retry_attempts,
            )
            .await?;
            info!("staged {} bytes from {}", fetched.size, url);
            fetched.sha256
        }
        SnapshotLocation::Registered(name) => {
            let (path, _description) = store.open(shard.key(), name)?;
            tokio::fs::copy(&path, &archive_path).await?;
            // the recorded checksum is not trusted here; the staged copy
            // is hashed again
            file_sha256(&archive_path).await?
        }
    };

    if let Some(expected) = &expected_checksum {
        if !checksums_match(expected, &actual) {
            return Err(SnapshotError::ChecksumMismatch {
                expected: expected.clone(),
                actual,
            });
        }
    }

    let unpacked = staging.path().join("unpacked");
    tokio::fs::create_dir_all(&unpacked).await?;
    let archive = archive_path.clone();
    let dest = unpacked.clone();
    tokio::task::spawn_blocking(move || unpack_archive(&archive, &dest))
        .await
        .map_err(|e| SnapshotError::IoError(io::Error::other(format!("task join error: {}", e))))??;

    shard.install_generation(&unpacked).await?;
    info!("shard {} recovered from {}", shard.key(), location);
    Ok(())
}

/// Unpacks the staged archive into `dest`.
///
/// Failures at this stage are attributed to the archive: the bytes already
/// passed the checksum gate, so a tar or gzip error means the package
/// itself is malformed. Entries that would escape `dest` are rejected the
/// same way.
fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), SnapshotError> {
    let file = std::fs::File::open(archive).map_err(SnapshotError::IoError)?;
    let decoder = GzDecoder::new(io::BufReader::new(file));
    let mut tar = Archive::new(decoder);

    let entries = tar
        .entries()
        .map_err(|e| SnapshotError::CorruptArchive(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| SnapshotError::CorruptArchive(e.to_string()))?;
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| SnapshotError::CorruptArchive(e.to_string()))?;
        if !unpacked {
            let path = entry
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            return Err(SnapshotError::CorruptArchive(format!(
                "entry {} escapes the archive root",
                path
            )));
        }
    }
    Ok(())
}
