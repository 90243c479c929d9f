//! Remote archive fetching.

use crate::error::SnapshotError;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_retry2::{Retry, RetryError};
use tracing::warn;

/// Outcome of a staged remote fetch.
pub(crate) struct FetchedArchive {
    pub size: u64,
    pub sha256: String,
}

/// Downloads `url` to `dest`, hashing the bytes as they stream in.
///
/// Transport failures and non-2xx statuses are mapped to `InvalidLocation`:
/// the source could not be established, so nothing about the target shard
/// may be touched. A Content-Length disagreement after a complete-looking
/// transfer is surfaced as an I/O error instead.
async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<FetchedArchive, SnapshotError> {
    let response = client.get(url).send().await.map_err(|e| {
        SnapshotError::InvalidLocation(format!("failed to reach {}: {}", url, e))
    })?;
    let response = response.error_for_status().map_err(|e| {
        let status = e
            .status()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "error".to_string());
        SnapshotError::InvalidLocation(format!("{} returned {}", url, status))
    })?;
    let content_length = response.content_length();

    let mut file = BufWriter::new(tokio::fs::File::create(dest).await?);
    let mut hasher = Sha256::new();

    let mut byte_stream = response.bytes_stream();
    while let Some(piece) = byte_stream.next().await {
        let chunk = piece.map_err(|e| {
            SnapshotError::InvalidLocation(format!("transfer from {} interrupted: {}", url, e))
        })?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    let size = tokio::fs::metadata(dest).await?.len();
    if let Some(content_length) = content_length {
        if size != content_length {
            return Err(SnapshotError::IoError(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "size mismatch for {}: expected {} bytes, got {} bytes",
                    url, content_length, size
                ),
            )));
        }
    } else {
        warn!(
            "Content-Length header was not present for {}. Cannot verify transfer size.",
            url
        );
    }

    Ok(FetchedArchive {
        size,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

/// Fetches with bounded fixed-interval retries.
///
/// Only unreachable-source failures are retried; everything else (local
/// I/O, for instance) is permanent. The last failure is returned when the
/// attempts run out.
pub(crate) async fn fetch_remote(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    retry_interval_ms: u64,
    retry_attempts: usize,
) -> Result<FetchedArchive, SnapshotError> {
    let retry_strategy =
        tokio_retry2::strategy::FixedInterval::from_millis(retry_interval_ms).take(retry_attempts);

    Retry::spawn(retry_strategy, || {
        let dest = dest.to_path_buf();
        let url = url.to_string();

        async move {
            match fetch_once(client, &url, &dest).await {
                Ok(fetched) => Ok(fetched),
                Err(e @ SnapshotError::InvalidLocation(_)) => {
                    warn!("fetch attempt for {} failed: {}", url, e);
                    RetryError::to_transient(e)
                }
                Err(e) => RetryError::to_permanent(e),
            }
        }
    })
    .await
}
