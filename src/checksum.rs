//! Streaming SHA-256 digests and checksum comparison.

use crate::error::SnapshotError;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::Path;

/// Length of a hex-encoded SHA-256 digest.
pub const SHA256_HEX_LEN: usize = 64;

/// Computes the SHA-256 hash of a local file.
///
/// This function reads the file in chunks to avoid loading large archives
/// entirely into memory. It runs in a blocking task to avoid blocking
/// the async runtime.
///
/// # Arguments
///
/// * `path` - Path to the file
///
/// # Returns
///
/// The SHA-256 hash as a lowercase hexadecimal string, or an error.
pub async fn file_sha256(path: impl AsRef<Path>) -> Result<String, SnapshotError> {
    let path = path.as_ref().to_path_buf();

    tokio::task::spawn_blocking(move || {
        use std::io::Read;

        let file = std::fs::File::open(&path).map_err(SnapshotError::IoError)?;
        let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];

        loop {
            let n = reader.read(&mut buffer).map_err(SnapshotError::IoError)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| SnapshotError::IoError(io::Error::other(format!("task join error: {}", e))))?
}

/// Write adapter that hashes bytes as they pass through to the inner writer.
///
/// Lets archive packaging compute the digest of the exact bytes hitting
/// disk in a single pass.
pub struct Sha256Writer<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Sha256Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Consumes the adapter, returning the inner writer and the hex digest
    /// of everything written so far.
    pub fn finalize(self) -> (W, String) {
        (self.inner, format!("{:x}", self.hasher.finalize()))
    }
}

impl<W: Write> Write for Sha256Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Compares two hex-encoded SHA-256 digests.
///
/// Case-insensitive; a mismatch in length or content is a plain `false`,
/// not an error. Callers use this predicate to decide success or failure.
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.len() == SHA256_HEX_LEN
        && actual.len() == SHA256_HEX_LEN
        && expected.eq_ignore_ascii_case(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_is_case_insensitive() {
        let lower = "a".repeat(SHA256_HEX_LEN);
        let upper = "A".repeat(SHA256_HEX_LEN);
        assert!(checksums_match(&lower, &upper));
    }

    #[test]
    fn wrong_length_never_matches() {
        let digest = "a".repeat(SHA256_HEX_LEN);
        assert!(!checksums_match("abc", &digest));
        assert!(!checksums_match(&digest, ""));
        assert!(!checksums_match(
            &"a".repeat(SHA256_HEX_LEN - 1),
            &"a".repeat(SHA256_HEX_LEN - 1)
        ));
    }

    #[test]
    fn different_digests_do_not_match() {
        let a = "a".repeat(SHA256_HEX_LEN);
        let b = "b".repeat(SHA256_HEX_LEN);
        assert!(!checksums_match(&a, &b));
    }

    #[test]
    fn writer_digest_matches_one_shot_digest() {
        let payload = b"some archive bytes";

        let mut writer = Sha256Writer::new(Vec::new());
        writer.write_all(payload).unwrap();
        let (inner, streamed) = writer.finalize();
        assert_eq!(inner, payload);

        let one_shot = format!("{:x}", Sha256::digest(payload));
        assert_eq!(streamed, one_shot);
    }
}
