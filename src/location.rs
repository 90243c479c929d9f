//! Recovery source validation.
//!
//! Every recovery location is adversarial input. Allowed forms are
//! enumerated explicitly (a snapshot name already registered for the
//! target shard, or an http(s) URL) and everything else is rejected up
//! front. Local-file schemes in particular are never dereferenced: they
//! would let a caller make the server read arbitrary local paths.

use crate::error::SnapshotError;

/// A validated reference to a snapshot recovery source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotLocation {
    /// A snapshot already registered for the target shard.
    Registered(String),
    /// A remote archive fetched over HTTP(S).
    Remote(String),
}

impl SnapshotLocation {
    /// Classifies an untrusted location string.
    ///
    /// Schemes are allowlisted: `http` and `https` only. A string without
    /// a scheme is treated as a registered snapshot name and must not look
    /// like a filesystem path.
    pub fn parse(raw: &str) -> Result<Self, SnapshotError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SnapshotError::InvalidLocation("empty location".to_string()));
        }

        if let Some((scheme, rest)) = raw.split_once("://") {
            return match scheme.to_ascii_lowercase().as_str() {
                "http" | "https" if !rest.is_empty() => Ok(Self::Remote(raw.to_string())),
                "http" | "https" => Err(SnapshotError::InvalidLocation(format!(
                    "'{}' has no host",
                    raw
                ))),
                other => Err(SnapshotError::InvalidLocation(format!(
                    "scheme '{}' is not allowed; use http(s) or a registered snapshot name",
                    other
                ))),
            };
        }

        if raw.contains('/') || raw.contains('\\') || raw.contains("..") {
            return Err(SnapshotError::InvalidLocation(format!(
                "'{}' is not a snapshot name",
                raw
            )));
        }
        Ok(Self::Registered(raw.to_string()))
    }
}

impl std::fmt::Display for SnapshotLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registered(name) => write!(f, "snapshot {}", name),
            Self::Remote(url) => write!(f, "{}", url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_and_https_urls_are_accepted() {
        assert_eq!(
            SnapshotLocation::parse("http://example.com/a.snapshot").unwrap(),
            SnapshotLocation::Remote("http://example.com/a.snapshot".to_string())
        );
        assert!(SnapshotLocation::parse("https://example.com/a.snapshot").is_ok());
        // scheme comparison is case-insensitive
        assert!(SnapshotLocation::parse("HTTP://example.com/a.snapshot").is_ok());
    }

    #[test]
    fn bare_names_are_registered_references() {
        assert_eq!(
            SnapshotLocation::parse("books-shard0-2024-01-01T00-00-00Z").unwrap(),
            SnapshotLocation::Registered("books-shard0-2024-01-01T00-00-00Z".to_string())
        );
    }

    #[test]
    fn file_scheme_is_rejected() {
        assert!(matches!(
            SnapshotLocation::parse("file:///etc/passwd"),
            Err(SnapshotError::InvalidLocation(_))
        ));
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        for location in ["ftp://host/a", "s3://bucket/key", "data://x"] {
            assert!(matches!(
                SnapshotLocation::parse(location),
                Err(SnapshotError::InvalidLocation(_))
            ));
        }
    }

    #[test]
    fn path_like_names_are_rejected() {
        for location in ["../../etc/passwd", "a/b", "a\\b", ""] {
            assert!(matches!(
                SnapshotLocation::parse(location),
                Err(SnapshotError::InvalidLocation(_))
            ));
        }
    }
}
