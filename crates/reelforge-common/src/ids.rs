//! Typed identifiers shared across reelforge.
//!
//! [`SourceKey`] names one logical media item + quality combination and is
//! supplied by the catalog. [`EntryRef`] is the opaque handle a playback
//! client uses to address a prepared cache entry.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Stable identifier for one media item + quality combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(String);

impl SourceKey {
    /// Wrap a catalog-supplied key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex-encoded SHA-256 of the key.
    ///
    /// Used to derive deterministic file and container names that are safe
    /// on every filesystem and blob host regardless of what the key contains.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }

    /// Blob-host container name for this key.
    ///
    /// Lowercase alphanumerics and dashes only, at most 63 characters.
    pub fn container_name(&self) -> String {
        let mut readable: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        readable.truncate(30);
        let readable = readable.trim_matches('-');

        let digest = self.digest();
        if readable.is_empty() {
            format!("rf-{}", &digest[..32])
        } else {
            format!("rf-{}-{}", readable, &digest[..24])
        }
    }
}

impl From<&str> for SourceKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle for a prepared cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryRef(Uuid);

impl EntryRef {
    /// Generate a new random entry reference.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryRef {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EntryRef {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for EntryRef {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for EntryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
