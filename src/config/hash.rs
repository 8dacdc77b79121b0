//! Blueprint fingerprinting for change detection.
//!
//! The fingerprint is a SHA-256 digest over the canonical YAML rendering of a
//! blueprint. Because maps keep insertion order, two expansions of the same
//! input always render, and therefore hash, identically.

use sha2::{Digest, Sha256};

use super::blueprint::Blueprint;
use crate::error::{ClusterkitError, Result};

/// Hasher for computing blueprint fingerprints.
#[derive(Debug, Default)]
pub struct BlueprintHasher;

impl BlueprintHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the fingerprint of a whole blueprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the blueprint cannot be rendered as YAML.
    pub fn hash_blueprint(&self, blueprint: &Blueprint) -> Result<String> {
        Self::digest(blueprint)
    }

    fn digest<T: serde::Serialize>(value: &T) -> Result<String> {
        let canonical = serde_yaml::to_string(value)
            .map_err(|e| ClusterkitError::internal(format!("cannot render blueprint: {e}")))?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Returns the first 8 characters of a hash, for display.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
