//! Best-effort module metadata from `metadata.yaml`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Metadata file name inside a module directory.
pub const METADATA_FILE: &str = "metadata.yaml";

/// Module metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Requirements section.
    #[serde(default)]
    pub spec: MetadataSpec,
}

/// The `spec` section of the metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataSpec {
    /// What the module needs from the environment.
    #[serde(default)]
    pub requirements: Requirements,
}

/// Module requirements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Requirements {
    /// Cloud services that must be enabled.
    #[serde(default)]
    pub services: Vec<String>,
}

/// Reads module metadata, degrading to empty metadata on any failure.
#[must_use]
pub fn get_metadata_safe(module_dir: &Path) -> Metadata {
    let path = module_dir.join(METADATA_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            debug!("No metadata at {}: {e}", path.display());
            return Metadata::default();
        }
    };

    serde_yaml::from_str(&content).unwrap_or_else(|e| {
        warn!("Ignoring unreadable module metadata {}: {e}", path.display());
        Metadata::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_metadata_is_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(get_metadata_safe(dir.path()), Metadata::default());
    }

    #[test]
    fn test_reads_services() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            "spec:\n  requirements:\n    services: [compute.googleapis.com]\n",
        )
        .unwrap();

        let metadata = get_metadata_safe(dir.path());
        assert_eq!(metadata.spec.requirements.services, vec!["compute.googleapis.com"]);
    }

    #[test]
    fn test_malformed_metadata_degrades() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "spec: [unclosed").unwrap();
        assert_eq!(get_metadata_safe(dir.path()), Metadata::default());
    }
}
