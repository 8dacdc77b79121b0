//! Deployment directories.
//!
//! A deployment lives in `<out>/<deployment_name>`. Everything the toolkit
//! needs to recognise and compare a previous run sits under the marker
//! directory:
//!
//! ```text
//! <deployment>/
//!   instructions.txt
//!   .clusterkit/
//!     artifacts/
//!       expanded_blueprint.yaml
//!       deployment.json
//! ```

mod gate;
mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use gate::check_overwrite_allowed;
pub use writer::{ArtifactWriter, DeploymentWriter};

/// Marker directory that identifies a managed deployment.
pub const MARKER_DIR: &str = ".clusterkit";

/// Artifact directory inside the marker directory.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// File name of the materialized blueprint artifact.
pub const EXPANDED_BLUEPRINT: &str = "expanded_blueprint.yaml";

/// File name of the deployment record.
pub const DEPLOYMENT_RECORD: &str = "deployment.json";

/// File name of the follow-up instructions.
pub const INSTRUCTIONS: &str = "instructions.txt";

/// Returns the marker directory of a deployment.
#[must_use]
pub fn marker_dir(deployment_dir: &Path) -> PathBuf {
    deployment_dir.join(MARKER_DIR)
}

/// Returns the artifact directory of a deployment.
#[must_use]
pub fn artifacts_dir(deployment_dir: &Path) -> PathBuf {
    marker_dir(deployment_dir).join(ARTIFACTS_DIR)
}

/// Returns the path of the materialized blueprint artifact.
#[must_use]
pub fn expanded_blueprint_path(deployment_dir: &Path) -> PathBuf {
    artifacts_dir(deployment_dir).join(EXPANDED_BLUEPRINT)
}

/// Returns the path of the deployment record.
#[must_use]
pub fn record_path(deployment_dir: &Path) -> PathBuf {
    artifacts_dir(deployment_dir).join(DEPLOYMENT_RECORD)
}

/// Summary written next to the materialized blueprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentRecord {
    /// Toolkit version that wrote the deployment.
    pub toolkit_version: String,
    /// Fingerprint of the materialized blueprint.
    pub blueprint_hash: String,
    /// When the deployment was written.
    pub written_at: DateTime<Utc>,
    /// Deployment group names, in order.
    pub groups: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_layout() {
        let dir = Path::new("/tmp/out/golden");
        assert_eq!(marker_dir(dir), Path::new("/tmp/out/golden/.clusterkit"));
        assert_eq!(
            expanded_blueprint_path(dir),
            Path::new("/tmp/out/golden/.clusterkit/artifacts/expanded_blueprint.yaml")
        );
        assert_eq!(
            record_path(dir),
            Path::new("/tmp/out/golden/.clusterkit/artifacts/deployment.json")
        );
    }
}
