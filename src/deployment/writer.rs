//! Writing deployment directories.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{artifacts_dir, expanded_blueprint_path, record_path, DeploymentRecord, INSTRUCTIONS};
use crate::config::{BlueprintHasher, MaterializedBlueprint};
use crate::error::{ClusterkitError, Result};

/// Writes a materialized blueprint into a deployment directory.
#[async_trait]
pub trait DeploymentWriter: Send + Sync {
    /// Writes the deployment and returns the path of the follow-up
    /// instructions.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written.
    async fn write(&self, blueprint: &MaterializedBlueprint, deployment_dir: &Path)
    -> Result<PathBuf>;
}

/// Writes the artifacts the safety gate reads on the next run.
#[derive(Debug, Default)]
pub struct ArtifactWriter {
    hasher: BlueprintHasher,
}

impl ArtifactWriter {
    /// Creates a new writer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: BlueprintHasher::new(),
        }
    }

    /// Reads the record of a previous deployment, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or parsed.
    pub async fn read_record(deployment_dir: &Path) -> Result<Option<DeploymentRecord>> {
        let path = record_path(deployment_dir);
        if !path.exists() {
            debug!("No deployment record at {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let record = serde_json::from_str(&content).map_err(|e| {
            ClusterkitError::internal(format!(
                "Failed to parse deployment record {}: {e}",
                path.display()
            ))
        })?;
        Ok(Some(record))
    }

    fn record(&self, blueprint: &MaterializedBlueprint) -> Result<DeploymentRecord> {
        let bp = blueprint.blueprint();
        Ok(DeploymentRecord {
            toolkit_version: blueprint.toolkit_version().to_string(),
            blueprint_hash: self.hasher.hash_blueprint(bp)?,
            written_at: Utc::now(),
            groups: bp.group_names().into_iter().map(String::from).collect(),
        })
    }
}

#[async_trait]
impl DeploymentWriter for ArtifactWriter {
    async fn write(
        &self,
        blueprint: &MaterializedBlueprint,
        deployment_dir: &Path,
    ) -> Result<PathBuf> {
        info!("Writing deployment to: {}", deployment_dir.display());
        fs::create_dir_all(artifacts_dir(deployment_dir)).await?;

        let record = self.record(blueprint)?;
        let record_json = serde_json::to_string_pretty(&record).map_err(|e| {
            ClusterkitError::internal(format!("Failed to serialize deployment record: {e}"))
        })?;

        write_atomic(&expanded_blueprint_path(deployment_dir), &blueprint.to_yaml()?).await?;
        write_atomic(&record_path(deployment_dir), &record_json).await?;

        let instructions = deployment_dir.join(INSTRUCTIONS);
        write_atomic(&instructions, &render_instructions(blueprint, deployment_dir)).await?;

        debug!(
            "Deployment written (hash {})",
            self.hasher.short_hash(&record.blueprint_hash)
        );
        Ok(instructions)
    }
}

/// Writes to a temporary sibling first, then renames over the target.
async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(content.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, path).await?;
    Ok(())
}

fn render_instructions(blueprint: &MaterializedBlueprint, deployment_dir: &Path) -> String {
    let bp = blueprint.blueprint();
    let mut text = format!(
        "Deployment {} was expanded by clusterkit {}.\n\nThe materialized blueprint is at:\n  {}\n\nDeployment groups, in provisioning order:\n",
        bp.deployment_name().unwrap_or_default(),
        blueprint.toolkit_version(),
        expanded_blueprint_path(deployment_dir).display()
    );
    for group in &bp.deployment_groups {
        text.push_str(&format!("  - {} ({} modules)\n", group.group, group.modules.len()));
    }
    text.push_str(
        "\nTo change the deployment, edit the blueprint and run `clusterkit create -w` again.\n",
    );
    text
}
