//! The `expand` and `create` flows.
//!
//! Both flows load a blueprint, merge deployment-time overrides, expand it and
//! run the configured validators. `expand` then writes the materialized
//! blueprint to a single file; `create` consults the overwrite safety gate
//! and writes a deployment directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{
    BlueprintHasher, BlueprintParser, DeploymentSettings, Expander, MaterializedBlueprint,
    ValidationLevel,
};
use crate::deployment::{check_overwrite_allowed, ArtifactWriter, DeploymentWriter};
use crate::error::{ClusterkitError, Result, ValidationFailures};
use crate::modulereader::ModuleResolver;
use crate::validators::ValidatorRegistry;

/// Inputs shared by `expand` and `create`.
#[derive(Debug, Clone, Default)]
pub struct ExpandOptions {
    /// Blueprint file.
    pub blueprint: PathBuf,
    /// Optional deployment-settings file.
    pub deployment_file: Option<PathBuf>,
    /// `name=value` variable overrides.
    pub vars: Vec<String>,
    /// `key=value` backend overrides.
    pub backend_config: Vec<String>,
    /// Validation level override.
    pub validation_level: Option<String>,
    /// Validators to skip.
    pub skip_validators: Vec<String>,
}

/// Inputs specific to `create`.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Parent directory of the deployment directory.
    pub out: PathBuf,
    /// Allow overwriting a compatible existing deployment.
    pub overwrite: bool,
    /// Skip the safety gate entirely.
    pub force: bool,
}

/// A validated expansion.
#[derive(Debug, Clone)]
pub struct Expansion {
    /// The materialized blueprint.
    pub blueprint: MaterializedBlueprint,
    /// Failures reported at `WARNING` level.
    pub warnings: Option<ValidationFailures>,
}

/// Result of `create`.
#[derive(Debug, Clone)]
pub struct Created {
    /// The validated expansion that was written.
    pub expansion: Expansion,
    /// The deployment directory.
    pub deployment_dir: PathBuf,
    /// Follow-up instructions written by the deployment writer.
    pub instructions: PathBuf,
    /// True if the blueprint fingerprint matches the previous deployment.
    pub unchanged: bool,
}

/// Loads the `.env` file next to the blueprint, if there is one.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be loaded.
pub fn load_environment(blueprint: &Path) -> Result<()> {
    BlueprintParser::new()
        .with_base_path(base_dir(blueprint))
        .load_dotenv()
}

fn base_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Orchestrates expansion, validation, the safety gate and writing.
pub struct Pipeline {
    expander: Expander,
    validators: ValidatorRegistry,
    writer: Arc<dyn DeploymentWriter>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("expander", &self.expander)
            .field("validators", &self.validators)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline with the built-in validators and the artifact writer.
    #[must_use]
    pub fn new(resolver: Arc<ModuleResolver>) -> Self {
        Self {
            expander: Expander::new(resolver),
            validators: ValidatorRegistry::default(),
            writer: Arc::new(ArtifactWriter::new()),
        }
    }

    /// Replaces the validator registry.
    #[must_use]
    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    /// Replaces the deployment writer.
    #[must_use]
    pub fn with_writer(mut self, writer: Arc<dyn DeploymentWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Loads, expands and validates a blueprint.
    ///
    /// # Errors
    ///
    /// Returns decode, configuration and fetch errors from expansion, and the
    /// validator failures when the validation level is `ERROR`.
    pub async fn expand(&self, options: &ExpandOptions) -> Result<Expansion> {
        let parser = BlueprintParser::new();
        let blueprint = parser.load_file(&options.blueprint)?;
        let settings = load_settings(&parser, options)?;

        let materialized = self.expander.expand(blueprint, settings).await?;
        let warnings = self.validate(&materialized)?;
        Ok(Expansion {
            blueprint: materialized,
            warnings,
        })
    }

    /// Expands a blueprint and writes the materialized form to `out`.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Pipeline::expand`], or an IO error if `out`
    /// cannot be written. Nothing is written when validation fails.
    pub async fn expand_to_file(&self, options: &ExpandOptions, out: &Path) -> Result<Expansion> {
        let expansion = self.expand(options).await?;
        info!("Writing expanded blueprint to: {}", out.display());
        tokio::fs::write(out, expansion.blueprint.to_yaml()?).await?;
        Ok(expansion)
    }

    /// Expands a blueprint and writes a deployment directory.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Pipeline::expand`], the safety gate's refusal,
    /// or the writer's error. Nothing is written unless validation and the
    /// safety gate both pass.
    pub async fn create(&self, options: &ExpandOptions, create: &CreateOptions) -> Result<Created> {
        let expansion = self.expand(options).await?;
        let bp = expansion.blueprint.blueprint();
        let name = bp.deployment_name().ok_or_else(|| {
            ClusterkitError::internal("expanded blueprint has no deployment name")
        })?;
        let deployment_dir = create.out.join(name);

        check_overwrite_allowed(
            &deployment_dir,
            &expansion.blueprint,
            create.overwrite,
            create.force,
        )?;

        let unchanged = match ArtifactWriter::read_record(&deployment_dir).await {
            Ok(Some(record)) => {
                let hash = BlueprintHasher::new().hash_blueprint(bp)?;
                BlueprintHasher::hashes_match(&hash, &record.blueprint_hash)
            }
            Ok(None) => false,
            Err(e) => {
                debug!("Ignoring unreadable deployment record: {e}");
                false
            }
        };
        if unchanged {
            info!(
                "Blueprint is unchanged since the deployment was last written: {}",
                deployment_dir.display()
            );
        }

        let instructions = self.writer.write(&expansion.blueprint, &deployment_dir).await?;
        Ok(Created {
            expansion,
            deployment_dir,
            instructions,
            unchanged,
        })
    }

    /// Runs the validators and applies the blueprint's validation level.
    fn validate(&self, blueprint: &MaterializedBlueprint) -> Result<Option<ValidationFailures>> {
        let level = blueprint.blueprint().validation_level;
        match self.validators.execute(blueprint) {
            Ok(()) => Ok(None),
            Err(failures) if level == ValidationLevel::Error => Err(failures.into()),
            Err(failures) => {
                for failure in &failures.failures {
                    warn!("Validator {} failed: {}", failure.validator, failure.message);
                }
                warn!("Proceeding despite {} validator failure(s) at WARNING level", failures.len());
                Ok(Some(failures))
            }
        }
    }
}

fn load_settings(parser: &BlueprintParser, options: &ExpandOptions) -> Result<DeploymentSettings> {
    let mut settings = match &options.deployment_file {
        Some(path) => parser.load_settings_file(path)?,
        None => DeploymentSettings::default(),
    };

    settings.set_cli_variables(&options.vars)?;
    settings.set_backend_config(&options.backend_config)?;
    if let Some(level) = &options.validation_level {
        settings.set_validation_level(level)?;
    }
    settings.set_skip_validators(&options.skip_validators);
    Ok(settings)
}
