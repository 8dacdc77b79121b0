//! Pre-flight validators.
//!
//! Validators are registered under stable names and run against an expanded
//! blueprint in the order the blueprint lists them. Each returns at most one
//! failure; failures are aggregated and filtered by the blueprint's
//! [`ValidationLevel`].

mod builtin;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{
    Blueprint, MaterializedBlueprint, OrderedMap, ValidationLevel, ValidatorConfig, YamlValue,
};
use crate::error::{ValidationFailure, ValidationFailures};

pub use builtin::{
    DeploymentVariableNotUsed, ModuleNotUsed, SourcePinned, ZoneInRegion,
    DEPLOYMENT_VARIABLE_NOT_USED, MODULE_NOT_USED, SOURCE_PINNED, ZONE_IN_REGION,
};

/// A named pre-flight check.
pub trait Validator: Send + Sync {
    /// Registered name.
    fn name(&self) -> &'static str;

    /// Inspects an expanded blueprint.
    ///
    /// # Errors
    ///
    /// Returns the failure, if the check does not pass.
    fn validate(
        &self,
        blueprint: &MaterializedBlueprint,
        inputs: &OrderedMap<YamlValue>,
    ) -> Result<(), ValidationFailure>;
}

/// Validators keyed by name.
#[derive(Clone)]
pub struct ValidatorRegistry {
    validators: HashMap<&'static str, Arc<dyn Validator>>,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DeploymentVariableNotUsed));
        registry.register(Arc::new(ModuleNotUsed));
        registry.register(Arc::new(SourcePinned));
        registry.register(Arc::new(ZoneInRegion));
        registry
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.validators.keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("ValidatorRegistry")
            .field("validators", &names)
            .finish()
    }
}

impl ValidatorRegistry {
    /// Creates a registry with no validators.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// Registers a validator, replacing any with the same name.
    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        self.validators.insert(validator.name(), validator);
    }

    /// Looks up a validator by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Validator>> {
        self.validators.get(name)
    }

    /// Runs every configured, non-skipped validator.
    ///
    /// At `Ignore` level nothing runs. At `Warning` and `Error` every failure
    /// is returned; deciding whether to continue is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns the aggregated failures of every validator that did not pass.
    pub fn execute(&self, blueprint: &MaterializedBlueprint) -> Result<(), ValidationFailures> {
        let bp = blueprint.blueprint();
        if bp.validation_level == ValidationLevel::Ignore {
            debug!("Validation level is IGNORE; skipping validators");
            return Ok(());
        }

        let mut failures = Vec::new();
        for config in &bp.validators {
            let name = config.validator.as_str();
            if config.skip || bp.is_skipped(name) {
                debug!("Skipping validator {name}");
                continue;
            }
            let Some(validator) = self.get(name) else {
                failures.push(
                    ValidationFailure::new(name, "unknown validator")
                        .with_hint("remove it from the blueprint's validators list"),
                );
                continue;
            };

            debug!("Running validator {name}");
            if let Err(failure) = validator.validate(blueprint, &config.inputs) {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            info!("All validators passed");
            Ok(())
        } else {
            Err(ValidationFailures { failures })
        }
    }
}

/// Runs the configured validators with the built-in registry.
///
/// # Errors
///
/// Returns the aggregated failures; see [`ValidatorRegistry::execute`].
pub fn execute(blueprint: &MaterializedBlueprint) -> Result<(), ValidationFailures> {
    ValidatorRegistry::default().execute(blueprint)
}

/// Returns the validators that run when a blueprint configures none.
#[must_use]
pub fn default_validators(blueprint: &Blueprint) -> Vec<ValidatorConfig> {
    let mut defaults: Vec<ValidatorConfig> = [DEPLOYMENT_VARIABLE_NOT_USED, MODULE_NOT_USED, SOURCE_PINNED]
        .iter()
        .map(|name| ValidatorConfig {
            validator: (*name).to_string(),
            ..ValidatorConfig::default()
        })
        .collect();

    if blueprint.vars.contains_key("zone") && blueprint.vars.contains_key("region") {
        defaults.push(ValidatorConfig {
            validator: ZONE_IN_REGION.to_string(),
            skip: false,
            inputs: OrderedMap::new()
                .with("zone", YamlValue::from("$(vars.zone)"))
                .with("region", YamlValue::from("$(vars.region)")),
        });
    }
    defaults
}
