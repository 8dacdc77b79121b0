//! Blueprint data model.
//!
//! These types map one-to-one onto the blueprint YAML document. A blueprint
//! is made of variables, validator configuration, backend defaults and an
//! ordered list of deployment groups, each holding an ordered list of modules.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::value::{OrderedMap, YamlValue};
use crate::error::ConfigError;
use crate::modulereader::{ModuleInfo, OutputInfo};

/// Name of the variable every blueprint must define.
pub const DEPLOYMENT_NAME_VAR: &str = "deployment_name";

/// Backend type used when an override supplies configuration without a type.
pub const DEFAULT_BACKEND_TYPE: &str = "gcs";

/// Returns the provenance stamp written into every expanded blueprint.
#[must_use]
pub fn toolkit_version() -> String {
    match option_env!("CLUSTERKIT_GIT_COMMIT") {
        Some(commit) if !commit.is_empty() => {
            format!("v{}-{commit}", env!("CARGO_PKG_VERSION"))
        }
        _ => format!("v{}", env!("CARGO_PKG_VERSION")),
    }
}

/// The root blueprint document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Blueprint {
    /// Human-readable blueprint name.
    pub blueprint_name: String,
    /// Provenance stamp; always overwritten during expansion.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub toolkit_version: String,
    /// Explicitly configured validators.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<ValidatorConfig>,
    /// Severity policy for validator failures.
    #[serde(default)]
    pub validation_level: ValidationLevel,
    /// Validators that must not run.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skip_validators: BTreeSet<String>,
    /// Blueprint variables.
    #[serde(default)]
    pub vars: OrderedMap<YamlValue>,
    /// Backend applied to groups that do not set their own.
    #[serde(default, skip_serializing_if = "TerraformBackend::is_empty")]
    pub terraform_backend_defaults: TerraformBackend,
    /// Deployment groups in provisioning order.
    pub deployment_groups: Vec<DeploymentGroup>,
}

/// A validator entry of the blueprint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorConfig {
    /// Registered validator name.
    pub validator: String,
    /// Declared skip state.
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip: bool,
    /// Validator inputs; values may reference blueprint variables.
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub inputs: OrderedMap<YamlValue>,
}

/// Where provisioning state is stored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerraformBackend {
    /// Backend type (e.g. `gcs`, `s3`).
    #[serde(rename = "type", default)]
    pub backend_type: String,
    /// Backend configuration.
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub configuration: OrderedMap<YamlValue>,
}

/// A named group of modules provisioned together.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentGroup {
    /// Group name, unique within the blueprint.
    pub group: String,
    /// Group-specific backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_backend: Option<TerraformBackend>,
    /// Modules in declaration order.
    pub modules: Vec<Module>,
}

/// A unit of infrastructure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Module {
    /// Module id, unique within the blueprint.
    pub id: String,
    /// Source locator.
    pub source: String,
    /// Provisioning tool the module targets.
    #[serde(default)]
    pub kind: ModuleKind,
    /// Ids of modules whose outputs are wired into matching inputs.
    #[serde(rename = "use", default, skip_serializing_if = "Vec::is_empty")]
    pub use_modules: Vec<String>,
    /// Input settings; values may be literals or references.
    #[serde(default, skip_serializing_if = "OrderedMap::is_empty")]
    pub settings: OrderedMap<YamlValue>,
    /// Outputs exposed by the deployment group.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputInfo>,
    /// Resolved schema, set during expansion.
    #[serde(skip)]
    pub info: Option<Arc<ModuleInfo>>,
}

/// Provisioning tool a module targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Terraform module.
    #[default]
    Terraform,
    /// Packer template.
    Packer,
}

/// Severity policy for validator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "LevelRepr")]
pub enum ValidationLevel {
    /// Any failure aborts before anything is written.
    Error,
    /// Failures are reported but do not block.
    #[default]
    Warning,
    /// Failures are discarded.
    Ignore,
}

/// Accepted spellings of a validation level.
#[derive(Deserialize)]
#[serde(untagged)]
enum LevelRepr {
    Name(String),
    Code(u8),
}

/// Deployment-time overrides merged into a blueprint before expansion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentSettings {
    /// Variables overriding blueprint variables.
    #[serde(default)]
    pub vars: OrderedMap<YamlValue>,
    /// Backend replacing the blueprint's defaults when its type is set.
    #[serde(default)]
    pub terraform_backend_defaults: TerraformBackend,
    /// Validation level override.
    #[serde(skip)]
    pub validation_level: Option<ValidationLevel>,
    /// Additional validators to skip.
    #[serde(skip)]
    pub skip_validators: BTreeSet<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

impl Blueprint {
    /// Returns the deployment name variable, if it is a string.
    #[must_use]
    pub fn deployment_name(&self) -> Option<&str> {
        self.vars.get(DEPLOYMENT_NAME_VAR).and_then(YamlValue::as_str)
    }

    /// Returns group names in order.
    #[must_use]
    pub fn group_names(&self) -> Vec<&str> {
        self.deployment_groups
            .iter()
            .map(|g| g.group.as_str())
            .collect()
    }

    /// Iterates over `(group index, module)` pairs in provisioning order.
    pub fn modules(&self) -> impl Iterator<Item = (usize, &Module)> {
        self.deployment_groups
            .iter()
            .enumerate()
            .flat_map(|(gi, g)| g.modules.iter().map(move |m| (gi, m)))
    }

    /// Finds a module and the index of its group.
    #[must_use]
    pub fn module(&self, id: &str) -> Option<(usize, &Module)> {
        self.modules().find(|(_, m)| m.id == id)
    }

    /// Adds a validator to the skip set.
    pub fn skip_validator(&mut self, name: impl Into<String>) {
        self.skip_validators.insert(name.into());
    }

    /// Returns true if the named validator must not run.
    #[must_use]
    pub fn is_skipped(&self, name: &str) -> bool {
        self.skip_validators.contains(name)
    }

    /// Blueprint path of a module, used in diagnostics.
    #[must_use]
    pub fn module_path(group: usize, module: usize) -> String {
        format!("deployment_groups[{group}].modules[{module}]")
    }
}

impl TerraformBackend {
    /// Returns true if neither a type nor configuration is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backend_type.is_empty() && self.configuration.is_empty()
    }
}

impl ModuleKind {
    /// Returns the lowercase kind name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Terraform => "terraform",
            Self::Packer => "packer",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ValidationLevel {
    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Ok(Self::Error),
            "WARNING" => Ok(Self::Warning),
            "IGNORE" => Ok(Self::Ignore),
            _ => Err(ConfigError::InvalidValidationLevel {
                level: s.to_string(),
            }),
        }
    }
}

impl TryFrom<LevelRepr> for ValidationLevel {
    type Error = ConfigError;

    fn try_from(repr: LevelRepr) -> Result<Self, ConfigError> {
        match repr {
            LevelRepr::Name(name) => name.parse(),
            LevelRepr::Code(0) => Ok(Self::Error),
            LevelRepr::Code(1) => Ok(Self::Warning),
            LevelRepr::Code(2) => Ok(Self::Ignore),
            LevelRepr::Code(other) => Err(ConfigError::InvalidValidationLevel {
                level: other.to_string(),
            }),
        }
    }
}
