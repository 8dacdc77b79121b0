//! Built-in validators.

use crate::config::{MaterializedBlueprint, OrderedMap, YamlValue, DEPLOYMENT_NAME_VAR};
use crate::error::ValidationFailure;
use crate::modulereader::{classify, SourceKind};

use super::Validator;

/// Name of [`DeploymentVariableNotUsed`].
pub const DEPLOYMENT_VARIABLE_NOT_USED: &str = "test_deployment_variable_not_used";
/// Name of [`ModuleNotUsed`].
pub const MODULE_NOT_USED: &str = "test_module_not_used";
/// Name of [`SourcePinned`].
pub const SOURCE_PINNED: &str = "test_source_pinned";
/// Name of [`ZoneInRegion`].
pub const ZONE_IN_REGION: &str = "test_zone_in_region";

/// Fails when a blueprint variable is never referenced.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeploymentVariableNotUsed;

/// Fails when a `use` entry wires nothing into its module.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModuleNotUsed;

/// Fails when a remote git source is not pinned to a ref.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourcePinned;

/// Fails when the `zone` input does not belong to the `region` input.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZoneInRegion;

impl Validator for DeploymentVariableNotUsed {
    fn name(&self) -> &'static str {
        DEPLOYMENT_VARIABLE_NOT_USED
    }

    fn validate(
        &self,
        blueprint: &MaterializedBlueprint,
        _inputs: &OrderedMap<YamlValue>,
    ) -> Result<(), ValidationFailure> {
        let used = &blueprint.usage().used_vars;
        let unused: Vec<&str> = blueprint
            .blueprint()
            .vars
            .keys()
            .filter(|name| *name != DEPLOYMENT_NAME_VAR && !used.contains(*name))
            .collect();

        if unused.is_empty() {
            return Ok(());
        }
        Err(ValidationFailure::new(
            self.name(),
            format!("the following variables are not used by any module: {}", unused.join(", ")),
        )
        .with_hint("remove the variables or reference them from a module setting"))
    }
}

impl Validator for ModuleNotUsed {
    fn name(&self) -> &'static str {
        MODULE_NOT_USED
    }

    fn validate(
        &self,
        blueprint: &MaterializedBlueprint,
        _inputs: &OrderedMap<YamlValue>,
    ) -> Result<(), ValidationFailure> {
        let unused = &blueprint.usage().unused_uses;
        if unused.is_empty() {
            return Ok(());
        }
        let details: Vec<String> = unused
            .iter()
            .map(|(module, used)| format!("module {module} uses module {used}, but matching setting and outputs were not found"))
            .collect();
        Err(ValidationFailure::new(self.name(), details.join("; "))
            .with_hint("remove the module from the use list or add a setting that consumes its outputs"))
    }
}

fn is_git_source(source: &str) -> bool {
    source.starts_with("git::") || source.starts_with("git@") || source.starts_with("github.com/")
}

impl Validator for SourcePinned {
    fn name(&self) -> &'static str {
        SOURCE_PINNED
    }

    fn validate(
        &self,
        blueprint: &MaterializedBlueprint,
        _inputs: &OrderedMap<YamlValue>,
    ) -> Result<(), ValidationFailure> {
        let unpinned: Vec<String> = blueprint
            .blueprint()
            .modules()
            .filter(|(_, m)| classify(&m.source) == SourceKind::Remote && is_git_source(&m.source))
            .filter(|(_, m)| {
                m.source
                    .split_once('?')
                    .is_none_or(|(_, query)| !query.split('&').any(|p| p.starts_with("ref=")))
            })
            .map(|(_, m)| format!("{} ({})", m.id, m.source))
            .collect();

        if unpinned.is_empty() {
            return Ok(());
        }
        Err(ValidationFailure::new(
            self.name(),
            format!("module sources are not pinned to a ref: {}", unpinned.join(", ")),
        )
        .with_hint("append ?ref=<tag or commit> to each remote source"))
    }
}

impl Validator for ZoneInRegion {
    fn name(&self) -> &'static str {
        ZONE_IN_REGION
    }

    fn validate(
        &self,
        _blueprint: &MaterializedBlueprint,
        inputs: &OrderedMap<YamlValue>,
    ) -> Result<(), ValidationFailure> {
        let (Some(zone), Some(region)) = (
            inputs.get("zone").and_then(YamlValue::as_str),
            inputs.get("region").and_then(YamlValue::as_str),
        ) else {
            return Err(ValidationFailure::new(
                self.name(),
                "inputs \"zone\" and \"region\" must both be strings",
            ));
        };

        let in_region = zone
            .strip_prefix(region)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|suffix| !suffix.is_empty() && !suffix.contains('-'));
        if in_region {
            return Ok(());
        }
        Err(ValidationFailure::new(
            self.name(),
            format!("zone {zone} is not in region {region}"),
        )
        .with_hint("set vars.zone to a zone of vars.region"))
    }
}
