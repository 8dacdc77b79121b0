//! Blueprint expansion.
//!
//! Expansion turns a blueprint plus deployment-time overrides into a
//! [`MaterializedBlueprint`]:
//!
//! 1. Merge override variables, backend defaults, validation level and skips
//! 2. Stamp the toolkit version
//! 3. Check names, kinds and `use` lists
//! 4. Resolve every module schema through the [`ModuleResolver`]
//! 5. Wire `use` outputs and global variables into unset inputs
//! 6. Check settings against the schemas and resolve every reference
//!
//! Variable references are substituted. Module output references are checked
//! (target exists, precedes the consumer, declares the output, no cycles) and
//! kept in place as bound references for the provisioning step.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Component, Path};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::blueprint::{
    toolkit_version, Blueprint, DeploymentSettings, ModuleKind, DEPLOYMENT_NAME_VAR,
};
use super::expression::{self, Parsed, Reference, Segment};
use super::value::{OrderedMap, YamlValue};
use crate::error::{ClusterkitError, ConfigError, Result};
use crate::modulereader::{ModuleInfo, ModuleResolver};
use crate::validators::default_validators;

/// Facts gathered while resolving references, consumed by validators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    /// Variables referenced anywhere in the blueprint.
    pub used_vars: BTreeSet<String>,
    /// `(module, used module)` pairs where nothing of the used module is consumed.
    pub unused_uses: Vec<(String, String)>,
}

/// A fully expanded blueprint.
///
/// Holds no unresolved variable references; every module output reference
/// has been checked. Safe to serialize and to compare against a later run.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedBlueprint {
    blueprint: Blueprint,
    usage: Usage,
}

/// Expands blueprints, consulting a shared module resolver.
#[derive(Debug, Clone)]
pub struct Expander {
    resolver: Arc<ModuleResolver>,
}

impl Expander {
    /// Creates an expander backed by the given resolver.
    #[must_use]
    pub const fn new(resolver: Arc<ModuleResolver>) -> Self {
        Self { resolver }
    }

    /// Expands a blueprint with deployment-time overrides.
    ///
    /// # Errors
    ///
    /// Returns the first configuration, decode or fetch error encountered.
    /// Expansion never completes partially.
    pub async fn expand(
        &self,
        mut blueprint: Blueprint,
        settings: DeploymentSettings,
    ) -> Result<MaterializedBlueprint> {
        merge_settings(&mut blueprint, settings);
        stamp_version(&mut blueprint);
        check_structure(&blueprint)?;
        self.attach_module_info(&mut blueprint).await?;
        wire_modules(&mut blueprint);
        apply_backend_defaults(&mut blueprint);
        if blueprint.validators.is_empty() {
            blueprint.validators = default_validators(&blueprint);
        }

        let usage = materialize_blueprint(&mut blueprint)?;
        info!(
            "Expanded blueprint {} ({} groups, {} modules)",
            blueprint.blueprint_name,
            blueprint.deployment_groups.len(),
            blueprint.modules().count()
        );
        Ok(MaterializedBlueprint { blueprint, usage })
    }

    async fn attach_module_info(&self, blueprint: &mut Blueprint) -> Result<()> {
        let mut tasks = JoinSet::new();
        for (gi, group) in blueprint.deployment_groups.iter().enumerate() {
            for (mi, module) in group.modules.iter().enumerate() {
                let resolver = Arc::clone(&self.resolver);
                let source = module.source.clone();
                let kind = module.kind;
                tasks.spawn(async move { ((gi, mi), resolver.get_info(&source, kind).await) });
            }
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (position, result) = joined
                .map_err(|e| ClusterkitError::internal(format!("module info task failed: {e}")))?;
            results.insert(position, result);
        }

        // Report failures in blueprint order regardless of completion order.
        for (gi, group) in blueprint.deployment_groups.iter_mut().enumerate() {
            for (mi, module) in group.modules.iter_mut().enumerate() {
                let info = results
                    .remove(&(gi, mi))
                    .ok_or_else(|| ClusterkitError::internal("missing module info result"))??;
                module.info = Some(info);
            }
        }
        Ok(())
    }
}

impl MaterializedBlueprint {
    /// Returns the expanded blueprint.
    #[must_use]
    pub const fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    /// Returns the usage facts gathered during expansion.
    #[must_use]
    pub const fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Returns the provenance stamp.
    #[must_use]
    pub fn toolkit_version(&self) -> &str {
        &self.blueprint.toolkit_version
    }

    /// Consumes the wrapper and returns the blueprint.
    #[must_use]
    pub fn into_blueprint(self) -> Blueprint {
        self.blueprint
    }

    /// Re-runs materialization on an already materialized blueprint.
    ///
    /// Uses the module schemas attached during expansion and never fetches.
    /// The result equals `self`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the blueprint was modified into an invalid state.
    pub fn materialize(&self) -> Result<Self> {
        let mut blueprint = self.blueprint.clone();
        let mut usage = materialize_blueprint(&mut blueprint)?;
        usage.used_vars.extend(self.usage.used_vars.iter().cloned());
        Ok(Self { blueprint, usage })
    }

    /// Renders the canonical YAML form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.blueprint)
            .map_err(|e| ClusterkitError::internal(format!("cannot render blueprint: {e}")))
    }

    /// Loads a previously written expanded blueprint.
    ///
    /// The loaded blueprint carries no module schemas and no usage facts.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the text is not a blueprint.
    pub fn from_yaml(content: &str, source: Option<&Path>) -> Result<Self> {
        let blueprint: Blueprint = serde_yaml::from_str(content).map_err(|e| {
            ConfigError::decode(
                format!("invalid expanded blueprint: {e}"),
                source.map(|p| p.display().to_string()),
            )
        })?;
        Ok(Self {
            blueprint,
            usage: Usage::default(),
        })
    }
}

fn merge_settings(blueprint: &mut Blueprint, settings: DeploymentSettings) {
    for (name, value) in settings.vars.items() {
        blueprint.vars.insert(name, value.clone());
    }
    if !settings.terraform_backend_defaults.backend_type.is_empty() {
        debug!(
            "Replacing backend defaults with {} backend from deployment settings",
            settings.terraform_backend_defaults.backend_type
        );
        blueprint.terraform_backend_defaults = settings.terraform_backend_defaults;
    }
    if let Some(level) = settings.validation_level {
        blueprint.validation_level = level;
    }
    for name in settings.skip_validators {
        blueprint.skip_validator(name);
    }
}

fn stamp_version(blueprint: &mut Blueprint) {
    let version = toolkit_version();
    if !blueprint.toolkit_version.is_empty() && blueprint.toolkit_version != version {
        info!(
            "Ignoring toolkit_version {} set in blueprint; using {version}",
            blueprint.toolkit_version
        );
    }
    blueprint.toolkit_version = version;
}

fn check_structure(blueprint: &Blueprint) -> std::result::Result<(), ConfigError> {
    let mut groups = BTreeSet::new();
    let mut modules: HashMap<&str, (usize, ModuleKind)> = HashMap::new();

    for (gi, group) in blueprint.deployment_groups.iter().enumerate() {
        if !groups.insert(group.group.as_str()) {
            return Err(ConfigError::DuplicateName {
                resource_type: String::from("deployment group"),
                name: group.group.clone(),
                path: format!("deployment_groups[{gi}].group"),
            });
        }

        let first_kind = group.modules.first().map(|m| m.kind);
        for (mi, module) in group.modules.iter().enumerate() {
            let path = Blueprint::module_path(gi, mi);
            if modules.insert(&module.id, (gi, module.kind)).is_some() {
                return Err(ConfigError::DuplicateName {
                    resource_type: String::from("module"),
                    name: module.id.clone(),
                    path: format!("{path}.id"),
                });
            }
            if let Some(first) = first_kind.filter(|k| *k != module.kind) {
                return Err(ConfigError::KindMismatch {
                    group: group.group.clone(),
                    first: first.to_string(),
                    second: module.kind.to_string(),
                    path: format!("{path}.kind"),
                });
            }
        }
    }

    for (gi, group) in blueprint.deployment_groups.iter().enumerate() {
        for (mi, module) in group.modules.iter().enumerate() {
            for (ui, used) in module.use_modules.iter().enumerate() {
                let path = format!("{}.use[{ui}]", Blueprint::module_path(gi, mi));
                let Some(&(target_group, kind)) = modules.get(used.as_str()) else {
                    return Err(ConfigError::unresolved(
                        used,
                        format!("module '{used}' does not exist"),
                        path,
                    ));
                };
                if used == &module.id {
                    return Err(ConfigError::InvalidReference {
                        message: format!("module '{used}' cannot use itself"),
                        path,
                    });
                }
                if target_group > gi {
                    return Err(ConfigError::ForwardReference {
                        module: module.id.clone(),
                        target: used.clone(),
                        target_group: blueprint.deployment_groups[target_group].group.clone(),
                        path,
                    });
                }
                if kind == ModuleKind::Packer {
                    return Err(ConfigError::InvalidReference {
                        message: format!("packer module '{used}' has no outputs to use"),
                        path,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Wires unset inputs from `use` modules first, then from blueprint variables.
fn wire_modules(blueprint: &mut Blueprint) {
    let infos: HashMap<String, Arc<ModuleInfo>> = blueprint
        .modules()
        .filter_map(|(_, m)| m.info.as_ref().map(|i| (m.id.clone(), Arc::clone(i))))
        .collect();
    let var_names: BTreeSet<String> = blueprint.vars.keys().map(str::to_string).collect();

    for group in &mut blueprint.deployment_groups {
        for module in &mut group.modules {
            let Some(info) = module.info.clone() else { continue };
            for used in &module.use_modules {
                let Some(used_info) = infos.get(used) else { continue };
                for input in &info.inputs {
                    if !module.settings.contains_key(&input.name) && used_info.has_output(&input.name) {
                        debug!("Wiring {}.{} from module {used}", module.id, input.name);
                        module.settings.insert(
                            input.name.clone(),
                            YamlValue::String(Reference::output(used, &input.name).to_string()),
                        );
                    }
                }
            }
            for input in &info.inputs {
                if !module.settings.contains_key(&input.name) && var_names.contains(&input.name) {
                    module.settings.insert(
                        input.name.clone(),
                        YamlValue::String(Reference::var(&input.name).to_string()),
                    );
                }
            }
        }
    }
}

fn apply_backend_defaults(blueprint: &mut Blueprint) {
    if blueprint.terraform_backend_defaults.is_empty() {
        return;
    }
    let defaults = blueprint.terraform_backend_defaults.clone();
    for group in &mut blueprint.deployment_groups {
        let is_terraform = group.modules.iter().all(|m| m.kind == ModuleKind::Terraform);
        if is_terraform && group.terraform_backend.is_none() {
            group.terraform_backend = Some(defaults.clone());
        }
    }
}

/// Checks a blueprint and resolves every reference in place.
fn materialize_blueprint(blueprint: &mut Blueprint) -> Result<Usage> {
    check_structure(blueprint)?;
    check_settings(blueprint)?;

    let mut resolution = Resolution::new(blueprint);

    let raw_vars = std::mem::take(&mut blueprint.vars);
    for (name, value) in raw_vars.items() {
        let resolved = resolution.resolve(value, &format!("vars.{name}"), &mut Scope::vars())?;
        resolution.vars.insert(name, resolved);
    }
    check_deployment_name(&resolution.vars)?;

    let mut unused_uses = Vec::new();
    let mut group_deps: Vec<Vec<(String, BTreeSet<String>)>> = Vec::new();
    for (gi, group) in blueprint.deployment_groups.iter_mut().enumerate() {
        let mut deps = Vec::new();
        for (mi, module) in group.modules.iter_mut().enumerate() {
            let path = Blueprint::module_path(gi, mi);
            let mut scope = Scope::module(&module.id, gi);
            module.settings = module.settings.try_map(|key, value| {
                resolution.resolve(value, &format!("{path}.settings.{key}"), &mut scope)
            })?;

            for used in &module.use_modules {
                if !scope.targets.contains(used) {
                    unused_uses.push((module.id.clone(), used.clone()));
                }
            }
            let same_group: BTreeSet<String> = scope
                .targets
                .into_iter()
                .filter(|t| resolution.group_of(t) == Some(gi))
                .collect();
            deps.push((module.id.clone(), same_group));
        }
        group_deps.push(deps);
    }
    for deps in &group_deps {
        if let Some(cycle) = find_cycle(deps) {
            return Err(ConfigError::ReferenceCycle { cycle }.into());
        }
    }

    for (vi, validator) in blueprint.validators.iter_mut().enumerate() {
        validator.inputs = validator.inputs.try_map(|key, value| {
            resolution.resolve(value, &format!("validators[{vi}].inputs.{key}"), &mut Scope::vars())
        })?;
    }

    let defaults = &mut blueprint.terraform_backend_defaults;
    defaults.configuration = defaults.configuration.try_map(|key, value| {
        resolution.resolve(
            value,
            &format!("terraform_backend_defaults.configuration.{key}"),
            &mut Scope::vars(),
        )
    })?;
    for (gi, group) in blueprint.deployment_groups.iter_mut().enumerate() {
        if let Some(backend) = group.terraform_backend.as_mut() {
            backend.configuration = backend.configuration.try_map(|key, value| {
                resolution.resolve(
                    value,
                    &format!("deployment_groups[{gi}].terraform_backend.configuration.{key}"),
                    &mut Scope::vars(),
                )
            })?;
        }
    }

    blueprint.vars = std::mem::take(&mut resolution.vars);
    Ok(Usage {
        used_vars: resolution.used_vars,
        unused_uses,
    })
}

/// Checks module settings and outputs against the attached schemas.
fn check_settings(blueprint: &Blueprint) -> std::result::Result<(), ConfigError> {
    for (gi, group) in blueprint.deployment_groups.iter().enumerate() {
        for (mi, module) in group.modules.iter().enumerate() {
            let Some(info) = module.info.as_ref() else { continue };
            let path = Blueprint::module_path(gi, mi);

            for key in module.settings.keys() {
                if info.input(key).is_none() {
                    return Err(ConfigError::UnknownSetting {
                        module: module.id.clone(),
                        setting: key.to_string(),
                        path: format!("{path}.settings.{key}"),
                    });
                }
            }
            for input in info.inputs.iter().filter(|i| i.required) {
                if !module.settings.contains_key(&input.name) {
                    return Err(ConfigError::MissingRequiredInput {
                        module: module.id.clone(),
                        input: input.name.clone(),
                        path: path.clone(),
                    });
                }
            }
            for (oi, output) in module.outputs.iter().enumerate() {
                if !info.has_output(&output.name) {
                    return Err(ConfigError::UnknownOutput {
                        module: module.id.clone(),
                        output: output.name.clone(),
                        path: format!("{path}.outputs[{oi}]"),
                    });
                }
            }
        }
    }
    Ok(())
}

fn check_deployment_name(vars: &OrderedMap<YamlValue>) -> std::result::Result<(), ConfigError> {
    match vars.get(DEPLOYMENT_NAME_VAR) {
        None => Err(ConfigError::InvalidVariable {
            message: format!("{DEPLOYMENT_NAME_VAR} must be set"),
            path: String::from("vars"),
        }),
        Some(YamlValue::String(name)) if !name.is_empty() => {
            // The name becomes a directory below the output root.
            let mut components = Path::new(name).components();
            let single = matches!(components.next(), Some(Component::Normal(_)))
                && components.next().is_none()
                && !name.contains(['/', '\\']);
            if single {
                Ok(())
            } else {
                Err(ConfigError::InvalidVariable {
                    message: format!(
                        "{DEPLOYMENT_NAME_VAR} '{name}' must be a single directory name"
                    ),
                    path: format!("vars.{DEPLOYMENT_NAME_VAR}"),
                })
            }
        }
        Some(_) => Err(ConfigError::InvalidVariable {
            message: format!("{DEPLOYMENT_NAME_VAR} must be a non-empty string"),
            path: format!("vars.{DEPLOYMENT_NAME_VAR}"),
        }),
    }
}

/// A module as seen by references to it.
struct Target {
    group: usize,
    group_name: String,
    kind: ModuleKind,
    info: Option<Arc<ModuleInfo>>,
}

/// Where a value being resolved lives.
struct Scope<'a> {
    /// Referencing module and its group; `None` where only variables may be referenced.
    module: Option<(&'a str, usize)>,
    /// Modules whose outputs were referenced.
    targets: BTreeSet<String>,
}

impl<'a> Scope<'a> {
    fn vars() -> Self {
        Self {
            module: None,
            targets: BTreeSet::new(),
        }
    }

    fn module(id: &'a str, group: usize) -> Self {
        Self {
            module: Some((id, group)),
            targets: BTreeSet::new(),
        }
    }
}

/// State of a single resolution pass.
struct Resolution {
    vars: OrderedMap<YamlValue>,
    targets: HashMap<String, Target>,
    used_vars: BTreeSet<String>,
}

impl Resolution {
    fn new(blueprint: &Blueprint) -> Self {
        let targets = blueprint
            .modules()
            .map(|(gi, m)| {
                (
                    m.id.clone(),
                    Target {
                        group: gi,
                        group_name: blueprint.deployment_groups[gi].group.clone(),
                        kind: m.kind,
                        info: m.info.clone(),
                    },
                )
            })
            .collect();
        Self {
            vars: OrderedMap::new(),
            targets,
            used_vars: BTreeSet::new(),
        }
    }

    fn group_of(&self, module: &str) -> Option<usize> {
        self.targets.get(module).map(|t| t.group)
    }

    fn resolve(
        &mut self,
        value: &YamlValue,
        path: &str,
        scope: &mut Scope<'_>,
    ) -> std::result::Result<YamlValue, ConfigError> {
        match value {
            YamlValue::String(text) => self.resolve_string(text, path, scope),
            YamlValue::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.resolve(item, &format!("{path}[{i}]"), scope))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(YamlValue::Sequence),
            YamlValue::Mapping(map) => map
                .try_map(|key, item| self.resolve(item, &format!("{path}.{key}"), scope))
                .map(YamlValue::Mapping),
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(
        &mut self,
        text: &str,
        path: &str,
        scope: &mut Scope<'_>,
    ) -> std::result::Result<YamlValue, ConfigError> {
        let parsed = expression::parse(text).map_err(|message| ConfigError::InvalidReference {
            message,
            path: path.to_string(),
        })?;

        match parsed {
            Parsed::Literal => Ok(YamlValue::String(text.to_string())),
            Parsed::Whole(Reference::Var(name)) => self.lookup_var(&name, path, scope),
            Parsed::Whole(reference @ Reference::ModuleOutput { .. }) => {
                self.check_output(&reference, path, scope)?;
                Ok(YamlValue::String(text.to_string()))
            }
            Parsed::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => out.push_str(&t),
                        Segment::Ref(Reference::Var(name)) => {
                            let value = self.lookup_var(&name, path, scope)?;
                            let rendered =
                                value.scalar_text().ok_or_else(|| ConfigError::InvalidReference {
                                    message: format!(
                                        "variable '{name}' is a {} and cannot be interpolated into text",
                                        value.type_name()
                                    ),
                                    path: path.to_string(),
                                })?;
                            out.push_str(&rendered);
                        }
                        Segment::Ref(reference) => {
                            return Err(ConfigError::InvalidReference {
                                message: format!(
                                    "module output reference '{reference}' must be the entire value"
                                ),
                                path: path.to_string(),
                            });
                        }
                    }
                }
                Ok(YamlValue::String(out))
            }
        }
    }

    fn lookup_var(
        &mut self,
        name: &str,
        path: &str,
        scope: &Scope<'_>,
    ) -> std::result::Result<YamlValue, ConfigError> {
        let value = self.vars.get(name).cloned().ok_or_else(|| {
            let reason = if scope.module.is_none() && path.starts_with("vars.") {
                "variable is not defined before this point"
            } else {
                "variable is not defined"
            };
            ConfigError::unresolved(Reference::var(name).to_string(), reason, path)
        })?;
        self.used_vars.insert(name.to_string());
        Ok(value)
    }

    fn check_output(
        &self,
        reference: &Reference,
        path: &str,
        scope: &mut Scope<'_>,
    ) -> std::result::Result<(), ConfigError> {
        let Reference::ModuleOutput { module, output } = reference else {
            return Ok(());
        };
        let Some((own_id, own_group)) = scope.module else {
            return Err(ConfigError::InvalidReference {
                message: format!("'{reference}' cannot be used here; only variables may be referenced"),
                path: path.to_string(),
            });
        };
        let target = self.targets.get(module).ok_or_else(|| {
            ConfigError::unresolved(
                reference.to_string(),
                format!("module '{module}' does not exist"),
                path,
            )
        })?;
        if module == own_id {
            return Err(ConfigError::ReferenceCycle {
                cycle: vec![own_id.to_string(), own_id.to_string()],
            });
        }
        if target.group > own_group {
            return Err(ConfigError::ForwardReference {
                module: own_id.to_string(),
                target: module.clone(),
                target_group: target.group_name.clone(),
                path: path.to_string(),
            });
        }
        if target.kind == ModuleKind::Packer {
            return Err(ConfigError::InvalidReference {
                message: format!("packer module '{module}' has no outputs that can be referenced"),
                path: path.to_string(),
            });
        }
        if let Some(info) = &target.info {
            if !info.has_output(output) {
                return Err(ConfigError::unresolved(
                    reference.to_string(),
                    format!("module '{module}' has no output named '{output}'"),
                    path,
                ));
            }
        }
        scope.targets.insert(module.clone());
        Ok(())
    }
}

/// Finds modules involved in a reference cycle within one group.
///
/// `deps` lists each module with the same-group modules it references, in
/// declaration order. Returns the modules on (or between) cycles.
fn find_cycle(deps: &[(String, BTreeSet<String>)]) -> Option<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> =
        deps.iter().map(|(id, d)| (id.as_str(), d.len())).collect();

    let mut queue: VecDeque<&str> = deps
        .iter()
        .filter(|(_, d)| d.is_empty())
        .map(|(id, _)| id.as_str())
        .collect();
    while let Some(done) = queue.pop_front() {
        for (id, d) in deps {
            if d.contains(done) {
                if let Some(degree) = in_degree.get_mut(id.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(id);
                    }
                }
            }
        }
    }

    let mut remaining: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree > 0)
        .map(|(id, _)| *id)
        .collect();
    if remaining.is_empty() {
        return None;
    }

    // Drop modules that merely depend on a cycle without being part of one.
    loop {
        let downstream: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| {
                !deps
                    .iter()
                    .any(|(other, d)| remaining.contains(other.as_str()) && d.contains(*id))
            })
            .collect();
        if downstream.is_empty() {
            break;
        }
        for id in downstream {
            remaining.remove(id);
        }
    }

    Some(
        deps.iter()
            .map(|(id, _)| id.clone())
            .filter(|id| remaining.contains(id.as_str()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlueprintParser, DeploymentGroup, Module};
    use crate::modulereader::{OutputInfo, VarInfo};
    use tempfile::TempDir;

    fn var(name: &str, required: bool) -> VarInfo {
        VarInfo {
            name: name.to_string(),
            var_type: String::from("string"),
            description: String::new(),
            default: if required { None } else { Some(YamlValue::Null) },
            required,
        }
    }

    fn schema(inputs: &[(&str, bool)], outputs: &[&str]) -> ModuleInfo {
        ModuleInfo {
            inputs: inputs.iter().map(|(n, r)| var(n, *r)).collect(),
            outputs: outputs.iter().map(|o| OutputInfo::named(*o)).collect(),
            ..ModuleInfo::default()
        }
    }

    /// Builds an expander whose resolver is pre-seeded with schemas so no I/O happens.
    async fn expander(schemas: Vec<(&str, ModuleKind, ModuleInfo)>) -> (Expander, TempDir) {
        let root = TempDir::new().unwrap();
        let resolver = ModuleResolver::new(root.path());
        for (source, kind, info) in schemas {
            resolver.set_info(source, kind, info).await;
        }
        (Expander::new(Arc::new(resolver)), root)
    }

    fn parse(text: &str) -> Blueprint {
        BlueprintParser::new().parse_yaml(text, None).unwrap()
    }

    fn setting<'a>(mat: &'a MaterializedBlueprint, module: &str, key: &str) -> Option<&'a YamlValue> {
        mat.blueprint()
            .module(module)
            .and_then(|(_, m)| m.settings.get(key))
    }

    const NETWORK_AND_FS: &str = r"
blueprint_name: test
vars:
  deployment_name: dep
  project_id: proj
  region: us-central1
deployment_groups:
  - group: primary
    modules:
      - id: network1
        source: modules/network/vpc
      - id: homefs
        source: modules/file-system/filestore
        use: [network1]
        settings:
          name: $(vars.deployment_name)-home
";

    async fn network_expander() -> (Expander, TempDir) {
        expander(vec![
            (
                "modules/network/vpc",
                ModuleKind::Terraform,
                schema(&[("project_id", true), ("region", true)], &["network_id", "subnetwork"]),
            ),
            (
                "modules/file-system/filestore",
                ModuleKind::Terraform,
                schema(&[("project_id", true), ("network_id", true), ("name", false)], &["network_storage"]),
            ),
        ])
        .await
    }

    #[tokio::test]
    async fn test_override_merge_keeps_order() {
        let (expander, _root) = expander(vec![]).await;
        let mut bp = parse("blueprint_name: t\nvars: {deployment_name: d, a: 1, b: 2}\ndeployment_groups: []\n");
        bp.vars = OrderedMap::new()
            .with("a", YamlValue::from(1_i64))
            .with("b", YamlValue::from(2_i64))
            .with("deployment_name", YamlValue::from("d"));

        let mut settings = DeploymentSettings::default();
        settings.set_cli_variables(&[String::from("a=9")]).unwrap();

        let mat = expander.expand(bp, settings).await.unwrap();
        let items: Vec<(&str, Option<i64>)> = mat
            .blueprint()
            .vars
            .items()
            .filter(|(k, _)| *k != "deployment_name")
            .map(|(k, v)| (k, v.as_i64()))
            .collect();
        assert_eq!(items, vec![("a", Some(9)), ("b", Some(2))]);
    }

    #[tokio::test]
    async fn test_use_and_global_vars_are_wired() {
        let (expander, _root) = network_expander().await;
        let mat = expander
            .expand(parse(NETWORK_AND_FS), DeploymentSettings::default())
            .await
            .unwrap();

        assert_eq!(
            setting(&mat, "homefs", "network_id").and_then(YamlValue::as_str),
            Some("$(network1.network_id)")
        );
        assert_eq!(
            setting(&mat, "homefs", "project_id").and_then(YamlValue::as_str),
            Some("proj")
        );
        assert_eq!(
            setting(&mat, "network1", "region").and_then(YamlValue::as_str),
            Some("us-central1")
        );
        assert_eq!(
            setting(&mat, "homefs", "name").and_then(YamlValue::as_str),
            Some("dep-home")
        );
        assert!(mat.usage().unused_uses.is_empty());
        assert!(mat.usage().used_vars.contains("project_id"));
    }

    #[tokio::test]
    async fn test_materialize_is_idempotent() {
        let (expander, _root) = network_expander().await;
        let mat = expander
            .expand(parse(NETWORK_AND_FS), DeploymentSettings::default())
            .await
            .unwrap();

        let again = mat.materialize().unwrap();
        assert_eq!(again, mat);
        assert_eq!(again.materialize().unwrap(), mat);
        assert_eq!(again.to_yaml().unwrap(), mat.to_yaml().unwrap());
    }

    #[tokio::test]
    async fn test_reference_cycle_names_both_modules() {
        let (expander, _root) = expander(vec![(
            "./mod",
            ModuleKind::Terraform,
            schema(&[("input", false)], &["out"]),
        )])
        .await;
        let bp = parse(
            r"
blueprint_name: t
vars: {deployment_name: d}
deployment_groups:
  - group: g
    modules:
      - id: a
        source: ./mod
        settings: {input: $(b.out)}
      - id: b
        source: ./mod
        settings: {input: $(a.out)}
      - id: c
        source: ./mod
        settings: {input: $(a.out)}
",
        );

        let err = expander.expand(bp, DeploymentSettings::default()).await.unwrap_err();
        match err {
            ClusterkitError::Config(ConfigError::ReferenceCycle { cycle }) => {
                assert_eq!(cycle, vec!["a", "b"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_forward_reference_across_groups() {
        let (expander, _root) = expander(vec![(
            "./mod",
            ModuleKind::Terraform,
            schema(&[("input", false)], &["out"]),
        )])
        .await;
        let bp = parse(
            r"
blueprint_name: t
vars: {deployment_name: d}
deployment_groups:
  - group: first
    modules:
      - id: a
        source: ./mod
        settings: {input: $(b.out)}
  - group: second
    modules:
      - id: b
        source: ./mod
",
        );

        let err = expander.expand(bp, DeploymentSettings::default()).await.unwrap_err();
        assert!(matches!(
            err,
            ClusterkitError::Config(ConfigError::ForwardReference { ref module, ref target_group, .. })
                if module == "a" && target_group == "second"
        ));
    }

    #[tokio::test]
    async fn test_missing_required_input() {
        let (expander, _root) = network_expander().await;
        let text = NETWORK_AND_FS.replace("  project_id: proj\n", "");

        let err = expander
            .expand(parse(&text), DeploymentSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClusterkitError::Config(ConfigError::MissingRequiredInput { ref module, ref input, .. })
                if module == "network1" && input == "project_id"
        ));
    }

    #[tokio::test]
    async fn test_unknown_setting() {
        let (expander, _root) = network_expander().await;
        let text = NETWORK_AND_FS.replace("name: $(vars.deployment_name)-home", "nmae: typo");

        let err = expander
            .expand(parse(&text), DeploymentSettings::default())
            .await
            .unwrap_err();
        match err {
            ClusterkitError::Config(ConfigError::UnknownSetting { setting, path, .. }) => {
                assert_eq!(setting, "nmae");
                assert_eq!(path, "deployment_groups[0].modules[1].settings.nmae");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unresolved_variable_and_output() {
        let (expander, _root) = network_expander().await;

        let text = NETWORK_AND_FS.replace("$(vars.deployment_name)-home", "$(vars.nope)");
        let err = expander
            .expand(parse(&text), DeploymentSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterkitError::Config(ConfigError::UnresolvedReference { .. })));

        let text = NETWORK_AND_FS.replace("$(vars.deployment_name)-home", "$(network1.missing)");
        let err = expander
            .expand(parse(&text), DeploymentSettings::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("has no output named 'missing'"));
    }

    #[tokio::test]
    async fn test_version_stamp_overrides_blueprint() {
        let (expander, _root) = expander(vec![]).await;
        let bp = parse("blueprint_name: t\ntoolkit_version: v0.0.1-spoofed\nvars: {deployment_name: d}\ndeployment_groups: []\n");

        let mat = expander.expand(bp, DeploymentSettings::default()).await.unwrap();
        assert_eq!(mat.toolkit_version(), toolkit_version());
    }

    #[tokio::test]
    async fn test_deployment_name_required() {
        let (expander, _root) = expander(vec![]).await;
        let bp = parse("blueprint_name: t\nvars: {deployment_name: 3}\ndeployment_groups: []\n");
        let err = expander.expand(bp, DeploymentSettings::default()).await.unwrap_err();
        assert!(matches!(err, ClusterkitError::Config(ConfigError::InvalidVariable { .. })));
    }

    #[tokio::test]
    async fn test_vars_reference_earlier_vars_only() {
        let (expander, _root) = expander(vec![]).await;
        let bp = parse("blueprint_name: t\nvars: {deployment_name: d, prefix: $(vars.deployment_name)-x}\ndeployment_groups: []\n");
        let mat = expander.expand(bp, DeploymentSettings::default()).await.unwrap();
        assert_eq!(mat.blueprint().vars.get("prefix").and_then(YamlValue::as_str), Some("d-x"));

        let bp = parse("blueprint_name: t\nvars: {prefix: $(vars.later), later: x, deployment_name: d}\ndeployment_groups: []\n");
        assert!(expander.expand(bp, DeploymentSettings::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_module_id() {
        let (expander, _root) = network_expander().await;
        let text = NETWORK_AND_FS.replace("id: homefs", "id: network1");
        let err = expander
            .expand(parse(&text), DeploymentSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterkitError::Config(ConfigError::DuplicateName { .. })));
    }

    #[tokio::test]
    async fn test_backend_override_and_group_defaults() {
        let (expander, _root) = network_expander().await;
        let mut settings = DeploymentSettings::default();
        settings
            .set_backend_config(&[String::from("bucket=$(vars.project_id)-state")])
            .unwrap();

        let mat = expander.expand(parse(NETWORK_AND_FS), settings).await.unwrap();
        let backend = mat.blueprint().deployment_groups[0]
            .terraform_backend
            .as_ref()
            .unwrap();
        assert_eq!(backend.backend_type, "gcs");
        assert_eq!(
            backend.configuration.get("bucket").and_then(YamlValue::as_str),
            Some("proj-state")
        );
    }

    #[tokio::test]
    async fn test_unused_use_is_recorded() {
        let (expander, _root) = expander(vec![
            ("./producer", ModuleKind::Terraform, schema(&[], &["unrelated"])),
            ("./consumer", ModuleKind::Terraform, schema(&[("input", false)], &[])),
        ])
        .await;
        let bp = Blueprint {
            blueprint_name: String::from("t"),
            vars: OrderedMap::new().with("deployment_name", YamlValue::from("d")),
            deployment_groups: vec![DeploymentGroup {
                group: String::from("g"),
                terraform_backend: None,
                modules: vec![
                    Module {
                        id: String::from("p"),
                        source: String::from("./producer"),
                        ..Module::default()
                    },
                    Module {
                        id: String::from("c"),
                        source: String::from("./consumer"),
                        use_modules: vec![String::from("p")],
                        ..Module::default()
                    },
                ],
            }],
            ..Blueprint::default()
        };

        let mat = expander.expand(bp, DeploymentSettings::default()).await.unwrap();
        assert_eq!(
            mat.usage().unused_uses,
            vec![(String::from("c"), String::from("p"))]
        );
    }

    #[tokio::test]
    async fn test_yaml_artifact_loads_back() {
        let (expander, _root) = network_expander().await;
        let mat = expander
            .expand(parse(NETWORK_AND_FS), DeploymentSettings::default())
            .await
            .unwrap();

        let loaded = MaterializedBlueprint::from_yaml(&mat.to_yaml().unwrap(), None).unwrap();
        assert_eq!(loaded.toolkit_version(), mat.toolkit_version());
        assert_eq!(loaded.blueprint().group_names(), vec!["primary"]);
    }

    #[tokio::test]
    async fn test_deployment_name_must_be_one_directory() {
        let (expander, _root) = expander(vec![]).await;
        for name in ["../escape", "/abs", "a/b", "..", "."] {
            let bp = parse(&format!(
                "blueprint_name: t\nvars: {{deployment_name: '{name}'}}\ndeployment_groups: []\n"
            ));
            let err = expander.expand(bp, DeploymentSettings::default()).await.unwrap_err();
            assert!(
                matches!(err, ClusterkitError::Config(ConfigError::InvalidVariable { .. })),
                "{name}: {err}"
            );
        }
    }

    fn packer_expander_text(consumer_settings: &str, consumer_use: &str) -> String {
        format!(
            r"
blueprint_name: t
vars: {{deployment_name: d}}
deployment_groups:
  - group: images
    modules:
      - id: pk
        source: ./image
        kind: packer
  - group: cluster
    modules:
      - id: c
        source: ./mod
        use: [{consumer_use}]
        settings: {{{consumer_settings}}}
"
        )
    }

    async fn packer_expander() -> (Expander, TempDir) {
        expander(vec![
            ("./image", ModuleKind::Packer, schema(&[], &["out"])),
            ("./mod", ModuleKind::Terraform, schema(&[("input", false)], &["out"])),
        ])
        .await
    }

    #[tokio::test]
    async fn test_mixed_kinds_in_group() {
        let (expander, _root) = packer_expander().await;
        let bp = parse(
            r"
blueprint_name: t
vars: {deployment_name: d}
deployment_groups:
  - group: g
    modules:
      - id: a
        source: ./mod
      - id: pk
        source: ./image
        kind: packer
",
        );
        let err = expander.expand(bp, DeploymentSettings::default()).await.unwrap_err();
        match err {
            ClusterkitError::Config(ConfigError::KindMismatch { group, path, .. }) => {
                assert_eq!(group, "g");
                assert_eq!(path, "deployment_groups[0].modules[1].kind");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_packer_outputs_cannot_be_referenced() {
        let (expander, _root) = packer_expander().await;

        let bp = parse(&packer_expander_text("input: $(pk.out)", ""));
        let err = expander.expand(bp, DeploymentSettings::default()).await.unwrap_err();
        assert!(
            matches!(err, ClusterkitError::Config(ConfigError::InvalidReference { ref message, .. }) if message.contains("packer")),
            "{err}"
        );

        let bp = parse(&packer_expander_text("", "pk"));
        let err = expander.expand(bp, DeploymentSettings::default()).await.unwrap_err();
        match err {
            ClusterkitError::Config(ConfigError::InvalidReference { message, path }) => {
                assert!(message.contains("packer"), "{message}");
                assert_eq!(path, "deployment_groups[1].modules[0].use[0]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_declared_output_must_exist() {
        let (expander, _root) = network_expander().await;
        let text = NETWORK_AND_FS.replace(
            "      - id: homefs\n",
            "        outputs: [network_id, no_such_output]\n      - id: homefs\n",
        );
        let err = expander
            .expand(parse(&text), DeploymentSettings::default())
            .await
            .unwrap_err();
        match err {
            ClusterkitError::Config(ConfigError::UnknownOutput { module, output, path }) => {
                assert_eq!(module, "network1");
                assert_eq!(output, "no_such_output");
                assert_eq!(path, "deployment_groups[0].modules[0].outputs[1]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_list_variable_cannot_be_interpolated() {
        let (expander, _root) = network_expander().await;
        let text = NETWORK_AND_FS
            .replace("  region: us-central1\n", "  region: us-central1\n  zones: [a, b]\n")
            .replace("$(vars.deployment_name)-home", "$(vars.zones)-home");
        let err = expander
            .expand(parse(&text), DeploymentSettings::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ClusterkitError::Config(ConfigError::InvalidReference { ref message, .. }) if message.contains("cannot be interpolated")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_module_output_in_template_is_rejected() {
        let (expander, _root) = network_expander().await;
        let text = NETWORK_AND_FS.replace("$(vars.deployment_name)-home", "fs-$(network1.subnetwork)");
        let err = expander
            .expand(parse(&text), DeploymentSettings::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ClusterkitError::Config(ConfigError::InvalidReference { ref message, .. }) if message.contains("entire value")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_escaped_reference_survives_and_vars_are_substituted() {
        let (expander, _root) = network_expander().await;
        let text = NETWORK_AND_FS.replace(
            "$(vars.deployment_name)-home",
            r"'\$(vars.deployment_name)-$(vars.project_id)'",
        );
        let mat = expander
            .expand(parse(&text), DeploymentSettings::default())
            .await
            .unwrap();

        assert_eq!(
            setting(&mat, "homefs", "name").and_then(YamlValue::as_str),
            Some(r"\$(vars.deployment_name)-proj")
        );
        let yaml = mat.to_yaml().unwrap();
        for (idx, _) in yaml.match_indices("$(vars.") {
            assert!(yaml[..idx].ends_with('\\'), "unsubstituted variable in:\n{yaml}");
        }
        assert_eq!(mat.materialize().unwrap(), mat);
    }

    #[test]
    fn test_find_cycle_ignores_downstream_modules() {
        let deps = vec![
            (String::from("a"), BTreeSet::from([String::from("b")])),
            (String::from("b"), BTreeSet::from([String::from("a")])),
            (String::from("c"), BTreeSet::from([String::from("a")])),
            (String::from("d"), BTreeSet::new()),
        ];
        assert_eq!(find_cycle(&deps), Some(vec![String::from("a"), String::from("b")]));

        let acyclic = vec![
            (String::from("a"), BTreeSet::new()),
            (String::from("b"), BTreeSet::from([String::from("a")])),
        ];
        assert_eq!(find_cycle(&acyclic), None);
    }
}
