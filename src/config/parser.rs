//! Blueprint and deployment-settings loading.
//!
//! This module handles loading blueprints and deployment settings from YAML
//! files, and turning CLI `key=value` overrides into [`DeploymentSettings`].

use crate::error::{ClusterkitError, ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::blueprint::{Blueprint, DeploymentSettings, TerraformBackend, ValidationLevel, DEFAULT_BACKEND_TYPE};
use super::value::YamlValue;

/// Environment variable that may name the blueprint file.
pub const BLUEPRINT_ENV: &str = "CLUSTERKIT_BLUEPRINT";

/// Loader for blueprint and deployment-settings documents.
#[derive(Debug, Default)]
pub struct BlueprintParser {
    /// Base path for locating the `.env` file.
    base_path: Option<PathBuf>,
}

impl BlueprintParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the directory searched for a `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a blueprint from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Blueprint> {
        let path = path.as_ref();
        info!("Loading blueprint from: {}", path.display());
        let content = read_document(path)?;
        self.parse_yaml(&content, Some(path))
    }

    /// Decodes a blueprint from YAML text.
    ///
    /// # Errors
    ///
    /// Returns a decode error carrying the file and line/column when known.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Blueprint> {
        debug!("Parsing blueprint YAML");
        let blueprint: Blueprint = decode(content, source, "blueprint")?;
        debug!(
            "Parsed blueprint {} with {} deployment groups",
            blueprint.blueprint_name,
            blueprint.deployment_groups.len()
        );
        Ok(blueprint)
    }

    /// Loads deployment settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn load_settings_file(&self, path: impl AsRef<Path>) -> Result<DeploymentSettings> {
        let path = path.as_ref();
        info!("Loading deployment settings from: {}", path.display());
        let content = read_document(path)?;
        decode(&content, Some(path), "deployment settings")
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ClusterkitError::Config(ConfigError::decode(
                    format!("Failed to load .env file: {e}"),
                    Some(env_path.display().to_string()),
                ))
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn read_document(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    std::fs::read_to_string(path).map_err(|e| {
        ConfigError::decode(
            format!("Failed to read file: {e}"),
            Some(path.display().to_string()),
        )
        .into()
    })
}

fn decode<T: serde::de::DeserializeOwned>(
    content: &str,
    source: Option<&Path>,
    what: &str,
) -> Result<T> {
    serde_yaml::from_str(content).map_err(|e| {
        let file = source.map(|p| p.display().to_string());
        let location = match (file, e.location()) {
            (Some(file), Some(loc)) => Some(format!("{file}:{}:{}", loc.line(), loc.column())),
            (Some(file), None) => Some(file),
            (None, Some(loc)) => Some(format!("line {} column {}", loc.line(), loc.column())),
            (None, None) => None,
        };
        ClusterkitError::Config(ConfigError::decode(format!("invalid {what}: {e}"), location))
    })
}

fn split_pair(pair: &str) -> std::result::Result<(&str, &str), ConfigError> {
    pair.split_once('=').ok_or_else(|| ConfigError::InvalidOverride {
        pair: pair.to_string(),
    })
}

impl DeploymentSettings {
    /// Applies `name=value` variable overrides.
    ///
    /// Values are decoded as YAML literals, so `replicas=3` yields a number.
    ///
    /// # Errors
    ///
    /// Returns an error for a pair without `=` or an undecodable value.
    pub fn set_cli_variables(&mut self, pairs: &[String]) -> std::result::Result<(), ConfigError> {
        for pair in pairs {
            let (key, raw) = split_pair(pair)?;
            let value = YamlValue::parse_literal(raw).map_err(|_| ConfigError::InvalidOverrideValue {
                key: key.to_string(),
                value: raw.to_string(),
            })?;
            debug!("Overriding var {key} from command line");
            self.vars.insert(key, value);
        }
        Ok(())
    }

    /// Applies `key=value` backend overrides.
    ///
    /// Any override replaces the backend defaults wholesale. `type=` sets the
    /// backend type (default `gcs`); every other key becomes a string-valued
    /// configuration entry.
    ///
    /// # Errors
    ///
    /// Returns an error for a pair without `=`.
    pub fn set_backend_config(&mut self, pairs: &[String]) -> std::result::Result<(), ConfigError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut backend = TerraformBackend {
            backend_type: String::from(DEFAULT_BACKEND_TYPE),
            ..TerraformBackend::default()
        };
        for pair in pairs {
            match split_pair(pair)? {
                ("type", value) => backend.backend_type = value.to_string(),
                (key, value) => backend.configuration.insert(key, YamlValue::from(value)),
            }
        }
        self.terraform_backend_defaults = backend;
        Ok(())
    }

    /// Sets the validation level override from its name.
    ///
    /// # Errors
    ///
    /// Returns an error if the level is not `ERROR`, `WARNING` or `IGNORE`.
    pub fn set_validation_level(&mut self, level: &str) -> std::result::Result<(), ConfigError> {
        self.validation_level = Some(level.parse::<ValidationLevel>()?);
        Ok(())
    }

    /// Adds validators to the skip set.
    pub fn set_skip_validators(&mut self, names: &[String]) {
        self.skip_validators
            .extend(names.iter().filter(|n| !n.is_empty()).cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r"
blueprint_name: test
vars:
  deployment_name: test
deployment_groups:
  - group: primary
    modules: []
";

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_parse_minimal_blueprint() {
        let bp = BlueprintParser::new().parse_yaml(MINIMAL, None).unwrap();
        assert_eq!(bp.blueprint_name, "test");
        assert_eq!(bp.deployment_groups.len(), 1);
    }

    #[test]
    fn test_decode_error_names_file_and_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bp.yaml");
        std::fs::write(&path, "blueprint_name: x\ndeployment_groups:\n  - group: [\n").unwrap();

        let err = BlueprintParser::new().load_file(&path).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("bp.yaml:"), "{text}");
        assert!(matches!(err, ClusterkitError::Config(ConfigError::Decode { .. })));
    }

    #[test]
    fn test_missing_file() {
        let err = BlueprintParser::new()
            .load_file("/nonexistent/blueprint.yaml")
            .unwrap_err();
        assert!(matches!(err, ClusterkitError::Config(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_settings_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(
            &path,
            "vars:\n  project_id: p1\nterraform_backend_defaults:\n  type: gcs\n  configuration:\n    bucket: b\n",
        )
        .unwrap();

        let settings = BlueprintParser::new().load_settings_file(&path).unwrap();
        assert_eq!(settings.vars.get("project_id").and_then(YamlValue::as_str), Some("p1"));
        assert_eq!(settings.terraform_backend_defaults.backend_type, "gcs");
    }

    #[test]
    fn test_cli_variables_decode_literals() {
        let mut settings = DeploymentSettings::default();
        settings
            .set_cli_variables(&strings(&["replicas=3", "name=foo", "flag=true", "zones=[a,b]", "expr=x=y"]))
            .unwrap();

        assert_eq!(settings.vars.get("replicas").and_then(YamlValue::as_i64), Some(3));
        assert_eq!(settings.vars.get("name").and_then(YamlValue::as_str), Some("foo"));
        assert_eq!(settings.vars.get("flag").and_then(YamlValue::as_bool), Some(true));
        assert_eq!(settings.vars.get("zones").and_then(YamlValue::as_sequence).map(<[_]>::len), Some(2));
        assert_eq!(settings.vars.get("expr").and_then(YamlValue::as_str), Some("x=y"));
    }

    #[test]
    fn test_cli_variable_without_equals() {
        let mut settings = DeploymentSettings::default();
        let err = settings.set_cli_variables(&strings(&["foo"])).unwrap_err();
        assert!(matches!(&err, ConfigError::InvalidOverride { pair } if pair == "foo"));
        assert!(err.to_string().contains("'foo'"));
    }

    #[test]
    fn test_cli_variable_undecodable_value() {
        let mut settings = DeploymentSettings::default();
        let err = settings.set_cli_variables(&strings(&["list=[1,2"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverrideValue { .. }));
    }

    #[test]
    fn test_backend_config_defaults_type() {
        let mut settings = DeploymentSettings::default();
        settings
            .set_backend_config(&strings(&["bucket=state", "prefix=hpc"]))
            .unwrap();
        let backend = &settings.terraform_backend_defaults;
        assert_eq!(backend.backend_type, "gcs");
        assert_eq!(backend.configuration.get("bucket").and_then(YamlValue::as_str), Some("state"));

        settings.set_backend_config(&strings(&["type=s3"])).unwrap();
        assert_eq!(settings.terraform_backend_defaults.backend_type, "s3");
        assert!(settings.terraform_backend_defaults.configuration.is_empty());

        assert!(settings.set_backend_config(&strings(&["bucket"])).is_err());
    }

    #[test]
    fn test_backend_config_empty_is_noop() {
        let mut settings = DeploymentSettings::default();
        settings.set_backend_config(&[]).unwrap();
        assert!(settings.terraform_backend_defaults.is_empty());
    }

    #[test]
    fn test_validation_level_override() {
        let mut settings = DeploymentSettings::default();
        settings.set_validation_level("error").unwrap();
        assert_eq!(settings.validation_level, Some(ValidationLevel::Error));
        assert!(matches!(
            settings.set_validation_level("LOUD"),
            Err(ConfigError::InvalidValidationLevel { .. })
        ));
    }

    #[test]
    fn test_skip_validators() {
        let mut settings = DeploymentSettings::default();
        settings.set_skip_validators(&strings(&["a", "", "b", "a"]));
        assert_eq!(settings.skip_validators.len(), 2);
    }

    #[test]
    fn test_load_dotenv_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        BlueprintParser::new()
            .with_base_path(dir.path())
            .load_dotenv()
            .unwrap();
    }
}
