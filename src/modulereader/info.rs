//! Module schema types.
//!
//! A [`ModuleInfo`] describes the contract of a module: its declared inputs,
//! its outputs and best-effort metadata.

use serde::{Deserialize, Serialize};

use super::metadata::Metadata;
use crate::config::YamlValue;

/// A declared module input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInfo {
    /// Input name.
    pub name: String,
    /// Declared type, as written in the module source.
    #[serde(rename = "type")]
    pub var_type: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Default value, when the module declares one.
    #[serde(default)]
    pub default: Option<YamlValue>,
    /// True when the input has no default.
    pub required: bool,
}

/// A declared module output.
///
/// Decodes from either a bare name or a map with the keys `name` (required),
/// `description` and `sensitive`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "serde_yaml::Value")]
pub struct OutputInfo {
    /// Output name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Whether the value is sensitive.
    #[serde(default, skip_serializing_if = "is_false")]
    pub sensitive: bool,
}

/// Everything the engine knows about a module.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Declared inputs in source order.
    pub inputs: Vec<VarInfo>,
    /// Declared outputs in source order.
    pub outputs: Vec<OutputInfo>,
    /// Best-effort metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

const OUTPUT_SHAPE: &str =
    "outputs must each be a string or a map{name: string, description: string, sensitive: bool}";

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

impl OutputInfo {
    /// Creates an output with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl TryFrom<serde_yaml::Value> for OutputInfo {
    type Error = String;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        let fields = match value {
            serde_yaml::Value::String(name) => return Ok(Self::named(name)),
            serde_yaml::Value::Mapping(fields) => fields,
            _ => return Err(String::from(OUTPUT_SHAPE)),
        };

        let mut out = Self::default();
        let mut has_name = false;
        for (key, value) in fields {
            let key = key
                .as_str()
                .ok_or_else(|| format!("{OUTPUT_SHAPE}; keys must be strings"))?
                .to_string();
            match key.as_str() {
                "name" => {
                    out.name = value
                        .as_str()
                        .ok_or_else(|| String::from("output name must be a string"))?
                        .to_string();
                    has_name = true;
                }
                "description" => {
                    out.description = value
                        .as_str()
                        .ok_or_else(|| String::from("output description must be a string"))?
                        .to_string();
                }
                "sensitive" => {
                    out.sensitive = value
                        .as_bool()
                        .ok_or_else(|| String::from("output sensitive must be a boolean"))?;
                }
                other => return Err(format!("provided invalid key: {other:?}")),
            }
        }
        if !has_name {
            return Err(String::from("missing required key: \"name\""));
        }
        Ok(out)
    }
}

impl ModuleInfo {
    /// Looks up a declared input by name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&VarInfo> {
        self.inputs.iter().find(|v| v.name == name)
    }

    /// Returns true if the module declares the named output.
    #[must_use]
    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Result<OutputInfo, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    #[test]
    fn test_output_shorthand_forms() {
        assert_eq!(decode("foo").unwrap(), OutputInfo::named("foo"));
        assert_eq!(decode("{ name: foo }").unwrap(), OutputInfo::named("foo"));

        let full = decode("{ name: foo, description: bar, sensitive: true }").unwrap();
        assert_eq!(
            full,
            OutputInfo {
                name: String::from("foo"),
                description: String::from("bar"),
                sensitive: true,
            }
        );
    }

    #[test]
    fn test_output_shorthand_rejects_bad_shapes() {
        assert!(decode("{ name: foo, description: bar, sensitive: true, extrakey: extraval }").is_err());
        assert!(decode("{ description: bar, sensitive: true }").is_err());
        assert!(decode("[ foo ]").is_err());
        assert!(decode("{ name: foo, description: bar, sensitive: contingent }").is_err());
    }

    #[test]
    fn test_output_serializes_compactly() {
        let text = serde_yaml::to_string(&OutputInfo::named("ip")).unwrap();
        assert_eq!(text.trim(), "name: ip");
    }

    #[test]
    fn test_module_info_lookups() {
        let info = ModuleInfo {
            inputs: vec![VarInfo {
                name: String::from("zone"),
                var_type: String::from("string"),
                description: String::new(),
                default: None,
                required: true,
            }],
            outputs: vec![OutputInfo::named("network_id")],
            metadata: Metadata::default(),
        };
        assert!(info.input("zone").is_some());
        assert!(info.input("region").is_none());
        assert!(info.has_output("network_id"));
    }
}
