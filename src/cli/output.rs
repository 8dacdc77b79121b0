//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use std::path::Path;
use tabled::{Table, Tabled};

use crate::config::BlueprintHasher;
use crate::error::{ClusterkitError, ValidationFailures};
use crate::pipeline::{Created, Expansion};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Validator failure row for table display.
#[derive(Tabled)]
struct FailureRow {
    #[tabled(rename = "Validator")]
    validator: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Hint")]
    hint: String,
}

/// Deployment group row for table display.
#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Modules")]
    modules: usize,
    #[tabled(rename = "Backend")]
    backend: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the result of `expand`.
    #[must_use]
    pub fn format_expansion(&self, expansion: &Expansion, out: &Path) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ExpansionJson::new(expansion, Some(out))),
            OutputFormat::Text => {
                let mut output = Self::format_expansion_text(expansion);
                let _ = writeln!(
                    output,
                    "\n{} Expanded blueprint written to {}",
                    "✓".green(),
                    out.display()
                );
                output
            }
        }
    }

    /// Formats the result of `create`.
    #[must_use]
    pub fn format_created(&self, created: &Created) -> String {
        match self.format {
            OutputFormat::Json => to_json(&CreatedJson::from(created)),
            OutputFormat::Text => {
                let mut output = Self::format_expansion_text(&created.expansion);
                let _ = writeln!(
                    output,
                    "\n{} Deployment written to {}",
                    "✓".green(),
                    created.deployment_dir.display()
                );
                if created.unchanged {
                    let _ = writeln!(output, "   Blueprint unchanged since the last run.");
                }
                let _ = writeln!(
                    output,
                    "   Follow the instructions in {}",
                    created.instructions.display()
                );
                output
            }
        }
    }

    /// Formats a failed run.
    #[must_use]
    pub fn format_error(&self, error: &ClusterkitError) -> String {
        match self.format {
            OutputFormat::Json => {
                let mut json = serde_json::json!({
                    "status": "error",
                    "message": error.to_string(),
                });
                if let ClusterkitError::Validation(failures) = error {
                    json["failures"] = serde_json::json!(failures_json(failures));
                }
                to_json(&json)
            }
            OutputFormat::Text => match error {
                ClusterkitError::Validation(failures) => format!(
                    "{} Validation failed:\n{}",
                    "✗".red(),
                    Self::failure_table(failures)
                ),
                ClusterkitError::Overwrite(refusal) => format!(
                    "{} {}\n{} {}\n",
                    "✗".red(),
                    refusal.message,
                    "Hint:".yellow(),
                    refusal.hint
                ),
                other => format!("{} {other}\n", "✗".red()),
            },
        }
    }

    /// Formats the toolkit version.
    #[must_use]
    pub fn format_version(&self, version: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "version": version })),
            OutputFormat::Text => format!("clusterkit {version}\n"),
        }
    }

    fn format_expansion_text(expansion: &Expansion) -> String {
        let bp = expansion.blueprint.blueprint();
        let mut output = String::new();

        let _ = write!(
            output,
            "\nBlueprint: {} ({})\n   Deployment: {}\n   Validation level: {}\n\n",
            bp.blueprint_name,
            expansion.blueprint.toolkit_version(),
            bp.deployment_name().unwrap_or_default(),
            bp.validation_level
        );

        let rows: Vec<GroupRow> = bp
            .deployment_groups
            .iter()
            .map(|g| GroupRow {
                group: g.group.clone(),
                modules: g.modules.len(),
                backend: g
                    .terraform_backend
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |b| b.backend_type.clone()),
            })
            .collect();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if let Some(warnings) = &expansion.warnings {
            let _ = write!(
                output,
                "\n{} {} validator(s) failed:\n{}",
                "⚠".yellow(),
                warnings.len(),
                Self::failure_table(warnings)
            );
        }
        output
    }

    fn failure_table(failures: &ValidationFailures) -> String {
        let rows: Vec<FailureRow> = failures
            .failures
            .iter()
            .map(|f| FailureRow {
                validator: f.validator.clone(),
                message: f.message.clone(),
                hint: f.hint.clone().unwrap_or_default(),
            })
            .collect();
        let mut table = Table::new(rows).to_string();
        table.push('\n');
        table
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct FailureJson {
    validator: String,
    message: String,
    hint: Option<String>,
}

fn failures_json(failures: &ValidationFailures) -> Vec<FailureJson> {
    failures
        .failures
        .iter()
        .map(|f| FailureJson {
            validator: f.validator.clone(),
            message: f.message.clone(),
            hint: f.hint.clone(),
        })
        .collect()
}

#[derive(serde::Serialize)]
struct ExpansionJson {
    blueprint_name: String,
    deployment_name: Option<String>,
    toolkit_version: String,
    blueprint_hash: Option<String>,
    groups: Vec<String>,
    warnings: Vec<FailureJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    out: Option<String>,
}

impl ExpansionJson {
    fn new(expansion: &Expansion, out: Option<&Path>) -> Self {
        let bp = expansion.blueprint.blueprint();
        Self {
            blueprint_name: bp.blueprint_name.clone(),
            deployment_name: bp.deployment_name().map(String::from),
            toolkit_version: expansion.blueprint.toolkit_version().to_string(),
            blueprint_hash: BlueprintHasher::new().hash_blueprint(bp).ok(),
            groups: bp.group_names().into_iter().map(String::from).collect(),
            warnings: expansion
                .warnings
                .as_ref()
                .map(failures_json)
                .unwrap_or_default(),
            out: out.map(|p| p.display().to_string()),
        }
    }
}

#[derive(serde::Serialize)]
struct CreatedJson {
    #[serde(flatten)]
    expansion: ExpansionJson,
    deployment_dir: String,
    instructions: String,
    unchanged: bool,
}

impl From<&Created> for CreatedJson {
    fn from(created: &Created) -> Self {
        Self {
            expansion: ExpansionJson::new(&created.expansion, None),
            deployment_dir: created.deployment_dir.display().to_string(),
            instructions: created.instructions.display().to_string(),
            unchanged: created.unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaterializedBlueprint;
    use crate::error::{OverwriteRefused, RefusalReason, ValidationFailure};

    fn expansion(warnings: Option<ValidationFailures>) -> Expansion {
        Expansion {
            blueprint: MaterializedBlueprint::from_yaml(
                "blueprint_name: hpc\ntoolkit_version: v1\nvars: {deployment_name: golden}\ndeployment_groups:\n  - group: primary\n    modules: []\n",
                None,
            )
            .unwrap(),
            warnings,
        }
    }

    fn failures() -> ValidationFailures {
        ValidationFailures {
            failures: vec![ValidationFailure::new("test_source_pinned", "not pinned").with_hint("pin it")],
        }
    }

    #[test]
    fn test_expansion_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let text = formatter.format_expansion(&expansion(Some(failures())), Path::new("out.yaml"));
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(json["deployment_name"], "golden");
        assert_eq!(json["groups"][0], "primary");
        assert_eq!(json["warnings"][0]["validator"], "test_source_pinned");
        assert_eq!(json["out"], "out.yaml");
    }

    #[test]
    fn test_expansion_text_lists_warnings() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let text = formatter.format_expansion(&expansion(Some(failures())), Path::new("out.yaml"));
        assert!(text.contains("primary"));
        assert!(text.contains("not pinned"));
        assert!(text.contains("out.yaml"));
    }

    #[test]
    fn test_refusal_shows_hint() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let error = ClusterkitError::Overwrite(OverwriteRefused::force(
            RefusalReason::NotManaged,
            "not a deployment",
        ));
        let text = formatter.format_error(&error);
        assert!(text.contains("not a deployment"));
        assert!(text.contains("--force"));
    }

    #[test]
    fn test_validation_error_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let text = formatter.format_error(&ClusterkitError::Validation(failures()));
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["failures"][0]["hint"], "pin it");
    }
}
