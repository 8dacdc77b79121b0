//! Kind-specific module schema readers.
//!
//! Both Terraform and Packer describe their inputs as HCL `variable` blocks;
//! Terraform additionally declares `output` blocks. The readers scan every
//! matching file in a module directory, in file-name order.

use hcl::{Block, Body, Expression, ObjectKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::info::{ModuleInfo, OutputInfo, VarInfo};
use crate::config::{ModuleKind, OrderedMap, YamlValue};
use crate::error::{ClusterkitError, ConfigError, Result};

/// Extracts a [`ModuleInfo`] from a module directory.
#[cfg_attr(test, mockall::automock)]
pub trait ModReader: Send + Sync {
    /// Reads the schema of the module at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or parsed.
    fn get_info(&self, path: &Path) -> Result<ModuleInfo>;
}

/// Reader for Terraform modules (`*.tf`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TerraformReader;

/// Reader for Packer templates (`*.pkr.hcl`).
#[derive(Debug, Default, Clone, Copy)]
pub struct PackerReader;

/// One reader per module kind.
#[derive(Clone)]
pub struct ReaderRegistry {
    terraform: Arc<dyn ModReader>,
    packer: Arc<dyn ModReader>,
}

impl ModReader for TerraformReader {
    fn get_info(&self, path: &Path) -> Result<ModuleInfo> {
        read_hcl_module(path, ".tf", true)
    }
}

impl ModReader for PackerReader {
    fn get_info(&self, path: &Path) -> Result<ModuleInfo> {
        read_hcl_module(path, ".pkr.hcl", false)
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::new(Arc::new(TerraformReader), Arc::new(PackerReader))
    }
}

impl std::fmt::Debug for ReaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderRegistry").finish_non_exhaustive()
    }
}

impl ReaderRegistry {
    /// Creates a registry from explicit readers.
    #[must_use]
    pub fn new(terraform: Arc<dyn ModReader>, packer: Arc<dyn ModReader>) -> Self {
        Self { terraform, packer }
    }

    /// Returns the reader for a kind.
    #[must_use]
    pub fn get(&self, kind: ModuleKind) -> Arc<dyn ModReader> {
        match kind {
            ModuleKind::Terraform => Arc::clone(&self.terraform),
            ModuleKind::Packer => Arc::clone(&self.packer),
        }
    }
}

fn schema_error(path: &Path, message: impl Into<String>) -> ClusterkitError {
    ClusterkitError::Config(ConfigError::Schema {
        path: path.to_path_buf(),
        message: message.into(),
    })
}

fn module_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| schema_error(dir, format!("cannot list directory: {e}")))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(suffix))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn read_hcl_module(dir: &Path, suffix: &str, with_outputs: bool) -> Result<ModuleInfo> {
    let files = module_files(dir, suffix)?;
    if files.is_empty() {
        return Err(schema_error(dir, format!("no {suffix} files found")));
    }

    let mut info = ModuleInfo::default();
    for file in &files {
        debug!("Reading module schema from {}", file.display());
        let content = std::fs::read_to_string(file)
            .map_err(|e| schema_error(file, format!("cannot read file: {e}")))?;
        let body: Body =
            hcl::parse(&content).map_err(|e| schema_error(file, format!("invalid HCL: {e}")))?;

        for block in body.blocks() {
            match block.identifier() {
                "variable" => info.inputs.push(variable_info(block, file)?),
                "output" if with_outputs => info.outputs.push(output_info(block, file)?),
                _ => {}
            }
        }
    }
    Ok(info)
}

fn block_name<'a>(block: &'a Block, file: &Path) -> Result<&'a str> {
    block
        .labels()
        .first()
        .map(hcl::BlockLabel::as_str)
        .ok_or_else(|| schema_error(file, format!("{} block without a name", block.identifier())))
}

fn variable_info(block: &Block, file: &Path) -> Result<VarInfo> {
    let mut var = VarInfo {
        name: block_name(block, file)?.to_string(),
        var_type: String::from("any"),
        description: String::new(),
        default: None,
        required: true,
    };

    for attr in block.body().attributes() {
        match attr.key() {
            "type" => var.var_type = attr.expr().to_string(),
            "description" => var.description = expression_text(attr.expr()),
            "default" => {
                var.default = Some(expression_value(attr.expr()));
                var.required = false;
            }
            _ => {}
        }
    }
    Ok(var)
}

fn output_info(block: &Block, file: &Path) -> Result<OutputInfo> {
    let mut output = OutputInfo::named(block_name(block, file)?);
    for attr in block.body().attributes() {
        match (attr.key(), attr.expr()) {
            ("description", expr) => output.description = expression_text(expr),
            ("sensitive", Expression::Bool(b)) => output.sensitive = *b,
            _ => {}
        }
    }
    Ok(output)
}

fn expression_text(expr: &Expression) -> String {
    match expr {
        Expression::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Converts a literal HCL expression into a value; anything that is not a
/// literal keeps its source text.
fn expression_value(expr: &Expression) -> YamlValue {
    match expr {
        Expression::Null => YamlValue::Null,
        Expression::Bool(b) => YamlValue::Bool(*b),
        Expression::Number(n) => n.as_i64().map_or_else(
            || YamlValue::Number(n.as_f64().unwrap_or_default().into()),
            YamlValue::from,
        ),
        Expression::String(s) => YamlValue::String(s.clone()),
        Expression::Array(items) => YamlValue::Sequence(items.iter().map(expression_value).collect()),
        Expression::Object(object) => {
            let mut map = OrderedMap::new();
            for (key, value) in object {
                let key = match key {
                    ObjectKey::Identifier(ident) => ident.to_string(),
                    ObjectKey::Expression(expr) => expression_text(expr),
                    #[allow(unreachable_patterns)]
                    _ => continue,
                };
                map.insert(key, expression_value(value));
            }
            YamlValue::Mapping(map)
        }
        other => YamlValue::String(other.to_string()),
    }
}
