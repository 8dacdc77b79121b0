//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::BLUEPRINT_ENV;
use crate::pipeline::{CreateOptions, ExpandOptions};

/// Clusterkit - blueprint expansion and deployment directories for HPC clusters.
#[derive(Parser, Debug)]
#[command(name = "clusterkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Expand a blueprint and write the materialized result to a file.
    Expand {
        /// Blueprint and override flags.
        #[command(flatten)]
        blueprint: BlueprintArgs,

        /// Output file for the expanded blueprint.
        #[arg(short, long, default_value = "expanded.yaml")]
        out: PathBuf,
    },

    /// Expand a blueprint and write a deployment directory.
    Create {
        /// Blueprint and override flags.
        #[command(flatten)]
        blueprint: BlueprintArgs,

        /// Parent directory of the deployment directory.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Overwrite an existing, compatible deployment.
        #[arg(short = 'w', long)]
        overwrite_deployment: bool,

        /// Overwrite the deployment directory without any safety check.
        #[arg(long)]
        force: bool,
    },

    /// Print the toolkit version stamp.
    Version,
}

/// Flags shared by `expand` and `create`.
#[derive(Args, Debug, Clone)]
pub struct BlueprintArgs {
    /// Path to the blueprint file.
    #[arg(env = BLUEPRINT_ENV)]
    pub blueprint: PathBuf,

    /// Deployment-settings file with variable and backend overrides.
    #[arg(short, long)]
    pub deployment_file: Option<PathBuf>,

    /// Variable override (name=value, repeat the flag for several).
    ///
    /// Values may be list or map literals, so commas are never split.
    #[arg(long)]
    pub vars: Vec<String>,

    /// Backend configuration override (key=value, repeat the flag for several).
    #[arg(long)]
    pub backend_config: Vec<String>,

    /// Validation level: ERROR, WARNING or IGNORE [blueprint default: WARNING].
    #[arg(short = 'l', long)]
    pub validation_level: Option<String>,

    /// Validators to skip (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub skip_validators: Vec<String>,
}

impl From<BlueprintArgs> for ExpandOptions {
    fn from(args: BlueprintArgs) -> Self {
        Self {
            blueprint: args.blueprint,
            deployment_file: args.deployment_file,
            vars: args.vars,
            backend_config: args.backend_config,
            validation_level: args.validation_level,
            skip_validators: args.skip_validators,
        }
    }
}

impl Commands {
    /// Returns the `create` options, if this is the `create` command.
    #[must_use]
    pub fn create_options(&self) -> Option<CreateOptions> {
        match self {
            Self::Create {
                out,
                overwrite_deployment,
                force,
                ..
            } => Some(CreateOptions {
                out: out.clone(),
                overwrite: *overwrite_deployment,
                force: *force,
            }),
            _ => None,
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
