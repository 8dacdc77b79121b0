//! CLI module for the clusterkit tool.
//!
//! This module provides the command-line interface for expanding
//! blueprints and writing deployment directories.

mod commands;
mod output;

pub use commands::{BlueprintArgs, Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
