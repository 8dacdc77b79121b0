// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Clusterkit
//!
//! Blueprint expansion, validation and deployment-safety engine for HPC
//! cluster deployments.
//!
//! ## Overview
//!
//! A blueprint declares variables and ordered deployment groups of modules
//! (Terraform or Packer). Clusterkit:
//!
//! - Merges deployment-time overrides (settings file, `--vars`, `--backend-config`)
//! - Resolves every module's input/output schema, fetching remote sources once
//! - Wires module outputs and variables into module settings and checks references
//! - Runs named validators with a configurable severity
//! - Refuses to overwrite a previous deployment unless it is safe to do so
//!
//! ## Modules
//!
//! - [`config`]: Blueprint data model, parsing and expansion
//! - [`modulereader`]: Module schema resolution and source fetching
//! - [`validators`]: Validation framework and built-in validators
//! - [`deployment`]: Overwrite safety gate and deployment artifacts
//! - [`pipeline`]: The `expand` and `create` flows
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! blueprint_name: hpc-small
//!
//! vars:
//!   deployment_name: hpc-small
//!   project_id: my-project
//!   region: us-central1
//!   zone: us-central1-a
//!
//! deployment_groups:
//!   - group: primary
//!     modules:
//!       - id: network
//!         source: modules/network/vpc
//!       - id: cluster
//!         source: github.com/org/modules//cluster?ref=v1.2.0
//!         use: [network]
//!         settings:
//!           machine_type: c2-standard-60
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deployment;
pub mod error;
pub mod modulereader;
pub mod pipeline;
pub mod validators;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{Blueprint, BlueprintParser, Expander, MaterializedBlueprint};
pub use deployment::{check_overwrite_allowed, ArtifactWriter, DeploymentWriter};
pub use error::{ClusterkitError, Result};
pub use modulereader::{ModuleInfo, ModuleResolver};
pub use pipeline::{CreateOptions, ExpandOptions, Pipeline};
pub use validators::{Validator, ValidatorRegistry};
