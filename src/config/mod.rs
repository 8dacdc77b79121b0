//! Blueprint configuration and expansion.
//!
//! This module handles everything between blueprint text and a materialized
//! blueprint:
//! - The value model (`OrderedMap`, `YamlValue`)
//! - The blueprint data model and deployment-time overrides
//! - Reference expressions and their resolution
//! - Expansion into a `MaterializedBlueprint`
//! - Blueprint fingerprints for change detection

mod blueprint;
mod expand;
pub mod expression;
mod hash;
mod parser;
mod value;

pub use blueprint::{
    toolkit_version, Blueprint, DeploymentGroup, DeploymentSettings, Module, ModuleKind,
    TerraformBackend, ValidationLevel, ValidatorConfig, DEFAULT_BACKEND_TYPE, DEPLOYMENT_NAME_VAR,
};
pub use expand::{Expander, MaterializedBlueprint, Usage};
pub use hash::BlueprintHasher;
pub use parser::{BlueprintParser, BLUEPRINT_ENV};
pub use value::{OrderedMap, ValueShapeError, YamlValue};
