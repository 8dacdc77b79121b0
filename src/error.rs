//! Error types for the clusterkit blueprint engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! decoding and expanding blueprints, fetching module sources, running
//! validators and deciding whether a deployment may be overwritten.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for clusterkit.
#[derive(Debug, Error)]
pub enum ClusterkitError {
    /// Blueprint decoding and configuration errors.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Module source fetch errors.
    #[error("Failed to fetch module: {0}")]
    Fetch(#[from] FetchError),

    /// One or more validators failed.
    #[error("{0}")]
    Validation(#[from] ValidationFailures),

    /// The deployment safety gate refused an overwrite.
    #[error("{0}")]
    Overwrite(#[from] OverwriteRefused),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Blueprint decoding and configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The blueprint or settings file was not found.
    #[error("File not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Text could not be decoded into a blueprint, settings file or literal.
    #[error("{}", with_location(message, location.as_deref()))]
    Decode {
        /// Description of the decode error.
        message: String,
        /// File and line/column, when known.
        location: Option<String>,
    },

    /// A CLI `key=value` override was malformed.
    #[error("invalid format: '{pair}' should follow the 'name=value' format")]
    InvalidOverride {
        /// The offending pair as supplied.
        pair: String,
    },

    /// A CLI variable value could not be decoded.
    #[error("invalid input: unable to convert '{key}' value '{value}' to known type")]
    InvalidOverrideValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// The validation level is not one of the known levels.
    #[error("invalid validation level '{level}' (\"ERROR\", \"WARNING\", \"IGNORE\")")]
    InvalidValidationLevel {
        /// The rejected level.
        level: String,
    },

    /// Two entities share a name that must be unique.
    #[error("{path}: duplicate {resource_type} name '{name}'")]
    DuplicateName {
        /// Kind of entity (group, module).
        resource_type: String,
        /// The duplicated name.
        name: String,
        /// Blueprint path of the second occurrence.
        path: String,
    },

    /// A module setting is not a declared input of the module.
    #[error("{path}: module '{module}' has no input named '{setting}'")]
    UnknownSetting {
        /// Module id.
        module: String,
        /// Setting name.
        setting: String,
        /// Blueprint path of the setting.
        path: String,
    },

    /// A required module input was neither set nor defaulted.
    #[error("{path}: module '{module}' is missing required input '{input}'")]
    MissingRequiredInput {
        /// Module id.
        module: String,
        /// Input name.
        input: String,
        /// Blueprint path of the module.
        path: String,
    },

    /// A reference names a variable, module or output that does not exist.
    #[error("{path}: unresolved reference '{reference}': {reason}")]
    UnresolvedReference {
        /// The reference as written.
        reference: String,
        /// Why it could not be resolved.
        reason: String,
        /// Blueprint path holding the reference.
        path: String,
    },

    /// A reference points at a module of a later deployment group.
    #[error("{path}: module '{module}' references '{target}' from later group '{target_group}'")]
    ForwardReference {
        /// Referencing module id.
        module: String,
        /// Referenced module id.
        target: String,
        /// Group of the referenced module.
        target_group: String,
        /// Blueprint path holding the reference.
        path: String,
    },

    /// References form a cycle.
    #[error("reference cycle detected between: {}", cycle.join(" -> "))]
    ReferenceCycle {
        /// Members of the cycle, in order.
        cycle: Vec<String>,
    },

    /// A reference is used where it is not allowed.
    #[error("{path}: {message}")]
    InvalidReference {
        /// Description of the misuse.
        message: String,
        /// Blueprint path holding the reference.
        path: String,
    },

    /// A module lists an output its schema does not declare.
    #[error("{path}: module '{module}' does not declare output '{output}'")]
    UnknownOutput {
        /// Module id.
        module: String,
        /// Output name.
        output: String,
        /// Blueprint path of the output entry.
        path: String,
    },

    /// A deployment group mixes module kinds.
    #[error("{path}: group '{group}' mixes module kinds {first} and {second}")]
    KindMismatch {
        /// Group name.
        group: String,
        /// Kind of the first module.
        first: String,
        /// Conflicting kind.
        second: String,
        /// Blueprint path of the conflicting module.
        path: String,
    },

    /// A local path points into the embedded module tree.
    #[error(
        "{source_path}: using embedded modules with local paths is no longer supported; use the embedded path instead"
    )]
    EmbeddedLocalPath {
        /// The local source as written.
        source_path: String,
    },

    /// A required blueprint variable is missing or malformed.
    #[error("{path}: {message}")]
    InvalidVariable {
        /// Description of the problem.
        message: String,
        /// Blueprint path of the variable.
        path: String,
    },

    /// A module schema could not be read.
    #[error("failed to read module schema at {path}: {message}")]
    Schema {
        /// Module directory.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },
}

/// Module source fetch errors.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Filesystem error while preparing or reading a download.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An external command (e.g. `git`) failed.
    #[error("command `{command}` failed: {stderr}")]
    CommandFailed {
        /// The command line.
        command: String,
        /// Captured standard error.
        stderr: String,
    },

    /// S3 download error.
    #[error("S3 fetch error: {message}")]
    S3 {
        /// Description of the S3 error.
        message: String,
    },

    /// No fetcher understands the source address.
    #[error("unsupported module source: {address}")]
    UnsupportedSource {
        /// Package address.
        address: String,
    },

    /// A packer source used `//` below the repository root.
    #[error(
        "module source {source_addr} included \"//\" package syntax; the \"//\" should typically be placed at the root of the repository:\n{inner}"
    )]
    PackerSubdir {
        /// Full module source.
        source_addr: String,
        /// Original fetch failure.
        inner: Box<FetchError>,
    },
}

/// A single failed validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Name of the failing validator.
    pub validator: String,
    /// What went wrong.
    pub message: String,
    /// Suggested remediation, if any.
    pub hint: Option<String>,
}

/// Aggregate of every validator failure from one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailures {
    /// Individual failures in execution order.
    pub failures: Vec<ValidationFailure>,
}

/// Why the safety gate refused to overwrite a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefusalReason {
    /// The directory exists but is not a managed deployment.
    NotManaged,
    /// The marker directory exists but the expanded blueprint is missing.
    MissingArtifact,
    /// The previous expanded blueprint could not be loaded.
    InvalidArtifact,
    /// The previous deployment was created by a different version.
    VersionMismatch {
        /// Version recorded in the previous artifact.
        previous: String,
        /// Version of this run.
        current: String,
    },
    /// The deployment exists and overwrite was not requested.
    OverwriteNotRequested,
    /// A deployment group of the previous deployment is absent.
    GroupRemoved {
        /// The missing group.
        group: String,
    },
}

/// Refusal from the deployment safety gate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}\nHint: {hint}")]
pub struct OverwriteRefused {
    /// Machine-readable refusal kind.
    pub reason: RefusalReason,
    /// Human-readable description.
    pub message: String,
    /// Actionable next step.
    pub hint: String,
}

/// Result type alias for clusterkit operations.
pub type Result<T> = std::result::Result<T, ClusterkitError>;

fn with_location(message: &str, location: Option<&str>) -> String {
    location.map_or_else(|| message.to_string(), |loc| format!("{loc}: {message}"))
}

impl ClusterkitError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ConfigError {
    /// Creates a decode error with an optional location.
    #[must_use]
    pub fn decode(message: impl Into<String>, location: Option<String>) -> Self {
        Self::Decode {
            message: message.into(),
            location,
        }
    }

    /// Creates an unresolved-reference error.
    #[must_use]
    pub fn unresolved(
        reference: impl Into<String>,
        reason: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::UnresolvedReference {
            reference: reference.into(),
            reason: reason.into(),
            path: path.into(),
        }
    }
}

impl FetchError {
    /// Creates an IO fetch error with context.
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3 {
            message: message.into(),
        }
    }
}

impl ValidationFailure {
    /// Creates a failure for the named validator.
    #[must_use]
    pub fn new(validator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            message: message.into(),
            hint: None,
        }
    }

    /// Attaches a remediation hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validator \"{}\" failed: {}", self.validator, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\nHint: {hint}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ValidationFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailures {}

impl ValidationFailures {
    /// Returns the number of failures.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns true if there are no failures.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl OverwriteRefused {
    /// Hint attached to every refusal that `--force` can bypass.
    pub const FORCE_HINT: &'static str =
        "Use `--force` to overwrite the deployment anyway. Proceed at your own risk.";

    /// Creates a refusal that suggests `--force`.
    #[must_use]
    pub fn force(reason: RefusalReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            hint: String::from(Self::FORCE_HINT),
        }
    }
}
