//! Reference expressions embedded in blueprint values.
//!
//! A string value may point elsewhere instead of holding a literal:
//! `$(vars.name)` names a blueprint variable and `$(module_id.output)` names
//! an output of another module. A string that is exactly one reference is
//! replaced by the referenced value; variable references embedded in longer
//! text are interpolated. `\$(` escapes a literal `$(`.

use std::fmt;

/// Prefix that introduces a reference.
const OPEN: &str = "$(";

/// Namespace used for blueprint variables.
pub const VARS_NAMESPACE: &str = "vars";

/// A parsed reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    /// A blueprint variable.
    Var(String),
    /// An output of another module.
    ModuleOutput {
        /// Id of the producing module.
        module: String,
        /// Output name.
        output: String,
    },
}

/// One piece of a string value after scanning for references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, escapes preserved.
    Text(String),
    /// A reference.
    Ref(Reference),
}

/// Classification of a string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// No references at all.
    Literal,
    /// The whole string is a single reference.
    Whole(Reference),
    /// Text mixed with one or more references.
    Template(Vec<Segment>),
}

impl Reference {
    /// Creates a variable reference.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    /// Creates a module output reference.
    #[must_use]
    pub fn output(module: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ModuleOutput {
            module: module.into(),
            output: output.into(),
        }
    }

    /// Parses the inside of `$( ... )`.
    fn parse_inner(inner: &str) -> Result<Self, String> {
        let Some((head, tail)) = inner.split_once('.') else {
            return Err(format!(
                "reference '$({inner})' must have the form $(vars.name) or $(module_id.output)"
            ));
        };
        if !is_identifier(head) || !is_identifier(tail) {
            return Err(format!("reference '$({inner})' contains an invalid name"));
        }
        if head == VARS_NAMESPACE {
            Ok(Self::Var(tail.to_string()))
        } else {
            Ok(Self::output(head, tail))
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(name) => write!(f, "$({VARS_NAMESPACE}.{name})"),
            Self::ModuleOutput { module, output } => write!(f, "$({module}.{output})"),
        }
    }
}

/// Scans a string for references.
///
/// # Errors
///
/// Returns a description of the problem for an unterminated or malformed
/// reference.
pub fn parse(text: &str) -> Result<Parsed, String> {
    let segments = scan(text)?;
    let refs = segments.iter().filter(|s| matches!(s, Segment::Ref(_))).count();
    if refs == 0 {
        return Ok(Parsed::Literal);
    }
    if let [Segment::Ref(reference)] = segments.as_slice() {
        return Ok(Parsed::Whole(reference.clone()));
    }
    Ok(Parsed::Template(segments))
}

fn scan(text: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(idx) = rest.find(OPEN) {
        let escaped = rest[..idx].ends_with('\\');
        literal.push_str(&rest[..idx]);
        let after = &rest[idx + OPEN.len()..];
        if escaped {
            literal.push_str(OPEN);
            rest = after;
            continue;
        }
        let Some(close) = after.find(')') else {
            return Err(format!("unterminated reference in '{text}'"));
        };
        let reference = Reference::parse_inner(&after[..close])?;
        if !literal.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Ref(reference));
        rest = &after[close + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Text(literal));
    }
    Ok(segments)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
