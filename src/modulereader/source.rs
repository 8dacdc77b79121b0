//! Module source locators.
//!
//! A source is one of:
//! - an embedded path (`modules/...` or `community/modules/...`), resolved
//!   against the installation's module tree;
//! - a local filesystem path (`./`, `../` or absolute);
//! - a remote package address, optionally followed by `//subdir`.

/// Where a module source lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Shipped with the tool.
    Embedded,
    /// On the local filesystem.
    Local,
    /// Must be fetched.
    Remote,
}

const EMBEDDED_PREFIXES: &[&str] = &["modules/", "community/modules/"];
const LOCAL_PREFIXES: &[&str] = &["./", "../", "/"];

/// Returns true for sources that name an embedded module.
#[must_use]
pub fn is_embedded_path(source: &str) -> bool {
    EMBEDDED_PREFIXES.iter().any(|p| source.starts_with(p))
}

/// Returns true for sources that name a local directory.
#[must_use]
pub fn is_local_path(source: &str) -> bool {
    LOCAL_PREFIXES.iter().any(|p| source.starts_with(p))
}

/// Classifies a source locator.
#[must_use]
pub fn classify(source: &str) -> SourceKind {
    if is_embedded_path(source) {
        SourceKind::Embedded
    } else if is_local_path(source) {
        SourceKind::Local
    } else {
        SourceKind::Remote
    }
}

/// Splits a remote source into its package address and subdirectory.
///
/// `github.com/org/repo//modules/vpc?ref=v1` becomes
/// (`github.com/org/repo?ref=v1`, `modules/vpc`). A `://` scheme separator is
/// never mistaken for the subdirectory marker, and query parameters stay on
/// the package address.
#[must_use]
pub fn split_package(source: &str) -> (String, String) {
    let stop = source.find('?').unwrap_or(source.len());
    let offset = source[..stop].find("://").map_or(0, |idx| idx + 3);

    let Some(rel) = source[offset..stop].find("//") else {
        return (source.to_string(), String::new());
    };
    let idx = offset + rel;

    let mut package = source[..idx].to_string();
    let mut subdir = source[idx + 2..].to_string();
    if let Some(q) = subdir.find('?') {
        package.push_str(&subdir[q..]);
        subdir.truncate(q);
    }
    (package, subdir)
}
