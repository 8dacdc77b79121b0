//! The overwrite safety gate.

use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use super::{expanded_blueprint_path, marker_dir};
use crate::config::MaterializedBlueprint;
use crate::error::{OverwriteRefused, RefusalReason};

/// Decides whether `new` may be written over the deployment in `dir`.
///
/// The decision only reads `dir`; nothing is created or modified.
///
/// # Errors
///
/// Returns the refusal, with a remediation hint, when the overwrite is not
/// allowed.
pub fn check_overwrite_allowed(
    dir: &Path,
    new: &MaterializedBlueprint,
    overwrite: bool,
    force: bool,
) -> Result<(), OverwriteRefused> {
    if !dir.exists() || force {
        debug!("Overwrite of {} allowed (exists: {}, force: {force})", dir.display(), dir.exists());
        return Ok(());
    }

    if !marker_dir(dir).is_dir() {
        return Err(OverwriteRefused::force(
            RefusalReason::NotManaged,
            format!(
                "while trying to update the deployment directory at {}, the folder was found to exist but was not created by this toolkit",
                dir.display()
            ),
        ));
    }

    let artifact = expanded_blueprint_path(dir);
    if !artifact.is_file() {
        return Err(OverwriteRefused {
            reason: RefusalReason::MissingArtifact,
            message: format!(
                "the deployment directory at {} has no expanded blueprint at {}",
                dir.display(),
                artifact.display()
            ),
            hint: format!(
                "This may be caused by a version mismatch between the toolkit that created the deployment and this one. {}",
                OverwriteRefused::FORCE_HINT
            ),
        });
    }

    let previous = std::fs::read_to_string(&artifact)
        .map_err(|e| e.to_string())
        .and_then(|text| {
            MaterializedBlueprint::from_yaml(&text, Some(&artifact)).map_err(|e| e.to_string())
        })
        .map_err(|e| {
            OverwriteRefused::force(
                RefusalReason::InvalidArtifact,
                format!("failed to load the previous expanded blueprint: {e}"),
            )
        })?;

    if previous.toolkit_version() != new.toolkit_version() {
        return Err(OverwriteRefused::force(
            RefusalReason::VersionMismatch {
                previous: previous.toolkit_version().to_string(),
                current: new.toolkit_version().to_string(),
            },
            format!(
                "the deployment at {} was created with toolkit {} but this is {}; mixing versions against a live deployment is not supported",
                dir.display(),
                display_version(previous.toolkit_version()),
                display_version(new.toolkit_version())
            ),
        ));
    }

    if !overwrite {
        return Err(OverwriteRefused {
            reason: RefusalReason::OverwriteNotRequested,
            message: format!("the deployment directory {} already exists", dir.display()),
            hint: String::from(
                "Use `-w/--overwrite-deployment` to overwrite the existing deployment.",
            ),
        });
    }

    let current: HashSet<&str> = new.blueprint().group_names().into_iter().collect();
    if let Some(group) = previous
        .blueprint()
        .group_names()
        .into_iter()
        .find(|g| !current.contains(g))
    {
        return Err(OverwriteRefused::force(
            RefusalReason::GroupRemoved {
                group: group.to_string(),
            },
            format!("removing deployment group {group} from an existing deployment is not supported"),
        ));
    }

    debug!("Overwrite of {} allowed", dir.display());
    Ok(())
}

fn display_version(version: &str) -> &str {
    if version.is_empty() { "<unknown>" } else { version }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::artifacts_dir;
    use tempfile::TempDir;

    fn blueprint(version: &str, groups: &[&str]) -> MaterializedBlueprint {
        let mut text = format!(
            "blueprint_name: t\ntoolkit_version: {version}\nvars: {{deployment_name: d}}\ndeployment_groups:\n"
        );
        for group in groups {
            text.push_str(&format!("  - group: {group}\n    modules: []\n"));
        }
        MaterializedBlueprint::from_yaml(&text, None).unwrap()
    }

    fn deployment(previous: Option<&MaterializedBlueprint>) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(artifacts_dir(dir.path())).unwrap();
        if let Some(previous) = previous {
            std::fs::write(expanded_blueprint_path(dir.path()), previous.to_yaml().unwrap())
                .unwrap();
        }
        dir
    }

    fn reason(result: Result<(), OverwriteRefused>) -> RefusalReason {
        result.unwrap_err().reason
    }

    #[test]
    fn test_absent_directory_allows() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("missing");
        let new = blueprint("v1", &["a"]);

        assert!(check_overwrite_allowed(&dir, &new, false, false).is_ok());
        assert!(check_overwrite_allowed(&dir, &new, false, true).is_ok());
        assert!(!dir.exists());
    }

    #[test]
    fn test_unmanaged_directory_refuses() {
        let tmp = TempDir::new().unwrap();
        let refusal =
            check_overwrite_allowed(tmp.path(), &blueprint("v1", &["a"]), true, false).unwrap_err();
        assert_eq!(refusal.reason, RefusalReason::NotManaged);
        assert!(refusal.hint.contains("--force"));
    }

    #[test]
    fn test_missing_artifact_refuses() {
        let dir = deployment(None);
        let refusal =
            check_overwrite_allowed(dir.path(), &blueprint("v1", &["a"]), true, false).unwrap_err();
        assert_eq!(refusal.reason, RefusalReason::MissingArtifact);
        assert!(refusal.hint.contains("version mismatch"));
        assert!(refusal.hint.contains("--force"));
    }

    #[test]
    fn test_unreadable_artifact_refuses() {
        let dir = deployment(None);
        std::fs::write(expanded_blueprint_path(dir.path()), "deployment_groups: [[").unwrap();
        assert_eq!(
            reason(check_overwrite_allowed(dir.path(), &blueprint("v1", &["a"]), true, false)),
            RefusalReason::InvalidArtifact
        );
    }

    #[test]
    fn test_version_mismatch_refuses() {
        let dir = deployment(Some(&blueprint("v1", &["a"])));
        assert_eq!(
            reason(check_overwrite_allowed(dir.path(), &blueprint("v2", &["a"]), true, false)),
            RefusalReason::VersionMismatch {
                previous: String::from("v1"),
                current: String::from("v2"),
            }
        );
    }

    #[test]
    fn test_overwrite_flag_required() {
        let dir = deployment(Some(&blueprint("v1", &["a"])));
        let refusal =
            check_overwrite_allowed(dir.path(), &blueprint("v1", &["a"]), false, false).unwrap_err();
        assert_eq!(refusal.reason, RefusalReason::OverwriteNotRequested);
        assert!(refusal.hint.contains("--overwrite-deployment"));
    }

    #[test]
    fn test_removed_group_refuses() {
        let dir = deployment(Some(&blueprint("v1", &["a", "x"])));
        let refusal =
            check_overwrite_allowed(dir.path(), &blueprint("v1", &["a"]), true, false).unwrap_err();
        assert_eq!(
            refusal.reason,
            RefusalReason::GroupRemoved {
                group: String::from("x")
            }
        );
        assert!(refusal.message.contains('x'));
    }

    #[test]
    fn test_compatible_overwrite_allows() {
        let dir = deployment(Some(&blueprint("v1", &["a"])));
        assert!(check_overwrite_allowed(dir.path(), &blueprint("v1", &["a", "b"]), true, false).is_ok());
    }

    #[test]
    fn test_force_bypasses_every_check() {
        let unmanaged = TempDir::new().unwrap();
        let new = blueprint("v2", &["a"]);
        assert!(check_overwrite_allowed(unmanaged.path(), &new, false, true).is_ok());

        let old = deployment(Some(&blueprint("v1", &["a", "x"])));
        assert!(check_overwrite_allowed(old.path(), &new, false, true).is_ok());
    }

    #[test]
    fn test_gate_does_not_touch_directory() {
        let tmp = TempDir::new().unwrap();
        let _ = check_overwrite_allowed(tmp.path(), &blueprint("v1", &["a"]), true, false);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
