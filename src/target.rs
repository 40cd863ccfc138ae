//! What a run executes.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{error::SupervisorError, workspace};

static SCENARIO_LOCATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<path>.+):(?P<line>\d+)$").expect("valid locator regex"));

/// A run target: every configured spec directory, one spec file, or one
/// scenario addressed as `path:line`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunTarget {
    #[default]
    All,
    Spec(PathBuf),
    Scenario { spec: PathBuf, line: u32 },
}

impl RunTarget {
    #[must_use]
    pub fn is_scenario(&self) -> bool {
        matches!(self, RunTarget::Scenario { .. })
    }

    #[must_use]
    pub fn spec_path(&self) -> Option<&Path> {
        match self {
            RunTarget::All => None,
            RunTarget::Spec(spec) | RunTarget::Scenario { spec, .. } => Some(spec),
        }
    }

    /// The positional form the tool expects, `None` for [`RunTarget::All`].
    #[must_use]
    pub fn locator(&self) -> Option<String> {
        match self {
            RunTarget::All => None,
            RunTarget::Spec(spec) => Some(spec.to_string_lossy().to_string()),
            RunTarget::Scenario { spec, line } => Some(format!("{}:{line}", spec.display())),
        }
    }

    /// Make a relative spec path absolute against `root` and check that the
    /// result lives under it.
    pub fn anchored_at(self, root: &Path) -> Result<Self, SupervisorError> {
        let anchor = |spec: PathBuf| -> Result<PathBuf, SupervisorError> {
            let absolute = workspace::resolve_path(root, &spec.to_string_lossy());
            if absolute.starts_with(root) {
                Ok(absolute)
            } else {
                Err(SupervisorError::TargetOutsideProject(absolute))
            }
        };
        Ok(match self {
            RunTarget::All => RunTarget::All,
            RunTarget::Spec(spec) => RunTarget::Spec(anchor(spec)?),
            RunTarget::Scenario { spec, line } => RunTarget::Scenario {
                spec: anchor(spec)?,
                line,
            },
        })
    }

    /// Human readable label shown while the run is in flight.
    #[must_use]
    pub fn status_label(&self) -> String {
        match self.locator() {
            None => "Running all specifications".to_string(),
            Some(locator) => format!("Running {locator}"),
        }
    }
}

impl FromStr for RunTarget {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(RunTarget::All);
        }
        if let Some(captures) = SCENARIO_LOCATOR.captures(s) {
            let line = captures["line"]
                .parse::<u32>()
                .map_err(|e| SupervisorError::InvalidTarget(format!("{s}: {e}")))?;
            return Ok(RunTarget::Scenario {
                spec: PathBuf::from(&captures["path"]),
                line,
            });
        }
        Ok(RunTarget::Spec(PathBuf::from(s)))
    }
}

impl fmt::Display for RunTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.locator() {
            Some(locator) => f.write_str(&locator),
            None => f.write_str("<all specs>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_locator() {
        let target: RunTarget = "specs/example.spec:12".parse().unwrap();
        assert_eq!(
            target,
            RunTarget::Scenario {
                spec: PathBuf::from("specs/example.spec"),
                line: 12
            }
        );
        assert!(target.is_scenario());
        assert_eq!(target.locator().as_deref(), Some("specs/example.spec:12"));
    }

    #[test]
    fn parses_spec_and_all() {
        assert_eq!(
            "specs/example.spec".parse::<RunTarget>().unwrap(),
            RunTarget::Spec(PathBuf::from("specs/example.spec"))
        );
        assert_eq!("  ".parse::<RunTarget>().unwrap(), RunTarget::All);
    }

    #[test]
    fn windows_drive_letter_is_not_a_locator() {
        let target: RunTarget = r"C:\project\specs\a.spec".parse().unwrap();
        assert!(!target.is_scenario());
    }

    #[test]
    fn anchors_relative_paths_under_root() {
        let root = Path::new("/work/project");
        let target = RunTarget::Scenario {
            spec: PathBuf::from("specs/a.spec"),
            line: 4,
        }
        .anchored_at(root)
        .unwrap();
        assert_eq!(target.locator().as_deref(), Some("/work/project/specs/a.spec:4"));
    }

    #[test]
    fn rejects_targets_outside_root() {
        let root = Path::new("/work/project");
        let result = RunTarget::Spec(PathBuf::from("../other/a.spec")).anchored_at(root);
        assert!(matches!(
            result,
            Err(SupervisorError::TargetOutsideProject(path)) if path == Path::new("/work/other/a.spec")
        ));
    }

    #[test]
    fn status_label_names_the_target() {
        assert_eq!(RunTarget::All.status_label(), "Running all specifications");
        assert_eq!(
            RunTarget::Spec(PathBuf::from("a.spec")).status_label(),
            "Running a.spec"
        );
    }
}
