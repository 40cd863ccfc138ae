//! Project root discovery utilities.

use std::path::{Path, PathBuf};

/// Marker file written by the tool at the root of every project.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Walk up from `path` until a directory containing one of `marker_files` is
/// found.
pub fn find_root(path: &Path, marker_files: &[&str]) -> Option<PathBuf> {
    let mut current = if path.is_dir() {
        Some(path)
    } else {
        path.parent()
    };
    while let Some(dir) = current {
        if marker_files
            .iter()
            .any(|file_name| dir.join(file_name).exists())
        {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

/// Resolve a relative path against a base directory, handling ../ and ./
/// components.
pub fn resolve_path(base_dir: &Path, relative_path: &str) -> PathBuf {
    let absolute = if Path::new(relative_path).is_absolute() {
        PathBuf::from(relative_path)
    } else {
        base_dir.join(relative_path)
    };

    let mut components = Vec::new();
    for component in absolute.components() {
        match component {
            std::path::Component::ParentDir => {
                components.pop();
            }
            std::path::Component::Normal(_)
            | std::path::Component::RootDir
            | std::path::Component::Prefix(_) => {
                components.push(component);
            }
            std::path::Component::CurDir => {}
        }
    }

    PathBuf::from_iter(components)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_resolve_path() {
        let base_dir = PathBuf::from("/Users/test/projects");

        assert_eq!(
            resolve_path(&base_dir, "specs/login.spec"),
            PathBuf::from("/Users/test/projects/specs/login.spec")
        );

        assert_eq!(
            resolve_path(&base_dir, "./specs/login.spec"),
            PathBuf::from("/Users/test/projects/specs/login.spec")
        );

        assert_eq!(
            resolve_path(&base_dir, "../other/project"),
            PathBuf::from("/Users/test/other/project")
        );

        assert_eq!(
            resolve_path(&base_dir, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn finds_the_nearest_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        fs::create_dir_all(project.join("specs/nested")).unwrap();
        fs::write(project.join(MANIFEST_FILE), "{}").unwrap();
        let spec = project.join("specs/nested/login.spec");
        fs::write(&spec, "# Login").unwrap();

        assert_eq!(find_root(&spec, &[MANIFEST_FILE]), Some(project.clone()));
        assert_eq!(find_root(dir.path(), &[MANIFEST_FILE]), None);
    }
}
