//! Executable lookup.
//!
//! Windows needs the `.exe`, `.bat` or `.cmd` suffix spelled out when
//! spawning, so each candidate is tried in turn. Resolution happens once at
//! discovery time, never per run.

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use crate::error::SupervisorError;

#[cfg(windows)]
pub const EXECUTABLE_SUFFIXES: &[&str] = &["", ".exe", ".bat", ".cmd"];
#[cfg(not(windows))]
pub const EXECUTABLE_SUFFIXES: &[&str] = &[""];

/// Find a spawnable program called `name`.
///
/// Absolute or relative paths that exist are returned as is. Otherwise each
/// suffix candidate is looked up on `PATH`, and as a last resort probed by
/// actually spawning it.
pub fn resolve_executable(name: &str) -> Result<PathBuf, SupervisorError> {
    let path = Path::new(name);
    if path.components().count() > 1 && path.is_file() {
        return Ok(path.to_path_buf());
    }

    for suffix in EXECUTABLE_SUFFIXES {
        let candidate = format!("{name}{suffix}");
        if let Ok(found) = which::which(&candidate) {
            log::debug!("resolved `{name}` to {}", found.display());
            return Ok(found);
        }
        if is_spawnable(Path::new(&candidate)) {
            log::debug!("`{candidate}` is spawnable but not on PATH");
            return Ok(PathBuf::from(candidate));
        }
    }

    Err(SupervisorError::ExecutableNotFound(name.to_string()))
}

/// Resolve a project local wrapper script such as `gradlew`, preferring the
/// platform specific variant.
#[must_use]
pub fn project_wrapper(root: &Path, name: &str) -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(windows) {
        &[".bat", ".cmd", ""]
    } else {
        &[""]
    };
    candidates
        .iter()
        .map(|suffix| root.join(format!("{name}{suffix}")))
        .find(|candidate| candidate.is_file())
}

fn is_spawnable(program: &Path) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}
