//! Build-tool backends a project can run through.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{error::SupervisorError, resolve, workspace::MANIFEST_FILE};

/// Environment variable the tool's java runner reads an extra classpath from.
pub const CLASSPATH_ENV: &str = "gauge_custom_classpath";

const MAVEN_MARKERS: &[&str] = &["pom.xml"];
const GRADLE_MARKERS: &[&str] = &["build.gradle", "build.gradle.kts"];

/// Runtime language a project's steps are implemented in, as declared in
/// its manifest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Js,
    Ts,
    Python,
    Java,
    Csharp,
}

/// The subset of `manifest.json` this crate cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(rename = "Language")]
    pub language: String,
    #[serde(rename = "Plugins", default)]
    pub plugins: Vec<String>,
}

impl Manifest {
    pub fn read(root: &Path) -> Result<Self, SupervisorError> {
        let content = fs::read_to_string(root.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// `None` for runners this crate has no debugger support for.
    #[must_use]
    pub fn language(&self) -> Option<Language> {
        self.language.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    Direct,
    Gradle,
    Maven,
}

/// How the tool is launched for one project root.
///
/// Two backends are equal when they share a root.
#[derive(Debug, Clone)]
pub enum ProjectBackend {
    /// The tool executable is invoked directly.
    Direct { root: PathBuf, command: PathBuf },
    /// `gradle` or the project's `gradlew` wrapper drives the tool plugin.
    Gradle { root: PathBuf, command: PathBuf },
    /// `mvn` or the project's `mvnw` wrapper drives the tool plugin.
    Maven { root: PathBuf, command: PathBuf },
}

impl PartialEq for ProjectBackend {
    fn eq(&self, other: &Self) -> bool {
        self.root() == other.root()
    }
}

impl Eq for ProjectBackend {}

impl ProjectBackend {
    /// Pick the backend from the build files present in `root`.
    ///
    /// `tool` is the already resolved tool executable used by direct
    /// projects.
    pub fn detect(root: &Path, tool: &Path) -> Result<Self, SupervisorError> {
        let root = root.to_path_buf();
        let has_any = |markers: &[&str]| markers.iter().any(|marker| root.join(marker).is_file());

        let backend = if has_any(MAVEN_MARKERS) {
            let command = match resolve::project_wrapper(&root, "mvnw") {
                Some(wrapper) => wrapper,
                None => resolve::resolve_executable("mvn")?,
            };
            ProjectBackend::Maven { root, command }
        } else if has_any(GRADLE_MARKERS) {
            let command = match resolve::project_wrapper(&root, "gradlew") {
                Some(wrapper) => wrapper,
                None => resolve::resolve_executable("gradle")?,
            };
            ProjectBackend::Gradle { root, command }
        } else {
            ProjectBackend::Direct {
                root,
                command: tool.to_path_buf(),
            }
        };
        log::info!(
            "{} project at {} runs through {}",
            backend.kind(),
            backend.root().display(),
            backend.command().display()
        );
        Ok(backend)
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            ProjectBackend::Direct { .. } => BackendKind::Direct,
            ProjectBackend::Gradle { .. } => BackendKind::Gradle,
            ProjectBackend::Maven { .. } => BackendKind::Maven,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        match self {
            ProjectBackend::Direct { root, .. }
            | ProjectBackend::Gradle { root, .. }
            | ProjectBackend::Maven { root, .. } => root,
        }
    }

    #[must_use]
    pub fn command(&self) -> &Path {
        match self {
            ProjectBackend::Direct { command, .. }
            | ProjectBackend::Gradle { command, .. }
            | ProjectBackend::Maven { command, .. } => command,
        }
    }

    /// Arguments of the build tool's classpath resolution task.
    fn classpath_args(&self) -> Option<&'static [&'static str]> {
        match self {
            ProjectBackend::Direct { .. } => None,
            ProjectBackend::Gradle { .. } => Some(&["-q", "clean", "classpath"]),
            ProjectBackend::Maven { .. } => Some(&["-q", "test-compile", "gauge:classpath"]),
        }
    }

    /// Extra environment for runs of this project.
    ///
    /// Build-tool projects export their test classpath, computed by running
    /// the build tool synchronously in the project root.
    pub fn env_overlay(&self) -> Result<HashMap<String, String>, SupervisorError> {
        let mut overlay = HashMap::new();
        let Some(args) = self.classpath_args() else {
            return Ok(overlay);
        };

        let command = self.command();
        let output = Command::new(command)
            .args(args)
            .current_dir(self.root())
            .output()
            .map_err(|source| SupervisorError::CommandSpawn {
                command: command.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(SupervisorError::Classpath(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let classpath = String::from_utf8(output.stdout)?.trim().to_string();
        log::debug!("classpath for {}: {classpath}", self.root().display());
        overlay.insert(CLASSPATH_ENV.to_string(), classpath);
        Ok(overlay)
    }
}

/// Backends discovered so far, keyed by project root.
#[derive(Debug, Default)]
pub struct ProjectRegistry {
    backends: HashMap<PathBuf, ProjectBackend>,
}

impl ProjectRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached backend for `root`, detecting it on first use.
    pub fn backend_for(
        &mut self,
        root: &Path,
        tool: &Path,
    ) -> Result<&ProjectBackend, SupervisorError> {
        if !self.backends.contains_key(root) {
            let backend = ProjectBackend::detect(root, tool)?;
            self.backends.insert(root.to_path_buf(), backend);
        }
        self.backends
            .get(root)
            .ok_or_else(|| SupervisorError::TargetOutsideProject(root.to_path_buf()))
    }

    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.backends.keys().map(PathBuf::as_path)
    }
}
