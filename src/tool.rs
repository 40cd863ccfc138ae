//! Installed tool detection from `gauge version -m`.

use std::{path::Path, process::Command};

use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
}

/// Machine readable version output of the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub version: String,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub plugins: Vec<PluginInfo>,
}

impl ToolInfo {
    #[must_use]
    pub fn plugin(&self, name: &str) -> Option<&PluginInfo> {
        self.plugins.iter().find(|plugin| plugin.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ToolStatus {
    Installed { info: ToolInfo },
    NotInstalled,
    /// The tool ran but its output could not be understood.
    Unknown { reason: String },
}

impl ToolStatus {
    /// Query `command` for its version and plugins.
    #[must_use]
    pub fn detect(command: &Path) -> Self {
        let output = match Command::new(command).args(["version", "-m"]).output() {
            Ok(output) => output,
            Err(error) => {
                log::info!("{} is not runnable: {error}", command.display());
                return ToolStatus::NotInstalled;
            }
        };
        if !output.status.success() {
            return ToolStatus::Unknown {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            };
        }
        match parse_version_info(&String::from_utf8_lossy(&output.stdout)) {
            Ok(info) => ToolStatus::Installed { info },
            Err(error) => {
                log::error!("{error}");
                ToolStatus::Unknown {
                    reason: error.to_string(),
                }
            }
        }
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        matches!(self, ToolStatus::Installed { .. })
    }
}

pub fn parse_version_info(output: &str) -> Result<ToolInfo, SupervisorError> {
    serde_json::from_str(output.trim())
        .map_err(|e| SupervisorError::MalformedToolMetadata(format!("{e}: {}", output.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_and_plugins() {
        let info = parse_version_info(
            r#"
            {
              "version": "1.6.4",
              "commitHash": "e59d8fc",
              "plugins": [
                {"name": "html-report", "version": "4.3.1"},
                {"name": "java", "version": "0.11.0"}
              ]
            }
            "#,
        )
        .unwrap();
        assert_eq!(info.version, "1.6.4");
        assert_eq!(info.commit_hash.as_deref(), Some("e59d8fc"));
        assert_eq!(info.plugin("java").map(|p| p.version.as_str()), Some("0.11.0"));
        assert!(info.plugin("python").is_none());
    }

    #[test]
    fn malformed_output_is_an_error() {
        let result = parse_version_info("Gauge version: 1.6.4");
        assert!(matches!(
            result,
            Err(SupervisorError::MalformedToolMetadata(message)) if message.contains("Gauge version")
        ));
    }

    #[test]
    fn missing_tool_is_not_installed() {
        let status = ToolStatus::detect(Path::new("/nonexistent/gauge-8c1f"));
        assert_eq!(status, ToolStatus::NotInstalled);
        assert!(!status.is_installed());
    }

    #[cfg(unix)]
    #[test]
    fn garbled_output_degrades_to_unknown() {
        use std::{fs, os::unix::fs::PermissionsExt};

        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("gauge");
        fs::write(&tool, "#!/bin/sh\necho 'not json'\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(
            ToolStatus::detect(&tool),
            ToolStatus::Unknown { reason } if reason.contains("not json")
        ));
    }
}
