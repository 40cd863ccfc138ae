use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::SupervisorError,
    options::{self, RunOptions},
};

static CONFIG: OnceLock<Config> = OnceLock::new();

/// File in a project root holding its persisted launch configuration.
pub const LAUNCH_FILE_NAME: &str = ".gauge-supervisor.toml";

/// Persisted launch configuration of one project: extra flags applied to
/// every run, below the overrides of the triggering command.
#[derive(Debug, Deserialize, Clone, Serialize, Default, PartialEq)]
pub struct LaunchConfig {
    #[serde(default)]
    pub options: RunOptions,
}

impl LaunchConfig {
    /// Read `.gauge-supervisor.toml` from `root`, falling back to the
    /// editor's initialization options, then to an empty configuration.
    pub fn load(root: &Path, fallback: Option<&Value>) -> Result<Self, SupervisorError> {
        let toml_path = root.join(LAUNCH_FILE_NAME);
        match std::fs::read_to_string(&toml_path) {
            Ok(content) => Ok(toml::from_str::<LaunchConfig>(&content)?),
            Err(_) => match fallback {
                Some(value) => Ok(serde_json::from_value(value.clone())?),
                None => {
                    log::debug!("no launch configuration at {}", toml_path.display());
                    Ok(LaunchConfig::default())
                }
            },
        }
    }

    /// Validate configuration and return warnings.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        [options::FAILED, options::REPEAT]
            .into_iter()
            .filter(|key| self.options.get(key).is_some())
            .map(|key| {
                format!(
                    "Launch configuration sets `{key}`, which would replace every run with a rerun. \
                     Use the corresponding command instead."
                )
            })
            .collect()
    }
}

/// Main configuration struct for gauge-supervisor, parsed from the command
/// line.
#[derive(Parser, Debug, Clone, Deserialize, Serialize, Default)]
#[command(name = "gauge-supervisor")]
#[command(about = "Run Gauge specifications on behalf of an editor over stdio")]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Directory for log files
    #[arg(long, default_value_t = default_log_dir())]
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Gauge executable to use instead of looking it up on PATH
    #[arg(long)]
    #[serde(default)]
    pub gauge_command: Option<String>,

    /// Milliseconds to wait before attaching a debugger to runtimes that bind
    /// their debug port late
    #[arg(long, default_value_t = default_debugger_settle_ms())]
    #[serde(default = "default_debugger_settle_ms")]
    pub debugger_settle_ms: u64,
}

fn default_log_dir() -> String {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("gauge-supervisor/logs")
        .to_string_lossy()
        .to_string()
}

fn default_debugger_settle_ms() -> u64 {
    1000
}

impl Config {
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.log_dir)
    }

    #[must_use]
    pub fn debugger_settle(&self) -> Duration {
        Duration::from_millis(self.debugger_settle_ms)
    }

    #[must_use]
    pub fn gauge_command(&self) -> &str {
        self.gauge_command.as_deref().unwrap_or("gauge")
    }
}

pub fn init() -> &'static Config {
    CONFIG.get_or_init(Config::parse)
}

pub fn get() -> &'static Config {
    CONFIG
        .get()
        .expect("Config not initialized. Call config::init() first.")
}
