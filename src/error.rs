use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    // Standard errors with From implementations
    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("String UTF8 error: {0}")]
    StringUtf8(#[from] std::string::FromUtf8Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    // Execution errors
    #[error("Gauge is still running. Wait for the current run to finish or cancel it.")]
    AlreadyRunning,

    #[error("Failed to spawn `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Could not resolve project classpath: {0}")]
    Classpath(String),

    #[error("Invalid run target: {0}")]
    InvalidTarget(String),

    #[error("Run target {0} is not inside a known project root")]
    TargetOutsideProject(PathBuf),

    #[error("Failed to terminate process {pid}: {reason}")]
    ProcessKill { pid: u32, reason: String },

    // Debugger errors
    #[error("Failed to attach debugger: {0}")]
    DebuggerAttach(String),

    #[error("No debugger attached. Stopping the execution.")]
    DebuggerNotAttached,

    #[error("No free port available for the debugger")]
    NoFreePort,

    // Tool metadata errors
    #[error("Malformed tool metadata: {0}")]
    MalformedToolMetadata(String),

    // Configuration errors
    #[error("No workspace folders found")]
    NoWorkspaceFolders,
}
