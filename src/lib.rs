//! Gauge supervisor - runs Gauge specifications on behalf of an editor.
//!
//! The crate turns a run request (what to run, with which flags, whether to
//! debug) into the right command line for the project's build setup, spawns
//! it, streams its output, performs the debugger handshake and tears the
//! whole process tree down on cancellation.

pub mod args;
pub mod backend;
pub mod config;
pub mod debug;
pub mod error;
pub mod kill;
pub mod logging;
pub mod options;
pub mod processor;
pub mod protocol;
pub mod resolve;
pub mod scenario;
pub mod splitter;
pub mod supervisor;
pub mod target;
pub mod tool;
pub mod workspace;

pub use backend::{Language, ProjectBackend, ProjectRegistry};
pub use error::SupervisorError;
pub use options::RunOptions;
pub use supervisor::{ExecutionSupervisor, RunHandle, RunOutcome, RunRequest};
pub use target::RunTarget;
