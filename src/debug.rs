//! Debugger attach handshake.
//!
//! When a run is started in debug mode the runner is told which port to
//! listen on through its environment. Once it prints that it is ready the
//! editor is asked to attach. The handshake moves through
//! `Disabled` or `WaitingForPort -> WaitingForReady -> Attached`, and ends in
//! `Detached` when the run is cancelled or finishes.

use std::{
    collections::HashMap,
    net::{Ipv4Addr, TcpListener},
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use serde::Serialize;

use crate::{backend::Language, error::SupervisorError};

pub const DEBUGGING_ENV: &str = "DEBUGGING";
pub const DEBUG_PORT_ENV: &str = "DEBUG_PORT";
pub const JAVA_DEBUG_OPTS_ENV: &str = "GAUGE_DEBUG_OPTS";

const DEBUGGER_NAME: &str = "Gauge Debugger";
const LOCALHOST: &str = "127.0.0.1";

/// The editor side of the handshake.
pub trait DebuggerHost: Send + Sync {
    /// Start a debug session with `configuration`.
    fn attach(&self, configuration: &AttachConfiguration) -> Result<(), SupervisorError>;

    /// Stop the debug session started by [`DebuggerHost::attach`], if any.
    fn detach(&self) {}
}

/// Host used when debugging is never requested.
pub struct NoDebugger;

impl DebuggerHost for NoDebugger {
    fn attach(&self, _: &AttachConfiguration) -> Result<(), SupervisorError> {
        Err(SupervisorError::DebuggerAttach(
            "no debugger host configured".to_string(),
        ))
    }
}

/// Attach request handed to the editor's debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachConfiguration {
    #[serde(rename = "type")]
    pub kind: String,
    pub request: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
}

impl AttachConfiguration {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            request: "attach".to_string(),
            name: DEBUGGER_NAME.to_string(),
            host_name: None,
            port: None,
            process_id: None,
        }
    }

    /// Attach configuration for a runner written in `language`.
    #[must_use]
    pub fn for_language(language: Language, port: u16, process_id: Option<u32>) -> Self {
        match language {
            Language::Js | Language::Ts => Self {
                port: Some(port),
                ..Self::new("node")
            },
            Language::Python => Self {
                host_name: Some(LOCALHOST.to_string()),
                port: Some(port),
                ..Self::new("python")
            },
            Language::Java => Self {
                host_name: Some(LOCALHOST.to_string()),
                port: Some(port),
                ..Self::new("java")
            },
            Language::Csharp => Self {
                process_id,
                ..Self::new("coreclr")
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugState {
    Disabled,
    WaitingForPort,
    WaitingForReady { port: u16 },
    Attached { process_id: Option<u32> },
    Detached,
}

pub struct DebugHandshake {
    language: Language,
    host: Arc<dyn DebuggerHost>,
    /// Grace period before attaching to runtimes whose debug transport binds
    /// after the ready line is printed.
    settle: Duration,
    state: Mutex<DebugState>,
}

impl DebugHandshake {
    /// A handshake for a run that does not debug.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            language: Language::Js,
            host: Arc::new(NoDebugger),
            settle: Duration::ZERO,
            state: Mutex::new(DebugState::Disabled),
        }
    }

    #[must_use]
    pub fn new(language: Language, host: Arc<dyn DebuggerHost>, settle: Duration) -> Self {
        Self {
            language,
            host,
            settle,
            state: Mutex::new(DebugState::WaitingForPort),
        }
    }

    #[must_use]
    pub fn state(&self) -> DebugState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: DebugState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state() != DebugState::Disabled
    }

    /// Whether the runner has yet to report that it is ready.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        matches!(
            self.state(),
            DebugState::WaitingForPort | DebugState::WaitingForReady { .. }
        )
    }

    /// Allocate the debug port and add the debug variables to `env`.
    pub fn prepare(&self, env: &mut HashMap<String, String>) -> Result<Option<u16>, SupervisorError> {
        if self.state() != DebugState::WaitingForPort {
            return Ok(None);
        }
        let port = free_port()?;
        env.insert(DEBUGGING_ENV.to_string(), "true".to_string());
        match self.language {
            Language::Java => {
                env.insert(JAVA_DEBUG_OPTS_ENV.to_string(), port.to_string());
            }
            Language::Csharp => {}
            Language::Js | Language::Ts | Language::Python => {
                env.insert(DEBUG_PORT_ENV.to_string(), port.to_string());
            }
        }
        log::info!("debugging {} runner on port {port}", self.language);
        self.set_state(DebugState::WaitingForReady { port });
        Ok(Some(port))
    }

    /// The runner reported it is ready; attach the editor's debugger.
    ///
    /// Only the first ready signal of a run attaches.
    pub fn runner_ready(&self, process_id: Option<u32>) -> Result<(), SupervisorError> {
        let port = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                DebugState::WaitingForReady { port } => {
                    *state = DebugState::Attached { process_id };
                    port
                }
                DebugState::Disabled => {
                    log::debug!("runner ready for debugging but debugging was not requested");
                    return Ok(());
                }
                other => {
                    log::warn!("ignoring ready signal in debug state {other:?}");
                    return Ok(());
                }
            }
        };

        if self.language == Language::Java && !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        let configuration = AttachConfiguration::for_language(self.language, port, process_id);
        log::info!("attaching debugger: {configuration:?}");
        self.host
            .attach(&configuration)
            .map_err(|e| SupervisorError::DebuggerAttach(e.to_string()))
    }

    /// The runner gave up waiting for a debugger.
    pub fn not_attached(&self) -> SupervisorError {
        if self.is_enabled() {
            self.set_state(DebugState::Detached);
        }
        SupervisorError::DebuggerNotAttached
    }

    /// End the handshake, stopping the editor's session if one was started.
    pub fn detach(&self) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = *state;
            if previous != DebugState::Disabled {
                *state = DebugState::Detached;
            }
            previous
        };
        if let DebugState::Attached { .. } = previous {
            self.host.detach();
        }
    }
}

/// Ask the OS for a currently unused local port.
fn free_port() -> Result<u16, SupervisorError> {
    let listener =
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(|_| SupervisorError::NoFreePort)?;
    let port = listener
        .local_addr()
        .map_err(|_| SupervisorError::NoFreePort)?
        .port();
    Ok(port)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Host recording every attach request.
    #[derive(Default)]
    pub(crate) struct RecordingHost {
        pub attached: Mutex<Vec<AttachConfiguration>>,
        pub detached: Mutex<usize>,
        pub fail: bool,
    }

    impl DebuggerHost for RecordingHost {
        fn attach(&self, configuration: &AttachConfiguration) -> Result<(), SupervisorError> {
            self.attached.lock().unwrap().push(configuration.clone());
            if self.fail {
                Err(SupervisorError::DebuggerAttach("refused".to_string()))
            } else {
                Ok(())
            }
        }

        fn detach(&self) {
            *self.detached.lock().unwrap() += 1;
        }
    }

    pub(crate) fn ready_handshake(language: Language, host: Arc<RecordingHost>) -> DebugHandshake {
        let handshake = DebugHandshake::new(language, host, Duration::ZERO);
        let mut env = HashMap::new();
        handshake.prepare(&mut env).unwrap();
        handshake
    }

    #[test]
    fn disabled_handshake_adds_nothing() {
        let handshake = DebugHandshake::disabled();
        let mut env = HashMap::new();
        assert_eq!(handshake.prepare(&mut env).unwrap(), None);
        assert!(env.is_empty());
        assert!(!handshake.is_waiting());
        handshake.runner_ready(Some(1)).unwrap();
        assert_eq!(handshake.state(), DebugState::Disabled);
    }

    #[test]
    fn prepare_sets_language_specific_env() {
        let handshake = DebugHandshake::new(Language::Java, Arc::new(NoDebugger), Duration::ZERO);
        let mut env = HashMap::new();
        let port = handshake.prepare(&mut env).unwrap().unwrap();
        assert_eq!(env[DEBUGGING_ENV], "true");
        assert_eq!(env[JAVA_DEBUG_OPTS_ENV], port.to_string());
        assert!(!env.contains_key(DEBUG_PORT_ENV));
        assert_eq!(handshake.state(), DebugState::WaitingForReady { port });

        let handshake = DebugHandshake::new(Language::Python, Arc::new(NoDebugger), Duration::ZERO);
        let mut env = HashMap::new();
        let port = handshake.prepare(&mut env).unwrap().unwrap();
        assert_eq!(env[DEBUG_PORT_ENV], port.to_string());
    }

    #[test]
    fn attaches_once_with_language_configuration() {
        let host = Arc::new(RecordingHost::default());
        let handshake = ready_handshake(Language::Csharp, Arc::clone(&host));

        handshake.runner_ready(Some(23456)).unwrap();
        handshake.runner_ready(Some(23456)).unwrap();

        let attached = host.attached.lock().unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].kind, "coreclr");
        assert_eq!(attached[0].process_id, Some(23456));
        assert_eq!(
            handshake.state(),
            DebugState::Attached {
                process_id: Some(23456)
            }
        );
    }

    #[test]
    fn attach_failure_is_reported() {
        let host = Arc::new(RecordingHost {
            fail: true,
            ..RecordingHost::default()
        });
        let handshake = ready_handshake(Language::Js, host);
        assert!(matches!(
            handshake.runner_ready(None),
            Err(SupervisorError::DebuggerAttach(_))
        ));
    }

    #[test]
    fn detach_stops_an_attached_session() {
        let host = Arc::new(RecordingHost::default());
        let handshake = ready_handshake(Language::Ts, Arc::clone(&host));
        handshake.runner_ready(None).unwrap();
        handshake.detach();
        handshake.detach();
        assert_eq!(*host.detached.lock().unwrap(), 1);
        assert_eq!(handshake.state(), DebugState::Detached);
    }

    #[test]
    fn java_configuration_serializes_camel_case() {
        let configuration = AttachConfiguration::for_language(Language::Java, 5005, None);
        let json = serde_json::to_value(&configuration).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "java",
                "request": "attach",
                "name": "Gauge Debugger",
                "hostName": "127.0.0.1",
                "port": 5005
            })
        );
    }
}
