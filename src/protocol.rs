//! JSON-RPC communication with the editor over stdout.

use std::io::{Write, stdout};

use lsp_types::{MessageType, ShowMessageParams};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    debug::{AttachConfiguration, DebuggerHost},
    error::SupervisorError,
    supervisor::{Notifier, OutputSink, Stream},
};

pub const OUTPUT_NOTIFICATION: &str = "gauge/output";
pub const PRE_EXECUTE_NOTIFICATION: &str = "gauge/preExecute";
pub const POST_EXECUTE_NOTIFICATION: &str = "gauge/postExecute";
pub const ATTACH_DEBUGGER_NOTIFICATION: &str = "gauge/attachDebugger";
pub const DETACH_DEBUGGER_NOTIFICATION: &str = "gauge/detachDebugger";

/// Send a JSON-RPC message to stdout with Content-Length header.
pub fn send<T>(message: &T) -> Result<(), SupervisorError>
where
    T: ?Sized + Serialize + std::fmt::Debug,
{
    log::debug!("send stdout: {message:?}");
    let msg = serde_json::to_string(message)?;
    let mut stdout = stdout().lock();
    write!(stdout, "Content-Length: {}\r\n\r\n{}", msg.len(), msg)?;
    stdout.flush()?;
    Ok(())
}

/// Send a successful response to request `id`.
pub fn send_result<T: Serialize>(id: &Value, result: T) -> Result<(), SupervisorError> {
    send(&json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": serde_json::to_value(result)?,
    }))
}

/// Send a notification.
pub fn notify<T: Serialize>(method: &str, params: T) -> Result<(), SupervisorError> {
    send(&json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": serde_json::to_value(params)?,
    }))
}

/// JSON-RPC error message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    jsonrpc: String,
    id: Option<Value>,
    pub error: Value,
}

impl ErrorMessage {
    pub fn new(id: Option<Value>, error: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            error,
        }
    }
}

/// Send a JSON-RPC error response.
pub fn send_error<S: Into<String>>(
    id: Option<Value>,
    code: i64,
    msg: S,
) -> Result<(), SupervisorError> {
    send(&ErrorMessage::new(
        id,
        json!({ "code": code, "message": msg.into() }),
    ))
}

/// Convert a file:// URI to a file path.
pub fn uri_to_path(uri: &str) -> String {
    uri.replace("file://", "")
}

/// Request ids may be numbers or strings.
#[must_use]
pub fn request_id(message: &Value) -> Option<Value> {
    match &message["id"] {
        id @ (Value::Number(_) | Value::String(_)) => Some(id.clone()),
        _ => None,
    }
}

/// The editor seen from the supervisor: output lines, user messages and
/// debugger sessions all become notifications on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioClient;

impl OutputSink for StdioClient {
    fn line(&self, stream: Stream, line: &str) {
        if let Err(error) = notify(
            OUTPUT_NOTIFICATION,
            json!({ "stream": stream, "line": line }),
        ) {
            log::error!("failed to forward output: {error}");
        }
    }
}

impl Notifier for StdioClient {
    fn show(&self, level: MessageType, message: &str) {
        let params = ShowMessageParams {
            typ: level,
            message: message.to_string(),
        };
        if let Err(error) = notify("window/showMessage", params) {
            log::error!("failed to show message: {error}");
        }
    }
}

impl DebuggerHost for StdioClient {
    fn attach(&self, configuration: &AttachConfiguration) -> Result<(), SupervisorError> {
        notify(
            ATTACH_DEBUGGER_NOTIFICATION,
            json!({ "configuration": configuration }),
        )
    }

    fn detach(&self) {
        if let Err(error) = notify(DETACH_DEBUGGER_NOTIFICATION, Value::Null) {
            log::error!("failed to stop debug session: {error}");
        }
    }
}
