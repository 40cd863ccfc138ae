mod server;

use std::io::{self, BufRead};

use gauge_supervisor::{config, error::SupervisorError, logging::init_logging, protocol};
use lsp_types::InitializeParams;
use serde::Deserialize;
use serde_json::Value;

use crate::server::{ExecuteParams, GaugeServer};

const METHOD_NOT_FOUND: i64 = -32601;

/// Read one Content-Length framed message. `None` once stdin is closed.
fn read_message(handle: &mut impl BufRead) -> Result<Option<Value>, SupervisorError> {
    let mut size = None;
    'read_header: loop {
        let mut buffer = String::new();
        if handle.read_line(&mut buffer)? == 0 {
            return Ok(None);
        }

        // The end of header section
        if buffer == "\r\n" {
            break 'read_header;
        }

        let Some((header_name, header_value)) = buffer.split_once(':') else {
            log::warn!("unexpected header line: {buffer:?}");
            continue;
        };
        if header_name.trim().eq_ignore_ascii_case("content-length") {
            size = Some(
                header_value
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            );
        }
    }

    let Some(size) = size else {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length").into());
    };
    let mut buf = vec![0u8; size];
    handle.read_exact(&mut buf)?;
    let message = String::from_utf8(buf)?;
    Ok(Some(serde_json::from_str(&message)?))
}

fn main_loop(server: &mut GaugeServer) -> Result<(), SupervisorError> {
    let stdin = io::stdin();
    let mut handle = stdin.lock();
    while let Some(received_json) = read_message(&mut handle)? {
        log::debug!("received json={received_json}");
        let Some(method) = received_json["method"].as_str() else {
            // Responses to our own requests are not expected.
            continue;
        };
        let id = protocol::request_id(&received_json);
        let params = &received_json["params"];

        match (method, id) {
            ("initialize", Some(id)) => {
                let initialize_params = InitializeParams::deserialize(params)?;
                server.initialize(&id, initialize_params)?;
            }
            ("initialized" | "$/cancelRequest", _) => {}
            ("gauge/execute", Some(id)) => match ExecuteParams::deserialize(params) {
                Ok(execute_params) => server.execute(id, execute_params)?,
                Err(error) => {
                    protocol::send_error(Some(id), server::INVALID_PARAMS, error.to_string())?;
                }
            },
            ("gauge/cancel", Some(id)) => server.cancel(&id)?,
            ("gauge/reportPath", Some(id)) => server.report_path(&id)?,
            ("gauge/version", Some(id)) => server.version(&id)?,
            ("shutdown", Some(id)) => server.shutdown(&id)?,
            ("exit", _) => return Ok(()),
            (_, Some(id)) => {
                // https://microsoft.github.io/language-server-protocol/specifications/lsp/3.17/specification/#responseMessage
                protocol::send_error(
                    Some(id),
                    METHOD_NOT_FOUND,
                    format!("method not found: {method}"),
                )?;
            }
            (_, None) => log::debug!("ignoring notification {method}"),
        }
    }
    log::info!("stdin closed");
    Ok(())
}

fn main() {
    config::init();
    let config = config::get();
    if let Err(error) = init_logging("server", config) {
        eprintln!("failed to initialize logging: {error}");
    }
    let mut server = GaugeServer::new(config);
    if let Err(error) = main_loop(&mut server) {
        log::error!("Error: {error:?}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;

    #[test]
    fn reads_framed_messages_until_eof() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"gauge/version"}"#;
        let framed = format!("content-length: {}\r\n\r\n{body}", body.len());
        let mut input = Cursor::new(framed.into_bytes());

        let message = read_message(&mut input).unwrap().unwrap();
        assert_eq!(message["method"], json!("gauge/version"));
        assert!(read_message(&mut input).unwrap().is_none());
    }

    #[test]
    fn missing_length_is_an_error() {
        let mut input = Cursor::new(b"Content-Type: x\r\n\r\n{}".to_vec());
        assert!(read_message(&mut input).is_err());
    }
}
