use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Lines, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use plategate_core::{CameraIp, PerformanceSample};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, ControlError, DaemonError};
use crate::hub::SupervisorEvent;
use crate::paths::socket_path;
use crate::supervisor::CameraStatus;

/// JSON newline-delimited request, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Status,
    Stop,
    CameraStart {
        ip: String,
        user: String,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_rate: Option<u32>,
    },
    CameraStop {
        ip: String,
    },
    CameraStatus,
    Performance,
    /// Turns the connection into an event stream.
    Subscribe,
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable failure code (`conflict`, `not_found`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn rejected(err: &ControlError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
        }
    }
}

fn connect(home: &Path) -> Result<UnixStream, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })
}

fn write_request(
    stream: &mut UnixStream,
    home: &Path,
    request: &DaemonRequest,
) -> Result<(), DaemonError> {
    let socket = socket_path(home);
    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let mut stream = connect(home)?;
    write_request(&mut stream, home, request)?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(socket_path(home), e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &DaemonRequest::Status) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::Stop)?;
    response_into_data(response).map(|_| ())
}

/// Blocks until the worker confirms startup or the daemon rejects the start.
pub fn request_camera_start(
    home: &Path,
    ip: &str,
    user: &str,
    password: &str,
    device: Option<String>,
    frame_rate: Option<u32>,
) -> Result<Value, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest::CameraStart {
            ip: ip.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            device,
            frame_rate,
        },
    )?;
    response_into_data(response)
}

pub fn request_camera_stop(home: &Path, ip: &str) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::CameraStop { ip: ip.to_string() })?;
    response_into_data(response).map(|_| ())
}

pub fn request_camera_status(home: &Path) -> Result<Vec<CameraStatus>, DaemonError> {
    let response = send_request(home, &DaemonRequest::CameraStatus)?;
    Ok(serde_json::from_value(response_into_data(response)?)?)
}

pub fn request_performance(
    home: &Path,
) -> Result<BTreeMap<CameraIp, PerformanceSample>, DaemonError> {
    let response = send_request(home, &DaemonRequest::Performance)?;
    Ok(serde_json::from_value(response_into_data(response)?)?)
}

/// Blocking iterator over the daemon's event stream.
pub struct EventStream {
    lines: Lines<BufReader<UnixStream>>,
}

impl Iterator for EventStream {
    type Item = Result<SupervisorEvent, DaemonError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(io_err("daemon event stream", err))),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(DaemonError::from));
        }
    }
}

/// Subscribe to live events. The first line is the usual response envelope.
pub fn subscribe(home: &Path) -> Result<EventStream, DaemonError> {
    let mut stream = connect(home)?;
    write_request(&mut stream, home, &DaemonRequest::Subscribe)?;

    let mut lines = BufReader::new(stream).lines();
    let first = lines
        .next()
        .ok_or_else(|| {
            DaemonError::Protocol("daemon closed connection before responding".to_string())
        })?
        .map_err(|e| io_err(socket_path(home), e))?;
    let response: DaemonResponse = serde_json::from_str(first.trim_end())?;
    response_into_data(response)?;
    Ok(EventStream { lines })
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    let message = response
        .error
        .unwrap_or_else(|| "unknown daemon error".to_string());
    match response.code {
        Some(code) => Err(DaemonError::Rejected { code, message }),
        None => Err(DaemonError::Protocol(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_are_tagged_by_cmd() {
        assert_eq!(
            serde_json::to_value(DaemonRequest::CameraStatus).unwrap(),
            json!({"cmd": "camera_status"})
        );
        let start: DaemonRequest = serde_json::from_value(json!({
            "cmd": "camera_start",
            "ip": "10.0.0.5",
            "user": "admin",
            "password": "pw"
        }))
        .unwrap();
        assert_eq!(
            start,
            DaemonRequest::CameraStart {
                ip: "10.0.0.5".into(),
                user: "admin".into(),
                password: "pw".into(),
                device: None,
                frame_rate: None,
            }
        );
    }

    #[test]
    fn rejection_keeps_code() {
        let response = DaemonResponse::rejected(&ControlError::NotFound(CameraIp::from("10.0.0.9")));
        let err = response_into_data(response).unwrap_err();
        match err {
            DaemonError::Rejected { code, message } => {
                assert_eq!(code, "not_found");
                assert!(message.contains("10.0.0.9"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn plain_error_without_code_is_protocol_error() {
        let response = DaemonResponse {
            ok: false,
            data: None,
            error: Some("unknown command".to_string()),
            code: None,
        };
        let err = response_into_data(response).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));
    }

    #[test]
    fn missing_socket_means_not_running() {
        let home = tempfile::TempDir::new().expect("home");
        let err = send_request(home.path(), &DaemonRequest::Status).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }
}
