//! HTTP upgrade handshake (RFC 6455 Section 4, server side).
//!
//! The acceptor inspects an already-parsed HTTP request, and either writes
//! the `101 Switching Protocols` response and hands back a live [`Session`],
//! or writes the matching `400` rejection and reports why. Responses go
//! through the same output sink the session will use, so the caller wires
//! up buffers exactly once.
//!
//! ```http
//! GET /debugger HTTP/1.1
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! The client's key is trusted verbatim: any non-empty value is accepted
//! and hashed, no base64 shape check is applied.

use crate::session::{Session, SessionConfig};
use crate::sink::{InputSink, OutputSink};
use base64::Engine;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// RFC 6455 GUID appended to the client key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value from a client key.
///
/// Per RFC 6455 Section 4.2.2: SHA-1 over the key concatenated with the
/// protocol GUID, then base64.
///
/// # Example
///
/// ```
/// use ws_endpoint::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Why an upgrade request was rejected.
///
/// Each variant corresponds to one of the `400` responses the acceptor
/// writes, see [`HandshakeError::response_bytes`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// `Upgrade` is not `websocket` or `Connection` lacks `upgrade`.
    #[error("not a websocket upgrade request")]
    NotWebsocket,
    /// `Sec-WebSocket-Version` is not exactly `13`.
    #[error("unsupported websocket version: {0:?}")]
    UnsupportedVersion(Option<String>),
    /// `Sec-WebSocket-Key` missing or empty.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    /// The request bytes could not be parsed at all.
    #[error("invalid HTTP request: {0}")]
    InvalidRequest(String),
}

impl HandshakeError {
    /// The HTTP response this rejection puts on the wire.
    #[must_use]
    pub fn response_bytes(&self) -> Vec<u8> {
        match self {
            Self::NotWebsocket | Self::InvalidRequest(_) => {
                rejection_response("Must send a websocket request.", None)
            }
            Self::UnsupportedVersion(_) => {
                rejection_response("Unsupported version.", Some("Sec-WebSocket-Version: 13"))
            }
            Self::MissingKey => rejection_response("Cannot accept without key.", None),
        }
    }
}

fn rejection_response(body: &str, extra_header: Option<&str>) -> Vec<u8> {
    let mut response = String::from("HTTP/1.1 400 Bad Request\r\nConnection: close\r\n");
    if let Some(header) = extra_header {
        response.push_str(header);
        response.push_str("\r\n");
    }
    response.push_str("Content-Type: text/plain\r\n");
    response.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    response.push_str(body);
    response.into_bytes()
}

fn switching_protocols_response(accept_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\
         \r\n"
    )
    .into_bytes()
}

/// Minimal HTTP request representation for the handshake.
///
/// Callers with their own HTTP layer can build one directly; [`parse`] is a
/// convenience for raw request bytes.
///
/// [`parse`]: HttpRequest::parse
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Headers with lowercased names.
    headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Build a request from parts. Header names are lowercased on insert.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        headers: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
        }
    }

    /// Parse an HTTP request head (request line plus headers).
    ///
    /// Header lines without a colon are skipped rather than rejected; the
    /// header section ends at the first blank line.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::InvalidRequest`] when the head is not
    /// UTF-8 or the request line lacks a method and path.
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        let head = std::str::from_utf8(data)
            .map_err(|_| HandshakeError::InvalidRequest("head is not valid UTF-8".into()))?;

        let mut lines = head.lines();
        let request_line = lines.next().unwrap_or_default();
        let mut words = request_line.split_whitespace();
        let (Some(method), Some(path)) = (words.next(), words.next()) else {
            return Err(HandshakeError::InvalidRequest(format!(
                "malformed request line {request_line:?}"
            )));
        };

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
        })
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|value| value.as_str())
    }
}

/// Validate the upgrade headers and return the computed accept key.
///
/// The checks, in order:
/// - `Upgrade` equals `websocket` (ASCII case-insensitive),
/// - `Connection` contains `upgrade` (ASCII case-insensitive substring),
/// - `Sec-WebSocket-Version` equals `13` exactly,
/// - `Sec-WebSocket-Key` present and non-empty.
///
/// # Errors
///
/// Returns the [`HandshakeError`] matching the first failed check.
pub fn validate_upgrade(request: &HttpRequest) -> Result<String, HandshakeError> {
    let upgrade_ok = request
        .header("upgrade")
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    let connection_ok = request
        .header("connection")
        .is_some_and(|value| value.to_ascii_lowercase().contains("upgrade"));
    if !upgrade_ok || !connection_ok {
        return Err(HandshakeError::NotWebsocket);
    }

    match request.header("sec-websocket-version") {
        Some("13") => {}
        other => {
            return Err(HandshakeError::UnsupportedVersion(
                other.map(str::to_string),
            ))
        }
    }

    match request.header("sec-websocket-key") {
        Some(key) if !key.is_empty() => Ok(compute_accept_key(key)),
        _ => Err(HandshakeError::MissingKey),
    }
}

/// Accept a WebSocket upgrade with the default session configuration.
///
/// See [`accept_upgrade_with_config`].
///
/// # Errors
///
/// On rejection the `400` response has already been written and flushed;
/// the returned error says why.
pub fn accept_upgrade<S, In, Out>(
    request: &HttpRequest,
    socket: S,
    input: In,
    output: Out,
) -> Result<Session<S, In, Out>, HandshakeError>
where
    In: InputSink,
    Out: OutputSink,
{
    accept_upgrade_with_config(request, socket, input, output, SessionConfig::default())
}

/// Accept a WebSocket upgrade, yielding a live [`Session`] bound to the
/// socket and its sinks.
///
/// On success the `101 Switching Protocols` response is staged in the
/// output sink and flushed without blocking; the session's first
/// [`process`](Session::process) ticks finish delivering it. On rejection
/// the matching `400` response is written and flushed, and the sinks are
/// dropped with the socket handle.
///
/// # Errors
///
/// Returns the validation failure after writing the rejection response.
pub fn accept_upgrade_with_config<S, In, Out>(
    request: &HttpRequest,
    socket: S,
    input: In,
    mut output: Out,
    config: SessionConfig,
) -> Result<Session<S, In, Out>, HandshakeError>
where
    In: InputSink,
    Out: OutputSink,
{
    match validate_upgrade(request) {
        Ok(accept_key) => {
            debug!(path = %request.path, "accepting websocket upgrade");
            output.push(&switching_protocols_response(&accept_key));
            output.flush(false);
            Ok(Session::from_upgraded(socket, input, output, config))
        }
        Err(error) => {
            debug!(path = %request.path, %error, "rejecting websocket upgrade");
            output.push(&error.response_bytes());
            output.flush(true);
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CaptureOutput, ScriptInput};
    use pretty_assertions::assert_eq;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn upgrade_request() -> HttpRequest {
        HttpRequest::parse(
            b"GET /debugger HTTP/1.1\r\n\
              Host: example.com\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\
              \r\n",
        )
        .expect("parse")
    }

    fn without_header(name: &str) -> HttpRequest {
        let request = upgrade_request();
        let headers = ["host", "upgrade", "connection", "sec-websocket-key", "sec-websocket-version"]
            .iter()
            .filter(|header| !header.eq_ignore_ascii_case(name))
            .filter_map(|header| {
                request
                    .header(header)
                    .map(|value| ((*header).to_string(), value.to_string()))
            })
            .collect::<Vec<_>>();
        HttpRequest::new("GET", "/debugger", headers)
    }

    #[test]
    fn test_compute_accept_key_rfc_vector() {
        // RFC 6455 Section 1.3 example.
        assert_eq!(compute_accept_key(SAMPLE_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_http_request_parse() {
        let request = upgrade_request();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/debugger");
        assert_eq!(request.header("HOST"), Some("example.com"));
        assert_eq!(request.header("Sec-WebSocket-Key"), Some(SAMPLE_KEY));
    }

    #[test]
    fn test_accept_writes_switching_protocols() {
        let request = upgrade_request();
        let mut output = CaptureOutput::new();
        {
            let session = accept_upgrade(&request, (), ScriptInput::new(), &mut output)
                .expect("accept");
            assert!(session.is_open());
        }

        let expected = "HTTP/1.1 101 Switching Protocols\r\n\
                        Upgrade: websocket\r\n\
                        Connection: Upgrade\r\n\
                        Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
                        \r\n";
        assert_eq!(output.bytes(), expected.as_bytes());
    }

    #[test]
    fn test_upgrade_header_is_case_insensitive() {
        let mut request = upgrade_request();
        request = HttpRequest::new(
            request.method.clone(),
            request.path.clone(),
            [
                ("Upgrade".to_string(), "WebSocket".to_string()),
                ("Connection".to_string(), "keep-alive, Upgrade".to_string()),
                ("Sec-WebSocket-Version".to_string(), "13".to_string()),
                ("Sec-WebSocket-Key".to_string(), SAMPLE_KEY.to_string()),
            ],
        );
        assert!(validate_upgrade(&request).is_ok());
    }

    #[test]
    fn test_missing_upgrade_header_rejected() {
        let request = without_header("upgrade");
        let mut output = CaptureOutput::new();

        let error = accept_upgrade_with_config(
            &request,
            (),
            ScriptInput::new(),
            &mut output,
            crate::SessionConfig::default(),
        )
        .expect_err("reject");

        assert_eq!(error, HandshakeError::NotWebsocket);
        let text = String::from_utf8(output.bytes().to_vec()).expect("utf8");
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.ends_with("Must send a websocket request."));
    }

    #[test]
    fn test_wrong_connection_header_rejected() {
        let mut request = without_header("connection");
        assert_eq!(validate_upgrade(&request), Err(HandshakeError::NotWebsocket));

        request = HttpRequest::new(
            "GET",
            "/debugger",
            [
                ("Upgrade".to_string(), "websocket".to_string()),
                ("Connection".to_string(), "close".to_string()),
                ("Sec-WebSocket-Version".to_string(), "13".to_string()),
                ("Sec-WebSocket-Key".to_string(), SAMPLE_KEY.to_string()),
            ],
        );
        assert_eq!(validate_upgrade(&request), Err(HandshakeError::NotWebsocket));
    }

    #[test]
    fn test_wrong_version_rejected_with_version_header() {
        let request = HttpRequest::new(
            "GET",
            "/debugger",
            [
                ("Upgrade".to_string(), "websocket".to_string()),
                ("Connection".to_string(), "Upgrade".to_string()),
                ("Sec-WebSocket-Version".to_string(), "8".to_string()),
                ("Sec-WebSocket-Key".to_string(), SAMPLE_KEY.to_string()),
            ],
        );
        let mut output = CaptureOutput::new();

        let error = accept_upgrade_with_config(
            &request,
            (),
            ScriptInput::new(),
            &mut output,
            crate::SessionConfig::default(),
        )
        .expect_err("reject");

        assert_eq!(
            error,
            HandshakeError::UnsupportedVersion(Some("8".to_string()))
        );
        let text = String::from_utf8(output.bytes().to_vec()).expect("utf8");
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.ends_with("Unsupported version."));
    }

    #[test]
    fn test_missing_key_rejected() {
        let request = without_header("sec-websocket-key");
        let mut output = CaptureOutput::new();

        let error = accept_upgrade_with_config(
            &request,
            (),
            ScriptInput::new(),
            &mut output,
            crate::SessionConfig::default(),
        )
        .expect_err("reject");

        assert_eq!(error, HandshakeError::MissingKey);
        let text = String::from_utf8(output.bytes().to_vec()).expect("utf8");
        assert!(text.ends_with("Cannot accept without key."));
    }

    #[test]
    fn test_empty_key_rejected() {
        let request = HttpRequest::new(
            "GET",
            "/debugger",
            [
                ("Upgrade".to_string(), "websocket".to_string()),
                ("Connection".to_string(), "Upgrade".to_string()),
                ("Sec-WebSocket-Version".to_string(), "13".to_string()),
                ("Sec-WebSocket-Key".to_string(), String::new()),
            ],
        );
        assert_eq!(validate_upgrade(&request), Err(HandshakeError::MissingKey));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            HttpRequest::parse(&[0xFF, 0xFE]),
            Err(HandshakeError::InvalidRequest(_))
        ));
        assert!(matches!(
            HttpRequest::parse(b"GET\r\n\r\n"),
            Err(HandshakeError::InvalidRequest(_))
        ));
    }
}
