/// The RPC Client: one TCP connection per call, manual HTTP/1.1 framing
/// around an XML-RPC body, independent connect/send/recv timeouts.
///
/// The connect-then-write-then-read shape is adapted from the teacher's
/// `Handler::handle_request` in `server.rs` (`TcpStream::connect`, `write`,
/// `read`/`peek` against a raw socket) — generalized from "peek a fixed buffer
/// once" to "read until the peer closes", since our backend always sets
/// `Connection: close` and we can't assume the whole body arrives in one
/// `read`.
use crate::backend::Backend;
use crate::error::RlbError;
use crate::logging::{LogSink, NoopSink};
use crate::wire::{build_convert_call, build_ping_call, decode_method_response, encode_method_call, Value};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertMode {
    Stream,
    FilePath,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConvertOutcome {
    /// Raw base64 text from the response; decoding is the caller's job.
    Stream(String),
    /// The `outputPath` the backend acknowledged writing to.
    FilePath(String),
}

pub struct RpcClient {
    connect_timeout: Duration,
    send_timeout: Duration,
    recv_timeout: Duration,
    /// Probe method name used by `ping`. XML-RPC converters in this family
    /// expose both `info` and `ping`; this client standardizes on `info`.
    ping_method: &'static str,
    log: Arc<dyn LogSink>,
}

impl RpcClient {
    pub fn new(connect_timeout: Duration, send_timeout: Duration, recv_timeout: Duration) -> RpcClient {
        RpcClient {
            connect_timeout,
            send_timeout,
            recv_timeout,
            ping_method: "info",
            log: Arc::new(NoopSink),
        }
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub async fn convert(
        &self,
        backend: &Backend,
        input_path: Option<&str>,
        input_bytes: Option<&[u8]>,
        output_format: &str,
        output_path: Option<&str>,
        mode: ConvertMode,
    ) -> Result<ConvertOutcome, RlbError> {
        let call = match mode {
            ConvertMode::Stream => {
                let bytes = input_bytes
                    .ok_or_else(|| RlbError::InvalidArgument("stream mode requires input_bytes".into()))?;
                let encoded = BASE64.encode(bytes);
                build_convert_call(None, Some(&encoded), None, output_format)
            }
            ConvertMode::FilePath => {
                let in_path = input_path
                    .ok_or_else(|| RlbError::InvalidArgument("file-path mode requires input_path".into()))?;
                let out_path = output_path
                    .ok_or_else(|| RlbError::InvalidArgument("file-path mode requires output_path".into()))?;
                build_convert_call(Some(in_path), None, Some(out_path), output_format)
            }
        };

        let body = encode_method_call(&call);
        let raw = self.round_trip(backend, &body).await?;
        let value = decode_method_response(&raw)?;

        match mode {
            ConvertMode::Stream => {
                let text = value
                    .as_base64()
                    .ok_or_else(|| RlbError::MalformedResponse("stream response missing base64 value".into()))?;
                Ok(ConvertOutcome::Stream(text.to_string()))
            }
            ConvertMode::FilePath => Ok(ConvertOutcome::FilePath(output_path.unwrap().to_string())),
        }
    }

    /// Never propagates: any connect/IO/timeout/parse/fault failure collapses
    /// to `false`. The Health Monitor only cares about a boolean outcome.
    pub async fn ping(&self, backend: &Backend) -> bool {
        let call = build_ping_call(self.ping_method);
        let body = encode_method_call(&call);
        match self.round_trip(backend, &body).await {
            Ok(raw) => status_line_is_ok(&raw) && decode_method_response(&raw).is_ok(),
            Err(e) => {
                self.log.debug(None, &format!("ping failed: {}", e));
                false
            }
        }
    }

    pub async fn get_supported_formats(&self, backend: &Backend) -> Result<Value, RlbError> {
        let call = build_ping_call("getSupportedFormats");
        let body = encode_method_call(&call);
        let raw = self.round_trip(backend, &body).await?;
        decode_method_response(&raw)
    }

    async fn round_trip(&self, backend: &Backend, body: &str) -> Result<String, RlbError> {
        let addr = format!("{}:{}", backend.host, backend.port);
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RlbError::Timeout)?
            .map_err(RlbError::ConnectFailure)?;

        let request = build_http_request(&backend.host_header(), body);
        tokio::time::timeout(self.send_timeout, stream.write_all(&request))
            .await
            .map_err(|_| RlbError::Timeout)?
            .map_err(RlbError::SendFailure)?;

        let mut response = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = tokio::time::timeout(self.recv_timeout, stream.read(&mut chunk))
                .await
                .map_err(|_| RlbError::Timeout)?
                .map_err(RlbError::RecvFailure)?;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&chunk[..n]);
        }

        if response.is_empty() {
            return Err(RlbError::MalformedResponse("empty response from backend".into()));
        }
        String::from_utf8(response).map_err(|e| RlbError::MalformedResponse(e.to_string()))
    }
}

/// Whether the HTTP status line (the first line up to `\r\n`) reports success.
/// Checked against just that line, not the whole response, so a fault body
/// whose XML happens to contain the literal text `200 OK` can't be mistaken
/// for a healthy ping.
fn status_line_is_ok(raw: &str) -> bool {
    raw.split("\r\n").next().unwrap_or("").contains("200 OK")
}

/// Build the raw HTTP/1.1 POST request bytes: fixed headers per the wire
/// protocol (`Host`, `Content-Type: text/xml`, `Content-Length`,
/// `Connection: close`), no pipelining, one connection per call.
fn build_http_request(host_header: &str, body: &str) -> Vec<u8> {
    format!(
        "POST / HTTP/1.1\r\nHost: {}\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        host_header,
        body.len(),
        body
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_has_correct_content_length() {
        let req = build_http_request("127.0.0.1:2003", "<?xml?>hello");
        let text = String::from_utf8(req).unwrap();
        assert!(text.contains("Content-Length: 12"));
        assert!(text.contains("Connection: close"));
        assert!(text.ends_with("<?xml?>hello"));
    }

    #[test]
    fn status_line_ok_checks_only_the_first_line() {
        let ok = "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\n\r\n<x/>";
        assert!(status_line_is_ok(ok));

        let not_ok = "HTTP/1.1 500 Internal Server Error\r\n\r\n<string>200 OK</string>";
        assert!(!status_line_is_ok(not_ok));
    }
}
