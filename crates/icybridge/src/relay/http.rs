//! Minimal HTTP framing for the downstream side
//!
//! The relay speaks plain HTTP/1.0 with an unbuffered body, which is all
//! ICY clients expect; responses may also carry non-standard headers like
//! `Icy-Metaint`, so the framing stays hand-rolled next to the upstream
//! handshake rather than behind an HTTP server crate.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use crate::config::network::MAX_HEADER_LINES;
use crate::error::{BridgeError, Result};
use crate::relay::handler::{ClientRequest, ClientResponse};

/// A parsed downstream GET request.
#[derive(Debug)]
pub struct HttpRequest {
    path: String,
    /// Decoded query parameters, first occurrence wins
    query: HashMap<String, String>,
    /// Header map keyed by lowercased name, first occurrence wins
    headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Parse the request line and headers from a client connection.
    pub fn parse<R: BufRead>(reader: &mut R) -> Result<Self> {
        let request_line = read_line(reader)?;
        let mut parts = request_line.split_whitespace();
        let (method, target) = match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(target), Some(_version)) => (method, target),
            _ => {
                return Err(BridgeError::Http(format!(
                    "malformed request line [{request_line}]"
                )))
            }
        };
        if !method.eq_ignore_ascii_case("GET") {
            return Err(BridgeError::Http(format!("unsupported method {method}")));
        }

        let (path, raw_query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        let mut query = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
            query.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }

        let mut headers = HashMap::new();
        for _ in 0..MAX_HEADER_LINES {
            let line = read_line(reader)?;
            if line.is_empty() {
                return Ok(Self {
                    path: path.to_string(),
                    query,
                    headers,
                });
            }
            if let Some((key, value)) = line.split_once(':') {
                headers
                    .entry(key.trim().to_ascii_lowercase())
                    .or_insert_with(|| value.trim().to_string());
            }
        }

        Err(BridgeError::Http("too many request headers".to_string()))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ClientRequest for HttpRequest {
    fn query_param(&self, name: &str) -> Option<String> {
        self.query.get(name).cloned()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Err(BridgeError::Http(
            "connection closed during request".to_string(),
        ));
    }
    let line = String::from_utf8_lossy(&raw);
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Streamed HTTP/1.0 response writer.
pub struct HttpResponse<W: Write> {
    writer: W,
    connected: bool,
}

impl<W: Write> HttpResponse<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            connected: true,
        }
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

impl<W: Write> ClientResponse for HttpResponse<W> {
    fn send_status(&mut self, status: u16, headers: &[(String, String)]) -> io::Result<()> {
        let mut head = format!("HTTP/1.0 {} {}\r\n", status, reason_phrase(status));
        for (key, value) in headers {
            head.push_str(key);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let result = self
            .writer
            .write_all(head.as_bytes())
            .and_then(|()| self.writer.flush());
        if result.is_err() {
            self.connected = false;
        }
        result
    }

    fn write_body(&mut self, data: &[u8]) -> io::Result<()> {
        // Unbuffered: every chunk is flushed straight to the socket
        let result = self
            .writer
            .write_all(data)
            .and_then(|()| self.writer.flush());
        if result.is_err() {
            self.connected = false;
        }
        result
    }

    fn is_client_connected(&self) -> bool {
        self.connected
    }
}
