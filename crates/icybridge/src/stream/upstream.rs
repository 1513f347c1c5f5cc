//! Upstream ICY source connector
//!
//! Opens a raw TCP connection to the source, performs the HTTP/ICY
//! handshake, and spawns a background thread that reads the audio stream
//! into a [`StreamBuffer`], de-framing embedded metadata along the way.
//!
//! The handshake is hand-framed on purpose: SHOUTcast-style servers answer
//! with non-standard `ICY 200 OK` status lines that HTTP client libraries
//! reject, and the body framing (`Icy-Metaint`) lives outside HTTP.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use url::Url;

use crate::config::buffer::{READ_CHUNK_SIZE, STREAM_BUFFER_SIZE};
use crate::config::network::{
    CONNECT_TIMEOUT_SECS, DEFAULT_PORT, HANDSHAKE_TIMEOUT_SECS, MAX_HEADER_LINES, READ_TIMEOUT_MS,
};
use crate::error::{BridgeError, Result};
use crate::stream::buffer::StreamBuffer;
use crate::stream::metadata::decode_metadata;
use crate::stream::poll_wait;

/// A connected upstream audio session.
///
/// Only exists in the connected state: [`IcySource::connect`] performs the
/// whole handshake before returning, so every accessor is valid for the
/// lifetime of the value. Dropping the source signals the reader thread,
/// joins it, and only then releases the socket.
pub struct IcySource {
    buffer: Arc<StreamBuffer>,
    headers: HashMap<String, String>,
    content_type: Option<String>,
    /// Source-declared interval; 0 when the source embeds no metadata
    metadata_interval: usize,
    connected: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IcySource {
    /// Connect to the source URL and start buffering in the background.
    ///
    /// `request_metadata` controls whether `Icy-Metadata: 1` is sent
    /// upstream; the effective embedding decision is
    /// `request_metadata && metadata_interval > 0` once the handshake
    /// headers are known. Returns the source and a channel receiving each
    /// decoded metadata update.
    pub fn connect(url: &str, request_metadata: bool) -> Result<(Self, Receiver<String>)> {
        let uri = Url::parse(url).map_err(|e| BridgeError::InvalidUrl(format!("{url}: {e}")))?;
        let host = uri
            .host_str()
            .ok_or_else(|| BridgeError::InvalidUrl(format!("{url}: no host")))?;
        let port = uri.port_or_known_default().unwrap_or(DEFAULT_PORT);

        let stream = connect_tcp(host, port)?;
        stream.set_read_timeout(Some(Duration::from_secs(HANDSHAKE_TIMEOUT_SECS)))?;

        let mut request = format!("GET {} HTTP/1.0\r\n", uri.path());
        if request_metadata {
            request.push_str("Icy-Metadata:1\r\n");
        }
        request.push_str("\r\n");
        (&stream).write_all(request.as_bytes())?;

        let mut reader = BufReader::new(stream);

        // The first line must end in "200 OK"; this accepts both
        // "HTTP/1.x 200 OK" and the ICY-server "ICY 200 OK" form
        let status = read_header_line(&mut reader)?;
        if !status.ends_with("200 OK") {
            return Err(BridgeError::Protocol(format!(
                "invalid response [{status}] received from server"
            )));
        }

        let (headers, content_type, metadata_interval) = parse_headers(&mut reader)?;

        let embed = request_metadata && metadata_interval > 0;
        let buffer = Arc::new(StreamBuffer::new(STREAM_BUFFER_SIZE, embed));
        let (metadata_tx, metadata_rx) = unbounded::<String>();

        // Short read timeout from here on so the loop observes its stop flag
        reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)))?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(true));

        let thread_buffer = buffer.clone();
        let thread_stop = stop_flag.clone();
        let thread_connected = connected.clone();
        let handle = thread::Builder::new()
            .name("icy-upstream-reader".to_string())
            .spawn(move || {
                reader_main(
                    reader,
                    metadata_interval,
                    thread_buffer,
                    metadata_tx,
                    thread_stop,
                    thread_connected,
                );
            })?;

        Ok((
            Self {
                buffer,
                headers,
                content_type,
                metadata_interval,
                connected,
                stop_flag,
                handle: Some(handle),
            },
            metadata_rx,
        ))
    }

    /// Read buffered stream bytes; zero means "nothing buffered yet".
    pub fn read(&self, dst: &mut [u8]) -> usize {
        self.buffer.read(dst)
    }

    /// Content type declared by the source, defaulting to `audio/mpeg`.
    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or("audio/mpeg")
    }

    /// Whether the source stream carries embedded metadata.
    pub fn has_metadata(&self) -> bool {
        self.metadata_interval > 0
    }

    /// Source-declared metadata interval; 0 when absent.
    pub fn metadata_interval(&self) -> usize {
        self.metadata_interval
    }

    /// Interval of metadata frames in the relayed output; 0 when the
    /// session does not embed metadata.
    pub fn embedded_interval(&self) -> usize {
        self.buffer.metadata_interval()
    }

    /// Response headers not consumed by the handshake, as a copy.
    pub fn headers(&self) -> HashMap<String, String> {
        self.headers.clone()
    }

    /// Whether the upstream socket is still live. Turns false once the
    /// reader thread exits for any reason.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for IcySource {
    fn drop(&mut self) {
        // Signal-then-join before the socket is released by the thread
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let timeout = Duration::from_secs(CONNECT_TIMEOUT_SECS);
    let mut last_err: Option<io::Error> = None;

    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(match last_err {
        Some(e) => BridgeError::Io(e),
        None => BridgeError::InvalidUrl(format!("no addresses for {host}:{port}")),
    })
}

/// Read one CRLF-terminated header line, tolerating non-UTF-8 bytes.
fn read_header_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Err(BridgeError::Protocol(
            "connection closed during headers".to_string(),
        ));
    }
    let line = String::from_utf8_lossy(&raw);
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

type ParsedHeaders = (HashMap<String, String>, Option<String>, usize);

/// Parse `Key: Value` lines until the blank line, consuming the two
/// special keys and storing everything else (first occurrence wins).
fn parse_headers<R: BufRead>(reader: &mut R) -> Result<ParsedHeaders> {
    let mut headers = HashMap::new();
    let mut content_type = None;
    let mut metadata_interval = 0usize;

    for _ in 0..MAX_HEADER_LINES {
        let line = read_header_line(reader)?;
        if line.is_empty() {
            return Ok((headers, content_type, metadata_interval));
        }

        let Some(colon) = line.find(':') else { continue };
        if colon == 0 || colon + 1 >= line.len() {
            continue;
        }
        let key = &line[..colon];
        let value = line[colon + 1..].trim_start();

        if key.eq_ignore_ascii_case("icy-metaint") {
            metadata_interval = value.trim().parse::<usize>().map_err(|_| {
                BridgeError::Protocol(format!("invalid Icy-Metaint value [{value}]"))
            })?;
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        } else {
            headers
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    Err(BridgeError::Protocol("too many response headers".to_string()))
}

fn reader_main(
    stream: BufReader<TcpStream>,
    metadata_interval: usize,
    buffer: Arc<StreamBuffer>,
    metadata_tx: Sender<String>,
    stop_flag: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
) {
    let result = if metadata_interval > 0 {
        run_metadata_stream(stream, metadata_interval, &buffer, &metadata_tx, &stop_flag)
    } else {
        run_raw_stream(stream, &buffer, &stop_flag)
    };

    // Errors end the session; the client just sees the stream end
    if let Err(e) = result {
        tracing::debug!(error = %e, "upstream reader exited");
    }

    connected.store(false, Ordering::SeqCst);
    // The socket is released here, after the loop has fully stopped
}

/// Buffer a stream without embedded metadata.
fn run_raw_stream(
    mut stream: BufReader<TcpStream>,
    buffer: &StreamBuffer,
    stop_flag: &AtomicBool,
) -> Result<()> {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    while !stop_flag.load(Ordering::SeqCst) {
        let available = buffer.available();
        if available == 0 {
            poll_wait();
            continue;
        }

        let max_read = READ_CHUNK_SIZE.min(available);
        match stream.read(&mut chunk[..max_read]) {
            Ok(0) => return Ok(()), // EOF
            Ok(n) => {
                if !write_to_buffer(buffer, &chunk[..n], stop_flag) {
                    return Ok(());
                }
            }
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Buffer a stream with embedded metadata, de-framing at each source
/// interval boundary.
fn run_metadata_stream(
    mut stream: BufReader<TcpStream>,
    metadata_interval: usize,
    buffer: &StreamBuffer,
    metadata_tx: &Sender<String>,
    stop_flag: &AtomicBool,
) -> Result<()> {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut metacount = metadata_interval;

    while !stop_flag.load(Ordering::SeqCst) {
        let available = buffer.available();
        if available == 0 {
            poll_wait();
            continue;
        }

        // Read up to one chunk, never crossing the metadata boundary
        let max_read = READ_CHUNK_SIZE.min(available).min(metacount);
        let n = match stream.read(&mut chunk[..max_read]) {
            Ok(0) => return Ok(()), // EOF
            Ok(n) => n,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(e.into()),
        };

        if !write_to_buffer(buffer, &chunk[..n], stop_flag) {
            return Ok(());
        }

        metacount -= n;
        if metacount == 0 {
            if !process_metadata(&mut stream, buffer, metadata_tx, stop_flag)? {
                return Ok(());
            }
            metacount = metadata_interval;
        }
    }
    Ok(())
}

/// De-frame one metadata block at the current boundary.
///
/// Returns `Ok(false)` when the stop flag interrupted the read.
fn process_metadata(
    stream: &mut BufReader<TcpStream>,
    buffer: &StreamBuffer,
    metadata_tx: &Sender<String>,
    stop_flag: &AtomicBool,
) -> Result<bool> {
    let mut length = [0u8; 1];
    if !read_full(stream, &mut length, stop_flag)? {
        return Ok(false);
    }

    // Zero length byte: no metadata change this cycle
    if length[0] == 0 {
        return Ok(true);
    }

    let mut block = vec![0u8; length[0] as usize * 16];
    if !read_full(stream, &mut block, stop_flag)? {
        return Ok(false);
    }

    let text = decode_metadata(&block);
    tracing::trace!(metadata = %text, "upstream metadata update");
    buffer.set_metadata(&text);
    let _ = metadata_tx.send(text);
    Ok(true)
}

/// Push a fully read chunk into the buffer, retrying on backpressure.
///
/// Returns false when the stop flag was raised before completion.
fn write_to_buffer(buffer: &StreamBuffer, mut data: &[u8], stop_flag: &AtomicBool) -> bool {
    while !data.is_empty() {
        if stop_flag.load(Ordering::SeqCst) {
            return false;
        }
        let written = buffer.write(data);
        if written == 0 {
            poll_wait();
            continue;
        }
        data = &data[written..];
    }
    true
}

/// Fill `buf` completely, looping over short reads and timeouts.
///
/// Returns `Ok(false)` when interrupted by the stop flag.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8], stop_flag: &AtomicBool) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        if stop_flag.load(Ordering::SeqCst) {
            return Ok(false);
        }
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(BridgeError::Protocol(
                    "connection closed inside a metadata frame".to_string(),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
