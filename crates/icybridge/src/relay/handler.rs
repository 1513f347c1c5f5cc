//! Per-request relay orchestration
//!
//! Invoked once per downstream request by the dispatcher: negotiates
//! metadata with both sides, connects the upstream source, and drives the
//! copy loop from the stream buffer to the client response channel.

use std::io;

use crossbeam_channel::Sender;
use tracing::{debug, trace, warn};

use crate::config::buffer::READ_CHUNK_SIZE;
use crate::relay::server::RelayEvent;
use crate::stream::metadata::parse_stream_title;
use crate::stream::poll_wait;
use crate::stream::upstream::IcySource;

/// Downstream request surface supplied by the dispatcher.
pub trait ClientRequest {
    fn query_param(&self, name: &str) -> Option<String>;
    fn header(&self, name: &str) -> Option<String>;
}

/// Downstream response surface supplied by the dispatcher.
pub trait ClientResponse {
    /// Send the status line and headers; called at most once.
    fn send_status(&mut self, status: u16, headers: &[(String, String)]) -> io::Result<()>;
    /// Write unbuffered body bytes.
    fn write_body(&mut self, data: &[u8]) -> io::Result<()>;
    /// Whether the client connection is still live.
    fn is_client_connected(&self) -> bool;
}

/// How a relay request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Missing `streamurl` query parameter; no upstream contact was made
    BadRequest,
    /// Upstream connect or handshake failed
    UpstreamUnavailable,
    /// The stream ran until one side disconnected
    Completed { bytes_relayed: u64 },
}

/// Relay one client request end to end.
///
/// Client-side write failures are not errors: the client hanging up is the
/// normal way a relay ends, so they terminate the copy loop quietly.
/// Upstream failures and metadata updates are reported to the host over
/// `events`, best-effort.
pub fn handle_request<Q, R>(
    request: &Q,
    response: &mut R,
    events: &Sender<RelayEvent>,
) -> RelayOutcome
where
    Q: ClientRequest,
    R: ClientResponse,
{
    let Some(source_url) = request.query_param("streamurl") else {
        let _ = response.send_status(400, &[]);
        return RelayOutcome::BadRequest;
    };

    // The client opts into metadata with "Icy-Metadata: 1"
    let want_metadata = request
        .header("Icy-Metadata")
        .map(|v| v.trim() == "1")
        .unwrap_or(false);

    let (source, metadata_rx) = match IcySource::connect(&source_url, want_metadata) {
        Ok(connected) => connected,
        Err(e) => {
            warn!(url = %source_url, error = %e, "upstream connect failed");
            let _ = events.try_send(RelayEvent::UpstreamFailed {
                url: source_url,
                error: e.to_string(),
            });
            let _ = response.send_status(503, &[]);
            return RelayOutcome::UpstreamUnavailable;
        }
    };

    // Zero when the upstream had no metadata to forward, whatever the
    // client asked for
    let interval = source.embedded_interval();

    let mut headers: Vec<(String, String)> = source
        .headers()
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();
    headers.push(("Content-Type".to_string(), source.content_type().to_string()));
    if interval > 0 {
        // Must equal the interval the buffer actually frames at
        headers.push(("Icy-Metaint".to_string(), interval.to_string()));
    }

    if response.send_status(200, &headers).is_err() {
        return RelayOutcome::Completed { bytes_relayed: 0 };
    }

    let mut bytes_relayed = 0u64;
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        if !response.is_client_connected() {
            break;
        }

        while let Ok(update) = metadata_rx.try_recv() {
            match parse_stream_title(&update) {
                Some(title) => debug!(%title, "now playing"),
                None => trace!(metadata = %update, "metadata update"),
            }
            let _ = events.try_send(RelayEvent::MetadataChanged(update));
        }

        let n = source.read(&mut chunk);
        if n == 0 {
            // Drain fully before giving up on a dead upstream
            if !source.is_connected() {
                break;
            }
            poll_wait();
            continue;
        }

        if response.write_body(&chunk[..n]).is_err() {
            debug!("client disconnected mid-stream");
            break;
        }
        bytes_relayed += n as u64;
    }

    RelayOutcome::Completed { bytes_relayed }
}
