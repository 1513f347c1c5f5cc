//! Relay service host
//!
//! Owns the listening socket and the dispatcher: one accept thread, one
//! handler thread per client connection. Lifecycle is reported through a
//! bounded channel of typed events instead of callbacks, and the server
//! handle returned from [`RelayServer::start`] is what the host passes
//! back to stop the service.

use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info};

use crate::config::network::{REQUEST_TIMEOUT_SECS, WRITE_TIMEOUT_SECS};
use crate::config::server::{DEFAULT_BIND_ADDR, EVENT_CHANNEL_BOUND};
use crate::error::Result;
use crate::relay::handler::{handle_request, ClientResponse, RelayOutcome};
use crate::relay::http::{HttpRequest, HttpResponse};

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: String,
    /// How long a connected client may take to send its request before
    /// the connection is dropped
    pub request_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Lifecycle and activity notifications for the host process.
///
/// Delivered best-effort over a bounded channel; events are dropped when
/// the host does not drain them.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Started(SocketAddr),
    Stopped,
    ClientConnected(SocketAddr),
    ClientClosed(SocketAddr, RelayOutcome),
    /// An upstream connect or handshake failed for a client request
    UpstreamFailed { url: String, error: String },
    /// The upstream announced a new metadata block
    MetadataChanged(String),
}

/// Handle to a running relay service.
pub struct RelayServer {
    local_addr: SocketAddr,
    stop_flag: Arc<AtomicBool>,
    accept_handle: Option<thread::JoinHandle<()>>,
}

impl RelayServer {
    /// Bind the listener and start accepting clients.
    ///
    /// Returns the server handle and the lifecycle event receiver.
    pub fn start(config: RelayConfig) -> Result<(Self, Receiver<RelayEvent>)> {
        let listener = TcpListener::bind(&config.bind_addr)?;
        let local_addr = listener.local_addr()?;

        let (event_tx, event_rx) = bounded(EVENT_CHANNEL_BOUND);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let _ = event_tx.try_send(RelayEvent::Started(local_addr));
        info!(%local_addr, "relay server started");

        let accept_stop = stop_flag.clone();
        let request_timeout = config.request_timeout;
        let accept_handle = thread::Builder::new()
            .name("relay-accept".to_string())
            .spawn(move || accept_loop(listener, accept_stop, event_tx, request_timeout))?;

        Ok((
            Self {
                local_addr,
                stop_flag,
                accept_handle: Some(accept_handle),
            },
            event_rx,
        ))
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting clients and join the accept thread.
    ///
    /// In-flight relay threads are not interrupted; they end when their
    /// client or upstream disconnects.
    pub fn stop(&mut self) {
        if !self.stop_flag.swap(true, Ordering::SeqCst) {
            // Wake the accept loop with a throwaway connection
            let mut addr = self.local_addr;
            match addr.ip() {
                IpAddr::V4(ip) if ip.is_unspecified() => {
                    addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
                }
                IpAddr::V6(ip) if ip.is_unspecified() => {
                    addr.set_ip(IpAddr::V6(Ipv6Addr::LOCALHOST))
                }
                _ => {}
            }
            let _ = TcpStream::connect_timeout(&addr, Duration::from_millis(250));
        }

        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        info!("relay server stopped");
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    stop_flag: Arc<AtomicBool>,
    events: Sender<RelayEvent>,
    request_timeout: Duration,
) {
    for connection in listener.incoming() {
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        match connection {
            Ok(socket) => {
                let events = events.clone();
                let spawned = thread::Builder::new()
                    .name("relay-client".to_string())
                    .spawn(move || handle_client(socket, events, request_timeout));
                if let Err(e) = spawned {
                    debug!(error = %e, "could not spawn relay thread");
                }
            }
            Err(e) => {
                debug!(error = %e, "accept failed");
            }
        }
    }

    let _ = events.try_send(RelayEvent::Stopped);
}

fn handle_client(socket: TcpStream, events: Sender<RelayEvent>, request_timeout: Duration) {
    let Ok(peer) = socket.peer_addr() else { return };
    let _ = events.try_send(RelayEvent::ClientConnected(peer));
    debug!(%peer, "client connected");

    // A silent or stalled client eventually errors out of the request
    // parse or the copy loop instead of wedging the relay thread
    let _ = socket.set_read_timeout(Some(request_timeout));
    let _ = socket.set_write_timeout(Some(Duration::from_secs(WRITE_TIMEOUT_SECS)));

    let reader_socket = match socket.try_clone() {
        Ok(clone) => clone,
        Err(e) => {
            debug!(%peer, error = %e, "could not clone client socket");
            return;
        }
    };
    let mut reader = BufReader::new(reader_socket);
    let mut response = HttpResponse::new(socket);

    let outcome = match HttpRequest::parse(&mut reader) {
        Ok(request) => handle_request(&request, &mut response, &events),
        Err(e) => {
            debug!(%peer, error = %e, "rejecting malformed request");
            let _ = response.send_status(400, &[]);
            RelayOutcome::BadRequest
        }
    };

    debug!(%peer, ?outcome, "client closed");
    let _ = events.try_send(RelayEvent::ClientClosed(peer, outcome));
}
