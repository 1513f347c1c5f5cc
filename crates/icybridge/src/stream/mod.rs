//! Upstream stream handling
//!
//! Connects to ICY (Icecast/Shoutcast) sources, parses the handshake
//! headers, de-frames embedded metadata, and buffers the audio bytes for
//! the relay copy loop through a metadata-multiplexing ring buffer.

use std::time::Duration;

use crate::config::buffer::POLL_INTERVAL_MS;

pub mod buffer;
pub mod metadata;
pub mod ring;
pub mod upstream;

pub use buffer::StreamBuffer;
pub use ring::RingBuffer;
pub use upstream::IcySource;

/// Sleep one cooperative backpressure interval.
///
/// Both the reader thread (buffer full) and the relay copy loop (buffer
/// empty) poll with this fixed delay instead of blocking.
pub(crate) fn poll_wait() {
    std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
}
