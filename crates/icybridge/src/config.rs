//! Configuration constants for the relay engine

/// Stream buffer configuration
pub mod buffer {
    /// Size of the per-session stream buffer (bytes)
    pub const STREAM_BUFFER_SIZE: usize = 256 * 1024;

    /// Interval at which metadata frames are inserted into the output stream (bytes)
    pub const METADATA_INTERVAL: usize = 8192;

    /// Metadata blocks are null-padded to a multiple of this size (bytes)
    pub const METADATA_ALIGNMENT: usize = 16;

    /// Chunk size for socket reads and relay copy operations (bytes)
    pub const READ_CHUNK_SIZE: usize = 4096;

    /// Sleep interval when the buffer is full or empty (milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 50;
}

/// Network-related configuration
pub mod network {
    /// Upstream TCP connect timeout in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// Socket read timeout during the upstream handshake in seconds
    pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

    /// Socket read timeout for the background reader loop in milliseconds.
    /// Short enough that the thread observes its stop flag promptly.
    pub const READ_TIMEOUT_MS: u64 = 1000;

    /// Client response write timeout in seconds
    pub const WRITE_TIMEOUT_SECS: u64 = 30;

    /// How long a connected client may take to send its request, in seconds
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;

    /// Maximum number of header lines accepted on either HTTP side
    pub const MAX_HEADER_LINES: usize = 128;

    /// Default port when the source URL carries none
    pub const DEFAULT_PORT: u16 = 80;
}

/// Relay server configuration
pub mod server {
    /// Bound of the lifecycle event channel; events are dropped when the
    /// host does not drain them fast enough
    pub const EVENT_CHANNEL_BOUND: usize = 64;

    /// Default bind address for the relay server
    pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8890";
}
