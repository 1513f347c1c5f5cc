//! Icybridge — ICY/SHOUTcast relay bridge
//!
//! Relays a remote ICY/SHOUTcast audio broadcast to one HTTP client per
//! incoming request, optionally stripping and re-inserting the embedded
//! "now playing" metadata at a different framing interval than the source.
//!
//! ## Quick start
//!
//! ```no_run
//! use icybridge::relay::{RelayConfig, RelayServer};
//!
//! let (_server, _events) = RelayServer::start(RelayConfig::default()).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod relay;
pub mod stream;
