//! Downstream relay
//!
//! The per-request handler, the HTTP framing it speaks to clients, and
//! the service host that dispatches one handler thread per connection.

pub mod handler;
pub mod http;
pub mod server;

pub use handler::{handle_request, ClientRequest, ClientResponse, RelayOutcome};
pub use http::{HttpRequest, HttpResponse};
pub use server::{RelayConfig, RelayEvent, RelayServer};
