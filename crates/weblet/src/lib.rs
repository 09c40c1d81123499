//! weblet: HTTP gateway layer for a managed handler.
//!
//! Accepts JSON requests over HTTP POST, forwards them to a single destination
//! over a framed socket and relays the reply. The listener can be started and
//! stopped at runtime through the control commands in [`control`].

pub mod bridge;
pub mod config;
pub mod control;
pub mod layer;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bridge::protocol::{CodecError, Parameters, Reply, Request};
pub use bridge::transport::{Destination, Endpoint, Forwarder, SocketForwarder, TransportError};
pub use config::{ConfigError, LayerConfig};
pub use control::{ControlSurface, HandlerStatus, Part, PartError};
pub use layer::{Layer, LayerError, LayerState, LayerStatus};

/// weblet version from Cargo.toml
pub const WEBLET_VERSION: &str = env!("CARGO_PKG_VERSION");
