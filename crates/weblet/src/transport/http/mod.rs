//! HTTP front end: one relay handler served on a listener owned by the layer.

mod routes;
mod server;

pub use routes::{CONTENT_TYPE, SERVED_BY, SERVED_BY_HEADER, routes};
pub use server::serve_listener;
