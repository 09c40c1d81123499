//! Transport layer for weblet.
//!
//! Currently provides the HTTP front end via axum.

pub mod http;

pub use http::{CONTENT_TYPE, SERVED_BY, SERVED_BY_HEADER, routes, serve_listener};
