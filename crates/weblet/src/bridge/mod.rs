//! Bridge between the HTTP layer and the destination processor.
//!
//! # Architecture
//!
//! - **protocol**: Request/Reply message types and their JSON encoding
//! - **transport**: Length-prefixed socket transport and the `Forwarder` seam

pub mod protocol;
pub mod transport;
