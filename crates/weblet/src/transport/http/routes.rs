//! HTTP relay handler.
//!
//! Every request, whatever its path, goes through the same steps and stops at
//! the first failure:
//! 1. POST only (405)
//! 2. non-empty body (400)
//! 3. body decodes as a Request (403)
//! 4. first hop gets a correlation id
//! 5. forward to the destination (403 on transport error)
//! 6. reply decodes (403)
//! 7. 200 for an ok reply, 403 otherwise
//!
//! Every response body is an encoded Reply.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    http::{HeaderName, Method, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::bridge::protocol::{Reply, decode_reply, decode_request, encode};
use crate::bridge::transport::Forwarder;

pub const CONTENT_TYPE: &str = "json/application; charset=utf8";
pub const SERVED_BY_HEADER: &str = "x-served-by";
pub const SERVED_BY: &str = concat!("weblet/", env!("CARGO_PKG_VERSION"));

/// Written when even the failure reply cannot be encoded.
const INTERNAL_FAILURE: &[u8] = br#"{"ok":false,"message":"internal error"}"#;

#[derive(Clone)]
struct RelayState {
    forwarder: Arc<dyn Forwarder>,
}

async fn relay(
    State(state): State<RelayState>,
    method: Method,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if method != Method::POST {
        return failure(StatusCode::METHOD_NOT_ALLOWED, "only POST method allowed");
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => return failure(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    if body.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "empty body");
    }

    let mut request = match decode_request(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Rejecting undecodable request");
            return failure(StatusCode::FORBIDDEN, e.to_string());
        }
    };

    if request.mark_first_hop() {
        tracing::trace!(command = %request.command, id = ?request.id, "Assigned correlation id");
    }

    let encoded = match encode(&request) {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::error!(command = %request.command, error = %e, "Failed to encode request");
            return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let raw = match state.forwarder.send(Bytes::from(encoded)).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(command = %request.command, error = %e, "Destination request failed");
            return failure(StatusCode::FORBIDDEN, e.to_string());
        }
    };

    let reply = match decode_reply(&raw) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(command = %request.command, error = %e, "Undecodable destination reply");
            return failure(
                StatusCode::FORBIDDEN,
                format!("failed to decode server data: {}", e),
            );
        }
    };

    let status = if reply.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    tracing::debug!(command = %request.command, status = status.as_u16(), "Relayed request");
    respond(status, &reply)
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    respond(status, &Reply::fail(message))
}

fn respond(status: StatusCode, reply: &Reply) -> Response {
    match encode(reply) {
        Ok(body) => envelope(status, body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode reply");
            envelope(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_FAILURE.to_vec())
        }
    }
}

fn envelope(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (HeaderName::from_static(SERVED_BY_HEADER), SERVED_BY),
        ],
        body,
    )
        .into_response()
}

/// Router sending every path to the relay handler.
pub fn routes(forwarder: Arc<dyn Forwarder>, body_limit: usize) -> Router {
    Router::new()
        .fallback(relay)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(RelayState { forwarder })
}
