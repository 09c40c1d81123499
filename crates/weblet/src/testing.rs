//! In-process destination backends for tests.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::bytes::Bytes;
use tokio_util::codec::Framed;

use crate::bridge::protocol::{Parameters, Reply, decode_request, encode};
use crate::bridge::transport::{Destination, Endpoint, frame_codec};

/// Reply with `Ok({"command": .., "uuid": ..})` echoing the request.
pub(crate) fn echo(frame: &[u8]) -> Reply {
    match decode_request(frame) {
        Ok(request) => {
            let mut parameters = Parameters::new();
            parameters.insert("command".to_string(), serde_json::json!(request.command));
            parameters.insert("uuid".to_string(), serde_json::json!(request.id));
            Reply::ok(parameters)
        }
        Err(e) => Reply::fail(e.to_string()),
    }
}

/// Echo backend on a loopback TCP port, replying after `delay`.
pub(crate) async fn spawn_echo_backend(delay: Duration) -> Destination {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, frame_codec());
                while let Some(Ok(frame)) = framed.next().await {
                    tokio::time::sleep(delay).await;
                    let reply = Bytes::from(encode(&echo(&frame)).unwrap());
                    if framed.send(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    Destination::new("echo", Endpoint::Tcp(addr.to_string()))
}

/// Backend that reads requests and never answers.
pub(crate) async fn spawn_silent_backend() -> Destination {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, frame_codec());
                while let Some(Ok(_)) = framed.next().await {}
            });
        }
    });

    Destination::new("silent", Endpoint::Tcp(addr.to_string()))
}

/// A loopback port that was free a moment ago.
pub(crate) fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
