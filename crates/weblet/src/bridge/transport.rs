//! Destination transport: a single framed socket to the backend processor.
//!
//! Frames are length-prefixed (4-byte big-endian) and strictly request/reply:
//! each request frame is answered by exactly one reply frame. Two socket kinds
//! are supported, selected by the endpoint URL:
//! - **Tcp**: `tcp://host:port`
//! - **Unix**: `unix:///path/to/socket`

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::Mutex;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest frame accepted from or sent to the destination.
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("no reply from {0} within {1:?}")]
    Timeout(Endpoint, Duration),
    #[error("destination closed the connection")]
    Closed,
    #[error("transport: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("invalid endpoint '{0}': expected tcp://host:port or unix:///path")]
pub struct InvalidEndpoint(pub String);

/// Address of the destination socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://")
            && !addr.is_empty()
        {
            return Ok(Self::Tcp(addr.to_string()));
        }
        if let Some(path) = s.strip_prefix("unix://")
            && !path.is_empty()
        {
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        Err(InvalidEndpoint(s.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Binding parameters for the one destination a running layer forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Identity of the destination, used in logs.
    pub id: String,
    pub endpoint: Endpoint,
    /// Upper bound on one call: waiting for the connection, connecting and
    /// one round trip.
    pub request_timeout: Duration,
}

impl Destination {
    pub fn new(id: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            endpoint,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Send one encoded request to the destination and wait for its encoded reply.
///
/// No retries happen here; a failed call surfaces its error to the caller.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn send(&self, request: Bytes) -> Result<Bytes, TransportError>;
}

/// Length-delimited codec shared by both ends of the destination socket.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

enum Connection {
    Tcp(Framed<TcpStream, LengthDelimitedCodec>),
    Unix(Framed<UnixStream, LengthDelimitedCodec>),
}

impl Connection {
    async fn open(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(Self::Tcp(Framed::new(stream, frame_codec())))
            }
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                Ok(Self::Unix(Framed::new(stream, frame_codec())))
            }
        }
    }

    async fn round_trip(&mut self, request: Bytes) -> Result<Bytes, TransportError> {
        match self {
            Self::Tcp(framed) => exchange(framed, request).await,
            Self::Unix(framed) => exchange(framed, request).await,
        }
    }
}

async fn exchange<T>(
    framed: &mut Framed<T, LengthDelimitedCodec>,
    request: Bytes,
) -> Result<Bytes, TransportError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    tracing::trace!(request_size_bytes = request.len(), "Sending frame");
    framed.send(request).await?;
    match framed.next().await {
        Some(Ok(frame)) => {
            tracing::trace!(reply_size_bytes = frame.len(), "Received frame");
            Ok(frame.freeze())
        }
        Some(Err(e)) => Err(e.into()),
        None => Err(TransportError::Closed),
    }
}

/// Forwarder over one persistent socket connection.
///
/// Connects lazily, carries one request at a time, and drops the connection
/// after any failure so the next call starts from a fresh socket.
pub struct SocketForwarder {
    destination: Destination,
    connection: Mutex<Option<Connection>>,
}

impl SocketForwarder {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            connection: Mutex::new(None),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    async fn connect(endpoint: &Endpoint) -> Result<Connection, TransportError> {
        tracing::debug!(%endpoint, "Connecting to destination");
        Connection::open(endpoint)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: endpoint.clone(),
                source,
            })
    }

    /// One exchange under the connection lock.
    ///
    /// The connection is out of the slot while a frame is in flight and only
    /// goes back after its reply has been read, so a cancelled or failed call
    /// leaves the slot empty and the next call reconnects.
    async fn call(&self, request: Bytes) -> Result<Bytes, TransportError> {
        let mut slot = self.connection.lock().await;
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => Self::connect(&self.destination.endpoint).await?,
        };
        let reply = connection.round_trip(request).await?;
        *slot = Some(connection);
        Ok(reply)
    }
}

#[async_trait]
impl Forwarder for SocketForwarder {
    async fn send(&self, request: Bytes) -> Result<Bytes, TransportError> {
        let timeout = self.destination.request_timeout;
        let result = match tokio::time::timeout(timeout, self.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(
                self.destination.endpoint.clone(),
                timeout,
            )),
        };

        if let Err(ref e) = result {
            tracing::warn!(destination = %self.destination.id, error = %e, "Destination request failed");
        }
        result
    }
}
