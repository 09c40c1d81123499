//! Layer lifecycle: whether the HTTP listener is bound and serving.
//!
//! ```text
//! Closed --start()--> Running --stop()----------> Closed
//!                            \--listener exits--> Closed + last error
//! ```
//!
//! All state lives in one mutex-guarded cell. `start()` binds the listener
//! while holding the lock, so `status()` never reports `Running` without a
//! bound socket. The listener task is the only path that moves a started layer
//! back to `Closed`; `stop()` asks it to exit and waits for that to happen.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{Notify, oneshot};
use tracing::{error, info, warn};

use crate::bridge::transport::{Destination, Forwarder, SocketForwarder};
use crate::config::LayerConfig;
use crate::transport::serve_listener;

/// Extra wait, past the grace period, before `stop()` gives up on the listener task.
const FORCED_STOP_WAIT: Duration = Duration::from_secs(1);
const LISTEN_BACKLOG: u32 = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
    Running,
    #[default]
    Closed,
}

impl LayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Closed => "closed",
        }
    }
}

/// Observable state of the layer. A running layer never carries an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerState {
    status: LayerStatus,
    last_error: Option<String>,
}

impl LayerState {
    fn running() -> Self {
        Self {
            status: LayerStatus::Running,
            last_error: None,
        }
    }

    fn closed() -> Self {
        Self::default()
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            status: LayerStatus::Closed,
            last_error: Some(error.into()),
        }
    }

    pub fn status(&self) -> LayerStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == LayerStatus::Running
    }

    /// Why the layer last closed, if it was not a requested stop.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("layer already running")]
    AlreadyRunning,
    #[error("layer not running")]
    NotRunning,
    #[error("layer is already stopping")]
    Stopping,
    #[error("port is not set")]
    PortNotSet,
    #[error("destination is not set")]
    NoDestination,
    #[error("invalid listen host '{host}': {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("listener did not stop within {0:?}")]
    StopTimeout(Duration),
}

struct StopHandles {
    shutdown: oneshot::Sender<()>,
    done: oneshot::Receiver<()>,
}

struct ActiveListener {
    local_addr: SocketAddr,
    /// Taken by the first `stop()`; `None` means a stop was requested.
    stop: Option<StopHandles>,
}

#[derive(Default)]
struct Cell {
    state: LayerState,
    destination: Option<Destination>,
    active: Option<ActiveListener>,
}

struct Shared {
    config: LayerConfig,
    cell: Mutex<Cell>,
    closed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Cell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Completion callback of the listener task.
    fn finish(&self, outcome: io::Result<()>) {
        let mut cell = self.lock();
        let requested = cell.active.as_ref().is_some_and(|a| a.stop.is_none());
        cell.active = None;
        cell.state = match outcome {
            Ok(()) if requested => LayerState::closed(),
            Ok(()) => LayerState::failed("http server was down"),
            Err(e) => LayerState::failed(format!("http server failed: {}", e)),
        };
        match cell.state.last_error() {
            Some(err) => warn!(error = %err, "Layer closed unexpectedly"),
            None => info!("Layer closed"),
        }
        drop(cell);
        self.closed.notify_waiters();
    }
}

/// Handle to the HTTP listener layer. Clones share the same state.
#[derive(Clone)]
pub struct Layer {
    shared: Arc<Shared>,
}

impl Layer {
    pub fn new(config: LayerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                cell: Mutex::new(Cell::default()),
                closed: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &LayerConfig {
        &self.shared.config
    }

    /// Set where requests are forwarded. Takes effect on the next `start()`.
    pub fn set_destination(&self, destination: Destination) {
        self.shared.lock().destination = Some(destination);
    }

    pub fn status(&self) -> LayerState {
        self.shared.lock().state.clone()
    }

    /// Address the running listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().active.as_ref().map(|a| a.local_addr)
    }

    /// Bind the listener and serve it on a background task.
    ///
    /// Must be called from within a Tokio runtime. Returns the bound address.
    pub fn start(&self) -> Result<SocketAddr, LayerError> {
        let mut cell = self.shared.lock();
        if cell.active.is_some() {
            return Err(LayerError::AlreadyRunning);
        }

        let config = &self.shared.config;
        if config.port == 0 {
            return Err(LayerError::PortNotSet);
        }
        let destination = cell.destination.clone().ok_or(LayerError::NoDestination)?;
        let addr = config
            .listen_addr()
            .map_err(|source| LayerError::InvalidHost {
                host: config.host.clone(),
                source,
            })?;

        let listener = match bind(addr) {
            Ok(listener) => listener,
            Err(source) => {
                let err = LayerError::Bind { addr, source };
                error!(error = %err, "Layer failed to start");
                cell.state = LayerState::failed(err.to_string());
                return Err(err);
            }
        };
        let local_addr = listener.local_addr().unwrap_or(addr);

        let forwarder: Arc<dyn Forwarder> = Arc::new(SocketForwarder::new(destination.clone()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();

        let shared = Arc::clone(&self.shared);
        let body_limit = config.body_limit;
        let grace = config.shutdown_grace;
        tokio::spawn(async move {
            let outcome = run_listener(listener, forwarder, body_limit, grace, shutdown_rx).await;
            shared.finish(outcome);
            let _ = done_tx.send(());
        });

        cell.active = Some(ActiveListener {
            local_addr,
            stop: Some(StopHandles {
                shutdown: shutdown_tx,
                done: done_rx,
            }),
        });
        cell.state = LayerState::running();
        info!(
            %local_addr,
            destination = %destination.id,
            endpoint = %destination.endpoint,
            "Layer started"
        );
        Ok(local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    ///
    /// The listener task gives in-flight requests `shutdown_grace` to finish,
    /// then closes outright. Dropping the returned future does not cancel the
    /// stop.
    pub async fn stop(&self) -> Result<(), LayerError> {
        let mut done = {
            let mut cell = self.shared.lock();
            let active = cell.active.as_mut().ok_or(LayerError::NotRunning)?;
            let StopHandles { shutdown, done } = active.stop.take().ok_or(LayerError::Stopping)?;
            let _ = shutdown.send(());
            done
        };
        info!("Stopping layer");

        let limit = self.shared.config.shutdown_grace + FORCED_STOP_WAIT;
        tokio::time::timeout(limit, &mut done)
            .await
            .map(|_| ())
            .map_err(|_| LayerError::StopTimeout(limit))
    }

    /// Resolve once the layer is not running.
    pub async fn closed(&self) {
        loop {
            let notified = self.shared.closed.notified();
            if !self.status().is_running() {
                return;
            }
            notified.await;
        }
    }
}

/// Serve until the listener exits or a stop is requested.
///
/// After a stop request the server drains for at most `grace`; whatever is
/// still in flight then is abandoned with the server future.
async fn run_listener(
    listener: TcpListener,
    forwarder: Arc<dyn Forwarder>,
    body_limit: usize,
    grace: Duration,
    stop: oneshot::Receiver<()>,
) -> io::Result<()> {
    let (drain_tx, drain_rx) = oneshot::channel::<()>();
    let graceful = async move {
        let _ = drain_rx.await;
    };
    let serve = serve_listener(listener, forwarder, body_limit, graceful);
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => result,
        _ = stop => {
            let _ = drain_tx.send(());
            match tokio::time::timeout(grace, &mut serve).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(?grace, "Closing listener with requests still in flight");
                    Ok(())
                }
            }
        }
    }
}

fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}
