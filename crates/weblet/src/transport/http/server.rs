//! HTTP server implementation.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::bridge::transport::Forwarder;

use super::routes::routes;

/// Serve the relay router on an already bound listener.
///
/// Returns once `shutdown` resolves and every open connection has finished
/// its in-flight request.
pub async fn serve_listener<F>(
    listener: TcpListener,
    forwarder: Arc<dyn Forwarder>,
    body_limit: usize,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = routes(forwarder, body_limit);

    if let Ok(addr) = listener.local_addr() {
        info!("Serving HTTP on {}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}
