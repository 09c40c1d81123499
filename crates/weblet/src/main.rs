//! weblet binary: run the HTTP layer against one destination until signalled.

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use weblet::config::{self, LayerConfig};
use weblet::{Layer, WEBLET_VERSION};

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("WEBLET_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("weblet={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let layer_config = LayerConfig::from_env().context("invalid layer configuration")?;
    let destination = config::destination_from_env().context("invalid destination")?;

    info!(
        version = WEBLET_VERSION,
        destination = %destination.endpoint,
        "Starting weblet"
    );

    let layer = Layer::new(layer_config);
    layer.set_destination(destination);
    let addr = layer.start().context("failed to start layer")?;
    info!(%addr, "Layer running");

    tokio::select! {
        _ = shutdown_signal() => {
            layer.stop().await.context("failed to stop layer")?;
        }
        _ = layer.closed() => {
            let state = layer.status();
            if let Some(error) = state.last_error() {
                anyhow::bail!("layer closed unexpectedly: {error}");
            }
        }
    }

    info!("weblet stopped");
    Ok(())
}
