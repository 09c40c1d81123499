//! Control commands for the handler parts.
//!
//! The handler is made of three parts: the frontend, the instance manager and
//! this HTTP layer. The first two are owned elsewhere and reached through the
//! [`Part`] trait; the layer is driven directly. Commands arrive as
//! [`Request`]s on the shared control channel and are answered with [`Reply`]s.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::bridge::protocol::{Parameters, Reply, Request};
use crate::layer::{Layer, LayerError};

pub const STATUS: &str = "status";
pub const RUN_PART: &str = "run_part";
pub const CLOSE_PART: &str = "close_part";
pub const LIST_PARTS: &str = "list_parts";

pub const FRONTEND: &str = "frontend";
pub const INSTANCE_MANAGER: &str = "instance_manager";
pub const LAYER: &str = "layer";

/// Parts that `run_part` and `close_part` accept.
pub const PART_NAMES: [&str; 3] = [FRONTEND, INSTANCE_MANAGER, LAYER];

/// Status message types the handler reports on.
pub const MESSAGE_TYPES: [&str; 2] = ["queue_length", "processing_length"];

/// Aggregate status of the whole handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerStatus {
    /// Every part is running.
    Ready,
    Incomplete,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PartError(pub String);

/// A sibling part of the handler, started and stopped on command.
#[async_trait]
pub trait Part: Send + Sync {
    /// Status label reported by the `status` command.
    fn status(&self) -> String;

    fn is_running(&self) -> bool;

    async fn start(&self) -> Result<(), PartError>;

    async fn close(&self) -> Result<(), PartError>;
}

pub struct ControlSurface {
    frontend: Arc<dyn Part>,
    instance_manager: Arc<dyn Part>,
    layer: Layer,
}

impl ControlSurface {
    pub fn new(frontend: Arc<dyn Part>, instance_manager: Arc<dyn Part>, layer: Layer) -> Self {
        Self {
            frontend,
            instance_manager,
            layer,
        }
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// Dispatch a control command by name.
    pub async fn handle(&self, request: &Request) -> Reply {
        match request.command.as_str() {
            STATUS => self.status(),
            RUN_PART => self.run_part(request).await,
            CLOSE_PART => self.close_part(request).await,
            LIST_PARTS => list_parts(),
            other => Reply::fail(format!("unknown command '{}'", other)),
        }
    }

    pub fn status(&self) -> Reply {
        let layer = self.layer.status();
        let running = [
            (FRONTEND, self.frontend.is_running()),
            (INSTANCE_MANAGER, self.instance_manager.is_running()),
            (LAYER, layer.is_running()),
        ];

        let mut parameters = Parameters::new();
        if running.iter().all(|(_, up)| *up) {
            parameters.insert("status".to_string(), json!(HandlerStatus::Ready));
            return Reply::ok(parameters);
        }

        let not_running: Vec<&str> = running
            .iter()
            .filter(|(_, up)| !*up)
            .map(|(name, _)| *name)
            .collect();

        parameters.insert("status".to_string(), json!(HandlerStatus::Incomplete));
        parameters.insert(
            "parts".to_string(),
            json!({
                FRONTEND: self.frontend.status(),
                INSTANCE_MANAGER: self.instance_manager.status(),
                LAYER: layer.status().as_str(),
            }),
        );
        parameters.insert("not_running".to_string(), json!(not_running));
        if let Some(err) = layer.last_error() {
            parameters.insert("errors".to_string(), json!({ LAYER: err }));
        }
        Reply::ok(parameters)
    }

    pub async fn run_part(&self, request: &Request) -> Reply {
        let part = match part_name(request) {
            Ok(part) => part,
            Err(reply) => return reply,
        };
        info!(part, "Starting part on command");

        match part {
            FRONTEND => start_sibling(&*self.frontend, "frontend").await,
            INSTANCE_MANAGER => start_sibling(&*self.instance_manager, "instance manager").await,
            LAYER => match self.layer.start() {
                Ok(_) => Reply::ok(Parameters::new()),
                Err(e) => Reply::fail(e.to_string()),
            },
            other => Reply::fail(format!("unknown part '{}'", other)),
        }
    }

    pub async fn close_part(&self, request: &Request) -> Reply {
        let part = match part_name(request) {
            Ok(part) => part,
            Err(reply) => return reply,
        };
        info!(part, "Closing part on command");

        match part {
            FRONTEND => close_sibling(&*self.frontend, "frontend").await,
            INSTANCE_MANAGER => close_sibling(&*self.instance_manager, "instance manager").await,
            LAYER => match self.layer.stop().await {
                Ok(()) => Reply::ok(Parameters::new()),
                Err(e @ LayerError::NotRunning) => Reply::fail(e.to_string()),
                Err(e) => Reply::fail(format!("failed to close the layer: {}", e)),
            },
            other => Reply::fail(format!("unknown part '{}'", other)),
        }
    }
}

/// Static description of the controllable parts.
pub fn list_parts() -> Reply {
    let mut parameters = Parameters::new();
    parameters.insert("parts".to_string(), json!(PART_NAMES));
    parameters.insert("message_types".to_string(), json!(MESSAGE_TYPES));
    Reply::ok(parameters)
}

fn part_name(request: &Request) -> Result<&str, Reply> {
    request
        .parameter_str("part")
        .ok_or_else(|| Reply::fail("missing 'part' parameter"))
}

async fn start_sibling(part: &dyn Part, label: &str) -> Reply {
    if part.is_running() {
        return Reply::fail(format!("{} running", label));
    }
    match part.start().await {
        Ok(()) => Reply::ok(Parameters::new()),
        Err(e) => Reply::fail(format!("failed to start the {}: {}", label, e)),
    }
}

async fn close_sibling(part: &dyn Part, label: &str) -> Reply {
    if !part.is_running() {
        return Reply::fail(format!("{} not running", label));
    }
    match part.close().await {
        Ok(()) => Reply::ok(Parameters::new()),
        Err(e) => Reply::fail(format!("failed to close the {}: {}", label, e)),
    }
}
