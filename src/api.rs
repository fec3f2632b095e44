//! HTTP API for the chat widget
//!
//! Thin transport over the orchestrator and stream gateway. Every route
//! except session creation authenticates with the session token.

mod auth;
mod error;
mod handlers;
mod types;

pub use handlers::create_router;

use crate::db::Database;
use crate::engine::ProductionOrchestrator;
use crate::stream::StreamGateway;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ProductionOrchestrator>,
    pub stream: StreamGateway,
}

impl AppState {
    pub fn new(orchestrator: Arc<ProductionOrchestrator>, stream: StreamGateway) -> Self {
        Self {
            orchestrator,
            stream,
        }
    }

    pub fn db(&self) -> &Database {
        self.orchestrator.recorder().db()
    }
}
