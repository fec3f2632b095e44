//! Appraisal chat widget backend
//!
//! Event-sourced conversations: an append-only log, a deterministic
//! projection, an orchestrator driving the appraisal and lead flows, and
//! cursor-resumable SSE delivery.

mod api;
mod config;
mod db;
mod engine;
mod event_log;
mod orchestrator;
mod projector;
mod state_machine;
mod stream;
mod valuation;

use api::{create_router, AppState};
use config::Config;
use db::Database;
use engine::{DatabaseStorage, ProductionOrchestrator, ProductionWorker};
use event_log::Recorder;
use orchestrator::{KeywordClassifier, Prompts};
use std::net::SocketAddr;
use std::sync::Arc;
use stream::StreamGateway;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use valuation::HttpValuationCompute;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appraisal_chat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    if config.rebuild_projections {
        let rebuilt = projector::rebuild_all(&db)?;
        tracing::info!(count = rebuilt, "Rebuilt conversation projections");
    }

    let prompts = Arc::new(match &config.prompts_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading assistant prompts");
            Prompts::load(path)?
        }
        None => Prompts::default(),
    });

    let wake = Arc::new(Notify::new());
    let storage = DatabaseStorage::new(db.clone());
    let orchestrator = ProductionOrchestrator::new(
        Recorder::new(db.clone()),
        storage.clone(),
        storage,
        Box::new(KeywordClassifier::new()?),
        prompts.clone(),
        wake.clone(),
    )?;

    let shutdown = CancellationToken::new();

    let worker = match &config.valuation_url {
        Some(url) => {
            let compute = HttpValuationCompute::new(url.clone(), config.valuation_timeout)?;
            let worker = ProductionWorker::new(
                Recorder::new(db.clone()),
                compute,
                prompts,
                config.worker.clone(),
                wake,
            );
            tracing::info!(url = %url, "Valuation compute configured");
            // Valuations a crashed process left RUNNING go back to the queue
            worker.requeue_interrupted()?;
            Some(tokio::spawn(worker.run(shutdown.clone())))
        }
        None => {
            tracing::warn!(
                "No valuation compute configured. Set VALUATION_COMPUTE_URL to process valuations."
            );
            None
        }
    };

    let state = AppState::new(
        Arc::new(orchestrator),
        StreamGateway::new(db, config.stream.clone()),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Appraisal chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = worker {
        handle.await?;
    }

    Ok(())
}
