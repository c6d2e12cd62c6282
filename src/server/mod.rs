//! HTTP surface.
//!
//! - POST /context - Create the brand context for a run
//! - POST /questions - Generate the run's questions
//! - POST /probe - Run a single probe
//! - GET /status?runId= - Current run snapshot
//! - POST /runs - Start a full run in the background
//! - GET /results?runId= - Aggregated results
//! - GET /health

mod error;
mod handlers;

pub use error::{ApiError, ErrorResponse};
pub use handlers::{
    ContextResponse, ProbeResponse, QuestionsResponse, ResultsResponse, StartRunResponse,
};

use crate::analysis::StatusReader;
use crate::workflow::Workflow;
use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tracing::{error, info};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<Workflow>,
    pub status: StatusReader,
}

impl AppState {
    pub fn new(workflow: Workflow) -> Self {
        let status = StatusReader::new(
            workflow.store().clone(),
            workflow.settings().total_answers(),
        );
        Self {
            workflow: Arc::new(workflow),
            status,
        }
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/context", post(handlers::create_context))
        .route("/questions", post(handlers::generate_questions))
        .route("/probe", post(handlers::probe))
        .route("/status", get(handlers::status))
        .route("/runs", post(handlers::start_run))
        .route("/results", get(handlers::results))
        .route("/health", get(handlers::health_check))
        .with_state(state)
}

/// Serve the API on `bind` until Ctrl+C.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
    }
}
