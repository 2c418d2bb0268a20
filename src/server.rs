use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::scanner::ScanController;

#[derive(Clone)]
pub struct AppState {
    controller: Arc<ScanController>,
}

/// Command surface: startScan, pause, resume, cancel, getStatus, results.
pub fn router(controller: Arc<ScanController>) -> Router {
    let state = AppState { controller };

    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/pause", post(post_pause))
        .route("/resume", post(post_resume))
        .route("/cancel", post(post_cancel))
        .route("/results", get(get_results))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, controller: Arc<ScanController>) -> Result<()> {
    let app = router(controller);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "Serving scan API");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.controller.status()))
}

async fn post_scan(State(app): State<AppState>) -> impl IntoResponse {
    match app.controller.start().await {
        Ok(status) => (StatusCode::ACCEPTED, Json(status)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to start scan");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to start scan: {e}")).into_response()
        }
    }
}

async fn post_pause(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.controller.pause()))
}

async fn post_resume(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.controller.resume().await))
}

async fn post_cancel(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.controller.cancel().await))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    match app.controller.report().await {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
