//! HTTP listeners: the management surface and the metrics exposition.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use tracing::info;

use crate::{control::Controller, error::Result, metrics::Metrics};

/// Management routes, one per controller operation.
pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/pause", get(pause))
        .route("/resume", get(resume))
        .route("/status", get(status))
        .route("/shutdown", get(shutdown))
        .with_state(controller)
}

/// Bind and serve the management interface until the process exits.
pub async fn serve(address: &str, controller: Arc<Controller>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("starting management service on http://{address}/");
    axum::serve(listener, router(controller)).await?;
    Ok(())
}

/// Bind and serve the Prometheus exposition endpoint.
pub async fn serve_metrics(address: &str, metrics: Arc<Metrics>) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(expose))
        .with_state(metrics);
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("starting metrics service on http://{address}/metrics");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> &'static str {
    "available commands: /pause, /resume, /status, /shutdown\n"
}

async fn pause(State(controller): State<Arc<Controller>>) -> String {
    controller.pause().await
}

async fn resume(State(controller): State<Arc<Controller>>) -> String {
    controller.resume()
}

async fn status(State(controller): State<Arc<Controller>>) -> String {
    controller.status().await
}

async fn shutdown(State(controller): State<Arc<Controller>>) -> String {
    controller.shutdown().await
}

async fn expose(State(metrics): State<Arc<Metrics>>) -> axum::response::Response {
    match metrics.render() {
        Ok(text) => text.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
