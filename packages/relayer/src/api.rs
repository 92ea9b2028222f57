//! Health and metrics endpoints:
//! - GET /health - liveness check
//! - GET /metrics - Prometheus metrics

use std::net::SocketAddr;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use eyre::{Result, WrapErr};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use tracing::info;

pub async fn serve(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics));

    info!(%addr, "Serving health and metrics endpoints");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind API listener on {addr}"))?;
    axum::serve(listener, app)
        .await
        .wrap_err("API server error")?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        )
            .into_response();
    }
    (StatusCode::OK, buffer).into_response()
}
