use crate::core::AggregateResult;
use crate::core::config::ServerConfig;
use crate::refresh::{CacheError, RefreshCache};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        error!(error = %self, "Failed to serve rates");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": self.to_string() })),
        )
            .into_response()
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Currency Exchange Rate Comparison API" }))
}

async fn rates(State(cache): State<Arc<RefreshCache>>) -> Result<Json<AggregateResult>, CacheError> {
    let result = cache.get().await?;
    Ok(Json(result.as_ref().clone()))
}

async fn refresh_rates(
    State(cache): State<Arc<RefreshCache>>,
) -> Result<Json<AggregateResult>, CacheError> {
    let result = cache.refresh().await?;
    Ok(Json(result.as_ref().clone()))
}

/// `*` anywhere in the list allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins
            .iter()
            .filter_map(|o| o.trim().parse().ok())
            .collect();
        if parsed.is_empty() {
            warn!("No valid CORS origins configured, allowing any");
            AllowOrigin::any()
        } else {
            info!("CORS configured with {} allowed origins", parsed.len());
            AllowOrigin::list(parsed)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
}

pub fn router(cache: Arc<RefreshCache>, config: &ServerConfig) -> Router {
    Router::new()
        .route("/api", get(root))
        .route("/api/", get(root))
        .route("/api/rates", get(rates))
        .route("/api/rates/refresh", get(refresh_rates))
        .with_state(cache)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub async fn serve(cache: Arc<RefreshCache>, config: &ServerConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!(addr = %config.bind, "Rates API listening");

    axum::serve(listener, router(cache, config))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}
