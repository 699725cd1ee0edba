//! Remote execution gateway
//!
//! Wraps one local engine behind an authenticated HTTP surface:
//!
//! - `GET  /health`          liveness + version, no auth
//! - `POST /execute`         collected execution
//! - `POST /execute/stream`  NDJSON stream of `StreamEvent` lines
//!
//! Wire shapes are `{request: ExecutionRequest}` in and
//! `{result: ExecutionResult}` out; errors use the engine's error body.

pub mod auth;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::header::CONTENT_TYPE,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{ServeConfig, version};
use crate::engine::{Engine, Executor};
use crate::error::{SandboxError, SandboxResult};
use crate::models::{ExecutionRequest, ExecutionResult};

/// Shared gateway state
#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<Engine>,
    pub api_key: Arc<String>,
}

/// Request envelope for both execute endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteBody {
    pub request: ExecutionRequest,
}

/// Response envelope for collected execution
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub result: ExecutionResult,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: version().to_string(),
    })
}

async fn execute(
    State(state): State<GatewayState>,
    Json(body): Json<ExecuteBody>,
) -> Result<Json<ExecuteResponse>, SandboxError> {
    let result = state.engine.execute(body.request).await?;
    Ok(Json(ExecuteResponse { result }))
}

async fn execute_stream(
    State(state): State<GatewayState>,
    Json(body): Json<ExecuteBody>,
) -> Result<Response, SandboxError> {
    let rx = state.engine.execute_stream(body.request).await?;

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let mut line = serde_json::to_vec(&event).unwrap_or_default();
        line.push(b'\n');
        Some((Ok::<_, std::convert::Infallible>(Bytes::from(line)), rx))
    });

    let response = Response::builder()
        .header(CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .map_err(|e| SandboxError::Internal(e.into()))?;
    Ok(response)
}

/// Build the gateway router for an engine and key.
pub fn router(engine: Arc<Engine>, api_key: String) -> Router {
    let state = GatewayState {
        engine,
        api_key: Arc::new(api_key),
    };

    let authed = Router::new()
        .route("/execute", post(execute))
        .route("/execute/stream", post(execute_stream))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(authed)
        .fallback(|| async { SandboxError::NotFound.into_response() })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the gateway until the process exits.
pub async fn serve(engine: Arc<Engine>, config: ServeConfig) -> SandboxResult<()> {
    let app = router(engine, config.api_key);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| SandboxError::Internal(e.into()))?;

    tracing::info!("Gateway listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| SandboxError::Internal(e.into()))?;
    Ok(())
}
