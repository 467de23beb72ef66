//! HTTP API for swap registration, verification, health and monitoring

use crate::config::ApiConfig;
use crate::error::{ErrorKind, RouterError, RouterResult};
use crate::metrics;
use crate::pipeline::{SwapJob, SwapProcessor};
use crate::swap::{RegisterArgs, RegisteredSwap, SwapRecord, SwapRouter, SwapType, VerifyArgs};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<SwapRouter>,
    pub processor: Arc<SwapProcessor>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .route("/metrics", get(get_metrics))
        .route("/swap/register", post(register_swap))
        .route("/swap/verify", post(verify_swap))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> RouterResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RouterError::Internal(format!("bind api {}: {}", addr, e)))?;
    axum::serve(listener, app(state))
        .await
        .map_err(|e| RouterError::Internal(format!("api server: {}", e)))
}

/// Router errors rendered with a status derived from their kind
pub struct ApiError(RouterError);

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unstable => StatusCode::CONFLICT,
            ErrorKind::Malformed => StatusCode::BAD_REQUEST,
            ErrorKind::PolicyRejected | ErrorKind::SigningRejected => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorKind::Infrastructure => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind,
            }),
        )
            .into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Latest height of every configured chain, `None` when unreachable
async fn chain_heights(router: &SwapRouter) -> Vec<ChainHealth> {
    let checks = router.bridges().chain_ids().into_iter().map(|chain_id| async move {
        let bridge = router.bridge(chain_id).ok();
        let latest = match &bridge {
            Some(bridge) => bridge.latest_height().await.ok(),
            None => None,
        };
        metrics::record_chain_health(chain_id, latest);
        ChainHealth {
            chain_id,
            name: bridge
                .map(|b| b.chain_config().name.clone())
                .unwrap_or_default(),
            healthy: latest.is_some(),
            latest_height: latest,
        }
    });
    join_all(checks).await
}

/// Readiness check - every chain RPC answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chains = chain_heights(&state.router).await;
    let ready = chains.iter().all(|c| c.healthy);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            free_workers: state.processor.available_workers(),
            signed_swaps: state.processor.guard().signed_count(),
            chains,
        }),
    )
}

async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    Json(ChainsResponse {
        chains: chain_heights(&state.router).await,
    })
}

async fn get_metrics() -> Result<String, StatusCode> {
    metrics::render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Register every swap of a source transaction and queue the valid ones
async fn register_swap(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let swaps = state
        .router
        .register_swap(
            request.chain_id,
            &request.tx_hash,
            RegisterArgs {
                swap_type: request.swap_type,
                log_index: request.log_index,
            },
        )
        .await?;

    let mut queued = 0;
    for swap in swaps.iter().filter(|s| s.record.is_some()) {
        let job = SwapJob::new(
            request.chain_id,
            &request.tx_hash,
            request.swap_type,
            swap.log_index,
        );
        match state.processor.submit(job) {
            Ok(()) => queued += 1,
            Err(e) => {
                warn!(chain_id = request.chain_id, tx_hash = %request.tx_hash, log_index = swap.log_index, error = %e, "Swap not queued")
            }
        }
    }

    Ok(Json(RegisterResponse {
        chain_id: request.chain_id,
        tx_hash: request.tx_hash,
        swaps,
        queued,
    }))
}

async fn verify_swap(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<SwapRecord>, ApiError> {
    let record = state
        .router
        .verify_transaction(
            request.chain_id,
            &request.tx_hash,
            VerifyArgs {
                swap_type: request.swap_type,
                log_index: request.log_index,
                allow_unstable: request.allow_unstable,
            },
        )
        .await?;
    Ok(Json(record))
}

// Request and response types

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    chain_id: u64,
    tx_hash: String,
    swap_type: SwapType,
    #[serde(default)]
    log_index: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    chain_id: u64,
    tx_hash: String,
    swap_type: SwapType,
    log_index: usize,
    #[serde(default)]
    allow_unstable: bool,
}

#[derive(Serialize)]
struct RegisterResponse {
    chain_id: u64,
    tx_hash: String,
    swaps: Vec<RegisteredSwap>,
    queued: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: ErrorKind,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    free_workers: usize,
    signed_swaps: usize,
    chains: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    name: String,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest_height: Option<u64>,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<ChainHealth>,
}
