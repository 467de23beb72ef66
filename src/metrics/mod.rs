//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain RPC reachability and failures
//! - Swap registration outcomes
//! - Signing sessions
//! - Destination transactions sent

use crate::error::{ErrorKind, RouterError, RouterResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_HEALTHY: GaugeVec = register_gauge_vec!(
        "swap_router_chain_healthy",
        "Chain RPC reachability (1=reachable, 0=unreachable)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_LATEST_HEIGHT: GaugeVec = register_gauge_vec!(
        "swap_router_chain_latest_height",
        "Latest height reported by the chain RPC",
        &["chain_id"]
    ).unwrap();

    pub static ref RPC_FAILURES: CounterVec = register_counter_vec!(
        "swap_router_rpc_failures_total",
        "RPC calls that failed on every endpoint",
        &["chain_id", "method"]
    ).unwrap();

    // Swap metrics
    pub static ref SWAPS_REGISTERED: CounterVec = register_counter_vec!(
        "swap_router_swaps_registered_total",
        "Swaps accepted at registration",
        &["chain_id"]
    ).unwrap();

    pub static ref SWAPS_REJECTED: CounterVec = register_counter_vec!(
        "swap_router_swaps_rejected_total",
        "Swaps rejected at registration or processing",
        &["chain_id", "kind"]
    ).unwrap();

    pub static ref SWAP_LATENCY: HistogramVec = register_histogram_vec!(
        "swap_router_swap_latency_seconds",
        "Time from dequeue to broadcast of a swap, by source chain",
        &["chain_id"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Signing metrics
    pub static ref SIGN_SESSIONS: HistogramVec = register_histogram_vec!(
        "swap_router_sign_session_seconds",
        "Duration of signing sessions by final state",
        &["state"],
        vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    pub static ref SIGN_VERDICTS: CounterVec = register_counter_vec!(
        "swap_router_sign_verdicts_total",
        "Acceptor verdicts on pending sign requests",
        &["verdict"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SENT: CounterVec = register_counter_vec!(
        "swap_router_transactions_sent_total",
        "Destination transactions broadcast",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_SEND_FAILED: CounterVec = register_counter_vec!(
        "swap_router_transactions_send_failed_total",
        "Destination transactions whose broadcast failed",
        &["chain_id"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "swap_router_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "swap_router_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RouterResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RouterError::Internal(format!("bind metrics {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RouterError::Internal(format!("metrics server: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of every registered metric
pub fn render() -> RouterResult<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| RouterError::Internal(format!("encode metrics: {}", e)))?;
    String::from_utf8(buffer).map_err(|e| RouterError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, latest: Option<u64>) {
    let label = chain_id.to_string();
    CHAIN_HEALTHY
        .with_label_values(&[&label])
        .set(if latest.is_some() { 1.0 } else { 0.0 });
    if let Some(height) = latest {
        CHAIN_LATEST_HEIGHT
            .with_label_values(&[&label])
            .set(height as f64);
    }
}

pub fn record_rpc_failure(chain_id: u64, method: &str) {
    RPC_FAILURES
        .with_label_values(&[&chain_id.to_string(), method])
        .inc();
}

pub fn record_swap_registered(chain_id: u64) {
    SWAPS_REGISTERED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_swap_rejected(chain_id: u64, kind: ErrorKind) {
    SWAPS_REJECTED
        .with_label_values(&[&chain_id.to_string(), kind.as_str()])
        .inc();
}

pub fn record_swap_latency(chain_id: u64, latency_secs: f64) {
    SWAP_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}

pub fn record_sign_outcome(state: &str, elapsed_secs: f64) {
    SIGN_SESSIONS
        .with_label_values(&[state])
        .observe(elapsed_secs);
}

pub fn record_sign_verdict(verdict: &str) {
    SIGN_VERDICTS.with_label_values(&[verdict]).inc();
}

pub fn record_tx_sent(chain_id: u64) {
    TX_SENT.with_label_values(&[&chain_id.to_string()]).inc();
}

pub fn record_tx_send_failed(chain_id: u64) {
    TX_SEND_FAILED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
