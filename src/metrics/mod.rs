//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Quote pipeline cache behavior and fetch outcomes
//! - Execution lifecycle (started, completed, failed)
//! - Arrival and ledger confirmation timeouts
//! - Background history pollers

use crate::error::OrchestratorResult;
use crate::model::StepKind;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Quote metrics
    pub static ref QUOTE_CACHE_HITS: CounterVec = register_counter_vec!(
        "orchestrator_quote_cache_hits_total",
        "Quote requests served from the cache",
        &[]
    ).unwrap();

    pub static ref QUOTE_FETCHES: CounterVec = register_counter_vec!(
        "orchestrator_quote_fetches_total",
        "Upstream quote fetches by outcome",
        &["outcome"]
    ).unwrap();

    // Execution metrics
    pub static ref EXECUTIONS_STARTED: CounterVec = register_counter_vec!(
        "orchestrator_executions_started_total",
        "Total executions started",
        &[]
    ).unwrap();

    pub static ref EXECUTIONS_COMPLETED: CounterVec = register_counter_vec!(
        "orchestrator_executions_completed_total",
        "Total executions completed",
        &[]
    ).unwrap();

    pub static ref EXECUTIONS_FAILED: CounterVec = register_counter_vec!(
        "orchestrator_executions_failed_total",
        "Total executions failed, by error code",
        &["code"]
    ).unwrap();

    pub static ref STEPS_FAILED: CounterVec = register_counter_vec!(
        "orchestrator_steps_failed_total",
        "Total step failures by step kind",
        &["kind"]
    ).unwrap();

    pub static ref EXECUTION_DURATION: HistogramVec = register_histogram_vec!(
        "orchestrator_execution_duration_seconds",
        "Wall-clock execution duration",
        &[],
        vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    ).unwrap();

    // Settlement metrics
    pub static ref ARRIVAL_TIMEOUTS: CounterVec = register_counter_vec!(
        "orchestrator_arrival_timeouts_total",
        "Arrival windows that elapsed without detection",
        &[]
    ).unwrap();

    pub static ref L1_TIMEOUTS: CounterVec = register_counter_vec!(
        "orchestrator_ledger_timeouts_total",
        "Ledger confirmation windows that elapsed",
        &[]
    ).unwrap();

    // History metrics
    pub static ref HISTORY_POLLS: CounterVec = register_counter_vec!(
        "orchestrator_history_polls_total",
        "Background bridge status polls",
        &[]
    ).unwrap();

    pub static ref ACTIVE_POLLERS: GaugeVec = register_gauge_vec!(
        "orchestrator_active_pollers",
        "Transactions currently under background polling",
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

    pub async fn run(&self) -> OrchestratorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::error::OrchestratorError::Internal(e.to_string()))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::error::OrchestratorError::Internal(e.to_string()))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_quote_cache_hit() {
    QUOTE_CACHE_HITS.with_label_values(&[]).inc();
}

pub fn record_quote_fetch(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    QUOTE_FETCHES.with_label_values(&[outcome]).inc();
}

pub fn record_execution_started() {
    EXECUTIONS_STARTED.with_label_values(&[]).inc();
}

pub fn record_execution_completed() {
    EXECUTIONS_COMPLETED.with_label_values(&[]).inc();
}

pub fn record_execution_failed(code: &str) {
    EXECUTIONS_FAILED.with_label_values(&[code]).inc();
}

pub fn record_step_failed(kind: StepKind) {
    STEPS_FAILED.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_execution_duration(secs: f64) {
    EXECUTION_DURATION.with_label_values(&[]).observe(secs);
}

pub fn record_arrival_timeout() {
    ARRIVAL_TIMEOUTS.with_label_values(&[]).inc();
}

pub fn record_l1_timeout() {
    L1_TIMEOUTS.with_label_values(&[]).inc();
}

pub fn record_history_poll() {
    HISTORY_POLLS.with_label_values(&[]).inc();
}

pub fn set_active_pollers(count: usize) {
    ACTIVE_POLLERS.with_label_values(&[]).set(count as f64);
}
