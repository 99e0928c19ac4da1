//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain heads and ingestion
//! - Reorgs and record hash violations
//! - Broadcast and settled transactions
//! - Swap outcomes

use crate::chain::Chain;
use crate::error::{RelayerError, RelayerResult};
use crate::state::models::{EventKind, TxKind, TxStatus};
use crate::swap::SwapStatus;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_HEAD: GaugeVec = register_gauge_vec!(
        "swap_bridge_chain_head",
        "Latest head reported by the chain RPC",
        &["chain"]
    ).unwrap();

    pub static ref INGESTED_HEIGHT: GaugeVec = register_gauge_vec!(
        "swap_bridge_ingested_height",
        "Height of the last ingested block",
        &["chain"]
    ).unwrap();

    pub static ref REORGS: CounterVec = register_counter_vec!(
        "swap_bridge_reorgs_total",
        "Orphaned tip blocks rolled back",
        &["chain"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_OBSERVED: CounterVec = register_counter_vec!(
        "swap_bridge_events_observed_total",
        "Swap agent events recorded by kind",
        &["chain", "kind"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_BROADCAST: CounterVec = register_counter_vec!(
        "swap_bridge_transactions_broadcast_total",
        "Transactions handed to a node",
        &["chain", "kind"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "swap_bridge_transactions_rejected_total",
        "Transactions rejected at broadcast",
        &["chain", "kind"]
    ).unwrap();

    pub static ref TX_SETTLED: CounterVec = register_counter_vec!(
        "swap_bridge_transactions_settled_total",
        "Tracked transactions reaching a final status",
        &["chain", "kind", "status"]
    ).unwrap();

    // Swap metrics
    pub static ref SWAP_OUTCOMES: CounterVec = register_counter_vec!(
        "swap_bridge_swap_outcomes_total",
        "Swaps reaching a resting status",
        &["status"]
    ).unwrap();

    // Integrity metrics
    pub static ref INTEGRITY_VIOLATIONS: CounterVec = register_counter_vec!(
        "swap_bridge_integrity_violations_total",
        "Rows whose record hash did not verify",
        &["table"]
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

    pub async fn run(&self, cancel: CancellationToken) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Config(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_chain_head(chain: Chain, height: u64) {
    CHAIN_HEAD
        .with_label_values(&[chain.as_str()])
        .set(height as f64);
}

pub fn record_block_ingested(chain: Chain, height: u64) {
    INGESTED_HEIGHT
        .with_label_values(&[chain.as_str()])
        .set(height as f64);
}

pub fn record_reorg(chain: Chain) {
    REORGS.with_label_values(&[chain.as_str()]).inc();
}

pub fn record_event_observed(chain: Chain, kind: EventKind) {
    EVENTS_OBSERVED
        .with_label_values(&[chain.as_str(), kind.as_str()])
        .inc();
}

pub fn record_tx_broadcast(chain: Chain, kind: TxKind) {
    TX_BROADCAST
        .with_label_values(&[chain.as_str(), kind.as_str()])
        .inc();
}

pub fn record_tx_failed(chain: Chain, kind: TxKind) {
    TX_FAILED
        .with_label_values(&[chain.as_str(), kind.as_str()])
        .inc();
}

pub fn record_tx_settled(chain: Chain, kind: TxKind, status: TxStatus) {
    TX_SETTLED
        .with_label_values(&[chain.as_str(), kind.as_str(), status.as_str()])
        .inc();
}

pub fn record_swap_terminal(status: SwapStatus) {
    if status.is_terminal() {
        SWAP_OUTCOMES.with_label_values(&[status.as_str()]).inc();
    }
}

pub fn record_integrity_violation(table: &str) {
    INTEGRITY_VIOLATIONS.with_label_values(&[table]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_labelled() {
        record_reorg(Chain::Bsc);
        record_reorg(Chain::Bsc);
        assert!(REORGS.with_label_values(&["BSC"]).get() >= 2.0);

        record_tx_broadcast(Chain::Eth, TxKind::RetrySwap);
        assert!(
            TX_BROADCAST
                .with_label_values(&["ETH", "retry_swap"])
                .get()
                >= 1.0
        );
    }

    #[test]
    fn test_only_resting_swap_statuses_are_counted() {
        record_swap_terminal(SwapStatus::Sending);
        assert_eq!(SWAP_OUTCOMES.with_label_values(&["sending"]).get(), 0.0);

        let before = SWAP_OUTCOMES.with_label_values(&["quote_rejected"]).get();
        record_swap_terminal(SwapStatus::QuoteRejected);
        assert!(SWAP_OUTCOMES.with_label_values(&["quote_rejected"]).get() > before);
    }
}
