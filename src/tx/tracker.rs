//! Resolves the on-chain outcome of broadcast transactions

use super::gas::GasEstimator;
use crate::chain::{finality, EventSource, PerChain};
use crate::error::RelayerResult;
use crate::state::models::{TxRecord, TxStatus};

use ethers::types::{Log, U256};
use std::sync::Arc;
use tracing::debug;

/// What one tracking pass learned about a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    /// No receipt yet, or not buried deep enough
    Pending,
    /// Gave up waiting for a receipt
    Missing,
    Reverted {
        height: u64,
    },
    Succeeded {
        height: u64,
        fee: U256,
        logs: Vec<Log>,
    },
}

impl TrackOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, TrackOutcome::Pending)
    }
}

/// Receipt polling with a bounded number of attempts per transaction
pub struct TxTracker {
    sources: PerChain<Arc<dyn EventSource>>,
    confirmations: PerChain<u64>,
    max_track_retry: u32,
}

impl TxTracker {
    pub fn new(
        sources: PerChain<Arc<dyn EventSource>>,
        confirmations: PerChain<u64>,
        max_track_retry: u32,
    ) -> Self {
        Self {
            sources,
            confirmations,
            max_track_retry,
        }
    }

    /// Check a `Sent` tracking row against its chain. RPC errors are returned
    /// unchanged and do not count as an attempt.
    pub async fn assess(&self, tx: &TxRecord) -> RelayerResult<TrackOutcome> {
        if tx.track_retry_counter >= self.max_track_retry {
            return Ok(TrackOutcome::Missing);
        }

        let source = self.sources.get(tx.chain);
        let Some(receipt) = source.receipt(tx.tx_hash).await? else {
            debug!("No receipt yet for {:?} on {}", tx.tx_hash, tx.chain);
            return Ok(TrackOutcome::Pending);
        };

        let head = source.head().await?;
        let required = *self.confirmations.get(tx.chain);
        if !finality::is_final(head, receipt.block_number, required) {
            debug!(
                "{:?} mined at {} but only {} of {} confirmations",
                tx.tx_hash,
                receipt.block_number,
                finality::confirmations(head, receipt.block_number),
                required
            );
            return Ok(TrackOutcome::Pending);
        }

        if !receipt.succeeded() {
            return Ok(TrackOutcome::Reverted {
                height: receipt.block_number,
            });
        }

        Ok(TrackOutcome::Succeeded {
            height: receipt.block_number,
            fee: GasEstimator::calculate_cost(receipt.gas_used, tx.gas_price),
            logs: receipt.logs,
        })
    }

    /// The tracking row after recording `outcome`
    pub fn settle(&self, tx: &TxRecord, outcome: &TrackOutcome) -> TxRecord {
        let mut next = tx.clone();
        match outcome {
            TrackOutcome::Pending => {
                next.track_retry_counter += 1;
            }
            TrackOutcome::Missing => {
                next.status = TxStatus::Missing;
                next.error_msg = format!(
                    "no confirmed receipt after {} checks",
                    tx.track_retry_counter
                );
            }
            TrackOutcome::Reverted { height } => {
                next.status = TxStatus::Failed;
                next.height = Some(*height);
                next.error_msg = "transaction reverted".to_string();
            }
            TrackOutcome::Succeeded { height, fee, .. } => {
                next.status = TxStatus::Success;
                next.height = Some(*height);
                next.consumed_fee = Some(*fee);
            }
        }
        if outcome.is_final() {
            crate::metrics::record_tx_settled(next.chain, next.kind, next.status);
        }
        next
    }
}
