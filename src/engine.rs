//! Collaborators shared by the swap, swap-pair and retry engines

use crate::alert::Notifier;
use crate::chain::{Chain, PerChain};
use crate::error::RelayerError;
use crate::events::SwapAgentAbi;
use crate::integrity::{RecordHasher, Sealed};
use crate::state::RecordStore;
use crate::tx::{ChainSender, TxTracker};

use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn RecordStore>,
    pub hasher: Arc<RecordHasher>,
    pub abi: Arc<SwapAgentAbi>,
    pub senders: PerChain<Arc<ChainSender>>,
    pub tracker: Arc<TxTracker>,
    pub notifier: Arc<dyn Notifier>,
    /// Swap agent contract per chain
    pub agents: PerChain<Address>,
    pub batch_size: usize,
    /// Pause between consecutive sends
    pub send_tx_delay: Duration,
}

impl EngineContext {
    pub fn sender(&self, chain: Chain) -> &ChainSender {
        self.senders.get(chain)
    }

    pub fn agent(&self, chain: Chain) -> Address {
        *self.agents.get(chain)
    }

    /// Check a row's record hash, alerting on mismatch
    pub async fn verified<T: Sealed>(&self, row: &T) -> bool {
        match self.hasher.ensure(row) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                self.notifier
                    .alert(&format!("{}; row left untouched", e))
                    .await;
                false
            }
        }
    }

    /// Alert on a failed daemon pass when the error class calls for it
    pub async fn escalate(&self, what: &str, e: &RelayerError) {
        if e.should_alert() {
            self.notifier.alert(&format!("{}: {}", what, e)).await;
        }
    }

    pub async fn pause_between_sends(&self) {
        if !self.send_tx_delay.is_zero() {
            tokio::time::sleep(self.send_tx_delay).await;
        }
    }
}

/// Append a line to a state machine's free-text log
pub fn note(log: &mut String, message: impl AsRef<str>) {
    if !log.is_empty() {
        log.push_str("; ");
    }
    log.push_str(message.as_ref());
}
