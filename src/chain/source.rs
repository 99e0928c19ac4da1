//! The per-chain RPC capability consumed by the observer and the engines

use crate::error::RelayerResult;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Log, H256, U256};

/// Header fields the observer needs to link blocks together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub time: u64,
}

/// Receipt fields the tracker needs to settle a broadcast transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    /// 1 for success, 0 for reverted
    pub status: u64,
    pub block_number: u64,
    pub gas_used: U256,
    pub logs: Vec<Log>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

/// Message used for gas estimation
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

/// Chain RPC operations. Every call is bounded by a short timeout; errors are transient.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Header at `height`, `None` if the chain has not produced it yet
    async fn header_at(&self, height: u64) -> RelayerResult<Option<BlockHeader>>;

    /// Logs emitted by `contract` in the block `block_hash` whose first topic is in `topics`
    async fn logs(
        &self,
        block_hash: H256,
        topics: &[H256],
        contract: Address,
    ) -> RelayerResult<Vec<Log>>;

    async fn receipt(&self, tx_hash: H256) -> RelayerResult<Option<TxReceipt>>;

    async fn head(&self) -> RelayerResult<u64>;

    async fn pending_nonce(&self, address: Address) -> RelayerResult<u64>;

    async fn suggest_gas_price(&self) -> RelayerResult<U256>;

    async fn estimate_gas(&self, call: &CallRequest) -> RelayerResult<U256>;

    async fn chain_id(&self) -> RelayerResult<u64>;

    /// Broadcast a signed raw transaction, returning its hash
    async fn broadcast(&self, signed_tx: Bytes) -> RelayerResult<H256>;
}
