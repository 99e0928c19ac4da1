//! The record store contract shared by the Postgres and in-memory backends

use super::models::{
    BlockLog, EventPhase, EventQuery, EventTxLog, RetrySwap, RollbackSummary, StoreStats, Swap,
    SwapDirection, SwapPair, SwapPairSm, TxKind, TxRecord, TxStatus,
};
use crate::chain::Chain;
use crate::error::RelayerResult;
use crate::swap::SwapStatus;
use crate::swap_pair::SwapPairStatus;

use async_trait::async_trait;
use ethers::types::{Address, H256};

/// One write inside an atomic batch
///
/// The conditional variants only apply when the stored row is still in the
/// expected state; otherwise the whole batch fails with `Conflict`.
#[derive(Debug, Clone)]
pub enum Mutation {
    InsertBlock(BlockLog),
    InsertEvent(EventTxLog),
    SetEventPhase {
        id: i64,
        from: EventPhase,
        to: EventPhase,
    },
    InsertSwap(Swap),
    UpdateSwap {
        swap: Swap,
        expected: SwapStatus,
    },
    InsertSwapPairSm(SwapPairSm),
    UpdateSwapPairSm {
        record: SwapPairSm,
        expected: SwapPairStatus,
    },
    InsertSwapPair(SwapPair),
    InsertTx(TxRecord),
    UpdateTx {
        tx: TxRecord,
        expected: TxStatus,
    },
    InsertRetrySwap(RetrySwap),
    UpdateRetrySwap {
        retry: RetrySwap,
        expected_done: bool,
    },
}

impl Mutation {
    /// Whether applying this mutation yields a new row id
    pub fn is_insert(&self) -> bool {
        matches!(
            self,
            Mutation::InsertBlock(_)
                | Mutation::InsertEvent(_)
                | Mutation::InsertSwap(_)
                | Mutation::InsertSwapPairSm(_)
                | Mutation::InsertSwapPair(_)
                | Mutation::InsertTx(_)
                | Mutation::InsertRetrySwap(_)
        )
    }
}

/// Durable records with all-or-nothing multi-row writes
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Apply a batch atomically, returning the ids of inserted rows in order
    async fn apply(&self, batch: Vec<Mutation>) -> RelayerResult<Vec<i64>>;

    async fn tip(&self, chain: Chain) -> RelayerResult<Option<BlockLog>>;

    /// Ingested blocks of a chain, lowest height first
    async fn blocks(&self, chain: Chain) -> RelayerResult<Vec<BlockLog>>;

    /// Events matching the query, lowest height first
    async fn events(&self, query: &EventQuery) -> RelayerResult<Vec<EventTxLog>>;

    /// Delete the block at `height` with its `Init` events and the still
    /// `Received` state machines those events created
    async fn rollback_block(&self, chain: Chain, height: u64) -> RelayerResult<RollbackSummary>;

    /// Recount confirmations of `Init` events and confirm the deep enough ones.
    /// Returns the number of events newly confirmed.
    async fn refresh_confirmations(
        &self,
        chain: Chain,
        current_height: u64,
        required: u64,
    ) -> RelayerResult<u64>;

    /// Delete block rows below `below_height`
    async fn prune_blocks(&self, chain: Chain, below_height: u64) -> RelayerResult<u64>;

    async fn swap(&self, id: i64) -> RelayerResult<Option<Swap>>;

    async fn swap_by_start_tx(
        &self,
        direction: SwapDirection,
        start_tx_hash: H256,
    ) -> RelayerResult<Option<Swap>>;

    /// Swaps in any of `statuses`, oldest first
    async fn swaps_with_status(
        &self,
        statuses: &[SwapStatus],
        limit: usize,
    ) -> RelayerResult<Vec<Swap>>;

    async fn swap_pair_sm(&self, id: i64) -> RelayerResult<Option<SwapPairSm>>;

    async fn swap_pair_sm_by_register_tx(
        &self,
        register_tx_hash: H256,
    ) -> RelayerResult<Option<SwapPairSm>>;

    async fn swap_pair_sms_with_status(
        &self,
        statuses: &[SwapPairStatus],
        limit: usize,
    ) -> RelayerResult<Vec<SwapPairSm>>;

    async fn swap_pairs(&self) -> RelayerResult<Vec<SwapPair>>;

    async fn swap_pair_by_erc20(&self, erc20: Address) -> RelayerResult<Option<SwapPair>>;

    /// Tracking rows of one kind in `status`, oldest first
    async fn txs_with_status(
        &self,
        kind: TxKind,
        status: TxStatus,
        limit: usize,
    ) -> RelayerResult<Vec<TxRecord>>;

    /// The newest live (created, sent or succeeded) tracking row owned by a state machine
    async fn active_tx_for_owner(
        &self,
        kind: TxKind,
        owner_id: i64,
    ) -> RelayerResult<Option<TxRecord>>;

    async fn retry_swap(&self, id: i64) -> RelayerResult<Option<RetrySwap>>;

    /// Retry rows not yet done, oldest first
    async fn retry_swaps_pending(&self, limit: usize) -> RelayerResult<Vec<RetrySwap>>;

    /// A retry for the swap is queued or its transaction is still unresolved
    async fn has_pending_retry(&self, swap_id: i64) -> RelayerResult<bool>;

    async fn stats(&self) -> RelayerResult<StoreStats>;

    async fn health_check(&self) -> RelayerResult<()>;
}
