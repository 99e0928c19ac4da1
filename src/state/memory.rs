//! In-memory record store for tests and local runs

use super::models::{
    BlockLog, EventQuery, EventStatus, EventTxLog, RetrySwap, RollbackSummary, StoreStats, Swap,
    SwapDirection, SwapPair, SwapPairSm, TxKind, TxRecord, TxStatus,
};
use super::store::{Mutation, RecordStore};
use crate::chain::Chain;
use crate::error::{RelayerError, RelayerResult};
use crate::swap::SwapStatus;
use crate::swap_pair::SwapPairStatus;

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, H256};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: i64,
    blocks: BTreeMap<(Chain, u64), BlockLog>,
    events: BTreeMap<i64, EventTxLog>,
    swaps: BTreeMap<i64, Swap>,
    swap_pair_sms: BTreeMap<i64, SwapPairSm>,
    swap_pairs: BTreeMap<i64, SwapPair>,
    txs: BTreeMap<i64, TxRecord>,
    retry_swaps: BTreeMap<i64, RetrySwap>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Apply one mutation, returning the new row id for inserts
    fn apply(&mut self, mutation: Mutation) -> RelayerResult<Option<i64>> {
        let now = Utc::now();

        match mutation {
            Mutation::InsertBlock(mut block) => {
                let key = (block.chain, block.height);
                if self.blocks.contains_key(&key) {
                    return Err(RelayerError::Conflict(format!(
                        "block {} {} already ingested",
                        block.chain, block.height
                    )));
                }
                let id = self.next_id();
                block.id = id;
                block.create_time = now;
                self.blocks.insert(key, block);
                Ok(Some(id))
            }
            Mutation::InsertEvent(mut event) => {
                // a log that survived a rollback is re-anchored to the block that re-included it
                if let Some(existing) = self.events.values_mut().find(|e| {
                    e.chain == event.chain
                        && e.tx_hash == event.tx_hash
                        && e.log_index == event.log_index
                }) {
                    existing.block_hash = event.block_hash;
                    existing.height = event.height;
                    existing.update_time = now;
                    return Ok(Some(existing.id));
                }
                let id = self.next_id();
                event.id = id;
                event.update_time = now;
                self.events.insert(id, event);
                Ok(Some(id))
            }
            Mutation::SetEventPhase { id, from, to } => {
                let event = self
                    .events
                    .get_mut(&id)
                    .ok_or_else(|| RelayerError::Conflict(format!("event {} is gone", id)))?;
                if event.phase != from {
                    return Err(RelayerError::Conflict(format!(
                        "event {} is in phase {}, expected {}",
                        id, event.phase, from
                    )));
                }
                event.phase = to;
                event.update_time = now;
                Ok(None)
            }
            Mutation::InsertSwap(mut swap) => {
                let id = self.next_id();
                swap.id = id;
                swap.create_time = now;
                swap.update_time = now;
                self.swaps.insert(id, swap);
                Ok(Some(id))
            }
            Mutation::UpdateSwap { mut swap, expected } => {
                let stored = self
                    .swaps
                    .get_mut(&swap.id)
                    .ok_or_else(|| RelayerError::Conflict(format!("swap {} is gone", swap.id)))?;
                if stored.status != expected {
                    return Err(RelayerError::Conflict(format!(
                        "swap {} is {}, expected {}",
                        swap.id, stored.status, expected
                    )));
                }
                swap.create_time = stored.create_time;
                swap.update_time = now;
                *stored = swap;
                Ok(None)
            }
            Mutation::InsertSwapPairSm(mut record) => {
                let id = self.next_id();
                record.id = id;
                record.create_time = now;
                record.update_time = now;
                self.swap_pair_sms.insert(id, record);
                Ok(Some(id))
            }
            Mutation::UpdateSwapPairSm {
                mut record,
                expected,
            } => {
                let stored = self.swap_pair_sms.get_mut(&record.id).ok_or_else(|| {
                    RelayerError::Conflict(format!("swap pair sm {} is gone", record.id))
                })?;
                if stored.status != expected {
                    return Err(RelayerError::Conflict(format!(
                        "swap pair sm {} is {}, expected {}",
                        record.id, stored.status, expected
                    )));
                }
                record.create_time = stored.create_time;
                record.update_time = now;
                *stored = record;
                Ok(None)
            }
            Mutation::InsertSwapPair(mut pair) => {
                if self
                    .swap_pairs
                    .values()
                    .any(|p| p.erc20_addr == pair.erc20_addr)
                {
                    return Err(RelayerError::Conflict(format!(
                        "swap pair for {:?} already published",
                        pair.erc20_addr
                    )));
                }
                let id = self.next_id();
                pair.id = id;
                pair.create_time = now;
                self.swap_pairs.insert(id, pair);
                Ok(Some(id))
            }
            Mutation::InsertTx(mut tx) => {
                if self.txs.values().any(|t| t.tx_hash == tx.tx_hash) {
                    return Err(RelayerError::Conflict(format!(
                        "tx {:?} already tracked",
                        tx.tx_hash
                    )));
                }
                let id = self.next_id();
                tx.id = id;
                tx.create_time = now;
                tx.update_time = now;
                self.txs.insert(id, tx);
                Ok(Some(id))
            }
            Mutation::UpdateTx { mut tx, expected } => {
                let stored = self
                    .txs
                    .get_mut(&tx.id)
                    .ok_or_else(|| RelayerError::Conflict(format!("tx row {} is gone", tx.id)))?;
                if stored.status != expected {
                    return Err(RelayerError::Conflict(format!(
                        "tx row {} is {}, expected {}",
                        tx.id, stored.status, expected
                    )));
                }
                tx.create_time = stored.create_time;
                tx.update_time = now;
                *stored = tx;
                Ok(None)
            }
            Mutation::InsertRetrySwap(mut retry) => {
                let id = self.next_id();
                retry.id = id;
                retry.create_time = now;
                retry.update_time = now;
                self.retry_swaps.insert(id, retry);
                Ok(Some(id))
            }
            Mutation::UpdateRetrySwap {
                mut retry,
                expected_done,
            } => {
                let stored = self.retry_swaps.get_mut(&retry.id).ok_or_else(|| {
                    RelayerError::Conflict(format!("retry swap {} is gone", retry.id))
                })?;
                if stored.done != expected_done {
                    return Err(RelayerError::Conflict(format!(
                        "retry swap {} has done={}, expected {}",
                        retry.id, stored.done, expected_done
                    )));
                }
                retry.create_time = stored.create_time;
                retry.update_time = now;
                *stored = retry;
                Ok(None)
            }
        }
    }
}

/// Record store kept in process memory
///
/// A batch is applied to a scratch copy of the tables and only swapped in once
/// every mutation succeeded, which gives the same all-or-nothing behavior as a
/// database transaction.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    #[cfg(test)]
    fail_tx_updates: std::sync::atomic::AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RelayerResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| RelayerError::Store("in-memory store lock poisoned".to_string()))
    }

    /// Make every batch carrying a tx row update fail like a lost database
    #[cfg(test)]
    pub fn fail_tx_updates(&self, fail: bool) {
        self.fail_tx_updates
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Edit a swap row directly, bypassing the engines
    #[cfg(test)]
    pub fn tamper_swap(&self, id: i64, edit: impl FnOnce(&mut Swap)) {
        let mut tables = self.tables.lock().unwrap();
        edit(tables.swaps.get_mut(&id).unwrap());
    }

    /// Edit a swap-pair row directly, bypassing the engines
    #[cfg(test)]
    pub fn tamper_swap_pair_sm(&self, id: i64, edit: impl FnOnce(&mut SwapPairSm)) {
        let mut tables = self.tables.lock().unwrap();
        edit(tables.swap_pair_sms.get_mut(&id).unwrap());
    }

    /// Every tracking row, for assertions
    #[cfg(test)]
    pub fn all_txs(&self) -> Vec<TxRecord> {
        self.tables.lock().unwrap().txs.values().cloned().collect()
    }

    #[cfg(test)]
    pub fn all_swaps(&self) -> Vec<Swap> {
        self.tables.lock().unwrap().swaps.values().cloned().collect()
    }

    #[cfg(test)]
    pub fn all_swap_pair_sms(&self) -> Vec<SwapPairSm> {
        self.tables
            .lock()
            .unwrap()
            .swap_pair_sms
            .values()
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub fn all_retry_swaps(&self) -> Vec<RetrySwap> {
        self.tables
            .lock()
            .unwrap()
            .retry_swaps
            .values()
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub fn event_phase(&self, id: i64) -> Option<super::models::EventPhase> {
        self.tables.lock().unwrap().events.get(&id).map(|e| e.phase)
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn apply(&self, batch: Vec<Mutation>) -> RelayerResult<Vec<i64>> {
        #[cfg(test)]
        if self.fail_tx_updates.load(std::sync::atomic::Ordering::SeqCst)
            && batch.iter().any(|m| matches!(m, Mutation::UpdateTx { .. }))
        {
            return Err(RelayerError::Store("connection reset".to_string()));
        }

        let mut tables = self.lock()?;
        let mut scratch = tables.clone();
        let mut ids = Vec::new();

        for mutation in batch {
            if let Some(id) = scratch.apply(mutation)? {
                ids.push(id);
            }
        }

        *tables = scratch;
        Ok(ids)
    }

    async fn tip(&self, chain: Chain) -> RelayerResult<Option<BlockLog>> {
        let tables = self.lock()?;
        Ok(tables
            .blocks
            .range((chain, 0)..=(chain, u64::MAX))
            .next_back()
            .map(|(_, b)| b.clone()))
    }

    async fn blocks(&self, chain: Chain) -> RelayerResult<Vec<BlockLog>> {
        let tables = self.lock()?;
        Ok(tables
            .blocks
            .range((chain, 0)..=(chain, u64::MAX))
            .map(|(_, b)| b.clone())
            .collect())
    }

    async fn events(&self, query: &EventQuery) -> RelayerResult<Vec<EventTxLog>> {
        let tables = self.lock()?;
        let mut events: Vec<EventTxLog> = tables
            .events
            .values()
            .filter(|e| e.kind == query.kind && e.phase == query.phase)
            .filter(|e| query.status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.height, e.id));
        events.truncate(query.limit);
        Ok(events)
    }

    async fn rollback_block(&self, chain: Chain, height: u64) -> RelayerResult<RollbackSummary> {
        let mut tables = self.lock()?;
        let mut summary = RollbackSummary::default();

        if tables.blocks.remove(&(chain, height)).is_some() {
            summary.blocks = 1;
        }

        let orphaned: Vec<i64> = tables
            .events
            .values()
            .filter(|e| e.chain == chain && e.height == height && e.status == EventStatus::Init)
            .map(|e| e.id)
            .collect();
        let mut orphaned_txs = HashSet::new();
        for id in orphaned {
            if let Some(event) = tables.events.remove(&id) {
                orphaned_txs.insert(event.tx_hash);
                summary.events += 1;
            }
        }

        let direction = SwapDirection::from_source(chain);
        let before = tables.swaps.len();
        tables.swaps.retain(|_, s| {
            !(s.direction == direction
                && s.status == SwapStatus::Received
                && orphaned_txs.contains(&s.start_tx_hash))
        });
        summary.swaps = (before - tables.swaps.len()) as u64;

        if chain == Chain::Eth {
            let before = tables.swap_pair_sms.len();
            tables.swap_pair_sms.retain(|_, p| {
                !(p.status == SwapPairStatus::Received
                    && orphaned_txs.contains(&p.register_tx_hash))
            });
            summary.swap_pairs = (before - tables.swap_pair_sms.len()) as u64;
        }

        Ok(summary)
    }

    async fn refresh_confirmations(
        &self,
        chain: Chain,
        current_height: u64,
        required: u64,
    ) -> RelayerResult<u64> {
        let mut tables = self.lock()?;
        let now = Utc::now();
        let mut confirmed = 0;

        for event in tables
            .events
            .values_mut()
            .filter(|e| e.chain == chain && e.status == EventStatus::Init)
        {
            let count = crate::chain::finality::confirmations(current_height, event.height);
            event.confirmed_num = event.confirmed_num.max(count);
            if event.confirmed_num >= required {
                event.status = EventStatus::Confirmed;
                confirmed += 1;
            }
            event.update_time = now;
        }

        Ok(confirmed)
    }

    async fn prune_blocks(&self, chain: Chain, below_height: u64) -> RelayerResult<u64> {
        let mut tables = self.lock()?;
        let before = tables.blocks.len();
        tables
            .blocks
            .retain(|(c, h), _| !(*c == chain && *h < below_height));
        Ok((before - tables.blocks.len()) as u64)
    }

    async fn swap(&self, id: i64) -> RelayerResult<Option<Swap>> {
        Ok(self.lock()?.swaps.get(&id).cloned())
    }

    async fn swap_by_start_tx(
        &self,
        direction: SwapDirection,
        start_tx_hash: H256,
    ) -> RelayerResult<Option<Swap>> {
        Ok(self
            .lock()?
            .swaps
            .values()
            .find(|s| s.direction == direction && s.start_tx_hash == start_tx_hash)
            .cloned())
    }

    async fn swaps_with_status(
        &self,
        statuses: &[SwapStatus],
        limit: usize,
    ) -> RelayerResult<Vec<Swap>> {
        Ok(self
            .lock()?
            .swaps
            .values()
            .filter(|s| statuses.contains(&s.status))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn swap_pair_sm(&self, id: i64) -> RelayerResult<Option<SwapPairSm>> {
        Ok(self.lock()?.swap_pair_sms.get(&id).cloned())
    }

    async fn swap_pair_sm_by_register_tx(
        &self,
        register_tx_hash: H256,
    ) -> RelayerResult<Option<SwapPairSm>> {
        Ok(self
            .lock()?
            .swap_pair_sms
            .values()
            .find(|p| p.register_tx_hash == register_tx_hash)
            .cloned())
    }

    async fn swap_pair_sms_with_status(
        &self,
        statuses: &[SwapPairStatus],
        limit: usize,
    ) -> RelayerResult<Vec<SwapPairSm>> {
        Ok(self
            .lock()?
            .swap_pair_sms
            .values()
            .filter(|p| statuses.contains(&p.status))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn swap_pairs(&self) -> RelayerResult<Vec<SwapPair>> {
        Ok(self.lock()?.swap_pairs.values().cloned().collect())
    }

    async fn swap_pair_by_erc20(&self, erc20: Address) -> RelayerResult<Option<SwapPair>> {
        Ok(self
            .lock()?
            .swap_pairs
            .values()
            .find(|p| p.erc20_addr == erc20)
            .cloned())
    }

    async fn txs_with_status(
        &self,
        kind: TxKind,
        status: TxStatus,
        limit: usize,
    ) -> RelayerResult<Vec<TxRecord>> {
        Ok(self
            .lock()?
            .txs
            .values()
            .filter(|t| t.kind == kind && t.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn active_tx_for_owner(
        &self,
        kind: TxKind,
        owner_id: i64,
    ) -> RelayerResult<Option<TxRecord>> {
        Ok(self
            .lock()?
            .txs
            .values()
            .rev()
            .find(|t| t.kind == kind && t.owner_id == owner_id && t.status.is_live())
            .cloned())
    }

    async fn retry_swap(&self, id: i64) -> RelayerResult<Option<RetrySwap>> {
        Ok(self.lock()?.retry_swaps.get(&id).cloned())
    }

    async fn retry_swaps_pending(&self, limit: usize) -> RelayerResult<Vec<RetrySwap>> {
        Ok(self
            .lock()?
            .retry_swaps
            .values()
            .filter(|r| !r.done)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn has_pending_retry(&self, swap_id: i64) -> RelayerResult<bool> {
        let tables = self.lock()?;
        let pending = tables.retry_swaps.values().any(|r| {
            r.swap_id == swap_id
                && (!r.done
                    || tables.txs.values().any(|t| {
                        t.kind == TxKind::RetrySwap
                            && t.owner_id == r.id
                            && matches!(t.status, TxStatus::Created | TxStatus::Sent)
                    }))
        });
        Ok(pending)
    }

    async fn stats(&self) -> RelayerResult<StoreStats> {
        let tables = self.lock()?;
        let mut stats = StoreStats::default();
        for swap in tables.swaps.values() {
            *stats.swaps.entry(swap.status.to_string()).or_default() += 1;
        }
        for pair in tables.swap_pair_sms.values() {
            *stats.swap_pairs.entry(pair.status.to_string()).or_default() += 1;
        }
        stats.pending_retries = tables.retry_swaps.values().filter(|r| !r.done).count() as u64;
        stats.published_pairs = tables.swap_pairs.len() as u64;
        Ok(stats)
    }

    async fn health_check(&self) -> RelayerResult<()> {
        self.lock().map(|_| ())
    }
}
