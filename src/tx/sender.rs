//! Serialized build, sign, persist and broadcast for one destination chain

use super::gas::GasEstimator;
use super::signer::{SignRequest, TransactionSigner};
use crate::alert::Notifier;
use crate::chain::{CallRequest, Chain, EventSource};
use crate::error::{RelayerError, RelayerResult};
use crate::state::models::{TxKind, TxRecord, TxStatus};
use crate::state::{Mutation, RecordStore};

use chrono::Utc;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// A contract call to send on behalf of a state machine row
#[derive(Debug, Clone)]
pub struct Outbound {
    pub kind: TxKind,
    pub owner_id: i64,
    pub to: Address,
    pub data: Bytes,
}

/// Single-writer handle for the relayer account on one chain
///
/// Every send holds `nonce_lock` from the pending-nonce lookup until the
/// broadcast returns, so two sends on the same chain never race for a nonce.
pub struct ChainSender {
    chain: Chain,
    chain_id: u64,
    from: Address,
    source: Arc<dyn EventSource>,
    signer: Arc<dyn TransactionSigner>,
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    gas: GasEstimator,
    nonce_lock: Mutex<()>,
}

impl ChainSender {
    pub fn new(
        chain: Chain,
        chain_id: u64,
        from: Address,
        source: Arc<dyn EventSource>,
        signer: Arc<dyn TransactionSigner>,
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            chain,
            chain_id,
            from,
            source,
            signer,
            store,
            notifier,
            gas: GasEstimator::new(),
            nonce_lock: Mutex::new(()),
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Build, sign and broadcast `outbound`, persisting its tracking row first.
    ///
    /// Returns the tracking row (status `Created`) once the node accepted the
    /// transaction or the broadcast outcome is unknown. A definite rejection
    /// marks the row `Failed` and is returned as the error.
    pub async fn send(&self, outbound: Outbound) -> RelayerResult<TxRecord> {
        let _guard = self.nonce_lock.lock().await;

        let nonce = self.source.pending_nonce(self.from).await?;
        let gas_price = self.source.suggest_gas_price().await?;
        let call = CallRequest {
            from: self.from,
            to: outbound.to,
            data: outbound.data.clone(),
        };
        let gas_limit = self.gas.gas_limit(self.source.as_ref(), &call).await?;

        let raw = self
            .signer
            .sign(&SignRequest {
                from: self.from,
                to: outbound.to,
                value: U256::zero(),
                data: outbound.data,
                chain_id: self.chain_id,
                nonce,
                gas_price,
                gas_limit,
            })
            .await?;
        let tx_hash = H256::from(keccak256(&raw));

        let now = Utc::now();
        let mut record = TxRecord {
            id: 0,
            kind: outbound.kind,
            owner_id: outbound.owner_id,
            chain: self.chain,
            tx_hash,
            nonce,
            gas_price,
            consumed_fee: None,
            height: None,
            status: TxStatus::Created,
            track_retry_counter: 0,
            error_msg: String::new(),
            create_time: now,
            update_time: now,
        };
        let ids = self
            .store
            .apply(vec![Mutation::InsertTx(record.clone())])
            .await?;
        record.id = ids
            .first()
            .copied()
            .ok_or_else(|| RelayerError::Internal("tx insert returned no id".to_string()))?;

        match self.source.broadcast(raw).await {
            Ok(accepted) => {
                if accepted != tx_hash {
                    warn!(
                        "Node reported hash {:?} for {:?} on {}",
                        accepted, tx_hash, self.chain
                    );
                }
                info!(
                    "Broadcast {} tx {:?} for owner {} on {} (nonce {})",
                    record.kind, tx_hash, record.owner_id, self.chain, nonce
                );
                crate::metrics::record_tx_broadcast(self.chain, record.kind);
                Ok(record)
            }
            Err(e @ RelayerError::Timeout { .. }) => {
                // may or may not have reached the mempool; the tracker decides
                warn!(
                    "Broadcast of {:?} on {} timed out, tracking anyway: {}",
                    tx_hash, self.chain, e
                );
                crate::metrics::record_tx_broadcast(self.chain, record.kind);
                Ok(record)
            }
            Err(e) => {
                let mut failed = record.clone();
                failed.status = TxStatus::Failed;
                failed.error_msg = e.to_string();
                if let Err(db) = self
                    .store
                    .apply(vec![Mutation::UpdateTx {
                        tx: failed,
                        expected: TxStatus::Created,
                    }])
                    .await
                {
                    error!("Failed to mark tx row {} failed: {}", record.id, db);
                    self.notifier
                        .alert(&format!(
                            "{} tx {:?} on {} was rejected ({}) but row {} is still created: {}",
                            record.kind, tx_hash, self.chain, e, record.id, db
                        ))
                        .await;
                }
                crate::metrics::record_tx_failed(self.chain, record.kind);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStore;
    use crate::test_utils::{FakeChain, FakeSigner, RecordingNotifier};
    use crate::tx::signer::MockTransactionSigner;

    fn outbound() -> Outbound {
        Outbound {
            kind: TxKind::SwapFill,
            owner_id: 7,
            to: Address::repeat_byte(0xbb),
            data: Bytes::from(vec![1, 2, 3]),
        }
    }

    #[tokio::test]
    async fn test_row_is_persisted_with_hash_of_signed_bytes() {
        let chain = Arc::new(FakeChain::new());
        chain.set_gas_estimate(U256::from(50_000));
        let signer = Arc::new(FakeSigner::new());
        let store = Arc::new(InMemoryStore::new());
        let sender = ChainSender::new(
            Chain::Bsc,
            56,
            Address::repeat_byte(0xaa),
            chain.clone(),
            signer.clone(),
            store.clone(),
            Arc::new(RecordingNotifier::new()),
        );

        let tx = sender.send(outbound()).await.unwrap();

        let requests = signer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].gas_limit, U256::from(100_000));
        assert_eq!(requests[0].chain_id, 56);

        let broadcast = chain.broadcasts();
        assert_eq!(broadcast.len(), 1);
        assert_eq!(tx.tx_hash, H256::from(keccak256(&broadcast[0])));
        assert_eq!(tx.status, TxStatus::Created);
        let rows = store.all_txs();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tx_hash, tx.tx_hash);
        assert_eq!(rows[0].owner_id, 7);
    }

    #[tokio::test]
    async fn test_rejected_broadcast_marks_row_failed() {
        let chain = Arc::new(FakeChain::new());
        chain.fail_broadcasts_with("insufficient funds for gas * price + value");
        let store = Arc::new(InMemoryStore::new());
        let sender = ChainSender::new(
            Chain::Eth,
            1,
            Address::zero(),
            chain,
            Arc::new(FakeSigner::new()),
            store.clone(),
            Arc::new(RecordingNotifier::new()),
        );

        let err = sender.send(outbound()).await.unwrap_err();
        assert!(matches!(err, RelayerError::Broadcast(_)));

        let rows = store.all_txs();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TxStatus::Failed);
        assert!(rows[0].error_msg.contains("insufficient funds"));
    }

    #[tokio::test]
    async fn test_signer_failure_persists_nothing() {
        let mut signer = MockTransactionSigner::new();
        signer
            .expect_sign()
            .times(1)
            .returning(|_| Err(RelayerError::Signer("hsm offline".to_string())));
        let chain = Arc::new(FakeChain::new());
        let store = Arc::new(InMemoryStore::new());
        let sender = ChainSender::new(
            Chain::Eth,
            1,
            Address::zero(),
            chain.clone(),
            Arc::new(signer),
            store.clone(),
            Arc::new(RecordingNotifier::new()),
        );

        let err = sender.send(outbound()).await.unwrap_err();
        assert!(matches!(err, RelayerError::Signer(_)));
        assert!(store.all_txs().is_empty());
        assert!(chain.broadcasts().is_empty());
    }

    #[tokio::test]
    async fn test_unrecorded_rejection_alerts() {
        let chain = Arc::new(FakeChain::new());
        chain.fail_broadcasts_with("nonce too low");
        let store = Arc::new(InMemoryStore::new());
        store.fail_tx_updates(true);
        let notifier = Arc::new(RecordingNotifier::new());
        let sender = ChainSender::new(
            Chain::Bsc,
            56,
            Address::zero(),
            chain,
            Arc::new(FakeSigner::new()),
            store.clone(),
            notifier.clone(),
        );

        let err = sender.send(outbound()).await.unwrap_err();
        assert!(matches!(err, RelayerError::Broadcast(_)));
        assert_eq!(store.all_txs()[0].status, TxStatus::Created);

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("still created"));
    }
}
