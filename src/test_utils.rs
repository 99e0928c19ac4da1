//! Shared fakes and fixtures for unit tests

use crate::alert::Notifier;
use crate::chain::{BlockHeader, CallRequest, Chain, EventSource, PerChain, TxReceipt};
use crate::engine::EngineContext;
use crate::error::{RelayerError, RelayerResult};
use crate::events::SwapAgentAbi;
use crate::integrity::RecordHasher;
use crate::state::models::{
    BlockLog, EventKind, EventPhase, EventStatus, EventTxLog, Swap, SwapDirection, SwapPair,
    TxKind, TxRecord, TxStatus,
};
use crate::state::{InMemoryStore, Mutation, RecordStore};
use crate::swap::SwapStatus;
use crate::tx::{ChainSender, SignRequest, TransactionSigner, TxTracker};

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, Bytes, Log, H256, U256};
use ethers::utils::keccak256;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn hash(byte: u8) -> H256 {
    H256::repeat_byte(byte)
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

fn header_hash(height: u64, fork: u8) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&height.to_be_bytes());
    bytes[8] = fork;
    bytes[31] = 0xff;
    H256::from(bytes)
}

#[derive(Default)]
struct ChainState {
    headers: BTreeMap<u64, BlockHeader>,
    logs: HashMap<H256, Vec<Log>>,
    receipts: HashMap<H256, TxReceipt>,
    head: Option<u64>,
    nonce: u64,
    gas_estimate: Option<U256>,
    broadcasts: Vec<Bytes>,
    broadcast_error: Option<String>,
    broadcast_timeout: bool,
    unreachable: bool,
}

/// Scriptable in-process chain
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    /// Produce headers `from..=to` on fork `fork`, replacing any already at those heights
    pub fn extend_chain(&self, from: u64, to: u64, fork: u8) -> Vec<BlockHeader> {
        let mut state = self.state();
        let mut parent = match from.checked_sub(1) {
            Some(prev) => state
                .headers
                .get(&prev)
                .map(|h| h.hash)
                .unwrap_or_else(|| header_hash(prev, fork)),
            None => H256::zero(),
        };

        let mut produced = Vec::new();
        for height in from..=to {
            let header = BlockHeader {
                height,
                hash: header_hash(height, fork),
                parent_hash: parent,
                time: 1_700_000_000 + height,
            };
            parent = header.hash;
            state.headers.insert(height, header.clone());
            produced.push(header);
        }
        produced
    }

    pub fn add_log(&self, block_hash: H256, log: Log) {
        self.state().logs.entry(block_hash).or_default().push(log);
    }

    pub fn set_receipt(&self, tx_hash: H256, receipt: TxReceipt) {
        self.state().receipts.insert(tx_hash, receipt);
    }

    /// Mine every broadcast transaction at `height` with the given receipt status
    pub fn mine_broadcasts(&self, height: u64, status: u64) -> Vec<H256> {
        let mut state = self.state();
        let hashes: Vec<H256> = state
            .broadcasts
            .iter()
            .map(|raw| H256::from(keccak256(raw)))
            .collect();
        for tx_hash in &hashes {
            state.receipts.entry(*tx_hash).or_insert(TxReceipt {
                status,
                block_number: height,
                gas_used: U256::from(21_000),
                logs: vec![],
            });
        }
        hashes
    }

    pub fn set_head(&self, height: u64) {
        self.state().head = Some(height);
    }

    pub fn set_gas_estimate(&self, gas: U256) {
        self.state().gas_estimate = Some(gas);
    }

    pub fn fail_broadcasts_with(&self, message: &str) {
        self.state().broadcast_error = Some(message.to_string());
    }

    /// Broadcasts reach the mempool but the call itself times out
    pub fn time_out_broadcasts(&self, enabled: bool) {
        self.state().broadcast_timeout = enabled;
    }

    pub fn broadcasts(&self) -> Vec<Bytes> {
        self.state().broadcasts.clone()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    fn reachable(state: &ChainState) -> RelayerResult<()> {
        if state.unreachable {
            return Err(RelayerError::ChainConnection {
                chain: "fake".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EventSource for FakeChain {
    async fn header_at(&self, height: u64) -> RelayerResult<Option<BlockHeader>> {
        let state = self.state();
        Self::reachable(&state)?;
        Ok(state.headers.get(&height).cloned())
    }

    async fn logs(
        &self,
        block_hash: H256,
        topics: &[H256],
        contract: Address,
    ) -> RelayerResult<Vec<Log>> {
        let state = self.state();
        Self::reachable(&state)?;
        Ok(state
            .logs
            .get(&block_hash)
            .map(|logs| {
                logs.iter()
                    .filter(|log| log.address == contract)
                    .filter(|log| log.topics.first().is_some_and(|t| topics.contains(t)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn receipt(&self, tx_hash: H256) -> RelayerResult<Option<TxReceipt>> {
        let state = self.state();
        Self::reachable(&state)?;
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn head(&self) -> RelayerResult<u64> {
        let state = self.state();
        Self::reachable(&state)?;
        Ok(state
            .head
            .or_else(|| state.headers.keys().next_back().copied())
            .unwrap_or_default())
    }

    async fn pending_nonce(&self, _address: Address) -> RelayerResult<u64> {
        let state = self.state();
        Self::reachable(&state)?;
        Ok(state.nonce)
    }

    async fn suggest_gas_price(&self) -> RelayerResult<U256> {
        Ok(U256::from(5_000_000_000u64))
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> RelayerResult<U256> {
        Ok(self.state().gas_estimate.unwrap_or(U256::from(60_000)))
    }

    async fn chain_id(&self) -> RelayerResult<u64> {
        Ok(1)
    }

    async fn broadcast(&self, signed_tx: Bytes) -> RelayerResult<H256> {
        let mut state = self.state();
        Self::reachable(&state)?;
        if let Some(message) = &state.broadcast_error {
            return Err(RelayerError::from_broadcast(message.clone()));
        }
        let tx_hash = H256::from(keccak256(&signed_tx));
        state.broadcasts.push(signed_tx);
        state.nonce += 1;
        if state.broadcast_timeout {
            return Err(RelayerError::Timeout {
                operation: "eth_sendRawTransaction".to_string(),
            });
        }
        Ok(tx_hash)
    }
}

/// Signer producing distinct bytes per chain and nonce
#[derive(Default)]
pub struct FakeSigner {
    requests: Mutex<Vec<SignRequest>>,
}

impl FakeSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<SignRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionSigner for FakeSigner {
    async fn sign(&self, request: &SignRequest) -> RelayerResult<Bytes> {
        self.requests.lock().unwrap().push(request.clone());
        let mut raw = Vec::new();
        raw.extend_from_slice(&request.chain_id.to_be_bytes());
        raw.extend_from_slice(&request.nonce.to_be_bytes());
        raw.extend_from_slice(request.to.as_bytes());
        raw.extend_from_slice(&request.data);
        Ok(Bytes::from(raw))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn alert(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

pub fn sample_swap(id: i64) -> Swap {
    let now = Utc::now();
    Swap {
        id,
        status: SwapStatus::Received,
        direction: SwapDirection::EthToBsc,
        sponsor: addr(0x01),
        erc20_addr: addr(0x11),
        bep20_addr: addr(0x22),
        symbol: "TT".to_string(),
        decimals: 18,
        amount: "500".to_string(),
        start_tx_hash: hash(0xa0),
        fill_tx_hash: None,
        log: String::new(),
        record_hash: String::new(),
        create_time: now,
        update_time: now,
    }
}

pub fn sample_pair(erc20: u8, bep20: u8) -> SwapPair {
    SwapPair {
        id: 0,
        symbol: "TT".to_string(),
        name: "Test Token".to_string(),
        decimals: 18,
        erc20_addr: addr(erc20),
        bep20_addr: addr(bep20),
        low_bound: "0".to_string(),
        upper_bound: "1000".to_string(),
        available: true,
        create_time: Utc::now(),
    }
}

pub fn sample_block(chain: Chain, height: u64, hash_byte: u8, parent_byte: u8) -> BlockLog {
    BlockLog {
        id: 0,
        chain,
        height,
        block_hash: hash(hash_byte),
        parent_hash: hash(parent_byte),
        block_time: 1_700_000_000 + height,
        create_time: Utc::now(),
    }
}

/// A freshly observed ETH->BSC or BSC->ETH swap start
pub fn sample_event(chain: Chain, height: u64, tx_hash: H256) -> EventTxLog {
    EventTxLog {
        id: 0,
        kind: EventKind::SwapStart,
        chain,
        token_addr: match chain {
            Chain::Eth => addr(0x11),
            Chain::Bsc => addr(0x22),
        },
        peer_token_addr: match chain {
            Chain::Eth => None,
            Chain::Bsc => Some(addr(0x11)),
        },
        participant: addr(0x01),
        amount: "500".to_string(),
        fee_amount: "0".to_string(),
        name: String::new(),
        symbol: String::new(),
        decimals: 0,
        tx_hash,
        log_index: 0,
        block_hash: header_hash(height, 0),
        height,
        confirmed_num: 1,
        status: EventStatus::Init,
        phase: EventPhase::Seen,
        update_time: Utc::now(),
    }
}

pub fn sample_tx(chain: Chain, tx_hash: H256) -> TxRecord {
    let now = Utc::now();
    TxRecord {
        id: 0,
        kind: TxKind::SwapFill,
        owner_id: 1,
        chain,
        tx_hash,
        nonce: 0,
        gas_price: U256::from(5_000_000_000u64),
        consumed_fee: None,
        height: None,
        status: TxStatus::Sent,
        track_retry_counter: 0,
        error_msg: String::new(),
        create_time: now,
        update_time: now,
    }
}

pub const MAX_TRACK_RETRY: u32 = 3;

/// Both chains, a shared store and an engine context wired over fakes
pub struct TestBridge {
    pub eth: Arc<FakeChain>,
    pub bsc: Arc<FakeChain>,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub signer: Arc<FakeSigner>,
    pub abi: Arc<SwapAgentAbi>,
    pub ctx: EngineContext,
}

impl TestBridge {
    pub fn new() -> Self {
        let eth = Arc::new(FakeChain::new());
        let bsc = Arc::new(FakeChain::new());
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let signer = Arc::new(FakeSigner::new());
        let abi = Arc::new(SwapAgentAbi::new().unwrap());

        let eth_source: Arc<dyn EventSource> = eth.clone();
        let bsc_source: Arc<dyn EventSource> = bsc.clone();
        let store_dyn: Arc<dyn RecordStore> = store.clone();
        let notifier_dyn: Arc<dyn Notifier> = notifier.clone();

        let sender = |chain: Chain, chain_id: u64, source: Arc<dyn EventSource>| {
            Arc::new(ChainSender::new(
                chain,
                chain_id,
                Self::relayer(),
                source,
                signer.clone(),
                store_dyn.clone(),
                notifier_dyn.clone(),
            ))
        };
        let senders = PerChain::new(
            sender(Chain::Eth, 1, eth_source.clone()),
            sender(Chain::Bsc, 56, bsc_source.clone()),
        );

        let ctx = EngineContext {
            store: store_dyn.clone(),
            hasher: Arc::new(RecordHasher::new("test-key")),
            abi: abi.clone(),
            senders,
            tracker: Arc::new(TxTracker::new(
                PerChain::new(eth_source, bsc_source),
                PerChain::new(1, 1),
                MAX_TRACK_RETRY,
            )),
            notifier: notifier.clone(),
            agents: PerChain::new(Self::eth_agent(), Self::bsc_agent()),
            batch_size: 50,
            send_tx_delay: Duration::ZERO,
        };

        Self {
            eth,
            bsc,
            store,
            notifier,
            signer,
            abi,
            ctx,
        }
    }

    pub fn relayer() -> Address {
        addr(0xaa)
    }

    pub fn eth_agent() -> Address {
        addr(0xe1)
    }

    pub fn bsc_agent() -> Address {
        addr(0xb1)
    }

    pub async fn seed_pair(&self, pair: SwapPair) {
        self.store
            .apply(vec![Mutation::InsertSwapPair(pair)])
            .await
            .unwrap();
    }

    /// Insert an observed event and return its id
    pub async fn seed_event(&self, event: EventTxLog) -> i64 {
        self.store
            .apply(vec![Mutation::InsertEvent(event)])
            .await
            .unwrap()[0]
    }

    /// Let the observer's confirmation accounting confirm every event of `chain`
    pub async fn confirm_events(&self, chain: Chain) {
        self.store
            .refresh_confirmations(chain, 10_000, 1)
            .await
            .unwrap();
    }

    pub fn event_phase(&self, id: i64) -> EventPhase {
        self.store.event_phase(id).unwrap()
    }
}
