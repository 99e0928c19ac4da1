//! Chain observer: ingests blocks one at a time, rolls back reorged tips and
//! keeps event confirmation counts current
//!
//! Reorgs are only detected against the stored tip. History is pruned to a
//! window behind the tip, so a reorg deeper than the window is outside what
//! the observer can repair.

use super::source::{BlockHeader, EventSource};
use super::{finality, Chain};
use crate::alert::Notifier;
use crate::error::{RelayerError, RelayerResult};
use crate::events::{BridgeEvent, SwapAgentAbi};
use crate::state::models::{
    BlockLog, EventKind, EventPhase, EventStatus, EventTxLog, RollbackSummary,
};
use crate::state::{Mutation, RecordStore};

use chrono::{DateTime, Utc};
use ethers::types::{Address, Log, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// First height ingested when the chain has no stored blocks
    pub start_height: u64,
    pub confirmations: u64,
    pub fetch_interval: Duration,
    /// Swap agent contract whose logs are recorded
    pub contract: Address,
    pub prune_window: u64,
    pub liveness_threshold: Duration,
}

/// Result of one `fetch_next` call
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Ingested { height: u64, events: usize },
    /// The stored tip was orphaned and removed
    Reorged { height: u64, summary: RollbackSummary },
    /// The chain has not produced the next block yet
    Waiting,
}

pub struct ChainObserver {
    chain: Chain,
    source: Arc<dyn EventSource>,
    store: Arc<dyn RecordStore>,
    abi: Arc<SwapAgentAbi>,
    notifier: Arc<dyn Notifier>,
    config: ObserverConfig,
    topics: Vec<H256>,
}

impl ChainObserver {
    pub fn new(
        chain: Chain,
        source: Arc<dyn EventSource>,
        store: Arc<dyn RecordStore>,
        abi: Arc<SwapAgentAbi>,
        notifier: Arc<dyn Notifier>,
        config: ObserverConfig,
    ) -> RelayerResult<Self> {
        let topics = abi.observed_topics(chain)?;
        Ok(Self {
            chain,
            source,
            store,
            abi,
            notifier,
            config,
            topics,
        })
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Ingest the block after the stored tip, or roll the tip back if the
    /// candidate does not build on it
    pub async fn fetch_next(&self) -> RelayerResult<FetchOutcome> {
        let tip = self.store.tip(self.chain).await?;
        let next = tip
            .as_ref()
            .map_or(self.config.start_height, |t| t.height + 1);

        let Some(header) = self.source.header_at(next).await? else {
            return Ok(FetchOutcome::Waiting);
        };

        if let Some(tip) = &tip {
            if header.parent_hash != tip.block_hash {
                warn!(
                    "Reorg on {}: block {} parent {:?} does not match tip {:?}",
                    self.chain, header.height, header.parent_hash, tip.block_hash
                );
                let summary = self.store.rollback_block(self.chain, tip.height).await?;
                crate::metrics::record_reorg(self.chain);
                info!(
                    "Rolled back {} height {}: {} events, {} swaps, {} swap pairs",
                    self.chain, tip.height, summary.events, summary.swaps, summary.swap_pairs
                );
                return Ok(FetchOutcome::Reorged {
                    height: tip.height,
                    summary,
                });
            }
        }

        let logs = self
            .source
            .logs(header.hash, &self.topics, self.config.contract)
            .await?;

        let mut batch = vec![Mutation::InsertBlock(BlockLog {
            id: 0,
            chain: self.chain,
            height: header.height,
            block_hash: header.hash,
            parent_hash: header.parent_hash,
            block_time: header.time,
            create_time: Utc::now(),
        })];

        let mut events = 0;
        for log in &logs {
            match self.event_row(&header, log) {
                Ok(Some(row)) => {
                    crate::metrics::record_event_observed(self.chain, row.kind);
                    batch.push(Mutation::InsertEvent(row));
                    events += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "Skipping undecodable log in {} block {}: {}",
                    self.chain, header.height, e
                ),
            }
        }

        self.store.apply(batch).await?;
        crate::metrics::record_block_ingested(self.chain, header.height);

        let confirmed = self
            .store
            .refresh_confirmations(self.chain, header.height, self.config.confirmations)
            .await?;

        debug!(
            "Ingested {} block {} with {} events ({} newly confirmed)",
            self.chain, header.height, events, confirmed
        );

        Ok(FetchOutcome::Ingested {
            height: header.height,
            events,
        })
    }

    fn event_row(&self, header: &BlockHeader, log: &Log) -> RelayerResult<Option<EventTxLog>> {
        let Some(event) = self.abi.decode(self.chain, log)? else {
            return Ok(None);
        };
        let tx_hash = log
            .transaction_hash
            .ok_or_else(|| RelayerError::EventParsing("log without tx hash".to_string()))?;
        debug!(
            "{} {} in tx {:?} at height {}",
            self.chain,
            event.name(),
            tx_hash,
            header.height
        );

        let mut row = EventTxLog {
            id: 0,
            kind: EventKind::SwapStart,
            chain: self.chain,
            token_addr: Address::zero(),
            peer_token_addr: None,
            participant: Address::zero(),
            amount: String::new(),
            fee_amount: String::new(),
            name: String::new(),
            symbol: String::new(),
            decimals: 0,
            tx_hash,
            log_index: log.log_index.map(|i| i.as_u64()).unwrap_or_default(),
            block_hash: header.hash,
            height: header.height,
            confirmed_num: 0,
            status: EventStatus::Init,
            phase: EventPhase::Seen,
            update_time: Utc::now(),
        };

        match event {
            BridgeEvent::SwapStarted {
                erc20,
                bep20,
                from,
                amount,
                fee,
                ..
            } => {
                // ETH starts name the ERC20; BSC starts name the BEP20 and its ERC20 peer
                let (token, peer) = match self.chain {
                    Chain::Eth => (erc20, None),
                    Chain::Bsc => (bep20, erc20),
                };
                row.token_addr = token.ok_or_else(|| {
                    RelayerError::EventParsing("swap start without token".to_string())
                })?;
                row.peer_token_addr = peer;
                row.participant = from;
                row.amount = amount.to_string();
                row.fee_amount = fee.to_string();
            }
            BridgeEvent::SwapPairRegister {
                sponsor,
                erc20,
                name,
                symbol,
                decimals,
            } => {
                row.kind = EventKind::SwapPairRegister;
                row.token_addr = erc20;
                row.participant = sponsor;
                row.name = name;
                row.symbol = symbol;
                row.decimals = decimals;
            }
            _ => return Ok(None),
        }

        Ok(Some(row))
    }

    /// Drop block rows older than the prune window
    pub async fn prune(&self) -> RelayerResult<u64> {
        let Some(tip) = self.store.tip(self.chain).await? else {
            return Ok(0);
        };
        let floor = finality::prune_floor(tip.height, self.config.prune_window);
        let pruned = self.store.prune_blocks(self.chain, floor).await?;
        if pruned > 0 {
            debug!("Pruned {} {} blocks below {}", pruned, self.chain, floor);
        }
        Ok(pruned)
    }

    /// Alert when the tip has not advanced for longer than the threshold.
    /// Returns whether an alert was raised.
    pub async fn check_liveness(&self, now: DateTime<Utc>) -> RelayerResult<bool> {
        let Some(tip) = self.store.tip(self.chain).await? else {
            return Ok(false);
        };

        let idle = now.signed_duration_since(tip.create_time);
        let threshold = chrono::Duration::from_std(self.config.liveness_threshold)
            .map_err(|e| RelayerError::Config(format!("liveness threshold: {}", e)))?;

        if idle > threshold {
            self.notifier
                .alert(&format!(
                    "{} observer stalled: tip {} ingested {}s ago",
                    self.chain,
                    tip.height,
                    idle.num_seconds()
                ))
                .await;
            return Ok(true);
        }
        Ok(false)
    }

    /// Fetch blocks until cancelled; back-to-back while catching up, one
    /// fetch interval apart otherwise
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "{} observer started at contract {:?}",
            self.chain, self.config.contract
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let idle = match self.fetch_next().await {
                Ok(FetchOutcome::Ingested { .. }) => false,
                Ok(_) => true,
                Err(e) => {
                    if e.should_alert() {
                        error!("{} observer: {}", self.chain, e);
                        self.notifier
                            .alert(&format!("{} observer write failed: {}", self.chain, e))
                            .await;
                    } else {
                        warn!("{} observer: {}", self.chain, e);
                    }
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.fetch_interval) => {}
                }
            }
        }

        info!("{} observer stopped", self.chain);
    }
}
