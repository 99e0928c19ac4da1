//! Registration state machine: confirm, `createSwapPair` on BSC, track, publish

use super::SwapPairStatus;
use crate::chain::Chain;
use crate::config::SwapPairConfig;
use crate::engine::{note, EngineContext};
use crate::error::{RelayerError, RelayerResult};
use crate::events::BridgeEvent;
use crate::state::models::{
    EventKind, EventPhase, EventQuery, EventStatus, EventTxLog, SwapPair, SwapPairSm, TxKind,
    TxRecord, TxStatus,
};
use crate::state::Mutation;
use crate::swap::SwapEngine;
use crate::tx::{Outbound, TrackOutcome};

use chrono::Utc;
use tracing::{debug, error, info, warn};

/// Registration pipeline ending in a published [`SwapPair`]
pub struct SwapPairEngine {
    ctx: EngineContext,
    bounds: SwapPairConfig,
}

impl SwapPairEngine {
    pub fn new(ctx: EngineContext, bounds: SwapPairConfig) -> Self {
        Self { ctx, bounds }
    }

    /// Create a `Received` state machine for every newly seen registration
    pub async fn intake_seen(&self) -> RelayerResult<usize> {
        let events = self
            .ctx
            .store
            .events(&EventQuery {
                kind: EventKind::SwapPairRegister,
                phase: EventPhase::Seen,
                status: None,
                limit: self.ctx.batch_size,
            })
            .await?;

        let mut created = 0;
        for event in events {
            let record = self.record_from_event(&event);
            let batch = vec![
                Mutation::InsertSwapPairSm(record),
                Mutation::SetEventPhase {
                    id: event.id,
                    from: EventPhase::Seen,
                    to: EventPhase::ConfirmRequest,
                },
            ];
            match self.ctx.store.apply(batch).await {
                Ok(_) => {
                    created += 1;
                    info!(
                        "Swap pair registration {} ({:?}) received",
                        event.symbol, event.token_addr
                    );
                }
                Err(RelayerError::Conflict(reason)) => {
                    debug!("Registration event {} already taken: {}", event.id, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    fn record_from_event(&self, event: &EventTxLog) -> SwapPairSm {
        let now = Utc::now();
        let mut record = SwapPairSm {
            id: 0,
            status: SwapPairStatus::Received,
            sponsor: event.participant,
            erc20_addr: event.token_addr,
            bep20_addr: None,
            name: event.name.clone(),
            symbol: event.symbol.clone(),
            decimals: event.decimals,
            register_tx_hash: event.tx_hash,
            create_tx_hash: None,
            log: String::new(),
            record_hash: String::new(),
            create_time: now,
            update_time: now,
        };
        self.ctx.hasher.seal(&mut record);
        record
    }

    /// Confirm registrations whose event reached the confirmation depth
    pub async fn confirm_requests(&self) -> RelayerResult<usize> {
        let events = self
            .ctx
            .store
            .events(&EventQuery {
                kind: EventKind::SwapPairRegister,
                phase: EventPhase::ConfirmRequest,
                status: Some(EventStatus::Confirmed),
                limit: self.ctx.batch_size,
            })
            .await?;

        let mut confirmed = 0;
        for event in events {
            let Some(record) = self
                .ctx
                .store
                .swap_pair_sm_by_register_tx(event.tx_hash)
                .await?
            else {
                error!(
                    "Registration event {} has no state machine for {:?}",
                    event.id, event.tx_hash
                );
                continue;
            };
            if !self.ctx.verified(&record).await {
                continue;
            }

            let ack = Mutation::SetEventPhase {
                id: event.id,
                from: EventPhase::ConfirmRequest,
                to: EventPhase::Ack,
            };
            let batch = if record.status == SwapPairStatus::Received {
                let mut next = record;
                next.status = next.status.transition_to(SwapPairStatus::Confirmed)?;
                self.ctx.hasher.seal(&mut next);
                vec![
                    Mutation::UpdateSwapPairSm {
                        record: next,
                        expected: SwapPairStatus::Received,
                    },
                    ack,
                ]
            } else {
                vec![ack]
            };

            match self.ctx.store.apply(batch).await {
                Ok(_) => confirmed += 1,
                Err(RelayerError::Conflict(reason)) => {
                    debug!("Registration {} lost a race: {}", event.id, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(confirmed)
    }

    /// Send `createSwapPair` for confirmed registrations and recover ones left in `Sending`
    pub async fn send_pending(&self) -> RelayerResult<usize> {
        let records = self
            .ctx
            .store
            .swap_pair_sms_with_status(
                &[SwapPairStatus::Confirmed, SwapPairStatus::Sending],
                self.ctx.batch_size,
            )
            .await?;

        let mut sent = 0;
        for record in records {
            if !self.ctx.verified(&record).await {
                continue;
            }

            let record = if record.status == SwapPairStatus::Confirmed {
                let mut claimed = record;
                claimed.status = claimed.status.transition_to(SwapPairStatus::Sending)?;
                self.ctx.hasher.seal(&mut claimed);
                match self
                    .ctx
                    .store
                    .apply(vec![Mutation::UpdateSwapPairSm {
                        record: claimed.clone(),
                        expected: SwapPairStatus::Confirmed,
                    }])
                    .await
                {
                    Ok(_) => claimed,
                    Err(RelayerError::Conflict(reason)) => {
                        debug!("Registration {} claimed elsewhere: {}", claimed.id, reason);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                record
            };

            match self.send_create(record).await {
                Ok(true) => {
                    sent += 1;
                    self.ctx.pause_between_sends().await;
                }
                Ok(false) => {}
                Err(RelayerError::Conflict(reason)) => {
                    debug!("Pair creation bookkeeping lost a race: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sent)
    }

    async fn send_create(&self, record: SwapPairSm) -> RelayerResult<bool> {
        if let Some(tx) = self
            .ctx
            .store
            .active_tx_for_owner(TxKind::SwapPairCreate, record.id)
            .await?
        {
            info!(
                "Registration {} already has createSwapPair {:?}, not resending",
                record.id, tx.tx_hash
            );
            self.mark_sent(record, tx).await?;
            return Ok(false);
        }

        let data = self.ctx.abi.encode_create_swap_pair(
            record.register_tx_hash,
            record.erc20_addr,
            &record.name,
            &record.symbol,
            record.decimals,
        )?;
        let outbound = Outbound {
            kind: TxKind::SwapPairCreate,
            owner_id: record.id,
            to: self.ctx.agent(Chain::Bsc),
            data,
        };

        match self.ctx.sender(Chain::Bsc).send(outbound).await {
            Ok(tx) => {
                self.mark_sent(record, tx).await?;
                Ok(true)
            }
            Err(e) if e.is_replacement_underpriced() => {
                warn!("createSwapPair for {} underpriced, re-queueing: {}", record.id, e);
                self.update(record, SwapPairStatus::Confirmed, Some(e.to_string()))
                    .await?;
                Ok(false)
            }
            Err(e) if e.is_retryable() => {
                warn!("createSwapPair for {} deferred: {}", record.id, e);
                Ok(false)
            }
            Err(e) => {
                let (id, symbol) = (record.id, record.symbol.clone());
                self.update(record, SwapPairStatus::SendFailed, Some(e.to_string()))
                    .await?;
                error!("createSwapPair for {} failed: {}", id, e);
                self.ctx
                    .notifier
                    .alert(&format!("swap pair {} ({}) creation failed: {}", symbol, id, e))
                    .await;
                Ok(false)
            }
        }
    }

    async fn mark_sent(&self, mut record: SwapPairSm, tx: TxRecord) -> RelayerResult<()> {
        let mut batch = Vec::with_capacity(2);
        if tx.status == TxStatus::Created {
            let mut sent_tx = tx.clone();
            sent_tx.status = TxStatus::Sent;
            batch.push(Mutation::UpdateTx {
                tx: sent_tx,
                expected: TxStatus::Created,
            });
        }
        record.status = record.status.transition_to(SwapPairStatus::Sent)?;
        record.create_tx_hash = Some(tx.tx_hash);
        self.ctx.hasher.seal(&mut record);
        batch.push(Mutation::UpdateSwapPairSm {
            record,
            expected: SwapPairStatus::Sending,
        });
        self.ctx.store.apply(batch).await?;
        Ok(())
    }

    async fn update(
        &self,
        mut record: SwapPairSm,
        status: SwapPairStatus,
        message: Option<String>,
    ) -> RelayerResult<()> {
        let expected = record.status;
        record.status = record.status.transition_to(status)?;
        if let Some(message) = message {
            note(&mut record.log, message);
        }
        self.ctx.hasher.seal(&mut record);
        self.ctx
            .store
            .apply(vec![Mutation::UpdateSwapPairSm { record, expected }])
            .await?;
        Ok(())
    }

    /// Settle `createSwapPair` transactions, learning the deployed BEP20 on success
    pub async fn track_creations(&self) -> RelayerResult<usize> {
        let txs = self
            .ctx
            .store
            .txs_with_status(TxKind::SwapPairCreate, TxStatus::Sent, self.ctx.batch_size)
            .await?;

        let mut settled = 0;
        for tx in txs {
            let outcome = match self.ctx.tracker.assess(&tx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Tracking {:?} on {}: {}", tx.tx_hash, tx.chain, e);
                    continue;
                }
            };
            let next_tx = self.ctx.tracker.settle(&tx, &outcome);
            if !outcome.is_final() {
                self.ctx
                    .store
                    .apply(vec![Mutation::UpdateTx {
                        tx: next_tx,
                        expected: TxStatus::Sent,
                    }])
                    .await?;
                continue;
            }

            let Some(record) = self.ctx.store.swap_pair_sm(tx.owner_id).await? else {
                error!(
                    "createSwapPair {:?} belongs to missing registration {}",
                    tx.tx_hash, tx.owner_id
                );
                continue;
            };
            if !self.ctx.verified(&record).await {
                continue;
            }

            let mut batch = vec![Mutation::UpdateTx {
                tx: next_tx,
                expected: TxStatus::Sent,
            }];
            let mut failure = None;
            if record.status == SwapPairStatus::Sent {
                let mut next = record.clone();
                let created = match &outcome {
                    TrackOutcome::Succeeded { logs, .. } => {
                        match self.ctx.abi.find_swap_pair_created(logs) {
                            Some(BridgeEvent::SwapPairCreated {
                                register_tx_hash,
                                bep20,
                                ..
                            }) if register_tx_hash == record.register_tx_hash => Ok(bep20),
                            _ => Err("receipt carries no matching SwapPairCreated".to_string()),
                        }
                    }
                    TrackOutcome::Reverted { .. } => Err("createSwapPair reverted".to_string()),
                    _ => Err("createSwapPair never confirmed".to_string()),
                };
                match created {
                    Ok(bep20) => {
                        next.status = next.status.transition_to(SwapPairStatus::Success)?;
                        next.bep20_addr = Some(bep20);
                    }
                    Err(reason) => {
                        next.status = next.status.transition_to(SwapPairStatus::SendFailed)?;
                        note(&mut next.log, &reason);
                        failure = Some(reason);
                    }
                }
                self.ctx.hasher.seal(&mut next);
                batch.push(Mutation::UpdateSwapPairSm {
                    record: next,
                    expected: SwapPairStatus::Sent,
                });
            } else {
                warn!(
                    "createSwapPair {:?} settled while registration {} is {}",
                    tx.tx_hash, record.id, record.status
                );
            }

            match self.ctx.store.apply(batch).await {
                Ok(_) => settled += 1,
                Err(RelayerError::Conflict(reason)) => {
                    debug!("createSwapPair {:?} settled elsewhere: {}", tx.tx_hash, reason);
                    continue;
                }
                Err(e) => return Err(e),
            }

            if let Some(reason) = failure {
                self.ctx
                    .notifier
                    .alert(&format!(
                        "swap pair {} ({}) creation failed: {}",
                        record.symbol, record.id, reason
                    ))
                    .await;
            }
        }
        Ok(settled)
    }

    /// Finalize successful registrations and make their pairs routable for `swaps`
    pub async fn publish(&self, swaps: &SwapEngine) -> RelayerResult<usize> {
        let published = self.finalize().await?;
        swaps.register_pairs(&published)?;
        Ok(published.len())
    }

    /// Publish pairs for successful registrations. The returned pairs must be
    /// handed to the swap engine to become routable.
    pub async fn finalize(&self) -> RelayerResult<Vec<SwapPair>> {
        let records = self
            .ctx
            .store
            .swap_pair_sms_with_status(&[SwapPairStatus::Success], self.ctx.batch_size)
            .await?;

        let mut published = Vec::new();
        for record in records {
            if !self.ctx.verified(&record).await {
                continue;
            }
            let Some(bep20) = record.bep20_addr else {
                error!("Registration {} succeeded without a BEP20 address", record.id);
                continue;
            };

            let existing = self.ctx.store.swap_pair_by_erc20(record.erc20_addr).await?;
            let mut batch = Vec::with_capacity(2);
            let pair = match existing {
                Some(pair) => {
                    warn!(
                        "Pair for {:?} already published, finalizing registration {} only",
                        record.erc20_addr, record.id
                    );
                    pair
                }
                None => {
                    let pair = SwapPair {
                        id: 0,
                        symbol: record.symbol.clone(),
                        name: record.name.clone(),
                        decimals: record.decimals,
                        erc20_addr: record.erc20_addr,
                        bep20_addr: bep20,
                        low_bound: self.bounds.default_lower_bound.clone(),
                        upper_bound: self.bounds.default_upper_bound.clone(),
                        available: true,
                        create_time: Utc::now(),
                    };
                    batch.push(Mutation::InsertSwapPair(pair.clone()));
                    pair
                }
            };

            let mut next = record;
            next.status = next.status.transition_to(SwapPairStatus::Finalized)?;
            self.ctx.hasher.seal(&mut next);
            batch.push(Mutation::UpdateSwapPairSm {
                record: next,
                expected: SwapPairStatus::Success,
            });

            match self.ctx.store.apply(batch).await {
                Ok(_) => {
                    info!(
                        "Swap pair {} published: {:?} <-> {:?}",
                        pair.symbol, pair.erc20_addr, pair.bep20_addr
                    );
                    published.push(pair);
                }
                Err(RelayerError::Conflict(reason)) => {
                    debug!("Finalization lost a race: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(published)
    }
}
