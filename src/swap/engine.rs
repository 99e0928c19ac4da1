//! Drives swaps from an observed `SwapStarted` event to a confirmed fill on
//! the opposite chain
//!
//! Each step is one poll over the store. Steps are safe to run concurrently
//! from several instances: every transition is a conditional write, and the
//! loser of a race sees `Conflict` and moves on.

use super::registry::{PairRoute, SwapPairRegistry};
use super::SwapStatus;
use crate::engine::{note, EngineContext};
use crate::error::{RelayerError, RelayerResult};
use crate::state::models::{
    EventKind, EventPhase, EventQuery, EventStatus, EventTxLog, Swap, SwapDirection, SwapPair,
    TxKind, TxRecord, TxStatus,
};
use crate::state::Mutation;
use crate::tx::{Outbound, TrackOutcome};

use chrono::Utc;
use ethers::types::Address;
use tracing::{debug, error, info, warn};

pub struct SwapEngine {
    ctx: EngineContext,
    registry: SwapPairRegistry,
}

impl SwapEngine {
    pub fn new(ctx: EngineContext, registry: SwapPairRegistry) -> Self {
        Self { ctx, registry }
    }

    pub fn registry(&self) -> &SwapPairRegistry {
        &self.registry
    }

    /// Make pairs published by swap-pair finalization routable
    pub fn register_pairs(&self, pairs: &[SwapPair]) -> RelayerResult<()> {
        for pair in pairs {
            self.registry.register(pair)?;
            info!(
                "Swap pair {} routable: {:?} <-> {:?}",
                pair.symbol, pair.erc20_addr, pair.bep20_addr
            );
        }
        Ok(())
    }

    /// Create a `Received` swap for every newly seen swap start
    pub async fn intake_seen(&self) -> RelayerResult<usize> {
        let events = self
            .ctx
            .store
            .events(&EventQuery {
                kind: EventKind::SwapStart,
                phase: EventPhase::Seen,
                status: None,
                limit: self.ctx.batch_size,
            })
            .await?;

        let mut created = 0;
        for event in events {
            let swap = self.swap_from_event(&event);
            let batch = vec![
                Mutation::InsertSwap(swap),
                Mutation::SetEventPhase {
                    id: event.id,
                    from: EventPhase::Seen,
                    to: EventPhase::ConfirmRequest,
                },
            ];
            match self.ctx.store.apply(batch).await {
                Ok(_) => {
                    created += 1;
                    debug!("Swap created for {} start {:?}", event.chain, event.tx_hash);
                }
                Err(RelayerError::Conflict(reason)) => {
                    debug!("Event {} already taken: {}", event.id, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    fn swap_from_event(&self, event: &EventTxLog) -> Swap {
        let direction = SwapDirection::from_source(event.chain);
        let route = self.registry.resolve(direction, &event.token_addr);
        let (erc20, bep20) = match direction {
            SwapDirection::EthToBsc => (
                event.token_addr,
                route.as_ref().map_or(Address::zero(), |r| r.bep20),
            ),
            SwapDirection::BscToEth => (
                event
                    .peer_token_addr
                    .or_else(|| route.as_ref().map(|r| r.erc20))
                    .unwrap_or_default(),
                event.token_addr,
            ),
        };

        let now = Utc::now();
        let mut swap = Swap {
            id: 0,
            status: SwapStatus::Received,
            direction,
            sponsor: event.participant,
            erc20_addr: erc20,
            bep20_addr: bep20,
            symbol: route.as_ref().map(|r| r.symbol.clone()).unwrap_or_default(),
            decimals: route.as_ref().map_or(0, |r| r.decimals),
            amount: event.amount.clone(),
            start_tx_hash: event.tx_hash,
            fill_tx_hash: None,
            log: String::new(),
            record_hash: String::new(),
            create_time: now,
            update_time: now,
        };
        self.ctx.hasher.seal(&mut swap);
        swap
    }

    /// Quote every swap whose start event reached the confirmation depth
    pub async fn confirm_requests(&self) -> RelayerResult<usize> {
        let events = self
            .ctx
            .store
            .events(&EventQuery {
                kind: EventKind::SwapStart,
                phase: EventPhase::ConfirmRequest,
                status: Some(EventStatus::Confirmed),
                limit: self.ctx.batch_size,
            })
            .await?;

        let mut quoted = 0;
        for event in events {
            let direction = SwapDirection::from_source(event.chain);
            let Some(swap) = self
                .ctx
                .store
                .swap_by_start_tx(direction, event.tx_hash)
                .await?
            else {
                error!(
                    "Event {} is awaiting confirmation but has no swap for {:?}",
                    event.id, event.tx_hash
                );
                continue;
            };
            if !self.ctx.verified(&swap).await {
                continue;
            }

            let ack = Mutation::SetEventPhase {
                id: event.id,
                from: EventPhase::ConfirmRequest,
                to: EventPhase::Ack,
            };
            let batch = if swap.status == SwapStatus::Received {
                let next = self.quote(swap)?;
                vec![
                    Mutation::UpdateSwap {
                        swap: next,
                        expected: SwapStatus::Received,
                    },
                    ack,
                ]
            } else {
                vec![ack]
            };

            match self.ctx.store.apply(batch).await {
                Ok(_) => quoted += 1,
                Err(RelayerError::Conflict(reason)) => {
                    debug!("Quote for event {} lost a race: {}", event.id, reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(quoted)
    }

    /// Decide `QuoteConfirmed` or `QuoteRejected` for a `Received` swap
    fn quote(&self, mut swap: Swap) -> RelayerResult<Swap> {
        let source_token = match swap.direction {
            SwapDirection::EthToBsc => swap.erc20_addr,
            SwapDirection::BscToEth => swap.bep20_addr,
        };
        let amount = swap.amount()?;

        let verdict = match self.registry.resolve(swap.direction, &source_token) {
            None => Err(
                RelayerError::UnsupportedToken(format!("{:?}", source_token)).to_string(),
            ),
            Some(route) if !route.available => Err(format!("swap pair {} is disabled", route.symbol)),
            Some(route) if !route.in_bounds(amount) => Err(format!(
                "amount {} outside [{}, {}]",
                amount, route.low_bound, route.upper_bound
            )),
            Some(route) => Ok(route),
        };

        match verdict {
            Ok(route) => {
                apply_route(&mut swap, &route);
                swap.status = swap.status.transition_to(SwapStatus::QuoteConfirmed)?;
                info!(
                    "Swap {} quote confirmed: {} {} {}",
                    swap.id, swap.direction, amount, swap.symbol
                );
            }
            Err(reason) => {
                swap.status = swap.status.transition_to(SwapStatus::QuoteRejected)?;
                note(&mut swap.log, &reason);
                warn!("Swap {} quote rejected: {}", swap.id, reason);
                crate::metrics::record_swap_terminal(SwapStatus::QuoteRejected);
            }
        }
        self.ctx.hasher.seal(&mut swap);
        Ok(swap)
    }

    /// Send fills for quoted swaps and recover swaps left in `Sending`
    pub async fn send_pending(&self) -> RelayerResult<usize> {
        let swaps = self
            .ctx
            .store
            .swaps_with_status(
                &[SwapStatus::QuoteConfirmed, SwapStatus::Sending],
                self.ctx.batch_size,
            )
            .await?;

        let mut sent = 0;
        for swap in swaps {
            if !self.ctx.verified(&swap).await {
                continue;
            }

            let swap = if swap.status == SwapStatus::QuoteConfirmed {
                match self.claim(swap).await? {
                    Some(claimed) => claimed,
                    None => continue,
                }
            } else {
                swap
            };

            match self.send_fill(swap).await {
                Ok(true) => {
                    sent += 1;
                    self.ctx.pause_between_sends().await;
                }
                Ok(false) => {}
                Err(RelayerError::Conflict(reason)) => {
                    debug!("Fill bookkeeping lost a race: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sent)
    }

    /// Move a quoted swap to `Sending`; `None` if another instance got there first
    async fn claim(&self, swap: Swap) -> RelayerResult<Option<Swap>> {
        let mut claimed = swap;
        claimed.status = claimed.status.transition_to(SwapStatus::Sending)?;
        self.ctx.hasher.seal(&mut claimed);

        match self
            .ctx
            .store
            .apply(vec![Mutation::UpdateSwap {
                swap: claimed.clone(),
                expected: SwapStatus::QuoteConfirmed,
            }])
            .await
        {
            Ok(_) => Ok(Some(claimed)),
            Err(RelayerError::Conflict(reason)) => {
                debug!("Swap {} claimed elsewhere: {}", claimed.id, reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Broadcast the fill for a `Sending` swap, or adopt the one already broadcast.
    /// Returns whether a new transaction went out.
    async fn send_fill(&self, swap: Swap) -> RelayerResult<bool> {
        if let Some(tx) = self
            .ctx
            .store
            .active_tx_for_owner(TxKind::SwapFill, swap.id)
            .await?
        {
            info!(
                "Swap {} already has fill {:?} ({}), not resending",
                swap.id, tx.tx_hash, tx.status
            );
            self.mark_sent(swap, tx).await?;
            return Ok(false);
        }

        let destination = swap.direction.destination_chain();
        let data = self.ctx.abi.encode_fill(
            swap.direction,
            swap.start_tx_hash,
            swap.erc20_addr,
            swap.sponsor,
            swap.amount()?,
        )?;
        let outbound = Outbound {
            kind: TxKind::SwapFill,
            owner_id: swap.id,
            to: self.ctx.agent(destination),
            data,
        };

        match self.ctx.sender(destination).send(outbound).await {
            Ok(tx) => {
                self.mark_sent(swap, tx).await?;
                Ok(true)
            }
            Err(e) if e.is_replacement_underpriced() => {
                warn!("Fill for swap {} underpriced, re-queueing: {}", swap.id, e);
                self.update(swap, SwapStatus::QuoteConfirmed, Some(e.to_string()))
                    .await?;
                Ok(false)
            }
            Err(e) if e.is_retryable() => {
                // nothing was signed yet; the swap stays in Sending for the next pass
                warn!("Fill for swap {} deferred: {}", swap.id, e);
                Ok(false)
            }
            Err(e) => {
                let id = swap.id;
                self.update(swap, SwapStatus::SendFailed, Some(e.to_string()))
                    .await?;
                crate::metrics::record_swap_terminal(SwapStatus::SendFailed);
                error!("Fill for swap {} failed: {}", id, e);
                self.ctx
                    .notifier
                    .alert(&format!("swap {} fill failed, manual retry required: {}", id, e))
                    .await;
                Ok(false)
            }
        }
    }

    async fn mark_sent(&self, mut swap: Swap, tx: TxRecord) -> RelayerResult<()> {
        let mut batch = Vec::with_capacity(2);
        if tx.status == TxStatus::Created {
            let mut sent_tx = tx.clone();
            sent_tx.status = TxStatus::Sent;
            batch.push(Mutation::UpdateTx {
                tx: sent_tx,
                expected: TxStatus::Created,
            });
        }
        swap.status = swap.status.transition_to(SwapStatus::Sent)?;
        swap.fill_tx_hash = Some(tx.tx_hash);
        self.ctx.hasher.seal(&mut swap);
        batch.push(Mutation::UpdateSwap {
            swap,
            expected: SwapStatus::Sending,
        });
        self.ctx.store.apply(batch).await?;
        Ok(())
    }

    async fn update(
        &self,
        mut swap: Swap,
        status: SwapStatus,
        message: Option<String>,
    ) -> RelayerResult<()> {
        let expected = swap.status;
        swap.status = swap.status.transition_to(status)?;
        if let Some(message) = message {
            note(&mut swap.log, message);
        }
        self.ctx.hasher.seal(&mut swap);
        self.ctx
            .store
            .apply(vec![Mutation::UpdateSwap { swap, expected }])
            .await?;
        Ok(())
    }

    /// Settle broadcast fills against their chain
    pub async fn track_fills(&self) -> RelayerResult<usize> {
        let txs = self
            .ctx
            .store
            .txs_with_status(TxKind::SwapFill, TxStatus::Sent, self.ctx.batch_size)
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

            let Some(swap) = self.ctx.store.swap(tx.owner_id).await? else {
                error!("Fill {:?} belongs to missing swap {}", tx.tx_hash, tx.owner_id);
                continue;
            };
            if !self.ctx.verified(&swap).await {
                continue;
            }

            let mut batch = vec![Mutation::UpdateTx {
                tx: next_tx,
                expected: TxStatus::Sent,
            }];
            let terminal = if swap.status == SwapStatus::Sent {
                let mut next = swap.clone();
                match &outcome {
                    TrackOutcome::Succeeded { .. } => {
                        next.status = next.status.transition_to(SwapStatus::Success)?;
                    }
                    TrackOutcome::Reverted { .. } => {
                        next.status = next.status.transition_to(SwapStatus::SendFailed)?;
                        note(&mut next.log, format!("fill {:?} reverted", tx.tx_hash));
                    }
                    _ => {
                        next.status = next.status.transition_to(SwapStatus::SendFailed)?;
                        note(&mut next.log, format!("fill {:?} never confirmed", tx.tx_hash));
                    }
                }
                self.ctx.hasher.seal(&mut next);
                let status = next.status;
                batch.push(Mutation::UpdateSwap {
                    swap: next,
                    expected: SwapStatus::Sent,
                });
                Some(status)
            } else {
                warn!(
                    "Fill {:?} settled while swap {} is {}",
                    tx.tx_hash, swap.id, swap.status
                );
                None
            };

            match self.ctx.store.apply(batch).await {
                Ok(_) => {}
                Err(RelayerError::Conflict(reason)) => {
                    debug!("Fill {:?} settled elsewhere: {}", tx.tx_hash, reason);
                    continue;
                }
                Err(e) => return Err(e),
            }
            settled += 1;

            match terminal {
                Some(SwapStatus::Success) => {
                    info!("Swap {} filled by {:?}", swap.id, tx.tx_hash);
                    crate::metrics::record_swap_terminal(SwapStatus::Success);
                }
                Some(status) => {
                    crate::metrics::record_swap_terminal(status);
                    self.ctx
                        .notifier
                        .alert(&format!(
                            "swap {} fill {:?} on {} failed ({}), manual retry required",
                            swap.id,
                            tx.tx_hash,
                            tx.chain,
                            if matches!(outcome, TrackOutcome::Reverted { .. }) {
                                "reverted"
                            } else {
                                "missing"
                            }
                        ))
                        .await;
                }
                None => {}
            }
        }
        Ok(settled)
    }
}

/// Copy routing details a swap may have been created without
fn apply_route(swap: &mut Swap, route: &PairRoute) {
    swap.erc20_addr = route.erc20;
    swap.bep20_addr = route.bep20;
    swap.symbol = route.symbol.clone();
    swap.decimals = route.decimals;
}
