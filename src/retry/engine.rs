use crate::engine::{note, EngineContext};
use crate::error::{RelayerError, RelayerResult};
use crate::state::models::{RetrySwap, Swap, TxKind, TxRecord, TxStatus};
use crate::state::Mutation;
use crate::swap::SwapStatus;
use crate::tx::{Outbound, TrackOutcome};

use chrono::Utc;
use ethers::types::U256;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// Result of a retry request, per swap id
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RetrySubmission {
    pub accepted: Vec<i64>,
    pub rejected: Vec<(i64, String)>,
}

pub struct RetryEngine {
    ctx: EngineContext,
}

impl RetryEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Queue a retry for each `SendFailed` swap that verifies and has no
    /// retry in flight
    pub async fn submit(&self, swap_ids: &[i64]) -> RelayerResult<RetrySubmission> {
        let mut result = RetrySubmission::default();
        let ids: BTreeSet<i64> = swap_ids.iter().copied().collect();

        for id in ids {
            match self.admit(id).await? {
                Ok(()) => result.accepted.push(id),
                Err(reason) => {
                    info!("Retry for swap {} refused: {}", id, reason);
                    result.rejected.push((id, reason));
                }
            }
        }
        Ok(result)
    }

    async fn admit(&self, swap_id: i64) -> RelayerResult<Result<(), String>> {
        let Some(swap) = self.ctx.store.swap(swap_id).await? else {
            return Ok(Err("no such swap".to_string()));
        };
        if swap.status != SwapStatus::SendFailed {
            return Ok(Err(format!("swap is {}, only send_failed swaps retry", swap.status)));
        }
        if !self.ctx.verified(&swap).await {
            return Ok(Err("record hash mismatch".to_string()));
        }
        if self.ctx.store.has_pending_retry(swap_id).await? {
            return Ok(Err("a retry is already in flight".to_string()));
        }

        let retry = self.retry_from_swap(&swap);
        match self
            .ctx
            .store
            .apply(vec![Mutation::InsertRetrySwap(retry)])
            .await
        {
            Ok(_) => {
                info!("Retry queued for swap {}", swap_id);
                Ok(Ok(()))
            }
            Err(RelayerError::Conflict(reason)) => Ok(Err(reason)),
            Err(e) => Err(e),
        }
    }

    fn retry_from_swap(&self, swap: &Swap) -> RetrySwap {
        let now = Utc::now();
        let mut retry = RetrySwap {
            id: 0,
            swap_id: swap.id,
            direction: swap.direction,
            sponsor: swap.sponsor,
            erc20_addr: swap.erc20_addr,
            bep20_addr: swap.bep20_addr,
            symbol: swap.symbol.clone(),
            decimals: swap.decimals,
            amount: swap.amount.clone(),
            start_tx_hash: swap.start_tx_hash,
            retry_tx_hash: None,
            done: false,
            error_msg: String::new(),
            record_hash: String::new(),
            create_time: now,
            update_time: now,
        };
        self.ctx.hasher.seal(&mut retry);
        retry
    }

    /// Send one fill per queued retry. A retry is attempted once and then done
    /// whatever the outcome.
    pub async fn process_pending(&self) -> RelayerResult<usize> {
        let retries = self
            .ctx
            .store
            .retry_swaps_pending(self.ctx.batch_size)
            .await?;

        let mut sent = 0;
        for retry in retries {
            if !self.ctx.verified(&retry).await {
                continue;
            }
            match self.attempt(retry).await {
                Ok(true) => {
                    sent += 1;
                    self.ctx.pause_between_sends().await;
                }
                Ok(false) => {}
                Err(RelayerError::Conflict(reason)) => {
                    debug!("Retry bookkeeping lost a race: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(sent)
    }

    async fn attempt(&self, retry: RetrySwap) -> RelayerResult<bool> {
        if let Some(tx) = self
            .ctx
            .store
            .active_tx_for_owner(TxKind::RetrySwap, retry.id)
            .await?
        {
            info!(
                "Retry {} already broadcast {:?}, not resending",
                retry.id, tx.tx_hash
            );
            self.mark_done(retry, Some(tx), None).await?;
            return Ok(false);
        }

        let swap = self.ctx.store.swap(retry.swap_id).await?;
        if let Some(reason) = match &swap {
            None => Some("original swap is gone".to_string()),
            Some(s) if s.status != SwapStatus::SendFailed => {
                Some(format!("original swap is now {}", s.status))
            }
            Some(_) => None,
        } {
            warn!("Retry {} abandoned: {}", retry.id, reason);
            self.mark_done(retry, None, Some(reason)).await?;
            return Ok(false);
        }

        match self.ctx.store.swap_pair_by_erc20(retry.erc20_addr).await? {
            Some(pair) if pair.available => {}
            Some(pair) => {
                let reason = format!("swap pair {} is disabled", pair.symbol);
                self.mark_done(retry, None, Some(reason)).await?;
                return Ok(false);
            }
            None => {
                let reason =
                    RelayerError::UnsupportedToken(format!("{:?}", retry.erc20_addr)).to_string();
                warn!("Retry {} abandoned: {}", retry.id, reason);
                self.mark_done(retry, None, Some(reason)).await?;
                return Ok(false);
            }
        }

        let destination = retry.direction.destination_chain();
        let amount = U256::from_dec_str(&retry.amount).map_err(|e| {
            RelayerError::Internal(format!("retry {} amount '{}': {}", retry.id, retry.amount, e))
        })?;
        let data = self.ctx.abi.encode_fill(
            retry.direction,
            retry.start_tx_hash,
            retry.erc20_addr,
            retry.sponsor,
            amount,
        )?;
        let outbound = Outbound {
            kind: TxKind::RetrySwap,
            owner_id: retry.id,
            to: self.ctx.agent(destination),
            data,
        };

        match self.ctx.sender(destination).send(outbound).await {
            Ok(tx) => {
                info!(
                    "Retry {} for swap {} broadcast {:?}",
                    retry.id, retry.swap_id, tx.tx_hash
                );
                self.mark_done(retry, Some(tx), None).await?;
                Ok(true)
            }
            Err(e) if e.is_retryable() || e.is_replacement_underpriced() => {
                // nothing reached the chain; try again next pass
                warn!("Retry {} deferred: {}", retry.id, e);
                Ok(false)
            }
            Err(e) => {
                let (id, swap_id) = (retry.id, retry.swap_id);
                self.mark_done(retry, None, Some(e.to_string())).await?;
                error!("Retry {} for swap {} failed: {}", id, swap_id, e);
                self.ctx
                    .notifier
                    .alert(&format!("retry of swap {} failed to send: {}", swap_id, e))
                    .await;
                Ok(false)
            }
        }
    }

    async fn mark_done(
        &self,
        mut retry: RetrySwap,
        tx: Option<TxRecord>,
        error: Option<String>,
    ) -> RelayerResult<()> {
        let mut batch = Vec::with_capacity(2);
        if let Some(tx) = tx {
            retry.retry_tx_hash = Some(tx.tx_hash);
            if tx.status == TxStatus::Created {
                let mut sent = tx;
                sent.status = TxStatus::Sent;
                batch.push(Mutation::UpdateTx {
                    tx: sent,
                    expected: TxStatus::Created,
                });
            }
        }
        if let Some(error) = error {
            note(&mut retry.error_msg, error);
        }
        retry.done = true;
        self.ctx.hasher.seal(&mut retry);
        batch.push(Mutation::UpdateRetrySwap {
            retry,
            expected_done: false,
        });
        self.ctx.store.apply(batch).await?;
        Ok(())
    }

    /// Settle retry transactions; a success also completes the original swap
    pub async fn track_retries(&self) -> RelayerResult<usize> {
        let txs = self
            .ctx
            .store
            .txs_with_status(TxKind::RetrySwap, TxStatus::Sent, self.ctx.batch_size)
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
            let mut batch = vec![Mutation::UpdateTx {
                tx: next_tx,
                expected: TxStatus::Sent,
            }];
            if !outcome.is_final() {
                self.ctx.store.apply(batch).await?;
                continue;
            }

            let Some(retry) = self.ctx.store.retry_swap(tx.owner_id).await? else {
                error!("Retry tx {:?} belongs to missing retry {}", tx.tx_hash, tx.owner_id);
                continue;
            };
            let Some(swap) = self.ctx.store.swap(retry.swap_id).await? else {
                error!("Retry {} refers to missing swap {}", retry.id, retry.swap_id);
                continue;
            };
            if !self.ctx.verified(&retry).await || !self.ctx.verified(&swap).await {
                continue;
            }

            let succeeded = matches!(outcome, TrackOutcome::Succeeded { .. });
            if succeeded && swap.status == SwapStatus::SendFailed {
                let mut next = swap.clone();
                next.status = next.status.transition_to(SwapStatus::Success)?;
                next.fill_tx_hash = Some(tx.tx_hash);
                note(&mut next.log, format!("filled by retry {:?}", tx.tx_hash));
                self.ctx.hasher.seal(&mut next);
                batch.push(Mutation::UpdateSwap {
                    swap: next,
                    expected: SwapStatus::SendFailed,
                });
            }

            match self.ctx.store.apply(batch).await {
                Ok(_) => settled += 1,
                Err(RelayerError::Conflict(reason)) => {
                    debug!("Retry tx {:?} settled elsewhere: {}", tx.tx_hash, reason);
                    continue;
                }
                Err(e) => return Err(e),
            }

            if succeeded {
                info!("Swap {} completed by retry {:?}", swap.id, tx.tx_hash);
                crate::metrics::record_swap_terminal(SwapStatus::Success);
            } else {
                let what = match outcome {
                    TrackOutcome::Reverted { .. } => "reverted",
                    _ => "was never confirmed",
                };
                self.ctx
                    .notifier
                    .alert(&format!(
                        "retry of swap {} {} ({:?} on {})",
                        swap.id, what, tx.tx_hash, tx.chain
                    ))
                    .await;
            }
        }
        Ok(settled)
    }
}
