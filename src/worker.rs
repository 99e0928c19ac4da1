//! Cancellable periodic task runner shared by every daemon

use crate::error::RelayerResult;

use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Call `tick` every `period` until `cancel` fires.
///
/// A failed tick is logged and the loop goes on; nothing a daemon does is
/// fatal to the process.
pub async fn run_periodic<F, Fut>(
    name: &str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = RelayerResult<()>>,
{
    info!("{} started", name);

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = tick().await {
                    if e.is_retryable() {
                        warn!("{}: {}", name, e);
                    } else {
                        error!("{}: {}", name, e);
                    }
                }
            }
        }
    }

    info!("{} stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayerError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_runs_until_cancelled_and_survives_errors() {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicU32::new(0));

        let handle = {
            let cancel = cancel.clone();
            let ticks = ticks.clone();
            tokio::spawn(async move {
                run_periodic("test", Duration::from_millis(5), cancel, || {
                    let ticks = ticks.clone();
                    async move {
                        let n = ticks.fetch_add(1, Ordering::SeqCst);
                        if n % 2 == 0 {
                            Err(RelayerError::Internal("boom".to_string()))
                        } else {
                            Ok(())
                        }
                    }
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }
}
