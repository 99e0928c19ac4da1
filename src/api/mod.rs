//! HTTP API for health checks, statistics and retry submission

use crate::chain::ChainProvider;
use crate::config::ApiConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::retry::{RetryEngine, RetrySubmission};
use crate::state::models::StoreStats;
use crate::state::RecordStore;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub retry: Arc<RetryEngine>,
    pub chains: Vec<Arc<ChainProvider>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route("/retry_failed_swaps", post(retry_failed_swaps))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server until `cancel` fires
pub async fn run_server(
    config: ApiConfig,
    state: AppState,
    cancel: CancellationToken,
) -> RelayerResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Config(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| RelayerError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify the record store and every chain RPC
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.health_check().await.is_ok();

    let details: Vec<ChainHealth> = join_all(state.chains.iter().map(|provider| async move {
        ChainHealth {
            chain: provider.chain().to_string(),
            healthy: provider.health_check().await,
        }
    }))
    .await;
    let chains = details.iter().all(|c| c.healthy);

    let ready = database && chains;
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(ReadinessResponse {
            ready,
            database,
            chains,
            details,
        }),
    )
}

/// Row counts by status
async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<StoreStats>, (StatusCode, Json<ErrorResponse>)> {
    state.store.stats().await.map(Json).map_err(internal)
}

/// Queue one-shot retries for failed swaps
async fn retry_failed_swaps(
    State(state): State<AppState>,
    Json(request): Json<RetryRequest>,
) -> Result<Json<RetrySubmission>, (StatusCode, Json<ErrorResponse>)> {
    if request.swap_ids.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "swap_ids must not be empty".to_string(),
            }),
        ));
    }
    info!("Retry requested for swaps {:?}", request.swap_ids);
    state
        .retry
        .submit(&request.swap_ids)
        .await
        .map(Json)
        .map_err(internal)
}

fn internal(e: RelayerError) -> (StatusCode, Json<ErrorResponse>) {
    error!("API request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

// Request and response types

#[derive(Debug, Deserialize)]
struct RetryRequest {
    swap_ids: Vec<i64>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain: String,
    healthy: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::Swap;
    use crate::state::Mutation;
    use crate::swap::SwapStatus;
    use crate::test_utils::{sample_swap, TestBridge};

    fn state(bridge: &TestBridge) -> AppState {
        AppState {
            store: bridge.store.clone(),
            retry: Arc::new(RetryEngine::new(bridge.ctx.clone())),
            chains: vec![],
        }
    }

    async fn insert(bridge: &TestBridge, mut swap: Swap) -> i64 {
        bridge.ctx.hasher.seal(&mut swap);
        bridge
            .store
            .apply(vec![Mutation::InsertSwap(swap)])
            .await
            .unwrap()[0]
    }

    #[tokio::test]
    async fn test_retry_endpoint_accepts_only_failed_swaps() {
        let bridge = TestBridge::new();
        let mut failed = sample_swap(0);
        failed.status = SwapStatus::SendFailed;
        let failed = insert(&bridge, failed).await;
        let mut done = sample_swap(0);
        done.status = SwapStatus::Success;
        let done = insert(&bridge, done).await;

        let Json(submission) = retry_failed_swaps(
            State(state(&bridge)),
            Json(RetryRequest {
                swap_ids: vec![failed, done],
            }),
        )
        .await
        .unwrap();

        assert_eq!(submission.accepted, vec![failed]);
        assert_eq!(submission.rejected.len(), 1);
        assert_eq!(submission.rejected[0].0, done);
    }

    #[tokio::test]
    async fn test_retry_endpoint_rejects_empty_body() {
        let bridge = TestBridge::new();
        let (code, _) = retry_failed_swaps(
            State(state(&bridge)),
            Json(RetryRequest { swap_ids: vec![] }),
        )
        .await
        .unwrap_err();
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_count_by_status() {
        let bridge = TestBridge::new();
        insert(&bridge, sample_swap(0)).await;
        let mut failed = sample_swap(0);
        failed.status = SwapStatus::SendFailed;
        insert(&bridge, failed).await;

        let Json(stats) = get_stats(State(state(&bridge))).await.unwrap();
        assert_eq!(stats.swaps.get("received"), Some(&1));
        assert_eq!(stats.swaps.get("send_failed"), Some(&1));
    }
}
