//! Chain provider with multi-RPC support and automatic failover

use super::source::{BlockHeader, CallRequest, EventSource, TxReceipt};
use super::Chain;
use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, Filter, Log,
    TransactionRequest, ValueOrArray, H256, U256,
};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    chain: Chain,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Upper bound on every RPC call
    rpc_timeout: Duration,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(chain: Chain, config: &ChainConfig) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for {}: {}", chain, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain: chain.to_string(),
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            chain,
            http_providers,
            current_provider: AtomicUsize::new(0),
            rpc_timeout: config.rpc_timeout(),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        if self.http_providers.len() < 2 {
            return;
        }
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain, next);
    }

    /// Run one RPC call under the timeout, rotating providers on failure
    async fn call<T, F>(&self, operation: &str, fut: F) -> RelayerResult<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match timeout(self.rpc_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.failover();
                Err(RelayerError::ChainConnection {
                    chain: self.chain.to_string(),
                    message: format!("{}: {}", operation, e),
                })
            }
            Err(_) => {
                self.failover();
                Err(RelayerError::Timeout {
                    operation: format!("{} on {}", operation, self.chain),
                })
            }
        }
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.head().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.chain, e);
                false
            }
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }
}

#[async_trait]
impl EventSource for ChainProvider {
    async fn header_at(&self, height: u64) -> RelayerResult<Option<BlockHeader>> {
        let block = self
            .call("get_block", self.http().get_block(height))
            .await?;

        Ok(block.and_then(|b| {
            b.hash.map(|hash| BlockHeader {
                height,
                hash,
                parent_hash: b.parent_hash,
                time: b.timestamp.low_u64(),
            })
        }))
    }

    async fn logs(
        &self,
        block_hash: H256,
        topics: &[H256],
        contract: Address,
    ) -> RelayerResult<Vec<Log>> {
        let filter = Filter::new()
            .at_block_hash(block_hash)
            .address(contract)
            .topic0(ValueOrArray::Array(
                topics.iter().map(|t| Some(*t)).collect::<Vec<_>>(),
            ));

        let logs = self.call("get_logs", self.http().get_logs(&filter)).await?;
        Ok(logs.into_iter().filter(|l| l.removed != Some(true)).collect())
    }

    async fn receipt(&self, tx_hash: H256) -> RelayerResult<Option<TxReceipt>> {
        let receipt = self
            .call(
                "get_transaction_receipt",
                self.http().get_transaction_receipt(tx_hash),
            )
            .await?;

        Ok(receipt.and_then(|r| {
            r.block_number.map(|block_number| TxReceipt {
                status: r.status.map(|s| s.as_u64()).unwrap_or(0),
                block_number: block_number.as_u64(),
                gas_used: r.gas_used.unwrap_or_default(),
                logs: r.logs,
            })
        }))
    }

    async fn head(&self) -> RelayerResult<u64> {
        let head = self
            .call("get_block_number", self.http().get_block_number())
            .await?;
        crate::metrics::record_chain_head(self.chain, head.as_u64());
        Ok(head.as_u64())
    }

    async fn pending_nonce(&self, address: Address) -> RelayerResult<u64> {
        let nonce = self
            .call(
                "get_transaction_count",
                self.http()
                    .get_transaction_count(address, Some(BlockNumber::Pending.into())),
            )
            .await?;
        Ok(nonce.as_u64())
    }

    async fn suggest_gas_price(&self) -> RelayerResult<U256> {
        self.call("get_gas_price", self.http().get_gas_price()).await
    }

    async fn estimate_gas(&self, call: &CallRequest) -> RelayerResult<U256> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(call.from)
            .to(call.to)
            .data(call.data.clone())
            .into();

        match timeout(self.rpc_timeout, self.http().estimate_gas(&tx, None)).await {
            Ok(Ok(gas)) => Ok(gas),
            Ok(Err(e)) => {
                let err = estimate_error(self.chain, e);
                if err.is_retryable() {
                    self.failover();
                }
                Err(err)
            }
            Err(_) => {
                self.failover();
                Err(RelayerError::Timeout {
                    operation: format!("estimate_gas on {}", self.chain),
                })
            }
        }
    }

    async fn chain_id(&self) -> RelayerResult<u64> {
        let id = self.call("get_chainid", self.http().get_chainid()).await?;
        Ok(id.as_u64())
    }

    async fn broadcast(&self, signed_tx: Bytes) -> RelayerResult<H256> {
        let result = timeout(
            self.rpc_timeout,
            self.http().send_raw_transaction(signed_tx),
        )
        .await;

        match result {
            Ok(Ok(pending)) => Ok(pending.tx_hash()),
            Ok(Err(e)) => Err(RelayerError::from_broadcast(e.to_string())),
            Err(_) => Err(RelayerError::Timeout {
                operation: format!("send_raw_transaction on {}", self.chain),
            }),
        }
    }
}

/// The node answering with an error (a revert, a bad call) fails the estimate;
/// anything short of an answer stays a connection problem
fn estimate_error(chain: Chain, e: ProviderError) -> RelayerError {
    match e.as_error_response() {
        Some(response) => RelayerError::GasEstimation(format!(
            "{} (code {})",
            response.message, response.code
        )),
        None => RelayerError::ChainConnection {
            chain: chain.to_string(),
            message: format!("estimate_gas: {}", e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{HttpClientError, JsonRpcError};

    #[test]
    fn test_revert_during_estimate_is_final() {
        let e = ProviderError::JsonRpcClientError(Box::new(HttpClientError::JsonRpcError(
            JsonRpcError {
                code: 3,
                message: "execution reverted".to_string(),
                data: None,
            },
        )));

        let err = estimate_error(Chain::Bsc, e);
        assert!(matches!(err, RelayerError::GasEstimation(ref m) if m.contains("execution reverted")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unreachable_node_during_estimate_is_transient() {
        let e = ProviderError::CustomError("error sending request: Connection refused".to_string());

        let err = estimate_error(Chain::Eth, e);
        assert!(matches!(err, RelayerError::ChainConnection { .. }));
        assert!(err.is_retryable());
    }
}
