//! Remote transaction signing
//!
//! The relayer never holds key material. Unsigned transaction parameters go to
//! an external signing service which answers with the RLP-encoded signed
//! transaction.

use crate::config::SignerConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Unsigned legacy transaction parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: U256,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Raw signed transaction bytes, ready for broadcast
    async fn sign(&self, request: &SignRequest) -> RelayerResult<Bytes>;
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signed_tx: Bytes,
}

/// HTTP client for the signing service
pub struct RemoteSigner {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl RemoteSigner {
    pub fn new(config: &SignerConfig) -> RelayerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RelayerError::Signer(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl TransactionSigner for RemoteSigner {
    async fn sign(&self, request: &SignRequest) -> RelayerResult<Bytes> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| RelayerError::Signer(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayerError::Signer(format!(
                "signer returned {}: {}",
                status,
                &body[..body.len().min(200)]
            )));
        }

        let signed: SignResponse = resp
            .json()
            .await
            .map_err(|e| RelayerError::Signer(format!("bad signer response: {}", e)))?;

        debug!(
            "Signed tx for chain {} nonce {} ({} bytes)",
            request.chain_id,
            request.nonce,
            signed.signed_tx.len()
        );
        Ok(signed.signed_tx)
    }
}
