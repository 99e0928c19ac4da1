//! Gas limit and fee arithmetic

use crate::chain::{CallRequest, EventSource};
use crate::error::RelayerResult;

use ethers::types::U256;
use tracing::debug;

/// Fixed safety multiplier applied to every gas estimate
const GAS_LIMIT_MULTIPLIER: u64 = 2;

/// Gas estimator for outbound transactions
#[derive(Debug, Clone)]
pub struct GasEstimator {
    gas_limit_multiplier: u64,
}

impl GasEstimator {
    pub fn new() -> Self {
        Self {
            gas_limit_multiplier: GAS_LIMIT_MULTIPLIER,
        }
    }

    /// Node estimate times the safety multiplier
    pub async fn gas_limit(
        &self,
        source: &dyn EventSource,
        call: &CallRequest,
    ) -> RelayerResult<U256> {
        let estimate = source.estimate_gas(call).await?;
        let limit = self.apply_multiplier(estimate);
        debug!("Gas estimate {} -> limit {}", estimate, limit);
        Ok(limit)
    }

    pub fn apply_multiplier(&self, estimate: U256) -> U256 {
        estimate.saturating_mul(U256::from(self.gas_limit_multiplier))
    }

    /// Fee actually paid by a mined transaction
    pub fn calculate_cost(gas_used: U256, gas_price: U256) -> U256 {
        gas_used.saturating_mul(gas_price)
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}
