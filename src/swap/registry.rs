//! In-memory routing table from token address to published swap pair
//!
//! Rebuilt from the persisted pairs at startup. After that it only grows,
//! through the pairs handed back by swap-pair finalization.

use crate::error::RelayerResult;
use crate::state::models::{parse_u256, SwapDirection, SwapPair};
use crate::state::RecordStore;

use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

/// A published pair as the swap engine needs it
#[derive(Debug, Clone, PartialEq)]
pub struct PairRoute {
    pub erc20: Address,
    pub bep20: Address,
    pub symbol: String,
    pub decimals: u8,
    pub low_bound: U256,
    pub upper_bound: U256,
    pub available: bool,
}

impl PairRoute {
    pub fn from_pair(pair: &SwapPair) -> RelayerResult<Self> {
        Ok(Self {
            erc20: pair.erc20_addr,
            bep20: pair.bep20_addr,
            symbol: pair.symbol.clone(),
            decimals: pair.decimals,
            low_bound: parse_u256(&pair.low_bound)?,
            upper_bound: parse_u256(&pair.upper_bound)?,
            available: pair.available,
        })
    }

    pub fn in_bounds(&self, amount: U256) -> bool {
        amount >= self.low_bound && amount <= self.upper_bound
    }
}

#[derive(Debug, Default)]
struct Routes {
    by_erc20: HashMap<Address, PairRoute>,
    by_bep20: HashMap<Address, PairRoute>,
}

#[derive(Debug, Default)]
pub struct SwapPairRegistry {
    routes: RwLock<Routes>,
}

impl SwapPairRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every persisted pair
    pub async fn load(store: &dyn RecordStore) -> RelayerResult<Self> {
        let registry = Self::new();
        let pairs = store.swap_pairs().await?;
        for pair in &pairs {
            registry.register(pair)?;
        }
        info!("Swap pair registry loaded with {} pairs", pairs.len());
        Ok(registry)
    }

    pub fn register(&self, pair: &SwapPair) -> RelayerResult<()> {
        let route = PairRoute::from_pair(pair)?;
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.by_bep20.insert(route.bep20, route.clone());
        routes.by_erc20.insert(route.erc20, route);
        Ok(())
    }

    pub fn by_erc20(&self, erc20: &Address) -> Option<PairRoute> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.by_erc20.get(erc20).cloned()
    }

    pub fn by_bep20(&self, bep20: &Address) -> Option<PairRoute> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.by_bep20.get(bep20).cloned()
    }

    /// Route for the token a swap was started with on its source chain
    pub fn resolve(&self, direction: SwapDirection, source_token: &Address) -> Option<PairRoute> {
        match direction {
            SwapDirection::EthToBsc => self.by_erc20(source_token),
            SwapDirection::BscToEth => self.by_bep20(source_token),
        }
    }

    pub fn len(&self) -> usize {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.by_erc20.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{InMemoryStore, Mutation};
    use crate::test_utils::sample_pair;

    #[test]
    fn test_resolves_by_source_chain_token() {
        let registry = SwapPairRegistry::new();
        let pair = sample_pair(0x11, 0x22);
        registry.register(&pair).unwrap();

        let eth = registry
            .resolve(SwapDirection::EthToBsc, &pair.erc20_addr)
            .unwrap();
        assert_eq!(eth.bep20, pair.bep20_addr);

        let bsc = registry
            .resolve(SwapDirection::BscToEth, &pair.bep20_addr)
            .unwrap();
        assert_eq!(bsc.erc20, pair.erc20_addr);

        // an ERC20 address means nothing on the BSC side
        assert!(registry
            .resolve(SwapDirection::BscToEth, &pair.erc20_addr)
            .is_none());
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let mut pair = sample_pair(0x11, 0x22);
        pair.low_bound = "10".to_string();
        pair.upper_bound = "1000".to_string();
        let route = PairRoute::from_pair(&pair).unwrap();

        assert!(route.in_bounds(U256::from(10)));
        assert!(route.in_bounds(U256::from(1000)));
        assert!(!route.in_bounds(U256::from(9)));
        assert!(!route.in_bounds(U256::from(1001)));
    }

    #[tokio::test]
    async fn test_load_from_store() {
        let store = InMemoryStore::new();
        store
            .apply(vec![
                Mutation::InsertSwapPair(sample_pair(0x11, 0x22)),
                Mutation::InsertSwapPair(sample_pair(0x33, 0x44)),
            ])
            .await
            .unwrap();

        let registry = SwapPairRegistry::load(&store).await.unwrap();
        assert_eq!(registry.len(), 2);
    }
}
