//! Chain module - per-chain RPC access and block/event observation
//!
//! This module provides:
//! - The `EventSource` capability the rest of the relayer consumes
//! - An ethers-backed provider with multi-RPC failover
//! - The chain observer that ingests blocks, rolls back reorgs and counts confirmations
//! - Confirmation arithmetic shared with transaction tracking

pub mod finality;
pub mod observer;
pub mod provider;
pub mod source;

pub use observer::{ChainObserver, FetchOutcome, ObserverConfig};
pub use provider::ChainProvider;
pub use source::{BlockHeader, CallRequest, EventSource, TxReceipt};

use crate::state::models::string_enum;
use serde::Serialize;

/// The two chains the bridge spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Chain {
    Eth,
    Bsc,
}

string_enum!(Chain {
    Eth => "ETH",
    Bsc => "BSC",
});

impl Chain {
    pub fn opposite(&self) -> Chain {
        match self {
            Chain::Eth => Chain::Bsc,
            Chain::Bsc => Chain::Eth,
        }
    }

    pub fn all() -> [Chain; 2] {
        [Chain::Eth, Chain::Bsc]
    }
}

/// One value per bridged chain
#[derive(Debug, Clone)]
pub struct PerChain<T> {
    pub eth: T,
    pub bsc: T,
}

impl<T> PerChain<T> {
    pub fn new(eth: T, bsc: T) -> Self {
        Self { eth, bsc }
    }

    pub fn get(&self, chain: Chain) -> &T {
        match chain {
            Chain::Eth => &self.eth,
            Chain::Bsc => &self.bsc,
        }
    }
}
