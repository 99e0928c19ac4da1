//! Swap Bridge Relayer - control plane for a two-way ETH/BSC token swap bridge
//!
//! Watches the swap agent contracts on both chains, turns confirmed swap starts
//! into fills on the opposite chain and onboards new token pairs.

pub mod alert;
pub mod api;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod integrity;
pub mod metrics;
pub mod retry;
pub mod state;
pub mod swap;
pub mod swap_pair;
pub mod tx;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;
