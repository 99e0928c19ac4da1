//! Persisted record types
//!
//! Every row carries a store-assigned identity (`id`, zero before insert) and a
//! timestamp stamped by the store on each write.

use crate::chain::Chain;
use crate::error::RelayerError;
use crate::swap::SwapStatus;
use crate::swap_pair::SwapPairStatus;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use std::str::FromStr;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless status enum
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::RelayerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::error::RelayerError::Store(format!(
                        "unknown {} value '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use string_enum;

/// Which bridge-contract event an [`EventTxLog`] witnessed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    SwapStart,
    SwapPairRegister,
}

string_enum!(EventKind {
    SwapStart => "swap_start",
    SwapPairRegister => "swap_pair_register",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventStatus {
    Init,
    Confirmed,
}

string_enum!(EventStatus {
    Init => "init",
    Confirmed => "confirmed",
});

/// Progress of an event through the confirmation bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventPhase {
    Seen,
    ConfirmRequest,
    Ack,
}

string_enum!(EventPhase {
    Seen => "seen",
    ConfirmRequest => "confirm_request",
    Ack => "ack",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SwapDirection {
    EthToBsc,
    BscToEth,
}

string_enum!(SwapDirection {
    EthToBsc => "eth_to_bsc",
    BscToEth => "bsc_to_eth",
});

impl SwapDirection {
    /// Chain the swap was started on
    pub fn source_chain(&self) -> Chain {
        match self {
            SwapDirection::EthToBsc => Chain::Eth,
            SwapDirection::BscToEth => Chain::Bsc,
        }
    }

    /// Chain the fill transaction is sent to
    pub fn destination_chain(&self) -> Chain {
        self.source_chain().opposite()
    }

    pub fn from_source(chain: Chain) -> Self {
        match chain {
            Chain::Eth => SwapDirection::EthToBsc,
            Chain::Bsc => SwapDirection::BscToEth,
        }
    }
}

/// Which tracking table a [`TxRecord`] lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TxKind {
    SwapFill,
    SwapPairCreate,
    RetrySwap,
}

string_enum!(TxKind {
    SwapFill => "swap_fill",
    SwapPairCreate => "swap_pair_create",
    RetrySwap => "retry_swap",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TxStatus {
    Created,
    Sent,
    Success,
    Failed,
    Missing,
}

string_enum!(TxStatus {
    Created => "created",
    Sent => "sent",
    Success => "success",
    Failed => "failed",
    Missing => "missing",
});

impl TxStatus {
    /// A broadcast attempt that may still land (or already has)
    pub fn is_live(&self) -> bool {
        matches!(self, TxStatus::Created | TxStatus::Sent | TxStatus::Success)
    }
}

/// One ingested block; the highest row per chain is the tip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockLog {
    pub id: i64,
    pub chain: Chain,
    pub height: u64,
    pub block_hash: H256,
    pub parent_hash: H256,
    pub block_time: u64,
    pub create_time: DateTime<Utc>,
}

/// A decoded bridge-contract event witnessed in an ingested block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventTxLog {
    pub id: i64,
    pub kind: EventKind,
    pub chain: Chain,
    /// ERC20 for ETH events, BEP20 for BSC swap starts
    pub token_addr: Address,
    /// ERC20 counterpart carried by BSC swap starts
    pub peer_token_addr: Option<Address>,
    /// Swap sender or pair sponsor
    pub participant: Address,
    pub amount: String,
    pub fee_amount: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub tx_hash: H256,
    pub log_index: u64,
    pub block_hash: H256,
    pub height: u64,
    pub confirmed_num: u64,
    pub status: EventStatus,
    pub phase: EventPhase,
    pub update_time: DateTime<Utc>,
}

/// Swap state machine row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Swap {
    pub id: i64,
    pub status: SwapStatus,
    pub direction: SwapDirection,
    pub sponsor: Address,
    pub erc20_addr: Address,
    pub bep20_addr: Address,
    pub symbol: String,
    pub decimals: u8,
    pub amount: String,
    pub start_tx_hash: H256,
    pub fill_tx_hash: Option<H256>,
    pub log: String,
    pub record_hash: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Swap {
    pub fn amount(&self) -> Result<U256, RelayerError> {
        U256::from_dec_str(&self.amount)
            .map_err(|e| RelayerError::Internal(format!("bad amount '{}': {}", self.amount, e)))
    }
}

/// Swap-pair registration state machine row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapPairSm {
    pub id: i64,
    pub status: SwapPairStatus,
    pub sponsor: Address,
    pub erc20_addr: Address,
    pub bep20_addr: Option<Address>,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub register_tx_hash: H256,
    pub create_tx_hash: Option<H256>,
    pub log: String,
    pub record_hash: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Published, tradable pair definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapPair {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub erc20_addr: Address,
    pub bep20_addr: Address,
    pub low_bound: String,
    pub upper_bound: String,
    pub available: bool,
    pub create_time: DateTime<Utc>,
}

/// One broadcast attempt; persisted before the broadcast happens
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxRecord {
    pub id: i64,
    pub kind: TxKind,
    /// Swap, swap-pair state machine or retry row this attempt belongs to
    pub owner_id: i64,
    pub chain: Chain,
    pub tx_hash: H256,
    pub nonce: u64,
    pub gas_price: U256,
    pub consumed_fee: Option<U256>,
    pub height: Option<u64>,
    pub status: TxStatus,
    pub track_retry_counter: u32,
    pub error_msg: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// One-shot manual re-attempt of a failed swap
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrySwap {
    pub id: i64,
    pub swap_id: i64,
    pub direction: SwapDirection,
    pub sponsor: Address,
    pub erc20_addr: Address,
    pub bep20_addr: Address,
    pub symbol: String,
    pub decimals: u8,
    pub amount: String,
    pub start_tx_hash: H256,
    pub retry_tx_hash: Option<H256>,
    pub done: bool,
    pub error_msg: String,
    pub record_hash: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Rows removed when a tip block turned out to be orphaned
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    pub blocks: u64,
    pub events: u64,
    pub swaps: u64,
    pub swap_pairs: u64,
}

/// Filter for polling event rows
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub kind: EventKind,
    pub phase: EventPhase,
    pub status: Option<EventStatus>,
    pub limit: usize,
}

/// Row counts by status, for the operator API
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub swaps: std::collections::BTreeMap<String, u64>,
    pub swap_pairs: std::collections::BTreeMap<String, u64>,
    pub pending_retries: u64,
    pub published_pairs: u64,
}

/// Render an optional hash the way it is persisted
pub fn opt_hash(hash: &Option<H256>) -> String {
    hash.map(|h| format!("{:?}", h)).unwrap_or_default()
}

pub fn parse_h256(raw: &str) -> Result<H256, RelayerError> {
    H256::from_str(raw).map_err(|e| RelayerError::Store(format!("bad hash '{}': {}", raw, e)))
}

pub fn parse_address(raw: &str) -> Result<Address, RelayerError> {
    Address::from_str(raw)
        .map_err(|e| RelayerError::Store(format!("bad address '{}': {}", raw, e)))
}

pub fn parse_u256(raw: &str) -> Result<U256, RelayerError> {
    U256::from_dec_str(raw).map_err(|e| RelayerError::Store(format!("bad number '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip() {
        for status in [
            TxStatus::Created,
            TxStatus::Sent,
            TxStatus::Success,
            TxStatus::Failed,
            TxStatus::Missing,
        ] {
            assert_eq!(status.as_str().parse::<TxStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<EventPhase>().is_err());
    }

    #[test]
    fn test_direction_chains() {
        assert_eq!(SwapDirection::EthToBsc.destination_chain(), Chain::Bsc);
        assert_eq!(SwapDirection::BscToEth.destination_chain(), Chain::Eth);
        assert_eq!(SwapDirection::from_source(Chain::Bsc), SwapDirection::BscToEth);
    }
}
