//! Outbound transactions: remote signing, serialized sending and receipt tracking

mod gas;
mod sender;
pub mod signer;
mod tracker;

pub use gas::GasEstimator;
pub use sender::{ChainSender, Outbound};
pub use signer::{RemoteSigner, SignRequest, TransactionSigner};
pub use tracker::{TrackOutcome, TxTracker};
