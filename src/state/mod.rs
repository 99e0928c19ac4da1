//! Record store: persisted models and the two store backends
//!
//! Handles:
//! - Block and event rows written by the chain observers
//! - Swap, swap-pair and retry state machine rows
//! - Per-transaction tracking rows
//! - Atomic multi-row batches with compare-and-set claims

mod memory;
pub mod models;
mod postgres;
mod store;

pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use store::{Mutation, RecordStore};
