//! Swap state machine: quote, fill, track

mod engine;
mod registry;
mod status;

pub use engine::SwapEngine;
pub use registry::{PairRoute, SwapPairRegistry};
pub use status::SwapStatus;
