//! Swap-pair registration: an ETH `SwapPairRegister` becomes a deployed BEP20
//! and a published, routable pair

mod engine;
mod status;

pub use engine::SwapPairEngine;
pub use status::SwapPairStatus;
