//! Swap state machine
//!
//! ```text
//! Received -> QuoteConfirmed -> Sending -> Sent -> Success
//!          \-> QuoteRejected       |        \-> SendFailed -> Success (manual retry)
//!                                  |-> SendFailed
//!                                  \-> QuoteConfirmed (underpriced, re-queued)
//! ```

use crate::error::{RelayerError, RelayerResult};
use crate::state::models::string_enum;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SwapStatus {
    Received,
    QuoteConfirmed,
    QuoteRejected,
    Sending,
    Sent,
    SendFailed,
    Success,
}

string_enum!(SwapStatus {
    Received => "received",
    QuoteConfirmed => "quote_confirmed",
    QuoteRejected => "quote_rejected",
    Sending => "sending",
    Sent => "sent",
    SendFailed => "send_failed",
    Success => "success",
});

impl SwapStatus {
    pub const ALL: [SwapStatus; 7] = [
        SwapStatus::Received,
        SwapStatus::QuoteConfirmed,
        SwapStatus::QuoteRejected,
        SwapStatus::Sending,
        SwapStatus::Sent,
        SwapStatus::SendFailed,
        SwapStatus::Success,
    ];

    /// The single transition table for swaps
    pub fn can_transition_to(&self, next: SwapStatus) -> bool {
        use SwapStatus::*;
        matches!(
            (self, next),
            (Received, QuoteConfirmed)
                | (Received, QuoteRejected)
                | (QuoteConfirmed, Sending)
                | (Sending, Sent)
                | (Sending, SendFailed)
                | (Sending, QuoteConfirmed)
                | (Sent, Success)
                | (Sent, SendFailed)
                | (SendFailed, Success)
        )
    }

    pub fn transition_to(self, next: SwapStatus) -> RelayerResult<SwapStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(RelayerError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// No engine moves a swap out of these on its own
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::QuoteRejected | SwapStatus::SendFailed | SwapStatus::Success
        )
    }
}
