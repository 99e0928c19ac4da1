//! Swap-pair registration state machine
//!
//! ```text
//! Received -> Confirmed -> Sending -> Sent -> Success -> Finalized
//!                 ^           |         \-> SendFailed
//!                 \-----------|-> SendFailed
//!                (underpriced)
//! ```

use crate::error::{RelayerError, RelayerResult};
use crate::state::models::string_enum;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SwapPairStatus {
    Received,
    Confirmed,
    Sending,
    Sent,
    SendFailed,
    Success,
    Finalized,
}

string_enum!(SwapPairStatus {
    Received => "received",
    Confirmed => "confirmed",
    Sending => "sending",
    Sent => "sent",
    SendFailed => "send_failed",
    Success => "success",
    Finalized => "finalized",
});

impl SwapPairStatus {
    pub const ALL: [SwapPairStatus; 7] = [
        SwapPairStatus::Received,
        SwapPairStatus::Confirmed,
        SwapPairStatus::Sending,
        SwapPairStatus::Sent,
        SwapPairStatus::SendFailed,
        SwapPairStatus::Success,
        SwapPairStatus::Finalized,
    ];

    /// The single transition table for swap-pair registrations
    pub fn can_transition_to(&self, next: SwapPairStatus) -> bool {
        use SwapPairStatus::*;
        matches!(
            (self, next),
            (Received, Confirmed)
                | (Confirmed, Sending)
                | (Sending, Sent)
                | (Sending, SendFailed)
                | (Sending, Confirmed)
                | (Sent, Success)
                | (Sent, SendFailed)
                | (Success, Finalized)
        )
    }

    pub fn transition_to(self, next: SwapPairStatus) -> RelayerResult<SwapPairStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(RelayerError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut status = SwapPairStatus::Received;
        for next in [
            SwapPairStatus::Confirmed,
            SwapPairStatus::Sending,
            SwapPairStatus::Sent,
            SwapPairStatus::Success,
            SwapPairStatus::Finalized,
        ] {
            status = status.transition_to(next).unwrap();
        }
        assert_eq!(status, SwapPairStatus::Finalized);
    }

    #[test]
    fn test_finalized_is_terminal() {
        for next in SwapPairStatus::ALL {
            assert!(!SwapPairStatus::Finalized.can_transition_to(next));
        }
        assert!(SwapPairStatus::Received
            .transition_to(SwapPairStatus::Success)
            .is_err());
    }
}
