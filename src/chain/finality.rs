//! Confirmation arithmetic
//!
//! A block at height `h` observed while the tip is at `t` has `t + 1 - h`
//! confirmations: the block itself counts as the first one.

/// Confirmations of a block at `event_height` given the current tip
pub fn confirmations(current_height: u64, event_height: u64) -> u64 {
    (current_height + 1).saturating_sub(event_height)
}

/// Whether a block at `event_height` is buried deep enough to be treated as final
pub fn is_final(current_height: u64, event_height: u64, required: u64) -> bool {
    confirmations(current_height, event_height) >= required
}

/// Lowest height kept when pruning history `window` blocks behind the tip
pub fn prune_floor(tip_height: u64, window: u64) -> u64 {
    tip_height.saturating_sub(window)
}

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 12,
        // Ethereum testnets
        11155111 | 5 => 6,
        // BNB Smart Chain mainnet
        56 => 15,
        // BNB Smart Chain testnet
        97 => 5,
        // Default conservative
        _ => 15,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_counts_itself() {
        assert_eq!(confirmations(100, 100), 1);
        assert_eq!(confirmations(111, 100), 12);
        assert!(is_final(111, 100, 12));
        assert!(!is_final(110, 100, 12));
    }

    #[test]
    fn test_future_height_has_no_confirmations() {
        assert_eq!(confirmations(5, 10), 0);
    }

    #[test]
    fn test_prune_floor_saturates() {
        assert_eq!(prune_floor(50, 1000), 0);
        assert_eq!(prune_floor(5000, 1000), 4000);
    }
}
