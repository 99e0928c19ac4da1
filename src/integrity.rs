//! Record hash: a keyed HMAC-SHA256 over a row's security-relevant fields
//!
//! Engines reseal a row on every write and verify it before trusting it for a
//! transition. A mismatch means the row was changed outside the engines.

use crate::error::{RelayerError, RelayerResult};
use crate::state::models::{opt_hash, RetrySwap, Swap, SwapPairSm};

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A row protected by a record hash
pub trait Sealed {
    const TABLE: &'static str;

    fn row_id(&self) -> i64;

    /// Security-relevant fields, in hashing order
    fn integrity_fields(&self) -> Vec<String>;

    fn record_hash(&self) -> &str;

    fn set_record_hash(&mut self, hash: String);
}

/// Computes and checks record hashes with the shared secret key
pub struct RecordHasher {
    key: Vec<u8>,
}

impl RecordHasher {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    fn mac<T: Sealed>(&self, row: &T) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        // length prefixes keep adjacent fields from trading characters
        for field in row.integrity_fields() {
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field.as_bytes());
        }
        mac
    }

    /// Hash of the row's current field values
    pub fn compute<T: Sealed>(&self, row: &T) -> String {
        hex::encode(self.mac(row).finalize().into_bytes())
    }

    /// Recompute and store the hash; call after every mutation
    pub fn seal<T: Sealed>(&self, row: &mut T) {
        let hash = self.compute(row);
        row.set_record_hash(hash);
    }

    pub fn verify<T: Sealed>(&self, row: &T) -> bool {
        let Ok(stored) = hex::decode(row.record_hash()) else {
            return false;
        };
        self.mac(row).verify_slice(&stored).is_ok()
    }

    /// Verify, mapping a mismatch onto `IntegrityViolation`
    pub fn ensure<T: Sealed>(&self, row: &T) -> RelayerResult<()> {
        if self.verify(row) {
            Ok(())
        } else {
            crate::metrics::record_integrity_violation(T::TABLE);
            Err(RelayerError::IntegrityViolation {
                table: T::TABLE,
                id: row.row_id(),
            })
        }
    }
}

impl Sealed for Swap {
    const TABLE: &'static str = "swap";

    fn row_id(&self) -> i64 {
        self.id
    }

    fn integrity_fields(&self) -> Vec<String> {
        vec![
            self.status.to_string(),
            self.direction.to_string(),
            format!("{:?}", self.start_tx_hash),
            opt_hash(&self.fill_tx_hash),
            format!("{:?}", self.sponsor),
            format!("{:?}", self.erc20_addr),
            format!("{:?}", self.bep20_addr),
            self.symbol.clone(),
            self.amount.clone(),
            self.decimals.to_string(),
        ]
    }

    fn record_hash(&self) -> &str {
        &self.record_hash
    }

    fn set_record_hash(&mut self, hash: String) {
        self.record_hash = hash;
    }
}

impl Sealed for SwapPairSm {
    const TABLE: &'static str = "swap_pair_sm";

    fn row_id(&self) -> i64 {
        self.id
    }

    fn integrity_fields(&self) -> Vec<String> {
        vec![
            self.status.to_string(),
            format!("{:?}", self.erc20_addr),
            self.bep20_addr.map(|a| format!("{:?}", a)).unwrap_or_default(),
            self.symbol.clone(),
            self.decimals.to_string(),
            self.name.clone(),
            format!("{:?}", self.register_tx_hash),
            opt_hash(&self.create_tx_hash),
        ]
    }

    fn record_hash(&self) -> &str {
        &self.record_hash
    }

    fn set_record_hash(&mut self, hash: String) {
        self.record_hash = hash;
    }
}

impl Sealed for RetrySwap {
    const TABLE: &'static str = "retry_swap";

    fn row_id(&self) -> i64 {
        self.id
    }

    fn integrity_fields(&self) -> Vec<String> {
        vec![
            self.swap_id.to_string(),
            self.done.to_string(),
            self.direction.to_string(),
            format!("{:?}", self.start_tx_hash),
            opt_hash(&self.retry_tx_hash),
            format!("{:?}", self.sponsor),
            format!("{:?}", self.erc20_addr),
            format!("{:?}", self.bep20_addr),
            self.symbol.clone(),
            self.amount.clone(),
            self.decimals.to_string(),
        ]
    }

    fn record_hash(&self) -> &str {
        &self.record_hash
    }

    fn set_record_hash(&mut self, hash: String) {
        self.record_hash = hash;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_swap;

    #[test]
    fn test_seal_then_verify() {
        let hasher = RecordHasher::new("secret");
        let mut swap = sample_swap(1);
        hasher.seal(&mut swap);
        assert!(hasher.verify(&swap));
        assert!(hasher.ensure(&swap).is_ok());
    }

    #[test]
    fn test_out_of_band_edit_is_detected() {
        let hasher = RecordHasher::new("secret");
        let mut swap = sample_swap(1);
        hasher.seal(&mut swap);

        swap.amount = "999999".to_string();
        assert!(!hasher.verify(&swap));
        assert!(matches!(
            hasher.ensure(&swap),
            Err(RelayerError::IntegrityViolation { table: "swap", .. })
        ));
    }

    #[test]
    fn test_field_boundaries_are_part_of_the_hash() {
        let hasher = RecordHasher::new("secret");
        let mut swap = sample_swap(1);
        swap.symbol = "X1".to_string();
        swap.decimals = 8;
        hasher.seal(&mut swap);

        swap.symbol = "X".to_string();
        swap.decimals = 18;
        assert!(!hasher.verify(&swap));
    }

    #[test]
    fn test_key_matters() {
        let mut swap = sample_swap(1);
        RecordHasher::new("one").seal(&mut swap);
        assert!(!RecordHasher::new("two").verify(&swap));
    }

    #[test]
    fn test_garbage_hash_fails_verification() {
        let hasher = RecordHasher::new("secret");
        let mut swap = sample_swap(1);
        swap.record_hash = "not-hex".to_string();
        assert!(!hasher.verify(&swap));
    }
}
