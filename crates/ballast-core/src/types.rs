// crates/ballast-core/src/types.rs
//
// Identifier and scalar types shared across the workspace.
//
// Amounts are unsigned and quantized to the policy rounding unit. Power is
// signed so that per-epoch changes (deltas) share the same type as absolute
// values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete accounting time step.
pub type Epoch = u64;

/// Quantity of the locked commodity, in its smallest unit.
pub type Amount = u128;

/// Voting power, or a signed change in voting power.
pub type Power = i128;

/// Opaque 32-byte account identifier (owner or beneficiary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// Build an account id whose every byte is `byte`. Handy for fixtures.
    pub fn repeat(byte: u8) -> Self {
        Self([byte; 32])
    }

    /// Raw bytes of the identifier.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form: first four bytes, like a truncated address.
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

/// Identifier of a stake version. Allocated sequentially, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StakeId(pub u64);

impl fmt::Display for StakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_display_is_short_hex() {
        let id = AccountId::repeat(0xab);
        assert_eq!(id.to_string(), "abababab..");
    }

    #[test]
    fn test_stake_id_display() {
        assert_eq!(StakeId(42).to_string(), "#42");
    }

    #[test]
    fn test_stake_ids_order_by_allocation() {
        assert!(StakeId(1) < StakeId(2));
    }
}
