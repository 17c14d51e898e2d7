// crates/ballast-power/src/revenue.rs
//
// Pro-rata revenue split keyed by power.
//
// Revenue deposited for an epoch is divided among stakers in proportion to
// their power at that epoch. A share is only quoted once the system total
// for the epoch has been folded, so the denominator can no longer move.
// Each (staker, epoch) pair can be claimed once.

use std::collections::{BTreeMap, HashSet};

use ballast_core::error::BallastError;
use ballast_core::traits::PowerSource;
use ballast_core::types::{AccountId, Amount, Epoch};

/// Per-epoch revenue pools and the claims paid out of them.
#[derive(Debug, Clone, Default)]
pub struct RevenueApportioner {
    pools: BTreeMap<Epoch, Amount>,
    claimed: HashSet<(AccountId, Epoch)>,
}

impl RevenueApportioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the pool for `epoch`.
    ///
    /// # Errors
    /// Returns `BallastError::InvalidInput` for a zero or overflowing deposit.
    pub fn deposit(&mut self, epoch: Epoch, amount: Amount) -> Result<(), BallastError> {
        if amount == 0 {
            return Err(BallastError::InvalidInput(
                "revenue deposit must be positive".to_string(),
            ));
        }
        let pool = self.pools.entry(epoch).or_default();
        *pool = pool.checked_add(amount).ok_or_else(|| {
            BallastError::InvalidInput(format!("revenue pool for epoch {} overflows", epoch))
        })?;
        Ok(())
    }

    /// Revenue deposited for `epoch`.
    pub fn revenue_for(&self, epoch: Epoch) -> Amount {
        self.pools.get(&epoch).copied().unwrap_or(0)
    }

    /// `staker`'s share of the pool for `epoch`, truncated.
    ///
    /// # Errors
    /// - `BallastError::Temporal` if the total for `epoch` is not calculated.
    /// - `BallastError::InvalidInput` if the product overflows.
    pub fn share_of(
        &self,
        source: &impl PowerSource,
        staker: &AccountId,
        epoch: Epoch,
    ) -> Result<Amount, BallastError> {
        if !source.is_total_power_calculated(epoch) {
            return Err(BallastError::Temporal(format!(
                "total power for epoch {} is not calculated yet",
                epoch
            )));
        }
        let total = source.total_power_at(epoch);
        let power = source.staker_power_at(staker, epoch);
        if total <= 0 || power <= 0 {
            return Ok(0);
        }
        let revenue = self.revenue_for(epoch);
        revenue
            .checked_mul(power as Amount)
            .map(|scaled| scaled / total as Amount)
            .ok_or_else(|| {
                BallastError::InvalidInput(format!(
                    "revenue share for epoch {} overflows",
                    epoch
                ))
            })
    }

    /// Pay out `staker`'s share for `epoch` once.
    ///
    /// # Errors
    /// - `BallastError::InvalidState` if already claimed.
    /// - Anything `share_of` returns.
    pub fn claim(
        &mut self,
        source: &impl PowerSource,
        staker: &AccountId,
        epoch: Epoch,
    ) -> Result<Amount, BallastError> {
        if self.claimed.contains(&(*staker, epoch)) {
            return Err(BallastError::InvalidState(format!(
                "{} already claimed revenue for epoch {}",
                staker, epoch
            )));
        }
        let share = self.share_of(source, staker, epoch)?;
        self.claimed.insert((*staker, epoch));
        tracing::info!(staker = %staker, epoch, share = %share, "Revenue claimed");
        Ok(share)
    }

    pub fn has_claimed(&self, staker: &AccountId, epoch: Epoch) -> bool {
        self.claimed.contains(&(*staker, epoch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::types::Power;
    use std::collections::HashMap;

    struct FixedPower {
        stakers: HashMap<AccountId, Power>,
        total: Power,
        calculated: bool,
    }

    impl PowerSource for FixedPower {
        fn staker_power_at(&self, staker: &AccountId, _epoch: Epoch) -> Power {
            self.stakers.get(staker).copied().unwrap_or(0)
        }

        fn total_power_at(&self, _epoch: Epoch) -> Power {
            self.total
        }

        fn is_total_power_calculated(&self, _epoch: Epoch) -> bool {
            self.calculated
        }
    }

    fn source(calculated: bool) -> FixedPower {
        let mut stakers = HashMap::new();
        stakers.insert(AccountId::repeat(1), 300);
        stakers.insert(AccountId::repeat(2), 700);
        FixedPower {
            stakers,
            total: 1000,
            calculated,
        }
    }

    #[test]
    fn test_share_is_pro_rata() {
        let mut revenue = RevenueApportioner::new();
        revenue.deposit(4, 500).unwrap();
        revenue.deposit(4, 500).unwrap();
        let src = source(true);
        assert_eq!(revenue.share_of(&src, &AccountId::repeat(1), 4).unwrap(), 300);
        assert_eq!(revenue.share_of(&src, &AccountId::repeat(2), 4).unwrap(), 700);
        assert_eq!(revenue.share_of(&src, &AccountId::repeat(3), 4).unwrap(), 0);
    }

    #[test]
    fn test_share_fails_closed_before_calculation() {
        let mut revenue = RevenueApportioner::new();
        revenue.deposit(4, 1000).unwrap();
        let err = revenue
            .share_of(&source(false), &AccountId::repeat(1), 4)
            .unwrap_err();
        assert!(matches!(err, BallastError::Temporal(_)));
    }

    #[test]
    fn test_claim_once() {
        let mut revenue = RevenueApportioner::new();
        revenue.deposit(2, 1001).unwrap();
        let src = source(true);
        let alice = AccountId::repeat(1);
        assert_eq!(revenue.claim(&src, &alice, 2).unwrap(), 300);
        assert!(revenue.has_claimed(&alice, 2));
        assert!(matches!(
            revenue.claim(&src, &alice, 2),
            Err(BallastError::InvalidState(_))
        ));
    }

    #[test]
    fn test_zero_deposit_rejected() {
        let mut revenue = RevenueApportioner::new();
        assert!(revenue.deposit(1, 0).is_err());
        assert_eq!(revenue.revenue_for(1), 0);
    }
}
