// crates/ballast-power/src/memory.rs
//
// In-memory implementations of the external collaborators: a manually
// advanced epoch clock, a balance-map commodity ledger, and a position
// ledger. Used by the integration tests and the CLI simulator.

use std::collections::{BTreeMap, HashMap};

use ballast_core::error::BallastError;
use ballast_core::traits::{CommodityLedger, EpochClock, PositionLedger};
use ballast_core::types::{AccountId, Amount, Epoch, StakeId};

/// Epoch clock driven by explicit calls.
#[derive(Debug, Clone, Default)]
pub struct ManualEpochClock {
    epoch: Epoch,
}

impl ManualEpochClock {
    /// Start the clock at `epoch`.
    pub fn starting_at(epoch: Epoch) -> Self {
        Self { epoch }
    }

    /// Move the clock forward by `epochs`.
    pub fn advance(&mut self, epochs: Epoch) {
        self.epoch += epochs;
    }

    /// Jump to `epoch`.
    ///
    /// # Errors
    /// Returns `BallastError::InvalidInput` if `epoch` is in the past.
    pub fn set(&mut self, epoch: Epoch) -> Result<(), BallastError> {
        if epoch < self.epoch {
            return Err(BallastError::InvalidInput(format!(
                "clock cannot move back from epoch {} to {}",
                self.epoch, epoch
            )));
        }
        self.epoch = epoch;
        Ok(())
    }
}

impl EpochClock for ManualEpochClock {
    fn current_epoch(&self) -> Epoch {
        self.epoch
    }
}

/// Commodity ledger backed by a balance map plus a custody pot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCommodityLedger {
    balances: HashMap<AccountId, Amount>,
    custody: Amount,
}

impl InMemoryCommodityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `account` spendable funds.
    pub fn fund(&mut self, account: &AccountId, amount: Amount) {
        *self.balances.entry(*account).or_default() += amount;
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Total held by the staking system.
    pub fn custody(&self) -> Amount {
        self.custody
    }
}

impl CommodityLedger for InMemoryCommodityLedger {
    fn transfer_in(&mut self, from: &AccountId, amount: Amount) -> Result<(), BallastError> {
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(BallastError::Transfer(format!(
                "{} holds {} but {} is required",
                from, balance, amount
            )));
        }
        self.balances.insert(*from, balance - amount);
        self.custody += amount;
        Ok(())
    }

    fn transfer_out(&mut self, to: &AccountId, amount: Amount) -> Result<(), BallastError> {
        if self.custody < amount {
            return Err(BallastError::Transfer(format!(
                "custody holds {} but {} is requested",
                self.custody, amount
            )));
        }
        self.custody -= amount;
        *self.balances.entry(*to).or_default() += amount;
        Ok(())
    }
}

/// Position ledger backed by an owner map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPositionLedger {
    owners: BTreeMap<StakeId, AccountId>,
}

impl InMemoryPositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positions held by `owner`, in id order.
    pub fn positions_of(&self, owner: &AccountId) -> Vec<StakeId> {
        self.owners
            .iter()
            .filter(|(_, o)| *o == owner)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl PositionLedger for InMemoryPositionLedger {
    fn mint(&mut self, owner: &AccountId, id: StakeId) {
        self.owners.insert(id, *owner);
    }

    fn burn(&mut self, id: StakeId) {
        self.owners.remove(&id);
    }

    fn owner_of(&self, id: StakeId) -> Option<AccountId> {
        self.owners.get(&id).copied()
    }

    fn transfer(&mut self, id: StakeId, to: &AccountId) -> Result<(), BallastError> {
        match self.owners.get_mut(&id) {
            Some(owner) => {
                *owner = *to;
                Ok(())
            }
            None => Err(BallastError::NotFound(format!("no position for stake {}", id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let mut clock = ManualEpochClock::starting_at(5);
        clock.advance(2);
        assert_eq!(clock.current_epoch(), 7);
        assert!(clock.set(6).is_err());
        clock.set(9).unwrap();
        assert_eq!(clock.current_epoch(), 9);
    }

    #[test]
    fn test_transfer_in_requires_balance() {
        let alice = AccountId::repeat(1);
        let mut ledger = InMemoryCommodityLedger::new();
        ledger.fund(&alice, 500);

        assert!(matches!(
            ledger.transfer_in(&alice, 600),
            Err(BallastError::Transfer(_))
        ));
        assert_eq!(ledger.balance_of(&alice), 500);

        ledger.transfer_in(&alice, 300).unwrap();
        assert_eq!(ledger.balance_of(&alice), 200);
        assert_eq!(ledger.custody(), 300);
    }

    #[test]
    fn test_transfer_out_requires_custody() {
        let alice = AccountId::repeat(1);
        let mut ledger = InMemoryCommodityLedger::new();
        assert!(ledger.transfer_out(&alice, 1).is_err());
        ledger.fund(&alice, 100);
        ledger.transfer_in(&alice, 100).unwrap();
        ledger.transfer_out(&alice, 100).unwrap();
        assert_eq!(ledger.balance_of(&alice), 100);
        assert_eq!(ledger.custody(), 0);
    }

    #[test]
    fn test_position_lifecycle() {
        let alice = AccountId::repeat(1);
        let bob = AccountId::repeat(2);
        let mut positions = InMemoryPositionLedger::new();
        positions.mint(&alice, StakeId(1));
        positions.mint(&alice, StakeId(2));
        positions.transfer(StakeId(2), &bob).unwrap();

        assert_eq!(positions.positions_of(&alice), vec![StakeId(1)]);
        assert_eq!(positions.owner_of(StakeId(2)), Some(bob));

        positions.burn(StakeId(1));
        assert_eq!(positions.owner_of(StakeId(1)), None);
        assert!(positions.transfer(StakeId(1), &bob).is_err());
    }
}
