// crates/ballast-power/src/registry.rs
//
// Stake records and their lifecycle state machine.
//
// Valid transitions:
//   (nonexistent) -> Active -> Superseded
//
// Superseded is terminal. Records are never erased: a superseded stake still
// answers what power it contributed before it was replaced, which the
// snapshot reconstruction of staker power relies on.

use std::collections::BTreeMap;

use serde::Serialize;

use ballast_core::error::BallastError;
use ballast_core::types::{Amount, Epoch, StakeId};

/// Why a stake stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersedeReason {
    Split,
    Merged,
    Increased,
    Withdrawn,
}

/// Lifecycle state of a stake record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StakeState {
    /// Contributing power and open to lifecycle operations.
    Active,
    /// Replaced or withdrawn at `epoch`; grants no further power.
    Superseded { epoch: Epoch, reason: SupersedeReason },
}

/// A single stake version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stake {
    pub id: StakeId,
    /// First epoch the stake contributes power. Never 0.
    pub initial_epoch: Epoch,
    /// Lockup length counted from `initial_epoch`.
    pub lock_up_epochs: Epoch,
    /// Locked amount, a multiple of the policy rounding unit.
    pub amount: Amount,
    pub state: StakeState,
}

impl Stake {
    /// Epoch at which the lockup ends and power reaches zero.
    pub fn maturity(&self) -> Epoch {
        self.initial_epoch + self.lock_up_epochs
    }

    /// Lockup left at `epoch`, zero once matured.
    pub fn remaining_at(&self, epoch: Epoch) -> Epoch {
        self.maturity().saturating_sub(epoch)
    }

    pub fn is_active(&self) -> bool {
        self.state == StakeState::Active
    }
}

/// Registry of every stake version ever created.
#[derive(Debug, Clone)]
pub struct StakeRegistry {
    stakes: BTreeMap<StakeId, Stake>,
    next_id: u64,
}

impl StakeRegistry {
    /// Create an empty registry. The first id handed out is `#1`.
    pub fn new() -> Self {
        Self {
            stakes: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// The id the next `insert` will allocate.
    pub fn peek_next_id(&self) -> StakeId {
        StakeId(self.next_id)
    }

    /// Record a new active stake and return its id.
    ///
    /// # Errors
    /// Returns `BallastError::InvalidInput` if `initial_epoch` is 0 or the
    /// lockup is empty.
    pub fn insert(
        &mut self,
        initial_epoch: Epoch,
        lock_up_epochs: Epoch,
        amount: Amount,
    ) -> Result<StakeId, BallastError> {
        if initial_epoch == 0 {
            return Err(BallastError::InvalidInput(
                "initial epoch must not be 0".to_string(),
            ));
        }
        if lock_up_epochs == 0 {
            return Err(BallastError::InvalidInput(
                "lockup must be at least one epoch".to_string(),
            ));
        }
        let id = StakeId(self.next_id);
        self.next_id += 1;
        self.stakes.insert(
            id,
            Stake {
                id,
                initial_epoch,
                lock_up_epochs,
                amount,
                state: StakeState::Active,
            },
        );
        Ok(id)
    }

    /// Look up any stake version, active or not.
    ///
    /// # Errors
    /// Returns `BallastError::NotFound` for an unknown id.
    pub fn get(&self, id: StakeId) -> Result<&Stake, BallastError> {
        self.stakes
            .get(&id)
            .ok_or_else(|| BallastError::NotFound(format!("stake {} does not exist", id)))
    }

    /// Look up a stake that is still open to lifecycle operations.
    ///
    /// # Errors
    /// Returns `BallastError::NotFound` for an unknown id and
    /// `BallastError::InvalidState` for a superseded one.
    pub fn get_active(&self, id: StakeId) -> Result<&Stake, BallastError> {
        let stake = self.get(id)?;
        if let StakeState::Superseded { epoch, reason } = stake.state {
            return Err(BallastError::InvalidState(format!(
                "stake {} was superseded at epoch {} ({:?})",
                id, epoch, reason
            )));
        }
        Ok(stake)
    }

    /// Move an active stake to `Superseded`.
    ///
    /// # Errors
    /// Same as `get_active`.
    pub fn supersede(
        &mut self,
        id: StakeId,
        epoch: Epoch,
        reason: SupersedeReason,
    ) -> Result<(), BallastError> {
        self.get_active(id)?;
        if let Some(stake) = self.stakes.get_mut(&id) {
            stake.state = StakeState::Superseded { epoch, reason };
        }
        Ok(())
    }

    /// Restart an active stake's lockup at `initial_epoch`, keeping its
    /// maturity and amount.
    ///
    /// # Errors
    /// Returns `BallastError::InvalidState` if the stake is superseded or
    /// would have no lockup left at `initial_epoch`.
    pub fn rebase(&mut self, id: StakeId, initial_epoch: Epoch) -> Result<(), BallastError> {
        let maturity = self.get_active(id)?.maturity();
        if initial_epoch == 0 || initial_epoch >= maturity {
            return Err(BallastError::InvalidState(format!(
                "stake {} matures at {} and cannot be re-based to {}",
                id, maturity, initial_epoch
            )));
        }
        if let Some(stake) = self.stakes.get_mut(&id) {
            stake.initial_epoch = initial_epoch;
            stake.lock_up_epochs = maturity - initial_epoch;
        }
        Ok(())
    }

    /// All stakes that are still active, in id order.
    pub fn active_stakes(&self) -> impl Iterator<Item = &Stake> + '_ {
        self.stakes.values().filter(|s| s.is_active())
    }

    /// Every stake version ever recorded, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Stake> + '_ {
        self.stakes.values()
    }

    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }
}

impl Default for StakeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
