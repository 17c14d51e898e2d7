// crates/ballast-power/src/beneficiary.rs
//
// Per-beneficiary history of the stake ids whose power they receive.
//
// Each beneficiary has an append-only list of (epoch, stake-id set)
// snapshots with strictly increasing epochs. A change at epoch E copies the
// latest set into a new snapshot for E, or edits the snapshot in place when
// one for E already exists. Lookups take the last snapshot at or before the
// query epoch, so history is never rewritten.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ballast_core::error::BallastError;
use ballast_core::types::{AccountId, Epoch, StakeId};

type Snapshot = (Epoch, BTreeSet<StakeId>);

/// Delegation ledger: who benefits from which stake, over time.
#[derive(Debug, Clone, Default)]
pub struct BeneficiaryDelegationLedger {
    /// Snapshot history per beneficiary.
    snapshots: BTreeMap<AccountId, Vec<Snapshot>>,
    /// Latest recorded beneficiary for each live stake id.
    current: HashMap<StakeId, AccountId>,
}

impl BeneficiaryDelegationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// The beneficiary currently recorded for `id`, if any.
    pub fn beneficiary_of(&self, id: StakeId) -> Option<AccountId> {
        self.current.get(&id).copied()
    }

    /// Every account that has ever held a snapshot, in id order.
    pub fn beneficiaries(&self) -> impl Iterator<Item = &AccountId> + '_ {
        self.snapshots.keys()
    }

    /// Stake ids credited to `beneficiary` as of `epoch`.
    pub fn stakes_at(
        &self,
        beneficiary: &AccountId,
        epoch: Epoch,
    ) -> impl Iterator<Item = StakeId> + '_ {
        self.snapshot_at(beneficiary, epoch)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Number of snapshots recorded for `beneficiary`.
    pub fn snapshot_count(&self, beneficiary: &AccountId) -> usize {
        self.snapshots.get(beneficiary).map_or(0, Vec::len)
    }

    /// Reject a write that would land before the latest snapshot.
    ///
    /// # Errors
    /// Returns `BallastError::InvariantViolation` if `epoch` precedes the
    /// beneficiary's last snapshot.
    pub fn check_writable(&self, beneficiary: &AccountId, epoch: Epoch) -> Result<(), BallastError> {
        if let Some((last, _)) = self.snapshots.get(beneficiary).and_then(|h| h.last()) {
            if *last > epoch {
                return Err(BallastError::InvariantViolation(format!(
                    "snapshot for {} at epoch {} precedes latest snapshot at {}",
                    beneficiary, epoch, last
                )));
            }
        }
        Ok(())
    }

    /// Credit `id` to `beneficiary` from `epoch` onward.
    ///
    /// # Errors
    /// - `BallastError::InvalidState` if `id` already has a beneficiary.
    /// - `BallastError::InvariantViolation` if `epoch` precedes history.
    pub fn add(&mut self, beneficiary: &AccountId, id: StakeId, epoch: Epoch) -> Result<(), BallastError> {
        if let Some(existing) = self.current.get(&id) {
            return Err(BallastError::InvalidState(format!(
                "stake {} is already credited to {}",
                id, existing
            )));
        }
        self.check_writable(beneficiary, epoch)?;
        self.write(beneficiary, epoch, |set| {
            set.insert(id);
        });
        self.current.insert(id, *beneficiary);
        Ok(())
    }

    /// Stop crediting `id` to `beneficiary` from `epoch` onward.
    ///
    /// # Errors
    /// - `BallastError::NotFound` if `id` is not credited to `beneficiary`.
    /// - `BallastError::InvariantViolation` if `epoch` precedes history.
    pub fn remove(&mut self, beneficiary: &AccountId, id: StakeId, epoch: Epoch) -> Result<(), BallastError> {
        self.check_recorded(beneficiary, id)?;
        self.check_writable(beneficiary, epoch)?;
        self.write(beneficiary, epoch, |set| {
            set.remove(&id);
        });
        self.current.remove(&id);
        Ok(())
    }

    /// Move `id` from `from` to `to` from `epoch` onward.
    ///
    /// # Errors
    /// - `BallastError::NotFound` if `id` is not credited to `from`.
    /// - `BallastError::InvalidInput` if `from == to`.
    /// - `BallastError::InvariantViolation` if `epoch` precedes either history.
    pub fn move_stake(
        &mut self,
        id: StakeId,
        from: &AccountId,
        to: &AccountId,
        epoch: Epoch,
    ) -> Result<(), BallastError> {
        if from == to {
            return Err(BallastError::InvalidInput(format!(
                "stake {} is already credited to {}",
                id, to
            )));
        }
        self.check_recorded(from, id)?;
        self.check_writable(from, epoch)?;
        self.check_writable(to, epoch)?;
        self.write(from, epoch, |set| {
            set.remove(&id);
        });
        self.write(to, epoch, |set| {
            set.insert(id);
        });
        self.current.insert(id, *to);
        Ok(())
    }

    fn check_recorded(&self, beneficiary: &AccountId, id: StakeId) -> Result<(), BallastError> {
        match self.current.get(&id) {
            Some(recorded) if recorded == beneficiary => Ok(()),
            _ => Err(BallastError::NotFound(format!(
                "stake {} is not credited to {}",
                id, beneficiary
            ))),
        }
    }

    fn snapshot_at(&self, beneficiary: &AccountId, epoch: Epoch) -> Option<&BTreeSet<StakeId>> {
        let history = self.snapshots.get(beneficiary)?;
        let idx = history.partition_point(|(e, _)| *e <= epoch);
        if idx == 0 {
            None
        } else {
            Some(&history[idx - 1].1)
        }
    }

    /// Copy-on-write edit of the snapshot at `epoch`. Callers have already
    /// checked that `epoch` is not before the latest snapshot.
    fn write(&mut self, beneficiary: &AccountId, epoch: Epoch, edit: impl FnOnce(&mut BTreeSet<StakeId>)) {
        let history = self.snapshots.entry(*beneficiary).or_default();
        let same_epoch = history.last().map_or(false, |(last, _)| *last == epoch);
        if !same_epoch {
            let carried = history.last().map(|(_, set)| set.clone()).unwrap_or_default();
            history.push((epoch, carried));
        }
        if let Some((_, set)) = history.last_mut() {
            edit(set);
        }
    }
}
