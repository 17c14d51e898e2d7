// crates/ballast-power/src/engine.rs
//
// PowerEngine: the stake lifecycle operations and the power queries over one
// shared store (registry, global ledger, per-staker ledgers, delegation
// snapshots) with injected external collaborators.
//
// Every mutating call runs in three phases:
//   1. validate inputs, authorization, and temporal preconditions, and plan
//      the ledger writes;
//   2. check that every planned write can land, then perform the one
//      fallible external side effect (commodity debit or credit);
//   3. commit registry, snapshot, ledger, and position changes, none of
//      which can fail once phase 2 passed.
// A rejected call therefore leaves no trace.
//
// All writes land at `current_epoch + 1` or later; the watermark never
// passes the current epoch, so folded history is never touched.

use std::collections::BTreeMap;

use ballast_core::error::BallastError;
use ballast_core::events::StakeEvent;
use ballast_core::policy::PowerPolicy;
use ballast_core::traits::{CommodityLedger, EpochClock, PositionLedger, PowerSource};
use ballast_core::types::{AccountId, Amount, Epoch, Power, StakeId};

use crate::beneficiary::BeneficiaryDelegationLedger;
use crate::decay::DecayCurve;
use crate::ledger::EpochDeltaLedger;
use crate::registry::{Stake, StakeRegistry, SupersedeReason};

type DeltaSequence = Vec<(Epoch, Power)>;

/// Ledger writes planned by one call, checked before any is applied.
#[derive(Debug, Default)]
struct LedgerWrites {
    total: DeltaSequence,
    stakers: Vec<(AccountId, DeltaSequence)>,
}

impl LedgerWrites {
    /// Add a stake's contribution to the total and to `staker`.
    fn credit(&mut self, staker: &AccountId, sequence: &[(Epoch, Power)]) {
        self.total.extend_from_slice(sequence);
        self.stakers.push((*staker, sequence.to_vec()));
    }

    /// Remove a stake's contribution from the total and from `staker`.
    fn debit(&mut self, staker: &AccountId, sequence: &[(Epoch, Power)]) {
        let negated: DeltaSequence = sequence.iter().map(|&(e, v)| (e, -v)).collect();
        self.total.extend_from_slice(&negated);
        self.stakers.push((*staker, negated));
    }

    /// Move a contribution between stakers; the total is unchanged.
    fn shift(&mut self, from: &AccountId, to: &AccountId, sequence: &[(Epoch, Power)]) {
        let negated: DeltaSequence = sequence.iter().map(|&(e, v)| (e, -v)).collect();
        self.stakers.push((*from, negated));
        self.stakers.push((*to, sequence.to_vec()));
    }
}

/// The power-accounting engine.
pub struct PowerEngine<C, L, P> {
    curve: DecayCurve,
    registry: StakeRegistry,
    total: EpochDeltaLedger,
    stakers: BTreeMap<AccountId, EpochDeltaLedger>,
    beneficiaries: BeneficiaryDelegationLedger,
    events: Vec<StakeEvent>,
    /// Owner of each live position as last settled by the engine.
    holders: BTreeMap<StakeId, AccountId>,
    clock: C,
    commodity: L,
    positions: P,
}

impl<C, L, P> PowerEngine<C, L, P>
where
    C: EpochClock,
    L: CommodityLedger,
    P: PositionLedger,
{
    /// Create an engine with an empty store.
    ///
    /// # Errors
    /// Returns `BallastError::Config` if the policy is inconsistent.
    pub fn new(policy: PowerPolicy, clock: C, commodity: L, positions: P) -> Result<Self, BallastError> {
        Ok(Self {
            curve: DecayCurve::new(policy)?,
            registry: StakeRegistry::new(),
            total: EpochDeltaLedger::new(),
            stakers: BTreeMap::new(),
            beneficiaries: BeneficiaryDelegationLedger::new(),
            events: Vec::new(),
            holders: BTreeMap::new(),
            clock,
            commodity,
            positions,
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Lock `amount` for `lock_up_epochs`, owned by and credited to `caller`.
    pub fn create_stake(
        &mut self,
        caller: &AccountId,
        amount: Amount,
        lock_up_epochs: Epoch,
    ) -> Result<StakeId, BallastError> {
        self.create_stake_on_behalf_of(caller, caller, amount, lock_up_epochs)
    }

    /// Lock `amount` paid by `funder`; `beneficiary` owns the position and
    /// receives the power.
    ///
    /// # Errors
    /// - `BallastError::InvalidInput` for a bad amount or lockup.
    /// - `BallastError::Transfer` if the funder cannot pay.
    pub fn create_stake_on_behalf_of(
        &mut self,
        funder: &AccountId,
        beneficiary: &AccountId,
        amount: Amount,
        lock_up_epochs: Epoch,
    ) -> Result<StakeId, BallastError> {
        self.policy().validate_amount(amount)?;
        self.ensure_allowed_lockup(lock_up_epochs)?;

        let start = self.next_epoch();
        let mut writes = LedgerWrites::default();
        writes.credit(beneficiary, &self.curve.delta_sequence(amount, start, lock_up_epochs));
        self.check_writes(&writes)?;
        self.beneficiaries.check_writable(beneficiary, start)?;

        self.commodity.transfer_in(funder, amount)?;

        let id = self.registry.insert(start, lock_up_epochs, amount)?;
        self.beneficiaries.add(beneficiary, id, start)?;
        self.apply_writes(writes)?;
        self.mint_position(beneficiary, id);

        tracing::info!(
            stake = %id,
            beneficiary = %beneficiary,
            amount = %amount,
            lock_up_epochs,
            initial_epoch = start,
            "Stake created"
        );
        self.events.push(StakeEvent::StakeCreated {
            id,
            funder: *funder,
            beneficiary: *beneficiary,
            amount,
            initial_epoch: start,
            lock_up_epochs,
        });
        Ok(id)
    }

    /// Split `split_amount` off stake `id` into a second stake with the same
    /// schedule. Power-neutral: no ledger is written.
    ///
    /// Returns the ids of the two new stakes (split part first).
    pub fn split_stake(
        &mut self,
        caller: &AccountId,
        id: StakeId,
        split_amount: Amount,
    ) -> Result<(StakeId, StakeId), BallastError> {
        let stake = self.authorize(caller, id, true)?;
        self.policy().validate_amount(split_amount)?;
        if split_amount >= stake.amount {
            return Err(BallastError::InvalidInput(format!(
                "split amount {} must be below the stake amount {}",
                split_amount, stake.amount
            )));
        }
        let rest = stake.amount - split_amount;

        let effective = self.next_epoch();
        self.beneficiaries.check_writable(caller, effective)?;

        self.registry.supersede(id, effective, SupersedeReason::Split)?;
        let first = self
            .registry
            .insert(stake.initial_epoch, stake.lock_up_epochs, split_amount)?;
        let second = self
            .registry
            .insert(stake.initial_epoch, stake.lock_up_epochs, rest)?;
        self.beneficiaries.remove(caller, id, effective)?;
        self.beneficiaries.add(caller, first, effective)?;
        self.beneficiaries.add(caller, second, effective)?;
        self.burn_position(id);
        self.mint_position(caller, first);
        self.mint_position(caller, second);

        tracing::info!(original = %id, first = %first, second = %second, "Stake split");
        self.events.push(StakeEvent::StakeSplit {
            original: id,
            first,
            second,
            first_amount: split_amount,
            second_amount: rest,
        });
        Ok((first, second))
    }

    /// Merge `second` into `first`. The merged stake keeps `first`'s
    /// maturity and restarts at the next epoch.
    ///
    /// # Errors
    /// - `BallastError::InvalidInput` if the ids are equal, `first` matures
    ///   before `second`, or the merged amount is out of range.
    /// - `BallastError::Temporal` if `first` matures by the next epoch.
    pub fn merge_stakes(
        &mut self,
        caller: &AccountId,
        first: StakeId,
        second: StakeId,
    ) -> Result<StakeId, BallastError> {
        if first == second {
            return Err(BallastError::InvalidInput(format!(
                "cannot merge stake {} with itself",
                first
            )));
        }
        let a = self.authorize(caller, first, true)?;
        let b = self.authorize(caller, second, true)?;
        let start = self.next_epoch();
        if a.maturity() < b.maturity() {
            return Err(BallastError::InvalidInput(format!(
                "stake {} matures at {}, before stake {} at {}",
                first,
                a.maturity(),
                second,
                b.maturity()
            )));
        }
        if a.maturity() <= start {
            return Err(BallastError::Temporal(format!(
                "stake {} matures at {}; merging needs a maturity after epoch {}",
                first,
                a.maturity(),
                start
            )));
        }
        let amount = a.amount.checked_add(b.amount).ok_or_else(|| {
            BallastError::InvalidInput("merged amount overflows".to_string())
        })?;
        self.policy().validate_amount(amount)?;

        let remaining = a.maturity() - start;
        let mut writes = LedgerWrites::default();
        if a.maturity() != b.maturity() {
            writes.debit(
                caller,
                &self.curve.delta_sequence(b.amount, start, b.remaining_at(start)),
            );
            writes.credit(caller, &self.curve.delta_sequence(b.amount, start, remaining));
        }
        self.check_writes(&writes)?;
        self.beneficiaries.check_writable(caller, start)?;

        self.registry.supersede(first, start, SupersedeReason::Merged)?;
        self.registry.supersede(second, start, SupersedeReason::Merged)?;
        let merged = self.registry.insert(start, remaining, amount)?;
        self.beneficiaries.remove(caller, first, start)?;
        self.beneficiaries.remove(caller, second, start)?;
        self.beneficiaries.add(caller, merged, start)?;
        self.apply_writes(writes)?;
        self.burn_position(first);
        self.burn_position(second);
        self.mint_position(caller, merged);

        tracing::info!(
            first = %first,
            second = %second,
            merged = %merged,
            amount = %amount,
            maturity = a.maturity(),
            "Stakes merged"
        );
        self.events.push(StakeEvent::StakeMerged {
            first,
            second,
            merged,
            amount,
            initial_epoch: start,
            lock_up_epochs: remaining,
        });
        Ok(merged)
    }

    /// Top up and/or extend stake `id` into a new stake version.
    ///
    /// The remaining lockup after extension must be an allowed duration.
    ///
    /// # Errors
    /// - `BallastError::InvalidInput` if both increments are zero, the
    ///   resulting lockup is not allowed, or an amount is out of range.
    /// - `BallastError::Transfer` if the caller cannot pay the top-up.
    pub fn increase_stake(
        &mut self,
        caller: &AccountId,
        id: StakeId,
        additional_amount: Amount,
        additional_epochs: Epoch,
    ) -> Result<StakeId, BallastError> {
        if additional_amount == 0 && additional_epochs == 0 {
            return Err(BallastError::InvalidInput(
                "increase needs a non-zero amount or duration".to_string(),
            ));
        }
        let stake = self.authorize(caller, id, true)?;
        let start = self.next_epoch();
        let remaining = stake.remaining_at(start);
        let new_remaining = remaining.checked_add(additional_epochs).ok_or_else(|| {
            BallastError::InvalidInput("lockup extension overflows".to_string())
        })?;
        self.ensure_allowed_lockup(new_remaining)?;

        let new_amount = if additional_amount > 0 {
            self.policy().validate_amount(additional_amount)?;
            let total = stake.amount.checked_add(additional_amount).ok_or_else(|| {
                BallastError::InvalidInput("increased amount overflows".to_string())
            })?;
            self.policy().validate_amount(total)?;
            total
        } else {
            stake.amount
        };

        let mut writes = LedgerWrites::default();
        if additional_epochs > 0 {
            writes.debit(caller, &self.curve.delta_sequence(stake.amount, start, remaining));
            writes.credit(caller, &self.curve.delta_sequence(new_amount, start, new_remaining));
        } else {
            writes.credit(
                caller,
                &self.curve.delta_sequence(additional_amount, start, remaining),
            );
        }
        self.check_writes(&writes)?;
        self.beneficiaries.check_writable(caller, start)?;

        if additional_amount > 0 {
            self.commodity.transfer_in(caller, additional_amount)?;
        }

        self.registry.supersede(id, start, SupersedeReason::Increased)?;
        let replacement = self.registry.insert(start, new_remaining, new_amount)?;
        self.beneficiaries.remove(caller, id, start)?;
        self.beneficiaries.add(caller, replacement, start)?;
        self.apply_writes(writes)?;
        self.burn_position(id);
        self.mint_position(caller, replacement);

        tracing::info!(
            original = %id,
            replacement = %replacement,
            amount = %new_amount,
            lock_up_epochs = new_remaining,
            "Stake increased"
        );
        self.events.push(StakeEvent::StakeIncreased {
            original: id,
            replacement,
            additional_amount,
            additional_epochs,
            amount: new_amount,
            lock_up_epochs: new_remaining,
        });
        Ok(replacement)
    }

    /// Release a matured stake back to its owner. Returns the amount paid out.
    ///
    /// The ledger has already decayed the stake to zero at maturity, so only
    /// the registry, snapshots, and positions change.
    ///
    /// # Errors
    /// Returns `BallastError::Temporal` while the lockup is still running.
    pub fn withdraw_stake(&mut self, caller: &AccountId, id: StakeId) -> Result<Amount, BallastError> {
        let stake = self.authorize(caller, id, true)?;
        let current = self.clock.current_epoch();
        if stake.maturity() > current {
            return Err(BallastError::Temporal(format!(
                "stake {} matures at epoch {}; current epoch is {}",
                id,
                stake.maturity(),
                current
            )));
        }
        let effective = current + 1;
        self.beneficiaries.check_writable(caller, effective)?;

        self.commodity.transfer_out(caller, stake.amount)?;

        self.registry.supersede(id, effective, SupersedeReason::Withdrawn)?;
        self.beneficiaries.remove(caller, id, effective)?;
        self.burn_position(id);

        tracing::info!(stake = %id, owner = %caller, amount = %stake.amount, "Stake withdrawn");
        self.events.push(StakeEvent::StakeWithdrawn {
            id,
            owner: *caller,
            amount: stake.amount,
        });
        Ok(stake.amount)
    }

    /// Redirect stake `id`'s power from `from` to `to` starting next epoch.
    ///
    /// # Errors
    /// `BallastError::Unauthorized` if the caller does not own the stake,
    /// `from` is not its recorded beneficiary, or `from == to`.
    pub fn delegate_stake_power(
        &mut self,
        caller: &AccountId,
        id: StakeId,
        from: &AccountId,
        to: &AccountId,
    ) -> Result<(), BallastError> {
        let stake = self.authorize(caller, id, false)?;
        if from == to {
            return Err(BallastError::Unauthorized(format!(
                "stake {} cannot be delegated from {} to itself",
                id, from
            )));
        }
        if self.beneficiaries.beneficiary_of(id).as_ref() != Some(from) {
            return Err(BallastError::Unauthorized(format!(
                "{} is not the recorded beneficiary of stake {}",
                from, id
            )));
        }

        let start = self.next_epoch();
        let mut writes = LedgerWrites::default();
        writes.shift(
            from,
            to,
            &self.curve.delta_sequence(stake.amount, start, stake.remaining_at(start)),
        );
        self.check_writes(&writes)?;
        self.beneficiaries.check_writable(from, start)?;
        self.beneficiaries.check_writable(to, start)?;

        self.beneficiaries.move_stake(id, from, to, start)?;
        self.apply_writes(writes)?;

        tracing::info!(stake = %id, from = %from, to = %to, effective_epoch = start, "Stake power delegated");
        self.events.push(StakeEvent::StakePowerDelegated {
            id,
            from: *from,
            to: *to,
            effective_epoch: start,
        });
        Ok(())
    }

    /// Transfer hook, called by the position ledger after it moved the
    /// position for `id` from `from` to `to`.
    ///
    /// The stake keeps its id, amount, and maturity; its remaining lockup is
    /// re-based to the next epoch and its power follows the new owner.
    ///
    /// # Errors
    /// - `BallastError::Unauthorized` if the position ledger does not report
    ///   `to` as the owner.
    /// - `BallastError::InvalidState` if the engine does not hold `from` as
    ///   the owner, which is the case when the same transfer is replayed.
    pub fn on_position_transferred(
        &mut self,
        id: StakeId,
        from: &AccountId,
        to: &AccountId,
    ) -> Result<(), BallastError> {
        let stake = self.registry.get_active(id)?.clone();
        if self.positions.owner_of(id).as_ref() != Some(to) {
            return Err(BallastError::Unauthorized(format!(
                "position ledger does not report {} as owner of stake {}",
                to, id
            )));
        }
        if from == to {
            return Err(BallastError::InvalidInput(format!(
                "stake {} transferred to its current owner",
                id
            )));
        }
        if self.holders.get(&id) != Some(from) {
            return Err(BallastError::InvalidState(format!(
                "stake {} is not held by {}; the transfer was already settled",
                id, from
            )));
        }
        let beneficiary = self.beneficiaries.beneficiary_of(id).ok_or_else(|| {
            BallastError::InvariantViolation(format!("active stake {} has no beneficiary", id))
        })?;

        let start = self.next_epoch();
        let remaining = stake.remaining_at(start);
        let mut writes = LedgerWrites::default();
        if beneficiary != *to {
            writes.shift(
                &beneficiary,
                to,
                &self.curve.delta_sequence(stake.amount, start, remaining),
            );
            self.beneficiaries.check_writable(&beneficiary, start)?;
            self.beneficiaries.check_writable(to, start)?;
        }
        self.check_writes(&writes)?;

        if remaining > 0 {
            self.registry.rebase(id, start)?;
        }
        if beneficiary != *to {
            self.beneficiaries.move_stake(id, &beneficiary, to, start)?;
        }
        self.apply_writes(writes)?;
        self.holders.insert(id, *to);

        let rebased = self.registry.get(id)?;
        let (initial_epoch, lock_up_epochs) = (rebased.initial_epoch, rebased.lock_up_epochs);
        tracing::info!(stake = %id, from = %from, to = %to, initial_epoch, lock_up_epochs, "Stake transferred");
        self.events.push(StakeEvent::StakeTransferred {
            id,
            from: *from,
            to: *to,
            initial_epoch,
            lock_up_epochs,
        });
        Ok(())
    }

    /// Move the position for `id` from `caller` to `to`, then run the
    /// transfer hook.
    pub fn transfer_stake(
        &mut self,
        caller: &AccountId,
        id: StakeId,
        to: &AccountId,
    ) -> Result<(), BallastError> {
        self.authorize(caller, id, false)?;
        if caller == to {
            return Err(BallastError::InvalidInput(format!(
                "stake {} transferred to its current owner",
                id
            )));
        }
        self.positions.transfer(id, to)?;
        if let Err(e) = self.on_position_transferred(id, caller, to) {
            self.positions.transfer(id, caller)?;
            return Err(e);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Power queries
    // -----------------------------------------------------------------------

    /// Power credited to `staker` at `epoch`, from the staker's delta ledger.
    pub fn staker_power_at(&self, staker: &AccountId, epoch: Epoch) -> Power {
        self.stakers.get(staker).map_or(0, |ledger| ledger.value_at(epoch))
    }

    /// Power credited to `staker` at `epoch`, rebuilt from the delegation
    /// snapshot at `epoch` and the retained stake records.
    ///
    /// Always equal to `staker_power_at`; kept as an independent audit path.
    pub fn staker_power_from_snapshots(&self, staker: &AccountId, epoch: Epoch) -> Power {
        self.beneficiaries
            .stakes_at(staker, epoch)
            .filter_map(|id| self.registry.get(id).ok())
            .map(|stake| self.curve.power_at(stake.amount, stake.maturity(), epoch))
            .sum()
    }

    /// System-wide power at `epoch`.
    pub fn total_power_at(&self, epoch: Epoch) -> Power {
        self.total.value_at(epoch)
    }

    /// Fold the global ledger up to `epoch` (at most the current epoch).
    ///
    /// # Errors
    /// - `BallastError::Temporal` if already calculated or not yet elapsed.
    /// - `BallastError::InvariantViolation` if the fold finds negative power.
    pub fn calculate_total_power(&mut self, epoch: Epoch) -> Result<Power, BallastError> {
        let current = self.clock.current_epoch();
        let total_power = self.total.advance_rollup(epoch, current)?;
        tracing::info!(epoch, total_power = %total_power, "Total power calculated");
        self.events.push(StakeEvent::TotalPowerCalculated { epoch, total_power });
        Ok(total_power)
    }

    /// Fold `staker`'s ledger up to `epoch` (at most the current epoch).
    ///
    /// # Errors
    /// Same as `calculate_total_power`.
    pub fn calculate_staker_power(&mut self, staker: &AccountId, epoch: Epoch) -> Result<Power, BallastError> {
        let current = self.clock.current_epoch();
        let power = match self.stakers.get_mut(staker) {
            Some(ledger) => ledger.advance_rollup(epoch, current)?,
            None => {
                let mut ledger = EpochDeltaLedger::new();
                let power = ledger.advance_rollup(epoch, current)?;
                self.stakers.insert(*staker, ledger);
                power
            }
        };
        tracing::info!(staker = %staker, epoch, power = %power, "Staker power calculated");
        self.events.push(StakeEvent::StakerPowerCalculated {
            staker: *staker,
            epoch,
            power,
        });
        Ok(power)
    }

    /// Whether the total for `epoch` has been folded.
    pub fn is_total_power_calculated(&self, epoch: Epoch) -> bool {
        self.total.is_finalized(epoch)
    }

    /// Whether `staker`'s power for `epoch` has been folded.
    pub fn is_staker_power_calculated(&self, staker: &AccountId, epoch: Epoch) -> bool {
        self.stakers
            .get(staker)
            .map_or(false, |ledger| ledger.is_finalized(epoch))
    }

    /// Watermark of the global ledger.
    pub fn last_calculated_epoch(&self) -> Epoch {
        self.total.last_finalized_epoch()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn policy(&self) -> &PowerPolicy {
        self.curve.policy()
    }

    pub fn curve(&self) -> &DecayCurve {
        &self.curve
    }

    pub fn current_epoch(&self) -> Epoch {
        self.clock.current_epoch()
    }

    /// Any stake version, including superseded ones.
    pub fn stake(&self, id: StakeId) -> Result<&Stake, BallastError> {
        self.registry.get(id)
    }

    pub fn registry(&self) -> &StakeRegistry {
        &self.registry
    }

    pub fn beneficiary_of(&self, id: StakeId) -> Option<AccountId> {
        self.beneficiaries.beneficiary_of(id)
    }

    pub fn delegations(&self) -> &BeneficiaryDelegationLedger {
        &self.beneficiaries
    }

    /// Accounts that have ever held power, in id order.
    pub fn stakers(&self) -> impl Iterator<Item = &AccountId> + '_ {
        self.stakers.keys()
    }

    pub fn events(&self) -> &[StakeEvent] {
        &self.events
    }

    /// Take all recorded events, leaving the log empty.
    pub fn drain_events(&mut self) -> Vec<StakeEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn commodity(&self) -> &L {
        &self.commodity
    }

    pub fn commodity_mut(&mut self) -> &mut L {
        &mut self.commodity
    }

    pub fn positions(&self) -> &P {
        &self.positions
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn next_epoch(&self) -> Epoch {
        self.clock.current_epoch() + 1
    }

    fn mint_position(&mut self, owner: &AccountId, id: StakeId) {
        self.positions.mint(owner, id);
        self.holders.insert(id, *owner);
    }

    fn burn_position(&mut self, id: StakeId) {
        self.positions.burn(id);
        self.holders.remove(&id);
    }

    fn ensure_allowed_lockup(&self, epochs: Epoch) -> Result<(), BallastError> {
        if !self.policy().is_allowed_lockup(epochs) {
            return Err(BallastError::InvalidInput(format!(
                "lockup of {} epochs is outside {}",
                epochs,
                self.policy().describe_allowed_lockups()
            )));
        }
        Ok(())
    }

    /// Check that `caller` owns the active stake `id` and, when
    /// `must_benefit` is set, is also its recorded beneficiary.
    fn authorize(&self, caller: &AccountId, id: StakeId, must_benefit: bool) -> Result<Stake, BallastError> {
        let stake = self.registry.get_active(id)?;
        if self.positions.owner_of(id).as_ref() != Some(caller) {
            return Err(BallastError::Unauthorized(format!(
                "{} does not own stake {}",
                caller, id
            )));
        }
        if must_benefit && self.beneficiaries.beneficiary_of(id).as_ref() != Some(caller) {
            return Err(BallastError::Unauthorized(format!(
                "{} is not the beneficiary of stake {}",
                caller, id
            )));
        }
        Ok(stake.clone())
    }

    fn check_writes(&self, writes: &LedgerWrites) -> Result<(), BallastError> {
        for (epoch, _) in &writes.total {
            self.total.check_mutable(*epoch)?;
        }
        for (staker, sequence) in &writes.stakers {
            if let Some(ledger) = self.stakers.get(staker) {
                for (epoch, _) in sequence {
                    ledger.check_mutable(*epoch)?;
                }
            }
        }
        Ok(())
    }

    fn apply_writes(&mut self, writes: LedgerWrites) -> Result<(), BallastError> {
        self.total.apply_sequence(&writes.total, false)?;
        for (staker, sequence) in writes.stakers {
            self.stakers
                .entry(staker)
                .or_default()
                .apply_sequence(&sequence, false)?;
        }
        Ok(())
    }
}

impl<C, L, P> PowerSource for PowerEngine<C, L, P>
where
    C: EpochClock,
    L: CommodityLedger,
    P: PositionLedger,
{
    fn staker_power_at(&self, staker: &AccountId, epoch: Epoch) -> Power {
        PowerEngine::staker_power_at(self, staker, epoch)
    }

    fn total_power_at(&self, epoch: Epoch) -> Power {
        PowerEngine::total_power_at(self, epoch)
    }

    fn is_total_power_calculated(&self, epoch: Epoch) -> bool {
        PowerEngine::is_total_power_calculated(self, epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCommodityLedger, InMemoryPositionLedger, ManualEpochClock};

    type TestEngine = PowerEngine<ManualEpochClock, InMemoryCommodityLedger, InMemoryPositionLedger>;

    fn alice() -> AccountId {
        AccountId::repeat(1)
    }

    fn bob() -> AccountId {
        AccountId::repeat(2)
    }

    fn engine_at(epoch: Epoch) -> TestEngine {
        let mut commodity = InMemoryCommodityLedger::new();
        commodity.fund(&alice(), 1_000_000);
        commodity.fund(&bob(), 1_000_000);
        PowerEngine::new(
            PowerPolicy::default(),
            ManualEpochClock::starting_at(epoch),
            commodity,
            InMemoryPositionLedger::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_stake_debits_and_mints() {
        let mut engine = engine_at(4);
        let id = engine.create_stake(&alice(), 1300, 13).unwrap();

        let stake = engine.stake(id).unwrap();
        assert_eq!(stake.initial_epoch, 5);
        assert_eq!(stake.maturity(), 18);
        assert_eq!(engine.commodity().balance_of(&alice()), 1_000_000 - 1300);
        assert_eq!(engine.commodity().custody(), 1300);
        assert_eq!(engine.positions().owner_of(id), Some(alice()));
        assert_eq!(engine.beneficiary_of(id), Some(alice()));
        assert_eq!(engine.events().len(), 1);
    }

    #[test]
    fn test_create_stake_power_window() {
        let mut engine = engine_at(4);
        engine.create_stake(&alice(), 1300, 13).unwrap();
        assert_eq!(engine.staker_power_at(&alice(), 4), 0);
        assert_eq!(engine.staker_power_at(&alice(), 5), 1300);
        assert_eq!(engine.staker_power_at(&alice(), 17), 1300);
        assert_eq!(engine.staker_power_at(&alice(), 18), 0);
        assert_eq!(engine.total_power_at(5), 1300);
    }

    #[test]
    fn test_create_stake_rejects_bad_input_without_mutation() {
        let mut engine = engine_at(1);
        assert!(matches!(
            engine.create_stake(&alice(), 1300, 12),
            Err(BallastError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.create_stake(&alice(), 1300, 66),
            Err(BallastError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.create_stake(&alice(), 1350, 13),
            Err(BallastError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.create_stake(&alice(), 0, 13),
            Err(BallastError::InvalidInput(_))
        ));
        assert!(engine.registry().is_empty());
        assert!(engine.events().is_empty());
        assert_eq!(engine.commodity().custody(), 0);
    }

    #[test]
    fn test_create_stake_off_year_lockup() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1300, 20).unwrap();
        assert_eq!(engine.stake(id).unwrap().maturity(), 22);
        assert_eq!(engine.staker_power_at(&alice(), 2), 1495);
        assert_eq!(engine.staker_power_at(&alice(), 8), 1495);
        assert_eq!(engine.staker_power_at(&alice(), 9), 1300);
        assert_eq!(engine.staker_power_at(&alice(), 21), 1300);
        assert_eq!(engine.staker_power_at(&alice(), 22), 0);
        assert_eq!(engine.staker_power_from_snapshots(&alice(), 8), 1495);
    }

    #[test]
    fn test_create_stake_insufficient_funds_leaves_no_trace() {
        let mut engine = engine_at(1);
        let err = engine.create_stake(&alice(), 2_000_000, 13).unwrap_err();
        assert!(matches!(err, BallastError::Transfer(_)));
        assert!(engine.registry().is_empty());
        assert_eq!(engine.total_power_at(2), 0);
        assert_eq!(engine.stakers().count(), 0);
    }

    #[test]
    fn test_on_behalf_of_credits_beneficiary() {
        let mut engine = engine_at(1);
        let id = engine
            .create_stake_on_behalf_of(&alice(), &bob(), 1000, 26)
            .unwrap();
        assert_eq!(engine.positions().owner_of(id), Some(bob()));
        assert_eq!(engine.staker_power_at(&bob(), 2), 1150);
        assert_eq!(engine.staker_power_at(&alice(), 2), 0);
        assert_eq!(engine.commodity().balance_of(&alice()), 1_000_000 - 1000);
    }

    #[test]
    fn test_split_requires_owner_and_beneficiary() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 13).unwrap();
        assert!(matches!(
            engine.split_stake(&bob(), id, 500),
            Err(BallastError::Unauthorized(_))
        ));
        engine
            .delegate_stake_power(&alice(), id, &alice(), &bob())
            .unwrap();
        assert!(matches!(
            engine.split_stake(&alice(), id, 500),
            Err(BallastError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_split_bounds() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 13).unwrap();
        assert!(engine.split_stake(&alice(), id, 0).is_err());
        assert!(engine.split_stake(&alice(), id, 1000).is_err());
        assert!(engine.split_stake(&alice(), id, 250).is_err());
        let (a, b) = engine.split_stake(&alice(), id, 300).unwrap();
        assert_eq!(engine.stake(a).unwrap().amount, 300);
        assert_eq!(engine.stake(b).unwrap().amount, 700);
        assert!(engine.split_stake(&alice(), id, 300).is_err());
    }

    #[test]
    fn test_superseded_stake_is_immutable() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 13).unwrap();
        engine.split_stake(&alice(), id, 500).unwrap();
        assert!(matches!(
            engine.increase_stake(&alice(), id, 100, 0),
            Err(BallastError::InvalidState(_))
        ));
        assert!(matches!(
            engine.delegate_stake_power(&alice(), id, &alice(), &bob()),
            Err(BallastError::InvalidState(_))
        ));
    }

    #[test]
    fn test_merge_preconditions() {
        let mut engine = engine_at(1);
        let short = engine.create_stake(&alice(), 1000, 13).unwrap();
        let long = engine.create_stake(&alice(), 1000, 26).unwrap();
        assert!(matches!(
            engine.merge_stakes(&alice(), short, long),
            Err(BallastError::InvalidInput(_))
        ));
        assert!(engine.merge_stakes(&alice(), long, long).is_err());

        engine.clock_mut().advance(13);
        // `short` has matured at 15; `long` matures at 28.
        let merged = engine.merge_stakes(&alice(), long, short).unwrap();
        assert_eq!(engine.stake(merged).unwrap().maturity(), 28);
        assert_eq!(engine.stake(merged).unwrap().amount, 2000);
    }

    #[test]
    fn test_merge_rejects_matured_first() {
        let mut engine = engine_at(1);
        let a = engine.create_stake(&alice(), 1000, 13).unwrap();
        let b = engine.create_stake(&alice(), 1000, 13).unwrap();
        engine.clock_mut().advance(14);
        assert!(matches!(
            engine.merge_stakes(&alice(), a, b),
            Err(BallastError::Temporal(_))
        ));
    }

    #[test]
    fn test_increase_amount_only() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 26).unwrap();
        let replacement = engine.increase_stake(&alice(), id, 500, 0).unwrap();

        assert_eq!(engine.stake(replacement).unwrap().amount, 1500);
        assert_eq!(engine.staker_power_at(&alice(), 2), 1725);
        assert_eq!(engine.staker_power_at(&alice(), 15), 1500);
        assert_eq!(engine.staker_power_at(&alice(), 28), 0);
        assert_eq!(engine.commodity().custody(), 1500);
    }

    #[test]
    fn test_increase_amount_off_year_remaining() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 26).unwrap();
        engine.clock_mut().advance(5);
        // From epoch 7 the stake has 21 epochs left.
        let replacement = engine.increase_stake(&alice(), id, 100, 0).unwrap();
        let stake = engine.stake(replacement).unwrap();
        assert_eq!(stake.initial_epoch, 7);
        assert_eq!(stake.lock_up_epochs, 21);
        assert_eq!(stake.amount, 1100);
        assert_eq!(engine.staker_power_at(&alice(), 6), 1150);
        assert_eq!(engine.staker_power_at(&alice(), 7), 1265);
        assert_eq!(engine.staker_power_at(&alice(), 15), 1100);
        assert_eq!(engine.staker_power_at(&alice(), 28), 0);
        assert_eq!(engine.staker_power_from_snapshots(&alice(), 7), 1265);
    }

    #[test]
    fn test_increase_duration() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 13).unwrap();
        engine.clock_mut().advance(12);
        // From epoch 14 the stake has 1 epoch left; adding 12 lands on 13.
        let replacement = engine.increase_stake(&alice(), id, 0, 12).unwrap();
        let stake = engine.stake(replacement).unwrap();
        assert_eq!(stake.initial_epoch, 14);
        assert_eq!(stake.maturity(), 27);
        assert_eq!(engine.staker_power_at(&alice(), 13), 1000);
        assert_eq!(engine.staker_power_at(&alice(), 26), 1000);
        assert_eq!(engine.staker_power_at(&alice(), 27), 0);
        assert_eq!(engine.staker_power_from_snapshots(&alice(), 20), 1000);
    }

    #[test]
    fn test_increase_rejects_disallowed_lockup() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 13).unwrap();
        assert!(matches!(
            engine.increase_stake(&alice(), id, 0, 0),
            Err(BallastError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.increase_stake(&alice(), id, 0, 53),
            Err(BallastError::InvalidInput(_))
        ));
        engine.clock_mut().advance(3);
        // 10 epochs left is below one year.
        assert!(engine.increase_stake(&alice(), id, 100, 0).is_err());
    }

    #[test]
    fn test_withdraw_after_maturity() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 13).unwrap();
        engine.clock_mut().advance(13);
        assert!(matches!(
            engine.withdraw_stake(&alice(), id),
            Err(BallastError::Temporal(_))
        ));
        engine.clock_mut().advance(1);
        assert_eq!(engine.withdraw_stake(&alice(), id).unwrap(), 1000);
        assert_eq!(engine.commodity().balance_of(&alice()), 1_000_000);
        assert_eq!(engine.positions().owner_of(id), None);
        assert!(engine.withdraw_stake(&alice(), id).is_err());
    }

    #[test]
    fn test_self_delegation_rejected() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 13).unwrap();
        assert!(matches!(
            engine.delegate_stake_power(&alice(), id, &alice(), &alice()),
            Err(BallastError::Unauthorized(_))
        ));
        assert!(matches!(
            engine.delegate_stake_power(&alice(), id, &bob(), &alice()),
            Err(BallastError::Unauthorized(_))
        ));
        assert!(matches!(
            engine.delegate_stake_power(&bob(), id, &alice(), &bob()),
            Err(BallastError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_transfer_rebases_and_moves_power() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 26).unwrap();
        engine.clock_mut().advance(5);
        engine.transfer_stake(&alice(), id, &bob()).unwrap();

        let stake = engine.stake(id).unwrap();
        assert_eq!(stake.initial_epoch, 7);
        assert_eq!(stake.maturity(), 28);
        assert_eq!(engine.positions().owner_of(id), Some(bob()));
        assert_eq!(engine.staker_power_at(&alice(), 6), 1150);
        assert_eq!(engine.staker_power_at(&alice(), 7), 0);
        assert_eq!(engine.staker_power_at(&bob(), 7), 1150);
        assert_eq!(engine.staker_power_at(&bob(), 15), 1000);
        assert_eq!(engine.staker_power_from_snapshots(&bob(), 15), 1000);
        assert_eq!(engine.staker_power_from_snapshots(&alice(), 6), 1150);
    }

    #[test]
    fn test_transfer_hook_requires_ledger_owner() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 13).unwrap();
        assert!(matches!(
            engine.on_position_transferred(id, &alice(), &bob()),
            Err(BallastError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_transfer_hook_settles_once() {
        let mut engine = engine_at(1);
        let id = engine.create_stake(&alice(), 1000, 26).unwrap();
        engine.clock_mut().advance(5);
        engine.transfer_stake(&alice(), id, &bob()).unwrap();
        let events = engine.events().len();

        engine.clock_mut().advance(3);
        assert!(matches!(
            engine.on_position_transferred(id, &alice(), &bob()),
            Err(BallastError::InvalidState(_))
        ));
        assert_eq!(engine.events().len(), events);
        assert_eq!(engine.stake(id).unwrap().initial_epoch, 7);
        assert_eq!(engine.staker_power_at(&bob(), 7), 1150);
    }

    #[test]
    fn test_calculate_total_power_emits_event() {
        let mut engine = engine_at(1);
        engine.create_stake(&alice(), 1300, 13).unwrap();
        engine.clock_mut().advance(2);
        assert_eq!(engine.calculate_total_power(2).unwrap(), 1300);
        assert!(engine.is_total_power_calculated(2));
        assert!(matches!(
            engine.calculate_total_power(2),
            Err(BallastError::Temporal(_))
        ));
        assert!(matches!(
            engine.calculate_total_power(4),
            Err(BallastError::Temporal(_))
        ));
        assert_eq!(
            engine.events().last(),
            Some(&StakeEvent::TotalPowerCalculated {
                epoch: 2,
                total_power: 1300
            })
        );
    }

    #[test]
    fn test_calculate_staker_power_for_unknown_staker() {
        let mut engine = engine_at(3);
        assert_eq!(engine.calculate_staker_power(&bob(), 2).unwrap(), 0);
        assert!(engine.is_staker_power_calculated(&bob(), 2));
        assert!(engine.calculate_staker_power(&alice(), 9).is_err());
        assert!(!engine.is_staker_power_calculated(&alice(), 1));
    }

    #[test]
    fn test_drain_events() {
        let mut engine = engine_at(1);
        engine.create_stake(&alice(), 1000, 13).unwrap();
        let drained = engine.drain_events();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].name(), "stake-created");
        assert!(engine.events().is_empty());
    }
}
