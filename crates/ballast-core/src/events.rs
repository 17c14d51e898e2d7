// crates/ballast-core/src/events.rs
//
// Domain events emitted by the power engine.
//
// One event per successful lifecycle call or rollup advance. Consumers
// (indexers, the CLI) read them from the engine's event log.

use serde::Serialize;

use crate::types::{AccountId, Amount, Epoch, Power, StakeId};

/// Events recorded after a call has fully committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StakeEvent {
    /// A new stake was locked.
    StakeCreated {
        id: StakeId,
        /// Account that paid for the stake.
        funder: AccountId,
        /// Account that owns the position and benefits from its power.
        beneficiary: AccountId,
        amount: Amount,
        initial_epoch: Epoch,
        lock_up_epochs: Epoch,
    },
    /// A stake was split in two; the original is superseded.
    StakeSplit {
        original: StakeId,
        first: StakeId,
        second: StakeId,
        first_amount: Amount,
        second_amount: Amount,
    },
    /// Two stakes were merged into a new one.
    StakeMerged {
        first: StakeId,
        second: StakeId,
        merged: StakeId,
        amount: Amount,
        initial_epoch: Epoch,
        lock_up_epochs: Epoch,
    },
    /// A stake was topped up and/or extended into a new version.
    StakeIncreased {
        original: StakeId,
        replacement: StakeId,
        additional_amount: Amount,
        additional_epochs: Epoch,
        amount: Amount,
        lock_up_epochs: Epoch,
    },
    /// A matured stake was released back to its owner.
    StakeWithdrawn {
        id: StakeId,
        owner: AccountId,
        amount: Amount,
    },
    /// A stake's power was redirected to another beneficiary.
    StakePowerDelegated {
        id: StakeId,
        from: AccountId,
        to: AccountId,
        effective_epoch: Epoch,
    },
    /// A stake position changed owner and its lockup was re-based.
    StakeTransferred {
        id: StakeId,
        from: AccountId,
        to: AccountId,
        initial_epoch: Epoch,
        lock_up_epochs: Epoch,
    },
    /// The global power ledger was folded up to `epoch`.
    TotalPowerCalculated { epoch: Epoch, total_power: Power },
    /// A staker's power ledger was folded up to `epoch`.
    StakerPowerCalculated {
        staker: AccountId,
        epoch: Epoch,
        power: Power,
    },
}

impl StakeEvent {
    /// Short event name, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            StakeEvent::StakeCreated { .. } => "stake-created",
            StakeEvent::StakeSplit { .. } => "stake-split",
            StakeEvent::StakeMerged { .. } => "stake-merged",
            StakeEvent::StakeIncreased { .. } => "stake-increased",
            StakeEvent::StakeWithdrawn { .. } => "stake-withdrawn",
            StakeEvent::StakePowerDelegated { .. } => "stake-power-delegated",
            StakeEvent::StakeTransferred { .. } => "stake-transferred",
            StakeEvent::TotalPowerCalculated { .. } => "total-power-calculated",
            StakeEvent::StakerPowerCalculated { .. } => "staker-power-calculated",
        }
    }
}
