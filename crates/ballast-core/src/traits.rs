// crates/ballast-core/src/traits.rs

use crate::error::BallastError;
use crate::types::{AccountId, Amount, Epoch, Power, StakeId};

/// Source of the current epoch.
///
/// Implementations must be monotonic non-decreasing.
pub trait EpochClock {
    /// The epoch the system is currently in.
    fn current_epoch(&self) -> Epoch;
}

/// Ledger of the locked commodity.
///
/// Both transfers either fully succeed or leave balances untouched.
pub trait CommodityLedger {
    /// Move `amount` from `from` into custody of the staking system.
    fn transfer_in(&mut self, from: &AccountId, amount: Amount) -> Result<(), BallastError>;

    /// Release `amount` from custody to `to`.
    fn transfer_out(&mut self, to: &AccountId, amount: Amount) -> Result<(), BallastError>;
}

/// Ledger of stake ownership positions.
///
/// The engine validates ownership before calling `mint` or `burn`, so these
/// are infallible.
pub trait PositionLedger {
    /// Record `owner` as the holder of a new position for `id`.
    fn mint(&mut self, owner: &AccountId, id: StakeId);

    /// Remove the position for `id`.
    fn burn(&mut self, id: StakeId);

    /// Current owner of the position for `id`, if it exists.
    fn owner_of(&self, id: StakeId) -> Option<AccountId>;

    /// Move the position for `id` to `to`.
    ///
    /// The engine's transfer hook must be invoked afterwards.
    fn transfer(&mut self, id: StakeId, to: &AccountId) -> Result<(), BallastError>;
}

/// Read access to power, as consumed by governance and revenue distribution.
pub trait PowerSource {
    /// Power attributed to `staker` at `epoch`.
    fn staker_power_at(&self, staker: &AccountId, epoch: Epoch) -> Power;

    /// System-wide power at `epoch`.
    fn total_power_at(&self, epoch: Epoch) -> Power;

    /// Whether the system total for `epoch` has been folded behind the watermark.
    fn is_total_power_calculated(&self, epoch: Epoch) -> bool;
}
