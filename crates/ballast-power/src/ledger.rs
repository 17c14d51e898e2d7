// crates/ballast-power/src/ledger.rs
//
// Epoch-indexed signed-delta store with a lazily advanced rollup watermark.
//
// Every entry is a *change* in power at an epoch. Epochs at or below the
// watermark (`last_finalized_epoch`) have been folded into absolute
// checkpoints and are read directly; epochs above it are answered by summing
// the pending deltas between the watermark and the query epoch.
//
// Both stores are sorted vectors with binary-search insert/remove, keyed only
// by epochs that actually carry a change, so a staker with three stakes holds
// a few dozen entries regardless of how many epochs they span.
//
// Folding is pulled by callers, never pushed: `advance_rollup` accepts any
// target between the watermark and the current epoch, so a long backlog can
// be worked off over several calls.

use ballast_core::error::BallastError;
use ballast_core::types::{Epoch, Power};

/// Signed-delta ledger for one power series (the system total or one staker).
#[derive(Debug, Clone, Default)]
pub struct EpochDeltaLedger {
    /// Pending deltas above the watermark, sorted by epoch, no zero values.
    pending: Vec<(Epoch, Power)>,
    /// Folded absolute values at epochs where the value changed, sorted.
    checkpoints: Vec<(Epoch, Power)>,
    /// Last epoch folded into `checkpoints`.
    last_finalized_epoch: Epoch,
    /// Absolute value at `last_finalized_epoch`.
    finalized_value: Power,
}

impl EpochDeltaLedger {
    /// Create an empty ledger with the watermark at epoch 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The rollup watermark.
    pub fn last_finalized_epoch(&self) -> Epoch {
        self.last_finalized_epoch
    }

    /// Whether `epoch` has been folded into an absolute value.
    pub fn is_finalized(&self, epoch: Epoch) -> bool {
        epoch <= self.last_finalized_epoch
    }

    /// Epochs carrying a non-zero pending delta, ascending and duplicate-free.
    pub fn pending_epochs(&self) -> impl Iterator<Item = Epoch> + '_ {
        self.pending.iter().map(|(epoch, _)| *epoch)
    }

    /// Reject writes at or below the watermark.
    ///
    /// # Errors
    /// Returns `BallastError::Temporal` if `epoch` has already been folded.
    pub fn check_mutable(&self, epoch: Epoch) -> Result<(), BallastError> {
        if epoch <= self.last_finalized_epoch {
            return Err(BallastError::Temporal(format!(
                "epoch {} is already finalized (watermark {})",
                epoch, self.last_finalized_epoch
            )));
        }
        Ok(())
    }

    /// Add `value` to the change recorded at `epoch`. Zero is a no-op.
    ///
    /// # Errors
    /// Returns `BallastError::Temporal` if `epoch` has already been folded.
    pub fn apply_delta(&mut self, epoch: Epoch, value: Power) -> Result<(), BallastError> {
        self.check_mutable(epoch)?;
        if value == 0 {
            return Ok(());
        }
        match self.pending.binary_search_by_key(&epoch, |(e, _)| *e) {
            Ok(idx) => {
                self.pending[idx].1 += value;
                if self.pending[idx].1 == 0 {
                    self.pending.remove(idx);
                }
            }
            Err(idx) => self.pending.insert(idx, (epoch, value)),
        }
        Ok(())
    }

    /// Apply a whole delta sequence, negated when `negate` is set.
    ///
    /// Every epoch is checked before any entry is written, so a rejected
    /// sequence leaves the ledger untouched.
    ///
    /// # Errors
    /// Returns `BallastError::Temporal` if any epoch has already been folded.
    pub fn apply_sequence(
        &mut self,
        sequence: &[(Epoch, Power)],
        negate: bool,
    ) -> Result<(), BallastError> {
        for (epoch, _) in sequence {
            self.check_mutable(*epoch)?;
        }
        for &(epoch, value) in sequence {
            let value = if negate { -value } else { value };
            self.apply_delta(epoch, value)?;
        }
        Ok(())
    }

    /// Absolute value at `epoch`. Read-only.
    ///
    /// Folded epochs are a binary search over checkpoints. Unfolded epochs
    /// cost one pass over the pending deltas up to `epoch`.
    pub fn value_at(&self, epoch: Epoch) -> Power {
        if epoch <= self.last_finalized_epoch {
            let idx = self.checkpoints.partition_point(|(e, _)| *e <= epoch);
            return if idx == 0 { 0 } else { self.checkpoints[idx - 1].1 };
        }
        let end = self.pending.partition_point(|(e, _)| *e <= epoch);
        self.finalized_value + self.pending[..end].iter().map(|(_, v)| v).sum::<Power>()
    }

    /// Fold pending deltas up to and including `target` into absolutes.
    ///
    /// Returns the absolute value at `target`.
    ///
    /// # Errors
    /// - `BallastError::Temporal` if `target` is at or below the watermark
    ///   (already calculated) or above `current_epoch` (not yet elapsed).
    /// - `BallastError::InvariantViolation` if any folded value would be
    ///   negative. The ledger is left untouched.
    pub fn advance_rollup(
        &mut self,
        target: Epoch,
        current_epoch: Epoch,
    ) -> Result<Power, BallastError> {
        if target <= self.last_finalized_epoch {
            return Err(BallastError::Temporal(format!(
                "epoch {} already calculated (watermark {})",
                target, self.last_finalized_epoch
            )));
        }
        if target > current_epoch {
            return Err(BallastError::Temporal(format!(
                "epoch {} has not elapsed (current epoch {})",
                target, current_epoch
            )));
        }

        let end = self.pending.partition_point(|(e, _)| *e <= target);
        let mut running = self.finalized_value;
        let mut folded = Vec::with_capacity(end);
        for &(epoch, delta) in &self.pending[..end] {
            running += delta;
            if running < 0 {
                tracing::warn!(epoch, value = %running, "Rejected fold: negative power");
                return Err(BallastError::InvariantViolation(format!(
                    "power would be negative ({}) at epoch {}",
                    running, epoch
                )));
            }
            folded.push((epoch, running));
        }

        self.pending.drain(..end);
        self.checkpoints.extend(folded);
        self.finalized_value = running;
        self.last_finalized_epoch = target;
        tracing::debug!(
            watermark = target,
            folded = end,
            value = %running,
            "Advanced rollup watermark"
        );
        Ok(running)
    }
}
