// crates/ballast-power/src/decay.rs
//
// Table-driven decay of power as a stake's remaining lockup shrinks.
//
// Power for a remaining lockup `r` is `amount * multiplier(r) / 100`, where the
// multiplier is chosen by year bracket (ceil(r / year)) up to the bracket
// table's end, and the long-lock multiplier beyond it. Power is constant
// inside a bracket and drops at every bracket boundary, so a stake's power
// over time is a step function that can be stored as a handful of signed
// deltas instead of one value per epoch.
//
// Boundaries are measured from maturity, never from the start epoch. A
// stake's remaining sequence from any epoch therefore steps on the same
// epochs as its full sequence, which is what lets lifecycle operations unwind
// a suffix and replace it.

use ballast_core::error::BallastError;
use ballast_core::policy::PowerPolicy;
use ballast_core::types::{Amount, Epoch, Power};

/// The decay curve for a validated policy.
#[derive(Debug, Clone)]
pub struct DecayCurve {
    policy: PowerPolicy,
}

impl DecayCurve {
    /// Build a curve, validating the policy first.
    ///
    /// # Errors
    /// Returns `BallastError::Config` if the policy is inconsistent.
    pub fn new(policy: PowerPolicy) -> Result<Self, BallastError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    /// The policy this curve was built from.
    pub fn policy(&self) -> &PowerPolicy {
        &self.policy
    }

    /// Multiplier (percent) for a remaining lockup; 0 once the lockup is over.
    pub fn multiplier(&self, remaining: Epoch) -> u32 {
        if remaining == 0 {
            return 0;
        }
        if remaining > self.policy.max_bracket_epochs() {
            return self.policy.long_lock_multiplier;
        }
        let year = self.policy.epochs_per_year;
        let bracket = (remaining + year - 1) / year;
        self.policy.year_multipliers[(bracket - 1) as usize]
    }

    /// Power granted by `amount` with `remaining` epochs of lockup left.
    ///
    /// Truncating division. Callers pass amounts already validated against
    /// the policy, which bounds the product well inside `i128`.
    pub fn power(&self, amount: Amount, remaining: Epoch) -> Power {
        (amount * self.multiplier(remaining) as Amount / 100) as Power
    }

    /// Power at `epoch` of a stake maturing at `maturity`.
    ///
    /// Does not know when the stake started; callers restrict the epochs
    /// they ask about to the stake's active window.
    pub fn power_at(&self, amount: Amount, maturity: Epoch, epoch: Epoch) -> Power {
        if epoch >= maturity {
            0
        } else {
            self.power(amount, maturity - epoch)
        }
    }

    /// Epochs until the multiplier next drops.
    ///
    /// Distance to the next year boundary below `remaining`, or to the end of
    /// the bracket table when the remaining lockup is beyond it.
    pub fn epochs_until_next_step(&self, remaining: Epoch) -> Epoch {
        if remaining == 0 {
            return 0;
        }
        let max_bracket = self.policy.max_bracket_epochs();
        if remaining > max_bracket {
            return remaining - max_bracket;
        }
        (remaining - 1) % self.policy.epochs_per_year + 1
    }

    /// Size of the next multiplier drop, in percent.
    pub fn decay_step_percent(&self, remaining: Epoch) -> u32 {
        let next = remaining - self.epochs_until_next_step(remaining);
        self.multiplier(remaining) - self.multiplier(next)
    }

    /// Size of the next power drop for `amount`.
    pub fn decay_step(&self, amount: Amount, remaining: Epoch) -> Power {
        let next = remaining - self.epochs_until_next_step(remaining);
        self.power(amount, remaining) - self.power(amount, next)
    }

    /// Signed deltas for a stake contributing from `start_epoch` with
    /// `remaining` epochs of lockup left.
    ///
    /// The first entry adds the full power at `start_epoch`; every further
    /// entry is a drop at a bracket boundary, the last one landing on
    /// `start_epoch + remaining`. The entries always sum to zero.
    pub fn delta_sequence(
        &self,
        amount: Amount,
        start_epoch: Epoch,
        remaining: Epoch,
    ) -> Vec<(Epoch, Power)> {
        let initial = self.power(amount, remaining);
        if initial == 0 {
            return Vec::new();
        }

        let mut sequence = vec![(start_epoch, initial)];
        let mut epoch = start_epoch;
        let mut left = remaining;
        while left > 0 {
            let step = self.epochs_until_next_step(left);
            let drop = self.decay_step(amount, left);
            epoch += step;
            left -= step;
            if drop != 0 {
                sequence.push((epoch, -drop));
            }
        }
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> DecayCurve {
        DecayCurve::new(PowerPolicy::default()).unwrap()
    }

    #[test]
    fn test_multiplier_brackets() {
        let c = curve();
        assert_eq!(c.multiplier(0), 0);
        assert_eq!(c.multiplier(1), 100);
        assert_eq!(c.multiplier(13), 100);
        assert_eq!(c.multiplier(14), 115);
        assert_eq!(c.multiplier(26), 115);
        assert_eq!(c.multiplier(39), 130);
        assert_eq!(c.multiplier(52), 150);
        assert_eq!(c.multiplier(65), 175);
        assert_eq!(c.multiplier(66), 350);
        assert_eq!(c.multiplier(130), 350);
    }

    #[test]
    fn test_power_truncates() {
        let c = curve();
        assert_eq!(c.power(1300, 13), 1300);
        assert_eq!(c.power(1300, 26), 1495);
        assert_eq!(c.power(1300, 130), 4550);
        // Unquantized amounts still truncate rather than round.
        assert_eq!(c.power(7, 14), 8);
    }

    #[test]
    fn test_epochs_until_next_step() {
        let c = curve();
        assert_eq!(c.epochs_until_next_step(0), 0);
        assert_eq!(c.epochs_until_next_step(1), 1);
        assert_eq!(c.epochs_until_next_step(13), 13);
        assert_eq!(c.epochs_until_next_step(14), 1);
        assert_eq!(c.epochs_until_next_step(20), 7);
        assert_eq!(c.epochs_until_next_step(65), 13);
        assert_eq!(c.epochs_until_next_step(130), 65);
    }

    #[test]
    fn test_decay_step_percentages() {
        let c = curve();
        let steps: Vec<u32> = [130, 65, 52, 39, 26, 13]
            .iter()
            .map(|&r| c.decay_step_percent(r))
            .collect();
        assert_eq!(steps, vec![175, 25, 20, 15, 15, 100]);
    }

    #[test]
    fn test_one_year_sequence() {
        let c = curve();
        assert_eq!(c.delta_sequence(1300, 5, 13), vec![(5, 1300), (18, -1300)]);
    }

    #[test]
    fn test_ten_year_sequence_steps() {
        let c = curve();
        let seq = c.delta_sequence(100, 1, 130);
        assert_eq!(
            seq,
            vec![
                (1, 350),
                (66, -175),
                (79, -25),
                (92, -20),
                (105, -15),
                (118, -15),
                (131, -100),
            ]
        );
    }

    #[test]
    fn test_partial_sequence_steps_on_same_epochs() {
        let c = curve();
        // A 2-year stake starting at 1 matures at 27; from epoch 10 on,
        // 17 epochs remain and the boundary is still epoch 14.
        let full = c.delta_sequence(1000, 1, 26);
        let suffix = c.delta_sequence(1000, 10, 17);
        assert_eq!(full[1].0, 14);
        assert_eq!(suffix[1].0, 14);
        assert_eq!(suffix.last().unwrap().0, 27);
    }

    #[test]
    fn test_every_sequence_sums_to_zero() {
        let c = curve();
        for amount in [100u128, 1300, 4_200, 987_600, 1_000_000_000_000] {
            for remaining in 1..=130 {
                let sum: Power = c
                    .delta_sequence(amount, 3, remaining)
                    .iter()
                    .map(|(_, v)| v)
                    .sum();
                assert_eq!(sum, 0, "amount {} remaining {}", amount, remaining);
            }
        }
    }

    #[test]
    fn test_power_is_linear_in_quantized_amounts() {
        let c = curve();
        for remaining in [1, 14, 30, 45, 60, 130] {
            assert_eq!(
                c.power(700, remaining) + c.power(600, remaining),
                c.power(1300, remaining)
            );
        }
    }

    #[test]
    fn test_empty_sequence_for_zero_inputs() {
        let c = curve();
        assert!(c.delta_sequence(0, 1, 13).is_empty());
        assert!(c.delta_sequence(1300, 1, 0).is_empty());
    }

    #[test]
    fn test_power_at_maturity_is_zero() {
        let c = curve();
        assert_eq!(c.power_at(1300, 20, 19), 1300);
        assert_eq!(c.power_at(1300, 20, 20), 0);
        assert_eq!(c.power_at(1300, 20, 25), 0);
    }
}
