// crates/ballast-core/src/policy.rs
//
// Decay policy: the "year" unit, the per-year multiplier brackets, the single
// long-lock duration beyond the bracket table, and the amount quantization.
//
// Defaults (13 epochs per year):
//   ≤1y 100%, ≤2y 115%, ≤3y 130%, ≤4y 150%, ≤5y 175%, 10y 350%
//
// Amounts must be multiples of the rounding unit, and the unit must make
// every `amount * multiplier / 100` exact. That keeps power linear in amount
// and every decay sequence zero-sum under truncating division.

use serde::{Deserialize, Deserializer};

use crate::error::BallastError;
use crate::types::{Amount, Epoch};

/// Policy constants for the decay curve and stake validation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PowerPolicy {
    /// Number of epochs in one "year".
    #[serde(default = "default_epochs_per_year")]
    pub epochs_per_year: Epoch,

    /// Multiplier (percent) for remaining lockup ≤ 1 year, ≤ 2 years, ...
    #[serde(default = "default_year_multipliers")]
    pub year_multipliers: Vec<u32>,

    /// The only lockup (in years) allowed beyond the bracket table.
    #[serde(default = "default_long_lock_years")]
    pub long_lock_years: u64,

    /// Multiplier (percent) for remaining lockup beyond the bracket table.
    #[serde(default = "default_long_lock_multiplier")]
    pub long_lock_multiplier: u32,

    /// Amounts must be a positive multiple of this unit.
    #[serde(default = "default_rounding_unit", deserialize_with = "amount_from_u64")]
    pub rounding_unit: Amount,

    /// Largest amount a single stake may carry.
    #[serde(default = "default_max_amount", deserialize_with = "amount_from_u64")]
    pub max_amount: Amount,
}

fn default_epochs_per_year() -> Epoch {
    13
}

fn default_year_multipliers() -> Vec<u32> {
    vec![100, 115, 130, 150, 175]
}

fn default_long_lock_years() -> u64 {
    10
}

fn default_long_lock_multiplier() -> u32 {
    350
}

fn default_rounding_unit() -> Amount {
    100
}

fn default_max_amount() -> Amount {
    (1u128 << 96) - 1
}

/// Config formats such as TOML top out at 64-bit integers.
fn amount_from_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    u64::deserialize(deserializer).map(Amount::from)
}

impl Default for PowerPolicy {
    fn default() -> Self {
        Self {
            epochs_per_year: default_epochs_per_year(),
            year_multipliers: default_year_multipliers(),
            long_lock_years: default_long_lock_years(),
            long_lock_multiplier: default_long_lock_multiplier(),
            rounding_unit: default_rounding_unit(),
            max_amount: default_max_amount(),
        }
    }
}

impl PowerPolicy {
    /// Check internal consistency of the policy.
    ///
    /// # Errors
    /// Returns `BallastError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<(), BallastError> {
        if self.epochs_per_year == 0 {
            return Err(BallastError::Config(
                "epochs_per_year must be positive".to_string(),
            ));
        }
        if self.year_multipliers.is_empty() {
            return Err(BallastError::Config(
                "year_multipliers must not be empty".to_string(),
            ));
        }
        if self.year_multipliers[0] == 0
            || self.year_multipliers.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(BallastError::Config(format!(
                "year_multipliers must be positive and strictly increasing: {:?}",
                self.year_multipliers
            )));
        }
        if self.long_lock_years <= self.year_multipliers.len() as u64 {
            return Err(BallastError::Config(format!(
                "long_lock_years ({}) must exceed the bracket table ({} years)",
                self.long_lock_years,
                self.year_multipliers.len()
            )));
        }
        let last = self.year_multipliers[self.year_multipliers.len() - 1];
        if self.long_lock_multiplier <= last {
            return Err(BallastError::Config(format!(
                "long_lock_multiplier ({}) must exceed the last bracket ({})",
                self.long_lock_multiplier, last
            )));
        }
        if self.rounding_unit == 0 {
            return Err(BallastError::Config(
                "rounding_unit must be positive".to_string(),
            ));
        }
        let inexact = self
            .year_multipliers
            .iter()
            .chain(std::iter::once(&self.long_lock_multiplier))
            .find(|&&m| {
                self.rounding_unit
                    .checked_mul(m as Amount)
                    .map_or(true, |scaled| scaled % 100 != 0)
            });
        if let Some(m) = inexact {
            return Err(BallastError::Config(format!(
                "rounding_unit {} does not divide evenly under multiplier {}%",
                self.rounding_unit, m
            )));
        }
        if self.max_amount < self.rounding_unit {
            return Err(BallastError::Config(format!(
                "max_amount {} is below rounding_unit {}",
                self.max_amount, self.rounding_unit
            )));
        }
        let headroom = (i128::MAX as Amount) / self.long_lock_multiplier as Amount;
        if self.max_amount > headroom {
            return Err(BallastError::Config(format!(
                "max_amount {} would overflow power at {}%",
                self.max_amount, self.long_lock_multiplier
            )));
        }
        self.long_lock_epochs()?;
        Ok(())
    }

    /// Epoch count of the last bracket boundary (the 5-year mark by default).
    pub fn max_bracket_epochs(&self) -> Epoch {
        self.epochs_per_year * self.year_multipliers.len() as Epoch
    }

    /// Epoch count of the long lock (10 years by default).
    pub fn long_lock_epochs(&self) -> Result<Epoch, BallastError> {
        self.epochs_per_year
            .checked_mul(self.long_lock_years)
            .ok_or_else(|| BallastError::Config("long lock duration overflows".to_string()))
    }

    /// Human-readable form of the allowed lockup durations, for error messages.
    pub fn describe_allowed_lockups(&self) -> String {
        match self.long_lock_epochs() {
            Ok(long) => format!(
                "{}..={} or {} epochs",
                self.epochs_per_year,
                self.max_bracket_epochs(),
                long
            ),
            Err(_) => format!("{}..={} epochs", self.epochs_per_year, self.max_bracket_epochs()),
        }
    }

    /// Whether `epochs` is an allowed lockup: anywhere from one year to the
    /// end of the bracket table, or exactly the long lock.
    pub fn is_allowed_lockup(&self, epochs: Epoch) -> bool {
        (self.epochs_per_year..=self.max_bracket_epochs()).contains(&epochs)
            || self.long_lock_epochs().map_or(false, |long| epochs == long)
    }

    /// Validate a stake amount: positive, a multiple of the unit, in range.
    ///
    /// # Errors
    /// Returns `BallastError::InvalidInput` naming the violated bound.
    pub fn validate_amount(&self, amount: Amount) -> Result<(), BallastError> {
        if amount == 0 {
            return Err(BallastError::InvalidInput(
                "amount must be positive".to_string(),
            ));
        }
        if amount % self.rounding_unit != 0 {
            return Err(BallastError::InvalidInput(format!(
                "amount {} is not a multiple of the rounding unit {}",
                amount, self.rounding_unit
            )));
        }
        if amount > self.max_amount {
            return Err(BallastError::InvalidInput(format!(
                "amount {} exceeds the maximum {}",
                amount, self.max_amount
            )));
        }
        Ok(())
    }
}
