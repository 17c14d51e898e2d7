// crates/ballast-cli/src/commands/curve.rs
//
// `ballast curve`: print the power of a single stake over its lockup.
//
// The stake is treated as created in epoch 0, so it contributes from epoch 1
// and matures at epoch `1 + lock_up_epochs`.

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use ballast_core::{Amount, BallastError, Epoch, Power, PowerPolicy};
use ballast_power::DecayCurve;

use crate::output::{format_json, format_table, OutputFormat};

/// Arguments for the curve subcommand.
#[derive(Debug, Args)]
pub struct CurveCmd {
    /// Stake amount, a multiple of the rounding unit.
    #[arg(long)]
    pub amount: Amount,

    /// Lockup length in epochs.
    #[arg(long = "lockup-epochs")]
    pub lock_up_epochs: Epoch,

    /// Only print epochs where power changes.
    #[arg(long)]
    pub steps_only: bool,

    /// Emit JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// One epoch of the curve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct CurveRow {
    #[tabled(rename = "Epoch")]
    pub epoch: Epoch,
    #[tabled(rename = "Remaining")]
    pub remaining: Epoch,
    #[tabled(rename = "Multiplier %")]
    pub multiplier: u32,
    #[tabled(rename = "Power")]
    pub power: Power,
}

/// Compute the curve rows for `amount` locked for `lock_up_epochs`.
pub fn curve_rows(
    policy: PowerPolicy,
    amount: Amount,
    lock_up_epochs: Epoch,
    steps_only: bool,
) -> Result<Vec<CurveRow>, BallastError> {
    policy.validate_amount(amount)?;
    if !policy.is_allowed_lockup(lock_up_epochs) {
        return Err(BallastError::InvalidInput(format!(
            "lockup of {} epochs is outside {}",
            lock_up_epochs,
            policy.describe_allowed_lockups()
        )));
    }
    let curve = DecayCurve::new(policy)?;
    let maturity = 1 + lock_up_epochs;

    let mut rows = Vec::new();
    let mut last = None;
    for epoch in 1..=maturity {
        let remaining = maturity - epoch;
        let power = curve.power(amount, remaining);
        if steps_only && last == Some(power) {
            continue;
        }
        last = Some(power);
        rows.push(CurveRow {
            epoch,
            remaining,
            multiplier: curve.multiplier(remaining),
            power,
        });
    }
    Ok(rows)
}

/// Run the curve subcommand.
pub fn run(cmd: &CurveCmd) -> Result<(), Box<dyn std::error::Error>> {
    let rows = curve_rows(
        PowerPolicy::default(),
        cmd.amount,
        cmd.lock_up_epochs,
        cmd.steps_only,
    )?;
    match OutputFormat::from_flag(cmd.json) {
        OutputFormat::Json => println!("{}", format_json(&rows)),
        OutputFormat::Table => {
            println!(
                "Power curve: amount {} locked for {} epochs",
                cmd.amount, cmd.lock_up_epochs
            );
            println!("{}", format_table(&rows));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_curve_covers_lockup() {
        let rows = curve_rows(PowerPolicy::default(), 1300, 13, false).unwrap();
        assert_eq!(rows.len(), 14);
        assert_eq!(rows[0].power, 1300);
        assert_eq!(rows[12].remaining, 1);
        assert_eq!(rows[13].power, 0);
    }

    #[test]
    fn test_steps_only_keeps_changes() {
        let rows = curve_rows(PowerPolicy::default(), 100, 130, true).unwrap();
        let powers: Vec<Power> = rows.iter().map(|r| r.power).collect();
        assert_eq!(powers, vec![350, 175, 150, 130, 115, 100, 0]);
        assert_eq!(rows[1].epoch, 66);
    }

    #[test]
    fn test_rejects_bad_lockup() {
        assert!(curve_rows(PowerPolicy::default(), 1300, 12, false).is_err());
        assert!(curve_rows(PowerPolicy::default(), 1300, 66, false).is_err());
        assert!(curve_rows(PowerPolicy::default(), 1350, 13, false).is_err());
    }
}
