// crates/ballast-cli/src/commands/simulate.rs
//
// `ballast simulate <scenario.toml>`: run a scripted scenario against a
// fresh in-memory engine and report power per account and epoch.
//
// Rejected steps are reported and the run continues; an invariant violation
// aborts it. The report flags every epoch where the per-staker sum or the
// snapshot reconstruction disagrees with the total.

use std::collections::HashMap;

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use ballast_core::{AccountId, BallastError, Epoch, Power, StakeEvent, StakeId};
use ballast_power::{
    InMemoryCommodityLedger, InMemoryPositionLedger, ManualEpochClock, PowerEngine,
    RevenueApportioner,
};

use crate::config::{ScenarioConfig, ScenarioError, Step};
use crate::output::{format_json, format_table, OutputFormat};

type SimEngine = PowerEngine<ManualEpochClock, InMemoryCommodityLedger, InMemoryPositionLedger>;

/// Arguments for the simulate subcommand.
#[derive(Debug, Args)]
pub struct SimulateCmd {
    /// Path to the scenario TOML file.
    pub scenario: String,

    /// Emit JSON instead of tables.
    #[arg(long)]
    pub json: bool,
}

/// Errors that abort a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulateError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("Engine error: {0}")]
    Engine(#[from] BallastError),

    #[error("Step {index} ({op}) hit an invariant violation: {source}")]
    Fatal {
        index: usize,
        op: &'static str,
        source: BallastError,
    },
}

/// Outcome of one scenario step.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct StepOutcome {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Epoch")]
    pub epoch: Epoch,
    #[tabled(rename = "Op")]
    pub op: &'static str,
    #[tabled(rename = "Result")]
    pub result: String,
}

/// Power of every account at one epoch.
#[derive(Debug, Clone, Serialize)]
pub struct PowerRow {
    pub epoch: Epoch,
    pub stakers: Vec<Power>,
    pub total: Power,
    pub consistent: bool,
}

/// Everything a simulation produces.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub accounts: Vec<String>,
    pub steps: Vec<StepOutcome>,
    pub power: Vec<PowerRow>,
    pub events: Vec<StakeEvent>,
}

impl SimulationReport {
    /// Epochs flagged as inconsistent.
    pub fn mismatches(&self) -> impl Iterator<Item = Epoch> + '_ {
        self.power.iter().filter(|r| !r.consistent).map(|r| r.epoch)
    }
}

/// Mutable state threaded through the steps.
struct Simulation<'a> {
    config: &'a ScenarioConfig,
    engine: SimEngine,
    revenue: RevenueApportioner,
    labels: HashMap<String, StakeId>,
}

impl<'a> Simulation<'a> {
    fn new(config: &'a ScenarioConfig) -> Result<Self, SimulateError> {
        let mut commodity = InMemoryCommodityLedger::new();
        for account in &config.accounts {
            commodity.fund(&config.account(&account.name)?, account.balance);
        }
        let engine = PowerEngine::new(
            config.policy.clone(),
            ManualEpochClock::starting_at(config.start_epoch),
            commodity,
            InMemoryPositionLedger::new(),
        )?;
        Ok(Self {
            config,
            engine,
            revenue: RevenueApportioner::new(),
            labels: HashMap::new(),
        })
    }

    fn account(&self, name: &str) -> Result<AccountId, ScenarioError> {
        self.config.account(name)
    }

    /// Resolve a stake by label, or by `#n` for a raw id.
    fn stake(&self, reference: &str) -> Result<StakeId, ScenarioError> {
        if let Some(id) = self.labels.get(reference) {
            return Ok(*id);
        }
        reference
            .strip_prefix('#')
            .and_then(|n| n.parse().ok())
            .map(StakeId)
            .ok_or_else(|| ScenarioError::UnknownLabel(reference.to_string()))
    }

    fn label(&mut self, label: &Option<String>, id: StakeId) {
        if let Some(label) = label {
            self.labels.insert(label.clone(), id);
        }
    }

    /// Run one step. The outer error aborts the run; the inner one is a
    /// rejected operation.
    fn run_step(&mut self, step: &Step) -> Result<Result<String, BallastError>, ScenarioError> {
        let outcome = match step {
            Step::Create {
                by,
                amount,
                lock_up_epochs,
                label,
            } => {
                let caller = self.account(by)?;
                self.engine
                    .create_stake(&caller, *amount, *lock_up_epochs)
                    .map(|id| {
                        self.label(label, id);
                        format!("created {}", id)
                    })
            }
            Step::CreateFor {
                by,
                beneficiary,
                amount,
                lock_up_epochs,
                label,
            } => {
                let funder = self.account(by)?;
                let beneficiary = self.account(beneficiary)?;
                self.engine
                    .create_stake_on_behalf_of(&funder, &beneficiary, *amount, *lock_up_epochs)
                    .map(|id| {
                        self.label(label, id);
                        format!("created {}", id)
                    })
            }
            Step::Split {
                by,
                stake,
                amount,
                labels,
            } => {
                let caller = self.account(by)?;
                let id = self.stake(stake)?;
                self.engine.split_stake(&caller, id, *amount).map(|(a, b)| {
                    if let Some([first, second]) = labels {
                        self.labels.insert(first.clone(), a);
                        self.labels.insert(second.clone(), b);
                    }
                    format!("split into {} and {}", a, b)
                })
            }
            Step::Merge {
                by,
                first,
                second,
                label,
            } => {
                let caller = self.account(by)?;
                let first = self.stake(first)?;
                let second = self.stake(second)?;
                self.engine
                    .merge_stakes(&caller, first, second)
                    .map(|id| {
                        self.label(label, id);
                        format!("merged into {}", id)
                    })
            }
            Step::Increase {
                by,
                stake,
                amount,
                epochs,
                label,
            } => {
                let caller = self.account(by)?;
                let id = self.stake(stake)?;
                self.engine
                    .increase_stake(&caller, id, *amount, *epochs)
                    .map(|id| {
                        self.label(label, id);
                        format!("replaced by {}", id)
                    })
            }
            Step::Withdraw { by, stake } => {
                let caller = self.account(by)?;
                let id = self.stake(stake)?;
                self.engine
                    .withdraw_stake(&caller, id)
                    .map(|amount| format!("withdrew {}", amount))
            }
            Step::Delegate {
                by,
                stake,
                from,
                to,
            } => {
                let caller = self.account(by)?;
                let id = self.stake(stake)?;
                let from = self.account(from)?;
                let to = self.account(to)?;
                self.engine
                    .delegate_stake_power(&caller, id, &from, &to)
                    .map(|()| format!("{} now benefits {}", id, to))
            }
            Step::Transfer { by, stake, to } => {
                let caller = self.account(by)?;
                let id = self.stake(stake)?;
                let to = self.account(to)?;
                self.engine
                    .transfer_stake(&caller, id, &to)
                    .map(|()| format!("{} now owned by {}", id, to))
            }
            Step::Advance { epochs } => {
                self.engine.clock_mut().advance(*epochs);
                Ok(format!("clock at epoch {}", self.engine.current_epoch()))
            }
            Step::Calculate { epoch } => {
                let epoch = epoch.unwrap_or_else(|| self.engine.current_epoch());
                self.engine
                    .calculate_total_power(epoch)
                    .map(|power| format!("total power {} at epoch {}", power, epoch))
            }
            Step::CalculateStaker { staker, epoch } => {
                let staker = self.account(staker)?;
                let epoch = epoch.unwrap_or_else(|| self.engine.current_epoch());
                self.engine
                    .calculate_staker_power(&staker, epoch)
                    .map(|power| format!("staker power {} at epoch {}", power, epoch))
            }
            Step::Deposit { epoch, amount } => self
                .revenue
                .deposit(*epoch, *amount)
                .map(|()| format!("pool for epoch {} is {}", epoch, self.revenue.revenue_for(*epoch))),
            Step::Claim { staker, epoch } => {
                let staker = self.account(staker)?;
                self.revenue
                    .claim(&self.engine, &staker, *epoch)
                    .map(|share| format!("claimed {}", share))
            }
        };
        Ok(outcome)
    }

    fn power_rows(&self, from: Epoch, to: Epoch, accounts: &[AccountId]) -> Vec<PowerRow> {
        (from..=to)
            .map(|epoch| {
                let total = self.engine.total_power_at(epoch);
                let stakers: Vec<Power> = accounts
                    .iter()
                    .map(|a| self.engine.staker_power_at(a, epoch))
                    .collect();
                let ledger_sum: Power = self
                    .engine
                    .stakers()
                    .map(|s| self.engine.staker_power_at(s, epoch))
                    .sum();
                let snapshots_agree = accounts.iter().all(|a| {
                    self.engine.staker_power_from_snapshots(a, epoch)
                        == self.engine.staker_power_at(a, epoch)
                });
                PowerRow {
                    epoch,
                    stakers,
                    total,
                    consistent: ledger_sum == total && snapshots_agree,
                }
            })
            .collect()
    }
}

/// Run a parsed scenario to completion.
pub fn simulate(config: &ScenarioConfig) -> Result<SimulationReport, SimulateError> {
    let mut sim = Simulation::new(config)?;
    let first_epoch = config.start_epoch;
    let mut steps = Vec::with_capacity(config.steps.len());

    for (index, step) in config.steps.iter().enumerate() {
        let epoch = sim.engine.current_epoch();
        let result = match sim.run_step(step)? {
            Ok(summary) => summary,
            Err(e) if e.is_fatal() => {
                return Err(SimulateError::Fatal {
                    index,
                    op: step.name(),
                    source: e,
                })
            }
            Err(e) => {
                tracing::warn!(step = index, op = step.name(), error = %e, "Step rejected");
                format!("rejected: {}", e)
            }
        };
        steps.push(StepOutcome {
            index,
            epoch,
            op: step.name(),
            result,
        });
    }

    let longest = config.policy.long_lock_epochs()?;
    let from = config.report.from_epoch.unwrap_or(first_epoch);
    let to = config
        .report
        .to_epoch
        .unwrap_or_else(|| sim.engine.current_epoch() + longest + 1);
    let accounts: Vec<AccountId> = config
        .accounts
        .iter()
        .map(|a| config.account(&a.name))
        .collect::<Result<_, _>>()?;
    let power = sim.power_rows(from, to, &accounts);

    Ok(SimulationReport {
        accounts: config.accounts.iter().map(|a| a.name.clone()).collect(),
        steps,
        power,
        events: sim.engine.drain_events(),
    })
}

/// One printed line of the power table.
#[derive(Debug, Clone, Tabled)]
struct PowerTableRow {
    #[tabled(rename = "Epoch")]
    epoch: Epoch,
    #[tabled(rename = "Power by account")]
    stakers: String,
    #[tabled(rename = "Total")]
    total: Power,
    #[tabled(rename = "Check")]
    check: &'static str,
}

/// Render the power rows, collapsing runs of identical rows.
fn power_table(report: &SimulationReport) -> String {
    let mut rows = Vec::new();
    let mut previous: Option<&PowerRow> = None;
    for row in &report.power {
        let unchanged = previous.map_or(false, |p| {
            p.stakers == row.stakers && p.total == row.total && row.consistent
        });
        previous = Some(row);
        if unchanged {
            continue;
        }
        let stakers = report
            .accounts
            .iter()
            .zip(&row.stakers)
            .map(|(name, power)| format!("{}={}", name, power))
            .collect::<Vec<_>>()
            .join(" ");
        rows.push(PowerTableRow {
            epoch: row.epoch,
            stakers,
            total: row.total,
            check: if row.consistent { "ok" } else { "MISMATCH" },
        });
    }
    format_table(&rows)
}

/// Run the simulate subcommand.
pub fn run(cmd: &SimulateCmd, config: &ScenarioConfig) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(config)?;

    match OutputFormat::from_flag(cmd.json) {
        OutputFormat::Json => println!("{}", format_json(&report)),
        OutputFormat::Table => {
            println!("Scenario: {}", cmd.scenario);
            println!("{}", format_table(&report.steps));
            println!();
            println!("Power by epoch (rows shown where a value changes):");
            println!("{}", power_table(&report));
        }
    }

    let mismatches: Vec<Epoch> = report.mismatches().collect();
    if !mismatches.is_empty() {
        return Err(format!("power mismatch at epochs {:?}", mismatches).into());
    }
    Ok(())
}
