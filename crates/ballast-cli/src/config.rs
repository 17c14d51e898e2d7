// crates/ballast-cli/src/config.rs
//
// Scenario files for `ballast simulate`.
//
// A scenario is a TOML document naming the accounts, the decay policy, and a
// list of steps to run against a fresh engine. Accounts are referred to by
// name; the account id is the SHA-256 of the name.

use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use std::fs;

use ballast_core::{AccountId, Amount, Epoch, PowerPolicy};

/// Errors raised while loading or resolving a scenario.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("Cannot read scenario file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid scenario TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown account name: {0}")]
    UnknownAccount(String),

    #[error("Unknown stake label: {0}")]
    UnknownLabel(String),

    #[error("Duplicate name in scenario: {0}")]
    Duplicate(String),
}

/// A full simulation scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Epoch the clock starts at.
    #[serde(default = "default_start_epoch")]
    pub start_epoch: Epoch,

    #[serde(default)]
    pub policy: PowerPolicy,

    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default)]
    pub report: ReportConfig,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_start_epoch() -> Epoch {
    1
}

/// A named account and its opening commodity balance.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    #[serde(default, deserialize_with = "amount")]
    pub balance: Amount,
}

/// Epoch range printed after the run. Defaults to the whole run plus the
/// longest lockup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfig {
    pub from_epoch: Option<Epoch>,
    pub to_epoch: Option<Epoch>,
}

/// One scripted operation. Stakes created by a step can be given a `label`
/// that later steps use to refer to them.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Create {
        by: String,
        #[serde(deserialize_with = "amount")]
        amount: Amount,
        lock_up_epochs: Epoch,
        label: Option<String>,
    },
    CreateFor {
        by: String,
        beneficiary: String,
        #[serde(deserialize_with = "amount")]
        amount: Amount,
        lock_up_epochs: Epoch,
        label: Option<String>,
    },
    Split {
        by: String,
        stake: String,
        #[serde(deserialize_with = "amount")]
        amount: Amount,
        labels: Option<[String; 2]>,
    },
    Merge {
        by: String,
        first: String,
        second: String,
        label: Option<String>,
    },
    Increase {
        by: String,
        stake: String,
        #[serde(default, deserialize_with = "amount")]
        amount: Amount,
        #[serde(default)]
        epochs: Epoch,
        label: Option<String>,
    },
    Withdraw {
        by: String,
        stake: String,
    },
    Delegate {
        by: String,
        stake: String,
        from: String,
        to: String,
    },
    Transfer {
        by: String,
        stake: String,
        to: String,
    },
    Advance {
        epochs: Epoch,
    },
    Calculate {
        epoch: Option<Epoch>,
    },
    CalculateStaker {
        staker: String,
        epoch: Option<Epoch>,
    },
    Deposit {
        epoch: Epoch,
        #[serde(deserialize_with = "amount")]
        amount: Amount,
    },
    Claim {
        staker: String,
        epoch: Epoch,
    },
}

/// TOML integers are 64-bit; amounts are widened after parsing.
fn amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    u64::deserialize(deserializer).map(Amount::from)
}

impl Step {
    /// Short operation name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Create { .. } => "create",
            Step::CreateFor { .. } => "create_for",
            Step::Split { .. } => "split",
            Step::Merge { .. } => "merge",
            Step::Increase { .. } => "increase",
            Step::Withdraw { .. } => "withdraw",
            Step::Delegate { .. } => "delegate",
            Step::Transfer { .. } => "transfer",
            Step::Advance { .. } => "advance",
            Step::Calculate { .. } => "calculate",
            Step::CalculateStaker { .. } => "calculate_staker",
            Step::Deposit { .. } => "deposit",
            Step::Claim { .. } => "claim",
        }
    }
}

impl ScenarioConfig {
    /// Load a scenario from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self, ScenarioError> {
        let contents = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse a scenario from TOML text.
    pub fn parse(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig = toml::from_str(contents)?;
        let mut seen = std::collections::HashSet::new();
        for account in &config.accounts {
            if !seen.insert(account.name.as_str()) {
                return Err(ScenarioError::Duplicate(account.name.clone()));
            }
        }
        Ok(config)
    }

    /// Resolve an account name declared in `[[accounts]]`.
    pub fn account(&self, name: &str) -> Result<AccountId, ScenarioError> {
        if self.accounts.iter().any(|a| a.name == name) {
            Ok(account_id(name))
        } else {
            Err(ScenarioError::UnknownAccount(name.to_string()))
        }
    }
}

/// Deterministic account id for a scenario name.
pub fn account_id(name: &str) -> AccountId {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    AccountId(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
        log_level = "debug"

        [policy]
        rounding_unit = 100

        [[accounts]]
        name = "alice"
        balance = 10000

        [[accounts]]
        name = "bob"

        [[steps]]
        op = "create"
        by = "alice"
        amount = 1300
        lock_up_epochs = 13
        label = "a1"

        [[steps]]
        op = "advance"
        epochs = 2

        [[steps]]
        op = "delegate"
        by = "alice"
        stake = "a1"
        from = "alice"
        to = "bob"

        [report]
        to_epoch = 20
    "#;

    #[test]
    fn test_parse_scenario() {
        let config = ScenarioConfig::parse(SCENARIO).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.start_epoch, 1);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[1].balance, 0);
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.steps[0].name(), "create");
        assert!(matches!(config.steps[1], Step::Advance { epochs: 2 }));
        assert_eq!(config.report.to_epoch, Some(20));
        assert_eq!(config.policy.epochs_per_year, 13);
    }

    #[test]
    fn test_unknown_op_rejected() {
        let err = ScenarioConfig::parse("[[steps]]\nop = \"burn\"\n").unwrap_err();
        assert!(matches!(err, ScenarioError::Parse(_)));
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let text = "[[accounts]]\nname = \"a\"\n[[accounts]]\nname = \"a\"\n";
        assert!(matches!(
            ScenarioConfig::parse(text),
            Err(ScenarioError::Duplicate(_))
        ));
    }

    #[test]
    fn test_account_lookup() {
        let config = ScenarioConfig::parse(SCENARIO).unwrap();
        assert_eq!(config.account("alice").unwrap(), account_id("alice"));
        assert_ne!(account_id("alice"), account_id("bob"));
        assert!(matches!(
            config.account("carol"),
            Err(ScenarioError::UnknownAccount(_))
        ));
    }
}
