use crate::clock::DueTime;
use crate::schedule::Schedule;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

/// Immutable description of one simulation run, loaded from a JSON file
/// before the infrastructure starts and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Stop after this many completed protocol rounds (0 = unbounded).
    #[serde(default)]
    pub rounds: u64,
    /// Stop after this many mined blocks (0 = unbounded).
    #[serde(default)]
    pub blocks: u64,
    /// Client version used by wallets that carry no override.
    pub default_version: Version,
    /// Version the distributor wallet runs; defaults to `default_version`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributor_version: Option<Version>,
    /// Default anonymity target exported to tuning-capable wallets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_anon_target: Option<u32>,
    /// Default coin-isolation flag exported to tuning-capable wallets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_coin_isolation: Option<bool>,
    /// Overrides merged into the coordinator's base configuration before it
    /// is uploaded into the coordinator container.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub coordinator: Map<String, Value>,
    pub wallets: Vec<WalletSpec>,
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("could not read scenario file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse scenario file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("scenario has no wallets")]
    Empty,
}

impl Scenario {
    /// Load and validate a scenario definition from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path)?;
        let scenario: Scenario = serde_json::from_str(&raw)?;
        if scenario.wallets.is_empty() {
            return Err(ScenarioError::Empty);
        }
        Ok(scenario)
    }

    /// Every client version the run needs an image for.
    pub fn versions(&self) -> BTreeSet<Version> {
        let mut versions = BTreeSet::new();
        versions.insert(self.default_version);
        versions.insert(self.distributor());
        for wallet in &self.wallets {
            if let Some(version) = wallet.version {
                versions.insert(version);
            }
        }
        versions
    }

    /// Resolved distributor version.
    pub fn distributor(&self) -> Version {
        self.distributor_version.unwrap_or(self.default_version)
    }

    /// Resolved client version for the wallet at `index`.
    pub fn wallet_version(&self, index: usize) -> Version {
        self.wallets[index]
            .version
            .unwrap_or(self.default_version)
    }

    /// Sum of all scheduled funding across all wallets, in base units.
    pub fn total_funds(&self) -> u64 {
        self.wallets
            .iter()
            .flat_map(|w| w.funds.iter())
            .map(|f| f.value())
            .sum()
    }
}

/// One wallet actor: its funding plan and participation window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletSpec {
    #[serde(default)]
    pub funds: Vec<FundEntry>,
    #[serde(default)]
    pub delay_blocks: u64,
    #[serde(default)]
    pub delay_rounds: u64,
    #[serde(default)]
    pub stop_blocks: u64,
    #[serde(default)]
    pub stop_rounds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anon_target: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin_isolation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

impl WalletSpec {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            delay_blocks: self.delay_blocks,
            delay_rounds: self.delay_rounds,
            stop_blocks: self.stop_blocks,
            stop_rounds: self.stop_rounds,
        }
    }
}

/// A funding entry: either a bare amount payable immediately, or an amount
/// deferred until the simulation clock reaches the given thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FundEntry {
    Plain(u64),
    Scheduled {
        value: u64,
        #[serde(default)]
        delay_blocks: u64,
        #[serde(default)]
        delay_rounds: u64,
    },
}

impl FundEntry {
    pub fn value(&self) -> u64 {
        match self {
            FundEntry::Plain(value) => *value,
            FundEntry::Scheduled { value, .. } => *value,
        }
    }

    pub fn due(&self) -> DueTime {
        match self {
            FundEntry::Plain(_) => DueTime::immediate(),
            FundEntry::Scheduled {
                delay_blocks,
                delay_rounds,
                ..
            } => DueTime::new(*delay_blocks, *delay_rounds),
        }
    }
}
