//! Settings file.

use crate::chain::ContractId;
use crate::error::{MinerError, Result as MinerResult};
use crate::mining::config::{
    City, CommitMode, FeeMode, MiningConfig, MiningStrategy, RunMode, Timings,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://stacks-node-api.mainnet.stacks.co";

/// Contents of `autominer.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub network: NetworkSettings,
    /// Needed by `mine` and `estimate`.
    pub mining: Option<MiningSettings>,
    pub strategy: Option<MiningStrategy>,
    #[serde(default)]
    pub timing: Timings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub api_url: String,
    /// Remote signer that broadcasts `mine-many` calls.
    pub signer_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            signer_url: None,
            request_timeout_secs: 30,
        }
    }
}

impl NetworkSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningSettings {
    pub stx_address: String,
    /// Preset contract, exclusive with `contract`.
    pub city: Option<City>,
    /// `<address>.<name>`
    pub contract: Option<String>,
    pub blocks_per_tx: u32,
    #[serde(default = "default_true")]
    pub start_now: bool,
    #[serde(default)]
    pub target_block_height: u64,
    #[serde(default = "default_run_mode")]
    pub run_mode: RunMode,
    #[serde(default = "default_commit")]
    pub commit: CommitMode,
    #[serde(default = "default_fee")]
    pub fee: FeeMode,
}

fn default_true() -> bool {
    true
}

fn default_run_mode() -> RunMode {
    RunMode::FixedRuns(1)
}

fn default_commit() -> CommitMode {
    CommitMode::Strategy
}

fn default_fee() -> FeeMode {
    FeeMode::Multiplier(1.0)
}

/// Command-line flags that take precedence over `[mining]`.
#[derive(Debug, Clone, Default)]
pub struct MiningOverrides {
    pub target_height: Option<u64>,
    pub start_now: bool,
    pub runs: Option<u32>,
    pub continuous: bool,
}

impl MiningSettings {
    pub fn contract_id(&self) -> MinerResult<ContractId> {
        match (self.city, &self.contract) {
            (Some(city), None) => Ok(city.contract()),
            (None, Some(contract)) => contract.parse(),
            _ => Err(MinerError::InvalidConfig(
                "set exactly one of mining.city or mining.contract".to_string(),
            )),
        }
    }

    pub fn apply(&mut self, overrides: &MiningOverrides) {
        if let Some(height) = overrides.target_height {
            self.start_now = false;
            self.target_block_height = height;
        }
        if overrides.start_now {
            self.start_now = true;
        }
        if let Some(runs) = overrides.runs {
            self.run_mode = RunMode::FixedRuns(runs);
        }
        if overrides.continuous {
            self.run_mode = RunMode::ContinuousFullBalance;
        }
    }

    /// Validated core configuration.
    pub fn to_config(&self) -> MinerResult<MiningConfig> {
        let config = MiningConfig {
            contract: self.contract_id()?,
            stx_address: self.stx_address.clone(),
            blocks_per_tx: self.blocks_per_tx,
            start_now: self.start_now,
            target_block_height: self.target_block_height,
            run_mode: self.run_mode,
            commit_mode: self.commit,
            fee_mode: self.fee,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Settings {
    /// Read `path`, or fall back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings: Self = toml::from_str(&content).context("Failed to parse config file")?;
        if let Some(strategy) = &settings.strategy {
            strategy.validate()?;
        }
        settings.timing.validate()?;
        Ok(settings)
    }

    pub fn mining(&self) -> Result<&MiningSettings> {
        self.mining
            .as_ref()
            .context("config file has no [mining] section")
    }

    pub fn signer_url(&self) -> Result<&str> {
        self.network
            .signer_url
            .as_deref()
            .context("network.signer_url is required to submit transactions")
    }
}
