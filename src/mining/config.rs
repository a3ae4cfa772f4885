//! Mining configuration

use crate::chain::ContractId;
use crate::error::{MinerError, Result};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

pub const MAX_BLOCKS_PER_TX: u32 = 200;
pub const MAX_SEARCH_DISTANCE: u32 = 100;

static STX_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^S[PMTN][0-9A-HJKMNP-TV-Z]{38,39}$").expect("valid regex"));
static CONTRACT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]{0,39}$").expect("valid regex"));

/// Known CityCoin core contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum City {
    /// MiamiCoin (MIA)
    Mia,
    /// NewYorkCityCoin (NYC)
    Nyc,
}

impl City {
    pub fn contract(self) -> ContractId {
        match self {
            City::Mia => ContractId::new("SP466FNC0P7JWTNM2R9T199QRZN1MYEDTAR0KP27", "miamicoin-core-v1"),
            City::Nyc => {
                ContractId::new("SP2H8PY27SEZ03MWRKS5XABZYQN17ETGQS3527SA5", "newyorkcitycoin-core-v1")
            }
        }
    }
}

/// How many cycles to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    FixedRuns(u32),
    /// Keep mining with the full balance until something fails.
    ContinuousFullBalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Fixed per-block commit in uSTX.
    Custom(u64),
    /// Estimated from recent mining stats with a `MiningStrategy`.
    Strategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    /// Fixed fee in uSTX.
    Custom(u64),
    /// Mempool average fee times this factor.
    Multiplier(f64),
}

/// Parameters for estimating a competitive commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningStrategy {
    /// Blocks to sample on each side of the current height.
    pub search_distance: u32,
    /// Share of the per-block total to aim for, in percent.
    pub target_percentage: u8,
    /// Upper bound for the per-block commit in uSTX.
    pub max_commit_per_block: u64,
}

impl MiningStrategy {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SEARCH_DISTANCE).contains(&self.search_distance) {
            return Err(MinerError::InvalidConfig(format!(
                "search distance must be between 1 and {}, got {}",
                MAX_SEARCH_DISTANCE, self.search_distance
            )));
        }
        if !(1..=100).contains(&self.target_percentage) {
            return Err(MinerError::InvalidConfig(format!(
                "target percentage must be between 1 and 100, got {}",
                self.target_percentage
            )));
        }
        Ok(())
    }
}

/// Everything one mining session needs, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct MiningConfig {
    pub contract: ContractId,
    pub stx_address: String,
    pub blocks_per_tx: u32,
    pub start_now: bool,
    pub target_block_height: u64,
    pub run_mode: RunMode,
    pub commit_mode: CommitMode,
    pub fee_mode: FeeMode,
}

impl MiningConfig {
    pub fn validate(&self) -> Result<()> {
        if !STX_ADDRESS.is_match(&self.stx_address) {
            return Err(MinerError::InvalidConfig(format!(
                "{:?} is not a Stacks address",
                self.stx_address
            )));
        }
        if !STX_ADDRESS.is_match(&self.contract.address) {
            return Err(MinerError::InvalidConfig(format!(
                "contract address {:?} is not a Stacks address",
                self.contract.address
            )));
        }
        if !CONTRACT_NAME.is_match(&self.contract.name) {
            return Err(MinerError::InvalidConfig(format!(
                "{:?} is not a valid contract name",
                self.contract.name
            )));
        }
        if !(1..=MAX_BLOCKS_PER_TX).contains(&self.blocks_per_tx) {
            return Err(MinerError::InvalidConfig(format!(
                "blocks per tx must be between 1 and {}, got {}",
                MAX_BLOCKS_PER_TX, self.blocks_per_tx
            )));
        }
        if let RunMode::FixedRuns(0) = self.run_mode {
            return Err(MinerError::InvalidConfig(
                "number of runs must be 1 or greater".to_string(),
            ));
        }
        if let CommitMode::Custom(0) = self.commit_mode {
            return Err(MinerError::InvalidConfig(
                "custom commit must be greater than 0".to_string(),
            ));
        }
        match self.fee_mode {
            FeeMode::Custom(0) => {
                return Err(MinerError::InvalidConfig(
                    "custom fee must be greater than 0".to_string(),
                ));
            }
            FeeMode::Multiplier(m) if !(m.is_finite() && m > 0.0) => {
                return Err(MinerError::InvalidConfig(format!(
                    "fee multiplier must be greater than 0, got {}",
                    m
                )));
            }
            _ => {}
        }
        Ok(())
    }

    /// Checked once at configuration time; later cycles reschedule on their own.
    pub fn check_target(&self, current_height: u64) -> Result<()> {
        if !self.start_now && self.target_block_height < current_height {
            return Err(MinerError::InvalidConfig(format!(
                "target block height {} is below current block height {}",
                self.target_block_height, current_height
            )));
        }
        Ok(())
    }
}

/// Poll and delay settings for the scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Used while more than 25 blocks remain.
    pub far_poll_secs: u64,
    /// Used while 6 to 25 blocks remain.
    pub near_poll_secs: u64,
    /// Used while 5 or fewer blocks remain.
    pub imminent_poll_secs: u64,
    pub presubmit_delay_secs: u64,
    pub confirm_interval_secs: u64,
    pub confirm_max_attempts: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            far_poll_secs: 2 * 60 * 60,
            near_poll_secs: 30 * 60,
            imminent_poll_secs: 5 * 60,
            presubmit_delay_secs: 10,
            confirm_interval_secs: 5 * 60,
            confirm_max_attempts: 50,
        }
    }
}

impl Timings {
    /// Every poll interval and the attempt limit must be non-zero; the
    /// pre-submit delay may be zero.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("far_poll_secs", self.far_poll_secs),
            ("near_poll_secs", self.near_poll_secs),
            ("imminent_poll_secs", self.imminent_poll_secs),
            ("confirm_interval_secs", self.confirm_interval_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                return Err(MinerError::InvalidConfig(format!(
                    "timing.{} must be greater than 0",
                    name
                )));
            }
        }
        if self.confirm_max_attempts == 0 {
            return Err(MinerError::InvalidConfig(
                "timing.confirm_max_attempts must be 1 or greater".to_string(),
            ));
        }
        Ok(())
    }

    pub fn presubmit_delay(&self) -> Duration {
        Duration::from_secs(self.presubmit_delay_secs)
    }

    pub fn confirm_interval(&self) -> Duration {
        Duration::from_secs(self.confirm_interval_secs)
    }
}
