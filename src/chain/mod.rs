//! Read-only access to the Stacks chain.
//!
//! `ChainReader` is the seam between the mining logic and the network:
//! - `HttpChainReader` talks to a Stacks node / extended API
//! - tests use an in-memory chain driven by tokio's virtual clock
//!
//! Every call is a single request with no retry; a failure surfaces as
//! `MinerError::ChainRead` and is fatal to the run.

pub mod clarity;
pub mod http;

#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpChainReader;

use crate::error::{MinerError, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Transaction id, normalized to lowercase `0x`-prefixed hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Txid(String);

impl Txid {
    pub fn parse(raw: &str) -> Result<Self> {
        let digits = raw.trim().trim_start_matches("0x").to_ascii_lowercase();
        let bytes = hex::decode(&digits)
            .map_err(|e| MinerError::Submission(format!("invalid txid {:?}: {}", raw, e)))?;
        if bytes.len() != 32 {
            return Err(MinerError::Submission(format!(
                "invalid txid {:?}: expected 32 bytes, got {}",
                raw,
                bytes.len()
            )));
        }
        Ok(Self(format!("0x{}", digits)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified contract identifier, `<address>.<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractId {
    pub address: String,
    pub name: String,
}

impl ContractId {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.name)
    }
}

impl FromStr for ContractId {
    type Err = MinerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((address, name)) if !address.is_empty() && !name.is_empty() => {
                Ok(Self::new(address, name))
            }
            _ => Err(MinerError::InvalidConfig(format!(
                "contract {:?} is not of the form <address>.<name>",
                s
            ))),
        }
    }
}

/// Where a broadcast transaction currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// The API has not indexed the transaction yet.
    NotFound,
    Pending,
    /// Anchored successfully at `block_height`.
    Success { block_height: u64 },
    /// Aborted or dropped; carries the raw API status.
    Rejected(String),
}

impl TxStatus {
    /// Map an extended-API `tx_status` string.
    pub fn from_api(status: &str, block_height: Option<u64>) -> Result<Self> {
        match status {
            "pending" => Ok(Self::Pending),
            "success" => block_height
                .map(|block_height| Self::Success { block_height })
                .ok_or_else(|| MinerError::chain_read("getTxStatus", "success without block_height")),
            s if s.starts_with("abort") || s.starts_with("dropped") => Ok(Self::Rejected(s.to_string())),
            other => Err(MinerError::chain_read(
                "getTxStatus",
                format!("unknown tx_status {:?}", other),
            )),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::NotFound => "not_found",
            Self::Pending => "pending",
            Self::Success { .. } => "success",
            Self::Rejected(status) => status,
        }
    }
}

/// One entry of an address's transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountTx {
    pub tx_id: String,
    pub tx_status: String,
    pub tx_type: String,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default, deserialize_with = "http::de::opt_u64")]
    pub fee_rate: Option<u64>,
}

/// A page of `AccountTx` plus the total the API reports for the address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountTxPage {
    pub total: u64,
    pub results: Vec<AccountTx>,
}

/// Read-only chain queries used by the mining loop.
#[allow(async_fn_in_trait)]
pub trait ChainReader {
    /// Latest chain tip height.
    async fn current_height(&self) -> Result<u64>;

    /// Spendable balance in micro-STX.
    async fn balance(&self, address: &str) -> Result<u64>;

    /// Next valid nonce for `address`.
    async fn nonce(&self, address: &str) -> Result<u64>;

    /// Number of pending transactions.
    async fn mempool_size(&self) -> Result<u64>;

    /// Fee rates of up to `limit` of the most recent pending transactions.
    async fn mempool_fee_rates(&self, limit: usize) -> Result<Vec<u64>>;

    /// Total commit recorded by `contract` for `height`, 0 when absent.
    async fn mining_stat_at(&self, contract: &ContractId, height: u64) -> Result<u64>;

    async fn tx_status(&self, txid: &Txid) -> Result<TxStatus>;

    async fn account_transactions(
        &self,
        address: &str,
        limit: u32,
        offset: u32,
    ) -> Result<AccountTxPage>;
}
