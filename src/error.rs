//! Error types.

use crate::chain::Txid;
use thiserror::Error;

/// Explorer page for a transaction, shown alongside fatal transaction errors.
pub fn explorer_url(txid: &Txid) -> String {
    format!("https://explorer.stacks.co/txid/{}", txid)
}

/// Everything that can end a mining run.
///
/// None of these are recovered from locally: the runner stops on the first
/// one and the binary turns it into an exit status.
#[derive(Error, Debug)]
pub enum MinerError {
    /// A chain query failed at the network or decoding level.
    #[error("chain read failed ({call}): {reason}")]
    ChainRead { call: String, reason: String },

    /// No fee sample was available to average.
    #[error("fee estimation failed: {0}")]
    FeeEstimation(String),

    /// The broadcast was refused before reaching the chain.
    #[error("transaction submission failed: {0}")]
    Submission(String),

    /// The chain processed and aborted the transaction.
    #[error("transaction {txid} failed with status {status}\n{}", explorer_url(.txid))]
    TransactionRejected { txid: Txid, status: String },

    /// Status polling ran out of attempts.
    #[error("transaction {txid} not confirmed after {attempts} attempts, check tx\n{}", explorer_url(.txid))]
    ConfirmationTimeout { txid: Txid, attempts: u32 },

    /// The operator declined or aborted before a cycle started.
    #[error("cancelled by user: {0}")]
    ConfigurationCancelled(String),

    /// No commit satisfies `commit * blocks + fee < balance`.
    #[error("balance of {balance} uSTX cannot cover fee of {fee} uSTX plus a commit over {blocks} blocks")]
    InsufficientBalance { balance: u64, fee: u64, blocks: u32 },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MinerError {
    pub fn chain_read(call: impl Into<String>, reason: impl ToString) -> Self {
        Self::ChainRead {
            call: call.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the run ended because the operator asked it to.
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::ConfigurationCancelled(_))
    }
}

/// Result type for autominer operations.
pub type Result<T> = std::result::Result<T, MinerError>;
