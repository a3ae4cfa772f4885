//! Building and handing off `mine-many` transactions.
//!
//! Signing happens outside this process: `SignerSubmitter` posts the
//! unsigned call to a remote signer which holds the key, signs, broadcasts
//! and answers with the txid.

use crate::chain::clarity::ClarityValue;
use crate::chain::{ContractId, Txid};
use crate::error::{MinerError, Result};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const MINE_MANY_FUNCTION: &str = "mine-many";

/// Exact-amount STX post-condition on the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StxPostCondition {
    pub principal: String,
    pub condition: String,
    pub amount: u64,
}

/// One equal commit per block, with the fee and nonce to send it under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MineManyRequest {
    pub contract: ContractId,
    pub sender: String,
    pub commits: Vec<u64>,
    pub fee: u64,
    pub nonce: u64,
}

impl MineManyRequest {
    pub fn new(
        contract: ContractId,
        sender: impl Into<String>,
        commit_per_block: u64,
        blocks_per_tx: u32,
        fee: u64,
        nonce: u64,
    ) -> Self {
        Self {
            contract,
            sender: sender.into(),
            commits: vec![commit_per_block; blocks_per_tx as usize],
            fee,
            nonce,
        }
    }

    pub fn total_commit(&self) -> u64 {
        self.commits.iter().sum()
    }

    /// The sender must spend exactly the total commit or the chain aborts the tx.
    pub fn post_condition(&self) -> StxPostCondition {
        StxPostCondition {
            principal: self.sender.clone(),
            condition: "eq".to_string(),
            amount: self.total_commit(),
        }
    }

    /// Hex-encoded Clarity arguments: a single `(list uint)`.
    pub fn function_args(&self) -> Vec<String> {
        vec![ClarityValue::uint_list(self.commits.iter().copied()).to_hex()]
    }
}

#[allow(async_fn_in_trait)]
pub trait TxSubmitter {
    /// Sign and broadcast, returning the txid the network accepted.
    async fn submit(&self, request: &MineManyRequest) -> Result<Txid>;
}

#[derive(Serialize)]
struct SignerRequest<'a> {
    contract_address: &'a str,
    contract_name: &'a str,
    function_name: &'static str,
    function_args: Vec<String>,
    sender: &'a str,
    fee: u64,
    nonce: u64,
    post_condition_mode: &'static str,
    post_conditions: Vec<StxPostCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BroadcastResponse {
    Txid(String),
    Rejected {
        error: String,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        reason_data: Option<serde_json::Value>,
    },
    Accepted {
        txid: String,
    },
}

pub struct SignerSubmitter {
    client: Client,
    url: String,
}

impl SignerSubmitter {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MinerError::InvalidConfig(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl TxSubmitter for SignerSubmitter {
    async fn submit(&self, request: &MineManyRequest) -> Result<Txid> {
        let body = SignerRequest {
            contract_address: &request.contract.address,
            contract_name: &request.contract.name,
            function_name: MINE_MANY_FUNCTION,
            function_args: request.function_args(),
            sender: &request.sender,
            fee: request.fee,
            nonce: request.nonce,
            post_condition_mode: "deny",
            post_conditions: vec![request.post_condition()],
        };
        debug!(url = %self.url, nonce = request.nonce, fee = request.fee, "submitting mine-many");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MinerError::Submission(format!("signer unreachable: {}", e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| MinerError::Submission(format!("reading signer response: {}", e)))?;

        match serde_json::from_str::<BroadcastResponse>(&text) {
            Ok(BroadcastResponse::Rejected {
                error,
                reason,
                reason_data,
            }) => {
                let mut message = error;
                if let Some(reason) = reason {
                    message = format!("{}: {}", message, reason);
                }
                if let Some(data) = reason_data {
                    message = format!("{}\ndetails: {}", message, data);
                }
                Err(MinerError::Submission(message))
            }
            Ok(_) if !status.is_success() => Err(MinerError::Submission(format!(
                "signer returned {}: {}",
                status, text
            ))),
            Ok(BroadcastResponse::Txid(txid)) | Ok(BroadcastResponse::Accepted { txid }) => {
                Txid::parse(&txid)
            }
            Err(e) => {
                warn!(%status, body = %text, "unrecognized signer response");
                Err(MinerError::Submission(format!(
                    "signer returned {} with unreadable body: {}",
                    status, e
                )))
            }
        }
    }
}
