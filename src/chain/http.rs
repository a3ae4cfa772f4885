//! `ChainReader` over the Stacks node RPC and extended API.

use super::clarity::ClarityValue;
use super::{AccountTxPage, ChainReader, ContractId, TxStatus, Txid};
use crate::error::{MinerError, Result};

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Read-only function queried for per-block commit totals.
pub const MINING_STATS_FUNCTION: &str = "get-mining-stats-at-block-or-default";

pub struct HttpChainReader {
    client: Client,
    api_url: String,
}

impl HttpChainReader {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("citycoin-autominer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MinerError::InvalidConfig(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn get_json<T: DeserializeOwned>(&self, call: &str, path: &str) -> Result<T> {
        let url = format!("{}{}", self.api_url, path);
        debug!(call, %url, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MinerError::chain_read(call, e))?;
        response
            .json::<T>()
            .await
            .map_err(|e| MinerError::chain_read(call, e))
    }
}

#[derive(Deserialize)]
struct InfoResponse {
    stacks_tip_height: u64,
}

#[derive(Deserialize)]
struct BalancesResponse {
    stx: StxBalance,
}

#[derive(Deserialize)]
struct StxBalance {
    #[serde(deserialize_with = "de::u64")]
    balance: u64,
    #[serde(default, deserialize_with = "de::u64")]
    locked: u64,
}

#[derive(Deserialize)]
struct AccountResponse {
    nonce: u64,
}

#[derive(Deserialize)]
struct MempoolResponse {
    total: u64,
    #[serde(default)]
    results: Vec<MempoolTx>,
}

#[derive(Deserialize)]
struct MempoolTx {
    #[serde(deserialize_with = "de::u64")]
    fee_rate: u64,
}

#[derive(Deserialize)]
struct ReadOnlyResponse {
    okay: bool,
    result: Option<String>,
    cause: Option<String>,
}

#[derive(Deserialize)]
struct TxResponse {
    tx_status: String,
    #[serde(default)]
    block_height: Option<u64>,
}

impl ChainReader for HttpChainReader {
    async fn current_height(&self) -> Result<u64> {
        let info: InfoResponse = self.get_json("getBlockHeight", "/v2/info").await?;
        Ok(info.stacks_tip_height)
    }

    async fn balance(&self, address: &str) -> Result<u64> {
        let path = format!("/extended/v1/address/{}/balances", address);
        let balances: BalancesResponse = self.get_json("getStxBalance", &path).await?;
        Ok(balances.stx.balance.saturating_sub(balances.stx.locked))
    }

    async fn nonce(&self, address: &str) -> Result<u64> {
        let path = format!("/v2/accounts/{}?proof=0", address);
        let account: AccountResponse = self.get_json("getNonce", &path).await?;
        Ok(account.nonce)
    }

    async fn mempool_size(&self) -> Result<u64> {
        let mempool: MempoolResponse = self
            .get_json("getTotalMempoolTx", "/extended/v1/tx/mempool?limit=1")
            .await?;
        Ok(mempool.total)
    }

    async fn mempool_fee_rates(&self, limit: usize) -> Result<Vec<u64>> {
        let path = format!("/extended/v1/tx/mempool?limit={}", limit);
        let mempool: MempoolResponse = self.get_json("getOptimalFee", &path).await?;
        Ok(mempool
            .results
            .into_iter()
            .take(limit)
            .map(|tx| tx.fee_rate)
            .collect())
    }

    async fn mining_stat_at(&self, contract: &ContractId, height: u64) -> Result<u64> {
        const CALL: &str = "getMiningStatsAtBlock";
        let url = format!(
            "{}/v2/contracts/call-read/{}/{}/{}",
            self.api_url, contract.address, contract.name, MINING_STATS_FUNCTION
        );
        let body = serde_json::json!({
            "sender": contract.address,
            "arguments": [ClarityValue::UInt(height as u128).to_hex()],
        });
        debug!(call = CALL, %url, height, "POST");

        let response: ReadOnlyResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MinerError::chain_read(CALL, e))?
            .json()
            .await
            .map_err(|e| MinerError::chain_read(CALL, e))?;

        if !response.okay {
            return Err(MinerError::chain_read(
                CALL,
                response.cause.unwrap_or_else(|| "read-only call failed".to_string()),
            ));
        }
        let raw = response
            .result
            .ok_or_else(|| MinerError::chain_read(CALL, "missing result"))?;
        let value = ClarityValue::from_hex(&raw).map_err(|e| MinerError::chain_read(CALL, e))?;

        if matches!(value.unwrapped(), ClarityValue::None) {
            return Ok(0);
        }
        let amount = value
            .field("amount")
            .and_then(ClarityValue::as_u128)
            .ok_or_else(|| MinerError::chain_read(CALL, "result has no uint amount field"))?;
        let amount =
            u64::try_from(amount).map_err(|_| MinerError::chain_read(CALL, "amount overflows u64"))?;
        debug!(height, amount, "mining stats");
        Ok(amount)
    }

    async fn tx_status(&self, txid: &Txid) -> Result<TxStatus> {
        const CALL: &str = "getTxStatus";
        let url = format!("{}/extended/v1/tx/{}", self.api_url, txid);
        debug!(call = CALL, %url, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MinerError::chain_read(CALL, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(TxStatus::NotFound);
        }
        let tx: TxResponse = response
            .error_for_status()
            .map_err(|e| MinerError::chain_read(CALL, e))?
            .json()
            .await
            .map_err(|e| MinerError::chain_read(CALL, e))?;
        TxStatus::from_api(&tx.tx_status, tx.block_height)
    }

    async fn account_transactions(
        &self,
        address: &str,
        limit: u32,
        offset: u32,
    ) -> Result<AccountTxPage> {
        let path = format!(
            "/extended/v1/address/{}/transactions?limit={}&offset={}",
            address, limit, offset
        );
        self.get_json("getAccountTxs", &path).await
    }
}

/// Deserializers for amounts the API sends either as numbers or strings.
pub(crate) mod de {
    use serde::{Deserialize, Deserializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    fn convert<E: Error>(value: NumOrStr) -> Result<u64, E> {
        match value {
            NumOrStr::Num(n) => Ok(n),
            NumOrStr::Str(s) => s.trim().parse().map_err(E::custom),
        }
    }

    pub fn u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        convert(NumOrStr::deserialize(deserializer)?)
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        Option::<NumOrStr>::deserialize(deserializer)?
            .map(convert)
            .transpose()
    }
}
