//! In-memory chain for tests.
//!
//! Height advances with tokio's clock, so under `start_paused = true` a
//! two-hour sleep moves the tip twelve blocks without any real waiting.

use super::{AccountTx, AccountTxPage, ChainReader, ContractId, TxStatus, Txid};
use crate::error::{MinerError, Result};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) const BLOCK_TIME: Duration = Duration::from_secs(600);

#[derive(Default)]
struct MockState {
    balance: u64,
    nonce: u64,
    mempool_size: u64,
    fee_rates: Vec<u64>,
    mining_stats: HashMap<u64, u64>,
    status_polls: HashMap<Txid, u32>,
    confirm_after: u32,
    reject_with: Option<String>,
    history: Vec<AccountTx>,
    height_reads: u32,
    fail_heights: bool,
}

pub(crate) struct MockChain {
    start: Instant,
    base_height: u64,
    block_time: Option<Duration>,
    state: Mutex<MockState>,
}

impl MockChain {
    /// Chain at `base_height` producing one block every ten minutes.
    pub fn new(base_height: u64) -> Self {
        Self {
            start: Instant::now(),
            base_height,
            block_time: Some(BLOCK_TIME),
            state: Mutex::new(MockState {
                balance: 1_000_000_000,
                fee_rates: vec![1_000],
                ..Default::default()
            }),
        }
    }

    /// Chain whose tip never moves.
    pub fn frozen(height: u64) -> Self {
        Self {
            block_time: None,
            ..Self::new(height)
        }
    }

    fn with_state(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_balance(self, balance: u64) -> Self {
        self.with_state(|s| s.balance = balance)
    }

    pub fn with_nonce(self, nonce: u64) -> Self {
        self.with_state(|s| s.nonce = nonce)
    }

    pub fn with_mempool_size(self, size: u64) -> Self {
        self.with_state(|s| s.mempool_size = size)
    }

    pub fn with_fee_rates(self, rates: Vec<u64>) -> Self {
        self.with_state(|s| s.fee_rates = rates)
    }

    pub fn with_mining_stats(self, stats: impl IntoIterator<Item = (u64, u64)>) -> Self {
        self.with_state(|s| s.mining_stats.extend(stats))
    }

    /// Report `pending` for the first `polls` status checks of each txid.
    pub fn confirm_after(self, polls: u32) -> Self {
        self.with_state(|s| s.confirm_after = polls)
    }

    pub fn reject_with(self, status: &str) -> Self {
        self.with_state(|s| s.reject_with = Some(status.to_string()))
    }

    pub fn with_history(self, history: Vec<AccountTx>) -> Self {
        self.with_state(|s| s.history = history)
    }

    pub fn failing_heights(self) -> Self {
        self.with_state(|s| s.fail_heights = true)
    }

    pub fn height_reads(&self) -> u32 {
        self.state.lock().unwrap().height_reads
    }

    pub fn status_polls(&self, txid: &Txid) -> u32 {
        self.state
            .lock()
            .unwrap()
            .status_polls
            .get(txid)
            .copied()
            .unwrap_or(0)
    }

    fn tip(&self) -> u64 {
        match self.block_time {
            Some(block_time) => {
                let elapsed = self.start.elapsed().as_secs() / block_time.as_secs();
                self.base_height + elapsed
            }
            None => self.base_height,
        }
    }
}

impl ChainReader for MockChain {
    async fn current_height(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.height_reads += 1;
        if state.fail_heights {
            return Err(MinerError::chain_read("getBlockHeight", "connection refused"));
        }
        Ok(self.tip())
    }

    async fn balance(&self, _address: &str) -> Result<u64> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn nonce(&self, _address: &str) -> Result<u64> {
        Ok(self.state.lock().unwrap().nonce)
    }

    async fn mempool_size(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().mempool_size)
    }

    async fn mempool_fee_rates(&self, limit: usize) -> Result<Vec<u64>> {
        let state = self.state.lock().unwrap();
        Ok(state.fee_rates.iter().copied().take(limit).collect())
    }

    async fn mining_stat_at(&self, _contract: &ContractId, height: u64) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state.mining_stats.get(&height).copied().unwrap_or(0))
    }

    async fn tx_status(&self, txid: &Txid) -> Result<TxStatus> {
        let tip = self.tip();
        let mut state = self.state.lock().unwrap();
        let polls = {
            let polls = state.status_polls.entry(txid.clone()).or_insert(0);
            *polls += 1;
            *polls
        };
        if polls <= state.confirm_after {
            return Ok(TxStatus::Pending);
        }
        match &state.reject_with {
            Some(status) => Ok(TxStatus::Rejected(status.clone())),
            None => Ok(TxStatus::Success { block_height: tip }),
        }
    }

    async fn account_transactions(
        &self,
        _address: &str,
        limit: u32,
        offset: u32,
    ) -> Result<AccountTxPage> {
        let state = self.state.lock().unwrap();
        let results = state
            .history
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(AccountTxPage {
            total: state.history.len() as u64,
            results,
        })
    }
}
