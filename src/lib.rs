// CityCoin autominer library
pub mod chain;
pub mod config;
pub mod error;
pub mod history;
pub mod mining;
pub mod report;
pub mod submit;
pub mod units;

// Re-export for convenience
pub use chain::{ChainReader, ContractId, HttpChainReader, TxStatus, Txid};
pub use error::{MinerError, Result};
pub use mining::{MiningConfig, MiningRunner, MiningStrategy, RunSummary};
pub use report::{ConsoleSink, EventSink, LogSink, StatusEvent};
pub use submit::{MineManyRequest, SignerSubmitter, TxSubmitter};
