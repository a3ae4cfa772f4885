//! Mining module - commit/fee strategy and the scheduling loop
//!
//! Split along the decisions each step makes:
//! - what to commit (`commit`) and what to pay (`fee`)
//! - when to submit (`waiter`)
//! - who confirms the session settings (`operator`)
//! - how cycles follow each other (`runner`)

pub mod commit;
pub mod config;
pub mod fee;
pub mod operator;
pub mod runner;
pub mod waiter;

pub use commit::{ClampWarning, CommitEstimate, clamp_commit, estimate_commit};
pub use config::{City, CommitMode, FeeMode, MiningConfig, MiningStrategy, RunMode, Timings};
pub use fee::{FeeEstimate, estimate_fee};
pub use operator::{ConsoleOperator, Operator, PresetOperator};
pub use runner::{CycleResult, MiningRunner, RunState, RunSummary};
pub use waiter::{BlockPoll, BlockWaiter, SleepTier};
