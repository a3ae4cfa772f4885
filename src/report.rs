//! Status events and the sinks that present them.

use crate::chain::{ContractId, TxStatus, Txid};
use crate::error::explorer_url;
use crate::mining::commit::{ClampWarning, CommitEstimate};
use crate::mining::config::RunMode;
use crate::mining::fee::FeeEstimate;
use crate::mining::runner::CycleResult;
use crate::mining::waiter::BlockPoll;
use crate::submit::MineManyRequest;
use crate::units::{format_block_eta, format_stx, shorten_address};

use chrono::{DateTime, Local};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

const DIVIDER: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Where the runner is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Configuring,
    Waiting,
    Estimating,
    Submitting,
    Confirming,
    Rescheduling,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Configuring => "configuring",
            Phase::Waiting => "waiting",
            Phase::Estimating => "estimating",
            Phase::Submitting => "submitting",
            Phase::Confirming => "confirming",
            Phase::Rescheduling => "rescheduling",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum EventKind {
    SessionStarted {
        contract: ContractId,
        stx_address: String,
        run_mode: RunMode,
        blocks_per_tx: u32,
        target_height: u64,
    },
    Block(BlockPoll),
    TargetReached {
        height: u64,
    },
    Balance {
        balance: u64,
        height: u64,
    },
    CustomCommit {
        commit: u64,
    },
    CommitEstimated(CommitEstimate),
    CustomFee {
        fee: u64,
    },
    FeeEstimated(FeeEstimate),
    Clamped(ClampWarning),
    CommitPlanned {
        commit: u64,
        max_commit: u64,
        total_commit: u64,
        fee: u64,
    },
    Submitting {
        nonce: u64,
        total_commit: u64,
        delay: Duration,
    },
    /// Assembled but not broadcast.
    DryRun(MineManyRequest),
    Submitted {
        txid: Txid,
    },
    ConfirmationPoll {
        txid: Txid,
        attempt: u32,
        max_attempts: u32,
        status: TxStatus,
    },
    Confirmed(CycleResult),
    Rescheduled {
        next_target: u64,
        /// `None` when mining continuously.
        remaining_runs: Option<u32>,
    },
    Finished {
        cycles: usize,
    },
}

#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub phase: Phase,
    pub at: DateTime<Local>,
    pub kind: EventKind,
}

impl StatusEvent {
    pub fn new(phase: Phase, kind: EventKind) -> Self {
        Self {
            phase,
            at: Local::now(),
            kind,
        }
    }
}

/// Receives every status event the runner produces.
pub trait EventSink {
    fn emit(&self, event: &StatusEvent);
}

/// Events as structured tracing records.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &StatusEvent) {
        let phase = event.phase;
        match &event.kind {
            EventKind::SessionStarted {
                contract,
                stx_address,
                run_mode,
                blocks_per_tx,
                target_height,
            } => info!(%phase, %contract, %stx_address, ?run_mode, blocks_per_tx, target_height, "session started"),
            EventKind::Block(poll) => info!(
                %phase,
                current_height = poll.current_height,
                target_height = poll.target_height,
                mempool_size = poll.mempool_size,
                next_check_secs = ?poll.next_check.map(|d| d.as_secs()),
                "block height"
            ),
            EventKind::TargetReached { height } => info!(%phase, height, "target reached"),
            EventKind::Balance { balance, height } => info!(%phase, balance, height, "balance"),
            EventKind::CustomCommit { commit } => info!(%phase, commit, "custom commit"),
            EventKind::CommitEstimated(estimate) => info!(
                %phase,
                past_avg = estimate.past.average(),
                future_avg = estimate.future.average(),
                target_percentage = estimate.target_percentage,
                commit = estimate.commit,
                "commit estimated"
            ),
            EventKind::CustomFee { fee } => info!(%phase, fee, "custom fee"),
            EventKind::FeeEstimated(estimate) => info!(
                %phase,
                samples = estimate.sample_size,
                average = estimate.average,
                multiplier = estimate.multiplier,
                fee = estimate.fee,
                "fee estimated"
            ),
            EventKind::Clamped(clamp) => warn!(%phase, ?clamp, "commit clamped"),
            EventKind::CommitPlanned {
                commit,
                max_commit,
                total_commit,
                fee,
            } => info!(%phase, commit, max_commit, total_commit, fee, "commit planned"),
            EventKind::Submitting {
                nonce,
                total_commit,
                delay,
            } => info!(%phase, nonce, total_commit, delay_secs = delay.as_secs(), "submitting"),
            EventKind::DryRun(request) => info!(
                %phase,
                contract = %request.contract,
                blocks = request.commits.len(),
                total_commit = request.total_commit(),
                fee = request.fee,
                nonce = request.nonce,
                "dry run, not broadcasting"
            ),
            EventKind::Submitted { txid } => info!(%phase, %txid, "submitted"),
            EventKind::ConfirmationPoll {
                txid,
                attempt,
                max_attempts,
                status,
            } => info!(%phase, %txid, attempt, max_attempts, status = status.label(), "tx status"),
            EventKind::Confirmed(result) => info!(
                %phase,
                txid = %result.txid,
                block_height = result.confirmed_block_height,
                commit = result.commit_per_block,
                total_commit = result.total_commit,
                fee = result.fee,
                "confirmed"
            ),
            EventKind::Rescheduled {
                next_target,
                remaining_runs,
            } => info!(%phase, next_target, ?remaining_runs, "rescheduled"),
            EventKind::Finished { cycles } => info!(%phase, cycles, "finished"),
        }
    }
}

/// Human-oriented terminal output.
pub struct ConsoleSink {
    spinner: Mutex<Option<ProgressBar>>,
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }

    pub fn banner(&self) {
        title("CITYCOINS AUTOMINER");
        println!("Builds and submits CityCoin mining transactions, optionally mining continuously.");
        println!("{}", style("USE AT YOUR OWN RISK.").yellow());
    }

    fn spin(&self, message: String) {
        let Ok(mut guard) = self.spinner.lock() else {
            return;
        };
        let bar = guard.get_or_insert_with(|| {
            let bar = ProgressBar::new_spinner();
            let spinner_style = ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .map(|s| s.tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "))
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(spinner_style);
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        bar.set_message(message);
    }

    fn clear_spinner(&self) {
        if let Ok(mut guard) = self.spinner.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_and_clear();
            }
        }
    }
}

fn title(text: &str) {
    println!("{}", DIVIDER);
    println!("{}", style(text).bold().blue());
    println!("{}", DIVIDER);
}

fn warning(text: String) {
    println!("{}", style(text).yellow());
}

fn stamp(event: &StatusEvent) -> String {
    event.at.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: &StatusEvent) {
        match &event.kind {
            EventKind::Block(poll) => {
                self.spin(block_message(poll));
                return;
            }
            EventKind::ConfirmationPoll {
                txid,
                attempt,
                max_attempts,
                status,
            } if matches!(status, TxStatus::Pending | TxStatus::NotFound) => {
                self.spin(format!(
                    "tx {} {} (attempt {}/{})",
                    shorten_address(txid.as_str()),
                    status.label(),
                    attempt,
                    max_attempts
                ));
                return;
            }
            _ => self.clear_spinner(),
        }

        match &event.kind {
            EventKind::SessionStarted {
                contract,
                stx_address,
                run_mode,
                blocks_per_tx,
                target_height,
            } => {
                title("STATUS: SESSION CONFIGURED");
                println!("contract: {}", contract);
                println!("address: {}", shorten_address(stx_address));
                println!("mining {} blocks per tx", blocks_per_tx);
                match run_mode {
                    RunMode::FixedRuns(n) => println!("runs: {}", n),
                    RunMode::ContinuousFullBalance => println!("runs: continuous"),
                }
                println!("target: {}", target_height);
            }
            // shown by the spinner above
            EventKind::Block(_) => {}
            EventKind::TargetReached { height } => {
                println!("[{}] target reached at block {}", stamp(event), height);
            }
            EventKind::Balance { balance, height } => {
                title("STATUS: BUILDING MINING TX");
                println!("balance: {}", format_stx(*balance));
                println!("current block: {}", height);
            }
            EventKind::CustomCommit { commit } => {
                title("STATUS: CUSTOM COMMIT SET");
                println!("customCommit: {}", format_stx(*commit));
            }
            EventKind::CommitEstimated(estimate) => {
                title("STATUS: CALCULATING COMMIT");
                println!(
                    "past {} blocks avg: {:.0} uSTX",
                    estimate.past.blocks,
                    estimate.past.average()
                );
                println!(
                    "next {} blocks avg: {:.0} uSTX",
                    estimate.future.blocks,
                    estimate.future.average()
                );
                println!("target: {}%", estimate.target_percentage);
                println!("estimate: {}", format_stx(estimate.commit));
            }
            EventKind::CustomFee { fee } => {
                title("STATUS: CUSTOM FEE SET");
                println!("customFee: {}", format_stx(*fee));
            }
            EventKind::FeeEstimated(estimate) => {
                title("STATUS: CALCULATING FEES");
                println!(
                    "avg fee over {} pending txs: {}",
                    estimate.sample_size,
                    format_stx(estimate.average)
                );
                println!("multiplier: {}", estimate.multiplier);
                println!("targetFee: {}", format_stx(estimate.fee));
            }
            EventKind::Clamped(clamp) => match clamp {
                ClampWarning::AboveMaxThreshold { commit, max } => warning(format!(
                    "WARNING: commit {} above max threshold, setting commit to {}",
                    format_stx(*commit),
                    format_stx(*max)
                )),
                ClampWarning::AboveBalance { commit, max_commit } => warning(format!(
                    "WARNING: commit {} above available balance, setting commit to {}",
                    format_stx(*commit),
                    format_stx(*max_commit)
                )),
                ClampWarning::FeeExceedsBalance {
                    commit,
                    fee,
                    new_commit,
                } => warning(format!(
                    "WARNING: commit {} plus fee {} exceeds balance, newCommit: {}",
                    format_stx(*commit),
                    format_stx(*fee),
                    format_stx(*new_commit)
                )),
            },
            EventKind::CommitPlanned {
                commit,
                max_commit,
                total_commit,
                fee,
            } => {
                println!("{}", DIVIDER);
                println!("maxCommit: {}", format_stx(*max_commit));
                println!("commit: {}", format_stx(*commit));
                println!("total commit: {}", format_stx(*total_commit));
                println!("fee: {}", format_stx(*fee));
            }
            EventKind::Submitting {
                nonce,
                total_commit,
                delay,
            } => {
                title("STATUS: SUBMITTING MINING TX");
                println!("total commit: {}", format_stx(*total_commit));
                println!("nonce: {}", nonce);
                println!("pausing {}s before submitting tx", delay.as_secs());
            }
            EventKind::DryRun(request) => {
                title("STATUS: DRY RUN");
                println!("function: {}.mine-many", request.contract);
                println!("blocks: {}", request.commits.len());
                println!("total commit: {}", format_stx(request.total_commit()));
                println!("fee: {}", format_stx(request.fee));
                println!("nonce: {}", request.nonce);
                println!("args: {}", request.function_args().join(" "));
            }
            EventKind::Submitted { txid } => {
                println!("[{}] submitted {}", stamp(event), txid);
                println!("{}", explorer_url(txid));
            }
            EventKind::ConfirmationPoll { txid, status, .. } => {
                println!("[{}] tx {} {}", stamp(event), shorten_address(txid.as_str()), status.label());
            }
            EventKind::Confirmed(result) => {
                let line = format!(
                    "✅ confirmed in block {}: {} per block, {} total",
                    result.confirmed_block_height,
                    format_stx(result.commit_per_block),
                    format_stx(result.total_commit),
                );
                println!("{}", style(line).green());
            }
            EventKind::Rescheduled {
                next_target,
                remaining_runs,
            } => {
                title("STATUS: RESTARTING WITH NEW TARGET");
                println!("newTarget: {}", next_target);
                if let Some(runs) = remaining_runs {
                    println!("remaining runs: {}", runs);
                }
            }
            EventKind::Finished { cycles } => {
                title("STATUS: DONE");
                println!("completed {} mining cycle(s)", cycles);
            }
        }
    }
}

fn block_message(poll: &BlockPoll) -> String {
    let remaining = poll.remaining();
    let next = poll
        .next_check
        .map(format_duration)
        .unwrap_or_else(|| "now".to_string());
    format!(
        "block {} / {} | {} to go (~{}) | mempool {} txs | next check in {}",
        poll.current_height,
        poll.target_height,
        remaining,
        format_block_eta(remaining),
        poll.mempool_size,
        next
    )
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h 0m");
        assert_eq!(format_duration(Duration::from_secs(1800)), "30m 0s");
        assert_eq!(format_duration(Duration::from_secs(10)), "10s");
    }

    #[test]
    fn test_block_message() {
        let poll = BlockPoll {
            current_height: 1000,
            target_height: 1030,
            mempool_size: 12,
            next_check: Some(Duration::from_secs(7200)),
        };
        let message = block_message(&poll);
        assert!(message.contains("block 1000 / 1030"));
        assert!(message.contains("30 to go"));
        assert!(message.contains("5.00 hours"));
        assert!(message.contains("next check in 2h 0m"));
    }

    #[test]
    fn test_console_block_polls_only_drive_spinner() {
        let sink = ConsoleSink::new();
        let poll = BlockPoll {
            current_height: 1030,
            target_height: 1030,
            mempool_size: 0,
            next_check: None,
        };
        sink.emit(&StatusEvent::new(Phase::Waiting, EventKind::Block(poll)));
        assert!(sink.spinner.lock().unwrap().is_some());

        sink.emit(&StatusEvent::new(
            Phase::Waiting,
            EventKind::TargetReached { height: 1030 },
        ));
        assert!(sink.spinner.lock().unwrap().is_none());
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(Phase::Configuring.to_string(), "configuring");
        assert_eq!(Phase::Done.to_string(), "done");
    }
}
