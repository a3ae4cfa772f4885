//! The mining loop: configure once, then wait, estimate, submit, confirm and
//! reschedule until the run count is used up or something fails.

use crate::chain::{ChainReader, Txid, TxStatus};
use crate::error::{MinerError, Result};
use crate::mining::commit::{ClampLimits, clamp_commit, estimate_commit};
use crate::mining::config::{CommitMode, FeeMode, MiningConfig, MiningStrategy, RunMode, Timings};
use crate::mining::fee::estimate_fee;
use crate::mining::operator::Operator;
use crate::mining::waiter::BlockWaiter;
use crate::report::{EventKind, EventSink, Phase, StatusEvent};
use crate::submit::{MineManyRequest, TxSubmitter};
use crate::units::format_stx;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::sleep;
use tracing::info;

const FULL_BALANCE_PROMPT: &str = "Confirm mining with full STX balance?";

/// Mutable between cycles, never during one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    /// `None` mines until a fatal error.
    pub remaining_runs: Option<u32>,
    pub next_target: u64,
    /// Set once while configuring for strategy commits.
    pub strategy: Option<MiningStrategy>,
    pub cycle: u32,
}

/// Outcome of one confirmed `mine-many` transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleResult {
    pub commit_per_block: u64,
    pub total_commit: u64,
    pub fee: u64,
    pub nonce: u64,
    pub txid: Txid,
    pub confirmed_block_height: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: Vec<CycleResult>,
    /// The request a dry run stopped at.
    pub dry_run: Option<MineManyRequest>,
}

struct CyclePlan {
    commit: u64,
    fee: u64,
}

pub struct MiningRunner<'a, R, S> {
    reader: &'a R,
    submitter: &'a S,
    operator: &'a dyn Operator,
    sink: &'a dyn EventSink,
    config: MiningConfig,
    timings: Timings,
    interrupt: Arc<AtomicBool>,
    dry_run: bool,
}

impl<'a, R: ChainReader, S: TxSubmitter> MiningRunner<'a, R, S> {
    pub fn new(
        reader: &'a R,
        submitter: &'a S,
        operator: &'a dyn Operator,
        sink: &'a dyn EventSink,
        config: MiningConfig,
        timings: Timings,
    ) -> Self {
        Self {
            reader,
            submitter,
            operator,
            sink,
            config,
            timings,
            interrupt: Arc::new(AtomicBool::new(false)),
            dry_run: false,
        }
    }

    /// Once set, the runner stops before starting another cycle.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn emit(&self, phase: Phase, kind: EventKind) {
        self.sink.emit(&StatusEvent::new(phase, kind));
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let mut state = self.configure().await?;
        let mut summary = RunSummary::default();

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                return Err(MinerError::ConfigurationCancelled(format!(
                    "stop requested after {} cycle(s)",
                    summary.cycles.len()
                )));
            }
            state.cycle += 1;
            info!(cycle = state.cycle, target = state.next_target, "starting cycle");

            self.wait(state.next_target).await?;
            let plan = self.estimate(&state).await?;
            let request = self.assemble(&plan).await?;

            if self.dry_run {
                self.emit(Phase::Submitting, EventKind::DryRun(request.clone()));
                summary.dry_run = Some(request);
                self.emit(Phase::Done, EventKind::Finished { cycles: 0 });
                return Ok(summary);
            }

            let txid = self.submit(&request).await?;
            let confirmed_block_height = self.await_confirmation(&txid).await?;
            let result = CycleResult {
                commit_per_block: plan.commit,
                total_commit: request.total_commit(),
                fee: plan.fee,
                nonce: request.nonce,
                txid,
                confirmed_block_height,
            };
            self.emit(Phase::Confirming, EventKind::Confirmed(result.clone()));
            summary.cycles.push(result);

            if let Some(runs) = state.remaining_runs.as_mut() {
                *runs -= 1;
                if *runs == 0 {
                    self.emit(
                        Phase::Done,
                        EventKind::Finished {
                            cycles: summary.cycles.len(),
                        },
                    );
                    return Ok(summary);
                }
            }
            state.next_target = confirmed_block_height + self.config.blocks_per_tx as u64;
            self.emit(
                Phase::Rescheduling,
                EventKind::Rescheduled {
                    next_target: state.next_target,
                    remaining_runs: state.remaining_runs,
                },
            );
        }
    }

    fn require(&self, prompt: &str) -> Result<()> {
        if self.operator.confirm(prompt)? {
            Ok(())
        } else {
            Err(MinerError::ConfigurationCancelled(prompt.to_string()))
        }
    }

    async fn configure(&self) -> Result<RunState> {
        self.config.validate()?;
        self.timings.validate()?;
        let current_height = self.reader.current_height().await?;
        self.config.check_target(current_height)?;

        let strategy = match self.config.commit_mode {
            CommitMode::Strategy => {
                let strategy = self.operator.strategy()?;
                strategy.validate()?;
                self.require(&format!(
                    "Confirm max commit per block of {}?",
                    format_stx(strategy.max_commit_per_block)
                ))?;
                Some(strategy)
            }
            CommitMode::Custom(commit) => {
                self.require(&format!(
                    "Confirm custom commit of {} per block?",
                    format_stx(commit)
                ))?;
                None
            }
        };
        if let FeeMode::Custom(fee) = self.config.fee_mode {
            self.require(&format!("Confirm custom fee of {}?", format_stx(fee)))?;
        }
        if self.config.run_mode == RunMode::ContinuousFullBalance {
            self.require(FULL_BALANCE_PROMPT)?;
        }

        let next_target = if self.config.start_now {
            current_height
        } else {
            self.config.target_block_height
        };
        let remaining_runs = match self.config.run_mode {
            RunMode::FixedRuns(n) => Some(n),
            RunMode::ContinuousFullBalance => None,
        };

        self.emit(
            Phase::Configuring,
            EventKind::SessionStarted {
                contract: self.config.contract.clone(),
                stx_address: self.config.stx_address.clone(),
                run_mode: self.config.run_mode,
                blocks_per_tx: self.config.blocks_per_tx,
                target_height: next_target,
            },
        );
        Ok(RunState {
            remaining_runs,
            next_target,
            strategy,
            cycle: 0,
        })
    }

    async fn wait(&self, target: u64) -> Result<u64> {
        let waiter = BlockWaiter::new(self.reader, self.timings);
        let height = waiter
            .wait_for(target, |poll| {
                if poll.next_check.is_some() {
                    self.emit(Phase::Waiting, EventKind::Block(*poll));
                }
            })
            .await?;
        self.emit(Phase::Waiting, EventKind::TargetReached { height });
        Ok(height)
    }

    async fn estimate(&self, state: &RunState) -> Result<CyclePlan> {
        let balance = self.reader.balance(&self.config.stx_address).await?;
        let height = self.reader.current_height().await?;
        self.emit(Phase::Estimating, EventKind::Balance { balance, height });

        let (commit, max_per_block) = match (self.config.commit_mode, state.strategy) {
            (CommitMode::Custom(commit), _) => {
                self.emit(Phase::Estimating, EventKind::CustomCommit { commit });
                (commit, None)
            }
            (CommitMode::Strategy, Some(strategy)) => {
                let estimate =
                    estimate_commit(self.reader, height, &strategy, &self.config.contract).await?;
                self.emit(Phase::Estimating, EventKind::CommitEstimated(estimate));
                (estimate.commit, Some(strategy.max_commit_per_block))
            }
            (CommitMode::Strategy, None) => {
                return Err(MinerError::InvalidConfig("no mining strategy set".to_string()));
            }
        };

        let fee = match self.config.fee_mode {
            FeeMode::Custom(fee) => {
                self.emit(Phase::Estimating, EventKind::CustomFee { fee });
                fee
            }
            FeeMode::Multiplier(multiplier) => {
                let estimate = estimate_fee(self.reader, multiplier).await?;
                self.emit(Phase::Estimating, EventKind::FeeEstimated(estimate));
                estimate.fee
            }
        };

        let clamped = clamp_commit(
            commit,
            &ClampLimits {
                max_per_block,
                balance,
                blocks_per_tx: self.config.blocks_per_tx,
                fee,
            },
        )?;
        for warning in &clamped.warnings {
            self.emit(Phase::Estimating, EventKind::Clamped(*warning));
        }
        self.emit(
            Phase::Estimating,
            EventKind::CommitPlanned {
                commit: clamped.commit,
                max_commit: clamped.max_commit,
                total_commit: clamped.total_commit(self.config.blocks_per_tx),
                fee,
            },
        );
        Ok(CyclePlan {
            commit: clamped.commit,
            fee,
        })
    }

    async fn assemble(&self, plan: &CyclePlan) -> Result<MineManyRequest> {
        let nonce = self.reader.nonce(&self.config.stx_address).await?;
        Ok(MineManyRequest::new(
            self.config.contract.clone(),
            self.config.stx_address.clone(),
            plan.commit,
            self.config.blocks_per_tx,
            plan.fee,
            nonce,
        ))
    }

    async fn submit(&self, request: &MineManyRequest) -> Result<Txid> {
        let delay = self.timings.presubmit_delay();
        self.emit(
            Phase::Submitting,
            EventKind::Submitting {
                nonce: request.nonce,
                total_commit: request.total_commit(),
                delay,
            },
        );
        sleep(delay).await;
        let txid = self.submitter.submit(request).await?;
        self.emit(Phase::Submitting, EventKind::Submitted { txid: txid.clone() });
        Ok(txid)
    }

    /// First check right away, then one per interval.
    async fn await_confirmation(&self, txid: &Txid) -> Result<u64> {
        let max_attempts = self.timings.confirm_max_attempts;
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                sleep(self.timings.confirm_interval()).await;
            }
            let status = self.reader.tx_status(txid).await?;
            self.emit(
                Phase::Confirming,
                EventKind::ConfirmationPoll {
                    txid: txid.clone(),
                    attempt,
                    max_attempts,
                    status: status.clone(),
                },
            );
            match status {
                TxStatus::Success { block_height } => return Ok(block_height),
                TxStatus::Rejected(status) => {
                    return Err(MinerError::TransactionRejected {
                        txid: txid.clone(),
                        status,
                    });
                }
                TxStatus::Pending | TxStatus::NotFound => {}
            }
        }
        Err(MinerError::ConfirmationTimeout {
            txid: txid.clone(),
            attempts: max_attempts,
        })
    }
}
