//! Commit estimation and the clamps applied before submitting.
//!
//! The estimate blends two windows of per-block commit totals around the
//! current height:
//! - past: `[height - distance, height)`
//! - future: `(height, height + distance]`, mostly empty blocks unless
//!   other miners have already committed to them
//!
//! and aims for `target_percentage` of their average.

use crate::chain::{ChainReader, ContractId};
use crate::error::{MinerError, Result};
use crate::mining::config::MiningStrategy;

use std::ops::Range;
use tracing::debug;

/// Sum of mining stats over a window of blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatWindow {
    pub total: u128,
    pub blocks: u64,
}

impl StatWindow {
    pub fn from_stats(stats: &[u64]) -> Self {
        Self {
            total: stats.iter().map(|&s| s as u128).sum(),
            blocks: stats.len() as u64,
        }
    }

    /// Mean commit per block, for display only.
    pub fn average(&self) -> f64 {
        if self.blocks == 0 {
            0.0
        } else {
            self.total as f64 / self.blocks as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitEstimate {
    pub height: u64,
    pub past: StatWindow,
    pub future: StatWindow,
    pub target_percentage: u8,
    pub commit: u64,
}

pub fn past_window(height: u64, distance: u32) -> Range<u64> {
    height.saturating_sub(distance as u64)..height
}

pub fn future_window(height: u64, distance: u32) -> Range<u64> {
    height.saturating_add(1)..height.saturating_add(distance as u64 + 1)
}

/// `round((past_avg * pct / 100 + future_avg * pct / 100) / 2)` in exact
/// integer arithmetic, rounding halves up.
pub fn blended_commit(past: StatWindow, future: StatWindow, target_percentage: u8) -> u64 {
    let past_blocks = past.blocks.max(1) as u128;
    let future_blocks = future.blocks.max(1) as u128;
    let numerator =
        (past.total * future_blocks + future.total * past_blocks) * target_percentage as u128;
    let denominator = past_blocks * future_blocks * 200;
    let rounded = (numerator + denominator / 2) / denominator;
    u64::try_from(rounded).unwrap_or(u64::MAX)
}

async fn collect_window<R: ChainReader>(
    reader: &R,
    contract: &ContractId,
    heights: Range<u64>,
) -> Result<StatWindow> {
    let mut window = StatWindow::default();
    for height in heights {
        window.total += reader.mining_stat_at(contract, height).await? as u128;
        window.blocks += 1;
    }
    Ok(window)
}

pub async fn estimate_commit<R: ChainReader>(
    reader: &R,
    current_height: u64,
    strategy: &MiningStrategy,
    contract: &ContractId,
) -> Result<CommitEstimate> {
    let distance = strategy.search_distance;
    let past = collect_window(reader, contract, past_window(current_height, distance)).await?;
    let future = collect_window(reader, contract, future_window(current_height, distance)).await?;
    let commit = blended_commit(past, future, strategy.target_percentage);
    debug!(
        current_height,
        distance,
        past_avg = past.average(),
        future_avg = future.average(),
        commit,
        "commit estimate"
    );
    Ok(CommitEstimate {
        height: current_height,
        past,
        future,
        target_percentage: strategy.target_percentage,
        commit,
    })
}

/// Bounds a commit must respect before it goes into a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampLimits {
    /// Strategy threshold; custom commits carry none.
    pub max_per_block: Option<u64>,
    pub balance: u64,
    pub blocks_per_tx: u32,
    pub fee: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClampWarning {
    AboveMaxThreshold { commit: u64, max: u64 },
    AboveBalance { commit: u64, max_commit: u64 },
    FeeExceedsBalance { commit: u64, fee: u64, new_commit: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClampedCommit {
    pub commit: u64,
    /// `balance / blocks_per_tx`
    pub max_commit: u64,
    pub warnings: Vec<ClampWarning>,
}

impl ClampedCommit {
    pub fn total_commit(&self, blocks_per_tx: u32) -> u64 {
        self.commit * blocks_per_tx as u64
    }
}

fn outlay(commit: u64, limits: &ClampLimits) -> u128 {
    commit as u128 * limits.blocks_per_tx as u128 + limits.fee as u128
}

/// Apply the threshold, balance and fee clamps in that order.
///
/// On success `commit * blocks_per_tx + fee < balance` and `commit > 0`.
pub fn clamp_commit(commit: u64, limits: &ClampLimits) -> Result<ClampedCommit> {
    let blocks = limits.blocks_per_tx.max(1) as u64;
    let mut commit = commit;
    let mut warnings = Vec::new();

    if let Some(max) = limits.max_per_block {
        if commit > max {
            warnings.push(ClampWarning::AboveMaxThreshold { commit, max });
            commit = max;
        }
    }

    let max_commit = limits.balance / blocks;
    if commit > max_commit {
        warnings.push(ClampWarning::AboveBalance { commit, max_commit });
        commit = max_commit;
    }

    if outlay(commit, limits) >= limits.balance as u128 {
        let new_commit = commit.saturating_sub(limits.fee / blocks);
        warnings.push(ClampWarning::FeeExceedsBalance {
            commit,
            fee: limits.fee,
            new_commit,
        });
        commit = new_commit;
    }

    if commit == 0 || outlay(commit, limits) >= limits.balance as u128 {
        return Err(MinerError::InsufficientBalance {
            balance: limits.balance,
            fee: limits.fee,
            blocks: limits.blocks_per_tx,
        });
    }

    Ok(ClampedCommit {
        commit,
        max_commit,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::mining::config::City;
    use proptest::prelude::*;

    fn strategy(distance: u32, pct: u8, max: u64) -> MiningStrategy {
        MiningStrategy {
            search_distance: distance,
            target_percentage: pct,
            max_commit_per_block: max,
        }
    }

    #[test]
    fn test_windows() {
        assert_eq!(past_window(1000, 5), 995..1000);
        assert_eq!(future_window(1000, 5), 1001..1006);
        assert_eq!(past_window(3, 5), 0..3);
        assert!(past_window(0, 5).is_empty());
    }

    #[tokio::test]
    async fn test_estimate_matches_worked_example() {
        let chain = MockChain::frozen(1000).with_mining_stats([
            (995, 100),
            (996, 200),
            (997, 100),
            (998, 200),
            (999, 100),
            // the current block is in neither window
            (1000, 1_000_000),
        ]);
        let contract = City::Mia.contract();
        let estimate = estimate_commit(&chain, 1000, &strategy(5, 50, 30), &contract)
            .await
            .unwrap();
        assert_eq!(estimate.past.average(), 140.0);
        assert_eq!(estimate.future.average(), 0.0);
        assert_eq!(estimate.commit, 35);

        let clamped = clamp_commit(
            estimate.commit,
            &ClampLimits {
                max_per_block: Some(30),
                balance: 1_000_000,
                blocks_per_tx: 10,
                fee: 150,
            },
        )
        .unwrap();
        assert_eq!(clamped.commit, 30);
        assert_eq!(
            clamped.warnings,
            vec![ClampWarning::AboveMaxThreshold { commit: 35, max: 30 }]
        );
    }

    #[tokio::test]
    async fn test_future_commits_raise_the_estimate() {
        let chain = MockChain::frozen(500)
            .with_mining_stats((496..=500).map(|h| (h, 1_000)))
            .with_mining_stats((501..=505).map(|h| (h, 3_000)));
        let estimate = estimate_commit(&chain, 500, &strategy(4, 10, 0), &City::Nyc.contract())
            .await
            .unwrap();
        // past 496..=499 avg 1000, future 501..=504 avg 3000: (100 + 300) / 2
        assert_eq!(estimate.commit, 200);
    }

    #[tokio::test]
    async fn test_estimate_at_genesis() {
        let chain = MockChain::frozen(0).with_mining_stats([(1, 400)]);
        let estimate = estimate_commit(&chain, 0, &strategy(1, 100, 0), &City::Mia.contract())
            .await
            .unwrap();
        assert_eq!(estimate.past, StatWindow::default());
        assert_eq!(estimate.commit, 200);
    }

    #[test]
    fn test_no_fee_adjustment_when_funds_suffice() {
        let clamped = clamp_commit(
            30,
            &ClampLimits {
                max_per_block: None,
                balance: 1000,
                blocks_per_tx: 10,
                fee: 150,
            },
        )
        .unwrap();
        assert_eq!(clamped.commit, 30);
        assert_eq!(clamped.total_commit(10), 300);
        assert!(clamped.warnings.is_empty());
    }

    #[test]
    fn test_fee_share_subtracted_when_total_reaches_balance() {
        let clamped = clamp_commit(
            30,
            &ClampLimits {
                max_per_block: None,
                balance: 400,
                blocks_per_tx: 10,
                fee: 150,
            },
        )
        .unwrap();
        assert_eq!(clamped.commit, 15);
        assert_eq!(clamped.total_commit(10) + 150, 300);
        assert_eq!(
            clamped.warnings,
            vec![ClampWarning::FeeExceedsBalance {
                commit: 30,
                fee: 150,
                new_commit: 15
            }]
        );
    }

    #[test]
    fn test_balance_clamp_then_fee_clamp() {
        let clamped = clamp_commit(
            100,
            &ClampLimits {
                max_per_block: Some(1_000),
                balance: 505,
                blocks_per_tx: 10,
                fee: 100,
            },
        )
        .unwrap();
        // 100 -> 50 (balance / blocks) -> 40 (fee share), 400 + 100 < 505
        assert_eq!(clamped.commit, 40);
        assert_eq!(clamped.max_commit, 50);
        assert_eq!(clamped.warnings.len(), 2);
    }

    #[test]
    fn test_fee_clamp_landing_on_balance_is_fatal() {
        // 100 -> 50 -> 40, but 400 + 100 is not below 500
        let result = clamp_commit(
            100,
            &ClampLimits {
                max_per_block: Some(1_000),
                balance: 500,
                blocks_per_tx: 10,
                fee: 100,
            },
        );
        assert!(matches!(result, Err(MinerError::InsufficientBalance { .. })));
    }

    #[test]
    fn test_fee_larger_than_balance_is_fatal() {
        let result = clamp_commit(
            30,
            &ClampLimits {
                max_per_block: None,
                balance: 100,
                blocks_per_tx: 10,
                fee: 150,
            },
        );
        assert!(matches!(result, Err(MinerError::InsufficientBalance { .. })));
    }

    #[test]
    fn test_fee_remainder_still_violating_is_fatal() {
        // 11 * 10 + 19 = 129 >= 120, minus 19 / 10 = 1 per block: 100 + 19 = 119 < 120
        assert_eq!(
            clamp_commit(
                11,
                &ClampLimits {
                    max_per_block: None,
                    balance: 120,
                    blocks_per_tx: 10,
                    fee: 19
                }
            )
            .unwrap()
            .commit,
            10
        );
        // 10 * 10 + 9 = 109 >= 101, fee share rounds to 0 so nothing changes
        assert!(clamp_commit(
            10,
            &ClampLimits {
                max_per_block: None,
                balance: 101,
                blocks_per_tx: 10,
                fee: 9
            }
        )
        .is_err());
    }

    proptest! {
        #[test]
        fn prop_blend_matches_float_formula(
            pct in 1u8..=100,
            past in prop::collection::vec(0u64..1_000_000_000_000, 1..=100),
            future in prop::collection::vec(0u64..1_000_000_000_000, 1..=100),
        ) {
            let past_w = StatWindow::from_stats(&past);
            let future_w = StatWindow::from_stats(&future);
            let commit = blended_commit(past_w, future_w, pct);
            let pct = pct as f64;
            let expected = (past_w.average() * pct / 100.0 + future_w.average() * pct / 100.0) / 2.0;
            prop_assert!((commit as f64 - expected).abs() <= 0.5 + expected * 1e-12 + 1e-9,
                "commit {} expected {}", commit, expected);
        }

        #[test]
        fn prop_clamp_is_idempotent(
            commit in 0u64..10_000_000_000_000,
            max in prop::option::of(0u64..10_000_000_000),
            balance in 0u64..10_000_000_000_000,
            blocks in 1u32..=200,
            fee in 0u64..1_000_000_000,
        ) {
            let limits = ClampLimits { max_per_block: max, balance, blocks_per_tx: blocks, fee };
            if let Ok(first) = clamp_commit(commit, &limits) {
                let second = clamp_commit(first.commit, &limits).unwrap();
                prop_assert_eq!(second.commit, first.commit);
                prop_assert!(second.warnings.is_empty());
            }
        }

        #[test]
        fn prop_outlay_stays_below_balance(
            commit in 0u64..10_000_000_000_000,
            balance in 0u64..10_000_000_000_000,
            blocks in 1u32..=200,
            fee in 0u64..1_000_000_000,
        ) {
            let limits = ClampLimits { max_per_block: None, balance, blocks_per_tx: blocks, fee };
            match clamp_commit(commit, &limits) {
                Ok(clamped) => {
                    prop_assert!(clamped.commit > 0);
                    prop_assert!(
                        clamped.commit as u128 * blocks as u128 + (fee as u128) < balance as u128
                    );
                }
                Err(e) => prop_assert!(
                    matches!(e, MinerError::InsufficientBalance { .. }),
                    "unexpected error {:?}",
                    e
                ),
            }
            if balance <= fee {
                prop_assert!(clamp_commit(commit, &limits).is_err());
            }
        }
    }
}
