//! Waiting for a target block height.

use crate::chain::ChainReader;
use crate::error::Result;
use crate::mining::config::Timings;

use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// More than this many blocks to go selects the slowest poll.
pub const FAR_THRESHOLD: u64 = 25;
/// At or below this many blocks to go selects the fastest poll.
pub const IMMINENT_THRESHOLD: u64 = 5;

/// Poll cadence by distance to the target, tuned to ~10 minute blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTier {
    Far,
    Near,
    Imminent,
}

impl SleepTier {
    pub fn for_remaining(remaining: u64) -> Self {
        if remaining > FAR_THRESHOLD {
            SleepTier::Far
        } else if remaining > IMMINENT_THRESHOLD {
            SleepTier::Near
        } else {
            SleepTier::Imminent
        }
    }

    pub fn duration(self, timings: &Timings) -> Duration {
        let secs = match self {
            SleepTier::Far => timings.far_poll_secs,
            SleepTier::Near => timings.near_poll_secs,
            SleepTier::Imminent => timings.imminent_poll_secs,
        };
        Duration::from_secs(secs)
    }
}

/// What one poll observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPoll {
    pub current_height: u64,
    pub target_height: u64,
    pub mempool_size: u64,
    /// Sleep before the next poll, `None` once the target is reached.
    pub next_check: Option<Duration>,
}

impl BlockPoll {
    pub fn remaining(&self) -> u64 {
        self.target_height.saturating_sub(self.current_height)
    }
}

pub struct BlockWaiter<'a, R> {
    reader: &'a R,
    timings: Timings,
}

impl<'a, R: ChainReader> BlockWaiter<'a, R> {
    pub fn new(reader: &'a R, timings: Timings) -> Self {
        Self { reader, timings }
    }

    /// Poll until the chain tip reaches `target_height` and return the height
    /// that satisfied it.
    ///
    /// The first check happens immediately. Only a failed read ends the wait
    /// early.
    pub async fn wait_for(
        &self,
        target_height: u64,
        mut on_poll: impl FnMut(&BlockPoll),
    ) -> Result<u64> {
        loop {
            let current_height = self.reader.current_height().await?;
            let mempool_size = self.reader.mempool_size().await?;
            let remaining = target_height.saturating_sub(current_height);
            let next_check =
                (remaining > 0).then(|| SleepTier::for_remaining(remaining).duration(&self.timings));

            let poll = BlockPoll {
                current_height,
                target_height,
                mempool_size,
                next_check,
            };
            debug!(current_height, target_height, mempool_size, ?next_check, "block poll");
            on_poll(&poll);

            match next_check {
                None => return Ok(current_height),
                Some(delay) => sleep(delay).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::error::MinerError;
    use tokio::time::Instant;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(SleepTier::for_remaining(26), SleepTier::Far);
        assert_eq!(SleepTier::for_remaining(25), SleepTier::Near);
        assert_eq!(SleepTier::for_remaining(6), SleepTier::Near);
        assert_eq!(SleepTier::for_remaining(5), SleepTier::Imminent);
        assert_eq!(SleepTier::for_remaining(1), SleepTier::Imminent);

        let timings = Timings::default();
        assert_eq!(SleepTier::Far.duration(&timings), Duration::from_secs(7200));
        assert_eq!(SleepTier::Near.duration(&timings), Duration::from_secs(1800));
        assert_eq!(SleepTier::Imminent.duration(&timings), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reached_target_returns_without_sleeping() {
        let chain = MockChain::new(1000).with_mempool_size(42);
        let started = Instant::now();
        let mut polls = Vec::new();

        let height = BlockWaiter::new(&chain, Timings::default())
            .wait_for(1000, |p| polls.push(*p))
            .await
            .unwrap();

        assert_eq!(height, 1000);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(chain.height_reads(), 1);
        assert_eq!(polls.len(), 1);
        assert_eq!(polls[0].mempool_size, 42);
        assert_eq!(polls[0].next_check, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_passed_target_counts_as_reached() {
        let chain = MockChain::new(1200);
        let height = BlockWaiter::new(&chain, Timings::default())
            .wait_for(1000, |_| {})
            .await
            .unwrap();
        assert_eq!(height, 1200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_tighten_as_target_approaches() {
        let chain = MockChain::new(1000);
        let started = Instant::now();
        let mut polls = Vec::new();

        let height = BlockWaiter::new(&chain, Timings::default())
            .wait_for(1030, |p| polls.push(*p))
            .await
            .unwrap();

        assert_eq!(height, 1030);
        assert_eq!(started.elapsed().as_secs(), 5 * 60 * 60);

        let heights: Vec<u64> = polls.iter().map(|p| p.current_height).collect();
        assert_eq!(
            heights,
            vec![1000, 1012, 1015, 1018, 1021, 1024, 1027, 1027, 1028, 1028, 1029, 1029, 1030]
        );
        assert_eq!(polls[0].next_check, Some(Duration::from_secs(7200)));
        assert_eq!(polls[1].next_check, Some(Duration::from_secs(1800)));
        assert_eq!(polls[6].next_check, Some(Duration::from_secs(300)));
        assert_eq!(polls.last().unwrap().next_check, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_aborts_wait() {
        let chain = MockChain::new(1000).failing_heights();
        let result = BlockWaiter::new(&chain, Timings::default())
            .wait_for(1010, |_| {})
            .await;
        assert!(matches!(result, Err(MinerError::ChainRead { .. })));
    }
}
