//! Fee estimation from mempool fee rates.

use crate::chain::ChainReader;
use crate::error::{MinerError, Result};
use tracing::debug;

/// Number of pending transactions sampled.
pub const FEE_SAMPLE_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeEstimate {
    pub sample_size: usize,
    /// Mean fee rate of the sample, rounded to whole uSTX.
    pub average: u64,
    pub multiplier: f64,
    /// `average * multiplier`, rounded to whole uSTX.
    pub fee: u64,
}

/// Average `rates` and scale by `multiplier`.
pub fn fee_from_rates(rates: &[u64], multiplier: f64) -> Result<FeeEstimate> {
    if rates.is_empty() {
        return Err(MinerError::FeeEstimation(
            "no pending transactions to sample fee rates from".to_string(),
        ));
    }
    let sum: u128 = rates.iter().map(|&r| r as u128).sum();
    let mean = sum as f64 / rates.len() as f64;
    Ok(FeeEstimate {
        sample_size: rates.len(),
        average: mean.round() as u64,
        multiplier,
        fee: (mean * multiplier).round() as u64,
    })
}

pub async fn estimate_fee<R: ChainReader>(reader: &R, multiplier: f64) -> Result<FeeEstimate> {
    let rates = reader.mempool_fee_rates(FEE_SAMPLE_SIZE).await?;
    let estimate = fee_from_rates(&rates, multiplier)?;
    debug!(
        samples = estimate.sample_size,
        average = estimate.average,
        fee = estimate.fee,
        "fee estimate"
    );
    Ok(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;

    #[test]
    fn test_mean_times_multiplier() {
        let estimate = fee_from_rates(&[100, 200, 300], 1.5).unwrap();
        assert_eq!(estimate.sample_size, 3);
        assert_eq!(estimate.average, 200);
        assert_eq!(estimate.fee, 300);
    }

    #[test]
    fn test_fractional_mean_rounds() {
        let estimate = fee_from_rates(&[1, 2], 1.0).unwrap();
        assert_eq!(estimate.fee, 2);
        let estimate = fee_from_rates(&[1000, 1001, 1001], 0.5).unwrap();
        assert_eq!(estimate.fee, 500);
    }

    #[test]
    fn test_empty_sample_is_an_error() {
        assert!(matches!(
            fee_from_rates(&[], 1.0),
            Err(MinerError::FeeEstimation(_))
        ));
    }

    #[tokio::test]
    async fn test_estimate_caps_sample_size() {
        let rates: Vec<u64> = (0..250).map(|i| if i < 200 { 1_000 } else { 1_000_000 }).collect();
        let chain = MockChain::frozen(100).with_fee_rates(rates);
        let estimate = estimate_fee(&chain, 2.0).await.unwrap();
        assert_eq!(estimate.sample_size, FEE_SAMPLE_SIZE);
        assert_eq!(estimate.fee, 2_000);
    }

    #[tokio::test]
    async fn test_estimate_empty_mempool() {
        let chain = MockChain::frozen(100).with_fee_rates(vec![]);
        assert!(estimate_fee(&chain, 1.0).await.is_err());
    }
}
