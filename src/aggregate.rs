//! Pooling of per-chain window statistics into the shared variance estimate
//! that retunes every chain's mass matrix.

use crate::stats::WindowStats;
use ndarray::Array1;
use std::error::Error;

/// Pooled mean and variance across all chains' windows.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledStats {
    /// Total draw count behind the estimate.
    pub n: u64,
    pub mean: Array1<f64>,
    /// Unbiased variance reflecting both within-chain and between-chain
    /// spread.
    pub variance: Array1<f64>,
}

impl PooledStats {
    /// Variance shrunk toward a small diagonal, the Stan regularization
    /// applied before a mass-matrix update:
    /// `n/(n+5) * var + 1e-3 * 5/(n+5)`.
    pub fn regularized_variance(&self) -> Array1<f64> {
        let n = self.n as f64;
        let w = n / (n + 5.0);
        self.variance.mapv(|v| w * v + 1e-3 * (1.0 - w))
    }
}

/// Combines per-chain means and variances into a single pooled estimate.
///
/// Works on sums of squares rather than averaging variances, so the result
/// captures between-chain mean spread as well. Contributions are folded in
/// rank order; given the same inputs every chain computes a bit-identical
/// result, which the warmup controller's decision rule depends on.
pub fn pool(per_chain: &[WindowStats]) -> Result<PooledStats, Box<dyn Error>> {
    let first = per_chain
        .first()
        .ok_or("cannot pool an empty set of window statistics")?;
    let dim = first.mean.len();

    let mut total_n: u64 = 0;
    let mut mean_sum = Array1::<f64>::zeros(dim);
    for stats in per_chain {
        if stats.mean.len() != dim || stats.sm2.len() != dim {
            return Err("window statistics disagree on dimension".into());
        }
        if stats.n < 2 {
            return Err(format!(
                "cannot pool a window with {} draws; degenerate windows must be excluded",
                stats.n
            )
            .into());
        }
        total_n += stats.n;
        mean_sum = mean_sum + &stats.mean * stats.n as f64;
    }
    let grand_mean = mean_sum / total_n as f64;

    // m2 = sum over chains of (n_c - 1) * sm2_c + n_c * (mean_c - mean)^2
    let mut m2 = Array1::<f64>::zeros(dim);
    for stats in per_chain {
        let n_c = stats.n as f64;
        let shift = (&stats.mean - &grand_mean).pow2() * n_c;
        m2 = m2 + &stats.sm2 * (n_c - 1.0) + shift;
    }
    let variance = m2 / (total_n as f64 - 1.0);

    Ok(PooledStats {
        n: total_n,
        mean: grand_mean,
        variance,
    })
}
