//! Windowed accumulation of per-chain sample statistics and the cross-chain
//! convergence diagnostics (potential scale reduction and effective sample
//! size) computed from them at every synchronization point.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use std::error::Error;

/// Accumulates draws for the current adaptation window of one chain.
///
/// Keeps a running mean and mean-of-squares plus the raw draws, which the
/// controller gathers across chains for the autocorrelation-based ESS.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowTracker {
    n_params: usize,
    n: u64,
    mean: Array1<f64>,    // n_params
    mean_sq: Array1<f64>, // n_params
    draws: Vec<f64>,      // n * n_params, row-major
}

/// Sample mean and unbiased variance of one chain's window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    pub n: u64,
    pub mean: Array1<f64>, // n_params
    pub sm2: Array1<f64>,  // n_params
}

impl WindowTracker {
    pub fn new(n_params: usize) -> Self {
        Self {
            n_params,
            n: 0,
            mean: Array1::zeros(n_params),
            mean_sq: Array1::zeros(n_params),
            draws: Vec::new(),
        }
    }

    /// Incorporates one draw.
    pub fn step(&mut self, x: ArrayView1<f64>) -> Result<(), Box<dyn Error>> {
        if x.len() != self.n_params {
            return Err(format!(
                "draw has {} entries, tracker expects {}",
                x.len(),
                self.n_params
            )
            .into());
        }
        self.n += 1;

        let n = self.n as f64;
        self.mean = (self.mean.clone() * (n - 1.0) + x) / n;
        if self.n == 1 {
            self.mean_sq = x.pow2();
        } else {
            self.mean_sq = (self.mean_sq.clone() * (n - 1.0) + x.pow2()) / n;
        };
        self.draws.extend(x.iter());
        Ok(())
    }

    /// Number of draws accumulated since the last reset.
    pub fn count(&self) -> u64 {
        self.n
    }

    /// Current window statistics. Requires at least two draws; with fewer the
    /// unbiased variance is undefined and the window must be excluded.
    pub fn stats(&self) -> WindowStats {
        debug_assert!(self.n >= 2, "variance undefined for n < 2");
        let n = self.n as f64;
        WindowStats {
            n: self.n,
            mean: self.mean.clone(),
            sm2: (self.mean_sq.clone() - self.mean.pow2()) * n / (n - 1.0),
        }
    }

    /// Buffered draws as an `(n, n_params)` array.
    pub fn draws(&self) -> Array2<f64> {
        Array2::from_shape_vec((self.n as usize, self.n_params), self.draws.clone())
            .expect("draw buffer length is n * n_params by construction")
    }

    /// Clears the accumulation for the next window.
    pub fn reset(&mut self) {
        self.n = 0;
        self.mean.fill(0.0);
        self.mean_sq.fill(0.0);
        self.draws.clear();
    }
}

/// Per-dimension convergence diagnostics for one window boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossChainDiagnostics {
    pub rhat: Array1<f64>, // n_params
    pub ess: Array1<f64>,  // n_params
}

impl CrossChainDiagnostics {
    /// True when every dimension satisfies both thresholds. Non-finite
    /// estimates count as not converged.
    pub fn converged(&self, target_rhat: f64, target_ess: f64) -> bool {
        self.rhat
            .iter()
            .all(|&r| r.is_finite() && r <= target_rhat)
            && self.ess.iter().all(|&e| e.is_finite() && e >= target_ess)
    }

    pub fn max_rhat(&self) -> Result<f64, Box<dyn Error>> {
        Ok(*self.rhat.max()?)
    }

    pub fn min_ess(&self) -> Result<f64, Box<dyn Error>> {
        Ok(*self.ess.min()?)
    }
}

/// Computes rhat and ESS for a `(chains, n, params)` array of window draws.
///
/// Every chain evaluates this on the same gathered array, so the results are
/// bit-identical across the group and the termination decision needs no
/// further coordination.
///
/// Requires at least two chains: with a single chain the between-chain
/// variance is undefined, every estimate comes out NaN, and
/// [`CrossChainDiagnostics::converged`] is always false.
pub fn cross_chain_diagnostics(sample: ArrayView3<f64>) -> CrossChainDiagnostics {
    debug_assert!(sample.shape()[1] >= 2, "need at least two draws per chain");
    let (within, var) = withinvar(sample);
    let rhat = (var.clone() / &within).sqrt();
    let ess = ess(sample, within.view(), var.view());
    CrossChainDiagnostics { rhat, ess }
}

/// Within-chain variance `W` and the variance-plus estimate
/// `var = (n-1)/n * W + B/n` per parameter, following the Stan estimator.
fn withinvar(sample: ArrayView3<f64>) -> (Array1<f64>, Array1<f64>) {
    let c = sample.shape()[0];
    let n = sample.shape()[1];
    let p = sample.shape()[2];

    let (within, var): (Vec<f64>, Vec<f64>) = (0..p)
        .into_par_iter()
        .map(|param_idx| {
            let data_p = sample.slice(s![.., .., param_idx]);

            // chain means => shape (c,)
            let chain_means = data_p.mean_axis(Axis(1)).unwrap();
            let overall_mean = chain_means.mean().unwrap();

            // B = (n / (c - 1)) * sum((chain_means - overall_mean)^2)
            let diff = &chain_means - overall_mean;
            let b = diff.pow2().sum() * ((n as f64) / ((c - 1) as f64));

            // W = average over chains of the biased within-chain variance
            let mut squares = Vec::with_capacity(c);
            for chain_i in 0..c {
                let row = data_p.slice(s![chain_i, ..]);
                let cm = chain_means[chain_i];
                let sq = row.iter().map(|v| (v - cm) * (v - cm)).sum::<f64>() / (n as f64);
                squares.push(sq);
            }
            let w = Array1::from(squares).mean().unwrap();
            let v = ((n as f64 - 1.0) / (n as f64)) * w + b / (n as f64);

            (w, v)
        })
        .collect::<Vec<(f64, f64)>>()
        .into_iter()
        .fold((vec![], vec![]), |(mut within, mut var), (w, v)| {
            within.push(w);
            var.push(v);
            (within, var)
        });
    (Array1::from_vec(within), Array1::from_vec(var))
}

/// Effective sample size per parameter from the chain-averaged
/// autocorrelation, truncated by Geyer's initial monotone sequence.
fn ess(sample: ArrayView3<f64>, within: ArrayView1<f64>, var: ArrayView1<f64>) -> Array1<f64> {
    let shape = sample.shape();
    let (n_chains, n_steps, n_params) = (shape[0], shape[1], shape[2]);
    let chain_rho: Vec<Array2<f64>> = (0..n_chains)
        .map(|c| autocov(sample.index_axis(Axis(0), c)))
        .collect();
    let chain_rho: Vec<ArrayView2<f64>> = chain_rho.iter().map(|x| x.view()).collect();
    let chain_rho = ndarray::stack(Axis(0), &chain_rho)
        .expect("per-chain autocovariance arrays share a shape");
    let avg_rho = chain_rho.mean_axis(Axis(0)).unwrap();
    let diff = -avg_rho
        + within
            .broadcast((n_steps, n_params))
            .expect("within broadcasts over steps");
    let rho = -(diff
        / var
            .broadcast((n_steps, n_params))
            .expect("var broadcasts over steps"))
        + 1.0;
    let tau: Vec<f64> = (0..n_params)
        .into_par_iter()
        .map(|d| {
            let rho_d = rho.index_axis(Axis(1), d).to_owned();

            let mut min = if rho_d.len() >= 2 {
                rho_d[[0]] + rho_d[[1]]
            } else {
                0.0
            };

            let mut out = 0.0;
            for rho_t in rho_d.windows_with_stride(2, 2) {
                let mut p_t = rho_t[0] + rho_t[1];
                if p_t <= 0.0 {
                    break;
                }
                if p_t > min {
                    p_t = min;
                }
                min = p_t;
                out += p_t;
            }
            -1.0 + 2.0 * out
        })
        .collect();
    let tau = Array1::from_vec(tau);
    tau.recip() * n_chains as f64 * n_steps as f64
}

fn autocov(sample: ArrayView2<f64>) -> Array2<f64> {
    if sample.nrows() <= 100 {
        autocov_bf(sample)
    } else {
        autocov_fft(sample)
    }
}

/// FFT autocovariance of each column of an `(n, d)` array, zero-padded to
/// avoid circular wrap-around. `rustfft` does not normalize, so the
/// `1/n_padded` factor is applied explicitly.
fn autocov_fft(sample: ArrayView2<f64>) -> Array2<f64> {
    let (n, d) = (sample.shape()[0], sample.shape()[1]);
    let mut planner = FftPlanner::new();

    let mut n_padded = 1;
    while n_padded < 2 * n - 1 {
        n_padded <<= 1;
    }
    let fft = planner.plan_fft_forward(n_padded);
    let ffti = planner.plan_fft_inverse(n_padded);
    let out: Vec<f64> = sample
        .axis_iter(Axis(1))
        .into_par_iter()
        .map(|traj| {
            let traj_mean = traj.sum() / traj.len() as f64;
            let mut x: Vec<Complex<f64>> = traj
                .iter()
                .map(|xi| Complex {
                    re: (*xi - traj_mean),
                    im: 0.0f64,
                })
                .chain(
                    [Complex {
                        re: 0.0f64,
                        im: 0.0f64,
                    }]
                    .repeat(n_padded - n),
                )
                .collect();
            fft.process(x.as_mut_slice());
            x.iter_mut().for_each(|xi| {
                *xi *= xi.conj();
            });
            ffti.process(x.as_mut_slice());
            x.iter_mut()
                .take(n)
                .map(|xi| xi.re / n_padded as f64 / n as f64)
                .collect::<Vec<f64>>()
        })
        .flatten_iter()
        .collect();
    let out = Array2::from_shape_vec((d, n), out).expect("output has d * n entries");
    out.t().to_owned()
}

/// Brute-force autocovariance of each column of an `(n, d)` array; cheaper
/// than the FFT path for short windows.
fn autocov_bf(data: ArrayView2<f64>) -> Array2<f64> {
    let (n, d) = data.dim();
    let mut out = Array2::<f64>::zeros((n, d));

    out.axis_iter_mut(Axis(1))
        .into_par_iter()
        .enumerate()
        .for_each(|(col_idx, mut out_col)| {
            let col_data = data.column(col_idx);
            let col_data = col_data.to_owned() - col_data.mean().unwrap();

            for lag in 0..n {
                let mut sum_lag = 0.0;
                for t in 0..(n - lag) {
                    sum_lag += col_data[t] * col_data[t + lag];
                }
                out_col[lag] = sum_lag / n as f64;
            }
        });
    out
}
