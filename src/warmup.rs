//! The distributed adaptive-warmup control loop.
//!
//! Each chain advances through fixed-length windows of adaptive transitions.
//! At every window boundary all chains meet at a hard barrier, exchange their
//! window statistics and draws, retune their mass matrices from the pooled
//! variance, and evaluate the shared convergence rule. The rule is computed
//! from identical gathered inputs on every chain, so all chains reach the
//! same continue/terminate decision without a second round of communication.

use crate::aggregate;
use crate::chain::{ChainState, Phase};
use crate::collective::Collective;
use crate::core::{AdaptationSchedule, Interrupt, Logger, Model, SamplerKernel};
use crate::report::{Reporter, Writer};
use crate::stats::{self, WindowStats, WindowTracker};
use ndarray::{Array1, Array2, Array3, Axis};
use rand::rngs::SmallRng;
use std::error::Error;

/// Outcome of one chain's warmup phase.
#[derive(Debug, Clone, PartialEq)]
pub struct WarmupReport {
    /// Whether the convergence rule fired before `end_iter`.
    pub converged: bool,
    /// Adaptive transitions actually performed.
    pub iterations: usize,
    /// Window boundaries at which pooling took place (degenerate windows are
    /// merged into their successor and do not count).
    pub windows_pooled: usize,
    /// Whether the user interrupted the loop.
    pub interrupted: bool,
}

/// Runs windowed cross-chain warmup for one chain over
/// `[start_iter, end_iter)`.
///
/// `total_iters` is the full run length (warmup plus sampling) used for
/// progress percentages. Returns `Err` only for group-fatal conditions: a
/// peer failing the barrier, a malformed gather payload, or a writer
/// failure. Every such exit signals `comm.abort` first so peers observe
/// `PeerAborted` at their next barrier instead of waiting forever.
#[allow(clippy::too_many_arguments)]
pub fn cross_chain_warmup<M, K, SW, DW, C>(
    kernel: &mut K,
    state: &mut ChainState,
    rank: usize,
    schedule: &AdaptationSchedule,
    start_iter: usize,
    end_iter: usize,
    total_iters: usize,
    num_thin: usize,
    refresh: usize,
    save_warmup: bool,
    reporter: &mut Reporter<SW, DW>,
    model: &M,
    rng: &mut SmallRng,
    interrupt: &mut dyn Interrupt,
    comm: &C,
    logger: &mut dyn Logger,
) -> Result<WarmupReport, Box<dyn Error>>
where
    M: Model,
    K: SamplerKernel<M>,
    SW: Writer,
    DW: Writer,
    C: Collective + ?Sized,
{
    if schedule.window_size == 0 {
        return Err(abort_group(comm, rank, state, "window_size must be at least 1".into()));
    }
    if num_thin == 0 {
        return Err(abort_group(comm, rank, state, "num_thin must be at least 1".into()));
    }

    let dim = state.dim();
    let mut tracker = WindowTracker::new(dim);
    let mut report = WarmupReport {
        converged: false,
        iterations: 0,
        windows_pooled: 0,
        interrupted: false,
    };

    let num_iters = end_iter.saturating_sub(start_iter);
    for m in 0..num_iters {
        if interrupt.poll() {
            logger.info(&format!(
                "Chain {}: interrupt requested, leaving warmup early.",
                rank
            ));
            comm.abort(rank);
            state.phase = Phase::Aborted;
            report.interrupted = true;
            return Ok(report);
        }

        match kernel.advance(state, model, rng) {
            Ok(draw) => {
                if let Err(e) = tracker.step(draw.position.view()) {
                    return Err(abort_group(comm, rank, state, e));
                }
                if save_warmup && m % num_thin == 0 {
                    if let Err(e) = reporter.write_draw(kernel, state, &draw) {
                        return Err(abort_group(comm, rank, state, e));
                    }
                }
            }
            Err(e) => {
                // Recoverable per draw: report it and move on without
                // accumulating or writing anything for this iteration.
                logger.warn(&format!(
                    "Chain {}: model evaluation failed at iteration {}: {}. Draw skipped.",
                    rank,
                    start_iter + m + 1,
                    e
                ));
            }
        }
        state.iteration = start_iter + m + 1;
        report.iterations += 1;
        reporter.tick();

        if refresh > 0
            && (start_iter + m + 1 == total_iters || m == 0 || (m + 1) % refresh == 0)
        {
            reporter.log_progress(logger, start_iter + m + 1, total_iters, true);
        }

        let at_boundary = (m + 1) % schedule.window_size == 0 || m + 1 == num_iters;
        if !at_boundary {
            continue;
        }

        // Hard barrier: every chain contributes its window, degenerate or
        // not, so the group's gather rounds stay aligned.
        let payload = encode_window(&tracker, dim);
        let gathered = match comm.all_gather(rank, &payload) {
            Ok(g) => g,
            Err(e) => {
                logger.warn(&format!(
                    "Chain {}: aborting warmup, peer failure at the synchronization point: {}",
                    rank, e
                ));
                return Err(abort_group(comm, rank, state, Box::new(e)));
            }
        };
        let windows = match decode_windows(&gathered, dim) {
            Ok(w) => w,
            Err(e) => return Err(abort_group(comm, rank, state, e)),
        };

        let min_n = windows.iter().map(|(s, _)| s.n).min().unwrap_or(0);
        if min_n < 2 {
            // Too few draws for a variance estimate anywhere in the group:
            // merge this window into the next one and retry at the next
            // boundary.
            continue;
        }

        let (max_rhat, min_ess, converged) = match pool_and_report::<M, K, SW, DW>(
            kernel,
            state,
            &windows,
            min_n as usize,
            dim,
            start_iter + m + 1,
            schedule,
            reporter,
        ) {
            Ok(v) => v,
            Err(e) => return Err(abort_group(comm, rank, state, e)),
        };
        report.windows_pooled += 1;

        if converged {
            logger.info(&format!(
                "All chains converged at iteration {} (max rhat = {:.3}, min ess = {:.1}).",
                start_iter + m + 1,
                max_rhat,
                min_ess
            ));
            report.converged = true;
            return Ok(report);
        }
        tracker.reset();
    }

    if num_iters > 0 {
        logger.info(&format!(
            "Warmup ended after {} iterations without meeting the convergence targets; keeping the current tuning.",
            num_iters
        ));
    }
    Ok(report)
}

/// Pools the gathered windows, retunes the kernel's mass matrix, records the
/// diagnostic row, and evaluates the convergence rule. Split out so that
/// every failure inside it funnels through the group abort in the caller.
#[allow(clippy::too_many_arguments)]
fn pool_and_report<M, K, SW, DW>(
    kernel: &mut K,
    state: &mut ChainState,
    windows: &[(WindowStats, Array2<f64>)],
    min_n: usize,
    dim: usize,
    iteration: usize,
    schedule: &AdaptationSchedule,
    reporter: &mut Reporter<SW, DW>,
) -> Result<(f64, f64, bool), Box<dyn Error>>
where
    M: Model,
    K: SamplerKernel<M>,
    SW: Writer,
    DW: Writer,
{
    let per_chain: Vec<WindowStats> = windows.iter().map(|(s, _)| s.clone()).collect();
    let pooled = aggregate::pool(&per_chain)?;
    kernel.retune_mass(state, &pooled.regularized_variance());

    let draws = stack_trailing(windows, min_n, dim);
    let diag = stats::cross_chain_diagnostics(draws.view());
    let max_rhat = diag.max_rhat()?;
    let min_ess = diag.min_ess()?;
    reporter.write_diagnostic_row(iteration, state.step_size, max_rhat, min_ess)?;
    Ok((
        max_rhat,
        min_ess,
        diag.converged(schedule.target_rhat, schedule.target_ess),
    ))
}

/// Signals the group abort before surfacing a local failure, so peers fail
/// fast at their next barrier instead of waiting on a chain that has
/// already stopped iterating.
fn abort_group<C>(
    comm: &C,
    rank: usize,
    state: &mut ChainState,
    err: Box<dyn Error>,
) -> Box<dyn Error>
where
    C: Collective + ?Sized,
{
    comm.abort(rank);
    state.phase = Phase::Aborted;
    err
}

/// Serializes one chain's window as `[n, mean, sm2, draws...]`.
///
/// Degenerate windows (fewer than two draws) carry zeroed moments; peers see
/// the count and exclude the window before reading them.
fn encode_window(tracker: &WindowTracker, dim: usize) -> Vec<f64> {
    let n = tracker.count();
    let mut payload = Vec::with_capacity(1 + 2 * dim + n as usize * dim);
    payload.push(n as f64);
    if n >= 2 {
        let stats = tracker.stats();
        payload.extend(stats.mean.iter());
        payload.extend(stats.sm2.iter());
    } else {
        payload.extend(std::iter::repeat(0.0).take(2 * dim));
    }
    payload.extend(tracker.draws().iter());
    payload
}

/// Inverse of [`encode_window`] for every gathered contribution, in rank
/// order.
fn decode_windows(
    gathered: &[Vec<f64>],
    dim: usize,
) -> Result<Vec<(WindowStats, Array2<f64>)>, Box<dyn Error>> {
    let mut out = Vec::with_capacity(gathered.len());
    for (rank, payload) in gathered.iter().enumerate() {
        if payload.len() < 1 + 2 * dim {
            return Err(format!("chain {}: truncated window payload", rank).into());
        }
        let n = payload[0] as u64;
        let mean = Array1::from_iter(payload[1..1 + dim].iter().copied());
        let sm2 = Array1::from_iter(payload[1 + dim..1 + 2 * dim].iter().copied());
        let flat = &payload[1 + 2 * dim..];
        if flat.len() != n as usize * dim {
            return Err(format!(
                "chain {}: window payload claims {} draws but carries {} values",
                rank,
                n,
                flat.len()
            )
            .into());
        }
        let draws = Array2::from_shape_vec((n as usize, dim), flat.to_vec())?;
        out.push((WindowStats { n, mean, sm2 }, draws));
    }
    Ok(out)
}

/// Stacks the trailing `min_n` draws of each chain into a
/// `(chains, min_n, dim)` array so the diagnostics stay rectangular when
/// chains skipped draws.
fn stack_trailing(
    windows: &[(WindowStats, Array2<f64>)],
    min_n: usize,
    dim: usize,
) -> Array3<f64> {
    let mut out = Array3::zeros((windows.len(), min_n, dim));
    for (c, (_, draws)) in windows.iter().enumerate() {
        let skip = draws.nrows() - min_n;
        out.index_axis_mut(Axis(0), c)
            .assign(&draws.slice(ndarray::s![skip.., ..]));
    }
    out
}
