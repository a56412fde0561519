//! Full-run orchestration for one chain: engage adaptation, initialize the
//! step size, run cross-chain warmup, then fixed-parameter sampling, with
//! timing reported at the end. `run_parallel` drives a whole chain group on
//! dedicated threads.

use crate::chain::{ChainState, Phase};
use crate::collective::{Collective, ThreadCollective};
use crate::core::{
    AdaptationSchedule, Interrupt, Logger, Model, NoInterrupt, RunConfig, SamplerKernel,
    StderrLogger,
};
use crate::report::{MemoryWriter, Reporter, Writer};
use crate::warmup::{cross_chain_warmup, WarmupReport};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::error::Error;
use std::time::{Duration, Instant};

/// Convergence and windowing constants of the cross-chain schedule.
pub const TARGET_RHAT: f64 = 1.1;
pub const TARGET_ESS: f64 = 50.0;
pub const WINDOW_SIZE: usize = 100;

/// Summary of one chain's completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub warmup: WarmupReport,
    /// Fixed-parameter transitions performed (may be short of
    /// `num_samples` after an interrupt).
    pub sampling_iterations: usize,
    pub warmup_secs: f64,
    pub sampling_secs: f64,
    /// Final chain state, including the adapted step size and mass matrix.
    pub state: ChainState,
}

/// Runs the complete lifecycle of one chain.
///
/// Step-size initialization failure is the single fatal-abort path: it is
/// logged, the group abort is signalled so peers cannot deadlock at the first
/// barrier, and no output beyond the headers is written.
#[allow(clippy::too_many_arguments)]
pub fn run_adaptive_chain<M, K, SW, DW, C>(
    kernel: &mut K,
    model: &M,
    initial_position: Array1<f64>,
    rank: usize,
    config: &RunConfig,
    rng: &mut SmallRng,
    interrupt: &mut dyn Interrupt,
    logger: &mut dyn Logger,
    reporter: &mut Reporter<SW, DW>,
    comm: &C,
) -> Result<RunReport, Box<dyn Error>>
where
    M: Model,
    K: SamplerKernel<M>,
    SW: Writer,
    DW: Writer,
    C: Collective + ?Sized,
{
    if config.num_thin == 0 {
        comm.abort(rank);
        return Err("num_thin must be at least 1".into());
    }

    let mut state = ChainState::new(initial_position);
    kernel.engage_adaptation();

    if let Err(e) = kernel.init_stepsize(&mut state, model, rng, logger) {
        logger.info("Exception initializing step size.");
        logger.info(&e.to_string());
        state.phase = Phase::Aborted;
        comm.abort(rank);
        return Err(e);
    }

    // Headers go out exactly once, before any data row. A failed writer is
    // group-fatal like any other barrier no-show.
    if let Err(e) = reporter
        .write_sample_names(kernel, model)
        .and_then(|_| reporter.write_diagnostic_names())
    {
        state.phase = Phase::Aborted;
        comm.abort(rank);
        return Err(e);
    }

    let schedule = AdaptationSchedule {
        window_size: WINDOW_SIZE,
        num_warmup: config.num_warmup,
        target_rhat: TARGET_RHAT,
        target_ess: TARGET_ESS,
        num_chains: config.num_chains,
    };
    kernel.set_adaptation_schedule(&schedule);
    let total_iters = config.num_warmup + config.num_samples;

    let start = Instant::now();
    let warmup = cross_chain_warmup(
        kernel,
        &mut state,
        rank,
        &schedule,
        0,
        config.num_warmup,
        total_iters,
        config.num_thin,
        config.refresh,
        config.save_warmup,
        reporter,
        model,
        rng,
        interrupt,
        comm,
        logger,
    )?;
    let warmup_secs = start.elapsed().as_secs_f64();

    kernel.disengage_adaptation();
    reporter.write_adapt_finish(kernel, &state)?;

    let start = Instant::now();
    let sampling_iterations = if warmup.interrupted {
        0
    } else {
        state.phase = Phase::Sampling;
        generate_transitions(
            kernel,
            &mut state,
            rank,
            config.num_samples,
            config.num_warmup,
            total_iters,
            config.num_thin,
            config.refresh,
            reporter,
            model,
            rng,
            interrupt,
            logger,
        )?
    };
    let sampling_secs = start.elapsed().as_secs_f64();

    reporter.write_timing(warmup_secs, sampling_secs)?;
    reporter.finish_progress("Done!");

    Ok(RunReport {
        warmup,
        sampling_iterations,
        warmup_secs,
        sampling_secs,
        state,
    })
}

/// Fixed-parameter sampling loop over `num_iterations` transitions starting
/// at absolute iteration `start`. Every thinned draw is written regardless of
/// `save_warmup`; the interrupt is polled each iteration and stops the loop
/// cleanly between rows.
#[allow(clippy::too_many_arguments)]
fn generate_transitions<M, K, SW, DW>(
    kernel: &mut K,
    state: &mut ChainState,
    rank: usize,
    num_iterations: usize,
    start: usize,
    finish: usize,
    num_thin: usize,
    refresh: usize,
    reporter: &mut Reporter<SW, DW>,
    model: &M,
    rng: &mut SmallRng,
    interrupt: &mut dyn Interrupt,
    logger: &mut dyn Logger,
) -> Result<usize, Box<dyn Error>>
where
    M: Model,
    K: SamplerKernel<M>,
    SW: Writer,
    DW: Writer,
{
    for m in 0..num_iterations {
        if interrupt.poll() {
            logger.info(&format!(
                "Chain {}: interrupt requested, stopping sampling after {} iterations.",
                rank, m
            ));
            return Ok(m);
        }

        match kernel.advance(state, model, rng) {
            Ok(draw) => {
                if m % num_thin == 0 {
                    reporter.write_draw(kernel, state, &draw)?;
                }
            }
            Err(e) => {
                logger.warn(&format!(
                    "Chain {}: model evaluation failed at iteration {}: {}. Draw skipped.",
                    rank,
                    start + m + 1,
                    e
                ));
            }
        }
        state.iteration = start + m + 1;
        reporter.tick();

        if refresh > 0 && (start + m + 1 == finish || m == 0 || (m + 1) % refresh == 0) {
            reporter.log_progress(logger, start + m + 1, finish, false);
        }
    }
    Ok(num_iterations)
}

/// One chain's share of a [`run_parallel`] result.
#[derive(Debug)]
pub struct ChainRun {
    pub rank: usize,
    /// The run outcome; group-fatal errors surface here on every chain.
    pub outcome: Result<RunReport, String>,
    pub sample: MemoryWriter,
    pub diagnostic: MemoryWriter,
}

/// Runs `config.num_chains` coupled chains to completion, one OS thread per
/// chain, and returns their outputs in rank order.
///
/// Chain `rank` is seeded with `seed + rank`. Chains block on each other at
/// window boundaries, so each gets a dedicated thread rather than a slot in a
/// work-stealing pool. `barrier_timeout` bounds the wait at each
/// synchronization point; `None` waits forever.
pub fn run_parallel<M, K, F>(
    model: &M,
    make_kernel: F,
    initial_positions: Vec<Array1<f64>>,
    config: &RunConfig,
    seed: u64,
    barrier_timeout: Option<Duration>,
    show_progress: bool,
) -> Vec<ChainRun>
where
    M: Model + Sync,
    K: SamplerKernel<M>,
    F: Fn(usize) -> K + Sync,
{
    assert_eq!(
        initial_positions.len(),
        config.num_chains,
        "one initial position per chain"
    );
    let comm = ThreadCollective::with_timeout(config.num_chains, barrier_timeout);
    let total = config.num_warmup + config.num_samples;

    let multi = MultiProgress::new();
    let pb_style = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap()
        .progress_chars("##-");

    let mut runs: Vec<ChainRun> = std::thread::scope(|s| {
        let handles: Vec<_> = initial_positions
            .into_iter()
            .enumerate()
            .map(|(rank, position)| {
                let comm = comm.clone();
                let make_kernel = &make_kernel;
                let pb = if show_progress {
                    let pb = multi.add(ProgressBar::new(total as u64));
                    pb.set_prefix(format!("Chain {rank}"));
                    pb.set_style(pb_style.clone());
                    Some(pb)
                } else {
                    None
                };
                s.spawn(move || {
                    let mut kernel = make_kernel(rank);
                    let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(rank as u64));
                    let mut interrupt = NoInterrupt;
                    let mut logger = StderrLogger;
                    let mut reporter = Reporter::new(MemoryWriter::default(), MemoryWriter::default());
                    if let Some(pb) = pb {
                        reporter = reporter.with_progress(pb);
                    }
                    let outcome = run_adaptive_chain(
                        &mut kernel,
                        model,
                        position,
                        rank,
                        config,
                        &mut rng,
                        &mut interrupt,
                        &mut logger,
                        &mut reporter,
                        &comm,
                    )
                    .map_err(|e| e.to_string());
                    let (sample, diagnostic) = reporter.into_writers();
                    ChainRun {
                        rank,
                        outcome,
                        sample,
                        diagnostic,
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("chain threads do not panic"))
            .collect()
    });
    runs.sort_by_key(|r| r.rank);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_constants_match_defaults() {
        // These are fixed for the run and baked into the orchestrator.
        assert_eq!(WINDOW_SIZE, 100);
        assert_eq!(TARGET_RHAT, 1.1);
        assert_eq!(TARGET_ESS, 50.0);
    }
}
