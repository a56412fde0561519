//! End-to-end tests of the full chain lifecycle: parallel chains of the
//! adaptive Metropolis kernel on a diagonal Gaussian, from step-size
//! initialization through cross-chain warmup to fixed-parameter sampling.

use cross_chain_mcmc::collective::ThreadCollective;
use cross_chain_mcmc::core::{MemoryLogger, NoInterrupt, RunConfig};
use cross_chain_mcmc::distributions::DiagGaussian;
use cross_chain_mcmc::metropolis::AdaptiveMetropolis;
use cross_chain_mcmc::report::{MemoryWriter, Reporter, Writer};
use cross_chain_mcmc::run::{run_adaptive_chain, run_parallel, ChainRun};
use ndarray::array;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::error::Error;
use std::thread;
use std::time::Duration;

fn run_standard_gaussian(config: &RunConfig, seed: u64) -> Vec<ChainRun> {
    let model = DiagGaussian::standard(2);
    let initial_positions = vec![
        array![4.0, 4.0],
        array![-4.0, 4.0],
        array![4.0, -4.0],
        array![-4.0, -4.0],
    ];
    run_parallel(
        &model,
        |_rank| AdaptiveMetropolis::new(),
        initial_positions,
        config,
        seed,
        Some(Duration::from_secs(60)),
        false,
    )
}

#[test]
fn test_four_chain_gaussian_run() {
    let config = RunConfig::new(4, 600, 400);
    let runs = run_standard_gaussian(&config, 7);
    assert_eq!(runs.len(), 4);

    for run in &runs {
        let report = run.outcome.as_ref().unwrap();
        assert!(report.warmup.iterations <= 600);
        assert_eq!(report.sampling_iterations, 400);
        assert!(report.state.step_size > 0.0);
        assert!(report.state.inv_mass_diag.iter().all(|&v| v > 0.0));

        assert_eq!(
            run.sample.header.as_deref().unwrap(),
            [
                "lp__",
                "accept_stat__",
                "stepsize__",
                "theta_0",
                "theta_1"
            ]
        );
        // Warmup draws are not saved by default.
        assert_eq!(run.sample.rows.len(), 400);
        assert!(run
            .sample
            .comments
            .iter()
            .any(|c| c == "Adaptation terminated"));
        assert!(run
            .sample
            .comments
            .iter()
            .any(|c| c.contains("seconds (Total)")));
        assert_eq!(
            run.diagnostic.rows.len(),
            report.warmup.windows_pooled,
            "one diagnostic row per pooled window"
        );
        for row in &run.diagnostic.rows {
            assert_eq!(row.len(), 4);
        }
    }

    // The convergence decision is computed from identical gathered data, so
    // every chain records the same diagnostic trajectory.
    let reference = &runs[0].diagnostic.rows;
    for run in &runs[1..] {
        assert_eq!(&run.diagnostic.rows, reference);
    }

    // Post-warmup draws should center near the target mean.
    let mut sum = [0.0f64; 2];
    let mut count = 0usize;
    for run in &runs {
        for row in &run.sample.rows {
            sum[0] += row[3];
            sum[1] += row[4];
            count += 1;
        }
    }
    let mean = [sum[0] / count as f64, sum[1] / count as f64];
    assert!(
        mean[0].abs() < 0.4 && mean[1].abs() < 0.4,
        "sample mean too far from the origin: {:?}",
        mean
    );
}

#[test]
fn test_zero_warmup_skips_adaptation() {
    let config = RunConfig::new(4, 0, 200);
    let runs = run_standard_gaussian(&config, 3);
    for run in &runs {
        let report = run.outcome.as_ref().unwrap();
        assert_eq!(report.warmup.iterations, 0);
        assert_eq!(report.warmup.windows_pooled, 0);
        assert!(!report.warmup.converged);
        assert_eq!(report.sampling_iterations, 200);
        assert_eq!(run.sample.rows.len(), 200);
        assert!(run.diagnostic.rows.is_empty());
        // The adaptation-finish block still appears, with the untouched
        // unit mass matrix.
        assert!(run
            .sample
            .comments
            .iter()
            .any(|c| c == "Adaptation terminated"));
    }
}

#[test]
fn test_save_warmup_and_thinning() {
    let mut config = RunConfig::new(4, 100, 100);
    config.save_warmup = true;
    config.num_thin = 2;
    let runs = run_standard_gaussian(&config, 19);
    for run in &runs {
        let report = run.outcome.as_ref().unwrap();
        assert_eq!(report.warmup.iterations, 100);
        // 50 thinned warmup draws plus 50 thinned sampling draws.
        assert_eq!(run.sample.rows.len(), 100);
    }
}

#[test]
fn test_init_failure_aborts_the_group() {
    // Chain 2 starts outside the target's support, so its step-size search
    // fails before the first transition. The whole group must stop rather
    // than hang at the first window boundary.
    let model = DiagGaussian::standard(2).with_support_radius(1.0);
    let initial_positions = vec![
        array![0.1, 0.1],
        array![-0.1, 0.1],
        array![50.0, 50.0],
        array![-0.1, -0.1],
    ];
    let config = RunConfig::new(4, 300, 100);
    let runs = run_parallel(
        &model,
        |_rank| AdaptiveMetropolis::new(),
        initial_positions,
        &config,
        5,
        Some(Duration::from_secs(60)),
        false,
    );

    let failed = &runs[2];
    let err = failed.outcome.as_ref().unwrap_err();
    assert!(err.contains("initial value"), "unexpected error: {}", err);
    // The failing chain never wrote headers or rows.
    assert!(failed.sample.header.is_none());
    assert!(failed.sample.rows.is_empty());

    for run in runs.iter().filter(|r| r.rank != 2) {
        let err = run.outcome.as_ref().unwrap_err();
        assert!(
            err.contains("aborted"),
            "peer should observe the abort, got: {}",
            err
        );
        assert!(run.sample.rows.is_empty());
    }
}

/// Writer whose header write fails, standing in for an output target that
/// cannot be opened.
struct HeaderlessWriter;

impl Writer for HeaderlessWriter {
    fn write_header(&mut self, _names: &[String]) -> Result<(), Box<dyn Error>> {
        Err("output target unavailable".into())
    }

    fn write_row(&mut self, _values: &[f64]) -> Result<(), Box<dyn Error>> {
        Ok(())
    }

    fn write_comment(&mut self, _text: &str) -> Result<(), Box<dyn Error>> {
        Ok(())
    }
}

#[test]
fn test_header_failure_aborts_the_group() {
    // Chain 0 cannot write its sample header; with no barrier timeout,
    // chain 1 only gets out of its first window boundary if the failing
    // chain signalled the group abort.
    let model = DiagGaussian::standard(2);
    let comm = ThreadCollective::new(2);
    let config = RunConfig::new(2, 300, 0);

    let (err0, err1) = thread::scope(|s| {
        let h0 = {
            let comm = comm.clone();
            let model = &model;
            let config = &config;
            s.spawn(move || {
                let mut kernel = AdaptiveMetropolis::new();
                let mut rng = SmallRng::seed_from_u64(1);
                let mut interrupt = NoInterrupt;
                let mut logger = MemoryLogger::default();
                let mut reporter = Reporter::new(HeaderlessWriter, MemoryWriter::default());
                run_adaptive_chain(
                    &mut kernel,
                    model,
                    array![0.1, 0.1],
                    0,
                    config,
                    &mut rng,
                    &mut interrupt,
                    &mut logger,
                    &mut reporter,
                    &comm,
                )
                .map_err(|e| e.to_string())
                .unwrap_err()
            })
        };
        let h1 = {
            let comm = comm.clone();
            let model = &model;
            let config = &config;
            s.spawn(move || {
                let mut kernel = AdaptiveMetropolis::new();
                let mut rng = SmallRng::seed_from_u64(2);
                let mut interrupt = NoInterrupt;
                let mut logger = MemoryLogger::default();
                let mut reporter = Reporter::new(MemoryWriter::default(), MemoryWriter::default());
                run_adaptive_chain(
                    &mut kernel,
                    model,
                    array![-0.1, -0.1],
                    1,
                    config,
                    &mut rng,
                    &mut interrupt,
                    &mut logger,
                    &mut reporter,
                    &comm,
                )
                .map_err(|e| e.to_string())
                .unwrap_err()
            })
        };
        (h0.join().unwrap(), h1.join().unwrap())
    });

    assert!(err0.contains("unavailable"), "unexpected error: {}", err0);
    assert!(
        err1.contains("aborted"),
        "peer should observe the abort, got: {}",
        err1
    );
}

#[test]
fn test_zero_thin_is_rejected() {
    let mut config = RunConfig::new(4, 100, 100);
    config.num_thin = 0;
    let runs = run_standard_gaussian(&config, 1);
    for run in &runs {
        let err = run.outcome.as_ref().unwrap_err();
        assert!(err.contains("num_thin"), "unexpected error: {}", err);
    }
}

#[test]
fn test_same_seed_reproduces_the_run() {
    let config = RunConfig::new(4, 400, 200);
    let first = run_standard_gaussian(&config, 42);
    let second = run_standard_gaussian(&config, 42);
    for (a, b) in first.iter().zip(second.iter()) {
        let ra = a.outcome.as_ref().unwrap();
        let rb = b.outcome.as_ref().unwrap();
        assert_eq!(ra.warmup, rb.warmup);
        assert_eq!(ra.state, rb.state);
        assert_eq!(a.sample.header, b.sample.header);
        assert_eq!(a.sample.rows, b.sample.rows);
        assert_eq!(a.diagnostic.rows, b.diagnostic.rows);
    }
}
