//! Runs four coupled chains on a correlated-scale Gaussian and prints the
//! warmup outcome per chain.

use cross_chain_mcmc::core::RunConfig;
use cross_chain_mcmc::distributions::DiagGaussian;
use cross_chain_mcmc::metropolis::AdaptiveMetropolis;
use cross_chain_mcmc::run::run_parallel;
use ndarray::array;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let model = DiagGaussian::new(array![0.0, 3.0, -1.0], array![1.0, 9.0, 0.25]);

    let mut config = RunConfig::new(4, 1000, 1000);
    config.refresh = 0;

    let initial_positions = vec![
        array![2.0, 2.0, 2.0],
        array![-2.0, 4.0, -2.0],
        array![0.5, 0.0, 0.5],
        array![-0.5, 6.0, -0.5],
    ];

    let runs = run_parallel(
        &model,
        |_rank| AdaptiveMetropolis::new(),
        initial_positions,
        &config,
        42,
        None,
        true,
    );

    for run in &runs {
        match &run.outcome {
            Ok(report) => {
                println!(
                    "chain {}: warmup {} iters ({}converged), {} samples, step size {:.4}",
                    run.rank,
                    report.warmup.iterations,
                    if report.warmup.converged { "" } else { "not " },
                    report.sampling_iterations,
                    report.state.step_size,
                );
            }
            Err(e) => println!("chain {}: failed: {}", run.rank, e),
        }
    }
    Ok(())
}
