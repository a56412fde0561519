//! Collaborator traits and run configuration.
//!
//! The warmup controller and orchestrator are generic over the model, the
//! sampling kernel, and the output/logging callbacks declared here. The crate
//! only drives these interfaces; the proposal mechanics and the log-density
//! computation live behind them.

use crate::chain::ChainState;
use ndarray::Array1;
use rand::rngs::SmallRng;
use std::error::Error;

/// Target model evaluated by every chain.
///
/// Positions are in unconstrained space; `transform` maps a constrained
/// vector into it. Evaluation errors are fatal during step-size
/// initialization and recoverable per draw afterwards.
pub trait Model {
    /// Computes the log density at `position` and writes its gradient into
    /// `grad` (same length as `position`).
    fn log_prob_and_grad(
        &self,
        position: &Array1<f64>,
        grad: &mut Array1<f64>,
    ) -> Result<f64, Box<dyn Error>>;

    /// Maps a constrained parameter vector to unconstrained space.
    fn transform(&self, constrained: &[f64]) -> Array1<f64>;

    /// Ordered parameter names, one per unconstrained dimension.
    fn parameter_names(&self) -> Vec<String>;

    /// Unconstrained dimension.
    fn dim(&self) -> usize {
        self.parameter_names().len()
    }
}

/// One accepted (or repeated) draw produced by a kernel transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    pub position: Array1<f64>,
    pub logp: f64,
    pub accept_prob: f64,
}

/// Single-chain sampling kernel.
///
/// The kernel owns the proposal mechanics and its per-iteration tuning; the
/// orchestrator owns the phase transitions and the cross-chain retuning of
/// the mass matrix.
pub trait SamplerKernel<M: Model> {
    /// Enables per-iteration adaptation (warmup mode).
    fn engage_adaptation(&mut self);

    /// Freezes all tunable parameters (sampling mode).
    fn disengage_adaptation(&mut self);

    /// Hands the kernel the run's adaptation schedule before warmup starts.
    /// Kernels with no schedule-dependent tuning keep the default no-op.
    fn set_adaptation_schedule(&mut self, _schedule: &AdaptationSchedule) {}

    /// Finds a workable initial step size at the chain's current position.
    ///
    /// An error here is the single fatal-abort path of a run.
    fn init_stepsize(
        &mut self,
        state: &mut ChainState,
        model: &M,
        rng: &mut SmallRng,
        logger: &mut dyn Logger,
    ) -> Result<(), Box<dyn Error>>;

    /// Advances the chain by one transition, mutating `state` and returning
    /// the resulting draw. Errors are recoverable: the caller logs and skips
    /// the draw.
    fn advance(
        &mut self,
        state: &mut ChainState,
        model: &M,
        rng: &mut SmallRng,
    ) -> Result<Draw, Box<dyn Error>>;

    /// Installs a pooled variance estimate as the new inverse mass diagonal.
    fn retune_mass(&mut self, state: &mut ChainState, pooled_variance: &Array1<f64>);

    /// Column names the kernel prepends to each sample row.
    fn sampler_param_names(&self) -> Vec<String>;

    /// Values matching `sampler_param_names` for the latest draw.
    fn sampler_params(&self, state: &ChainState, draw: &Draw) -> Vec<f64>;

    /// Writes the adapted tunables (step size, mass diagonal) as comments.
    fn persist_state(
        &self,
        state: &ChainState,
        writer: &mut dyn crate::report::Writer,
    ) -> Result<(), Box<dyn Error>>;
}

/// Message sink for human-readable notices.
pub trait Logger {
    fn info(&mut self, message: &str);
    fn warn(&mut self, message: &str);
}

/// Logger that prints to stderr.
#[derive(Debug, Default)]
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn info(&mut self, message: &str) {
        eprintln!("{}", message);
    }

    fn warn(&mut self, message: &str) {
        eprintln!("WARNING: {}", message);
    }
}

/// Logger that records messages for inspection in tests.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    pub infos: Vec<String>,
    pub warnings: Vec<String>,
}

impl Logger for MemoryLogger {
    fn info(&mut self, message: &str) {
        self.infos.push(message.to_string());
    }

    fn warn(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }
}

/// Cancellation hook, polled once per iteration.
///
/// Returns `true` when the user requested cancellation; the polling chain
/// stops its loop and signals the group abort so peers do not block at the
/// next barrier.
pub trait Interrupt {
    fn poll(&mut self) -> bool;
}

/// Interrupt that never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInterrupt;

impl Interrupt for NoInterrupt {
    fn poll(&mut self) -> bool {
        false
    }
}

/// Cross-chain warmup configuration, immutable for the run.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationSchedule {
    /// Iterations between synchronization points.
    pub window_size: usize,
    /// Maximum warmup iterations.
    pub num_warmup: usize,
    /// Convergence threshold on the potential scale reduction.
    pub target_rhat: f64,
    /// Convergence threshold on the effective sample size.
    pub target_ess: f64,
    /// Fixed number of participating chains.
    pub num_chains: usize,
}

/// Run-length configuration for one full chain lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub num_chains: usize,
    pub num_warmup: usize,
    pub num_samples: usize,
    /// Keep every `num_thin`-th draw. Must be >= 1.
    pub num_thin: usize,
    /// Progress message cadence in iterations; 0 disables progress messages.
    pub refresh: usize,
    /// Whether warmup draws are written to the sample writer.
    pub save_warmup: bool,
}

impl RunConfig {
    pub fn new(num_chains: usize, num_warmup: usize, num_samples: usize) -> Self {
        Self {
            num_chains,
            num_warmup,
            num_samples,
            num_thin: 1,
            refresh: 100,
            save_warmup: false,
        }
    }
}
