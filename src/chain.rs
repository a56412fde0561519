//! Per-chain mutable state.

use ndarray::Array1;

/// Lifecycle phase of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Warmup: tunables may change every iteration.
    Adapting,
    /// Fixed-parameter sampling.
    Sampling,
    /// The run ended before completing (fatal init error or group abort).
    Aborted,
}

/// Mutable state owned exclusively by one chain.
///
/// Other chains never touch this directly; cross-chain influence arrives only
/// through the pooled statistics the kernel is retuned with at window
/// boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainState {
    /// Current position in unconstrained space.
    pub position: Array1<f64>,
    /// Leapfrog/proposal step size. Positive after initialization succeeds.
    pub step_size: f64,
    /// Diagonal inverse mass-matrix estimate, one entry per dimension.
    pub inv_mass_diag: Array1<f64>,
    /// Iterations completed so far in this run.
    pub iteration: usize,
    pub phase: Phase,
}

impl ChainState {
    /// Creates state at `position` with unit mass and a placeholder step
    /// size; `init_stepsize` must run before the first transition.
    pub fn new(position: Array1<f64>) -> Self {
        let dim = position.len();
        Self {
            position,
            step_size: 1.0,
            inv_mass_diag: Array1::ones(dim),
            iteration: 0,
            phase: Phase::Adapting,
        }
    }

    pub fn dim(&self) -> usize {
        self.position.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_new_state_defaults() {
        let state = ChainState::new(array![0.5, -1.0, 2.0]);
        assert_eq!(state.dim(), 3);
        assert_eq!(state.step_size, 1.0);
        assert_eq!(state.inv_mass_diag, array![1.0, 1.0, 1.0]);
        assert_eq!(state.iteration, 0);
        assert_eq!(state.phase, Phase::Adapting);
    }
}
