//! Preconditioned random-walk Metropolis kernel with step-size adaptation.
//!
//! Proposals are scaled per dimension by the square root of the inverse mass
//! diagonal, which the warmup controller retunes from the pooled cross-chain
//! variance. During warmup the step size follows a Robbins-Monro update
//! toward a target acceptance rate; outside warmup all tunables are frozen.

use crate::chain::ChainState;
use crate::core::{Draw, Logger, Model, SamplerKernel};
use crate::report::Writer;
use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::StandardNormal;
use std::error::Error;

const DEFAULT_TARGET_ACCEPT: f64 = 0.234;

#[derive(Debug, Clone)]
pub struct AdaptiveMetropolis {
    target_accept: f64,
    adapting: bool,
    adapt_count: u64,
}

impl AdaptiveMetropolis {
    pub fn new() -> Self {
        Self {
            target_accept: DEFAULT_TARGET_ACCEPT,
            adapting: false,
            adapt_count: 0,
        }
    }

    pub fn with_target_accept(mut self, target_accept: f64) -> Self {
        self.target_accept = target_accept;
        self
    }

    fn propose(&self, state: &ChainState, rng: &mut SmallRng) -> Array1<f64> {
        let mut proposal = state.position.clone();
        for (i, x) in proposal.iter_mut().enumerate() {
            let z: f64 = rng.sample(StandardNormal);
            *x += state.step_size * state.inv_mass_diag[i].sqrt() * z;
        }
        proposal
    }
}

impl Default for AdaptiveMetropolis {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> SamplerKernel<M> for AdaptiveMetropolis {
    fn engage_adaptation(&mut self) {
        self.adapting = true;
        self.adapt_count = 0;
    }

    fn disengage_adaptation(&mut self) {
        self.adapting = false;
    }

    /// Doubles or halves the step size until a one-proposal acceptance
    /// estimate crosses 1/2, starting from the current value.
    fn init_stepsize(
        &mut self,
        state: &mut ChainState,
        model: &M,
        rng: &mut SmallRng,
        _logger: &mut dyn Logger,
    ) -> Result<(), Box<dyn Error>> {
        let mut grad = Array1::zeros(state.dim());
        let logp0 = model.log_prob_and_grad(&state.position, &mut grad)?;
        if !logp0.is_finite() {
            return Err(format!(
                "log probability at the initial value is {}; cannot initialize step size",
                logp0
            )
            .into());
        }

        let mut probe = |eps: f64, state: &ChainState, rng: &mut SmallRng| -> Option<f64> {
            let mut trial = state.clone();
            trial.step_size = eps;
            let proposal = self.propose(&trial, rng);
            let logp = model.log_prob_and_grad(&proposal, &mut grad).ok()?;
            if !logp.is_finite() {
                return None;
            }
            Some((logp - logp0).min(0.0).exp())
        };

        let mut eps = 1.0f64;
        let accept0 = match probe(eps, state, rng) {
            Some(a) => a,
            None => {
                eps = 1e-3;
                probe(eps, state, rng).ok_or("no workable step size near the initial value")?
            }
        };
        let direction: f64 = if accept0 > 0.5 { 1.0 } else { -1.0 };
        for _ in 0..50 {
            let new_eps = eps * 2.0_f64.powf(direction);
            if !(1e-10..=1e3).contains(&new_eps) {
                break;
            }
            match probe(new_eps, state, rng) {
                Some(a) => {
                    if (direction > 0.0 && a < 0.5) || (direction < 0.0 && a > 0.5) {
                        break;
                    }
                    eps = new_eps;
                }
                None => break,
            }
        }
        state.step_size = eps.clamp(1e-8, 1e3);
        Ok(())
    }

    fn advance(
        &mut self,
        state: &mut ChainState,
        model: &M,
        rng: &mut SmallRng,
    ) -> Result<Draw, Box<dyn Error>> {
        let mut grad = Array1::zeros(state.dim());
        let current_lp = model.log_prob_and_grad(&state.position, &mut grad)?;
        let proposal = self.propose(state, rng);

        // A non-finite proposal density is an ordinary rejection, not an
        // evaluation failure.
        let accept_prob = match model.log_prob_and_grad(&proposal, &mut grad) {
            Ok(proposed_lp) if proposed_lp.is_finite() => {
                let accept_prob = (proposed_lp - current_lp).min(0.0).exp();
                let u: f64 = rng.gen();
                if u < accept_prob {
                    state.position = proposal;
                }
                accept_prob
            }
            Ok(_) => 0.0,
            Err(e) => return Err(e),
        };

        if self.adapting {
            self.adapt_count += 1;
            let eta = (self.adapt_count as f64).powf(-0.6);
            state.step_size =
                (state.step_size.ln() + eta * (accept_prob - self.target_accept)).exp();
        }

        let logp = model.log_prob_and_grad(&state.position, &mut grad)?;
        Ok(Draw {
            position: state.position.clone(),
            logp,
            accept_prob,
        })
    }

    fn retune_mass(&mut self, state: &mut ChainState, pooled_variance: &Array1<f64>) {
        state.inv_mass_diag = pooled_variance.clone();
    }

    fn sampler_param_names(&self) -> Vec<String> {
        vec![
            "lp__".to_string(),
            "accept_stat__".to_string(),
            "stepsize__".to_string(),
        ]
    }

    fn sampler_params(&self, state: &ChainState, draw: &Draw) -> Vec<f64> {
        vec![draw.logp, draw.accept_prob, state.step_size]
    }

    fn persist_state(
        &self,
        state: &ChainState,
        writer: &mut dyn Writer,
    ) -> Result<(), Box<dyn Error>> {
        writer.write_comment(&format!("Step size = {}", state.step_size))?;
        writer.write_comment("Diagonal elements of inverse mass matrix:")?;
        let diag = state
            .inv_mass_diag
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        writer.write_comment(&diag)
    }
}
