//! Example target models used by the demo and the test suite.

use crate::core::Model;
use ndarray::Array1;
use std::error::Error;

/// Independent Gaussian target with per-dimension means and variances.
///
/// The parameter space is already unconstrained, so `transform` is the
/// identity. An optional support radius turns the log density to `-inf`
/// outside a ball around the mean, which exercises the fatal
/// initialization path.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagGaussian {
    mean: Array1<f64>,
    var: Array1<f64>,
    support_radius: Option<f64>,
}

impl DiagGaussian {
    pub fn new(mean: Array1<f64>, var: Array1<f64>) -> Self {
        assert_eq!(mean.len(), var.len());
        assert!(var.iter().all(|&v| v > 0.0), "variances must be positive");
        Self {
            mean,
            var,
            support_radius: None,
        }
    }

    /// Standard normal in `dim` dimensions.
    pub fn standard(dim: usize) -> Self {
        Self::new(Array1::zeros(dim), Array1::ones(dim))
    }

    pub fn with_support_radius(mut self, radius: f64) -> Self {
        self.support_radius = Some(radius);
        self
    }
}

impl Model for DiagGaussian {
    fn log_prob_and_grad(
        &self,
        position: &Array1<f64>,
        grad: &mut Array1<f64>,
    ) -> Result<f64, Box<dyn Error>> {
        if position.len() != self.mean.len() {
            return Err(format!(
                "position has {} entries, model expects {}",
                position.len(),
                self.mean.len()
            )
            .into());
        }
        let centered = position - &self.mean;
        if let Some(radius) = self.support_radius {
            if centered.dot(&centered).sqrt() > radius {
                grad.fill(0.0);
                return Ok(f64::NEG_INFINITY);
            }
        }
        let mut logp = 0.0;
        for i in 0..position.len() {
            logp -= 0.5 * centered[i] * centered[i] / self.var[i];
            grad[i] = -centered[i] / self.var[i];
        }
        Ok(logp)
    }

    fn transform(&self, constrained: &[f64]) -> Array1<f64> {
        Array1::from_iter(constrained.iter().copied())
    }

    fn parameter_names(&self) -> Vec<String> {
        (0..self.mean.len()).map(|i| format!("theta_{}", i)).collect()
    }

    fn dim(&self) -> usize {
        self.mean.len()
    }
}

/// 2D Rosenbrock target with its narrow curved valley; a harder test case
/// for the adaptation than any diagonal Gaussian.
///
/// Unnormalized log density `-[(a - x)^2 + b (y - x^2)^2]`, mode at
/// `(a, a^2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rosenbrock {
    pub a: f64,
    pub b: f64,
}

impl Default for Rosenbrock {
    fn default() -> Self {
        Self { a: 1.0, b: 100.0 }
    }
}

impl Model for Rosenbrock {
    fn log_prob_and_grad(
        &self,
        position: &Array1<f64>,
        grad: &mut Array1<f64>,
    ) -> Result<f64, Box<dyn Error>> {
        if position.len() != 2 {
            return Err(format!(
                "position has {} entries, the Rosenbrock target is two-dimensional",
                position.len()
            )
            .into());
        }
        let (x, y) = (position[0], position[1]);
        let valley = y - x * x;
        let logp = -((self.a - x).powi(2) + self.b * valley * valley);
        grad[0] = 2.0 * (self.a - x) + 4.0 * self.b * x * valley;
        grad[1] = -2.0 * self.b * valley;
        Ok(logp)
    }

    fn transform(&self, constrained: &[f64]) -> Array1<f64> {
        Array1::from_iter(constrained.iter().copied())
    }

    fn parameter_names(&self) -> Vec<String> {
        vec!["x".to_string(), "y".to_string()]
    }

    fn dim(&self) -> usize {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_logp_and_grad_at_mean() {
        let model = DiagGaussian::new(array![1.0, -2.0], array![1.0, 4.0]);
        let mut grad = Array1::zeros(2);
        let logp = model
            .log_prob_and_grad(&array![1.0, -2.0], &mut grad)
            .unwrap();
        assert_abs_diff_eq!(logp, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_grad_points_toward_mean() {
        let model = DiagGaussian::standard(1);
        let mut grad = Array1::zeros(1);
        model.log_prob_and_grad(&array![2.0], &mut grad).unwrap();
        assert_abs_diff_eq!(grad[0], -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_support_radius_cuts_density() {
        let model = DiagGaussian::standard(2).with_support_radius(1.0);
        let mut grad = Array1::zeros(2);
        let logp = model
            .log_prob_and_grad(&array![3.0, 0.0], &mut grad)
            .unwrap();
        assert!(logp.is_infinite() && logp < 0.0);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let model = DiagGaussian::standard(2);
        let mut grad = Array1::zeros(2);
        assert!(model.log_prob_and_grad(&array![0.0], &mut grad).is_err());
    }

    #[test]
    fn test_rosenbrock_mode() {
        let model = Rosenbrock::default();
        let mut grad = Array1::zeros(2);
        let logp = model
            .log_prob_and_grad(&array![1.0, 1.0], &mut grad)
            .unwrap();
        assert_abs_diff_eq!(logp, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rosenbrock_grad_matches_finite_differences() {
        let model = Rosenbrock::default();
        let point = array![-0.3, 0.7];
        let mut grad = Array1::zeros(2);
        model.log_prob_and_grad(&point, &mut grad).unwrap();
        let h = 1e-6;
        let mut scratch = Array1::zeros(2);
        for i in 0..2 {
            let mut plus = point.clone();
            plus[i] += h;
            let mut minus = point.clone();
            minus[i] -= h;
            let fp = model.log_prob_and_grad(&plus, &mut scratch).unwrap();
            let fm = model.log_prob_and_grad(&minus, &mut scratch).unwrap();
            assert_abs_diff_eq!(grad[i], (fp - fm) / (2.0 * h), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_parameter_names_are_ordered() {
        let model = DiagGaussian::standard(3);
        assert_eq!(model.parameter_names(), vec!["theta_0", "theta_1", "theta_2"]);
        assert_eq!(model.dim(), 3);
    }
}
