//! Poisson distribution implementation.

use super::base::{DistributionFamily, DistributionParam};
use crate::error::{DistBoostError, Result};
use crate::utils::Link;
use ndarray::{array, Array1, ArrayView1};
use statrs::distribution::{Discrete, Poisson as StatrsPoisson};

const PARAMS: [DistributionParam; 1] = [DistributionParam::new("mu", Link::Exp)];

/// Poisson distribution for count data, boosted on `ln mu`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Poisson;

impl DistributionFamily for Poisson {
    fn name(&self) -> &'static str {
        "poisson"
    }

    fn params(&self) -> &'static [DistributionParam] {
        &PARAMS
    }

    fn metric_name(&self) -> &'static str {
        "poisson-nll"
    }

    fn in_support(&self, y: f64) -> bool {
        y.is_finite() && y >= 0.0 && y.fract() == 0.0
    }

    fn support_description(&self) -> &'static str {
        "non-negative integer counts"
    }

    fn estimate_start(&self, y: &ArrayView1<f64>) -> Result<Array1<f64>> {
        let mean = y.sum() / y.len() as f64;
        if mean <= 0.0 {
            return Err(DistBoostError::InvalidInput(
                "poisson starting value needs at least one non-zero count".to_string(),
            ));
        }
        Ok(array![mean.ln()])
    }

    fn nll(&self, params: &[f64], y: f64) -> f64 {
        match StatrsPoisson::new(params[0]) {
            Ok(dist) => -dist.ln_pmf(y as u64),
            Err(_) => f64::INFINITY,
        }
    }

    fn nll_gradient(&self, params: &[f64], y: f64, grad: &mut [f64]) {
        grad[0] = 1.0 - y / params[0];
    }

    fn nll_hessian(&self, params: &[f64], y: f64, hess: &mut [f64]) {
        hess[0] = y / (params[0] * params[0]);
    }

    fn fisher_diagonal(&self, params: &[f64], fisher: &mut [f64]) {
        fisher[0] = 1.0 / params[0];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use statrs::function::gamma::ln_gamma;

    #[test]
    fn test_poisson_nll() {
        let (mu, y) = (5.0f64, 3.0f64);
        let expected = mu - y * mu.ln() + ln_gamma(y + 1.0);
        assert_relative_eq!(Poisson.nll(&[mu], y), expected, epsilon = 1e-10);
    }

    #[test]
    fn test_poisson_rejects_non_integer_counts() {
        assert!(Poisson.starting_params(&array![1.0, 2.5].view()).is_err());
        assert!(Poisson.starting_params(&array![1.0, -1.0].view()).is_err());
        assert!(Poisson.starting_params(&array![0.0, 0.0].view()).is_err());
    }

    #[test]
    fn test_poisson_gradient_and_hessian() {
        let y = array![4.0];
        let raw = array![[2.0f64.ln()]];
        let plain = Poisson.gradient_and_hessian(&y.view(), &raw.view(), false).unwrap();
        // d/d(ln mu) = mu - y, curvature = mu
        assert_relative_eq!(plain.gradients[[0, 0]], -2.0, epsilon = 1e-12);
        assert_relative_eq!(plain.hessians[[0, 0]], 2.0, epsilon = 1e-12);

        let natural = Poisson.gradient_and_hessian(&y.view(), &raw.view(), true).unwrap();
        assert_relative_eq!(natural.gradients[[0, 0]], -1.0, epsilon = 1e-12);
        assert_relative_eq!(natural.hessians[[0, 0]], 1.0, epsilon = 1e-12);
    }
}
