//! Laplace distribution implementation.

use super::base::{degenerate_labels, is_constant, DistributionFamily, DistributionParam};
use crate::error::Result;
use crate::utils::{median, Link};
use ndarray::{array, Array1, ArrayView1};
use statrs::distribution::{Continuous, Laplace as StatrsLaplace};

const PARAMS: [DistributionParam; 2] = [
    DistributionParam::new("loc", Link::Identity),
    DistributionParam::new("scale", Link::Exp),
];

/// Laplace distribution boosted on `(loc, ln scale)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Laplace;

impl DistributionFamily for Laplace {
    fn name(&self) -> &'static str {
        "laplace"
    }

    fn params(&self) -> &'static [DistributionParam] {
        &PARAMS
    }

    fn metric_name(&self) -> &'static str {
        "laplace-nll"
    }

    fn estimate_start(&self, y: &ArrayView1<f64>) -> Result<Array1<f64>> {
        if is_constant(y) {
            return Err(degenerate_labels(self.name()));
        }
        let values = y.to_vec();
        let loc = median(&values).ok_or_else(|| degenerate_labels(self.name()))?;
        let mad = values.iter().map(|v| (v - loc).abs()).sum::<f64>() / values.len() as f64;
        if mad <= 0.0 {
            return Err(degenerate_labels(self.name()));
        }
        Ok(array![loc, mad.ln()])
    }

    fn nll(&self, params: &[f64], y: f64) -> f64 {
        match StatrsLaplace::new(params[0], params[1]) {
            Ok(dist) => -dist.ln_pdf(y),
            Err(_) => f64::INFINITY,
        }
    }

    /// For NLL = ln(2b) + |y - μ| / b:
    /// - ∂NLL/∂μ = sign(μ - y) / b
    /// - ∂NLL/∂b = 1/b - |y - μ| / b²
    fn nll_gradient(&self, params: &[f64], y: f64, grad: &mut [f64]) {
        let (loc, scale) = (params[0], params[1]);
        let diff = loc - y;
        let sign = if diff > 0.0 {
            1.0
        } else if diff < 0.0 {
            -1.0
        } else {
            0.0
        };
        grad[0] = sign / scale;
        grad[1] = 1.0 / scale - diff.abs() / (scale * scale);
    }

    /// The location term is piecewise linear, so its curvature is zero.
    /// ∂²NLL/∂b² = 2|y - μ|/b³ - 1/b².
    fn nll_hessian(&self, params: &[f64], y: f64, hess: &mut [f64]) {
        let (loc, scale) = (params[0], params[1]);
        hess[0] = 0.0;
        hess[1] = 2.0 * (y - loc).abs() / scale.powi(3) - 1.0 / (scale * scale);
    }

    fn fisher_diagonal(&self, params: &[f64], fisher: &mut [f64]) {
        let var = params[1] * params[1];
        fisher[0] = 1.0 / var;
        fisher[1] = 1.0 / var;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_laplace_nll() {
        assert_relative_eq!(Laplace.nll(&[0.0, 1.0], 0.0), 2.0f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(Laplace.nll(&[0.0, 1.0], 2.0), 2.0f64.ln() + 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_laplace_starting_params() {
        let y = array![1.0, 2.0, 3.0, 4.0, 10.0];
        let start = Laplace.starting_params(&y.view()).unwrap();
        assert_relative_eq!(start[0], 3.0, epsilon = 1e-12);
        // |1-3| + |2-3| + 0 + |4-3| + |10-3| = 11
        assert_relative_eq!(start[1], (11.0f64 / 5.0).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_laplace_hessian_is_positive_at_the_kink() {
        let y = array![2.0];
        let raw = array![[2.0, 0.0]];
        let gh = Laplace.gradient_and_hessian(&y.view(), &raw.view(), false).unwrap();
        assert_eq!(gh.gradients[[0, 0]], 0.0);
        assert_eq!(gh.hessians[[0, 0]], crate::utils::HESSIAN_FLOOR);
        assert_eq!(gh.hessians[[0, 1]], crate::utils::HESSIAN_FLOOR);
    }

    #[test]
    fn test_laplace_log_scale_hessian() {
        // |y - μ| / b in raw coordinates
        let y = array![5.0];
        let raw = array![[2.0, 0.5f64.ln()]];
        let gh = Laplace.gradient_and_hessian(&y.view(), &raw.view(), false).unwrap();
        assert_relative_eq!(gh.hessians[[0, 1]], 6.0, epsilon = 1e-10);
        assert_relative_eq!(gh.gradients[[0, 1]], 1.0 - 6.0, epsilon = 1e-10);
    }

    #[test]
    fn test_laplace_natural_scale_gradient_equals_plain() {
        // Fisher for ln(b) is 1, so only the loc column is rescaled.
        let y = array![1.0, -2.0];
        let raw = array![[0.5, 0.7], [0.5, 0.7]];
        let plain = Laplace.gradient_and_hessian(&y.view(), &raw.view(), false).unwrap();
        let natural = Laplace.gradient_and_hessian(&y.view(), &raw.view(), true).unwrap();
        for i in 0..2 {
            assert_relative_eq!(plain.gradients[[i, 1]], natural.gradients[[i, 1]], epsilon = 1e-12);
            assert!((plain.gradients[[i, 0]] - natural.gradients[[i, 0]]).abs() > 1e-6);
        }
    }
}
