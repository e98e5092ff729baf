//! Normal (Gaussian) distribution implementation.

use super::base::{degenerate_labels, is_constant, mean_and_std, DistributionFamily, DistributionParam};
use crate::error::Result;
use crate::utils::Link;
use ndarray::{array, Array1, ArrayView1};
use std::f64::consts::PI;

const PARAMS: [DistributionParam; 2] = [
    DistributionParam::new("loc", Link::Identity),
    DistributionParam::new("scale", Link::Exp),
];

/// Normal distribution boosted on `(loc, ln scale)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Normal;

impl DistributionFamily for Normal {
    fn name(&self) -> &'static str {
        "normal"
    }

    fn params(&self) -> &'static [DistributionParam] {
        &PARAMS
    }

    fn metric_name(&self) -> &'static str {
        "normal-nll"
    }

    fn estimate_start(&self, y: &ArrayView1<f64>) -> Result<Array1<f64>> {
        if is_constant(y) {
            return Err(degenerate_labels(self.name()));
        }
        let (mean, std) = mean_and_std(y);
        if std <= 0.0 {
            return Err(degenerate_labels(self.name()));
        }
        Ok(array![mean, std.ln()])
    }

    fn nll(&self, params: &[f64], y: f64) -> f64 {
        let (loc, scale) = (params[0], params[1]);
        let z = (y - loc) / scale;
        0.5 * (2.0 * PI).ln() + scale.ln() + 0.5 * z * z
    }

    /// For NLL = 0.5*log(2π) + log(σ) + 0.5*(y-μ)²/σ²:
    /// - ∂NLL/∂μ = (μ - y) / σ²
    /// - ∂NLL/∂σ = 1/σ - (y - μ)² / σ³
    fn nll_gradient(&self, params: &[f64], y: f64, grad: &mut [f64]) {
        let (loc, scale) = (params[0], params[1]);
        let diff = y - loc;
        let var = scale * scale;
        grad[0] = -diff / var;
        grad[1] = 1.0 / scale - diff * diff / (var * scale);
    }

    /// - ∂²NLL/∂μ² = 1/σ²
    /// - ∂²NLL/∂σ² = 3(y - μ)²/σ⁴ - 1/σ²
    fn nll_hessian(&self, params: &[f64], y: f64, hess: &mut [f64]) {
        let (loc, scale) = (params[0], params[1]);
        let diff = y - loc;
        let var = scale * scale;
        hess[0] = 1.0 / var;
        hess[1] = 3.0 * diff * diff / (var * var) - 1.0 / var;
    }

    fn fisher_diagonal(&self, params: &[f64], fisher: &mut [f64]) {
        let var = params[1] * params[1];
        fisher[0] = 1.0 / var;
        fisher[1] = 2.0 / var;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_normal_creation() {
        assert_eq!(Normal.n_params(), 2);
        assert_eq!(Normal.param_names(), vec!["loc", "scale"]);
    }

    #[test]
    fn test_normal_nll() {
        let nll = Normal.nll(&[0.0, 1.0], 0.0);
        assert_relative_eq!(nll, 0.5 * (2.0 * PI).ln(), epsilon = 1e-12);

        let wide = Normal.nll(&[0.0, 2.0], 0.0);
        let narrow = Normal.nll(&[0.0, 0.5], 0.0);
        assert!(narrow < wide);
    }

    #[test]
    fn test_normal_starting_params() {
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let start = Normal.starting_params(&y.view()).unwrap();
        assert_relative_eq!(start[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(start[1], 2.0f64.sqrt().ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_normal_gradient_in_raw_space() {
        // raw (loc, ln scale) = (1, ln 2), y = 3 -> z = 1
        let y = array![3.0];
        let raw = array![[1.0, 2.0f64.ln()]];
        let gh = Normal.gradient_and_hessian(&y.view(), &raw.view(), false).unwrap();
        assert_relative_eq!(gh.gradients[[0, 0]], -0.5, epsilon = 1e-12);
        assert_relative_eq!(gh.gradients[[0, 1]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(gh.hessians[[0, 0]], 0.25, epsilon = 1e-12);
        assert_relative_eq!(gh.hessians[[0, 1]], 2.0, epsilon = 1e-12);

        // log-scale curvature is 2z², so it vanishes at the location
        let at_loc = Normal
            .gradient_and_hessian(&array![1.0].view(), &raw.view(), false)
            .unwrap();
        assert_eq!(at_loc.hessians[[0, 1]], crate::utils::HESSIAN_FLOOR);
        let far = Normal
            .gradient_and_hessian(&array![7.0].view(), &raw.view(), false)
            .unwrap();
        assert_relative_eq!(far.hessians[[0, 1]], 18.0, epsilon = 1e-10);

        let nat = Normal.gradient_and_hessian(&y.view(), &raw.view(), true).unwrap();
        assert_relative_eq!(nat.gradients[[0, 0]], -2.0, epsilon = 1e-12);
        assert_relative_eq!(nat.hessians[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normal_transform_params() {
        let raw = array![[0.0, 0.0], [1.0, 1.0]];
        let transformed = Normal.transform_params(&raw.view());

        assert_relative_eq!(transformed[[0, 0]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(transformed[[1, 0]], 1.0, epsilon = 1e-12);
        assert_relative_eq!(transformed[[0, 1]], 1.0, epsilon = 1e-12);
        assert!(transformed[[1, 1]] > transformed[[0, 1]]);
    }
}
