//! Log-normal distribution implementation.

use super::base::{degenerate_labels, is_constant, mean_and_std, DistributionFamily, DistributionParam};
use crate::error::Result;
use crate::utils::Link;
use ndarray::{array, Array1, ArrayView1};
use statrs::distribution::{Continuous, LogNormal as StatrsLogNormal};

const PARAMS: [DistributionParam; 2] = [
    DistributionParam::new("scale", Link::Exp),
    DistributionParam::new("s", Link::Exp),
];

/// Log-normal distribution parameterized by `scale = exp(μ)` (the median) and
/// the log-space standard deviation `s`; both are boosted on the log scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogNormal;

impl DistributionFamily for LogNormal {
    fn name(&self) -> &'static str {
        "lognormal"
    }

    fn params(&self) -> &'static [DistributionParam] {
        &PARAMS
    }

    fn metric_name(&self) -> &'static str {
        "lognormal-nll"
    }

    fn in_support(&self, y: f64) -> bool {
        y.is_finite() && y > 0.0
    }

    fn support_description(&self) -> &'static str {
        "strictly positive finite values"
    }

    fn estimate_start(&self, y: &ArrayView1<f64>) -> Result<Array1<f64>> {
        let log_y = y.mapv(f64::ln);
        if is_constant(&log_y.view()) {
            return Err(degenerate_labels(self.name()));
        }
        let (mean, std) = mean_and_std(&log_y.view());
        if std <= 0.0 {
            return Err(degenerate_labels(self.name()));
        }
        Ok(array![mean, std.ln()])
    }

    fn nll(&self, params: &[f64], y: f64) -> f64 {
        match StatrsLogNormal::new(params[0].ln(), params[1]) {
            Ok(dist) => -dist.ln_pdf(y),
            Err(_) => f64::INFINITY,
        }
    }

    /// With m = ln(scale) and NLL = ln y + 0.5*ln(2π) + ln s + (ln y - m)²/(2s²):
    /// - ∂NLL/∂scale = (m - ln y) / (s² · scale)
    /// - ∂NLL/∂s = 1/s - (ln y - m)² / s³
    fn nll_gradient(&self, params: &[f64], y: f64, grad: &mut [f64]) {
        let (scale, s) = (params[0], params[1]);
        let diff = y.ln() - scale.ln();
        let var = s * s;
        grad[0] = -diff / (var * scale);
        grad[1] = 1.0 / s - diff * diff / (var * s);
    }

    /// - ∂²NLL/∂scale² = (1 + ln y - m) / (s² · scale²)
    /// - ∂²NLL/∂s² = 3(ln y - m)²/s⁴ - 1/s²
    fn nll_hessian(&self, params: &[f64], y: f64, hess: &mut [f64]) {
        let (scale, s) = (params[0], params[1]);
        let diff = y.ln() - scale.ln();
        let var = s * s;
        hess[0] = (1.0 + diff) / (var * scale * scale);
        hess[1] = 3.0 * diff * diff / (var * var) - 1.0 / var;
    }

    fn fisher_diagonal(&self, params: &[f64], fisher: &mut [f64]) {
        let (scale, s) = (params[0], params[1]);
        let var = s * s;
        fisher[0] = 1.0 / (var * scale * scale);
        fisher[1] = 2.0 / var;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::f64::consts::PI;

    #[test]
    fn test_log_normal_creation() {
        assert_eq!(LogNormal.n_params(), 2);
        assert_eq!(LogNormal.param_names(), vec!["scale", "s"]);
    }

    #[test]
    fn test_log_normal_nll_matches_closed_form() {
        let (scale, s, y) = (2.0f64, 0.5f64, 3.0f64);
        let z = (y.ln() - scale.ln()) / s;
        let expected = y.ln() + 0.5 * (2.0 * PI).ln() + s.ln() + 0.5 * z * z;
        assert_relative_eq!(LogNormal.nll(&[scale, s], y), expected, epsilon = 1e-10);
    }

    #[test]
    fn test_log_normal_starting_params() {
        let y = array![1.0, std::f64::consts::E, std::f64::consts::E.powi(2)];
        let start = LogNormal.starting_params(&y.view()).unwrap();
        assert_relative_eq!(start[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(start[1], (2.0f64 / 3.0).sqrt().ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_log_normal_rejects_non_positive() {
        let y = array![1.0, 0.0, 2.0];
        assert!(LogNormal.starting_params(&y.view()).is_err());
        let y = array![1.0, -1.0, 2.0];
        assert!(LogNormal.starting_params(&y.view()).is_err());
    }

    #[test]
    fn test_log_normal_gradient_matches_normal_on_log_labels() {
        // raw (m, ln s) against ln y behaves like the normal family on (loc, ln scale)
        let y = array![4.0];
        let raw = array![[0.3, -0.2]];
        let gh = LogNormal.gradient_and_hessian(&y.view(), &raw.view(), false).unwrap();

        let s = (-0.2f64).exp();
        let z = (4.0f64.ln() - 0.3) / s;
        assert_relative_eq!(gh.gradients[[0, 0]], -z / s, epsilon = 1e-10);
        assert_relative_eq!(gh.gradients[[0, 1]], 1.0 - z * z, epsilon = 1e-10);
        assert_relative_eq!(gh.hessians[[0, 0]], 1.0 / (s * s), epsilon = 1e-10);
        assert_relative_eq!(gh.hessians[[0, 1]], 2.0 * z * z, epsilon = 1e-10);
    }
}
