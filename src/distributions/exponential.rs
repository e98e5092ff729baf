//! Exponential distribution implementation.

use super::base::{DistributionFamily, DistributionParam};
use crate::error::{DistBoostError, Result};
use crate::utils::Link;
use ndarray::{array, Array1, ArrayView1};
use statrs::distribution::{Continuous, Exp as StatrsExp};

const PARAMS: [DistributionParam; 1] = [DistributionParam::new("scale", Link::Exp)];

/// Exponential distribution parameterized by its scale (the mean).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exponential;

impl DistributionFamily for Exponential {
    fn name(&self) -> &'static str {
        "exponential"
    }

    fn params(&self) -> &'static [DistributionParam] {
        &PARAMS
    }

    fn metric_name(&self) -> &'static str {
        "exponential-nll"
    }

    fn in_support(&self, y: f64) -> bool {
        y.is_finite() && y >= 0.0
    }

    fn support_description(&self) -> &'static str {
        "non-negative finite values"
    }

    fn estimate_start(&self, y: &ArrayView1<f64>) -> Result<Array1<f64>> {
        let mean = y.sum() / y.len() as f64;
        if mean <= 0.0 {
            return Err(DistBoostError::InvalidInput(
                "exponential starting value needs a positive label mean".to_string(),
            ));
        }
        Ok(array![mean.ln()])
    }

    fn nll(&self, params: &[f64], y: f64) -> f64 {
        match StatrsExp::new(1.0 / params[0]) {
            Ok(dist) => -dist.ln_pdf(y),
            Err(_) => f64::INFINITY,
        }
    }

    fn nll_gradient(&self, params: &[f64], y: f64, grad: &mut [f64]) {
        let scale = params[0];
        grad[0] = 1.0 / scale - y / (scale * scale);
    }

    fn nll_hessian(&self, params: &[f64], y: f64, hess: &mut [f64]) {
        let scale = params[0];
        hess[0] = 2.0 * y / scale.powi(3) - 1.0 / (scale * scale);
    }

    fn fisher_diagonal(&self, params: &[f64], fisher: &mut [f64]) {
        fisher[0] = 1.0 / (params[0] * params[0]);
    }
}
