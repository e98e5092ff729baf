//! Distribution families for distributional boosting.
//!
//! Each family lives in its own module and implements [`DistributionFamily`].
//! The closed [`Distribution`] enum is what the rest of the crate passes
//! around; it dispatches to the family implementation and is resolved from a
//! name through the [`registry`].

pub mod base;
mod exponential;
mod laplace;
mod log_normal;
mod normal;
mod poisson;
pub mod registry;

pub use base::{DistributionFamily, DistributionParam, GradientsAndHessians};
pub use exponential::Exponential;
pub use laplace::Laplace;
pub use log_normal::LogNormal;
pub use normal::Normal;
pub use poisson::Poisson;
pub use registry::{describe_distributions, get_distribution, list_distributions};

use crate::error::Result;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The registered distribution families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    #[default]
    Normal,
    LogNormal,
    Laplace,
    Exponential,
    Poisson,
}

impl Distribution {
    /// Every registered variant, in registry order.
    pub const ALL: [Distribution; 5] = [
        Distribution::Normal,
        Distribution::LogNormal,
        Distribution::Laplace,
        Distribution::Exponential,
        Distribution::Poisson,
    ];

    /// The family implementation behind this variant.
    pub fn family(&self) -> &'static dyn DistributionFamily {
        match self {
            Distribution::Normal => &Normal,
            Distribution::LogNormal => &LogNormal,
            Distribution::Laplace => &Laplace,
            Distribution::Exponential => &Exponential,
            Distribution::Poisson => &Poisson,
        }
    }

    /// Canonical registry name.
    pub fn name(&self) -> &'static str {
        self.family().name()
    }

    /// Ordered parameters with their links.
    pub fn params(&self) -> &'static [DistributionParam] {
        self.family().params()
    }

    /// Parameter names in order.
    pub fn param_names(&self) -> Vec<&'static str> {
        self.family().param_names()
    }

    /// Number of distributional parameters (K).
    pub fn n_params(&self) -> usize {
        self.family().n_params()
    }

    /// Name of the evaluation metric.
    pub fn metric_name(&self) -> &'static str {
        self.family().metric_name()
    }

    /// Check labels against the support of the distribution.
    pub fn validate_labels(&self, y: &ArrayView1<f64>) -> Result<()> {
        self.family().validate_labels(y)
    }

    /// Constant raw starting values, one per parameter.
    pub fn starting_params(&self, y: &ArrayView1<f64>) -> Result<Array1<f64>> {
        self.family().starting_params(y)
    }

    /// Transform raw predictions (n, K) into K natural-parameter vectors.
    pub fn predict(&self, raw: &ArrayView2<f64>) -> Result<Vec<Array1<f64>>> {
        self.family().predict(raw)
    }

    /// Gradient and Hessian w.r.t. the raw scores.
    pub fn gradient_and_hessian(
        &self,
        y: &ArrayView1<f64>,
        raw: &ArrayView2<f64>,
        natural: bool,
    ) -> Result<GradientsAndHessians> {
        self.family().gradient_and_hessian(y, raw, natural)
    }

    /// Mean negative log-likelihood.
    pub fn loss(&self, y: &ArrayView1<f64>, raw: &ArrayView2<f64>) -> Result<f64> {
        self.family().loss(y, raw)
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Distribution {
    type Err = crate::error::DistBoostError;

    fn from_str(s: &str) -> Result<Self> {
        get_distribution(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_names_are_unique() {
        let mut names: Vec<_> = Distribution::ALL.iter().map(|d| d.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Distribution::ALL.len());
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for dist in Distribution::ALL {
            let parsed: Distribution = dist.to_string().parse().unwrap();
            assert_eq!(parsed, dist);
        }
    }

    #[test]
    fn test_params_fit_in_scratch_buffers() {
        for dist in Distribution::ALL {
            assert!(dist.n_params() <= base::MAX_PARAMS);
            assert!(dist.n_params() >= 1);
        }
    }

    #[test]
    fn test_default_is_normal() {
        assert_eq!(Distribution::default(), Distribution::Normal);
        assert_eq!(Distribution::Normal.param_names(), vec!["loc", "scale"]);
    }
}
