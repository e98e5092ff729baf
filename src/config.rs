//! Estimator configuration.

use crate::backend::{BoosterParams, ParamValue, TrainConfig};
use crate::error::{DistBoostError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Configuration of a [`DistributionRegressor`](crate::model::DistributionRegressor).
///
/// Missing fields fall back to their defaults when deserializing, so a JSON
/// document only needs to name what it changes:
///
/// ```
/// use distboost::RegressorConfig;
///
/// let config = RegressorConfig::from_json(r#"{"distribution": "lognormal", "max_depth": 3}"#).unwrap();
/// assert_eq!(config.distribution, "lognormal");
/// assert!(config.natural_gradient);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressorConfig {
    /// Registry name of the distribution family.
    pub distribution: String,
    /// Rescale gradients by the inverse Fisher information.
    pub natural_gradient: bool,
    /// Number of boosting rounds.
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    /// Minimum loss reduction to split a leaf.
    pub gamma: f64,
    /// Row subsampling ratio per round.
    pub subsample: f64,
    pub seed: u64,
    /// Additional engine parameters, passed through unchanged.
    pub extra: BTreeMap<String, ParamValue>,
}

impl Default for RegressorConfig {
    fn default() -> Self {
        Self {
            distribution: "normal".to_string(),
            natural_gradient: true,
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            subsample: 1.0,
            seed: 0,
            extra: BTreeMap::new(),
        }
    }
}

impl RegressorConfig {
    /// Default configuration for the named distribution.
    pub fn new(distribution: &str) -> Self {
        Self {
            distribution: distribution.to_string(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_distribution(mut self, distribution: &str) -> Self {
        self.distribution = distribution.to_string();
        self
    }

    pub fn with_natural_gradient(mut self, natural_gradient: bool) -> Self {
        self.natural_gradient = natural_gradient;
        self
    }

    pub fn with_n_estimators(mut self, n_estimators: usize) -> Self {
        self.n_estimators = n_estimators;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_min_child_weight(mut self, min_child_weight: f64) -> Self {
        self.min_child_weight = min_child_weight;
        self
    }

    pub fn with_reg_lambda(mut self, reg_lambda: f64) -> Self {
        self.reg_lambda = reg_lambda;
        self
    }

    pub fn with_reg_alpha(mut self, reg_alpha: f64) -> Self {
        self.reg_alpha = reg_alpha;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_subsample(mut self, subsample: f64) -> Self {
        self.subsample = subsample;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set an additional engine parameter.
    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Reject values no engine could accept.
    pub fn validate(&self) -> Result<()> {
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(DistBoostError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(DistBoostError::InvalidParameter(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        for (name, value) in [
            ("min_child_weight", self.min_child_weight),
            ("reg_lambda", self.reg_lambda),
            ("reg_alpha", self.reg_alpha),
            ("gamma", self.gamma),
        ] {
            if value < 0.0 || value.is_nan() {
                return Err(DistBoostError::InvalidParameter(format!(
                    "{} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Engine parameters for a model with `n_params` outputs per row.
    ///
    /// The engine's own metric is disabled and its baseline forced to zero;
    /// the starting values travel in the base margins instead.
    pub fn to_booster_params(&self, n_params: usize) -> BoosterParams {
        let mut params = BoosterParams::new();
        for (key, value) in &self.extra {
            params.set(key, value.clone());
        }
        params.set("eta", self.learning_rate);
        params.set("max_depth", self.max_depth);
        params.set("min_child_weight", self.min_child_weight);
        params.set("lambda", self.reg_lambda);
        params.set("alpha", self.reg_alpha);
        params.set("gamma", self.gamma);
        params.set("subsample", self.subsample);
        params.set("seed", ParamValue::Int(self.seed as i64));
        params.set("num_class", n_params);
        params.set("base_score", 0.0);
        params.set("disable_default_eval_metric", true);
        params
    }

    /// Training loop settings for one fit.
    pub fn train_config(&self, early_stopping_rounds: Option<usize>, verbose: bool) -> TrainConfig {
        TrainConfig {
            num_boost_round: self.n_estimators,
            early_stopping_rounds,
            verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegressorConfig::default();
        assert_eq!(config.distribution, "normal");
        assert!(config.natural_gradient);
        assert_eq!(config.n_estimators, 100);
        assert_eq!(config.learning_rate, 0.3);
        assert_eq!(config.max_depth, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RegressorConfig::from_json(
            r#"{"distribution": "laplace", "n_estimators": 10, "extra": {"nthread": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.distribution, "laplace");
        assert_eq!(config.n_estimators, 10);
        assert_eq!(config.reg_lambda, 1.0);
        assert_eq!(config.extra["nthread"], ParamValue::Int(2));
    }

    #[test]
    fn test_json_round_trip() {
        let config = RegressorConfig::new("poisson")
            .with_learning_rate(0.05)
            .with_param("tree_method", "exact");
        let back = RegressorConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_booster_params_pin_engine_contract() {
        let config = RegressorConfig::default()
            .with_max_depth(3)
            .with_param("base_score", 0.5)
            .with_param("nthread", 4usize);
        let params = config.to_booster_params(2);
        assert_eq!(params.get_usize(&["num_class"], 1).unwrap(), 2);
        assert_eq!(params.get_usize(&["max_depth"], 6).unwrap(), 3);
        assert_eq!(params.get_f64(&["base_score"], 0.5).unwrap(), 0.0);
        assert!(params.get_bool("disable_default_eval_metric", false).unwrap());
        assert_eq!(params.get("nthread"), Some(&ParamValue::Int(4)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RegressorConfig::default().with_learning_rate(0.0).validate().is_err());
        assert!(RegressorConfig::default().with_subsample(0.0).validate().is_err());
        assert!(RegressorConfig::default().with_reg_alpha(-1.0).validate().is_err());
    }

    #[test]
    fn test_train_config() {
        let tc = RegressorConfig::default().with_n_estimators(7).train_config(Some(3), false);
        assert_eq!(tc.num_boost_round, 7);
        assert_eq!(tc.early_stopping_rounds, Some(3));
        assert!(!tc.verbose);
    }
}
