//! Backend trait definitions.
//!
//! These traits are the boundary to the boosting engine: a dataset handle
//! carrying labels and per-row base margins, a model type exposing a training
//! entry point that accepts a custom objective and metric, and a prediction
//! entry point returning flat margin vectors.

use crate::error::{DistBoostError, Result};
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

/// Training configuration for gradient boosting.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Number of boosting rounds.
    pub num_boost_round: usize,
    /// Stop once the last evaluation set's metric has not improved for this
    /// many consecutive rounds (None to train all rounds).
    pub early_stopping_rounds: Option<usize>,
    /// Log evaluation results every round.
    pub verbose: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_boost_round: 100,
            early_stopping_rounds: None,
            verbose: true,
        }
    }
}

/// A named evaluation result for one dataset in one round.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalMetric {
    /// Metric name, e.g. "normal-nll".
    pub name: String,
    /// Metric value.
    pub value: f64,
    /// Whether lower values indicate a better fit.
    pub lower_is_better: bool,
}

/// Custom training objective: flat predictions and labels in, flat gradient
/// and Hessian out, both in the sample-major layout of the predictions.
pub trait CustomObjective: Sync {
    fn gradients(
        &self,
        predictions: &ArrayView1<f64>,
        labels: &ArrayView1<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>)>;
}

/// Custom evaluation metric over flat predictions and labels.
pub trait CustomMetric: Sync {
    fn evaluate(&self, predictions: &ArrayView1<f64>, labels: &ArrayView1<f64>)
        -> Result<EvalMetric>;
}

/// Per-dataset, per-metric history: `history[dataset][metric][round]`.
pub type EvalHistory = BTreeMap<String, BTreeMap<String, Vec<f64>>>;

/// Training result containing metadata about the training run.
#[derive(Debug, Clone, Default)]
pub struct TrainingResult {
    /// Total number of boosting rounds completed.
    pub n_iterations: usize,
    /// Best round on the monitored metric (set when early stopping is enabled).
    pub best_iteration: Option<usize>,
    /// Monitored metric value at `best_iteration`.
    pub best_score: Option<f64>,
    /// Evaluation history for every evaluation set.
    pub history: EvalHistory,
    /// Whether training stopped early.
    pub stopped_early: bool,
}

/// Options for the prediction entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredictOptions {
    /// Return raw margins rather than the engine's transformed output.
    pub output_margin: bool,
    /// Restrict prediction to these boosting rounds. When unset, a model trained
    /// with early stopping uses rounds up to and including its best iteration,
    /// whether or not patience ran out. `0..0` selects every stored round.
    pub iteration_range: Option<Range<usize>>,
}

impl PredictOptions {
    /// Margin output over the default iteration range.
    pub fn margin() -> Self {
        Self {
            output_margin: true,
            iteration_range: None,
        }
    }

    /// Restrict to the given rounds.
    pub fn with_iteration_range(mut self, range: Range<usize>) -> Self {
        self.iteration_range = Some(range);
        self
    }
}

/// Tracks the monitored metric and decides when training should stop.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    /// Number of rounds to wait for improvement before stopping.
    patience: usize,
    /// Whether lower is better.
    minimize: bool,
    best_value: Option<f64>,
    best_iteration: usize,
    rounds_without_improvement: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, minimize: bool) -> Self {
        Self {
            patience,
            minimize,
            best_value: None,
            best_iteration: 0,
            rounds_without_improvement: 0,
        }
    }

    /// Record the metric for `iteration`; returns `true` when training should stop.
    pub fn update(&mut self, iteration: usize, value: f64) -> bool {
        let improved = match self.best_value {
            None => true,
            Some(best) if self.minimize => value < best,
            Some(best) => value > best,
        };

        if improved {
            self.best_value = Some(value);
            self.best_iteration = iteration;
            self.rounds_without_improvement = 0;
            false
        } else {
            self.rounds_without_improvement += 1;
            self.rounds_without_improvement >= self.patience
        }
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }
}

/// Parameter value types.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::String(s) => s.parse().ok(),
            ParamValue::Bool(_) => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            ParamValue::Int(v) => Some(*v != 0),
            ParamValue::String(s) => s.parse().ok(),
            ParamValue::Float(_) => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::String(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

/// Engine hyperparameters keyed by XGBoost-style names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoosterParams {
    params: HashMap<String, ParamValue>,
}

impl BoosterParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter by name.
    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.params.insert(key.to_string(), value.into());
    }

    /// Builder-style [`BoosterParams::set`].
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Get a parameter value.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    /// First of `keys` that is set, read as a float.
    pub fn get_f64(&self, keys: &[&str], default: f64) -> Result<f64> {
        match keys.iter().find_map(|k| self.params.get(*k).map(|v| (*k, v))) {
            Some((key, value)) => value.as_f64().ok_or_else(|| {
                DistBoostError::InvalidParameter(format!("{} must be numeric, got {}", key, value))
            }),
            None => Ok(default),
        }
    }

    /// First of `keys` that is set, read as a non-negative integer.
    pub fn get_usize(&self, keys: &[&str], default: usize) -> Result<usize> {
        let value = self.get_f64(keys, default as f64)?;
        if value < 0.0 || value.fract() != 0.0 {
            return Err(DistBoostError::InvalidParameter(format!(
                "{} must be a non-negative integer, got {}",
                keys[0], value
            )));
        }
        Ok(value as usize)
    }

    /// Read a boolean flag.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.params.get(key) {
            Some(value) => value.as_bool().ok_or_else(|| {
                DistBoostError::InvalidParameter(format!("{} must be a boolean, got {}", key, value))
            }),
            None => Ok(default),
        }
    }

    /// Iterate over all parameters.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.params.iter()
    }
}

/// Backend-specific dataset wrapper (the engine's data handle).
pub trait BackendDataset: Sized {
    /// Create an unlabeled dataset for prediction.
    fn from_features(features: ArrayView2<f64>) -> Result<Self>;

    /// Create a dataset from features and labels.
    fn from_data(features: ArrayView2<f64>, labels: ArrayView1<f64>) -> Result<Self>;

    /// Attach a base margin of length `num_rows * n_outputs`.
    fn set_base_margin(&mut self, base_margin: &Array1<f64>) -> Result<()>;

    /// Get the number of rows.
    fn num_rows(&self) -> usize;

    /// Get the number of feature columns.
    fn num_cols(&self) -> usize;

    /// Get the labels.
    fn labels(&self) -> Result<Array1<f64>>;
}

/// Backend-specific trained ensemble.
pub trait BackendModel: Sized + std::fmt::Debug {
    type Dataset: BackendDataset;

    /// Train with a custom objective and metric.
    ///
    /// `evals` are `(dataset, name)` pairs evaluated after every round; early
    /// stopping monitors the last one.
    fn train<O, M>(
        params: &BoosterParams,
        train_data: &Self::Dataset,
        evals: &[(&Self::Dataset, &str)],
        config: &TrainConfig,
        objective: &O,
        metric: &M,
    ) -> Result<(Self, TrainingResult)>
    where
        O: CustomObjective,
        M: CustomMetric;

    /// Predict a flat vector of length `num_rows * num_groups`, including the
    /// dataset's base margin.
    fn predict(&self, data: &Self::Dataset, options: &PredictOptions) -> Result<Array1<f64>>;

    /// Number of outputs per row.
    fn num_groups(&self) -> usize;

    /// Number of boosting rounds stored in the model.
    fn num_rounds(&self) -> usize;

    /// Best round found by early stopping, if it was enabled.
    fn best_iteration(&self) -> Option<usize>;

    /// Save model to a writer.
    fn save_to_writer<W: std::io::Write>(&self, writer: &mut W) -> Result<()>;

    /// Load model from a reader.
    fn load_from_reader<R: std::io::Read>(reader: &mut R) -> Result<Self>;
}

/// The main backend trait that ties everything together.
pub trait Backend: Sized + 'static {
    /// The dataset type for this backend.
    type Dataset: BackendDataset;
    /// The model type for this backend.
    type Model: BackendModel<Dataset = Self::Dataset>;

    /// Get the backend name.
    fn name() -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_stopping_waits_for_patience() {
        let mut es = EarlyStopping::new(2, true);
        assert!(!es.update(0, 1.0));
        assert!(!es.update(1, 0.8));
        assert!(!es.update(2, 0.9));
        assert!(es.update(3, 0.85));
        assert_eq!(es.best_iteration(), 1);
        assert_eq!(es.best_value(), Some(0.8));
    }

    #[test]
    fn test_early_stopping_maximize() {
        let mut es = EarlyStopping::new(1, false);
        assert!(!es.update(0, 0.5));
        assert!(!es.update(1, 0.6));
        assert!(es.update(2, 0.55));
        assert_eq!(es.best_iteration(), 1);
    }

    #[test]
    fn test_booster_params_getters() {
        let params = BoosterParams::new()
            .with("eta", 0.1)
            .with("max_depth", 4usize)
            .with("num_class", "3")
            .with("disable_default_eval_metric", true);

        assert_eq!(params.get_f64(&["learning_rate", "eta"], 0.3).unwrap(), 0.1);
        assert_eq!(params.get_usize(&["max_depth"], 6).unwrap(), 4);
        assert_eq!(params.get_usize(&["num_class"], 1).unwrap(), 3);
        assert_eq!(params.get_usize(&["missing"], 7).unwrap(), 7);
        assert!(params.get_bool("disable_default_eval_metric", false).unwrap());
    }

    #[test]
    fn test_booster_params_rejects_bad_values() {
        let params = BoosterParams::new()
            .with("max_depth", 2.5)
            .with("eta", "fast");
        assert!(params.get_usize(&["max_depth"], 6).is_err());
        assert!(params.get_f64(&["eta"], 0.3).is_err());
    }

    #[test]
    fn test_param_value_deserializes_untagged() {
        let v: ParamValue = serde_json::from_str("0.5").unwrap();
        assert_eq!(v, ParamValue::Float(0.5));
        let v: ParamValue = serde_json::from_str("3").unwrap();
        assert_eq!(v, ParamValue::Int(3));
        let v: ParamValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, ParamValue::Bool(true));
        let v: ParamValue = serde_json::from_str("\"hist\"").unwrap();
        assert_eq!(v, ParamValue::String("hist".to_string()));
    }
}
