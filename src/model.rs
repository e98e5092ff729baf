//! The distributional regressor.
//!
//! [`DistributionRegressor`] resolves a distribution family, seeds every
//! output group with a constant starting value carried in the base margins,
//! trains the engine with the family's gradients, and decodes raw margins back
//! into distribution parameters at prediction time.

#[cfg(feature = "xgboost")]
use crate::backend::XGBoostBackend;
use crate::backend::{
    Backend, BackendDataset, BackendModel, EvalHistory, PredictOptions, TrainingResult,
};
use crate::config::RegressorConfig;
use crate::distributions::{get_distribution, Distribution};
use crate::error::{DistBoostError, Result};
use crate::objective::ObjectiveAdapter;
use crate::packing::{broadcast_starting_params, unpack};
use crate::utils::bincode_options;
use bincode::Options;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;

/// Bumped whenever the saved header layout changes.
const FORMAT_VERSION: u32 = 1;

/// Upper bound on the encoded header; a corrupt length inside it fails to decode
/// instead of allocating.
const MAX_HEADER_BYTES: u64 = 1 << 20;

/// Per-call options for [`DistributionRegressor::fit`].
#[derive(Debug, Clone)]
pub struct FitOptions<'a> {
    /// Held-out `(features, labels)` pairs evaluated every round. They are
    /// reported as `validation_0`, `validation_1`, ...
    pub eval_set: Vec<(ArrayView2<'a, f64>, ArrayView1<'a, f64>)>,
    /// Stop when the last evaluation set has not improved for this many rounds.
    pub early_stopping_rounds: Option<usize>,
    /// Log evaluation results each round.
    pub verbose: bool,
}

impl Default for FitOptions<'_> {
    fn default() -> Self {
        Self {
            eval_set: Vec::new(),
            early_stopping_rounds: None,
            verbose: true,
        }
    }
}

impl<'a> FitOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eval_set(mut self, x: ArrayView2<'a, f64>, y: ArrayView1<'a, f64>) -> Self {
        self.eval_set.push((x, y));
        self
    }

    pub fn with_early_stopping_rounds(mut self, rounds: usize) -> Self {
        self.early_stopping_rounds = Some(rounds);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Predicted distribution parameters, one vector per parameter in the
/// family's parameter order.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionPrediction {
    names: Vec<&'static str>,
    params: Vec<Array1<f64>>,
}

impl DistributionPrediction {
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    pub fn params(&self) -> &[Array1<f64>] {
        &self.params
    }

    /// Look up a parameter vector by name, e.g. `"scale"`.
    pub fn get(&self, name: &str) -> Option<&Array1<f64>> {
        self.names
            .iter()
            .position(|n| *n == name)
            .map(|i| &self.params[i])
    }

    pub fn n_params(&self) -> usize {
        self.params.len()
    }

    pub fn n_samples(&self) -> usize {
        self.params.first().map_or(0, |p| p.len())
    }

    /// Parameters as a (n_samples, n_params) matrix.
    pub fn to_matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.n_samples(), self.n_params()), |(i, j)| {
            self.params[j][i]
        })
    }

    pub fn into_params(self) -> Vec<Array1<f64>> {
        self.params
    }
}

/// Everything a fit produces.
#[derive(Debug)]
struct FittedState<M> {
    model: M,
    distribution: Distribution,
    starting_params: Array1<f64>,
    n_features: usize,
    training: Option<TrainingResult>,
}

/// Saved ahead of the engine's own model bytes.
#[derive(Serialize, Deserialize)]
struct SavedHeader {
    format_version: u32,
    backend: String,
    distribution: Distribution,
    starting_params: Vec<f64>,
    n_features: usize,
    /// JSON, since the free-form parameter map is self-describing.
    config: String,
}

/// Gradient-boosted model of a full predictive distribution.
///
/// # Example
///
/// ```no_run
/// use distboost::backend::StumpBackend;
/// use distboost::{DistributionRegressor, FitOptions, RegressorConfig};
/// use ndarray::{Array1, Array2};
///
/// let x = Array2::<f64>::zeros((100, 3));
/// let y = Array1::linspace(1.0, 10.0, 100);
///
/// let config = RegressorConfig::new("normal").with_n_estimators(50);
/// let mut model = DistributionRegressor::<StumpBackend>::with_config(config);
/// model.fit(&x.view(), &y.view(), FitOptions::new().with_verbose(false))?;
///
/// let dist = model.predict_distribution(&x.view())?;
/// let scale = dist.get("scale").unwrap();
/// # Ok::<(), distboost::DistBoostError>(())
/// ```
#[derive(Debug)]
pub struct DistributionRegressor<B: Backend> {
    config: RegressorConfig,
    fitted: Option<FittedState<B::Model>>,
    _backend: PhantomData<B>,
}

impl<B> Default for DistributionRegressor<B>
where
    B: Backend,
{
    fn default() -> Self {
        Self::with_config(RegressorConfig::default())
    }
}

#[cfg(feature = "xgboost")]
impl DistributionRegressor<XGBoostBackend> {
    /// A regressor on XGBoost.
    pub fn new(config: RegressorConfig) -> Self {
        Self::with_config(config)
    }
}

impl<B: Backend> DistributionRegressor<B> {
    /// A regressor on the backend `B`.
    pub fn with_config(config: RegressorConfig) -> Self {
        Self {
            config,
            fitted: None,
            _backend: PhantomData,
        }
    }

    pub fn config(&self) -> &RegressorConfig {
        &self.config
    }

    /// Replace the configuration; takes effect at the next `fit`.
    pub fn set_config(&mut self, config: RegressorConfig) {
        self.config = config;
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Distribution resolved by the last successful fit.
    pub fn distribution(&self) -> Option<Distribution> {
        self.fitted.as_ref().map(|f| f.distribution)
    }

    /// Raw starting values stored by the last successful fit.
    pub fn starting_params(&self) -> Option<&Array1<f64>> {
        self.fitted.as_ref().map(|f| &f.starting_params)
    }

    pub fn best_iteration(&self) -> Option<usize> {
        self.fitted.as_ref().and_then(|f| f.model.best_iteration())
    }

    /// Number of boosting rounds in the fitted ensemble.
    pub fn num_rounds(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.model.num_rounds())
    }

    /// Evaluation history of the last fit (absent for loaded models).
    pub fn evals_result(&self) -> Option<&EvalHistory> {
        self.training_result().map(|t| &t.history)
    }

    pub fn training_result(&self) -> Option<&TrainingResult> {
        self.fitted.as_ref().and_then(|f| f.training.as_ref())
    }

    /// Underlying engine model.
    pub fn booster(&self) -> Option<&B::Model> {
        self.fitted.as_ref().map(|f| &f.model)
    }

    /// Fit the model.
    ///
    /// Any previous fit is discarded first; on error the regressor is left
    /// unfitted.
    pub fn fit(
        &mut self,
        x: &ArrayView2<f64>,
        y: &ArrayView1<f64>,
        options: FitOptions<'_>,
    ) -> Result<()> {
        self.fitted = None;
        self.config.validate()?;

        let distribution = get_distribution(&self.config.distribution)?;
        if x.nrows() != y.len() {
            return Err(DistBoostError::shape(
                format!("{} labels", x.nrows()),
                format!("{} labels", y.len()),
            ));
        }

        let starting_params = distribution.starting_params(y)?;
        log::debug!(
            "fitting {} ({}) with starting params {:?}",
            distribution,
            distribution.param_names().join(", "),
            starting_params.to_vec()
        );

        for (i, (xe, ye)) in options.eval_set.iter().enumerate() {
            if xe.ncols() != x.ncols() || xe.nrows() != ye.len() {
                return Err(DistBoostError::shape(
                    format!("({}, {}) with {} labels", xe.nrows(), x.ncols(), xe.nrows()),
                    format!("({}, {}) with {} labels in eval set {}", xe.nrows(), xe.ncols(), ye.len(), i),
                ));
            }
            distribution.validate_labels(ye)?;
        }

        let n_params = distribution.n_params();
        let mut train = B::Dataset::from_data(x.view(), y.view())?;
        train.set_base_margin(&broadcast_starting_params(&starting_params.view(), x.nrows()))?;

        let mut eval_data = Vec::with_capacity(options.eval_set.len());
        for (xe, ye) in &options.eval_set {
            let mut data = B::Dataset::from_data(xe.view(), ye.view())?;
            data.set_base_margin(&broadcast_starting_params(&starting_params.view(), xe.nrows()))?;
            eval_data.push(data);
        }
        let names: Vec<String> = (0..eval_data.len())
            .map(|i| format!("validation_{}", i))
            .collect();
        let evals: Vec<(&B::Dataset, &str)> = eval_data
            .iter()
            .zip(names.iter())
            .map(|(d, n)| (d, n.as_str()))
            .collect();

        let params = self.config.to_booster_params(n_params);
        let train_config = self
            .config
            .train_config(options.early_stopping_rounds, options.verbose);
        let adapter = ObjectiveAdapter::new(distribution, self.config.natural_gradient);

        let (model, result) =
            B::Model::train(&params, &train, &evals, &train_config, &adapter, &adapter)?;
        if model.num_groups() != n_params {
            return Err(DistBoostError::Engine(format!(
                "engine produced {} output groups, expected {}",
                model.num_groups(),
                n_params
            )));
        }

        self.fitted = Some(FittedState {
            model,
            distribution,
            starting_params,
            n_features: x.ncols(),
            training: Some(result),
        });
        Ok(())
    }

    /// Point prediction: the first distribution parameter (e.g. the mean).
    pub fn predict(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
        self.predict_with(x, &PredictOptions::default())
    }

    pub fn predict_with(&self, x: &ArrayView2<f64>, options: &PredictOptions) -> Result<Array1<f64>> {
        let mut params = self.predict_distribution_with(x, options)?.into_params();
        if params.is_empty() {
            return Err(DistBoostError::Engine("no parameters predicted".to_string()));
        }
        Ok(params.swap_remove(0))
    }

    /// All distribution parameters, transformed into their natural domain.
    pub fn predict_distribution(&self, x: &ArrayView2<f64>) -> Result<DistributionPrediction> {
        self.predict_distribution_with(x, &PredictOptions::default())
    }

    /// Like [`predict_distribution`](Self::predict_distribution), with an
    /// explicit iteration range. Raw margins are always requested.
    pub fn predict_distribution_with(
        &self,
        x: &ArrayView2<f64>,
        options: &PredictOptions,
    ) -> Result<DistributionPrediction> {
        let raw = self.predict_raw(x, options)?;
        let fitted = self.fitted.as_ref().ok_or(DistBoostError::NotFitted)?;
        Ok(DistributionPrediction {
            names: fitted.distribution.param_names(),
            params: fitted.distribution.predict(&raw.view())?,
        })
    }

    /// Raw (pre-link) parameters, shape (n_samples, n_params).
    pub fn predict_raw(&self, x: &ArrayView2<f64>, options: &PredictOptions) -> Result<Array2<f64>> {
        let fitted = self.fitted.as_ref().ok_or(DistBoostError::NotFitted)?;
        if x.ncols() != fitted.n_features {
            return Err(DistBoostError::shape(
                format!("{} features", fitted.n_features),
                format!("{} features", x.ncols()),
            ));
        }

        let mut data = B::Dataset::from_features(x.view())?;
        data.set_base_margin(&broadcast_starting_params(&fitted.starting_params.view(), x.nrows()))?;
        let options = PredictOptions {
            output_margin: true,
            iteration_range: options.iteration_range.clone(),
        };
        let flat = fitted.model.predict(&data, &options)?;

        let raw = unpack(&flat.view(), fitted.distribution.n_params())?;
        if raw.nrows() != x.nrows() {
            return Err(DistBoostError::Engine(format!(
                "engine returned {} rows for {} inputs",
                raw.nrows(),
                x.nrows()
            )));
        }
        Ok(raw)
    }

    /// Save the fitted model to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let fitted = self.fitted.as_ref().ok_or(DistBoostError::NotFitted)?;
        let header = SavedHeader {
            format_version: FORMAT_VERSION,
            backend: B::name().to_string(),
            distribution: fitted.distribution,
            starting_params: fitted.starting_params.to_vec(),
            n_features: fitted.n_features,
            config: serde_json::to_string(&self.config)?,
        };

        let mut writer = BufWriter::new(File::create(path)?);
        bincode_options(MAX_HEADER_BYTES).serialize_into(&mut writer, &header)?;
        fitted.model.save_to_writer(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a model written by [`save`](Self::save).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let header: SavedHeader = bincode_options(MAX_HEADER_BYTES).deserialize_from(&mut reader)?;

        if header.format_version != FORMAT_VERSION {
            return Err(DistBoostError::Serialization(format!(
                "unsupported format version {}",
                header.format_version
            )));
        }
        if header.backend != B::name() {
            return Err(DistBoostError::Serialization(format!(
                "model was saved by the {} backend, not {}",
                header.backend,
                B::name()
            )));
        }

        let distribution = header.distribution;
        let model = B::Model::load_from_reader(&mut reader)?;
        if header.starting_params.len() != distribution.n_params()
            || model.num_groups() != distribution.n_params()
        {
            return Err(DistBoostError::Serialization(format!(
                "saved model does not match the {} parameter layout",
                distribution
            )));
        }

        Ok(Self {
            config: serde_json::from_str(&header.config)?,
            fitted: Some(FittedState {
                model,
                distribution,
                starting_params: Array1::from(header.starting_params),
                n_features: header.n_features,
                training: None,
            }),
            _backend: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StumpBackend;
    use approx::assert_relative_eq;
    use ndarray::array;

    type Regressor = DistributionRegressor<StumpBackend>;

    fn tiny_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| (i * (j + 1)) as f64);
        let y = Array1::from_shape_fn(20, |i| 1.0 + (i % 5) as f64);
        (x, y)
    }

    fn quick() -> RegressorConfig {
        RegressorConfig::default().with_n_estimators(5).with_max_depth(2)
    }

    #[test]
    fn test_unfitted_guard() {
        let model = Regressor::with_config(quick());
        let x = Array2::zeros((3, 2));
        assert!(matches!(model.predict(&x.view()), Err(DistBoostError::NotFitted)));
        assert!(matches!(
            model.predict_distribution(&x.view()),
            Err(DistBoostError::NotFitted)
        ));
        assert!(!model.is_fitted());
        assert!(model.starting_params().is_none());
    }

    #[test]
    fn test_zero_rounds_predicts_starting_params() {
        let (x, y) = tiny_data();
        let mut model = Regressor::with_config(quick().with_n_estimators(0));
        model
            .fit(&x.view(), &y.view(), FitOptions::new().with_verbose(false))
            .unwrap();

        let start = model.starting_params().unwrap().clone();
        let dist = model.predict_distribution(&x.view()).unwrap();
        assert_eq!(dist.names(), &["loc", "scale"]);
        for i in 0..x.nrows() {
            assert_relative_eq!(dist.params()[0][i], start[0], epsilon = 1e-12);
            assert_relative_eq!(dist.params()[1][i], start[1].exp(), epsilon = 1e-12);
        }
        assert_eq!(dist.get("scale"), Some(&dist.params()[1]));
        assert!(dist.get("missing").is_none());
        assert_eq!(dist.to_matrix().dim(), (20, 2));
    }

    #[test]
    fn test_failed_fit_leaves_model_unfitted() {
        let (x, y) = tiny_data();
        let mut model = Regressor::with_config(quick());
        model
            .fit(&x.view(), &y.view(), FitOptions::new().with_verbose(false))
            .unwrap();
        assert!(model.is_fitted());

        let constant = Array1::from_elem(20, 3.0);
        let err = model
            .fit(&x.view(), &constant.view(), FitOptions::new().with_verbose(false))
            .unwrap_err();
        assert!(matches!(err, DistBoostError::InvalidInput(_)));
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_label_count_mismatch() {
        let (x, _) = tiny_data();
        let y = array![1.0, 2.0];
        let mut model = Regressor::with_config(quick());
        assert!(matches!(
            model.fit(&x.view(), &y.view(), FitOptions::default()),
            Err(DistBoostError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_eval_labels_are_validated() {
        let (x, y) = tiny_data();
        let bad = Array1::from_elem(20, -1.0);
        let mut model = Regressor::with_config(quick().with_distribution("exponential"));
        let err = model
            .fit(
                &x.view(),
                &y.view(),
                FitOptions::new().with_eval_set(x.view(), bad.view()).with_verbose(false),
            )
            .unwrap_err();
        assert!(matches!(err, DistBoostError::InvalidInput(_)));
    }

    #[test]
    fn test_feature_count_is_checked_at_predict() {
        let (x, y) = tiny_data();
        let mut model = Regressor::with_config(quick());
        model
            .fit(&x.view(), &y.view(), FitOptions::new().with_verbose(false))
            .unwrap();
        let wide = Array2::zeros((4, 3));
        assert!(matches!(
            model.predict(&wide.view()),
            Err(DistBoostError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_eval_history_names() {
        let (x, y) = tiny_data();
        let mut model = Regressor::with_config(quick());
        model
            .fit(
                &x.view(),
                &y.view(),
                FitOptions::new()
                    .with_eval_set(x.view(), y.view())
                    .with_verbose(false),
            )
            .unwrap();
        let history = model.evals_result().unwrap();
        assert_eq!(history["validation_0"]["normal-nll"].len(), 5);
        assert_eq!(history["validation_0"].len(), 1);
        assert_eq!(model.num_rounds(), Some(5));
    }

    #[test]
    fn test_load_rejects_oversized_header_length() {
        let dir = tempfile::tempdir().unwrap();

        // a string length far beyond the header limit
        let path = dir.path().join("huge.bin");
        let mut bytes = FORMAT_VERSION.to_le_bytes().to_vec();
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            Regressor::load(&path),
            Err(DistBoostError::Serialization(_))
        ));

        let path = dir.path().join("max.bin");
        std::fs::write(&path, u64::MAX.to_le_bytes()).unwrap();
        assert!(matches!(
            Regressor::load(&path),
            Err(DistBoostError::Serialization(_))
        ));
    }

    #[test]
    fn test_load_rejects_other_backend() {
        let (x, y) = tiny_data();
        let mut model = Regressor::with_config(quick());
        model
            .fit(&x.view(), &y.view(), FitOptions::new().with_verbose(false))
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        model.save(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        // backend name follows the version and its own u64 length
        let at = 4 + 8;
        assert_eq!(&bytes[at..at + 5], b"stump");
        bytes[at] = b'S';
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            Regressor::load(&path),
            Err(DistBoostError::Serialization(_))
        ));
    }
}
