//! XGBoost backend implementation.
//!
//! Trains one booster per output group through `update_custom`, the way the
//! engine exposes custom objectives to Rust. Base margins are kept on the Rust
//! side and added to the booster outputs, so a dataset's margin layout matches
//! the stump backend exactly.

use super::traits::{
    Backend, BackendDataset, BackendModel, BoosterParams, CustomMetric, CustomObjective,
    EarlyStopping, EvalHistory, PredictOptions, TrainConfig, TrainingResult,
};
use crate::error::{DistBoostError, Result};
use crate::utils::bincode_options;
use bincode::Options;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::{Read, Write};
use tempfile::NamedTempFile;

use xgb::parameters::learning::LearningTaskParametersBuilder;
use xgb::parameters::tree::TreeBoosterParametersBuilder;
use xgb::parameters::{BoosterParameters, BoosterParametersBuilder, BoosterType};
use xgb::{Booster, DMatrix};

// update_custom takes a plain function pointer, so gradients travel through here.
thread_local! {
    static OBJECTIVE_DATA: RefCell<Option<(Vec<f32>, Vec<f32>)>> = const { RefCell::new(None) };
}

fn objective_trampoline(_preds: &[f32], _dtrain: &DMatrix) -> (Vec<f32>, Vec<f32>) {
    OBJECTIVE_DATA.with(|data| data.borrow_mut().take().unwrap_or_default())
}

fn engine_err(context: &str) -> impl Fn(xgb::XGBError) -> DistBoostError + '_ {
    move |e| DistBoostError::Engine(format!("{}: {}", context, e))
}

/// XGBoost backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct XGBoostBackend;

impl Backend for XGBoostBackend {
    type Dataset = XGBoostDataset;
    type Model = XGBoostModel;

    fn name() -> &'static str {
        "xgboost"
    }
}

/// XGBoost dataset wrapper around DMatrix.
pub struct XGBoostDataset {
    dmatrix: DMatrix,
    n_rows: usize,
    n_cols: usize,
    labels: Option<Array1<f64>>,
    base_margin: Option<Array1<f64>>,
}

impl std::fmt::Debug for XGBoostDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XGBoostDataset")
            .field("n_rows", &self.n_rows)
            .field("n_cols", &self.n_cols)
            .field("has_base_margin", &self.base_margin.is_some())
            .finish()
    }
}

impl XGBoostDataset {
    /// Get a reference to the underlying DMatrix.
    pub fn dmatrix(&self) -> &DMatrix {
        &self.dmatrix
    }

    fn initial_margin(&self, n_groups: usize) -> Result<Array1<f64>> {
        let expected = self.n_rows * n_groups;
        match &self.base_margin {
            Some(m) if m.len() != expected => Err(DistBoostError::shape(
                format!("base margin of length {}", expected),
                format!("length {}", m.len()),
            )),
            Some(m) => Ok(m.clone()),
            None => Ok(Array1::zeros(expected)),
        }
    }
}

impl BackendDataset for XGBoostDataset {
    fn from_features(features: ArrayView2<f64>) -> Result<Self> {
        let n_rows = features.nrows();
        let features_f32: Vec<f32> = features.iter().map(|&x| x as f32).collect();
        let dmatrix = DMatrix::from_dense(&features_f32, n_rows)
            .map_err(engine_err("failed to create DMatrix"))?;
        Ok(Self {
            dmatrix,
            n_rows,
            n_cols: features.ncols(),
            labels: None,
            base_margin: None,
        })
    }

    fn from_data(features: ArrayView2<f64>, labels: ArrayView1<f64>) -> Result<Self> {
        if features.nrows() != labels.len() {
            return Err(DistBoostError::shape(
                format!("{} labels", features.nrows()),
                format!("{} labels", labels.len()),
            ));
        }
        let mut data = Self::from_features(features)?;
        let labels_f32: Vec<f32> = labels.iter().map(|&y| y as f32).collect();
        data.dmatrix
            .set_labels(&labels_f32)
            .map_err(engine_err("failed to set labels"))?;
        data.labels = Some(labels.to_owned());
        Ok(data)
    }

    fn set_base_margin(&mut self, base_margin: &Array1<f64>) -> Result<()> {
        let ragged = if self.n_rows == 0 {
            !base_margin.is_empty()
        } else {
            base_margin.len() % self.n_rows != 0
        };
        if ragged {
            return Err(DistBoostError::shape(
                format!("a multiple of {} values", self.n_rows),
                format!("{} values", base_margin.len()),
            ));
        }
        self.base_margin = Some(base_margin.clone());
        Ok(())
    }

    fn num_rows(&self) -> usize {
        self.n_rows
    }

    fn num_cols(&self) -> usize {
        self.n_cols
    }

    fn labels(&self) -> Result<Array1<f64>> {
        self.labels
            .clone()
            .ok_or_else(|| DistBoostError::InvalidInput("dataset has no labels".to_string()))
    }
}

/// Translate the shared parameter map into XGBoost's typed parameters.
fn booster_parameters(params: &BoosterParams) -> Result<BoosterParameters> {
    let tree = TreeBoosterParametersBuilder::default()
        .eta(params.get_f64(&["learning_rate", "eta"], 0.3)? as f32)
        .max_depth(params.get_usize(&["max_depth"], 6)? as u32)
        .lambda(params.get_f64(&["reg_lambda", "lambda"], 1.0)? as f32)
        .alpha(params.get_f64(&["reg_alpha", "alpha"], 0.0)? as f32)
        .gamma(params.get_f64(&["min_split_loss", "gamma"], 0.0)? as f32)
        .min_child_weight(params.get_f64(&["min_child_weight"], 1.0)? as f32)
        .subsample(params.get_f64(&["subsample"], 1.0)? as f32)
        .build()
        .map_err(|e| DistBoostError::InvalidParameter(e.to_string()))?;

    // Boosters emit raw margins; the base margin is added outside the engine.
    let learning = LearningTaskParametersBuilder::default()
        .base_score(0.0)
        .build()
        .map_err(|e| DistBoostError::InvalidParameter(e.to_string()))?;

    BoosterParametersBuilder::default()
        .booster_type(BoosterType::Tree(tree))
        .learning_params(learning)
        .verbose(false)
        .build()
        .map_err(|e| DistBoostError::InvalidParameter(e.to_string()))
}

fn booster_to_bytes(booster: &Booster) -> Result<Vec<u8>> {
    // The crate has no save-to-buffer, so go through a temp file.
    let temp_file = NamedTempFile::new()?;
    booster
        .save(temp_file.path())
        .map_err(engine_err("failed to save booster"))?;
    Ok(std::fs::read(temp_file.path())?)
}

fn snapshot(boosters: &[Booster]) -> Result<Vec<Vec<u8>>> {
    boosters.iter().map(booster_to_bytes).collect()
}

fn restore(snapshots: &[Vec<u8>]) -> Result<Vec<Booster>> {
    snapshots
        .iter()
        .map(|bytes| Booster::load_buffer(bytes).map_err(engine_err("failed to load booster")))
        .collect()
}

/// Margins for `data`: base margin plus every booster's output in its group.
fn margins(boosters: &[Booster], data: &XGBoostDataset) -> Result<Array1<f64>> {
    let n_groups = boosters.len();
    let mut margin = data.initial_margin(n_groups)?;
    for (group, booster) in boosters.iter().enumerate() {
        let preds = booster
            .predict(&data.dmatrix)
            .map_err(engine_err("prediction failed"))?;
        for (i, p) in preds.iter().take(data.n_rows).enumerate() {
            margin[i * n_groups + group] += *p as f64;
        }
    }
    Ok(margin)
}

fn record(history: &mut EvalHistory, dataset: &str, metric: &str, value: f64) {
    history
        .entry(dataset.to_string())
        .or_default()
        .entry(metric.to_string())
        .or_default()
        .push(value);
}

/// Limit on a saved model body, boosters included.
const MAX_MODEL_BYTES: u64 = 1 << 32;

#[derive(Serialize, Deserialize)]
struct SavedModel {
    num_features: usize,
    num_rounds: usize,
    best_iteration: Option<usize>,
    boosters: Vec<Vec<u8>>,
}

/// XGBoost model wrapper: one booster per output group.
pub struct XGBoostModel {
    boosters: Vec<Booster>,
    num_features: usize,
    num_rounds: usize,
    best_iteration: Option<usize>,
}

impl std::fmt::Debug for XGBoostModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XGBoostModel")
            .field("n_boosters", &self.boosters.len())
            .field("num_rounds", &self.num_rounds)
            .field("best_iteration", &self.best_iteration)
            .finish()
    }
}

impl BackendModel for XGBoostModel {
    type Dataset = XGBoostDataset;

    /// With early stopping configured, the boosters are rolled back to the best
    /// round whether or not patience ran out, so the stored model holds
    /// `best_iteration + 1` rounds.
    fn train<O, M>(
        params: &BoosterParams,
        train_data: &XGBoostDataset,
        evals: &[(&XGBoostDataset, &str)],
        config: &TrainConfig,
        objective: &O,
        metric: &M,
    ) -> Result<(Self, TrainingResult)>
    where
        O: CustomObjective,
        M: CustomMetric,
    {
        if config.early_stopping_rounds.is_some() && evals.is_empty() {
            return Err(DistBoostError::InvalidParameter(
                "early stopping requires at least one evaluation set".to_string(),
            ));
        }
        let n_groups = params.get_usize(&["num_class"], 1)?.max(1);
        let disable_default_metric = params.get_bool("disable_default_eval_metric", false)?;
        let booster_params = booster_parameters(params)?;
        let labels = train_data.labels()?;

        let mut cached: Vec<&DMatrix> = vec![&train_data.dmatrix];
        cached.extend(evals.iter().map(|(d, _)| &d.dmatrix));
        let mut boosters = Vec::with_capacity(n_groups);
        for _ in 0..n_groups {
            boosters.push(
                Booster::new_with_cached_dmats(&booster_params, &cached)
                    .map_err(engine_err("failed to create booster"))?,
            );
        }

        let mut eval_labels = Vec::with_capacity(evals.len());
        for (data, _) in evals {
            eval_labels.push(data.labels()?);
        }

        let mut stopper: Option<EarlyStopping> = None;
        let mut best_snapshot: Option<Vec<Vec<u8>>> = None;
        let mut history = EvalHistory::new();
        let mut stopped_early = false;
        let mut n_iterations = 0;

        for round in 0..config.num_boost_round {
            let margin = margins(&boosters, train_data)?;
            let (grad, hess) = objective.gradients(&margin.view(), &labels.view())?;

            for (group, booster) in boosters.iter_mut().enumerate() {
                let g: Vec<f32> = grad.iter().skip(group).step_by(n_groups).map(|&v| v as f32).collect();
                let h: Vec<f32> = hess.iter().skip(group).step_by(n_groups).map(|&v| v as f32).collect();
                OBJECTIVE_DATA.with(|data| *data.borrow_mut() = Some((g, h)));
                booster
                    .update_custom(&train_data.dmatrix, round as i32, objective_trampoline)
                    .map_err(|e| {
                        DistBoostError::Engine(format!("update failed for group {}: {}", group, e))
                    })?;
            }
            n_iterations = round + 1;

            let mut line = format!("[{}]", round);
            let mut monitored = None;
            for ((data, name), y) in evals.iter().zip(eval_labels.iter()) {
                let margin = margins(&boosters, data)?;
                if !disable_default_metric {
                    let sse: f64 = margin
                        .iter()
                        .step_by(n_groups)
                        .zip(y.iter())
                        .map(|(m, y)| (m - y).powi(2))
                        .sum();
                    let value = (sse / y.len() as f64).sqrt();
                    record(&mut history, name, "rmse", value);
                    line.push_str(&format!("\t{}-rmse:{:.5}", name, value));
                }
                let result = metric.evaluate(&margin.view(), &y.view())?;
                record(&mut history, name, &result.name, result.value);
                line.push_str(&format!("\t{}-{}:{:.5}", name, result.name, result.value));
                monitored = Some(result);
            }
            if config.verbose && !evals.is_empty() {
                log::info!("{}", line);
            }

            if let (Some(patience), Some(result)) = (config.early_stopping_rounds, monitored) {
                let es = stopper
                    .get_or_insert_with(|| EarlyStopping::new(patience, result.lower_is_better));
                let stop = es.update(round, result.value);
                if es.best_iteration() == round {
                    best_snapshot = Some(snapshot(&boosters)?);
                }
                if stop {
                    stopped_early = true;
                    log::info!(
                        "Stopping. Best iteration: [{}] {}: {:.5}",
                        es.best_iteration(),
                        result.name,
                        es.best_value().unwrap_or(f64::NAN)
                    );
                    break;
                }
            }
        }

        let best_iteration = stopper.as_ref().map(|es| es.best_iteration());
        let mut num_rounds = n_iterations;
        if let (Some(bytes), Some(best)) = (&best_snapshot, best_iteration) {
            if best + 1 < n_iterations {
                boosters = restore(bytes)?;
            }
            num_rounds = best + 1;
        }

        let result = TrainingResult {
            n_iterations,
            best_iteration,
            best_score: stopper.as_ref().and_then(|es| es.best_value()),
            history,
            stopped_early,
        };
        let model = Self {
            boosters,
            num_features: train_data.num_cols(),
            num_rounds,
            best_iteration,
        };
        Ok((model, result))
    }

    /// Boosters cannot be truncated, so only the full stored range is served.
    fn predict(&self, data: &XGBoostDataset, options: &PredictOptions) -> Result<Array1<f64>> {
        if data.num_cols() != self.num_features {
            return Err(DistBoostError::shape(
                format!("{} features", self.num_features),
                format!("{} features", data.num_cols()),
            ));
        }
        if let Some(range) = &options.iteration_range {
            let full = range.start == 0 && (range.end == 0 || range.end == self.num_rounds);
            if !full {
                return Err(DistBoostError::InvalidParameter(format!(
                    "the xgboost backend only predicts over all {} stored rounds, got {:?}",
                    self.num_rounds, range
                )));
            }
        }
        margins(&self.boosters, data)
    }

    fn num_groups(&self) -> usize {
        self.boosters.len()
    }

    fn num_rounds(&self) -> usize {
        self.num_rounds
    }

    fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    fn save_to_writer<W: Write>(&self, writer: &mut W) -> Result<()> {
        let saved = SavedModel {
            num_features: self.num_features,
            num_rounds: self.num_rounds,
            best_iteration: self.best_iteration,
            boosters: snapshot(&self.boosters)?,
        };
        bincode_options(MAX_MODEL_BYTES).serialize_into(writer, &saved)?;
        Ok(())
    }

    fn load_from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let saved: SavedModel = bincode_options(MAX_MODEL_BYTES).deserialize_from(reader)?;
        if saved.boosters.is_empty() || saved.best_iteration.is_some_and(|b| b >= saved.num_rounds) {
            return Err(DistBoostError::Serialization(
                "corrupt model: inconsistent booster metadata".to_string(),
            ));
        }
        Ok(Self {
            boosters: restore(&saved.boosters)?,
            num_features: saved.num_features,
            num_rounds: saved.num_rounds,
            best_iteration: saved.best_iteration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trampoline_consumes_gradients() {
        OBJECTIVE_DATA.with(|data| *data.borrow_mut() = Some((vec![1.0], vec![2.0])));
        let dmat = DMatrix::from_dense(&[0.0f32], 1).unwrap();
        assert_eq!(objective_trampoline(&[], &dmat), (vec![1.0], vec![2.0]));
        assert_eq!(objective_trampoline(&[], &dmat), (vec![], vec![]));
    }

    #[test]
    fn test_booster_parameters_accept_aliases() {
        let params = BoosterParams::new()
            .with("learning_rate", 0.1)
            .with("reg_lambda", 2.0)
            .with("max_depth", 3usize);
        assert!(booster_parameters(&params).is_ok());
    }

    #[test]
    fn test_load_rejects_oversized_booster_list() {
        let mut bytes = Vec::new();
        bincode_options(MAX_MODEL_BYTES)
            .serialize_into(&mut bytes, &(3usize, 2usize, None::<usize>))
            .unwrap();
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            XGBoostModel::load_from_reader(&mut bytes.as_slice()),
            Err(DistBoostError::Serialization(_))
        ));
    }

    #[test]
    fn test_dataset_base_margin_layout() {
        let x = ndarray::array![[1.0, 2.0], [3.0, 4.0]];
        let mut data = XGBoostDataset::from_features(x.view()).unwrap();
        assert_eq!(data.num_rows(), 2);
        assert_eq!(data.num_cols(), 2);
        assert!(data.labels().is_err());
        data.set_base_margin(&ndarray::array![0.5, 1.0, 0.5, 1.0]).unwrap();
        assert_eq!(data.initial_margin(2).unwrap(), ndarray::array![0.5, 1.0, 0.5, 1.0]);
        assert!(data.initial_margin(3).is_err());
    }
}
