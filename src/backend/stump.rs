//! A small in-process engine for exercising the engine contract.
//!
//! [`StumpBackend`] boosts depth-one trees: every round fits one stump per
//! output group on the objective's gradients and Hessians, using the usual
//! second-order gain with L2 regularisation. It honours base margins,
//! `base_score`, `num_class`, custom objectives and metrics, early stopping and
//! iteration ranges, and needs no native library. It is a reference double for
//! tests and examples; use the XGBoost backend for real workloads.

use super::traits::{
    Backend, BackendDataset, BackendModel, BoosterParams, CustomMetric, CustomObjective,
    EarlyStopping, EvalHistory, PredictOptions, TrainConfig, TrainingResult,
};
use crate::error::{DistBoostError, Result};
use crate::utils::bincode_options;
use bincode::Options;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::ops::Range;

/// Parameter keys this engine understands.
const KNOWN_PARAMS: &[&str] = &[
    "eta",
    "learning_rate",
    "lambda",
    "reg_lambda",
    "min_child_weight",
    "num_class",
    "base_score",
];

/// Upper bound on a saved stump ensemble.
const MAX_MODEL_BYTES: u64 = 1 << 30;

/// The stump backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct StumpBackend;

impl Backend for StumpBackend {
    type Dataset = StumpDataset;
    type Model = StumpModel;

    fn name() -> &'static str {
        "stump"
    }
}

/// Dense in-memory dataset with optional labels and base margin.
#[derive(Debug, Clone)]
pub struct StumpDataset {
    features: Array2<f64>,
    labels: Option<Array1<f64>>,
    base_margin: Option<Array1<f64>>,
}

impl StumpDataset {
    /// Starting margins for `n_groups` outputs per row.
    fn initial_margin(&self, n_groups: usize, base_score: f64) -> Result<Vec<f64>> {
        let expected = self.num_rows() * n_groups;
        match &self.base_margin {
            Some(margin) if margin.len() != expected => Err(DistBoostError::shape(
                format!("base margin of length {}", expected),
                format!("length {}", margin.len()),
            )),
            Some(margin) => Ok(margin.to_vec()),
            None => Ok(vec![base_score; expected]),
        }
    }
}

impl BackendDataset for StumpDataset {
    fn from_features(features: ArrayView2<f64>) -> Result<Self> {
        Ok(Self {
            features: features.to_owned(),
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
        Ok(Self {
            features: features.to_owned(),
            labels: Some(labels.to_owned()),
            base_margin: None,
        })
    }

    fn set_base_margin(&mut self, base_margin: &Array1<f64>) -> Result<()> {
        let n_rows = self.num_rows();
        let ragged = if n_rows == 0 {
            !base_margin.is_empty()
        } else {
            base_margin.len() % n_rows != 0
        };
        if ragged {
            return Err(DistBoostError::shape(
                format!("a multiple of {} values", n_rows),
                format!("{} values", base_margin.len()),
            ));
        }
        self.base_margin = Some(base_margin.clone());
        Ok(())
    }

    fn num_rows(&self) -> usize {
        self.features.nrows()
    }

    fn num_cols(&self) -> usize {
        self.features.ncols()
    }

    fn labels(&self) -> Result<Array1<f64>> {
        self.labels
            .clone()
            .ok_or_else(|| DistBoostError::InvalidInput("dataset has no labels".to_string()))
    }
}

#[derive(Debug, Clone)]
struct StumpParams {
    eta: f64,
    lambda: f64,
    min_child_weight: f64,
    num_class: usize,
    base_score: f64,
}

impl StumpParams {
    fn from_booster(params: &BoosterParams) -> Result<Self> {
        for (key, value) in params.iter() {
            if !KNOWN_PARAMS.contains(&key.as_str()) {
                log::debug!("stump engine ignores parameter {}={}", key, value);
            }
        }
        let p = Self {
            eta: params.get_f64(&["learning_rate", "eta"], 0.3)?,
            lambda: params.get_f64(&["reg_lambda", "lambda"], 1.0)?,
            min_child_weight: params.get_f64(&["min_child_weight"], 1.0)?,
            num_class: params.get_usize(&["num_class"], 1)?,
            base_score: params.get_f64(&["base_score"], 0.5)?,
        };
        let checks = [
            (p.eta > 0.0, "eta must be positive"),
            (p.lambda >= 0.0, "lambda must be non-negative"),
            (p.min_child_weight >= 0.0, "min_child_weight must be non-negative"),
            (p.num_class >= 1, "num_class must be at least 1"),
            (p.base_score.is_finite(), "base_score must be finite"),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, msg)) => Err(DistBoostError::InvalidParameter(msg.to_string())),
            None => Ok(p),
        }
    }

    /// Shrunken Newton step for a node with gradient sum `g` and Hessian sum `h`.
    fn leaf(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.lambda;
        if denom <= 0.0 {
            0.0
        } else {
            -self.eta * g / denom
        }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.lambda)
    }
}

/// A depth-one tree. Rows with `x[feature] < threshold` go left; NaN goes right.
/// Without a split both sides hold the same value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    split: Option<(usize, f64)>,
    left: f64,
    right: f64,
}

impl Stump {
    fn predict_row(&self, row: &ArrayView1<f64>) -> f64 {
        match self.split {
            Some((feature, threshold)) if row[feature] < threshold => self.left,
            Some(_) => self.right,
            None => self.left,
        }
    }

    /// Best stump for one output group. Ties between features go to the lower index.
    fn fit(features: &ArrayView2<f64>, grad: &[f64], hess: &[f64], p: &StumpParams) -> Self {
        let g_total: f64 = grad.iter().sum();
        let h_total: f64 = hess.iter().sum();
        let constant = p.leaf(g_total, h_total);
        let parent = p.score(g_total, h_total);

        let best = (0..features.ncols())
            .into_par_iter()
            .filter_map(|f| {
                best_threshold(&features.column(f), grad, hess, p, parent).map(|s| (f, s))
            })
            .reduce_with(|a, b| if b.1.gain > a.1.gain { b } else { a });

        match best {
            Some((feature, s)) => Stump {
                split: Some((feature, s.threshold)),
                left: p.leaf(s.g_left, s.h_left),
                right: p.leaf(g_total - s.g_left, h_total - s.h_left),
            },
            None => Stump {
                split: None,
                left: constant,
                right: constant,
            },
        }
    }
}

struct Candidate {
    threshold: f64,
    gain: f64,
    g_left: f64,
    h_left: f64,
}

/// Scan one feature in sorted order for the split with the largest positive gain.
fn best_threshold(
    column: &ArrayView1<f64>,
    grad: &[f64],
    hess: &[f64],
    p: &StumpParams,
    parent: f64,
) -> Option<Candidate> {
    let mut order: Vec<usize> = (0..column.len()).filter(|&i| !column[i].is_nan()).collect();
    order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

    let g_total: f64 = grad.iter().sum();
    let h_total: f64 = hess.iter().sum();
    let (mut g_left, mut h_left) = (0.0, 0.0);
    let mut best: Option<Candidate> = None;

    for w in 0..order.len().saturating_sub(1) {
        let (i, next) = (order[w], order[w + 1]);
        g_left += grad[i];
        h_left += hess[i];
        if column[i] == column[next] {
            continue;
        }
        let h_right = h_total - h_left;
        if h_left < p.min_child_weight || h_right < p.min_child_weight {
            continue;
        }
        let gain = p.score(g_left, h_left) + p.score(g_total - g_left, h_right) - parent;
        if gain > 0.0 && best.as_ref().map_or(true, |b| gain > b.gain) {
            best = Some(Candidate {
                threshold: 0.5 * (column[i] + column[next]),
                gain,
                g_left,
                h_left,
            });
        }
    }
    best
}

/// A trained ensemble: `stumps[round][group]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StumpModel {
    num_groups: usize,
    num_features: usize,
    base_score: f64,
    stumps: Vec<Vec<Stump>>,
    best_iteration: Option<usize>,
}

impl StumpModel {
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    fn resolve_range(&self, options: &PredictOptions) -> Result<Range<usize>> {
        let n_rounds = self.stumps.len();
        let range = match &options.iteration_range {
            Some(r) if r.start == 0 && r.end == 0 => 0..n_rounds,
            Some(r) => r.clone(),
            None => match self.best_iteration {
                Some(best) => 0..(best + 1).min(n_rounds),
                None => 0..n_rounds,
            },
        };
        if range.start > range.end || range.end > n_rounds {
            return Err(DistBoostError::InvalidParameter(format!(
                "iteration range {:?} is outside the {} trained rounds",
                range, n_rounds
            )));
        }
        Ok(range)
    }
}

fn add_stump(margin: &mut [f64], features: &ArrayView2<f64>, stump: &Stump, group: usize, n_groups: usize) {
    for (i, row) in features.rows().into_iter().enumerate() {
        margin[i * n_groups + group] += stump.predict_row(&row);
    }
}

fn record(history: &mut EvalHistory, dataset: &str, metric: &str, value: f64) {
    history
        .entry(dataset.to_string())
        .or_default()
        .entry(metric.to_string())
        .or_default()
        .push(value);
}

impl BackendModel for StumpModel {
    type Dataset = StumpDataset;

    fn train<O, M>(
        params: &BoosterParams,
        train_data: &StumpDataset,
        evals: &[(&StumpDataset, &str)],
        config: &TrainConfig,
        objective: &O,
        metric: &M,
    ) -> Result<(Self, TrainingResult)>
    where
        O: CustomObjective,
        M: CustomMetric,
    {
        let p = StumpParams::from_booster(params)?;
        if config.early_stopping_rounds.is_some() && evals.is_empty() {
            return Err(DistBoostError::InvalidParameter(
                "early stopping requires at least one evaluation set".to_string(),
            ));
        }
        if train_data.num_rows() == 0 {
            return Err(DistBoostError::InvalidInput(
                "cannot train on an empty dataset".to_string(),
            ));
        }

        let n_groups = p.num_class;
        let labels = train_data.labels()?;
        let features = train_data.features.view();
        let mut margin = train_data.initial_margin(n_groups, p.base_score)?;

        let mut eval_margins = Vec::with_capacity(evals.len());
        let mut eval_labels = Vec::with_capacity(evals.len());
        for &(data, name) in evals {
            if data.num_cols() != train_data.num_cols() {
                return Err(DistBoostError::shape(
                    format!("{} features in '{}'", train_data.num_cols(), name),
                    format!("{} features", data.num_cols()),
                ));
            }
            eval_margins.push(data.initial_margin(n_groups, p.base_score)?);
            eval_labels.push(data.labels()?);
        }

        let mut model = StumpModel {
            num_groups: n_groups,
            num_features: train_data.num_cols(),
            base_score: p.base_score,
            stumps: Vec::with_capacity(config.num_boost_round),
            best_iteration: None,
        };
        let mut stopper: Option<EarlyStopping> = None;
        let mut history = EvalHistory::new();
        let mut stopped_early = false;

        for round in 0..config.num_boost_round {
            let (grad, hess) =
                objective.gradients(&ArrayView1::from(margin.as_slice()), &labels.view())?;
            if grad.len() != margin.len() || hess.len() != margin.len() {
                return Err(DistBoostError::Engine(format!(
                    "objective returned {} gradients and {} hessians for {} margins",
                    grad.len(),
                    hess.len(),
                    margin.len()
                )));
            }

            let mut round_stumps = Vec::with_capacity(n_groups);
            for group in 0..n_groups {
                let g: Vec<f64> = grad.iter().skip(group).step_by(n_groups).copied().collect();
                let h: Vec<f64> = hess.iter().skip(group).step_by(n_groups).copied().collect();
                let stump = Stump::fit(&features, &g, &h, &p);

                add_stump(&mut margin, &features, &stump, group, n_groups);
                for (m, &(data, _)) in eval_margins.iter_mut().zip(evals) {
                    add_stump(m, &data.features.view(), &stump, group, n_groups);
                }
                round_stumps.push(stump);
            }
            model.stumps.push(round_stumps);

            let mut line = format!("[{}]", round);
            let mut monitored = None;
            for ((m, y), &(_, name)) in eval_margins.iter().zip(&eval_labels).zip(evals) {
                let result = metric.evaluate(&ArrayView1::from(m.as_slice()), &y.view())?;
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
                if es.update(round, result.value) {
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

        model.best_iteration = stopper.as_ref().map(EarlyStopping::best_iteration);
        let result = TrainingResult {
            n_iterations: model.stumps.len(),
            best_iteration: model.best_iteration,
            best_score: stopper.as_ref().and_then(EarlyStopping::best_value),
            history,
            stopped_early,
        };
        Ok((model, result))
    }

    /// Margins over the selected rounds; `output_margin` makes no difference
    /// since custom objectives have no output transform.
    fn predict(&self, data: &StumpDataset, options: &PredictOptions) -> Result<Array1<f64>> {
        if data.num_cols() != self.num_features {
            return Err(DistBoostError::shape(
                format!("{} features", self.num_features),
                format!("{} features", data.num_cols()),
            ));
        }
        let range = self.resolve_range(options)?;
        let features = data.features.view();
        let mut margin = data.initial_margin(self.num_groups, self.base_score)?;
        for round in &self.stumps[range] {
            for (group, stump) in round.iter().enumerate() {
                add_stump(&mut margin, &features, stump, group, self.num_groups);
            }
        }
        Ok(Array1::from(margin))
    }

    fn num_groups(&self) -> usize {
        self.num_groups
    }

    fn num_rounds(&self) -> usize {
        self.stumps.len()
    }

    fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    fn save_to_writer<W: Write>(&self, writer: &mut W) -> Result<()> {
        bincode_options(MAX_MODEL_BYTES).serialize_into(writer, self)?;
        Ok(())
    }

    fn load_from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let model: StumpModel = bincode_options(MAX_MODEL_BYTES).deserialize_from(reader)?;
        if model.num_groups == 0 || model.stumps.iter().any(|r| r.len() != model.num_groups) {
            return Err(DistBoostError::Serialization(
                "corrupt model: inconsistent stump groups".to_string(),
            ));
        }
        let bad_feature = model
            .stumps
            .iter()
            .flatten()
            .filter_map(|s| s.split)
            .any(|(f, _)| f >= model.num_features);
        if bad_feature {
            return Err(DistBoostError::Serialization(
                "corrupt model: split on an unknown feature".to_string(),
            ));
        }
        Ok(model)
    }
}
