//! Custom objective and evaluation metric handed to the boosting engine.
//!
//! The engine works on flat, sample-major margin vectors. The adapter unpacks
//! them to (n, K), asks the distribution for gradients and Hessians (or the
//! mean NLL), and packs the result back.

use crate::backend::{CustomMetric, CustomObjective, EvalMetric};
use crate::distributions::Distribution;
use crate::error::Result;
use crate::packing::{pack, unpack};
use ndarray::{Array1, ArrayView1};

/// Objective/metric pair bound to one distribution and gradient mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectiveAdapter {
    distribution: Distribution,
    natural_gradient: bool,
}

impl ObjectiveAdapter {
    pub fn new(distribution: Distribution, natural_gradient: bool) -> Self {
        Self {
            distribution,
            natural_gradient,
        }
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    pub fn natural_gradient(&self) -> bool {
        self.natural_gradient
    }
}

impl CustomObjective for ObjectiveAdapter {
    fn gradients(
        &self,
        predictions: &ArrayView1<f64>,
        labels: &ArrayView1<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let raw = unpack(predictions, self.distribution.n_params())?;
        let gh = self
            .distribution
            .gradient_and_hessian(labels, &raw.view(), self.natural_gradient)?;
        Ok((pack(&gh.gradients.view()), pack(&gh.hessians.view())))
    }
}

impl CustomMetric for ObjectiveAdapter {
    /// Mean negative log-likelihood; the natural-gradient flag plays no part.
    fn evaluate(
        &self,
        predictions: &ArrayView1<f64>,
        labels: &ArrayView1<f64>,
    ) -> Result<EvalMetric> {
        let raw = unpack(predictions, self.distribution.n_params())?;
        let value = self.distribution.loss(labels, &raw.view())?;
        Ok(EvalMetric {
            name: self.distribution.metric_name().to_string(),
            value,
            lower_is_better: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DistBoostError;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_objective_output_is_packed_like_input() {
        let adapter = ObjectiveAdapter::new(Distribution::Normal, false);
        // two samples, (loc, ln scale)
        let preds = array![0.0, 0.0, 1.0, 0.0];
        let labels = array![1.0, 1.0];
        let (grad, hess) = adapter.gradients(&preds.view(), &labels.view()).unwrap();

        assert_eq!(grad.len(), 4);
        assert_eq!(hess.len(), 4);
        // sample 0: loc below the label, so the loc gradient is negative
        assert_relative_eq!(grad[0], -1.0, epsilon = 1e-12);
        // sample 1: loc equals the label
        assert_relative_eq!(grad[2], 0.0, epsilon = 1e-12);
        assert!(hess.iter().all(|&h| h >= 1e-6));
    }

    #[test]
    fn test_natural_flag_changes_gradients_not_metric() {
        let preds = array![0.5, 0.3, -0.2, 0.1, 1.5, -0.4];
        let labels = array![1.0, -1.0, 2.0];
        let plain = ObjectiveAdapter::new(Distribution::Normal, false);
        let natural = ObjectiveAdapter::new(Distribution::Normal, true);

        let (g_plain, _) = plain.gradients(&preds.view(), &labels.view()).unwrap();
        let (g_nat, h_nat) = natural.gradients(&preds.view(), &labels.view()).unwrap();
        assert!(g_plain.iter().zip(g_nat.iter()).any(|(a, b)| (a - b).abs() > 1e-9));
        assert!(h_nat.iter().all(|&h| h == 1.0));

        let m_plain = plain.evaluate(&preds.view(), &labels.view()).unwrap();
        let m_nat = natural.evaluate(&preds.view(), &labels.view()).unwrap();
        assert_eq!(m_plain.value, m_nat.value);
        assert_eq!(m_plain.name, "normal-nll");
        assert!(m_plain.lower_is_better);
    }

    #[test]
    fn test_ragged_predictions_are_rejected() {
        let adapter = ObjectiveAdapter::new(Distribution::Normal, true);
        let preds = array![0.0, 0.0, 0.0];
        let labels = array![1.0];
        assert!(matches!(
            adapter.gradients(&preds.view(), &labels.view()),
            Err(DistBoostError::ShapeMismatch { .. })
        ));
    }
}
