//! Base family trait and shared types.

use crate::error::{DistBoostError, Result};
use crate::utils::{sanitize_gradient, sanitize_hessian, Link};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Maximum number of parameters any registered family has.
pub(crate) const MAX_PARAMS: usize = 2;

/// A distributional parameter with its link function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributionParam {
    /// Name of the parameter (e.g., "loc", "scale").
    pub name: &'static str,
    /// Link mapping the raw boosted value to the parameter's domain.
    pub link: Link,
}

impl DistributionParam {
    pub const fn new(name: &'static str, link: Link) -> Self {
        Self { name, link }
    }
}

/// Container for gradients and hessians.
#[derive(Debug, Clone)]
pub struct GradientsAndHessians {
    /// Gradients with shape (n_samples, n_params).
    pub gradients: Array2<f64>,
    /// Hessians with shape (n_samples, n_params).
    pub hessians: Array2<f64>,
}

/// Per-family math for a parametric distribution.
///
/// Implementors supply the scalar pieces (log-likelihood, its gradient, the
/// diagonal of its Hessian and the diagonal Fisher information, all in the
/// natural parameterization); the provided methods lift them to whole
/// prediction matrices and apply the chain rule through each parameter's link.
///
/// Every registered family is parameterized so that its Fisher information is
/// diagonal in raw coordinates, which makes the natural gradient an elementwise
/// division.
pub trait DistributionFamily: Send + Sync {
    /// Canonical registry name (lowercase).
    fn name(&self) -> &'static str;

    /// Ordered parameters with their links.
    fn params(&self) -> &'static [DistributionParam];

    /// Name of the evaluation metric reported to the engine.
    fn metric_name(&self) -> &'static str;

    /// Whether `y` lies in the support of the distribution.
    fn in_support(&self, y: f64) -> bool {
        y.is_finite()
    }

    /// Human-readable description of the support, used in error messages.
    fn support_description(&self) -> &'static str {
        "finite values"
    }

    /// Constant raw starting values estimated from the labels.
    ///
    /// Labels have already been checked by [`DistributionFamily::validate_labels`].
    fn estimate_start(&self, y: &ArrayView1<f64>) -> Result<Array1<f64>>;

    /// Negative log-likelihood of one observation given natural parameters.
    fn nll(&self, params: &[f64], y: f64) -> f64;

    /// Gradient of [`DistributionFamily::nll`] w.r.t. the natural parameters.
    fn nll_gradient(&self, params: &[f64], y: f64, grad: &mut [f64]);

    /// Diagonal of the Hessian of [`DistributionFamily::nll`] w.r.t. the
    /// natural parameters. May be zero or negative.
    fn nll_hessian(&self, params: &[f64], y: f64, hess: &mut [f64]);

    /// Diagonal of the Fisher information w.r.t. the natural parameters.
    fn fisher_diagonal(&self, params: &[f64], fisher: &mut [f64]);

    /// Number of distributional parameters.
    fn n_params(&self) -> usize {
        self.params().len()
    }

    /// Parameter names in order.
    fn param_names(&self) -> Vec<&'static str> {
        self.params().iter().map(|p| p.name).collect()
    }

    /// Check every label against the support of the distribution.
    fn validate_labels(&self, y: &ArrayView1<f64>) -> Result<()> {
        if y.is_empty() {
            return Err(DistBoostError::InvalidInput(format!(
                "{} requires at least one label",
                self.name()
            )));
        }
        if let Some((i, &v)) = y.iter().enumerate().find(|(_, &v)| !self.in_support(v)) {
            return Err(DistBoostError::InvalidInput(format!(
                "{} requires {}, label {} is {}",
                self.name(),
                self.support_description(),
                i,
                v
            )));
        }
        Ok(())
    }

    /// Starting raw parameters: one constant per parameter, from the labels.
    fn starting_params(&self, y: &ArrayView1<f64>) -> Result<Array1<f64>> {
        self.validate_labels(y)?;
        let start = self.estimate_start(y)?;
        for (v, p) in start.iter().zip(self.params()) {
            if !v.is_finite() || p.link.is_saturated(*v) {
                return Err(DistBoostError::InvalidInput(format!(
                    "{} starting value for {} is out of range ({}), labels are too extreme",
                    self.name(),
                    p.name,
                    v
                )));
            }
        }
        Ok(start)
    }

    /// Transform one raw row into natural parameters.
    fn transform_row(&self, raw: &[f64], out: &mut [f64]) {
        for ((o, &r), p) in out.iter_mut().zip(raw).zip(self.params()) {
            *o = p.link.apply_scalar(r);
        }
    }

    /// Transform raw predictions with shape (n_samples, n_params) into natural
    /// parameters, one column per parameter.
    fn transform_params(&self, raw: &ArrayView2<f64>) -> Array2<f64> {
        let mut result = Array2::zeros(raw.dim());
        for (i, param) in self.params().iter().enumerate() {
            let transformed = param.link.apply(&raw.column(i));
            result.column_mut(i).assign(&transformed);
        }
        result
    }

    /// Transform raw predictions and split them into one vector per parameter.
    fn predict(&self, raw: &ArrayView2<f64>) -> Result<Vec<Array1<f64>>> {
        self.check_raw_shape(raw, None)?;
        let transformed = self.transform_params(raw);
        Ok(transformed.columns().into_iter().map(|c| c.to_owned()).collect())
    }

    /// Gradient and Hessian of the negative log-likelihood w.r.t. raw scores.
    ///
    /// With `natural` set, gradients are rescaled by the inverse Fisher
    /// information and the Hessian is the unit curvature of the Fisher metric.
    /// Otherwise the gradient is the plain one and the Hessian is the diagonal
    /// of the true Hessian in raw coordinates,
    /// `h_θ·θ'(r)² + g_θ·θ''(r)`, floored at [`HESSIAN_FLOOR`](crate::utils::HESSIAN_FLOOR).
    /// Parameters whose link is saturated get a zero gradient.
    fn gradient_and_hessian(
        &self,
        y: &ArrayView1<f64>,
        raw: &ArrayView2<f64>,
        natural: bool,
    ) -> Result<GradientsAndHessians> {
        self.check_raw_shape(raw, Some(y.len()))?;

        let n_samples = raw.nrows();
        let n_params = self.n_params();
        let mut gradients = Array2::zeros((n_samples, n_params));
        let mut hessians = Array2::zeros((n_samples, n_params));

        let mut params = [0.0; MAX_PARAMS];
        let mut grad = [0.0; MAX_PARAMS];
        let mut hess = [0.0; MAX_PARAMS];
        let mut fisher = [0.0; MAX_PARAMS];
        let mut raw_row = [0.0; MAX_PARAMS];
        let mut clamped = false;

        for (i, row) in raw.rows().into_iter().enumerate() {
            for (dst, &src) in raw_row.iter_mut().zip(row.iter()) {
                *dst = src;
            }
            let raw_row = &raw_row[..n_params];
            let params = &mut params[..n_params];
            let grad = &mut grad[..n_params];
            let hess = &mut hess[..n_params];
            let fisher = &mut fisher[..n_params];

            self.transform_row(raw_row, params);
            self.nll_gradient(params, y[i], grad);
            if natural {
                self.fisher_diagonal(params, fisher);
            } else {
                self.nll_hessian(params, y[i], hess);
            }

            for (j, p) in self.params().iter().enumerate() {
                let (g, h) = if p.link.is_saturated(raw_row[j]) {
                    (0.0, if natural { 1.0 } else { 0.0 })
                } else {
                    let d = p.link.derivative(raw_row[j]);
                    let g_raw = grad[j] * d;
                    if natural {
                        let f_raw = fisher[j] * d * d;
                        (g_raw / f_raw, 1.0)
                    } else {
                        (g_raw, hess[j] * d * d + grad[j] * p.link.second_derivative(raw_row[j]))
                    }
                };
                let (g, was_clamped) = sanitize_gradient(g);
                clamped |= was_clamped;
                gradients[[i, j]] = g;
                hessians[[i, j]] = sanitize_hessian(h);
            }
        }

        if clamped {
            log::warn!(
                "{}: clamped non-finite or extreme gradients to keep tree building stable",
                self.name()
            );
        }

        Ok(GradientsAndHessians {
            gradients,
            hessians,
        })
    }

    /// Mean negative log-likelihood across samples, after applying links.
    fn loss(&self, y: &ArrayView1<f64>, raw: &ArrayView2<f64>) -> Result<f64> {
        self.check_raw_shape(raw, Some(y.len()))?;
        if y.is_empty() {
            return Err(DistBoostError::InvalidInput(
                "cannot evaluate the loss on zero samples".to_string(),
            ));
        }

        let n_params = self.n_params();
        let mut params = [0.0; MAX_PARAMS];
        let mut raw_row = [0.0; MAX_PARAMS];
        let mut total = 0.0;
        for (row, &y_val) in raw.rows().into_iter().zip(y.iter()) {
            for (dst, &src) in raw_row.iter_mut().zip(row.iter()) {
                *dst = src;
            }
            self.transform_row(&raw_row[..n_params], &mut params[..n_params]);
            total += self.nll(&params[..n_params], y_val);
        }
        Ok(total / y.len() as f64)
    }

    /// Verify that `raw` has one column per parameter and, if given, the
    /// expected number of rows.
    fn check_raw_shape(&self, raw: &ArrayView2<f64>, n_rows: Option<usize>) -> Result<()> {
        let n_params = self.n_params();
        if raw.ncols() != n_params || n_rows.is_some_and(|n| n != raw.nrows()) {
            let rows = n_rows.map_or_else(|| "n".to_string(), |n| n.to_string());
            return Err(DistBoostError::shape(
                format!("({}, {})", rows, n_params),
                format!("({}, {})", raw.nrows(), raw.ncols()),
            ));
        }
        Ok(())
    }
}

/// Population mean and standard deviation (ddof = 0).
pub(crate) fn mean_and_std(values: &ArrayView1<f64>) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.sum() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Whether all values are identical.
pub(crate) fn is_constant(values: &ArrayView1<f64>) -> bool {
    match values.iter().next() {
        Some(&first) => values.iter().all(|&v| v == first),
        None => true,
    }
}

/// Error for a label set whose spread is zero.
pub(crate) fn degenerate_labels(name: &str) -> DistBoostError {
    DistBoostError::InvalidInput(format!(
        "{} starting values need labels with non-zero spread, all labels are identical",
        name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_distribution_param() {
        let param = DistributionParam::new("loc", Link::Identity);
        assert_eq!(param.name, "loc");
        assert_eq!(param.link, Link::Identity);
    }

    #[test]
    fn test_mean_and_std() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        let (mean, std) = mean_and_std(&y.view());
        assert_eq!(mean, 2.5);
        assert!((std - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_is_constant() {
        assert!(is_constant(&array![2.0, 2.0, 2.0].view()));
        assert!(!is_constant(&array![2.0, 2.0, 2.1].view()));
    }
}
