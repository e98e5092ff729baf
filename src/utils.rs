//! Link functions and numeric guards.
//!
//! A link maps an unconstrained raw boosted value into the valid domain of a
//! distributional parameter. Raw values are sanitised before they are
//! transformed so that every finite (or even non-finite) raw input lands on a
//! finite, in-domain parameter.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// Raw values are clamped to this magnitude before exponentiation.
pub const MAX_RAW_EXPONENT: f64 = 50.0;
/// Lower bound for every Hessian entry handed to the engine.
pub const HESSIAN_FLOOR: f64 = 1e-6;
/// Upper bound for gradient and Hessian magnitudes handed to the engine.
pub const DERIVATIVE_CAP: f64 = 1e30;

/// Link function types for transforming raw boosted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    /// Identity transformation (no change).
    Identity,
    /// Exponential transformation for strictly positive values.
    Exp,
}

impl Link {
    /// Apply the link to an array of raw values.
    pub fn apply(&self, x: &ArrayView1<f64>) -> Array1<f64> {
        x.mapv(|v| self.apply_scalar(v))
    }

    /// Apply the link to a single raw value.
    pub fn apply_scalar(&self, x: f64) -> f64 {
        match self {
            Link::Identity => nan_to_num_scalar(x, 0.0),
            Link::Exp => clamp_exponent(x).exp(),
        }
    }

    /// Whether `x` lies where the applied link is flat: beyond the exponent
    /// clamp, or NaN (which always maps to the same value).
    pub fn is_saturated(&self, x: f64) -> bool {
        match self {
            Link::Identity => false,
            Link::Exp => x.is_nan() || x.abs() > MAX_RAW_EXPONENT,
        }
    }

    /// Derivative of the link at the raw value `x`.
    ///
    /// Zero wherever the link is saturated, so it agrees with `apply_scalar`.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            Link::Identity => 1.0,
            Link::Exp if self.is_saturated(x) => 0.0,
            Link::Exp => x.exp(),
        }
    }

    /// Second derivative of the link at the raw value `x`.
    pub fn second_derivative(&self, x: f64) -> f64 {
        match self {
            Link::Identity => 0.0,
            Link::Exp if self.is_saturated(x) => 0.0,
            Link::Exp => x.exp(),
        }
    }

    /// Inverse of the link, mapping a natural parameter back to raw space.
    pub fn inverse(&self, value: f64) -> f64 {
        match self {
            Link::Identity => value,
            Link::Exp => value.ln(),
        }
    }

    /// Short name used in descriptions.
    pub fn name(&self) -> &'static str {
        match self {
            Link::Identity => "identity",
            Link::Exp => "exp",
        }
    }
}

/// Replace a non-finite value with `replacement`.
pub fn nan_to_num_scalar(x: f64, replacement: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        replacement
    }
}

fn clamp_exponent(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(-MAX_RAW_EXPONENT, MAX_RAW_EXPONENT)
    }
}

/// Clamp a gradient entry into a finite range, mapping NaN to zero.
///
/// Returns the sanitised value and whether any clamping took place.
pub fn sanitize_gradient(g: f64) -> (f64, bool) {
    if g.is_nan() {
        (0.0, true)
    } else if g.abs() > DERIVATIVE_CAP {
        (g.signum() * DERIVATIVE_CAP, true)
    } else {
        (g, false)
    }
}

/// Clamp a Hessian entry into `[HESSIAN_FLOOR, DERIVATIVE_CAP]`.
pub fn sanitize_hessian(h: f64) -> f64 {
    if h.is_nan() {
        HESSIAN_FLOOR
    } else {
        h.clamp(HESSIAN_FLOOR, DERIVATIVE_CAP)
    }
}

/// Bincode settings for saved models. The limit caps how much a reader may
/// allocate while decoding, so a corrupt length prefix fails cleanly.
pub(crate) fn bincode_options(limit: u64) -> impl bincode::Options {
    use bincode::Options;
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(limit)
}

/// Median of a slice of finite values; `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
