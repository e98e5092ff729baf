//! Conversion between (n_samples, n_params) matrices and the flat,
//! sample-major vectors the engine's margin and gradient interface uses.
//!
//! Sample 0 contributes its K values first, then sample 1, and so on.

use crate::error::{DistBoostError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Flatten a (n, K) matrix row by row into a vector of length n*K.
pub fn pack(matrix: &ArrayView2<f64>) -> Array1<f64> {
    // `iter` walks in logical row-major order regardless of memory layout.
    Array1::from_iter(matrix.iter().copied())
}

/// Rebuild the (n, K) matrix from a flat vector produced by [`pack`].
pub fn unpack(flat: &ArrayView1<f64>, n_params: usize) -> Result<Array2<f64>> {
    if n_params == 0 {
        return Err(DistBoostError::InvalidParameter(
            "cannot unpack into zero parameters".to_string(),
        ));
    }
    if flat.len() % n_params != 0 {
        return Err(DistBoostError::shape(
            format!("a multiple of {}", n_params),
            flat.len().to_string(),
        ));
    }
    let n_samples = flat.len() / n_params;
    Ok(Array2::from_shape_vec((n_samples, n_params), flat.to_vec())?)
}

/// Replicate the K starting values across `n_samples` rows and pack them.
pub fn broadcast_starting_params(starting: &ArrayView1<f64>, n_samples: usize) -> Array1<f64> {
    let n_params = starting.len();
    Array1::from_shape_fn(n_samples * n_params, |i| starting[i % n_params])
}
