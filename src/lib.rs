//! # distboost
//!
//! Distributional gradient boosting: instead of a single point estimate, the
//! boosted ensemble predicts every parameter of a parametric distribution
//! (e.g. the location and scale of a Normal) for each input row.
//!
//! Each parameter is one output group of a multi-output booster. Starting
//! values estimated from the labels ride in the base margins, and the trees
//! are grown on (optionally natural) gradients of the negative log-likelihood.
//!
//! ## Backends
//!
//! - `xgboost` feature: `XGBoostBackend`, the production engine, used by
//!   `DistributionRegressor::new`.
//! - [`StumpBackend`](backend::StumpBackend): an in-process engine of
//!   depth-one trees that needs no native library, for tests and quick checks.
//!
//! `full` enables every backend feature.
//!
//! ## Example
//!
//! ```no_run
//! # #[cfg(feature = "xgboost")]
//! # fn main() -> distboost::Result<()> {
//! use distboost::prelude::*;
//! use ndarray::{Array1, Array2};
//!
//! let x = Array2::<f64>::zeros((200, 4));
//! let y = Array1::linspace(0.5, 20.0, 200);
//!
//! let config = RegressorConfig::new("lognormal").with_learning_rate(0.1);
//! let mut model = DistributionRegressor::new(config);
//! model.fit(&x.view(), &y.view(), FitOptions::default())?;
//!
//! let params = model.predict_distribution(&x.view())?;
//! for name in params.names() {
//!     println!("{name}: {:?}", params.get(name));
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "xgboost"))]
//! # fn main() {}
//! ```

pub mod backend;
pub mod config;
pub mod distributions;
pub mod error;
pub mod model;
pub mod objective;
pub mod packing;
pub mod utils;

pub use config::RegressorConfig;
pub use distributions::{get_distribution, list_distributions, Distribution};
pub use error::{DistBoostError, Result};
pub use model::{DistributionPrediction, DistributionRegressor, FitOptions};

pub mod prelude {
    //! Convenient re-exports of commonly used types.
    pub use crate::backend::{Backend, BoosterParams, PredictOptions, StumpBackend, TrainConfig};
    pub use crate::config::RegressorConfig;
    pub use crate::distributions::{
        describe_distributions, get_distribution, list_distributions, Distribution,
        DistributionFamily,
    };
    pub use crate::error::{DistBoostError, Result};
    pub use crate::model::{DistributionPrediction, DistributionRegressor, FitOptions};
    pub use crate::utils::Link;

    #[cfg(feature = "xgboost")]
    pub use crate::backend::XGBoostBackend;
}
