//! Boosting engines behind a common interface.
//!
//! The `Backend` trait ties a dataset handle to a trained model type. The
//! XGBoost bindings live behind the `xgboost` feature; [`StumpBackend`] is a
//! small in-process engine that exercises the same contract without a native
//! library.

pub mod stump;
mod traits;

#[cfg(feature = "xgboost")]
pub mod xgboost_backend;

pub use stump::{StumpBackend, StumpDataset, StumpModel};
pub use traits::{
    Backend, BackendDataset, BackendModel, BoosterParams, CustomMetric, CustomObjective,
    EarlyStopping, EvalHistory, EvalMetric, ParamValue, PredictOptions, TrainConfig,
    TrainingResult,
};

#[cfg(feature = "xgboost")]
pub use xgboost_backend::XGBoostBackend;
