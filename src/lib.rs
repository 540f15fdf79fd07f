//! Interactive classifier trainer.
//!
//! A user labels small inputs (a colour triple or a 28x28 drawing), a compact
//! network is trained on the accumulated samples, predictions are shown for
//! new inputs and corrections flow back into the dataset for the next run.
//! The brightness, colour and digit classifiers share one [`trainer::Trainer`]
//! parameterized by a [`variant::VariantConfig`].

/// Application directory resolution.
pub mod app_dirs;
/// TOML settings.
pub mod config;
/// Labeled samples, seeds and the Sample Store.
pub mod dataset;
/// Logging setup.
pub mod logging;
/// Classifier network and metrics.
pub mod ml;
/// Key/blob persistence.
pub mod storage;
/// Feature and label batches.
pub mod tensor;
/// Training controller and prediction/correction cycle.
pub mod trainer;
/// Per-variant configuration.
pub mod variant;
