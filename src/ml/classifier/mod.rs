//! Fixed-topology neural classifier.
//!
//! The dense topology is `input -> dense(sigmoid) -> dense(softmax)`; the
//! convolutional one is `conv -> pool -> conv -> pool -> flatten -> dense(softmax)`.
//! Training is exposed as a resumable [`FitRun`] that advances one mini-batch
//! per call so callers can interleave other work between steps.

mod artifact;
pub mod layers;
mod model;
mod optimizer;
mod train;

use std::path::PathBuf;

use thiserror::Error;

pub use artifact::{
    ARCHITECTURE_FORMAT, ARCHITECTURE_VERSION, ArchitectureDescriptor, ModelFiles, StoredLayer,
    StoredModel, WeightsManifestEntry, deserialize, from_parts, serialize, to_parts,
};
pub use layers::{Activation, Initializer, Layer, LayerSpec};
pub use model::{ClassifierModel, Prediction};
pub use optimizer::Optimizer;
pub use train::{BatchStats, EpochStats, FitOptions, FitProgress, FitRun, FitSummary, fit};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("No stored model under key `{key}`")]
    NotFound { key: String },
    #[error("Model must be compiled before fitting")]
    NotCompiled,
    #[error("Input has shape {found:?}, model expects {expected:?}")]
    InputShape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Label batch has {found_rows} rows of width {found_width}, expected {expected_rows} rows of width {expected_width}")]
    LabelShape {
        expected_rows: usize,
        expected_width: usize,
        found_rows: usize,
        found_width: usize,
    },
    #[error("Stored model is incompatible: {0}")]
    Incompatible(String),
    #[error("Model JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Model weights are not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Model weights are malformed: {0}")]
    Weights(String),
    #[error("Failed to access model file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
