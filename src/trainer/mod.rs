//! The interactive train / predict / correct loop for one classifier variant.
//!
//! A [`Trainer`] owns the Sample Store, the current model and at most one
//! in-flight training session. Training never blocks for a whole run:
//! [`Trainer::poll_training`] advances one mini-batch per call and returns,
//! so an event loop can interleave input handling between steps. Predictions
//! are always served from the last completed model, never from the weights
//! being trained.

mod controller;
mod cycle;
mod session;

use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

use crate::dataset::{DatasetError, SampleStore, default_seed};
use crate::ml::classifier::{self, ClassifierModel, ModelError};
use crate::storage::{BlobStore, StorageError};
use crate::tensor::EncodeError;
use crate::variant::{Topology, VariantConfig};

pub use cycle::{LabelConfidence, PredictionDisplay};
pub use session::{
    CancelHandle, TrainingEvent, TrainingOutcome, TrainingProgress, TrainingStatus,
};

/// Why a training run could not start or did not complete.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Cannot train on an empty dataset")]
    EmptyDataset,
    #[error("Dataset could not be encoded: {0}")]
    Encode(#[from] EncodeError),
    #[error("Model rejected the training batch: {0}")]
    Model(#[from] ModelError),
    /// The fit succeeded and the new weights are live in memory, but saving them failed.
    #[error("Training finished but the model could not be saved: {0}")]
    Persist(#[source] StorageError),
}

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error("No prediction is on display to correct")]
    NothingPresented,
    #[error("A training run is in progress")]
    TrainingInProgress,
}

/// Where the current model came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOrigin {
    Stored,
    Imported,
    Fresh,
}

/// One variant's dataset, model and training state.
pub struct Trainer<S: BlobStore> {
    config: VariantConfig,
    store: S,
    samples: SampleStore,
    model: ClassifierModel,
    model_origin: ModelOrigin,
    session: Option<session::TrainingSession>,
    presented: Option<cycle::Presented>,
    cancel: CancelHandle,
    rng: StdRng,
}

impl<S: BlobStore> Trainer<S> {
    /// Load the dataset and model for `config` from `store`.
    ///
    /// When no model is stored a fresh one is built and its first training
    /// run is started immediately; drive it with [`poll_training`](Self::poll_training).
    /// A fresh convolutional model first gets one reference sample for
    /// every label the dataset lacks.
    pub fn open(config: VariantConfig, store: S) -> Result<Self, TrainerError> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let raw = store.load(&config.rawdata_key())?;
        let samples =
            SampleStore::load(config.labels.clone(), raw.as_deref(), default_seed(config.kind))?;
        tracing::info!(
            variant = %config.kind,
            samples = samples.len(),
            origin = ?samples.origin(),
            "Loaded dataset"
        );

        let stored = load_model(&store, &config)?;
        let (model, model_origin) = match stored {
            Some(mut model) => {
                apply_freeze_policy(&mut model, &config);
                tracing::info!(
                    variant = %config.kind,
                    training_runs = model.training_runs(),
                    "Loaded stored model"
                );
                (model, ModelOrigin::Stored)
            }
            None => {
                tracing::info!(variant = %config.kind, "No stored model; building a fresh one");
                (ClassifierModel::new(&config, &mut rng), ModelOrigin::Fresh)
            }
        };

        let mut trainer = Self {
            config,
            store,
            samples,
            model,
            model_origin,
            session: None,
            presented: None,
            cancel: CancelHandle::default(),
            rng,
        };
        if model_origin == ModelOrigin::Fresh {
            if matches!(trainer.config.topology, Topology::Convolutional { .. }) {
                let added = trainer
                    .samples
                    .add_missing_references(default_seed(trainer.config.kind));
                if added > 0 {
                    tracing::info!(added, "Added reference samples for missing labels");
                    trainer.persist_dataset()?;
                }
            }
            trainer.start_training()?;
        }
        Ok(trainer)
    }

    pub fn config(&self) -> &VariantConfig {
        &self.config
    }

    pub fn samples(&self) -> &SampleStore {
        &self.samples
    }

    /// The model predictions are served from.
    pub fn model(&self) -> &ClassifierModel {
        &self.model
    }

    pub fn model_origin(&self) -> ModelOrigin {
        self.model_origin
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Write the dataset to `rawdata/<variant>`.
    pub fn persist_dataset(&mut self) -> Result<(), TrainerError> {
        let blob = self.samples.persist()?;
        self.store.save(&self.config.rawdata_key(), &blob)?;
        Ok(())
    }

    fn persist_model(&mut self) -> Result<(), TrainingError> {
        let blob = classifier::serialize(&self.model)?;
        self.store
            .save(&self.config.model_key(), &blob)
            .map_err(TrainingError::Persist)
    }
}

/// Read the stored model for `config`. A missing blob is `Ok(None)`.
pub fn load_model<S: BlobStore + ?Sized>(
    store: &S,
    config: &VariantConfig,
) -> Result<Option<ClassifierModel>, TrainerError> {
    let Some(blob) = store.load(&config.model_key())? else {
        return Ok(None);
    };
    let model = classifier::deserialize(&blob)?;
    model.ensure_compatible(config)?;
    Ok(Some(model))
}

/// Like [`load_model`], but absence is a [`ModelError::NotFound`].
pub fn require_model<S: BlobStore + ?Sized>(
    store: &S,
    config: &VariantConfig,
) -> Result<ClassifierModel, TrainerError> {
    load_model(store, config)?.ok_or_else(|| {
        ModelError::NotFound {
            key: config.model_key(),
        }
        .into()
    })
}

/// Loaded convolutional models keep their first convolution fixed unless configured otherwise.
fn apply_freeze_policy(model: &mut ClassifierModel, config: &VariantConfig) {
    if !matches!(config.topology, Topology::Convolutional { .. }) {
        return;
    }
    if config.freeze_first_conv_on_load {
        model.freeze_first_conv();
    } else {
        model.unfreeze_all();
    }
}
