use std::path::{Path, PathBuf};

use rand::Rng;

use crate::dataset::{Features, LabeledSample};
use crate::ml::classifier::{self, ModelFiles, Prediction};
use crate::ml::metrics::{ConfusionMatrix, EvaluationReport};
use crate::storage::BlobStore;
use crate::tensor::{encode, encode_input};

use super::{ModelOrigin, Trainer, TrainerError, TrainingError, apply_freeze_policy};

/// The input currently on display and what the model said about it.
#[derive(Debug, Clone)]
pub(super) struct Presented {
    features: Features,
    prediction: Prediction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelConfidence {
    pub label: String,
    /// Softmax probability in percent.
    pub percent: f32,
}

/// What the presentation layer renders for the current input.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionDisplay {
    pub features: Features,
    pub label: String,
    /// One entry per vocabulary label, in vocabulary order.
    pub confidences: Vec<LabelConfidence>,
}

impl<S: BlobStore> Trainer<S> {
    /// Draw a random colour for dense variants.
    ///
    /// Image variants get their inputs from an external drawing surface, so
    /// this returns `None` for them.
    pub fn sample_new_input(&mut self) -> Option<Features> {
        if !self.config.generates_inputs() {
            return None;
        }
        let mut channel = || self.rng.random_range(0.0f32..255.0);
        Some(Features::rgb(channel(), channel(), channel()))
    }

    /// Predict with the served model without touching the dataset.
    pub fn predict(&self, features: &Features) -> Result<Prediction, TrainerError> {
        let input = encode_input(features, &self.config)?;
        Ok(self.model.predict(&input)?)
    }

    /// Predict `features` and remember them as the input on display.
    pub fn predict_and_present(&mut self, features: Features) -> Result<Prediction, TrainerError> {
        let prediction = self.predict(&features)?;
        tracing::debug!(
            label = %prediction.label,
            confidence = prediction.confidence(),
            "Presenting prediction"
        );
        self.presented = Some(Presented {
            features,
            prediction: prediction.clone(),
        });
        Ok(prediction)
    }

    /// Accept the displayed label. Nothing is recorded.
    pub fn confirm(&mut self) {
        if let Some(presented) = &self.presented {
            tracing::debug!(label = %presented.prediction.label, "Prediction confirmed");
        }
    }

    /// Append `{features, label}` to the dataset and save it.
    ///
    /// Features that do not fit the variant's input shape are refused before
    /// anything is recorded. The model is not retrained; call
    /// [`start_training`](Self::start_training) for that. A run already in
    /// flight keeps training on its own snapshot.
    pub fn correct(&mut self, features: Features, label: &str) -> Result<(), TrainerError> {
        encode_input(&features, &self.config)?;
        self.samples
            .append(LabeledSample::new(features, label))?;
        tracing::info!(label, samples = self.samples.len(), "Correction recorded");
        self.persist_dataset()
    }

    /// Correct the input currently on display.
    pub fn submit_correction(&mut self, label: &str) -> Result<(), TrainerError> {
        let features = self
            .presented
            .as_ref()
            .ok_or(TrainerError::NothingPresented)?
            .features
            .clone();
        self.correct(features, label)?;
        if let Some(presented) = self.presented.as_mut() {
            presented.prediction.label = label.to_string();
            if let Some(index) = self.config.labels.index_of(label) {
                presented.prediction.class_index = index;
            }
        }
        Ok(())
    }

    /// Generate and predict a new input. `None` for image variants.
    pub fn request_new_sample(&mut self) -> Result<Option<Prediction>, TrainerError> {
        match self.sample_new_input() {
            Some(features) => self.predict_and_present(features).map(Some),
            None => Ok(None),
        }
    }

    pub fn prediction_display(&self) -> Option<PredictionDisplay> {
        let presented = self.presented.as_ref()?;
        let confidences = self
            .config
            .labels
            .iter()
            .enumerate()
            .map(|(index, label)| LabelConfidence {
                label: label.to_string(),
                percent: presented
                    .prediction
                    .probabilities
                    .get(index)
                    .copied()
                    .unwrap_or(0.0)
                    * 100.0,
            })
            .collect();
        Some(PredictionDisplay {
            features: presented.features.clone(),
            label: presented.prediction.label.clone(),
            confidences,
        })
    }

    /// Write the served model as `<variant>.json` + `<variant>.weights.bin`.
    pub fn export_model(&self, dir: &Path) -> Result<(PathBuf, PathBuf), TrainerError> {
        let files = classifier::to_parts(&self.model)?;
        let paths = files.write_to(dir, self.config.export_stem())?;
        tracing::info!(
            architecture = %paths.0.display(),
            weights = %paths.1.display(),
            "Model exported"
        );
        Ok(paths)
    }

    pub fn request_download(&self, dir: &Path) -> Result<(PathBuf, PathBuf), TrainerError> {
        self.export_model(dir)
    }

    /// Replace the served model with one built from exported files, then save it.
    pub fn import_model(&mut self, architecture: &[u8], weights: &[u8]) -> Result<(), TrainerError> {
        if self.is_training() {
            return Err(TrainerError::TrainingInProgress);
        }
        let mut model = classifier::from_parts(architecture, weights)?;
        model.ensure_compatible(&self.config)?;
        apply_freeze_policy(&mut model, &self.config);
        self.model = model;
        self.model_origin = ModelOrigin::Imported;
        self.presented = None;
        self.persist_model().map_err(|err| match err {
            TrainingError::Persist(source) => TrainerError::Storage(source),
            other => TrainerError::Training(other),
        })?;
        tracing::info!(variant = %self.config.kind, "Model imported");
        Ok(())
    }

    pub fn import_model_files(
        &mut self,
        architecture_path: &Path,
        weights_path: &Path,
    ) -> Result<(), TrainerError> {
        let files = ModelFiles::read_from(architecture_path, weights_path)?;
        self.import_model(&files.architecture, &files.weights)
    }

    /// Score the served model on the whole dataset.
    pub fn evaluate(&self) -> Result<EvaluationReport, TrainerError> {
        let (features, labels) = encode(self.samples.samples(), &self.config)?;
        let predictions = self.model.predict_batch(&features)?;
        let mut matrix = ConfusionMatrix::new(self.config.labels.len());
        for (row, prediction) in predictions.iter().enumerate() {
            matrix.record(labels.class_index(row), prediction.class_index);
        }
        Ok(EvaluationReport::from_confusion(&matrix, &self.config.labels))
    }
}

#[cfg(test)]
mod tests {
    use crate::dataset::{Features, PixelGrid};
    use crate::storage::MemoryBlobStore;
    use crate::trainer::{Trainer, TrainerError};
    use crate::variant::VariantConfig;

    fn trained_color() -> Trainer<MemoryBlobStore> {
        let config = VariantConfig::color().with_seed(21).with_epochs(5);
        let mut trainer = Trainer::open(config, MemoryBlobStore::new()).unwrap();
        trainer.run_training(|_| {}).unwrap();
        trainer
    }

    #[test]
    fn random_inputs_are_colour_triples() {
        let mut trainer = trained_color();
        let mut fractional = false;
        for _ in 0..20 {
            let Some(Features::Rgb(channels)) = trainer.sample_new_input() else {
                panic!("expected rgb");
            };
            assert!(channels.iter().all(|c| (0.0..255.0).contains(c)));
            fractional |= channels.iter().any(|c| c.fract() != 0.0);
        }
        assert!(fractional);
    }

    #[test]
    fn display_lists_every_label() {
        let mut trainer = trained_color();
        assert!(trainer.prediction_display().is_none());
        let prediction = trainer.request_new_sample().unwrap().unwrap();
        let display = trainer.prediction_display().unwrap();
        assert_eq!(display.label, prediction.label);
        assert_eq!(display.confidences.len(), 9);
        let total: f32 = display.confidences.iter().map(|c| c.percent).sum();
        assert!(total <= 100.0 + 1e-3);
    }

    #[test]
    fn submit_correction_records_displayed_input() {
        let mut trainer = trained_color();
        assert!(matches!(
            trainer.submit_correction("red"),
            Err(TrainerError::NothingPresented)
        ));
        let features = Features::rgb(250.0, 120.0, 10.0);
        trainer.predict_and_present(features.clone()).unwrap();
        trainer.confirm();
        assert_eq!(trainer.samples().len(), 3);
        trainer.submit_correction("orange").unwrap();
        assert_eq!(trainer.samples().len(), 4);
        let last = trainer.samples().samples().last().unwrap();
        assert_eq!(last.features, features);
        assert_eq!(last.label, "orange");
        assert_eq!(trainer.prediction_display().unwrap().label, "orange");
    }

    #[test]
    fn correction_with_unknown_label_is_rejected() {
        let mut trainer = trained_color();
        let err = trainer
            .correct(Features::rgb(1.0, 2.0, 3.0), "mauve")
            .unwrap_err();
        assert!(matches!(err, TrainerError::Dataset(_)));
        assert_eq!(trainer.samples().len(), 3);
    }

    #[test]
    fn predicting_wrong_shape_fails() {
        let trainer = trained_color();
        let err = trainer
            .predict(&Features::Grid(PixelGrid::blank(28, 28)))
            .unwrap_err();
        assert!(matches!(err, TrainerError::Encode(_)));
    }

    #[test]
    fn evaluation_covers_dataset() {
        let trainer = trained_color();
        let report = trainer.evaluate().unwrap();
        assert_eq!(report.samples, 3);
        assert_eq!(report.per_class.len(), 9);
    }

    #[test]
    fn import_is_refused_while_training() {
        let config = VariantConfig::brightness().with_seed(2).with_epochs(5);
        let mut trainer = Trainer::open(config, MemoryBlobStore::new()).unwrap();
        let files = crate::ml::classifier::to_parts(trainer.model()).unwrap();
        let err = trainer
            .import_model(&files.architecture, &files.weights)
            .unwrap_err();
        assert!(matches!(err, TrainerError::TrainingInProgress));
    }

    #[test]
    fn import_rejects_altered_activations() {
        let mut trainer = trained_color();
        let files = crate::ml::classifier::to_parts(trainer.model()).unwrap();
        let mut descriptor: serde_json::Value =
            serde_json::from_slice(&files.architecture).unwrap();
        descriptor["layers"][0]["spec"]["activation"] = "relu".into();
        descriptor["layers"][1]["spec"]["activation"] = "linear".into();
        let architecture = serde_json::to_vec(&descriptor).unwrap();
        let before = trainer.model().parameters();

        let err = trainer
            .import_model(&architecture, &files.weights)
            .unwrap_err();
        assert!(matches!(
            err,
            TrainerError::Model(crate::ml::classifier::ModelError::Incompatible(_))
        ));
        assert_eq!(trainer.model().parameters(), before);
        let prediction = trainer.predict(&Features::rgb(10.0, 20.0, 30.0)).unwrap();
        let total: f32 = prediction.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
    }
}
