use rand::rngs::StdRng;
use rand::{SeedableRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::tensor::{FeatureBatch, LabelBatch};

use super::layers::LayerGrads;
use super::optimizer::Optimizer;
use super::{ClassifierModel, ModelError};

const PROBABILITY_FLOOR: f32 = 1e-7;

#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of rows, taken from the end, held out for validation.
    pub validation_split: f32,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 1,
            batch_size: 32,
            validation_split: 0.0,
            shuffle: true,
            seed: 42,
        }
    }
}

/// Mean loss and accuracy over one mini-batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub epoch: usize,
    pub batch: usize,
    pub rows: usize,
    pub loss: f32,
    pub accuracy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// Zero-based epoch index.
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub epochs: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub history: Vec<EpochStats>,
}

impl FitSummary {
    pub fn last_epoch(&self) -> Option<&EpochStats> {
        self.history.last()
    }
}

/// Result of one [`FitRun::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum FitProgress {
    Batch(BatchStats),
    /// The step finished an epoch; carries that epoch's statistics.
    Epoch(EpochStats),
    Finished(FitSummary),
}

/// An in-flight fit that advances one mini-batch per [`step`](Self::step).
///
/// The run owns its data and optimizer state; the model is borrowed only for
/// the duration of a step.
#[derive(Debug)]
pub struct FitRun {
    features: FeatureBatch,
    labels: LabelBatch,
    options: FitOptions,
    optimizer: Optimizer,
    rng: StdRng,
    order: Vec<usize>,
    validation: Vec<usize>,
    epoch: usize,
    cursor: usize,
    batch_index: usize,
    epoch_loss: f64,
    epoch_correct: usize,
    history: Vec<EpochStats>,
    summary: Option<FitSummary>,
}

impl FitRun {
    /// Prepare a run over `features`/`labels`, taking the compiled optimizer from `model`.
    pub fn new(
        model: &mut ClassifierModel,
        features: FeatureBatch,
        labels: LabelBatch,
        options: FitOptions,
    ) -> Result<Self, ModelError> {
        model.check_input(&features)?;
        if labels.rows() != features.rows() || labels.width() != model.output_units() {
            return Err(ModelError::LabelShape {
                expected_rows: features.rows(),
                expected_width: model.output_units(),
                found_rows: labels.rows(),
                found_width: labels.width(),
            });
        }
        if features.rows() == 0 {
            return Err(ModelError::InputShape {
                expected: features.shape().to_vec(),
                found: features.shape().to_vec(),
            });
        }
        let optimizer = model.take_optimizer().ok_or(ModelError::NotCompiled)?;
        let (train, validation) = split_rows(features.rows(), options.validation_split);
        let rng = StdRng::seed_from_u64(options.seed);
        Ok(Self {
            features,
            labels,
            options,
            optimizer,
            rng,
            order: (0..train).collect(),
            validation: (train..train + validation).collect(),
            epoch: 0,
            cursor: 0,
            batch_index: 0,
            epoch_loss: 0.0,
            epoch_correct: 0,
            history: Vec::new(),
            summary: None,
        })
    }

    pub fn epochs(&self) -> usize {
        self.options.epochs
    }

    /// Number of completed epochs.
    pub fn completed_epochs(&self) -> usize {
        self.epoch
    }

    pub fn is_finished(&self) -> bool {
        self.summary.is_some()
    }

    pub fn train_rows(&self) -> usize {
        self.order.len()
    }

    pub fn validation_rows(&self) -> usize {
        self.validation.len()
    }

    /// Advance by one mini-batch. Once all epochs have run, every further
    /// call returns the same `Finished` summary.
    pub fn step(&mut self, model: &mut ClassifierModel) -> FitProgress {
        if let Some(summary) = &self.summary {
            return FitProgress::Finished(summary.clone());
        }
        if self.epoch >= self.options.epochs {
            model.record_training_run();
            let summary = FitSummary {
                epochs: self.epoch,
                train_rows: self.order.len(),
                validation_rows: self.validation.len(),
                history: std::mem::take(&mut self.history),
            };
            self.summary = Some(summary.clone());
            return FitProgress::Finished(summary);
        }
        if self.cursor == 0 && self.options.shuffle {
            self.order.shuffle(&mut self.rng);
        }
        let batch_size = self.options.batch_size.max(1);
        let end = (self.cursor + batch_size).min(self.order.len());
        let rows: Vec<usize> = self.order[self.cursor..end].to_vec();
        let (loss_sum, correct) = self.train_batch(model, &rows);
        self.epoch_loss += loss_sum;
        self.epoch_correct += correct;
        let stats = BatchStats {
            epoch: self.epoch,
            batch: self.batch_index,
            rows: rows.len(),
            loss: (loss_sum / rows.len() as f64) as f32,
            accuracy: correct as f32 / rows.len() as f32,
        };
        self.cursor = end;
        self.batch_index += 1;
        if self.cursor < self.order.len() {
            return FitProgress::Batch(stats);
        }

        let train_rows = self.order.len() as f64;
        let (val_loss, val_accuracy) = self.evaluate_validation(model);
        let epoch_stats = EpochStats {
            epoch: self.epoch,
            loss: (self.epoch_loss / train_rows) as f32,
            accuracy: (self.epoch_correct as f64 / train_rows) as f32,
            val_loss,
            val_accuracy,
        };
        self.history.push(epoch_stats);
        self.epoch += 1;
        self.cursor = 0;
        self.batch_index = 0;
        self.epoch_loss = 0.0;
        self.epoch_correct = 0;
        FitProgress::Epoch(epoch_stats)
    }

    /// Forward, backward and update over `rows`. Returns (summed loss, correct count).
    fn train_batch(&mut self, model: &mut ClassifierModel, rows: &[usize]) -> (f64, usize) {
        let layer_count = model.layers().len();
        let first_trainable = model
            .layers()
            .iter()
            .position(|layer| layer.trainable && layer.param_count() > 0)
            .unwrap_or(layer_count);
        let mut grads: Vec<LayerGrads> = model.layers().iter().map(LayerGrads::zeros_like).collect();
        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;

        for &row in rows {
            let input = self.features.row(row);
            let target = self.labels.class_index(row);
            let trace = model.forward_trace(input);
            let Some(probs) = trace.last() else {
                continue;
            };
            loss_sum += cross_entropy(probs, target) as f64;
            if argmax(probs) == target {
                correct += 1;
            }
            let mut grad: Vec<f32> = probs
                .iter()
                .enumerate()
                .map(|(unit, &p)| p - self.labels.value(row, unit))
                .collect();
            for index in (first_trainable..layer_count).rev() {
                let layer_input = if index == 0 {
                    input
                } else {
                    trace[index - 1].as_slice()
                };
                let next = model.layers()[index].backward(
                    layer_input,
                    &trace[index],
                    grad,
                    &mut grads[index],
                    index > first_trainable,
                );
                match next {
                    Some(next) => grad = next,
                    None => break,
                }
            }
        }

        let scale = 1.0 / rows.len().max(1) as f32;
        for grad in &mut grads {
            grad.kernel.iter_mut().for_each(|g| *g *= scale);
            grad.bias.iter_mut().for_each(|g| *g *= scale);
        }
        self.optimizer.apply(model.layers_mut(), &grads);
        (loss_sum, correct)
    }

    fn evaluate_validation(&self, model: &ClassifierModel) -> (Option<f32>, Option<f32>) {
        if self.validation.is_empty() {
            return (None, None);
        }
        let mut loss = 0.0f64;
        let mut correct = 0usize;
        for &row in &self.validation {
            let probs = model.forward(self.features.row(row));
            let target = self.labels.class_index(row);
            loss += cross_entropy(&probs, target) as f64;
            if argmax(&probs) == target {
                correct += 1;
            }
        }
        let n = self.validation.len() as f64;
        (Some((loss / n) as f32), Some((correct as f64 / n) as f32))
    }
}

/// Run a whole fit to completion, calling `on_epoch` after every epoch.
pub fn fit(
    model: &mut ClassifierModel,
    features: FeatureBatch,
    labels: LabelBatch,
    options: FitOptions,
    mut on_epoch: impl FnMut(&EpochStats),
) -> Result<FitSummary, ModelError> {
    let mut run = FitRun::new(model, features, labels, options)?;
    loop {
        match run.step(model) {
            FitProgress::Batch(_) => {}
            FitProgress::Epoch(stats) => on_epoch(&stats),
            FitProgress::Finished(summary) => return Ok(summary),
        }
    }
}

/// Split `rows` into (train, validation) counts; at least one training row is kept.
fn split_rows(rows: usize, validation_split: f32) -> (usize, usize) {
    let split = validation_split.clamp(0.0, 1.0);
    let held_out = ((rows as f32) * split).floor() as usize;
    let held_out = held_out.min(rows.saturating_sub(1));
    (rows - held_out, held_out)
}

fn cross_entropy(probs: &[f32], target: usize) -> f32 {
    let p = probs
        .get(target)
        .copied()
        .unwrap_or(0.0)
        .clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR);
    -p.ln()
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = idx;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{LabeledSample, default_seed};
    use crate::tensor::encode;
    use crate::variant::{VariantConfig, VariantKind};

    fn compiled(config: &VariantConfig, seed: u64) -> ClassifierModel {
        let mut model = ClassifierModel::new(config, &mut StdRng::seed_from_u64(seed));
        model.compile(config.optimizer);
        model
    }

    #[test]
    fn split_keeps_one_training_row() {
        assert_eq!(split_rows(2, 0.01), (2, 0));
        assert_eq!(split_rows(200, 0.01), (198, 2));
        assert_eq!(split_rows(1, 1.0), (1, 0));
        assert_eq!(split_rows(10, 0.5), (5, 5));
    }

    #[test]
    fn uncompiled_model_cannot_fit() {
        let config = VariantConfig::brightness();
        let mut model = ClassifierModel::new(&config, &mut StdRng::seed_from_u64(0));
        let (x, y) = encode(&default_seed(VariantKind::Brightness), &config).unwrap();
        let err = FitRun::new(&mut model, x, y, FitOptions::default()).unwrap_err();
        assert!(matches!(err, ModelError::NotCompiled));
    }

    #[test]
    fn steps_report_batches_then_epochs_then_finish() {
        let config = VariantConfig::color();
        let mut model = compiled(&config, 1);
        let (x, y) = encode(&default_seed(VariantKind::Color), &config).unwrap();
        let options = FitOptions {
            epochs: 2,
            batch_size: 2,
            ..FitOptions::default()
        };
        let mut run = FitRun::new(&mut model, x, y, options).unwrap();
        assert!(matches!(run.step(&mut model), FitProgress::Batch(s) if s.rows == 2));
        assert!(matches!(run.step(&mut model), FitProgress::Epoch(s) if s.epoch == 0));
        assert!(matches!(run.step(&mut model), FitProgress::Batch(_)));
        assert!(matches!(run.step(&mut model), FitProgress::Epoch(s) if s.epoch == 1));
        let FitProgress::Finished(summary) = run.step(&mut model) else {
            panic!("expected finish");
        };
        assert_eq!(summary.history.len(), 2);
        assert_eq!(model.training_runs(), 1);
        assert!(matches!(run.step(&mut model), FitProgress::Finished(_)));
        assert_eq!(model.training_runs(), 1);
    }

    #[test]
    fn dense_fit_separates_brightness_extremes() {
        let config = VariantConfig::brightness();
        let mut model = compiled(&config, 7);
        let (x, y) = encode(&default_seed(VariantKind::Brightness), &config).unwrap();
        let options = FitOptions {
            epochs: config.epochs,
            batch_size: config.batch_size,
            validation_split: config.validation_split,
            shuffle: true,
            seed: 7,
        };
        let mut epochs = 0;
        let summary = fit(&mut model, x.clone(), y, options, |_| epochs += 1).unwrap();
        assert_eq!(epochs, 250);
        assert_eq!(summary.train_rows, 2);
        let predictions = model.predict_batch(&x).unwrap();
        assert_eq!(predictions[0].label, "dark");
        assert_eq!(predictions[1].label, "bright");
    }

    #[test]
    fn loss_decreases_on_digit_references() {
        let config = VariantConfig::digit();
        let mut model = compiled(&config, 11);
        let samples: Vec<LabeledSample> = default_seed(VariantKind::Digit);
        let (x, y) = encode(&samples, &config).unwrap();
        let options = FitOptions {
            epochs: 15,
            batch_size: 32,
            validation_split: 0.0,
            shuffle: true,
            seed: 11,
        };
        let summary = fit(&mut model, x, y, options, |_| {}).unwrap();
        let first = summary.history.first().unwrap().loss;
        let last = summary.last_epoch().unwrap().loss;
        assert!(last < first, "loss {first} -> {last}");
    }

    #[test]
    fn frozen_first_conv_keeps_its_weights() {
        let config = VariantConfig::digit();
        let mut model = compiled(&config, 12);
        model.freeze_first_conv();
        let before = model.layers()[0].kernel.clone();
        let head_before = model.layers()[5].kernel.clone();
        let (x, y) = encode(&default_seed(VariantKind::Digit), &config).unwrap();
        let options = FitOptions {
            epochs: 1,
            ..FitOptions::default()
        };
        fit(&mut model, x, y, options, |_| {}).unwrap();
        assert_eq!(model.layers()[0].kernel, before);
        assert_ne!(model.layers()[5].kernel, head_before);
    }
}
