use std::time::Instant;

use rand::Rng;

use crate::ml::classifier::{FitOptions, FitProgress, FitRun};
use crate::storage::BlobStore;
use crate::tensor::encode;

use super::session::{TrainingSession, TrainingStatus};
use super::{
    CancelHandle, Trainer, TrainerError, TrainingError, TrainingEvent, TrainingOutcome,
    TrainingProgress,
};

impl<S: BlobStore> Trainer<S> {
    /// Begin a training run over a snapshot of the current dataset.
    ///
    /// Returns `Ok(false)` without doing anything when a run is already in
    /// flight. Encoding or shape errors are returned before any state changes.
    pub fn start_training(&mut self) -> Result<bool, TrainerError> {
        if self.session.is_some() {
            tracing::debug!("Training already in progress; request ignored");
            return Ok(false);
        }
        if self.samples.is_empty() {
            return Err(TrainingError::EmptyDataset.into());
        }
        let snapshot = self.samples.snapshot();
        let (features, labels) = encode(&snapshot, &self.config).map_err(|err| {
            tracing::warn!("Training aborted before start: {err}");
            TrainingError::Encode(err)
        })?;
        let mut working = self.model.clone();
        working.compile(self.config.optimizer);
        let options = FitOptions {
            epochs: self.config.epochs,
            batch_size: self.config.batch_size,
            validation_split: self.config.validation_split,
            shuffle: true,
            seed: self.rng.random(),
        };
        let run = FitRun::new(&mut working, features, labels, options).map_err(|err| {
            tracing::warn!("Training aborted before start: {err}");
            TrainingError::Model(err)
        })?;
        tracing::info!(
            variant = %self.config.kind,
            samples = snapshot.len(),
            train_rows = run.train_rows(),
            validation_rows = run.validation_rows(),
            epochs = run.epochs(),
            frozen_layers = ?working.frozen_layers(),
            "Training started"
        );
        self.cancel.reset();
        self.session = Some(TrainingSession {
            working,
            run,
            snapshot_len: snapshot.len(),
            started: Instant::now(),
            last_epoch: None,
        });
        Ok(true)
    }

    /// Advance the in-flight run by one mini-batch.
    ///
    /// Each call is a yield point: the cancellation flag is checked first.
    /// Returns `Ok(None)` when idle. On completion the trained weights replace
    /// the served model and are persisted; a persistence failure is returned
    /// as [`TrainingError::Persist`] with the new weights kept in memory.
    pub fn poll_training(&mut self) -> Result<Option<TrainingEvent>, TrainerError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        if self.cancel.is_cancelled() {
            let completed_epochs = session.run.completed_epochs();
            self.session = None;
            self.cancel.reset();
            tracing::warn!(completed_epochs, "Training cancelled; keeping previous model");
            return Ok(Some(TrainingEvent::Cancelled { completed_epochs }));
        }
        match session.run.step(&mut session.working) {
            FitProgress::Batch(stats) => Ok(Some(TrainingEvent::Batch(stats))),
            FitProgress::Epoch(stats) => {
                session.last_epoch = Some(stats);
                tracing::debug!(
                    epoch = stats.epoch,
                    loss = stats.loss,
                    accuracy = stats.accuracy,
                    val_loss = ?stats.val_loss,
                    "Epoch finished"
                );
                Ok(Some(TrainingEvent::Epoch(stats)))
            }
            FitProgress::Finished(summary) => {
                let Some(session) = self.session.take() else {
                    return Ok(None);
                };
                let outcome = TrainingOutcome {
                    summary,
                    elapsed: session.started.elapsed(),
                };
                self.model = session.working;
                let final_loss = outcome.summary.last_epoch().map(|stats| stats.loss);
                if let Err(err) = self.persist_model() {
                    tracing::error!("Training finished but the model was not saved: {err}");
                    return Err(err.into());
                }
                tracing::info!(
                    variant = %self.config.kind,
                    samples = session.snapshot_len,
                    epochs = outcome.summary.epochs,
                    loss = ?final_loss,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Training finished"
                );
                Ok(Some(TrainingEvent::Completed(outcome)))
            }
        }
    }

    /// Iterate the remaining events of the current run.
    pub fn training_progress(&mut self) -> TrainingProgress<'_, S> {
        TrainingProgress::new(self)
    }

    /// Start a run (if idle) and drive it to completion, reporting each epoch.
    ///
    /// Returns `Ok(None)` when the run was cancelled.
    pub fn run_training(
        &mut self,
        mut on_epoch: impl FnMut(&crate::ml::classifier::EpochStats),
    ) -> Result<Option<TrainingOutcome>, TrainerError> {
        self.start_training()?;
        for event in self.training_progress() {
            match event? {
                TrainingEvent::Epoch(stats) => on_epoch(&stats),
                TrainingEvent::Completed(outcome) => return Ok(Some(outcome)),
                TrainingEvent::Cancelled { .. } => return Ok(None),
                TrainingEvent::Batch(_) => {}
            }
        }
        Ok(None)
    }

    pub fn training_status(&self) -> TrainingStatus {
        self.session
            .as_ref()
            .map_or(TrainingStatus::Idle, TrainingSession::status)
    }

    pub fn is_training(&self) -> bool {
        self.session.is_some()
    }

    /// Handle that stops the current run at its next yield point.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Alias of [`start_training`](Self::start_training) for UI wiring.
    pub fn request_training(&mut self) -> Result<bool, TrainerError> {
        self.start_training()
    }
}

#[cfg(test)]
mod tests {
    use crate::dataset::{Features, SampleStore};
    use crate::storage::{BlobStore, MemoryBlobStore};
    use crate::trainer::{
        ModelOrigin, Trainer, TrainerError, TrainingError, TrainingEvent, TrainingStatus,
    };
    use crate::variant::VariantConfig;

    fn brightness(epochs: usize) -> Trainer<MemoryBlobStore> {
        let config = VariantConfig::brightness().with_seed(5).with_epochs(epochs);
        Trainer::open(config, MemoryBlobStore::new()).unwrap()
    }

    #[test]
    fn fresh_model_starts_training_on_open() {
        let mut trainer = brightness(3);
        assert_eq!(trainer.model_origin(), ModelOrigin::Fresh);
        assert!(matches!(
            trainer.training_status(),
            TrainingStatus::Training { epoch: 0, epochs: 3, .. }
        ));
        let events: Vec<_> = trainer
            .training_progress()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(matches!(events.last(), Some(TrainingEvent::Completed(_))));
        assert_eq!(trainer.training_status(), TrainingStatus::Idle);
        assert_eq!(trainer.model().training_runs(), 1);
    }

    #[test]
    fn second_start_is_ignored() {
        let mut trainer = brightness(2);
        assert!(!trainer.start_training().unwrap());
        assert!(!trainer.request_training().unwrap());
        trainer.run_training(|_| {}).unwrap();
        assert_eq!(trainer.model().training_runs(), 1);
    }

    #[test]
    fn cancelled_run_keeps_previous_weights() {
        let mut trainer = brightness(50);
        let before = trainer.model().parameters();
        trainer.poll_training().unwrap();
        trainer.cancel_handle().cancel();
        let event = trainer.poll_training().unwrap();
        assert!(matches!(event, Some(TrainingEvent::Cancelled { completed_epochs: 1 })));
        assert!(!trainer.is_training());
        assert_eq!(trainer.model().parameters(), before);
        assert_eq!(trainer.store().load("model/brightness_judger").unwrap(), None);
    }

    #[test]
    fn served_model_is_stable_during_training() {
        let mut trainer = brightness(10);
        let before = trainer.model().parameters();
        for _ in 0..5 {
            trainer.poll_training().unwrap();
        }
        assert_eq!(trainer.model().parameters(), before);
        trainer
            .correct(Features::rgb(3.0, 3.0, 3.0), "dark")
            .unwrap();
        assert_eq!(trainer.samples().len(), 3);
        let outcome = trainer.run_training(|_| {}).unwrap().unwrap();
        assert_eq!(outcome.summary.train_rows, 2);
        assert_ne!(trainer.model().parameters(), before);
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let mut trainer = brightness(1);
        trainer.run_training(|_| {}).unwrap();
        trainer.samples =
            SampleStore::load(trainer.config.labels.clone(), None, Vec::new()).unwrap();
        let err = trainer.start_training().unwrap_err();
        assert!(matches!(
            err,
            TrainerError::Training(TrainingError::EmptyDataset)
        ));
        assert!(!trainer.is_training());
    }
}
