use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::ml::classifier::{BatchStats, ClassifierModel, EpochStats, FitRun, FitSummary};
use crate::storage::BlobStore;

use super::{Trainer, TrainerError};

/// Cooperative cancellation flag, checked once per training step.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(super) fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Snapshot of the controller state for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainingStatus {
    Idle,
    Training {
        /// Completed epochs so far.
        epoch: usize,
        epochs: usize,
        loss: Option<f32>,
        accuracy: Option<f32>,
    },
}

impl TrainingStatus {
    pub fn is_training(&self) -> bool {
        matches!(self, Self::Training { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub summary: FitSummary,
    pub elapsed: Duration,
}

/// What one call to [`Trainer::poll_training`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    Batch(BatchStats),
    Epoch(EpochStats),
    /// The run finished and the new model was saved.
    Completed(TrainingOutcome),
    /// The run stopped at a yield point; the previous model is kept.
    Cancelled { completed_epochs: usize },
}

impl TrainingEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Cancelled { .. })
    }
}

/// State that exists only while a run is in flight.
pub(super) struct TrainingSession {
    pub(super) working: ClassifierModel,
    pub(super) run: FitRun,
    pub(super) snapshot_len: usize,
    pub(super) started: Instant,
    pub(super) last_epoch: Option<EpochStats>,
}

impl TrainingSession {
    pub(super) fn status(&self) -> TrainingStatus {
        TrainingStatus::Training {
            epoch: self.run.completed_epochs(),
            epochs: self.run.epochs(),
            loss: self.last_epoch.map(|stats| stats.loss),
            accuracy: self.last_epoch.map(|stats| stats.accuracy),
        }
    }
}

/// Lazy sequence of training events; ends after the terminal event or an error.
pub struct TrainingProgress<'a, S: BlobStore> {
    trainer: &'a mut Trainer<S>,
    done: bool,
}

impl<'a, S: BlobStore> TrainingProgress<'a, S> {
    pub(super) fn new(trainer: &'a mut Trainer<S>) -> Self {
        Self {
            trainer,
            done: false,
        }
    }

    /// Only the per-epoch records.
    pub fn epochs(self) -> impl Iterator<Item = Result<EpochStats, TrainerError>> + 'a {
        self.filter_map(|event| match event {
            Ok(TrainingEvent::Epoch(stats)) => Some(Ok(stats)),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        })
    }
}

impl<S: BlobStore> Iterator for TrainingProgress<'_, S> {
    type Item = Result<TrainingEvent, TrainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.trainer.poll_training() {
            Ok(Some(event)) => {
                self.done = event.is_terminal();
                Some(Ok(event))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
