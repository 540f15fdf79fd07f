use thiserror::Error;

use crate::variant::LabelSet;

use super::LabeledSample;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset blob is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Label `{label}` is not part of the vocabulary")]
    UnknownLabel { label: String },
}

/// Where the current dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetOrigin {
    Persisted,
    DefaultSeed,
}

/// Ordered, append-only list of labeled samples for one variant.
#[derive(Debug, Clone)]
pub struct SampleStore {
    labels: LabelSet,
    samples: Vec<LabeledSample>,
    origin: DatasetOrigin,
}

impl SampleStore {
    /// Build the dataset from a persisted blob, falling back to `seed`.
    ///
    /// Rows whose label is outside the vocabulary are dropped with a warning.
    /// An empty persisted array also falls back to the seed, so the result is
    /// never empty as long as the seed is not.
    pub fn load(
        labels: LabelSet,
        persisted: Option<&[u8]>,
        seed: Vec<LabeledSample>,
    ) -> Result<Self, DatasetError> {
        if let Some(blob) = persisted {
            let rows: Vec<LabeledSample> = serde_json::from_slice(blob)?;
            let total = rows.len();
            let samples: Vec<LabeledSample> = rows
                .into_iter()
                .filter(|sample| labels.contains(&sample.label))
                .collect();
            if samples.len() < total {
                tracing::warn!(
                    dropped = total - samples.len(),
                    "Ignoring persisted samples with unknown labels"
                );
            }
            if !samples.is_empty() {
                return Ok(Self {
                    labels,
                    samples,
                    origin: DatasetOrigin::Persisted,
                });
            }
            tracing::info!("Persisted dataset is empty; using default seed");
        }
        Ok(Self {
            labels,
            samples: seed,
            origin: DatasetOrigin::DefaultSeed,
        })
    }

    /// Add a sample at the end. Only label membership is checked.
    pub fn append(&mut self, sample: LabeledSample) -> Result<(), DatasetError> {
        if !self.labels.contains(&sample.label) {
            return Err(DatasetError::UnknownLabel {
                label: sample.label,
            });
        }
        self.samples.push(sample);
        Ok(())
    }

    /// Append every `reference` sample whose label has no sample yet.
    pub fn add_missing_references(&mut self, references: Vec<LabeledSample>) -> usize {
        let mut added = 0;
        for reference in references {
            let present = self.samples.iter().any(|s| s.label == reference.label);
            if !present && self.labels.contains(&reference.label) {
                self.samples.push(reference);
                added += 1;
            }
        }
        added
    }

    /// Serialize the full dataset as a JSON array of `{features, label}`.
    pub fn persist(&self) -> Result<Vec<u8>, DatasetError> {
        Ok(serde_json::to_vec(&self.samples)?)
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    /// Owned copy for a training run; later appends do not affect it.
    pub fn snapshot(&self) -> Vec<LabeledSample> {
        self.samples.clone()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn origin(&self) -> DatasetOrigin {
        self.origin
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Features, default_seed};
    use crate::variant::{VariantConfig, VariantKind};

    fn brightness_store(blob: Option<&[u8]>) -> SampleStore {
        SampleStore::load(
            VariantConfig::brightness().labels,
            blob,
            default_seed(VariantKind::Brightness),
        )
        .unwrap()
    }

    #[test]
    fn missing_blob_uses_seed() {
        let store = brightness_store(None);
        assert_eq!(store.origin(), DatasetOrigin::DefaultSeed);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn empty_blob_uses_seed() {
        let store = brightness_store(Some(b"[]"));
        assert_eq!(store.origin(), DatasetOrigin::DefaultSeed);
        assert!(!store.is_empty());
    }

    #[test]
    fn persist_keeps_appended_samples_across_calls() {
        let mut store = brightness_store(None);
        let first = store.persist().unwrap();
        assert_eq!(first, store.persist().unwrap());

        store
            .append(LabeledSample::new(Features::rgb(10.0, 20.0, 30.0), "dark"))
            .unwrap();
        let second = store.persist().unwrap();
        let reloaded = brightness_store(Some(&second));
        assert_eq!(reloaded.origin(), DatasetOrigin::Persisted);
        assert_eq!(reloaded.samples(), store.samples());
    }

    #[test]
    fn append_rejects_unknown_label() {
        let mut store = brightness_store(None);
        let err = store
            .append(LabeledSample::new(Features::rgb(1.0, 1.0, 1.0), "grey"))
            .unwrap_err();
        assert!(matches!(err, DatasetError::UnknownLabel { .. }));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn unknown_persisted_labels_are_dropped() {
        let blob = br#"[{"r":0,"g":0,"b":0,"label":"dark"},{"features":[1,2,3],"label":"grey"}]"#;
        let store = brightness_store(Some(blob));
        assert_eq!(store.len(), 1);
        assert_eq!(store.samples()[0].label, "dark");
    }

    #[test]
    fn snapshot_is_detached() {
        let mut store = brightness_store(None);
        let snapshot = store.snapshot();
        store
            .append(LabeledSample::new(Features::rgb(5.0, 5.0, 5.0), "dark"))
            .unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn references_fill_only_missing_labels() {
        let mut store = SampleStore::load(
            VariantConfig::digit().labels,
            None,
            default_seed(VariantKind::Digit).into_iter().take(3).collect(),
        )
        .unwrap();
        let added = store.add_missing_references(default_seed(VariantKind::Digit));
        assert_eq!(added, 7);
        assert_eq!(store.len(), 10);
    }
}
