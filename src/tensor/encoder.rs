use thiserror::Error;

use crate::dataset::{Features, LabeledSample};
use crate::variant::{FeatureShape, VariantConfig};

use super::{FeatureBatch, LabelBatch};

#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    #[error("Cannot encode an empty dataset")]
    EmptyDataset,
    #[error("Sample {index} has shape {found:?} with {values} values, expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: FeatureShape,
        found: FeatureShape,
        values: usize,
    },
    #[error("Sample {index} has label `{label}` outside the vocabulary")]
    UnknownLabel { index: usize, label: String },
    #[error("Label vocabulary has {labels} entries but the output head has {units} units")]
    VocabularyExceedsOutput { labels: usize, units: usize },
}

/// Encode the whole dataset into a feature batch and a one-hot label batch.
///
/// Grid pixels are scaled into `[0, 1]`; colour channels stay raw. The label
/// width is the variant's output-unit count, which may exceed the number of
/// labels.
pub fn encode(
    samples: &[LabeledSample],
    config: &VariantConfig,
) -> Result<(FeatureBatch, LabelBatch), EncodeError> {
    if samples.is_empty() {
        return Err(EncodeError::EmptyDataset);
    }
    if config.labels.len() > config.output_units {
        return Err(EncodeError::VocabularyExceedsOutput {
            labels: config.labels.len(),
            units: config.output_units,
        });
    }
    let row_len = config.shape.len();
    let mut data = Vec::with_capacity(samples.len() * row_len);
    let mut classes = Vec::with_capacity(samples.len());
    for (index, sample) in samples.iter().enumerate() {
        check_shape(index, &sample.features, config)?;
        let class = config
            .labels
            .index_of(&sample.label)
            .ok_or_else(|| EncodeError::UnknownLabel {
                index,
                label: sample.label.clone(),
            })?;
        data.extend(sample.features.values().map(|v| config.scaling.apply(v)));
        classes.push(class);
    }
    let features = FeatureBatch::new(samples.len(), &config.shape.dims(), data)
        .ok_or(EncodeError::EmptyDataset)?;
    let labels =
        LabelBatch::from_classes(classes, config.output_units).ok_or(EncodeError::VocabularyExceedsOutput {
            labels: config.labels.len(),
            units: config.output_units,
        })?;
    Ok((features, labels))
}

/// Encode one unlabeled input as a batch of size 1.
pub fn encode_input(features: &Features, config: &VariantConfig) -> Result<FeatureBatch, EncodeError> {
    check_shape(0, features, config)?;
    let data = features.values().map(|v| config.scaling.apply(v)).collect();
    FeatureBatch::new(1, &config.shape.dims(), data).ok_or(EncodeError::ShapeMismatch {
        index: 0,
        expected: config.shape,
        found: features.shape(),
        values: features.value_count(),
    })
}

fn check_shape(index: usize, features: &Features, config: &VariantConfig) -> Result<(), EncodeError> {
    let found = features.shape();
    let consistent = match features {
        Features::Grid(grid) => grid.is_consistent(),
        Features::Rgb(_) => true,
    };
    if !consistent || found != config.shape || features.value_count() != config.shape.len() {
        return Err(EncodeError::ShapeMismatch {
            index,
            expected: config.shape,
            found,
            values: features.value_count(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{PixelGrid, default_seed};
    use crate::variant::VariantKind;

    #[test]
    fn rows_match_dataset_size() {
        for kind in VariantKind::ALL {
            let config = VariantConfig::for_kind(kind);
            let seed = default_seed(kind);
            let (features, labels) = encode(&seed, &config).unwrap();
            assert_eq!(features.rows(), seed.len());
            assert_eq!(labels.rows(), seed.len());
            assert_eq!(labels.width(), config.output_units);
        }
    }

    #[test]
    fn single_sample_keeps_batch_shape() {
        let config = VariantConfig::brightness();
        let sample = vec![LabeledSample::new(Features::rgb(0.0, 0.0, 0.0), "dark")];
        let (features, labels) = encode(&sample, &config).unwrap();
        assert_eq!(features.shape(), &[1, 3]);
        assert_eq!(labels.rows(), 1);
        assert_eq!(labels.width(), 9);
    }

    #[test]
    fn colour_channels_stay_raw() {
        let config = VariantConfig::color();
        let (features, labels) = encode(&default_seed(VariantKind::Color), &config).unwrap();
        assert_eq!(features.row(0), &[255.0, 0.0, 0.0]);
        assert_eq!(labels.class_index(2), 2);
    }

    #[test]
    fn blank_grid_encodes_to_zeros() {
        let config = VariantConfig::digit();
        let batch = encode_input(&Features::Grid(PixelGrid::blank(28, 28)), &config).unwrap();
        assert_eq!(batch.shape(), &[1, 28, 28, 1]);
        assert_eq!(batch.row_len(), 784);
        assert!(batch.row(0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn single_lit_pixel_scales_to_one() {
        let config = VariantConfig::digit();
        let mut grid = PixelGrid::blank(28, 28);
        grid.set(13, 7, 255);
        let batch = encode_input(&Features::Grid(grid), &config).unwrap();
        let row = batch.row(0);
        assert_eq!(row.iter().filter(|&&v| v == 1.0).count(), 1);
        assert_eq!(row.iter().filter(|&&v| v == 0.0).count(), 783);
        assert_eq!(row[7 * 28 + 13], 1.0);
    }

    #[test]
    fn wrong_shape_is_reported_with_index() {
        let config = VariantConfig::digit();
        let mut samples = default_seed(VariantKind::Digit);
        samples.push(LabeledSample::new(Features::Grid(PixelGrid::blank(14, 14)), "3"));
        let err = encode(&samples, &config).unwrap_err();
        assert!(matches!(err, EncodeError::ShapeMismatch { index: 10, .. }));

        let rgb = encode_input(&Features::rgb(1.0, 2.0, 3.0), &config).unwrap_err();
        assert!(matches!(rgb, EncodeError::ShapeMismatch { .. }));
    }

    #[test]
    fn inconsistent_grid_buffer_is_a_shape_mismatch() {
        let config = VariantConfig::digit();
        let grid = PixelGrid {
            width: 28,
            height: 28,
            pixels: vec![0; 10],
        };
        let err = encode_input(&Features::Grid(grid), &config).unwrap_err();
        assert!(matches!(err, EncodeError::ShapeMismatch { values: 10, .. }));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let err = encode(&[], &VariantConfig::color()).unwrap_err();
        assert_eq!(err, EncodeError::EmptyDataset);
    }
}
