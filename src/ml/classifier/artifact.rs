//! Serialized model format.
//!
//! A stored model is a JSON document holding an [`ArchitectureDescriptor`]
//! and the weights as base64 of little-endian `f32` values. Exported models
//! split the same data into an architecture JSON file and a raw weights file.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::variant::{LabelSet, Topology, VariantKind};

use super::layers::{Layer, LayerSpec};
use super::{ClassifierModel, ModelError};

pub const ARCHITECTURE_FORMAT: &str = "coachnet-classifier";
pub const ARCHITECTURE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLayer {
    pub spec: LayerSpec,
    pub trainable: bool,
}

/// Position of one weight tensor inside the flat weights buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsManifestEntry {
    pub name: String,
    pub shape: Vec<usize>,
    /// Offset in `f32` values.
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureDescriptor {
    pub format: String,
    pub version: u32,
    pub variant: VariantKind,
    pub topology: Topology,
    pub input_shape: Vec<usize>,
    pub output_units: usize,
    pub labels: LabelSet,
    pub layers: Vec<StoredLayer>,
    pub weights_manifest: Vec<WeightsManifestEntry>,
    #[serde(default)]
    pub training_runs: u64,
}

/// Blob persisted under `model/<variant>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredModel {
    pub architecture: ArchitectureDescriptor,
    /// Base64 of the little-endian `f32` weights.
    pub weights: String,
}

/// The two halves of an exported model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    pub architecture: Vec<u8>,
    pub weights: Vec<u8>,
}

impl ModelFiles {
    /// Write `<stem>.json` and `<stem>.weights.bin` into `dir`.
    pub fn write_to(&self, dir: &Path, stem: &str) -> Result<(PathBuf, PathBuf), ModelError> {
        fs::create_dir_all(dir).map_err(|source| ModelError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let architecture_path = dir.join(format!("{stem}.json"));
        let weights_path = dir.join(format!("{stem}.weights.bin"));
        write_file(&architecture_path, &self.architecture)?;
        write_file(&weights_path, &self.weights)?;
        Ok((architecture_path, weights_path))
    }

    pub fn read_from(architecture_path: &Path, weights_path: &Path) -> Result<Self, ModelError> {
        Ok(Self {
            architecture: read_file(architecture_path)?,
            weights: read_file(weights_path)?,
        })
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ModelError> {
    fs::write(path, bytes).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, ModelError> {
    fs::read(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn serialize(model: &ClassifierModel) -> Result<Vec<u8>, ModelError> {
    let stored = StoredModel {
        architecture: describe(model),
        weights: STANDARD.encode(weight_bytes(model)),
    };
    Ok(serde_json::to_vec(&stored)?)
}

pub fn deserialize(blob: &[u8]) -> Result<ClassifierModel, ModelError> {
    let stored: StoredModel = serde_json::from_slice(blob)?;
    let bytes = STANDARD.decode(stored.weights.as_bytes())?;
    rebuild(stored.architecture, &bytes)
}

/// Split a model into an architecture JSON document and raw weights.
pub fn to_parts(model: &ClassifierModel) -> Result<ModelFiles, ModelError> {
    Ok(ModelFiles {
        architecture: serde_json::to_vec_pretty(&describe(model))?,
        weights: weight_bytes(model),
    })
}

/// Reassemble a model from the halves produced by [`to_parts`].
pub fn from_parts(architecture: &[u8], weights: &[u8]) -> Result<ClassifierModel, ModelError> {
    let descriptor: ArchitectureDescriptor = serde_json::from_slice(architecture)?;
    rebuild(descriptor, weights)
}

fn describe(model: &ClassifierModel) -> ArchitectureDescriptor {
    let mut weights_manifest = Vec::new();
    let mut offset = 0usize;
    for (index, layer) in model.layers().iter().enumerate() {
        let Some(kernel_shape) = layer.spec.kernel_shape() else {
            continue;
        };
        let prefix = format!("{}_{}", layer.spec.kind_name(), index);
        weights_manifest.push(WeightsManifestEntry {
            name: format!("{prefix}/kernel"),
            shape: kernel_shape,
            offset,
        });
        offset += layer.kernel.len();
        weights_manifest.push(WeightsManifestEntry {
            name: format!("{prefix}/bias"),
            shape: vec![layer.bias.len()],
            offset,
        });
        offset += layer.bias.len();
    }
    ArchitectureDescriptor {
        format: ARCHITECTURE_FORMAT.to_string(),
        version: ARCHITECTURE_VERSION,
        variant: model.variant(),
        topology: model.topology(),
        input_shape: model.input_dims().to_vec(),
        output_units: model.output_units(),
        labels: model.labels().clone(),
        layers: model
            .layers()
            .iter()
            .map(|layer| StoredLayer {
                spec: layer.spec.clone(),
                trainable: layer.trainable,
            })
            .collect(),
        weights_manifest,
        training_runs: model.training_runs(),
    }
}

fn weight_bytes(model: &ClassifierModel) -> Vec<u8> {
    model
        .parameters()
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect()
}

fn rebuild(descriptor: ArchitectureDescriptor, bytes: &[u8]) -> Result<ClassifierModel, ModelError> {
    if descriptor.format != ARCHITECTURE_FORMAT {
        return Err(ModelError::Incompatible(format!(
            "unknown format `{}`",
            descriptor.format
        )));
    }
    if descriptor.version > ARCHITECTURE_VERSION {
        return Err(ModelError::Incompatible(format!(
            "format version {} is newer than {}",
            descriptor.version, ARCHITECTURE_VERSION
        )));
    }
    validate_layer_chain(&descriptor)?;
    if bytes.len() % 4 != 0 {
        return Err(ModelError::Weights(format!(
            "{} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    let expected: usize = descriptor
        .layers
        .iter()
        .map(|layer| layer.spec.kernel_len() + layer.spec.bias_len())
        .sum();
    if values.len() != expected {
        return Err(ModelError::Weights(format!(
            "expected {expected} values, found {}",
            values.len()
        )));
    }

    let mut offset = 0usize;
    let mut layers = Vec::with_capacity(descriptor.layers.len());
    for stored in descriptor.layers {
        let kernel_len = stored.spec.kernel_len();
        let bias_len = stored.spec.bias_len();
        let kernel = values[offset..offset + kernel_len].to_vec();
        offset += kernel_len;
        let bias = values[offset..offset + bias_len].to_vec();
        offset += bias_len;
        layers.push(Layer {
            spec: stored.spec,
            kernel,
            bias,
            trainable: stored.trainable,
        });
    }
    Ok(ClassifierModel::assemble(
        descriptor.variant,
        descriptor.topology,
        descriptor.input_shape,
        descriptor.output_units,
        descriptor.labels,
        layers,
        descriptor.training_runs,
    ))
}

fn validate_layer_chain(descriptor: &ArchitectureDescriptor) -> Result<(), ModelError> {
    let Some(last) = descriptor.layers.last() else {
        return Err(ModelError::Incompatible("no layers".to_string()));
    };
    let mut expected = descriptor.input_shape.iter().product::<usize>();
    for (index, layer) in descriptor.layers.iter().enumerate() {
        if layer.spec.input_len() != expected {
            return Err(ModelError::Incompatible(format!(
                "layer {index} expects {} inputs, previous layer produces {expected}",
                layer.spec.input_len()
            )));
        }
        expected = layer.spec.output_len();
    }
    if last.spec.output_len() != descriptor.output_units {
        return Err(ModelError::Incompatible(format!(
            "last layer has {} outputs, descriptor declares {}",
            last.spec.output_len(),
            descriptor.output_units
        )));
    }
    if descriptor.labels.len() > descriptor.output_units {
        return Err(ModelError::Incompatible(format!(
            "{} labels do not fit {} output units",
            descriptor.labels.len(),
            descriptor.output_units
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Features, PixelGrid, reference_digit};
    use crate::tensor::encode_input;
    use crate::variant::VariantConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::tempdir;

    #[test]
    fn blob_round_trip_preserves_predictions() {
        let config = VariantConfig::color();
        let model = ClassifierModel::new(&config, &mut StdRng::seed_from_u64(9));
        let restored = deserialize(&serialize(&model).unwrap()).unwrap();
        let input = encode_input(&Features::rgb(200.0, 40.0, 90.0), &config).unwrap();
        let before = model.predict(&input).unwrap();
        let after = restored.predict(&input).unwrap();
        assert_eq!(before.label, after.label);
        for (a, b) in before.probabilities.iter().zip(&after.probabilities) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn exported_files_rebuild_the_same_model() {
        let config = VariantConfig::digit();
        let mut model = ClassifierModel::new(&config, &mut StdRng::seed_from_u64(10));
        model.freeze_first_conv();
        let dir = tempdir().unwrap();
        let (arch, weights) = to_parts(&model)
            .unwrap()
            .write_to(dir.path(), config.export_stem())
            .unwrap();
        assert!(arch.ends_with("digit_recognition.json"));
        let files = ModelFiles::read_from(&arch, &weights).unwrap();
        let restored = from_parts(&files.architecture, &files.weights).unwrap();
        assert_eq!(restored.parameters(), model.parameters());
        assert_eq!(restored.frozen_layers(), vec![0]);
        let input = encode_input(
            &Features::Grid(reference_digit(4).unwrap_or_else(|| PixelGrid::blank(28, 28))),
            &config,
        )
        .unwrap();
        assert_eq!(
            model.predict(&input).unwrap().probabilities,
            restored.predict(&input).unwrap().probabilities
        );
    }

    #[test]
    fn manifest_offsets_cover_all_weights() {
        let model = ClassifierModel::new(&VariantConfig::brightness(), &mut StdRng::seed_from_u64(1));
        let files = to_parts(&model).unwrap();
        let descriptor: ArchitectureDescriptor =
            serde_json::from_slice(&files.architecture).unwrap();
        let names: Vec<_> = descriptor
            .weights_manifest
            .iter()
            .map(|entry| entry.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["dense_0/kernel", "dense_0/bias", "dense_1/kernel", "dense_1/bias"]
        );
        assert_eq!(descriptor.weights_manifest[3].offset, 48 + 16 + 144);
        assert_eq!(files.weights.len(), model.param_count() * 4);
    }

    #[test]
    fn truncated_weights_are_rejected() {
        let model = ClassifierModel::new(&VariantConfig::brightness(), &mut StdRng::seed_from_u64(1));
        let files = to_parts(&model).unwrap();
        let err = from_parts(&files.architecture, &files.weights[..files.weights.len() - 4])
            .unwrap_err();
        assert!(matches!(err, ModelError::Weights(_)));
        let err = from_parts(&files.architecture, &files.weights[..3]).unwrap_err();
        assert!(matches!(err, ModelError::Weights(_)));
    }

    #[test]
    fn garbage_blob_is_a_json_error() {
        assert!(matches!(deserialize(b"not json"), Err(ModelError::Json(_))));
    }
}
