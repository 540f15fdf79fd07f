//! Per-variant configuration shared by the store, encoder, model and trainer.
//!
//! The three classifiers differ only in input shape, label vocabulary,
//! network topology and training schedule. Everything else is generic over a
//! [`VariantConfig`] value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TrainingSettings;

/// Side length of the square digit drawing.
pub const DIGIT_IMAGE_SIDE: usize = 28;
/// Output units of the dense softmax head. Wider than the brightness
/// vocabulary; unused units are ignored at decode time.
pub const DENSE_OUTPUT_UNITS: usize = 9;

const BRIGHTNESS_LABELS: [&str; 2] = ["dark", "bright"];
const COLOR_LABELS: [&str; 9] = [
    "red", "green", "blue", "orange", "purple", "pink", "yellow", "cyan", "brown",
];
const DIGIT_LABELS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

/// The three shipped classifier variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    #[default]
    Brightness,
    Color,
    Digit,
}

impl VariantKind {
    pub const ALL: [VariantKind; 3] = [Self::Brightness, Self::Color, Self::Digit];

    /// Short id used on the command line and in config files.
    pub fn id(self) -> &'static str {
        match self {
            Self::Brightness => "brightness",
            Self::Color => "color",
            Self::Digit => "digit",
        }
    }

    /// Name used for storage keys and exported files.
    pub fn storage_name(self) -> &'static str {
        match self {
            Self::Brightness => "brightness_judger",
            Self::Color => "color_recognition",
            Self::Digit => "digit_recognition",
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Error)]
#[error("Unknown variant `{0}` (expected brightness, color or digit)")]
pub struct UnknownVariant(pub String);

impl FromStr for VariantKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == value || kind.storage_name() == value)
            .ok_or_else(|| UnknownVariant(value.to_string()))
    }
}

/// Ordered label vocabulary. A label's position is its class index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.0.iter().position(|candidate| candidate == label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index_of(label).is_some()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Shape of one sample's features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureShape {
    /// Three colour channels, 0-255 each.
    Rgb,
    /// Square grayscale grid, 0-255 per pixel, one channel.
    Grid { width: usize, height: usize },
}

impl FeatureShape {
    /// Number of scalar values per sample.
    pub fn len(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Grid { width, height } => width * height,
        }
    }

    /// Per-sample tensor dims, without the batch axis.
    pub fn dims(self) -> Vec<usize> {
        match self {
            Self::Rgb => vec![3],
            Self::Grid { width, height } => vec![height, width, 1],
        }
    }
}

/// How raw feature values are mapped to network inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureScaling {
    /// Values are fed as-is (colour channels stay in 0-255).
    Raw,
    /// Values are divided by 255.
    UnitInterval,
}

impl FeatureScaling {
    pub fn apply(self, value: f32) -> f32 {
        match self {
            Self::Raw => value,
            Self::UnitInterval => value / 255.0,
        }
    }
}

/// Fixed network topology of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    /// One sigmoid hidden layer followed by a softmax layer.
    Dense { hidden_units: usize },
    /// Two conv + max-pool stages, flattened into a softmax layer.
    Convolutional {
        filters: [usize; 2],
        kernel: usize,
        pool: usize,
    },
}

/// Optimizer built fresh at the start of every training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd { learning_rate: f32 },
    Adam { learning_rate: f32 },
}

/// Everything that distinguishes one classifier variant from another.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantConfig {
    pub kind: VariantKind,
    pub labels: LabelSet,
    pub shape: FeatureShape,
    pub scaling: FeatureScaling,
    pub topology: Topology,
    /// Width of the softmax head; may exceed `labels.len()`.
    pub output_units: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f32,
    pub optimizer: OptimizerKind,
    /// Freeze the first convolution when training a model that was loaded.
    pub freeze_first_conv_on_load: bool,
    /// Seed for weight init, shuffling and random inputs. `None` draws from the OS.
    pub seed: Option<u64>,
}

impl VariantConfig {
    pub fn brightness() -> Self {
        Self::dense(VariantKind::Brightness, LabelSet::new(BRIGHTNESS_LABELS))
    }

    pub fn color() -> Self {
        Self::dense(VariantKind::Color, LabelSet::new(COLOR_LABELS))
    }

    pub fn digit() -> Self {
        Self {
            kind: VariantKind::Digit,
            labels: LabelSet::new(DIGIT_LABELS),
            shape: FeatureShape::Grid {
                width: DIGIT_IMAGE_SIDE,
                height: DIGIT_IMAGE_SIDE,
            },
            scaling: FeatureScaling::UnitInterval,
            topology: Topology::Convolutional {
                filters: [9, 16],
                kernel: 5,
                pool: 2,
            },
            output_units: DIGIT_LABELS.len(),
            epochs: 100,
            batch_size: 32,
            validation_split: 0.01,
            optimizer: OptimizerKind::Adam {
                learning_rate: 0.001,
            },
            freeze_first_conv_on_load: true,
            seed: None,
        }
    }

    fn dense(kind: VariantKind, labels: LabelSet) -> Self {
        Self {
            kind,
            labels,
            shape: FeatureShape::Rgb,
            scaling: FeatureScaling::Raw,
            topology: Topology::Dense { hidden_units: 16 },
            output_units: DENSE_OUTPUT_UNITS,
            epochs: 250,
            batch_size: 32,
            validation_split: 0.01,
            optimizer: OptimizerKind::Sgd { learning_rate: 0.1 },
            freeze_first_conv_on_load: false,
            seed: None,
        }
    }

    pub fn for_kind(kind: VariantKind) -> Self {
        match kind {
            VariantKind::Brightness => Self::brightness(),
            VariantKind::Color => Self::color(),
            VariantKind::Digit => Self::digit(),
        }
    }

    /// Apply user overrides from the `[training]` config table.
    pub fn with_settings(mut self, settings: &TrainingSettings) -> Self {
        self.seed = settings.seed;
        self.validation_split = settings.validation_split;
        self.batch_size = settings.batch_size.max(1);
        match self.topology {
            Topology::Dense { .. } => {
                if let Some(epochs) = settings.dense_epochs {
                    self.epochs = epochs;
                }
            }
            Topology::Convolutional { .. } => {
                if let Some(epochs) = settings.conv_epochs {
                    self.epochs = epochs;
                }
                self.freeze_first_conv_on_load = settings.freeze_first_conv_on_load;
            }
        }
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Storage key of the serialized model.
    pub fn model_key(&self) -> String {
        format!("model/{}", self.kind.storage_name())
    }

    /// Storage key of the serialized dataset.
    pub fn rawdata_key(&self) -> String {
        format!("rawdata/{}", self.kind.storage_name())
    }

    /// File stem used when exporting the model.
    pub fn export_stem(&self) -> &'static str {
        self.kind.storage_name()
    }

    /// Whether new inputs are generated rather than captured externally.
    pub fn generates_inputs(&self) -> bool {
        matches!(self.shape, FeatureShape::Rgb)
    }
}
