use serde::{Deserialize, Serialize};

use crate::variant::FeatureShape;

/// Square-or-not grayscale grid, row-major, one byte per pixel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelGrid {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl PixelGrid {
    /// All-black grid.
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y * self.width + x).copied()
    }

    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        if x < self.width && y < self.height {
            if let Some(pixel) = self.pixels.get_mut(y * self.width + x) {
                *pixel = value;
            }
        }
    }

    /// True when the pixel buffer matches the declared dimensions.
    pub fn is_consistent(&self) -> bool {
        self.pixels.len() == self.width * self.height
    }
}

/// Raw, unscaled features of one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Features {
    /// `[r, g, b]`, each in 0-255.
    Rgb([f32; 3]),
    Grid(PixelGrid),
}

impl Features {
    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::Rgb([r, g, b])
    }

    /// Shape these features claim to have.
    pub fn shape(&self) -> FeatureShape {
        match self {
            Self::Rgb(_) => FeatureShape::Rgb,
            Self::Grid(grid) => FeatureShape::Grid {
                width: grid.width,
                height: grid.height,
            },
        }
    }

    /// Number of raw values actually stored.
    pub fn value_count(&self) -> usize {
        match self {
            Self::Rgb(channels) => channels.len(),
            Self::Grid(grid) => grid.pixels.len(),
        }
    }

    /// Raw values in storage order.
    pub fn values(&self) -> Box<dyn Iterator<Item = f32> + '_> {
        match self {
            Self::Rgb(channels) => Box::new(channels.iter().copied()),
            Self::Grid(grid) => Box::new(grid.pixels.iter().map(|&p| f32::from(p))),
        }
    }
}

/// One training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SampleRecord")]
pub struct LabeledSample {
    pub features: Features,
    pub label: String,
}

impl LabeledSample {
    pub fn new(features: Features, label: impl Into<String>) -> Self {
        Self {
            features,
            label: label.into(),
        }
    }
}

/// On-disk row. Older colour datasets stored channels inline.
#[derive(Deserialize)]
#[serde(untagged)]
enum SampleRecord {
    Current { features: Features, label: String },
    InlineRgb { r: f32, g: f32, b: f32, label: String },
}

impl From<SampleRecord> for LabeledSample {
    fn from(record: SampleRecord) -> Self {
        match record {
            SampleRecord::Current { features, label } => Self { features, label },
            SampleRecord::InlineRgb { r, g, b, label } => Self {
                features: Features::rgb(r, g, b),
                label,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_rows_serialize_as_plain_arrays() {
        let sample = LabeledSample::new(Features::rgb(255.0, 0.0, 0.0), "red");
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"features":[255.0,0.0,0.0],"label":"red"}"#);
    }

    #[test]
    fn inline_rgb_rows_are_accepted() {
        let sample: LabeledSample =
            serde_json::from_str(r#"{"r":12.5,"g":0,"b":255,"label":"dark"}"#).unwrap();
        assert_eq!(sample.features, Features::rgb(12.5, 0.0, 255.0));
        assert_eq!(sample.label, "dark");
    }

    #[test]
    fn grid_rows_keep_dimensions() {
        let mut grid = PixelGrid::blank(2, 2);
        grid.set(1, 0, 200);
        let sample = LabeledSample::new(Features::Grid(grid), "7");
        let json = serde_json::to_string(&sample).unwrap();
        let back: LabeledSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample);
        assert_eq!(
            back.features.shape(),
            FeatureShape::Grid {
                width: 2,
                height: 2
            }
        );
        let values: Vec<f32> = back.features.values().collect();
        assert_eq!(values, vec![0.0, 200.0, 0.0, 0.0]);
    }
}
