//! Labeled samples and the append-only Sample Store.

mod image_input;
mod sample;
mod seed;
mod store;

pub use image_input::{ImageInputError, grid_from_image, grid_from_image_path};
pub use sample::{Features, LabeledSample, PixelGrid};
pub use seed::{default_seed, reference_digit};
pub use store::{DatasetError, DatasetOrigin, SampleStore};
