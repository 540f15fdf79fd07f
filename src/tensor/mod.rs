//! Dense batches fed to the classifier.

mod batch;
mod encoder;

pub use batch::{FeatureBatch, LabelBatch};
pub use encoder::{EncodeError, encode, encode_input};
