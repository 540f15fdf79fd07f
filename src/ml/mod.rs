//! Classifier network and evaluation helpers.
//!
//! Everything here is a hand-written CPU implementation sized for the small
//! fixed topologies the trainer uses.

pub mod classifier;
pub mod metrics;
