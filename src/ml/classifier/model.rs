use rand::Rng;

use crate::tensor::FeatureBatch;
use crate::variant::{LabelSet, OptimizerKind, Topology, VariantConfig, VariantKind};

use super::ModelError;
use super::layers::{Activation, Initializer, Layer, LayerSpec};
use super::optimizer::Optimizer;

/// Decoded output of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Arg-max over the first `labels.len()` outputs.
    pub class_index: usize,
    pub label: String,
    /// Full softmax output, including unused head units.
    pub probabilities: Vec<f32>,
}

impl Prediction {
    pub fn confidence(&self) -> f32 {
        self.probabilities
            .get(self.class_index)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Network parameters for one variant plus the vocabulary they were trained on.
#[derive(Debug, Clone)]
pub struct ClassifierModel {
    variant: VariantKind,
    topology: Topology,
    input_dims: Vec<usize>,
    output_units: usize,
    labels: LabelSet,
    layers: Vec<Layer>,
    optimizer: Option<Optimizer>,
    training_runs: u64,
}

impl ClassifierModel {
    /// Construct a freshly initialized, uncompiled model for `config`.
    pub fn new(config: &VariantConfig, rng: &mut impl Rng) -> Self {
        let input_dims = config.shape.dims();
        let layers = layer_specs(config)
            .into_iter()
            .map(|spec| Layer::initialized(spec, rng))
            .collect();
        Self {
            variant: config.kind,
            topology: config.topology,
            input_dims,
            output_units: config.output_units,
            labels: config.labels.clone(),
            layers,
            optimizer: None,
            training_runs: 0,
        }
    }

    /// Rebuild a model from already validated parts.
    pub(super) fn assemble(
        variant: VariantKind,
        topology: Topology,
        input_dims: Vec<usize>,
        output_units: usize,
        labels: LabelSet,
        layers: Vec<Layer>,
        training_runs: u64,
    ) -> Self {
        Self {
            variant,
            topology,
            input_dims,
            output_units,
            labels,
            layers,
            optimizer: None,
            training_runs,
        }
    }

    /// Attach a fresh optimizer. Required once per training run.
    pub fn compile(&mut self, optimizer: OptimizerKind) {
        self.optimizer = Some(Optimizer::new(optimizer, &self.layers));
    }

    pub fn is_compiled(&self) -> bool {
        self.optimizer.is_some()
    }

    pub(super) fn take_optimizer(&mut self) -> Option<Optimizer> {
        self.optimizer.take()
    }

    pub fn variant(&self) -> VariantKind {
        self.variant
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn input_dims(&self) -> &[usize] {
        &self.input_dims
    }

    pub fn output_units(&self) -> usize {
        self.output_units
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(super) fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    /// Number of completed fit runs over the model's lifetime.
    pub fn training_runs(&self) -> u64 {
        self.training_runs
    }

    pub(super) fn record_training_run(&mut self) {
        self.training_runs += 1;
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    /// All kernels and biases in layer order.
    pub fn parameters(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.param_count());
        for layer in &self.layers {
            out.extend_from_slice(&layer.kernel);
            out.extend_from_slice(&layer.bias);
        }
        out
    }

    /// Freeze the first convolution layer. Returns false when there is none.
    pub fn freeze_first_conv(&mut self) -> bool {
        match self
            .layers
            .iter_mut()
            .find(|layer| matches!(layer.spec, LayerSpec::Conv2d { .. }))
        {
            Some(layer) => {
                layer.trainable = false;
                true
            }
            None => false,
        }
    }

    pub fn unfreeze_all(&mut self) {
        self.layers.iter_mut().for_each(|layer| layer.trainable = true);
    }

    /// Indices of layers with parameters that are not trainable.
    pub fn frozen_layers(&self) -> Vec<usize> {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| !layer.trainable && layer.param_count() > 0)
            .map(|(index, _)| index)
            .collect()
    }

    /// Check that a stored model can serve `config`.
    pub fn ensure_compatible(&self, config: &VariantConfig) -> Result<(), ModelError> {
        if self.variant != config.kind {
            return Err(ModelError::Incompatible(format!(
                "model is for variant `{}`, expected `{}`",
                self.variant, config.kind
            )));
        }
        if self.topology != config.topology {
            return Err(ModelError::Incompatible(format!(
                "topology {:?} differs from {:?}",
                self.topology, config.topology
            )));
        }
        if self.input_dims != config.shape.dims() {
            return Err(ModelError::Incompatible(format!(
                "input shape {:?} differs from {:?}",
                self.input_dims,
                config.shape.dims()
            )));
        }
        if self.output_units != config.output_units {
            return Err(ModelError::Incompatible(format!(
                "output head has {} units, expected {}",
                self.output_units, config.output_units
            )));
        }
        if self.labels != config.labels {
            return Err(ModelError::Incompatible(
                "label vocabulary differs".to_string(),
            ));
        }
        let expected = layer_specs(config);
        if self.layers.len() != expected.len() {
            return Err(ModelError::Incompatible(format!(
                "model has {} layers, expected {}",
                self.layers.len(),
                expected.len()
            )));
        }
        if let Some((index, (layer, spec))) = self
            .layers
            .iter()
            .zip(&expected)
            .enumerate()
            .find(|(_, (layer, spec))| layer.spec != **spec)
        {
            return Err(ModelError::Incompatible(format!(
                "layer {index} is {:?}, expected {spec:?}",
                layer.spec
            )));
        }
        Ok(())
    }

    /// Forward pass keeping every layer's output; the last entry is the softmax output.
    pub fn forward_trace(&self, input: &[f32]) -> Vec<Vec<f32>> {
        let mut outputs: Vec<Vec<f32>> = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let next = match outputs.last() {
                Some(previous) => layer.forward(previous),
                None => layer.forward(input),
            };
            outputs.push(next);
        }
        outputs
    }

    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        self.forward_trace(input).pop().unwrap_or_default()
    }

    /// Softmax outputs for every row of `batch`.
    pub fn predict_proba(&self, batch: &FeatureBatch) -> Result<Vec<Vec<f32>>, ModelError> {
        self.check_input(batch)?;
        Ok((0..batch.rows())
            .map(|row| self.forward(batch.row(row)))
            .collect())
    }

    /// Predict one input given as a batch of size 1.
    pub fn predict(&self, input: &FeatureBatch) -> Result<Prediction, ModelError> {
        if input.rows() != 1 {
            return Err(ModelError::InputShape {
                expected: self.batch_shape(1),
                found: input.shape().to_vec(),
            });
        }
        self.check_input(input)?;
        Ok(self.decode(self.forward(input.row(0))))
    }

    /// Predict every row of `batch`.
    pub fn predict_batch(&self, batch: &FeatureBatch) -> Result<Vec<Prediction>, ModelError> {
        Ok(self
            .predict_proba(batch)?
            .into_iter()
            .map(|probabilities| self.decode(probabilities))
            .collect())
    }

    fn decode(&self, probabilities: Vec<f32>) -> Prediction {
        let valid = self.labels.len().min(probabilities.len());
        let mut class_index = 0usize;
        let mut best = f32::NEG_INFINITY;
        for (index, &p) in probabilities[..valid].iter().enumerate() {
            if p > best {
                best = p;
                class_index = index;
            }
        }
        let label = self.labels.label(class_index).unwrap_or_default().to_string();
        Prediction {
            class_index,
            label,
            probabilities,
        }
    }

    pub(super) fn check_input(&self, batch: &FeatureBatch) -> Result<(), ModelError> {
        if batch.shape()[1..] != self.input_dims[..] {
            return Err(ModelError::InputShape {
                expected: self.batch_shape(batch.rows()),
                found: batch.shape().to_vec(),
            });
        }
        Ok(())
    }

    fn batch_shape(&self, rows: usize) -> Vec<usize> {
        let mut shape = vec![rows];
        shape.extend_from_slice(&self.input_dims);
        shape
    }
}

/// Layer stack for the variant's fixed topology.
pub fn layer_specs(config: &VariantConfig) -> Vec<LayerSpec> {
    match config.topology {
        Topology::Dense { hidden_units } => vec![
            LayerSpec::Dense {
                inputs: config.shape.len(),
                units: hidden_units,
                activation: Activation::Sigmoid,
                initializer: Initializer::GlorotUniform,
            },
            LayerSpec::Dense {
                inputs: hidden_units,
                units: config.output_units,
                activation: Activation::Softmax,
                initializer: Initializer::GlorotUniform,
            },
        ],
        Topology::Convolutional {
            filters,
            kernel,
            pool,
        } => {
            let mut specs = Vec::with_capacity(6);
            let mut shape = hwc(&config.shape.dims());
            for stage_filters in filters {
                let conv = LayerSpec::Conv2d {
                    input: shape,
                    filters: stage_filters,
                    kernel,
                    stride: 1,
                    activation: Activation::Relu,
                    initializer: Initializer::VarianceScaling,
                };
                shape = hwc(&conv.output_shape());
                specs.push(conv);
                let pooling = LayerSpec::MaxPool2d {
                    input: shape,
                    pool,
                    stride: pool,
                };
                shape = hwc(&pooling.output_shape());
                specs.push(pooling);
            }
            let flatten = LayerSpec::Flatten { input: shape };
            let flat_len = flatten.output_len();
            specs.push(flatten);
            specs.push(LayerSpec::Dense {
                inputs: flat_len,
                units: config.output_units,
                activation: Activation::Softmax,
                initializer: Initializer::VarianceScaling,
            });
            specs
        }
    }
}

fn hwc(dims: &[usize]) -> [usize; 3] {
    match dims {
        [h, w, c] => [*h, *w, *c],
        [h, w] => [*h, *w, 1],
        [len] => [1, *len, 1],
        _ => [0, 0, 0],
    }
}
