//! Layer definitions and single-sample forward/backward passes.
//!
//! Tensors are flat `f32` slices. Image tensors are channels-last
//! (`[height, width, channels]`). Dense kernels are `[inputs, units]`,
//! convolution kernels `[kernel, kernel, in_channels, filters]`.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Sigmoid,
    Relu,
    Softmax,
}

impl Activation {
    fn apply(self, values: &mut [f32]) {
        match self {
            Self::Linear => {}
            Self::Sigmoid => values.iter_mut().for_each(|v| *v = 1.0 / (1.0 + (-*v).exp())),
            Self::Relu => values.iter_mut().for_each(|v| *v = v.max(0.0)),
            Self::Softmax => softmax_inplace(values),
        }
    }

    /// Multiply `grad` by the derivative, expressed through the layer output.
    /// Softmax is handled together with the cross-entropy loss.
    fn backprop(self, output: &[f32], grad: &mut [f32]) {
        match self {
            Self::Linear | Self::Softmax => {}
            Self::Sigmoid => {
                for (g, &y) in grad.iter_mut().zip(output) {
                    *g *= y * (1.0 - y);
                }
            }
            Self::Relu => {
                for (g, &y) in grad.iter_mut().zip(output) {
                    if y <= 0.0 {
                        *g = 0.0;
                    }
                }
            }
        }
    }
}

/// Kernel initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    GlorotUniform,
    /// Truncated normal with std `sqrt(1 / fan_in)`.
    VarianceScaling,
}

/// Shape-level description of a layer; enough to rebuild it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Dense {
        inputs: usize,
        units: usize,
        activation: Activation,
        initializer: Initializer,
    },
    Conv2d {
        /// `[height, width, channels]`
        input: [usize; 3],
        filters: usize,
        kernel: usize,
        stride: usize,
        activation: Activation,
        initializer: Initializer,
    },
    MaxPool2d {
        input: [usize; 3],
        pool: usize,
        stride: usize,
    },
    Flatten {
        input: [usize; 3],
    },
}

impl LayerSpec {
    pub fn input_len(&self) -> usize {
        match self {
            Self::Dense { inputs, .. } => *inputs,
            Self::Conv2d { input, .. } | Self::MaxPool2d { input, .. } | Self::Flatten { input } => {
                input.iter().product()
            }
        }
    }

    /// Output shape; dense and flatten outputs are one-dimensional.
    pub fn output_shape(&self) -> Vec<usize> {
        match self {
            Self::Dense { units, .. } => vec![*units],
            Self::Conv2d {
                input,
                filters,
                kernel,
                stride,
                ..
            } => {
                let [h, w, _] = *input;
                vec![
                    window_count(h, *kernel, *stride),
                    window_count(w, *kernel, *stride),
                    *filters,
                ]
            }
            Self::MaxPool2d {
                input,
                pool,
                stride,
            } => {
                let [h, w, c] = *input;
                vec![
                    window_count(h, *pool, *stride),
                    window_count(w, *pool, *stride),
                    c,
                ]
            }
            Self::Flatten { input } => vec![input.iter().product()],
        }
    }

    pub fn output_len(&self) -> usize {
        self.output_shape().iter().product()
    }

    /// Kernel shape, or `None` for parameter-free layers.
    pub fn kernel_shape(&self) -> Option<Vec<usize>> {
        match self {
            Self::Dense { inputs, units, .. } => Some(vec![*inputs, *units]),
            Self::Conv2d {
                input,
                filters,
                kernel,
                ..
            } => Some(vec![*kernel, *kernel, input[2], *filters]),
            Self::MaxPool2d { .. } | Self::Flatten { .. } => None,
        }
    }

    pub fn bias_len(&self) -> usize {
        match self {
            Self::Dense { units, .. } => *units,
            Self::Conv2d { filters, .. } => *filters,
            Self::MaxPool2d { .. } | Self::Flatten { .. } => 0,
        }
    }

    pub fn kernel_len(&self) -> usize {
        self.kernel_shape()
            .map(|shape| shape.iter().product())
            .unwrap_or(0)
    }

    pub fn activation(&self) -> Activation {
        match self {
            Self::Dense { activation, .. } | Self::Conv2d { activation, .. } => *activation,
            Self::MaxPool2d { .. } | Self::Flatten { .. } => Activation::Linear,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Dense { .. } => "dense",
            Self::Conv2d { .. } => "conv2d",
            Self::MaxPool2d { .. } => "max_pooling2d",
            Self::Flatten { .. } => "flatten",
        }
    }

    fn fans(&self) -> (usize, usize) {
        match self {
            Self::Dense { inputs, units, .. } => (*inputs, *units),
            Self::Conv2d {
                input,
                filters,
                kernel,
                ..
            } => {
                let area = kernel * kernel;
                (area * input[2], area * filters)
            }
            Self::MaxPool2d { .. } | Self::Flatten { .. } => (0, 0),
        }
    }

    fn initializer(&self) -> Option<Initializer> {
        match self {
            Self::Dense { initializer, .. } | Self::Conv2d { initializer, .. } => {
                Some(*initializer)
            }
            Self::MaxPool2d { .. } | Self::Flatten { .. } => None,
        }
    }
}

fn window_count(size: usize, window: usize, stride: usize) -> usize {
    if size < window || stride == 0 {
        0
    } else {
        (size - window) / stride + 1
    }
}

/// A layer with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub spec: LayerSpec,
    pub kernel: Vec<f32>,
    pub bias: Vec<f32>,
    pub trainable: bool,
}

/// Gradients for one layer's parameters.
#[derive(Debug, Clone, Default)]
pub struct LayerGrads {
    pub kernel: Vec<f32>,
    pub bias: Vec<f32>,
}

impl LayerGrads {
    pub fn zeros_like(layer: &Layer) -> Self {
        Self {
            kernel: vec![0.0; layer.kernel.len()],
            bias: vec![0.0; layer.bias.len()],
        }
    }

    pub fn clear(&mut self) {
        self.kernel.iter_mut().for_each(|v| *v = 0.0);
        self.bias.iter_mut().for_each(|v| *v = 0.0);
    }
}

impl Layer {
    /// Create a layer with freshly initialized kernel and zero bias.
    pub fn initialized(spec: LayerSpec, rng: &mut impl Rng) -> Self {
        let (fan_in, fan_out) = spec.fans();
        let kernel = match spec.initializer() {
            Some(Initializer::GlorotUniform) => {
                let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                (0..spec.kernel_len())
                    .map(|_| (rng.random::<f32>() * 2.0 - 1.0) * limit)
                    .collect()
            }
            Some(Initializer::VarianceScaling) => {
                let std = (1.0 / fan_in.max(1) as f32).sqrt();
                (0..spec.kernel_len())
                    .map(|_| truncated_normal(rng) * std)
                    .collect()
            }
            None => Vec::new(),
        };
        let bias = vec![0.0; spec.bias_len()];
        Self {
            spec,
            kernel,
            bias,
            trainable: true,
        }
    }

    pub fn param_count(&self) -> usize {
        self.kernel.len() + self.bias.len()
    }

    /// Forward pass for one sample.
    pub fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut out = match &self.spec {
            LayerSpec::Dense { inputs, units, .. } => self.dense_forward(input, *inputs, *units),
            LayerSpec::Conv2d {
                input: shape,
                filters,
                kernel,
                stride,
                ..
            } => self.conv_forward(input, *shape, *filters, *kernel, *stride),
            LayerSpec::MaxPool2d {
                input: shape,
                pool,
                stride,
            } => max_pool_forward(input, *shape, *pool, *stride),
            LayerSpec::Flatten { .. } => input.to_vec(),
        };
        self.spec.activation().apply(&mut out);
        out
    }

    /// Backward pass for one sample.
    ///
    /// `grad_out` is the loss gradient w.r.t. this layer's output (for a
    /// softmax layer: w.r.t. its logits). Parameter gradients are accumulated
    /// into `grads` when the layer is trainable. Returns the gradient w.r.t.
    /// the input, or `None` when `need_input_grad` is false.
    pub fn backward(
        &self,
        input: &[f32],
        output: &[f32],
        mut grad_out: Vec<f32>,
        grads: &mut LayerGrads,
        need_input_grad: bool,
    ) -> Option<Vec<f32>> {
        self.spec.activation().backprop(output, &mut grad_out);
        let accumulate = self.trainable;
        match &self.spec {
            LayerSpec::Dense { inputs, units, .. } => {
                let (inputs, units) = (*inputs, *units);
                if accumulate {
                    for i in 0..inputs {
                        let x = input[i];
                        if x == 0.0 {
                            continue;
                        }
                        let base = i * units;
                        for u in 0..units {
                            grads.kernel[base + u] += x * grad_out[u];
                        }
                    }
                    for u in 0..units {
                        grads.bias[u] += grad_out[u];
                    }
                }
                need_input_grad.then(|| {
                    (0..inputs)
                        .map(|i| {
                            let base = i * units;
                            (0..units).map(|u| self.kernel[base + u] * grad_out[u]).sum()
                        })
                        .collect()
                })
            }
            LayerSpec::Conv2d {
                input: shape,
                filters,
                kernel,
                stride,
                ..
            } => self.conv_backward(
                input,
                *shape,
                *filters,
                *kernel,
                *stride,
                &grad_out,
                grads,
                need_input_grad,
            ),
            LayerSpec::MaxPool2d {
                input: shape,
                pool,
                stride,
            } => need_input_grad.then(|| max_pool_backward(input, *shape, *pool, *stride, &grad_out)),
            LayerSpec::Flatten { .. } => need_input_grad.then_some(grad_out),
        }
    }

    fn dense_forward(&self, input: &[f32], inputs: usize, units: usize) -> Vec<f32> {
        let mut out = self.bias.clone();
        for i in 0..inputs {
            let x = input[i];
            if x == 0.0 {
                continue;
            }
            let base = i * units;
            for u in 0..units {
                out[u] += x * self.kernel[base + u];
            }
        }
        out
    }

    fn conv_forward(
        &self,
        input: &[f32],
        [h, w, c]: [usize; 3],
        filters: usize,
        k: usize,
        stride: usize,
    ) -> Vec<f32> {
        let out_h = window_count(h, k, stride);
        let out_w = window_count(w, k, stride);
        let mut out = vec![0.0f32; out_h * out_w * filters];
        for oy in 0..out_h {
            for ox in 0..out_w {
                let out_base = (oy * out_w + ox) * filters;
                out[out_base..out_base + filters].copy_from_slice(&self.bias);
                for ky in 0..k {
                    let iy = oy * stride + ky;
                    for kx in 0..k {
                        let ix = ox * stride + kx;
                        let in_base = (iy * w + ix) * c;
                        for ch in 0..c {
                            let x = input[in_base + ch];
                            if x == 0.0 {
                                continue;
                            }
                            let k_base = ((ky * k + kx) * c + ch) * filters;
                            for f in 0..filters {
                                out[out_base + f] += x * self.kernel[k_base + f];
                            }
                        }
                    }
                }
            }
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn conv_backward(
        &self,
        input: &[f32],
        [h, w, c]: [usize; 3],
        filters: usize,
        k: usize,
        stride: usize,
        grad_out: &[f32],
        grads: &mut LayerGrads,
        need_input_grad: bool,
    ) -> Option<Vec<f32>> {
        let out_h = window_count(h, k, stride);
        let out_w = window_count(w, k, stride);
        let mut grad_in = need_input_grad.then(|| vec![0.0f32; h * w * c]);
        for oy in 0..out_h {
            for ox in 0..out_w {
                let out_base = (oy * out_w + ox) * filters;
                let g = &grad_out[out_base..out_base + filters];
                if g.iter().all(|&v| v == 0.0) {
                    continue;
                }
                if self.trainable {
                    for f in 0..filters {
                        grads.bias[f] += g[f];
                    }
                }
                for ky in 0..k {
                    let iy = oy * stride + ky;
                    for kx in 0..k {
                        let ix = ox * stride + kx;
                        let in_base = (iy * w + ix) * c;
                        for ch in 0..c {
                            let k_base = ((ky * k + kx) * c + ch) * filters;
                            if self.trainable {
                                let x = input[in_base + ch];
                                if x != 0.0 {
                                    for f in 0..filters {
                                        grads.kernel[k_base + f] += x * g[f];
                                    }
                                }
                            }
                            if let Some(grad_in) = grad_in.as_mut() {
                                let mut sum = 0.0;
                                for f in 0..filters {
                                    sum += self.kernel[k_base + f] * g[f];
                                }
                                grad_in[in_base + ch] += sum;
                            }
                        }
                    }
                }
            }
        }
        grad_in
    }
}

fn max_pool_forward(input: &[f32], [h, w, c]: [usize; 3], pool: usize, stride: usize) -> Vec<f32> {
    let out_h = window_count(h, pool, stride);
    let out_w = window_count(w, pool, stride);
    let mut out = vec![f32::NEG_INFINITY; out_h * out_w * c];
    for oy in 0..out_h {
        for ox in 0..out_w {
            for ch in 0..c {
                let mut best = f32::NEG_INFINITY;
                for py in 0..pool {
                    for px in 0..pool {
                        let idx = ((oy * stride + py) * w + ox * stride + px) * c + ch;
                        best = best.max(input[idx]);
                    }
                }
                out[(oy * out_w + ox) * c + ch] = best;
            }
        }
    }
    out
}

/// Route each pooled gradient to the first maximal input of its window.
fn max_pool_backward(
    input: &[f32],
    [h, w, c]: [usize; 3],
    pool: usize,
    stride: usize,
    grad_out: &[f32],
) -> Vec<f32> {
    let out_h = window_count(h, pool, stride);
    let out_w = window_count(w, pool, stride);
    let mut grad_in = vec![0.0f32; h * w * c];
    for oy in 0..out_h {
        for ox in 0..out_w {
            for ch in 0..c {
                let mut best_idx = 0;
                let mut best = f32::NEG_INFINITY;
                for py in 0..pool {
                    for px in 0..pool {
                        let idx = ((oy * stride + py) * w + ox * stride + px) * c + ch;
                        if input[idx] > best {
                            best = input[idx];
                            best_idx = idx;
                        }
                    }
                }
                grad_in[best_idx] += grad_out[(oy * out_w + ox) * c + ch];
            }
        }
    }
    grad_in
}

pub(crate) fn softmax_inplace(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum == 0.0 || !sum.is_finite() {
        let uniform = 1.0 / values.len() as f32;
        values.iter_mut().for_each(|v| *v = uniform);
        return;
    }
    values.iter_mut().for_each(|v| *v /= sum);
}

/// Standard normal sample truncated to two standard deviations.
fn truncated_normal(rng: &mut impl Rng) -> f32 {
    loop {
        let u1 = rng.random::<f32>().max(f32::MIN_POSITIVE);
        let u2 = rng.random::<f32>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos();
        if z.abs() <= 2.0 {
            return z;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn conv_spec() -> LayerSpec {
        LayerSpec::Conv2d {
            input: [4, 4, 1],
            filters: 2,
            kernel: 3,
            stride: 1,
            activation: Activation::Linear,
            initializer: Initializer::VarianceScaling,
        }
    }

    #[test]
    fn shapes_follow_valid_padding() {
        assert_eq!(conv_spec().output_shape(), vec![2, 2, 2]);
        let pool = LayerSpec::MaxPool2d {
            input: [24, 24, 9],
            pool: 2,
            stride: 2,
        };
        assert_eq!(pool.output_shape(), vec![12, 12, 9]);
        assert_eq!(conv_spec().kernel_shape(), Some(vec![3, 3, 1, 2]));
    }

    #[test]
    fn softmax_sums_to_one() {
        let mut values = vec![1.0, 2.0, 3.0, -50.0];
        softmax_inplace(&mut values);
        let sum: f32 = values.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(values[2] > values[1]);
    }

    #[test]
    fn max_pool_routes_gradient_to_maximum() {
        let input = vec![1.0, 5.0, 2.0, 3.0];
        let out = max_pool_forward(&input, [2, 2, 1], 2, 2);
        assert_eq!(out, vec![5.0]);
        let grad = max_pool_backward(&input, [2, 2, 1], 2, 2, &[0.5]);
        assert_eq!(grad, vec![0.0, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn conv_kernel_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(3);
        let layer = Layer::initialized(conv_spec(), &mut rng);
        let input: Vec<f32> = (0..16).map(|i| (i as f32 * 0.37).sin()).collect();
        let output = layer.forward(&input);
        // Loss = sum of outputs, so dL/dout = 1.
        let mut grads = LayerGrads::zeros_like(&layer);
        let grad_in = layer
            .backward(&input, &output, vec![1.0; output.len()], &mut grads, true)
            .unwrap();

        let eps = 1e-3;
        for idx in [0usize, 5, 17] {
            let mut bumped = layer.clone();
            bumped.kernel[idx] += eps;
            let plus: f32 = bumped.forward(&input).iter().sum();
            bumped.kernel[idx] -= 2.0 * eps;
            let minus: f32 = bumped.forward(&input).iter().sum();
            let numeric = (plus - minus) / (2.0 * eps);
            assert!((numeric - grads.kernel[idx]).abs() < 1e-2, "kernel {idx}");
        }
        let mut shifted = input.clone();
        shifted[5] += eps;
        let plus: f32 = layer.forward(&shifted).iter().sum();
        shifted[5] -= 2.0 * eps;
        let minus: f32 = layer.forward(&shifted).iter().sum();
        assert!(((plus - minus) / (2.0 * eps) - grad_in[5]).abs() < 1e-2);
    }

    #[test]
    fn frozen_layer_leaves_gradients_untouched() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut layer = Layer::initialized(
            LayerSpec::Dense {
                inputs: 3,
                units: 2,
                activation: Activation::Sigmoid,
                initializer: Initializer::GlorotUniform,
            },
            &mut rng,
        );
        layer.trainable = false;
        let input = [1.0, 2.0, 3.0];
        let output = layer.forward(&input);
        let mut grads = LayerGrads::zeros_like(&layer);
        let grad_in = layer.backward(&input, &output, vec![1.0, -1.0], &mut grads, true);
        assert!(grads.kernel.iter().all(|&g| g == 0.0));
        assert_eq!(grad_in.map(|g| g.len()), Some(3));
    }

    #[test]
    fn glorot_weights_stay_within_limit() {
        let mut rng = StdRng::seed_from_u64(5);
        let layer = Layer::initialized(
            LayerSpec::Dense {
                inputs: 3,
                units: 16,
                activation: Activation::Sigmoid,
                initializer: Initializer::GlorotUniform,
            },
            &mut rng,
        );
        let limit = (6.0f32 / 19.0).sqrt();
        assert_eq!(layer.kernel.len(), 48);
        assert!(layer.kernel.iter().all(|w| w.abs() <= limit));
        assert!(layer.bias.iter().all(|&b| b == 0.0));
    }
}
