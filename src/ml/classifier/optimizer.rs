use crate::variant::OptimizerKind;

use super::layers::{Layer, LayerGrads};

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-7;

/// Optimizer state for one training run.
#[derive(Debug, Clone)]
pub enum Optimizer {
    Sgd {
        learning_rate: f32,
    },
    Adam {
        learning_rate: f32,
        step: i32,
        first: Vec<LayerGrads>,
        second: Vec<LayerGrads>,
    },
}

impl Optimizer {
    /// Fresh state sized for `layers`.
    pub fn new(kind: OptimizerKind, layers: &[Layer]) -> Self {
        match kind {
            OptimizerKind::Sgd { learning_rate } => Self::Sgd { learning_rate },
            OptimizerKind::Adam { learning_rate } => Self::Adam {
                learning_rate,
                step: 0,
                first: layers.iter().map(LayerGrads::zeros_like).collect(),
                second: layers.iter().map(LayerGrads::zeros_like).collect(),
            },
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        match self {
            Self::Sgd { learning_rate } => OptimizerKind::Sgd {
                learning_rate: *learning_rate,
            },
            Self::Adam { learning_rate, .. } => OptimizerKind::Adam {
                learning_rate: *learning_rate,
            },
        }
    }

    /// Apply mean gradients (already divided by the batch size) to trainable layers.
    pub fn apply(&mut self, layers: &mut [Layer], grads: &[LayerGrads]) {
        match self {
            Self::Sgd { learning_rate } => {
                let lr = *learning_rate;
                for (layer, grad) in layers.iter_mut().zip(grads) {
                    if !layer.trainable {
                        continue;
                    }
                    for (w, g) in layer.kernel.iter_mut().zip(&grad.kernel) {
                        *w -= lr * g;
                    }
                    for (b, g) in layer.bias.iter_mut().zip(&grad.bias) {
                        *b -= lr * g;
                    }
                }
            }
            Self::Adam {
                learning_rate,
                step,
                first,
                second,
            } => {
                *step += 1;
                let t = *step;
                let lr = *learning_rate * (1.0 - ADAM_BETA2.powi(t)).sqrt()
                    / (1.0 - ADAM_BETA1.powi(t));
                for (index, (layer, grad)) in layers.iter_mut().zip(grads).enumerate() {
                    if !layer.trainable {
                        continue;
                    }
                    adam_update(
                        &mut layer.kernel,
                        &grad.kernel,
                        &mut first[index].kernel,
                        &mut second[index].kernel,
                        lr,
                    );
                    adam_update(
                        &mut layer.bias,
                        &grad.bias,
                        &mut first[index].bias,
                        &mut second[index].bias,
                        lr,
                    );
                }
            }
        }
    }
}

fn adam_update(params: &mut [f32], grads: &[f32], m: &mut [f32], v: &mut [f32], lr: f32) {
    for i in 0..params.len() {
        let g = grads[i];
        m[i] = ADAM_BETA1 * m[i] + (1.0 - ADAM_BETA1) * g;
        v[i] = ADAM_BETA2 * v[i] + (1.0 - ADAM_BETA2) * g * g;
        params[i] -= lr * m[i] / (v[i].sqrt() + ADAM_EPSILON);
    }
}
