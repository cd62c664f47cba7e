//! Variable-split shared-backbone ensemble.
//!
//! One feed-forward trunk shared by every head, plus `num_heads` independently
//! initialized head stacks consuming the trunk output. The split index decides
//! how many of the linear transitions live in the trunk versus in each head.

use burn::module::{Ignored, Module};
use burn::nn;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Layer widths plus the trunk/head split for a [`VariableBackbone`].
///
/// `layer_shapes` lists every width from input to output; with `n` transitions
/// total, the trunk owns the first `split_idx` and each head owns the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackboneConfig {
    pub layer_shapes: Vec<usize>,
    pub split_idx: usize,
    pub num_heads: usize,
}

impl BackboneConfig {
    pub fn new(layer_shapes: Vec<usize>, split_idx: usize, num_heads: usize) -> Self {
        Self {
            layer_shapes,
            split_idx,
            num_heads,
        }
    }

    /// Number of linear transitions in the full network.
    pub fn num_stages(&self) -> usize {
        self.layer_shapes.len().saturating_sub(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layer_shapes.len() < 2 {
            return Err(ConfigError::InvalidConfiguration(format!(
                "need at least an input and an output width, got {:?}",
                self.layer_shapes
            )));
        }
        if let Some(zero) = self.layer_shapes.iter().position(|w| *w == 0) {
            return Err(ConfigError::InvalidConfiguration(format!(
                "layer width at position {zero} is zero"
            )));
        }
        if self.split_idx >= self.num_stages() {
            return Err(ConfigError::InvalidConfiguration(format!(
                "split index {} must be less than the number of stages {}",
                self.split_idx,
                self.num_stages()
            )));
        }
        if self.num_heads == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "need at least one head".to_string(),
            ));
        }
        Ok(())
    }
}

/// An ordered stack of linear stages with a fixed ReLU placement rule.
///
/// `relu_last` controls whether the final stage gets a trailing ReLU: true for
/// the trunk (its output always feeds further linears), false for heads (their
/// last stage is the network output).
#[derive(Module, Debug)]
pub struct MlpStack<B: Backend> {
    layers: Vec<nn::Linear<B>>,
    relu_last: Ignored<bool>,
}

impl<B: Backend> MlpStack<B> {
    pub fn new(widths: &[usize], relu_last: bool, device: &B::Device) -> Self {
        let mut layers = Vec::new();
        for pair in widths.windows(2) {
            layers.push(nn::LinearConfig::new(pair[0], pair[1]).init(device));
        }
        Self {
            layers,
            relu_last: Ignored(relu_last),
        }
    }

    pub fn num_stages(&self) -> usize {
        self.layers.len()
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if *self.relu_last || i != last {
                x = relu(x);
            }
        }
        x
    }
}

#[derive(Module, Debug)]
pub struct VariableBackbone<B: Backend> {
    trunk: MlpStack<B>,
    heads: Vec<MlpStack<B>>,
    pub config: Ignored<BackboneConfig>,
}

impl<B: Backend> VariableBackbone<B> {
    pub fn new(config: BackboneConfig, device: &B::Device) -> Result<Self, ConfigError> {
        config.validate()?;
        let trunk_widths = &config.layer_shapes[..=config.split_idx];
        let head_widths = &config.layer_shapes[config.split_idx..];

        let trunk = MlpStack::new(trunk_widths, true, device);
        let heads = (0..config.num_heads)
            .map(|_| MlpStack::new(head_widths, false, device))
            .collect();

        Ok(Self {
            trunk,
            heads,
            config: Ignored(config),
        })
    }

    /// Fully separated baseline: no shared trunk, every head owns the whole stack.
    pub fn separated(
        layer_shapes: Vec<usize>,
        num_heads: usize,
        device: &B::Device,
    ) -> Result<Self, ConfigError> {
        Self::new(BackboneConfig::new(layer_shapes, 0, num_heads), device)
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    pub fn trunk_stages(&self) -> usize {
        self.trunk.num_stages()
    }

    pub fn head_stages(&self) -> usize {
        self.heads.first().map(MlpStack::num_stages).unwrap_or(0)
    }

    /// Parameter count of the shared trunk only.
    pub fn shared_params(&self) -> usize {
        self.trunk.num_params()
    }

    pub fn total_params(&self) -> usize {
        self.num_params()
    }

    /// Apply the trunk once, then every head to the trunk output.
    ///
    /// Output order is head construction order, stable across calls.
    pub fn forward(&self, input: Tensor<B, 2>) -> Vec<Tensor<B, 2>> {
        let shared = self.trunk.forward(input);
        self.heads
            .iter()
            .map(|head| head.forward(shared.clone()))
            .collect()
    }

    /// Run a single head end to end (used by scrambled-batch training, where
    /// each head sees its own minibatch stream).
    pub fn forward_head(&self, head_idx: usize, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.heads[head_idx].forward(self.trunk.forward(input))
    }
}
