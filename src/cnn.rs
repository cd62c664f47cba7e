//! Convolutional variant of the shared-backbone ensemble for the grid
//! localization toy task.
//!
//! Input is a one-hot `[B, 1, grid, grid]` plane; each head emits `[B, 2]`
//! (mean, raw sigma) for the scalar target at the marked location.

use burn::module::{Ignored, Module};
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::model::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CnnBackboneConfig {
    /// Channel widths per conv stage, input channel first (e.g. `[1, 8, 16]`).
    pub channels: Vec<usize>,
    /// How many conv stages belong to the shared trunk. The flatten + linear
    /// projection always belongs to each head.
    pub split_idx: usize,
    pub num_heads: usize,
    /// Spatial side length of the input plane.
    pub grid: usize,
}

impl Default for CnnBackboneConfig {
    fn default() -> Self {
        Self {
            channels: vec![1, 8, 16],
            split_idx: 1,
            num_heads: 5,
            grid: 15,
        }
    }
}

impl CnnBackboneConfig {
    pub fn num_conv_stages(&self) -> usize {
        self.channels.len().saturating_sub(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.len() < 2 {
            return Err(ConfigError::InvalidConfiguration(format!(
                "need at least one conv stage, got channels {:?}",
                self.channels
            )));
        }
        if self.channels.iter().any(|c| *c == 0) {
            return Err(ConfigError::InvalidConfiguration(
                "channel widths must be positive".to_string(),
            ));
        }
        if self.split_idx > self.num_conv_stages() {
            return Err(ConfigError::InvalidConfiguration(format!(
                "split index {} exceeds the number of conv stages {}",
                self.split_idx,
                self.num_conv_stages()
            )));
        }
        if self.num_heads == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "need at least one head".to_string(),
            ));
        }
        if self.grid == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "grid side must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Module, Debug)]
pub struct CnnHead<B: Backend> {
    convs: Vec<Conv2d<B>>,
    project: nn::Linear<B>,
}

impl<B: Backend> CnnHead<B> {
    fn new(channels: &[usize], grid: usize, device: &B::Device) -> Self {
        let convs = conv_stack(channels, device);
        let flat = channels.last().copied().unwrap_or(1) * grid * grid;
        let project = nn::LinearConfig::new(flat, 2).init(device);
        Self { convs, project }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = input;
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        let [b, c, h, w] = x.dims();
        // Final projection carries no activation; it emits (mean, raw sigma).
        self.project.forward(x.reshape([b, c * h * w]))
    }
}

fn conv_stack<B: Backend>(channels: &[usize], device: &B::Device) -> Vec<Conv2d<B>> {
    channels
        .windows(2)
        .map(|pair| {
            Conv2dConfig::new([pair[0], pair[1]], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        })
        .collect()
}

#[derive(Module, Debug)]
pub struct VariableCnnBackbone<B: Backend> {
    trunk: Vec<Conv2d<B>>,
    heads: Vec<CnnHead<B>>,
    pub config: Ignored<CnnBackboneConfig>,
}

impl<B: Backend> VariableCnnBackbone<B> {
    pub fn new(config: CnnBackboneConfig, device: &B::Device) -> Result<Self, ConfigError> {
        config.validate()?;
        let trunk = conv_stack(&config.channels[..=config.split_idx], device);
        let heads = (0..config.num_heads)
            .map(|_| CnnHead::new(&config.channels[config.split_idx..], config.grid, device))
            .collect();
        Ok(Self {
            trunk,
            heads,
            config: Ignored(config),
        })
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    pub fn shared_params(&self) -> usize {
        self.trunk.num_params()
    }

    pub fn total_params(&self) -> usize {
        self.num_params()
    }

    /// Shared conv trunk once, then each head; outputs in head order.
    pub fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 2>> {
        let mut shared = input;
        for conv in &self.trunk {
            shared = relu(conv.forward(shared));
        }
        self.heads
            .iter()
            .map(|head| head.forward(shared.clone()))
            .collect()
    }

    /// Run a single head end to end on fresh input.
    pub fn forward_head(&self, head_idx: usize, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut shared = input;
        for conv in &self.trunk {
            shared = relu(conv.forward(shared));
        }
        self.heads[head_idx].forward(shared)
    }
}
