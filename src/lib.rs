pub mod checkpoint;
pub mod cnn;
pub mod dataset;
pub mod model;
pub mod plot;
pub mod score;
pub mod sweep;
pub mod train;

pub use cnn::{CnnBackboneConfig, VariableCnnBackbone};
pub use dataset::{MapLoc, PolyData, PolyKind};
pub use model::{BackboneConfig, ConfigError, MlpStack, VariableBackbone};
pub use score::{score_ensemble, ScoreReport};
pub use sweep::{run_sweep, SweepArgs};
pub use train::{run_train, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn::backend::ndarray::NdArray<f32>;
