use burn::backend::ndarray::NdArray;
use split_ensemble::{BackboneConfig, ConfigError, VariableBackbone};

type Backend = NdArray<f32>;

fn device() -> <Backend as burn::tensor::backend::Backend>::Device {
    Default::default()
}

#[test]
fn split_at_stage_count_is_rejected() {
    // [10,20,30,40] has 3 stages; split 3 would leave heads with nothing.
    let result =
        VariableBackbone::<Backend>::new(BackboneConfig::new(vec![10, 20, 30, 40], 3, 2), &device());
    assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
}

#[test]
fn split_beyond_stage_count_is_rejected() {
    let result =
        VariableBackbone::<Backend>::new(BackboneConfig::new(vec![10, 20, 30, 40], 7, 2), &device());
    assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
}

#[test]
fn zero_heads_is_rejected() {
    let result =
        VariableBackbone::<Backend>::new(BackboneConfig::new(vec![10, 20], 0, 0), &device());
    assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
}

#[test]
fn degenerate_shape_list_is_rejected() {
    let result = VariableBackbone::<Backend>::new(BackboneConfig::new(vec![10], 0, 2), &device());
    assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
}

#[test]
fn zero_width_is_rejected() {
    let result =
        VariableBackbone::<Backend>::new(BackboneConfig::new(vec![10, 0, 4], 1, 2), &device());
    assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
}
