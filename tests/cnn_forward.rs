use burn::backend::ndarray::NdArray;
use burn::tensor::Tensor;
use split_ensemble::model::ConfigError;
use split_ensemble::{CnnBackboneConfig, VariableCnnBackbone};

type Backend = NdArray<f32>;

#[test]
fn cnn_forward_shapes() {
    let device = Default::default();
    let config = CnnBackboneConfig {
        channels: vec![1, 4, 8],
        split_idx: 1,
        num_heads: 3,
        grid: 9,
    };
    let model = VariableCnnBackbone::<Backend>::new(config, &device).unwrap();
    assert_eq!(model.num_heads(), 3);

    let input = Tensor::<Backend, 4>::zeros([2, 1, 9, 9], &device);
    let outputs = model.forward(input);
    assert_eq!(outputs.len(), 3);
    for out in outputs {
        assert_eq!(out.dims(), [2, 2]);
    }
}

#[test]
fn cnn_split_may_cover_all_conv_stages() {
    // Heads still own the flatten + projection even when the trunk takes
    // every conv stage.
    let device = Default::default();
    let config = CnnBackboneConfig {
        channels: vec![1, 4],
        split_idx: 1,
        num_heads: 2,
        grid: 6,
    };
    let model = VariableCnnBackbone::<Backend>::new(config, &device).unwrap();
    let outputs = model.forward(Tensor::<Backend, 4>::zeros([1, 1, 6, 6], &device));
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].dims(), [1, 2]);
}

#[test]
fn cnn_invalid_split_is_rejected() {
    let device = Default::default();
    let config = CnnBackboneConfig {
        channels: vec![1, 4, 8],
        split_idx: 3,
        num_heads: 2,
        grid: 9,
    };
    let result = VariableCnnBackbone::<Backend>::new(config, &device);
    assert!(matches!(result, Err(ConfigError::InvalidConfiguration(_))));
}
