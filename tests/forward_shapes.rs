use burn::backend::ndarray::NdArray;
use burn::tensor::{Tensor, TensorData};
use split_ensemble::{BackboneConfig, MlpStack, VariableBackbone};

type Backend = NdArray<f32>;

fn linspace_input(n: usize, lo: f32, hi: f32) -> Tensor<Backend, 2> {
    let step = (hi - lo) / (n - 1) as f32;
    let xs: Vec<f32> = (0..n).map(|i| lo + step * i as f32).collect();
    Tensor::from_data(TensorData::new(xs, [n, 1]), &Default::default())
}

#[test]
fn worked_example_shapes() {
    // layer_shapes=[10,20,30,40], split 2, 3 heads: trunk owns 10->20->30,
    // each head owns 30->40.
    let device = <Backend as burn::tensor::backend::Backend>::Device::default();
    let model = VariableBackbone::<Backend>::new(
        BackboneConfig::new(vec![10, 20, 30, 40], 2, 3),
        &device,
    )
    .unwrap();

    assert_eq!(model.trunk_stages(), 2);
    assert_eq!(model.head_stages(), 1);
    assert_eq!(model.num_heads(), 3);

    let input = Tensor::<Backend, 2>::zeros([5, 10], &device);
    let outputs = model.forward(input);
    assert_eq!(outputs.len(), 3);
    for out in outputs {
        assert_eq!(out.dims(), [5, 40]);
    }
}

#[test]
fn relu_placement_follows_the_relu_last_flag() {
    let device = <Backend as burn::tensor::backend::Backend>::Device::default();

    // Trunk stacks clamp their final stage.
    let clamped = MlpStack::<Backend>::new(&[1, 8], true, &device);
    let out = clamped
        .forward(linspace_input(64, -8.0, 8.0))
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert!(out.iter().all(|v| *v >= 0.0));

    // Head stacks leave their final stage open: an affine map over a wide
    // input range goes negative somewhere.
    let open = MlpStack::<Backend>::new(&[1, 8], false, &device);
    let out = open
        .forward(linspace_input(64, -8.0, 8.0))
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert!(out.iter().any(|v| *v < 0.0));
}

#[test]
fn head_outputs_are_not_clamped() {
    let device = <Backend as burn::tensor::backend::Backend>::Device::default();
    let model = VariableBackbone::<Backend>::new(
        BackboneConfig::new(vec![1, 8, 8], 1, 4),
        &device,
    )
    .unwrap();

    // A trailing ReLU on any head's last stage would force every output
    // non-negative; over 4 heads x 8 channels x a wide input sweep that is
    // not a thing a freshly initialized ensemble produces.
    let any_negative = model
        .forward(linspace_input(32, -4.0, 4.0))
        .into_iter()
        .any(|out| {
            out.into_data()
                .to_vec::<f32>()
                .unwrap()
                .iter()
                .any(|v| *v < 0.0)
        });
    assert!(any_negative, "head outputs were clamped non-negative");
}

#[test]
fn stage_allocation_tracks_split() {
    let device = <Backend as burn::tensor::backend::Backend>::Device::default();
    let shapes = vec![4, 8, 8, 8, 2];
    for split_idx in 0..shapes.len() - 1 {
        let model = VariableBackbone::<Backend>::new(
            BackboneConfig::new(shapes.clone(), split_idx, 2),
            &device,
        )
        .unwrap();
        assert_eq!(model.trunk_stages(), split_idx);
        assert_eq!(model.head_stages(), shapes.len() - 1 - split_idx);
    }
}

#[test]
fn separated_baseline_has_empty_trunk() {
    let device = <Backend as burn::tensor::backend::Backend>::Device::default();
    let model = VariableBackbone::<Backend>::separated(vec![3, 16, 1], 4, &device).unwrap();
    assert_eq!(model.trunk_stages(), 0);
    assert_eq!(model.head_stages(), 2);
    assert_eq!(model.shared_params(), 0);

    let outputs = model.forward(Tensor::<Backend, 2>::zeros([2, 3], &device));
    assert_eq!(outputs.len(), 4);
    for out in outputs {
        assert_eq!(out.dims(), [2, 1]);
    }
}

#[test]
fn shared_params_grow_with_split() {
    let device = <Backend as burn::tensor::backend::Backend>::Device::default();
    let shapes = vec![1, 32, 32, 2];
    let mut previous = 0usize;
    for split_idx in 0..shapes.len() - 1 {
        let model = VariableBackbone::<Backend>::new(
            BackboneConfig::new(shapes.clone(), split_idx, 3),
            &device,
        )
        .unwrap();
        assert!(model.shared_params() >= previous);
        assert!(model.total_params() > model.shared_params());
        previous = model.shared_params();
    }
}
