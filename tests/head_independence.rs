use burn::backend::ndarray::NdArray;
use burn::tensor::Tensor;
use split_ensemble::{BackboneConfig, VariableBackbone};

type Backend = NdArray<f32>;

fn output_vecs(model: &VariableBackbone<Backend>, input: Tensor<Backend, 2>) -> Vec<Vec<f32>> {
    model
        .forward(input)
        .into_iter()
        .map(|t| t.into_data().to_vec::<f32>().unwrap())
        .collect()
}

#[test]
fn heads_are_independently_initialized() {
    let device = Default::default();
    let model = VariableBackbone::<Backend>::new(
        BackboneConfig::new(vec![1, 16, 16, 2], 1, 4),
        &device,
    )
    .unwrap();

    // Nonzero input so differing weights show up in the outputs.
    let input = Tensor::<Backend, 2>::ones([3, 1], &device);
    let outputs = output_vecs(&model, input);
    for a in 0..outputs.len() {
        for b in (a + 1)..outputs.len() {
            assert_ne!(
                outputs[a], outputs[b],
                "heads {a} and {b} produced identical outputs at init"
            );
        }
    }
}

#[test]
fn output_order_is_deterministic() {
    let device = Default::default();
    let model = VariableBackbone::<Backend>::new(
        BackboneConfig::new(vec![2, 8, 2], 1, 3),
        &device,
    )
    .unwrap();

    let input = Tensor::<Backend, 2>::ones([4, 2], &device);
    let first = output_vecs(&model, input.clone());
    let second = output_vecs(&model, input.clone());
    assert_eq!(first, second);

    // forward_head agrees with the corresponding slot of forward.
    for (idx, expected) in first.iter().enumerate() {
        let single = model
            .forward_head(idx, input.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(&single, expected);
    }
}
