use std::collections::BTreeMap;

use burn::backend::ndarray::NdArray;
use burn::tensor::Tensor;
use split_ensemble::checkpoint::{self, TrainEcho};
use split_ensemble::{BackboneConfig, PolyKind, VariableBackbone};

type Backend = NdArray<f32>;

fn echo() -> TrainEcho {
    TrainEcho {
        poly: Some(PolyKind::Cubic),
        train_size: 128,
        epochs: 1,
        batch_size: 32,
        lr: 1e-3,
        seed: 42,
        scramble_batches: false,
    }
}

#[test]
fn save_load_roundtrip_preserves_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let model = VariableBackbone::<Backend>::new(
        BackboneConfig::new(vec![1, 8, 8, 2], 1, 3),
        &device,
    )
    .unwrap();

    let mut metrics = BTreeMap::new();
    metrics.insert("mean_mse".to_string(), 0.25);
    let base = checkpoint::save_backbone(dir.path(), &model, echo(), metrics).unwrap();
    assert!(base.with_extension("json").exists());
    assert!(base.with_extension("bin").exists());

    let (loaded, meta) = checkpoint::load_backbone::<Backend>(&base, &device).unwrap();
    assert_eq!(meta.train.seed, 42);
    assert_eq!(meta.metrics.get("mean_mse"), Some(&0.25));

    let input = Tensor::<Backend, 2>::ones([4, 1], &device);
    let before: Vec<Vec<f32>> = model
        .forward(input.clone())
        .into_iter()
        .map(|t| t.into_data().to_vec::<f32>().unwrap())
        .collect();
    let after: Vec<Vec<f32>> = loaded
        .forward(input)
        .into_iter()
        .map(|t| t.into_data().to_vec::<f32>().unwrap())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn most_recent_picks_the_latest_base() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let model = VariableBackbone::<Backend>::new(
        BackboneConfig::new(vec![1, 4, 2], 1, 2),
        &device,
    )
    .unwrap();

    let first = checkpoint::save_backbone(dir.path(), &model, echo(), BTreeMap::new()).unwrap();
    // Same second: the stamp gets a numeric suffix and still sorts after.
    let second = checkpoint::save_backbone(dir.path(), &model, echo(), BTreeMap::new()).unwrap();
    assert_ne!(first, second);

    let latest = checkpoint::most_recent(dir.path()).unwrap();
    assert_eq!(latest, second);
}

#[test]
fn most_recent_survives_many_same_second_saves() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let model = VariableBackbone::<Backend>::new(
        BackboneConfig::new(vec![1, 4, 2], 1, 1),
        &device,
    )
    .unwrap();

    // Enough saves to push the collision suffix into double digits.
    let mut last = None;
    for _ in 0..12 {
        last = Some(checkpoint::save_backbone(dir.path(), &model, echo(), BTreeMap::new()).unwrap());
    }

    let latest = checkpoint::most_recent(dir.path()).unwrap();
    assert_eq!(Some(latest), last);
}

#[test]
fn most_recent_on_empty_dir_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(checkpoint::most_recent(dir.path()).is_err());
}
