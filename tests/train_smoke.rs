use burn::backend::ndarray::NdArray;
use split_ensemble::checkpoint;
use split_ensemble::score::{run_eval, score_ensemble, EvalArgs};
use split_ensemble::train::ModelKind;
use split_ensemble::{run_train, PolyData, PolyKind, TrainArgs};

type Backend = NdArray<f32>;

fn smoke_args(ckpt_dir: String) -> TrainArgs {
    TrainArgs {
        model: ModelKind::Mlp,
        poly: PolyKind::Cubic,
        train_size: 64,
        batch_size: 32,
        epochs: 1,
        lr: 1e-3,
        seed: Some(7),
        layer_shapes: vec![1, 8, 8, 2],
        split_idx: 1,
        num_heads: 2,
        scramble_batches: false,
        ckpt_dir,
        metrics_out: None,
        channels: vec![1, 2, 2],
        grid: 15,
        map_rounds: 1,
    }
}

#[test]
fn train_mlp_writes_a_loadable_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let report = run_train(smoke_args(dir.path().display().to_string())).unwrap();
    assert!(report.final_avg_loss.is_finite());
    assert!(report.checkpoint.with_extension("bin").exists());

    let device = Default::default();
    let (model, meta) = checkpoint::load_backbone::<Backend>(&report.checkpoint, &device).unwrap();
    assert_eq!(meta.train.seed, 7);

    let data = PolyData::generate(PolyKind::Cubic, 64, 7);
    let score = score_ensemble(&model, &data, &device);
    assert!(score.mean_mse.is_finite());
    assert!(score.epi_score >= 0.0);
    assert!((0.0..=1.0).contains(&score.per_correct));
}

#[test]
fn scrambled_batches_also_train() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = smoke_args(dir.path().display().to_string());
    args.scramble_batches = true;
    let report = run_train(args).unwrap();
    assert!(report.final_avg_loss.is_finite());
}

#[test]
fn train_cnn_writes_a_loadable_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut args = smoke_args(dir.path().display().to_string());
    args.model = ModelKind::Cnn;
    args.epochs = 1;
    let report = run_train(args).unwrap();
    assert!(report.checkpoint.with_extension("bin").exists());

    let device = Default::default();
    let (_model, meta) = checkpoint::load_cnn::<Backend>(&report.checkpoint, &device).unwrap();
    assert!(meta.train.poly.is_none());
}

#[test]
fn eval_renders_plots_for_latest_checkpoint() {
    let ckpt_dir = tempfile::tempdir().unwrap();
    let plot_dir = tempfile::tempdir().unwrap();
    run_train(smoke_args(ckpt_dir.path().display().to_string())).unwrap();

    run_eval(EvalArgs {
        ckpt_dir: ckpt_dir.path().display().to_string(),
        checkpoint: None,
        out_dir: plot_dir.path().display().to_string(),
    })
    .unwrap();
    assert!(plot_dir.path().join("performance.png").exists());
}
