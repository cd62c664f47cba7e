//! Training driver for the ensemble models.
//!
//! Each head emits `(mean, raw sigma)` and is trained with a Gaussian
//! negative-log-likelihood; the raw sigma channel goes through softplus to
//! stay positive. With `--scramble-batches` every head consumes its own
//! shuffled minibatch stream, which decorrelates the heads beyond their
//! independent initialization.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use burn::backend::Autodiff;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::tensor::activation::softplus;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::checkpoint::{self, TrainEcho};
use crate::cnn::{CnnBackboneConfig, VariableCnnBackbone};
use crate::dataset::{MapLoc, PolyData, PolyKind};
use crate::model::{BackboneConfig, VariableBackbone};
use crate::score;
use crate::TrainBackend;

type ADBackend = Autodiff<TrainBackend>;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ModelKind {
    Mlp,
    Cnn,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "train", about = "Train a shared-backbone ensemble on toy data")]
pub struct TrainArgs {
    /// Architecture to train.
    #[arg(long, value_enum, default_value_t = ModelKind::Mlp)]
    pub model: ModelKind,
    /// Target-function preset for the 1-D regression task.
    #[arg(long, value_enum, default_value_t = PolyKind::Cubic)]
    pub poly: PolyKind,
    /// Number of training samples to draw.
    #[arg(long, default_value_t = 1024)]
    pub train_size: usize,
    /// Minibatch size.
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,
    /// Number of epochs.
    #[arg(long, default_value_t = 40)]
    pub epochs: usize,
    /// Learning rate.
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
    /// Optional seed for data generation, init and shuffling.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Layer widths from input to output, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "1,64,64,2")]
    pub layer_shapes: Vec<usize>,
    /// Number of transitions owned by the shared trunk.
    #[arg(long, default_value_t = 2)]
    pub split_idx: usize,
    /// Number of ensemble heads.
    #[arg(long, default_value_t = 5)]
    pub num_heads: usize,
    /// Give each head its own shuffled minibatch stream.
    #[arg(long, default_value_t = false)]
    pub scramble_batches: bool,
    /// Checkpoint directory.
    #[arg(long, default_value = "weights")]
    pub ckpt_dir: String,
    /// Optional metrics output path (JSONL); appends one record per epoch.
    #[arg(long)]
    pub metrics_out: Option<String>,
    /// Conv channel widths for the CNN variant, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "1,8,16")]
    pub channels: Vec<usize>,
    /// Grid side length for the CNN variant.
    #[arg(long, default_value_t = 15)]
    pub grid: usize,
    /// Sampling rounds over the grid for the CNN variant.
    #[arg(long, default_value_t = 4)]
    pub map_rounds: usize,
}

pub struct TrainReport {
    /// Extension-free base path of the saved checkpoint.
    pub checkpoint: PathBuf,
    pub final_avg_loss: f32,
}

/// Softplus with a small floor, so the variance channel stays positive.
pub fn make_sigma_positive<B: Backend>(raw: Tensor<B, 2>) -> Tensor<B, 2> {
    softplus(raw, 1.0).add_scalar(1e-6)
}

/// Per-batch Gaussian NLL over `(mean, raw sigma)` head output.
pub fn gaussian_nll<B: Backend>(output: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    let b = output.dims()[0];
    let mu = output.clone().slice([0..b, 0..1]);
    let raw = output.slice([0..b, 1..2]);
    let var = make_sigma_positive(raw);
    let diff = mu - target;
    let sq = diff.clone() * diff;
    (sq.div(var.clone().mul_scalar(2.0)) + var.log().mul_scalar(0.5)).mean()
}

pub fn run_train(args: TrainArgs) -> Result<TrainReport> {
    match args.model {
        ModelKind::Mlp => train_mlp(&args),
        ModelKind::Cnn => train_cnn(&args),
    }
}

fn train_mlp(args: &TrainArgs) -> Result<TrainReport> {
    let seed = args.seed.unwrap_or(42);
    println!("Using seed {seed}");
    <ADBackend as Backend>::seed(seed);
    let device = <ADBackend as Backend>::Device::default();

    if args.layer_shapes.first() != Some(&1) || args.layer_shapes.last() != Some(&2) {
        anyhow::bail!(
            "layer shapes must map a scalar input to (mean, raw sigma), got {:?}",
            args.layer_shapes
        );
    }

    let data = PolyData::generate(args.poly, args.train_size, seed);
    let config = BackboneConfig::new(args.layer_shapes.clone(), args.split_idx, args.num_heads);
    let mut model = VariableBackbone::<ADBackend>::new(config, &device)?;
    let mut optim = AdamWConfig::new().with_weight_decay(1e-4).init();
    let mut rng = StdRng::seed_from_u64(seed);

    let batch_size = args.batch_size.max(1);
    let mut final_avg = 0.0f32;
    for epoch in 0..args.epochs {
        // One index order per head; identical unless scrambling is on.
        let orders: Vec<Vec<usize>> = if args.scramble_batches {
            (0..args.num_heads)
                .map(|_| data.epoch_order(&mut rng))
                .collect()
        } else {
            let shared = data.epoch_order(&mut rng);
            vec![shared; args.num_heads]
        };

        let mut losses = Vec::new();
        let steps = data.len().div_ceil(batch_size);
        for step in 0..steps {
            let lo = step * batch_size;
            let hi = (lo + batch_size).min(data.len());

            let mut total: Option<Tensor<ADBackend, 1>> = None;
            for (head, order) in orders.iter().enumerate() {
                let (xs, ys) = data.batch::<ADBackend>(&order[lo..hi], &device);
                let nll = gaussian_nll(model.forward_head(head, xs), ys);
                total = Some(match total {
                    Some(acc) => acc + nll,
                    None => nll,
                });
            }
            let loss = match total {
                Some(loss) => loss,
                None => continue,
            };

            let loss_detached = loss.clone().detach();
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(args.lr, model, grads);
            losses.push(first_scalar(loss_detached));
        }

        let avg_loss = average(&losses);
        println!("epoch {epoch}: avg nll {avg_loss:.4}");
        if let Some(path) = &args.metrics_out {
            append_metrics(
                path,
                serde_json::json!({
                    "ts": chrono::Utc::now().to_rfc3339(),
                    "epoch": epoch,
                    "avg_nll": avg_loss,
                    "seed": seed,
                }),
            );
        }
        final_avg = avg_loss;
    }

    let report = score::score_ensemble(&model, &data, &device);
    println!(
        "score: mean_mse={:.5} sigma_mse={:.5} per_correct={:.3} epi_score={:.3}",
        report.mean_mse, report.sigma_mse, report.per_correct, report.epi_score
    );

    let mut metrics = report.to_metrics();
    metrics.insert("final_avg_nll".to_string(), final_avg as f64);
    let base = checkpoint::save_backbone(
        Path::new(&args.ckpt_dir),
        &model,
        echo_of(args, seed),
        metrics,
    )?;
    println!("Saved checkpoint to {}", base.display());

    Ok(TrainReport {
        checkpoint: base,
        final_avg_loss: final_avg,
    })
}

fn train_cnn(args: &TrainArgs) -> Result<TrainReport> {
    let seed = args.seed.unwrap_or(42);
    println!("Using seed {seed}");
    <ADBackend as Backend>::seed(seed);
    let device = <ADBackend as Backend>::Device::default();

    let data = MapLoc::generate(args.grid, args.map_rounds, seed);
    let config = CnnBackboneConfig {
        channels: args.channels.clone(),
        split_idx: args.split_idx.min(args.channels.len().saturating_sub(1)),
        num_heads: args.num_heads,
        grid: args.grid,
    };
    let mut model = VariableCnnBackbone::<ADBackend>::new(config, &device)?;
    let mut optim = AdamWConfig::new().with_weight_decay(1e-4).init();
    let mut rng = StdRng::seed_from_u64(seed);

    let batch_size = args.batch_size.max(1);
    let mut final_avg = 0.0f32;
    for epoch in 0..args.epochs {
        let orders: Vec<Vec<usize>> = if args.scramble_batches {
            (0..args.num_heads)
                .map(|_| data.epoch_order(&mut rng))
                .collect()
        } else {
            let shared = data.epoch_order(&mut rng);
            vec![shared; args.num_heads]
        };

        let mut losses = Vec::new();
        let steps = data.len().div_ceil(batch_size);
        for step in 0..steps {
            let lo = step * batch_size;
            let hi = (lo + batch_size).min(data.len());

            let mut total: Option<Tensor<ADBackend, 1>> = None;
            for (head, order) in orders.iter().enumerate() {
                let (xs, ys) = data.batch::<ADBackend>(&order[lo..hi], &device);
                let nll = gaussian_nll(model.forward_head(head, xs), ys);
                total = Some(match total {
                    Some(acc) => acc + nll,
                    None => nll,
                });
            }
            let loss = match total {
                Some(loss) => loss,
                None => continue,
            };

            let loss_detached = loss.clone().detach();
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(args.lr, model, grads);
            losses.push(first_scalar(loss_detached));
        }

        let avg_loss = average(&losses);
        println!("epoch {epoch}: avg nll {avg_loss:.4}");
        if let Some(path) = &args.metrics_out {
            append_metrics(
                path,
                serde_json::json!({
                    "ts": chrono::Utc::now().to_rfc3339(),
                    "epoch": epoch,
                    "avg_nll": avg_loss,
                    "seed": seed,
                }),
            );
        }
        final_avg = avg_loss;
    }

    let report = score::score_cnn(&model, &data, &device);
    println!(
        "score: mean_mse={:.5} epi_score={:.3}",
        report.mean_mse, report.epi_score
    );

    let mut metrics = report.to_metrics();
    metrics.insert("final_avg_nll".to_string(), final_avg as f64);
    let base =
        checkpoint::save_cnn(Path::new(&args.ckpt_dir), &model, echo_of(args, seed), metrics)?;
    println!("Saved checkpoint to {}", base.display());

    Ok(TrainReport {
        checkpoint: base,
        final_avg_loss: final_avg,
    })
}

fn echo_of(args: &TrainArgs, seed: u64) -> TrainEcho {
    TrainEcho {
        poly: match args.model {
            ModelKind::Mlp => Some(args.poly),
            ModelKind::Cnn => None,
        },
        train_size: args.train_size,
        epochs: args.epochs,
        batch_size: args.batch_size,
        lr: args.lr,
        seed,
        scramble_batches: args.scramble_batches,
    }
}

pub(crate) fn first_scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .first()
        .copied()
        .unwrap_or(0.0)
}

fn average(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

fn append_metrics(path: &str, record: serde_json::Value) {
    if let Some(parent) = Path::new(path).parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{record}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;

    type B = crate::TrainBackend;

    #[test]
    fn sigma_floor_is_strictly_positive() {
        let device = Default::default();
        let raw = Tensor::<B, 2>::from_data(
            TensorData::new(vec![-10.0f32, -1.0, 0.0, 4.0], [2, 2]),
            &device,
        );
        let var = make_sigma_positive(raw).into_data().to_vec::<f32>().unwrap();
        assert!(var.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn nll_is_finite_on_zero_output() {
        let device = Default::default();
        let out = Tensor::<B, 2>::zeros([4, 2], &device);
        let target = Tensor::<B, 2>::ones([4, 1], &device);
        let loss = first_scalar(gaussian_nll(out, target));
        assert!(loss.is_finite());
    }
}
