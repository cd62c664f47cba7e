//! Split-index experiment sweep: train one ensemble per requested split,
//! score it, and aggregate the rows into `results.csv` plus an overlay chart
//! of the epistemic-std profiles.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use burn::tensor::backend::Backend;
use clap::Parser;

use crate::checkpoint;
use crate::dataset::{PolyData, PolyKind};
use crate::plot;
use crate::score::{evaluate_curves, score_ensemble, ScoreReport};
use crate::train::{run_train, ModelKind, TrainArgs};
use crate::TrainBackend;

#[derive(Parser, Debug)]
#[command(name = "sweep", about = "Sweep trunk/head split indices and aggregate results")]
pub struct SweepArgs {
    /// Experiment name; the output directory is `<out_dir>/<name>_<stamp>`.
    #[arg(long, default_value = "fc_experiment")]
    pub name: String,
    /// Split indices to train, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "0,1,2,3,4")]
    pub split_indexes: Vec<usize>,
    /// Seed applied identically to every split.
    #[arg(long, default_value_t = 1111)]
    pub seed: u64,
    /// Layer widths from input to output, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "1,64,64,64,64,2")]
    pub layer_shapes: Vec<usize>,
    #[arg(long, default_value_t = 5)]
    pub num_heads: usize,
    #[arg(long, value_enum, default_value_t = PolyKind::Cubic)]
    pub poly: PolyKind,
    #[arg(long, default_value_t = 1024)]
    pub train_size: usize,
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,
    #[arg(long, default_value_t = 40)]
    pub epochs: usize,
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
    #[arg(long, default_value_t = false)]
    pub scramble_batches: bool,
    #[arg(long, default_value = "experiments")]
    pub out_dir: String,
}

struct SweepRow {
    split_idx: usize,
    score: ScoreReport,
    shared_parameters: usize,
    total_parameters: usize,
}

pub fn run_sweep(args: SweepArgs) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let exp_dir = Path::new(&args.out_dir).join(format!("{}_{stamp}", args.name));
    fs::create_dir_all(&exp_dir)?;
    let device = <TrainBackend as Backend>::Device::default();

    let mut rows: Vec<SweepRow> = Vec::new();
    let mut profiles: Vec<(usize, Vec<f32>)> = Vec::new();
    let mut profile_xs: Vec<f32> = Vec::new();

    for &split_idx in &args.split_indexes {
        println!("=== split {split_idx} ===");
        let split_dir = exp_dir.join(format!("split_{split_idx}"));
        let report = run_train(TrainArgs {
            model: ModelKind::Mlp,
            poly: args.poly,
            train_size: args.train_size,
            batch_size: args.batch_size,
            epochs: args.epochs,
            lr: args.lr,
            seed: Some(args.seed),
            layer_shapes: args.layer_shapes.clone(),
            split_idx,
            num_heads: args.num_heads,
            scramble_batches: args.scramble_batches,
            ckpt_dir: split_dir.display().to_string(),
            metrics_out: None,
            channels: vec![1, 8, 16],
            grid: 15,
            map_rounds: 4,
        })?;

        // Score from the checkpoint just written, on the inference backend.
        let (model, meta) = checkpoint::load_backbone::<TrainBackend>(&report.checkpoint, &device)?;
        let data = PolyData::generate(args.poly, meta.train.train_size, meta.train.seed);
        let score = score_ensemble(&model, &data, &device);
        let curves = evaluate_curves(&model, &data, 400, &device);
        plot::render_performance(
            &curves,
            &data,
            &exp_dir.join(format!("{split_idx:03}_performance.png")),
        )?;
        profile_xs = curves.xs.clone();
        profiles.push((split_idx, curves.stats.epistemic_std.clone()));

        rows.push(SweepRow {
            split_idx,
            score,
            shared_parameters: model.shared_params(),
            total_parameters: model.total_params(),
        });
        // Rewritten after every split so partial sweeps still leave a usable file.
        write_results_csv(&exp_dir.join("results.csv"), &rows)?;
    }

    if !profiles.is_empty() {
        plot::render_profiles(
            &profile_xs,
            &profiles,
            &args.poly.gaps(),
            &exp_dir.join("epistemic_sigma.png"),
        )?;
    }
    println!("Sweep results in {}", exp_dir.display());
    Ok(exp_dir)
}

fn write_results_csv(path: &Path, rows: &[SweepRow]) -> Result<()> {
    let mut out = String::from(
        "split_idx,mean_mse,sigma_mse,per_correct,epi_score,shared_parameters,total_parameters\n",
    );
    for row in rows {
        writeln!(
            out,
            "{},{},{},{},{},{},{}",
            row.split_idx,
            row.score.mean_mse,
            row.score.sigma_mse,
            row.score.per_correct,
            row.score.epi_score,
            row.shared_parameters,
            row.total_parameters
        )?;
    }
    fs::write(path, out)?;
    Ok(())
}
