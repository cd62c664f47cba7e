//! Ensemble scoring: how well the mean tracks the target, how well the
//! aleatoric channel tracks the true noise, and whether head disagreement
//! (epistemic std) concentrates in the data gaps.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use burn::tensor::backend::Backend;
use clap::Parser;

use crate::checkpoint::{self, ModelSpec};
use crate::cnn::VariableCnnBackbone;
use crate::dataset::{MapLoc, PolyData};
use crate::model::VariableBackbone;
use crate::plot;
use crate::TrainBackend;

/// Host-side mirror of `make_sigma_positive`.
fn softplus_host(raw: f32) -> f32 {
    // ln(1 + e^x), stable for large |x|.
    if raw > 20.0 {
        raw + 1e-6
    } else {
        (1.0 + raw.exp()).ln() + 1e-6
    }
}

/// Per-point ensemble statistics at the given evaluation inputs.
pub struct EnsembleStats {
    pub per_head_mu: Vec<Vec<f32>>,
    pub mean: Vec<f32>,
    /// Mean of the heads' predicted variances.
    pub aleatoric_var: Vec<f32>,
    /// Sample std of the heads' means; the disagreement signal.
    pub epistemic_std: Vec<f32>,
}

pub fn ensemble_stats<B: Backend>(
    model: &VariableBackbone<B>,
    xs: &[f32],
    device: &B::Device,
) -> EnsembleStats {
    let n = xs.len();
    let input = burn::tensor::Tensor::<B, 2>::from_data(
        burn::tensor::TensorData::new(xs.to_vec(), [n, 1]),
        device,
    );
    let outputs = model.forward(input);

    let mut per_head_mu: Vec<Vec<f32>> = Vec::with_capacity(outputs.len());
    let mut per_head_var: Vec<Vec<f32>> = Vec::with_capacity(outputs.len());
    for out in outputs {
        let host = out
            .into_data()
            .to_vec::<f32>()
            .expect("head outputs transfer to host as f32");
        let mut mu = Vec::with_capacity(n);
        let mut var = Vec::with_capacity(n);
        for point in host.chunks_exact(2) {
            mu.push(point[0]);
            var.push(softplus_host(point[1]));
        }
        per_head_mu.push(mu);
        per_head_var.push(var);
    }

    let heads = per_head_mu.len();
    let mut mean = vec![0.0f32; n];
    let mut aleatoric_var = vec![0.0f32; n];
    let mut epistemic_std = vec![0.0f32; n];
    for i in 0..n {
        let mut mu_sum = 0.0f32;
        let mut var_sum = 0.0f32;
        for h in 0..heads {
            mu_sum += per_head_mu[h][i];
            var_sum += per_head_var[h][i];
        }
        let mu_mean = mu_sum / heads as f32;
        mean[i] = mu_mean;
        aleatoric_var[i] = var_sum / heads as f32;
        if heads > 1 {
            let ss: f32 = (0..heads)
                .map(|h| {
                    let d = per_head_mu[h][i] - mu_mean;
                    d * d
                })
                .sum();
            epistemic_std[i] = (ss / (heads - 1) as f32).sqrt();
        }
    }

    EnsembleStats {
        per_head_mu,
        mean,
        aleatoric_var,
        epistemic_std,
    }
}

/// Evaluation curves over a uniform grid of the dataset domain.
pub struct EnsembleCurves {
    pub xs: Vec<f32>,
    pub stats: EnsembleStats,
}

pub fn evaluate_curves<B: Backend>(
    model: &VariableBackbone<B>,
    data: &PolyData,
    points: usize,
    device: &B::Device,
) -> EnsembleCurves {
    let points = points.max(2);
    let step = (data.upper - data.lower) / (points - 1) as f32;
    let xs: Vec<f32> = (0..points).map(|i| data.lower + step * i as f32).collect();
    let stats = ensemble_stats(model, &xs, device);
    EnsembleCurves { xs, stats }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreReport {
    pub mean_mse: f32,
    pub sigma_mse: f32,
    /// Fraction of training targets within two total-stds of the mean.
    pub per_correct: f32,
    /// In-gap over out-of-gap mean epistemic std.
    pub epi_score: f32,
}

impl ScoreReport {
    pub fn to_metrics(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("mean_mse".to_string(), self.mean_mse as f64),
            ("sigma_mse".to_string(), self.sigma_mse as f64),
            ("per_correct".to_string(), self.per_correct as f64),
            ("epi_score".to_string(), self.epi_score as f64),
        ])
    }
}

pub fn score_ensemble<B: Backend>(
    model: &VariableBackbone<B>,
    data: &PolyData,
    device: &B::Device,
) -> ScoreReport {
    let curves = evaluate_curves(model, data, 400, device);
    let xs = &curves.xs;
    let stats = &curves.stats;

    let n = xs.len() as f32;
    let mean_mse = xs
        .iter()
        .zip(&stats.mean)
        .map(|(x, m)| {
            let d = m - data.kind.polyf(*x);
            d * d
        })
        .sum::<f32>()
        / n;
    let sigma_mse = xs
        .iter()
        .zip(&stats.aleatoric_var)
        .map(|(x, v)| {
            let d = v.sqrt() - data.kind.varf(*x);
            d * d
        })
        .sum::<f32>()
        / n;

    let mut in_gap = (0.0f32, 0usize);
    let mut out_gap = (0.0f32, 0usize);
    for (x, epi) in xs.iter().zip(&stats.epistemic_std) {
        if data.in_gap(*x) {
            in_gap = (in_gap.0 + epi, in_gap.1 + 1);
        } else {
            out_gap = (out_gap.0 + epi, out_gap.1 + 1);
        }
    }
    let epi_score = ratio_of_means(in_gap, out_gap);

    // Interval coverage on the actual (noisy) training targets.
    let train_stats = ensemble_stats(model, &data.x, device);
    let mut covered = 0usize;
    for i in 0..data.len() {
        let total_var =
            train_stats.aleatoric_var[i] + train_stats.epistemic_std[i] * train_stats.epistemic_std[i];
        if (data.y[i] - train_stats.mean[i]).abs() <= 2.0 * total_var.sqrt() {
            covered += 1;
        }
    }
    let per_correct = if data.is_empty() {
        0.0
    } else {
        covered as f32 / data.len() as f32
    };

    ScoreReport {
        mean_mse,
        sigma_mse,
        per_correct,
        epi_score,
    }
}

fn ratio_of_means(num: (f32, usize), den: (f32, usize)) -> f32 {
    if num.1 == 0 || den.1 == 0 {
        return 0.0;
    }
    let num_mean = num.0 / num.1 as f32;
    let den_mean = (den.0 / den.1 as f32).max(1e-9);
    num_mean / den_mean
}

/// Full-grid maps for the CNN variant, row-major `grid x grid`.
pub struct CnnMaps {
    pub grid: usize,
    pub mean: Vec<f32>,
    pub aleatoric_var: Vec<f32>,
    pub epistemic_std: Vec<f32>,
}

pub fn evaluate_maps<B: Backend>(
    model: &VariableCnnBackbone<B>,
    data: &MapLoc,
    device: &B::Device,
) -> CnnMaps {
    let input = data.full_grid::<B>(device);
    let outputs = model.forward(input);
    let n = data.grid * data.grid;

    let mut per_head_mu: Vec<Vec<f32>> = Vec::with_capacity(outputs.len());
    let mut per_head_var: Vec<Vec<f32>> = Vec::with_capacity(outputs.len());
    for out in outputs {
        let host = out
            .into_data()
            .to_vec::<f32>()
            .expect("head outputs transfer to host as f32");
        let mut mu = Vec::with_capacity(n);
        let mut var = Vec::with_capacity(n);
        for point in host.chunks_exact(2) {
            mu.push(point[0]);
            var.push(softplus_host(point[1]));
        }
        per_head_mu.push(mu);
        per_head_var.push(var);
    }

    let heads = per_head_mu.len();
    let mut mean = vec![0.0f32; n];
    let mut aleatoric_var = vec![0.0f32; n];
    let mut epistemic_std = vec![0.0f32; n];
    for i in 0..n {
        let mu_mean = (0..heads).map(|h| per_head_mu[h][i]).sum::<f32>() / heads as f32;
        mean[i] = mu_mean;
        aleatoric_var[i] = (0..heads).map(|h| per_head_var[h][i]).sum::<f32>() / heads as f32;
        if heads > 1 {
            let ss: f32 = (0..heads)
                .map(|h| {
                    let d = per_head_mu[h][i] - mu_mean;
                    d * d
                })
                .sum();
            epistemic_std[i] = (ss / (heads - 1) as f32).sqrt();
        }
    }

    CnnMaps {
        grid: data.grid,
        mean,
        aleatoric_var,
        epistemic_std,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CnnScoreReport {
    pub mean_mse: f32,
    pub epi_score: f32,
}

impl CnnScoreReport {
    pub fn to_metrics(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("mean_mse".to_string(), self.mean_mse as f64),
            ("epi_score".to_string(), self.epi_score as f64),
        ])
    }
}

pub fn score_cnn<B: Backend>(
    model: &VariableCnnBackbone<B>,
    data: &MapLoc,
    device: &B::Device,
) -> CnnScoreReport {
    let maps = evaluate_maps(model, data, device);
    let grid = data.grid;

    let mut se = 0.0f32;
    let mut held = (0.0f32, 0usize);
    let mut seen = (0.0f32, 0usize);
    for cy in 0..grid {
        for cx in 0..grid {
            let i = cy * grid + cx;
            let u = MapLoc::to_unit(grid, cx);
            let v = MapLoc::to_unit(grid, cy);
            let d = maps.mean[i] - MapLoc::surface(u, v);
            se += d * d;
            if data.in_holdout(cx, cy) {
                held = (held.0 + maps.epistemic_std[i], held.1 + 1);
            } else {
                seen = (seen.0 + maps.epistemic_std[i], seen.1 + 1);
            }
        }
    }

    CnnScoreReport {
        mean_mse: se / (grid * grid) as f32,
        epi_score: ratio_of_means(held, seen),
    }
}

#[derive(Parser, Debug)]
#[command(name = "eval", about = "Score and plot a saved ensemble checkpoint")]
pub struct EvalArgs {
    /// Checkpoint directory to search when no explicit path is given.
    #[arg(long, default_value = "weights")]
    pub ckpt_dir: String,
    /// Extension-free checkpoint base path; defaults to the most recent one.
    #[arg(long)]
    pub checkpoint: Option<String>,
    /// Output directory for rendered plots.
    #[arg(long, default_value = "plots")]
    pub out_dir: String,
}

pub fn run_eval(args: EvalArgs) -> Result<()> {
    let device = <TrainBackend as Backend>::Device::default();
    let base = match &args.checkpoint {
        Some(path) => Path::new(path).to_path_buf(),
        None => checkpoint::most_recent(Path::new(&args.ckpt_dir))?,
    };
    println!("Evaluating checkpoint {}", base.display());
    let meta = checkpoint::read_meta(&base)?;
    let out_dir = Path::new(&args.out_dir);
    std::fs::create_dir_all(out_dir)?;

    match &meta.spec {
        ModelSpec::Mlp(_) => {
            let (model, meta) = checkpoint::load_backbone::<TrainBackend>(&base, &device)?;
            let poly = meta.train.poly.ok_or_else(|| {
                anyhow::anyhow!("mlp checkpoint sidecar is missing its target-function preset")
            })?;
            let data = PolyData::generate(poly, meta.train.train_size, meta.train.seed);
            let report = score_ensemble(&model, &data, &device);
            println!(
                "mean_mse={:.5} sigma_mse={:.5} per_correct={:.3} epi_score={:.3}",
                report.mean_mse, report.sigma_mse, report.per_correct, report.epi_score
            );
            let curves = evaluate_curves(&model, &data, 400, &device);
            let out = out_dir.join("performance.png");
            plot::render_performance(&curves, &data, &out)?;
            println!("Wrote {}", out.display());
        }
        ModelSpec::Cnn(config) => {
            let grid = config.grid;
            let (model, _meta) = checkpoint::load_cnn::<TrainBackend>(&base, &device)?;
            let data = MapLoc::generate(grid, 1, meta.train.seed);
            let report = score_cnn(&model, &data, &device);
            println!(
                "mean_mse={:.5} epi_score={:.3}",
                report.mean_mse, report.epi_score
            );
            let maps = evaluate_maps(&model, &data, &device);
            for (name, values) in [
                ("cnn_mean.png", &maps.mean),
                ("cnn_aleatoric.png", &maps.aleatoric_var),
                ("cnn_epistemic.png", &maps.epistemic_std),
            ] {
                let out = out_dir.join(name);
                plot::render_heatmap(values, grid, &data.holdouts, &out)?;
                println!("Wrote {}", out.display());
            }
        }
    }

    Ok(())
}
