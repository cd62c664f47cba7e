//! Pixel-level PNG rendering of ensemble results. Deliberately small: a line
//! chart with translucent bands covers the 1-D task, a cell heatmap covers the
//! grid task. Matplotlib-grade output is out of scope.

use std::path::Path;

use anyhow::Result;
use image::{Rgba, RgbaImage};

use crate::dataset::PolyData;
use crate::score::EnsembleCurves;

const WIDTH: u32 = 900;
const HEIGHT: u32 = 600;
const MARGIN: u32 = 40;

const GREY: Rgba<u8> = Rgba([140, 140, 140, 255]);
const BLUE: Rgba<u8> = Rgba([40, 90, 200, 255]);
const RED: Rgba<u8> = Rgba([200, 40, 40, 255]);
const ORANGE: Rgba<u8> = Rgba([240, 150, 30, 255]);
const GREEN: Rgba<u8> = Rgba([40, 160, 80, 255]);

struct Chart {
    img: RgbaImage,
    x_min: f32,
    x_max: f32,
    y_min: f32,
    y_max: f32,
}

impl Chart {
    fn new(x_min: f32, x_max: f32, y_min: f32, y_max: f32) -> Self {
        let mut img = RgbaImage::new(WIDTH, HEIGHT);
        for pixel in img.pixels_mut() {
            *pixel = Rgba([255, 255, 255, 255]);
        }
        let pad = ((y_max - y_min).abs().max(1e-3)) * 0.1;
        Self {
            img,
            x_min,
            x_max,
            y_min: y_min - pad,
            y_max: y_max + pad,
        }
    }

    fn to_px(&self, x: f32, y: f32) -> (i64, i64) {
        let inner_w = (WIDTH - 2 * MARGIN) as f32;
        let inner_h = (HEIGHT - 2 * MARGIN) as f32;
        let fx = (x - self.x_min) / (self.x_max - self.x_min);
        let fy = (y - self.y_min) / (self.y_max - self.y_min);
        (
            (MARGIN as f32 + fx * inner_w) as i64,
            (MARGIN as f32 + (1.0 - fy) * inner_h) as i64,
        )
    }

    fn blend(&mut self, px: i64, py: i64, color: Rgba<u8>, alpha: f32) {
        if px < 0 || py < 0 || px >= WIDTH as i64 || py >= HEIGHT as i64 {
            return;
        }
        let dst = self.img.get_pixel_mut(px as u32, py as u32);
        for c in 0..3 {
            dst[c] = (dst[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha) as u8;
        }
    }

    fn dot(&mut self, x: f32, y: f32, color: Rgba<u8>, alpha: f32) {
        let (px, py) = self.to_px(x, y);
        for dy in -1..=1 {
            for dx in -1..=1 {
                self.blend(px + dx, py + dy, color, alpha);
            }
        }
    }

    fn segment(&mut self, a: (i64, i64), b: (i64, i64), color: Rgba<u8>, alpha: f32) {
        let steps = (b.0 - a.0).abs().max((b.1 - a.1).abs()).max(1);
        for s in 0..=steps {
            let t = s as f32 / steps as f32;
            let px = a.0 + ((b.0 - a.0) as f32 * t) as i64;
            let py = a.1 + ((b.1 - a.1) as f32 * t) as i64;
            self.blend(px, py, color, alpha);
            self.blend(px, py + 1, color, alpha);
        }
    }

    fn polyline(&mut self, xs: &[f32], ys: &[f32], color: Rgba<u8>, alpha: f32) {
        for i in 1..xs.len().min(ys.len()) {
            let a = self.to_px(xs[i - 1], ys[i - 1]);
            let b = self.to_px(xs[i], ys[i]);
            self.segment(a, b, color, alpha);
        }
    }

    /// Translucent fill between two curves sharing the x grid.
    fn band(&mut self, xs: &[f32], lo: &[f32], hi: &[f32], color: Rgba<u8>, alpha: f32) {
        for i in 0..xs.len().min(lo.len()).min(hi.len()) {
            let (px, py_lo) = self.to_px(xs[i], lo[i]);
            let (_, py_hi) = self.to_px(xs[i], hi[i]);
            let (top, bottom) = (py_hi.min(py_lo), py_hi.max(py_lo));
            for py in top..=bottom {
                self.blend(px, py, color, alpha);
            }
        }
    }

    /// Shade a vertical x interval over the full chart height.
    fn vspan(&mut self, x0: f32, x1: f32, color: Rgba<u8>, alpha: f32) {
        let (px0, _) = self.to_px(x0, 0.0);
        let (px1, _) = self.to_px(x1, 0.0);
        for px in px0.min(px1)..=px0.max(px1) {
            for py in MARGIN as i64..(HEIGHT - MARGIN) as i64 {
                self.blend(px, py, color, alpha);
            }
        }
    }

    fn save(self, path: &Path) -> Result<()> {
        self.img.save(path)?;
        Ok(())
    }
}

fn min_max(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for v in values {
        if v.is_finite() {
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    if lo > hi {
        (0.0, 1.0)
    } else {
        (lo, hi)
    }
}

/// Training scatter, true function, per-head curves, ensemble mean and the
/// aleatoric/epistemic bands, with gap intervals shaded.
pub fn render_performance(curves: &EnsembleCurves, data: &PolyData, path: &Path) -> Result<()> {
    let stats = &curves.stats;
    let (y_lo, y_hi) = min_max(
        data.y
            .iter()
            .copied()
            .chain(stats.mean.iter().copied())
            .chain(curves.xs.iter().map(|x| data.kind.polyf(*x))),
    );
    let mut chart = Chart::new(data.lower, data.upper, y_lo, y_hi);

    for (lo, hi) in data.kind.gaps() {
        chart.vspan(lo, hi, RED, 0.06);
    }
    for (x, y) in data.x.iter().zip(&data.y) {
        chart.dot(*x, *y, GREY, 0.25);
    }

    let truth: Vec<f32> = curves.xs.iter().map(|x| data.kind.polyf(*x)).collect();
    chart.polyline(&curves.xs, &truth, BLUE, 0.9);

    for head_mu in &stats.per_head_mu {
        chart.polyline(&curves.xs, head_mu, ORANGE, 0.35);
    }

    let alea_lo: Vec<f32> = stats
        .mean
        .iter()
        .zip(&stats.aleatoric_var)
        .map(|(m, v)| m - v.sqrt())
        .collect();
    let alea_hi: Vec<f32> = stats
        .mean
        .iter()
        .zip(&stats.aleatoric_var)
        .map(|(m, v)| m + v.sqrt())
        .collect();
    chart.band(&curves.xs, &alea_lo, &alea_hi, ORANGE, 0.18);

    let epi_lo: Vec<f32> = stats
        .mean
        .iter()
        .zip(&stats.epistemic_std)
        .map(|(m, e)| m - e)
        .collect();
    let epi_hi: Vec<f32> = stats
        .mean
        .iter()
        .zip(&stats.epistemic_std)
        .map(|(m, e)| m + e)
        .collect();
    chart.band(&curves.xs, &epi_lo, &epi_hi, GREEN, 0.18);

    chart.polyline(&curves.xs, &stats.mean, RED, 0.9);
    chart.save(path)
}

const PALETTE: [Rgba<u8>; 6] = [
    Rgba([40, 90, 200, 255]),
    Rgba([200, 40, 40, 255]),
    Rgba([40, 160, 80, 255]),
    Rgba([240, 150, 30, 255]),
    Rgba([140, 60, 180, 255]),
    Rgba([30, 170, 170, 255]),
];

/// Epistemic-std profiles per split index on a shared x grid.
pub fn render_profiles(
    xs: &[f32],
    profiles: &[(usize, Vec<f32>)],
    gaps: &[(f32, f32)],
    path: &Path,
) -> Result<()> {
    let (x_lo, x_hi) = min_max(xs.iter().copied());
    let (_, y_hi) = min_max(profiles.iter().flat_map(|(_, p)| p.iter().copied()));
    let mut chart = Chart::new(x_lo, x_hi, 0.0, y_hi.max(1e-3));

    for (lo, hi) in gaps {
        chart.vspan(*lo, *hi, RED, 0.06);
    }
    for (slot, (_, profile)) in profiles.iter().enumerate() {
        let color = PALETTE[slot % PALETTE.len()];
        chart.polyline(xs, profile, color, 0.9);
    }
    chart.save(path)
}

/// Grid heatmap with held-out rectangles outlined.
pub fn render_heatmap(
    values: &[f32],
    grid: usize,
    holdouts: &[[usize; 4]],
    path: &Path,
) -> Result<()> {
    const CELL: u32 = 24;
    let side = grid as u32 * CELL;
    let mut img = RgbaImage::new(side, side);
    let (lo, hi) = min_max(values.iter().copied());
    let span = (hi - lo).max(1e-9);

    for cy in 0..grid {
        for cx in 0..grid {
            let t = (values[cy * grid + cx] - lo) / span;
            // Blue-to-yellow ramp.
            let color = Rgba([
                (40.0 + 200.0 * t) as u8,
                (60.0 + 160.0 * t) as u8,
                (200.0 - 160.0 * t) as u8,
                255,
            ]);
            for py in 0..CELL {
                for px in 0..CELL {
                    img.put_pixel(cx as u32 * CELL + px, cy as u32 * CELL + py, color);
                }
            }
        }
    }

    for rect in holdouts {
        let x0 = rect[0] as u32 * CELL;
        let x1 = (rect[1] as u32 * CELL).min(side - 1);
        let y0 = rect[2] as u32 * CELL;
        let y1 = (rect[3] as u32 * CELL).min(side - 1);
        for px in x0..=x1 {
            img.put_pixel(px, y0, RED);
            img.put_pixel(px, y1, RED);
        }
        for py in y0..=y1 {
            img.put_pixel(x0, py, RED);
            img.put_pixel(x1, py, RED);
        }
    }

    img.save(path)?;
    Ok(())
}
