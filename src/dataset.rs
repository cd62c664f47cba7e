//! Synthetic datasets for the ensemble experiments.
//!
//! `PolyData` is the 1-D regression task: a polynomial target with
//! heteroscedastic Gaussian noise, sampled everywhere on `[-1, 1]` except the
//! configured gap intervals. The gaps are where ensemble disagreement should
//! spike. `MapLoc` is the 2-D grid-localization task for the CNN variant.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Shipped target-function presets.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolyKind {
    /// `2x^3 - x` with noise growing away from the origin.
    Cubic,
    /// `sin(3x)` with noise shrinking away from the origin.
    Sine,
}

impl PolyKind {
    /// Noise-free target function.
    pub fn polyf(self, x: f32) -> f32 {
        match self {
            PolyKind::Cubic => 2.0 * x * x * x - x,
            PolyKind::Sine => (3.0 * x).sin(),
        }
    }

    /// Noise standard deviation at `x`.
    pub fn varf(self, x: f32) -> f32 {
        match self {
            PolyKind::Cubic => 0.05 + 0.1 * x.abs(),
            PolyKind::Sine => 0.05 + 0.05 * (1.0 - x * x),
        }
    }

    /// Intervals of the domain that carry no training samples.
    pub fn gaps(self) -> Vec<(f32, f32)> {
        vec![(-0.5, 0.5)]
    }
}

#[derive(Debug, Clone)]
pub struct PolyData {
    pub kind: PolyKind,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub lower: f32,
    pub upper: f32,
    pub seed: u64,
}

impl PolyData {
    /// Draw `size` samples outside the gap intervals, deterministic per seed.
    pub fn generate(kind: PolyKind, size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let gaps = kind.gaps();
        let mut x = Vec::with_capacity(size);
        let mut y = Vec::with_capacity(size);
        while x.len() < size {
            let sample: f32 = rng.random_range(-1.0..1.0);
            if gaps.iter().any(|(lo, hi)| sample > *lo && sample < *hi) {
                continue;
            }
            let noise: f32 = rng.sample(StandardNormal);
            x.push(sample);
            y.push(kind.polyf(sample) + noise * kind.varf(sample));
        }
        Self {
            kind,
            x,
            y,
            lower: -1.0,
            upper: 1.0,
            seed,
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn in_gap(&self, x: f32) -> bool {
        self.kind
            .gaps()
            .iter()
            .any(|(lo, hi)| x > *lo && x < *hi)
    }

    /// Shuffled index order for one epoch.
    pub fn epoch_order(&self, rng: &mut StdRng) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.x.len()).collect();
        order.shuffle(rng);
        order
    }

    /// Collate the selected samples into `[b, 1]` input/target tensors.
    pub fn batch<B: Backend>(
        &self,
        indices: &[usize],
        device: &B::Device,
    ) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let xs: Vec<f32> = indices.iter().map(|i| self.x[*i]).collect();
        let ys: Vec<f32> = indices.iter().map(|i| self.y[*i]).collect();
        let b = indices.len();
        (
            Tensor::from_data(TensorData::new(xs, [b, 1]), device),
            Tensor::from_data(TensorData::new(ys, [b, 1]), device),
        )
    }
}

/// 2-D localization dataset: the input marks one cell of a `grid x grid`
/// plane, the target is a noisy surface value at that cell. Rectangular
/// held-out regions play the role of the 1-D gaps.
#[derive(Debug, Clone)]
pub struct MapLoc {
    pub grid: usize,
    pub cells: Vec<(usize, usize)>,
    pub targets: Vec<f32>,
    /// Held-out rectangles as `[x0, x1, y0, y1]` in cell coordinates
    /// (half-open on the upper edges).
    pub holdouts: Vec<[usize; 4]>,
    pub seed: u64,
}

impl MapLoc {
    /// Map a cell coordinate into `[-1, 1]`.
    pub fn to_unit(grid: usize, c: usize) -> f32 {
        2.0 * c as f32 / grid as f32 - 1.0
    }

    /// Noise-free target surface.
    pub fn surface(u: f32, v: f32) -> f32 {
        0.5 * (u * u - v * v) + u * v
    }

    /// Noise standard deviation over the surface.
    pub fn noise_std(u: f32, v: f32) -> f32 {
        0.05 + 0.025 * (u * u + v * v)
    }

    pub fn generate(grid: usize, rounds: usize, seed: u64) -> Self {
        let holdouts = vec![[3, 6, 3, 6], [9, 12, 8, 11]];
        let mut rng = StdRng::seed_from_u64(seed);
        let mut cells = Vec::new();
        let mut targets = Vec::new();
        for _ in 0..rounds.max(1) {
            for cy in 0..grid {
                for cx in 0..grid {
                    if in_rects(&holdouts, cx, cy) {
                        continue;
                    }
                    let u = Self::to_unit(grid, cx);
                    let v = Self::to_unit(grid, cy);
                    let noise: f32 = rng.sample(StandardNormal);
                    cells.push((cx, cy));
                    targets.push(Self::surface(u, v) + noise * Self::noise_std(u, v));
                }
            }
        }
        Self {
            grid,
            cells,
            targets,
            holdouts,
            seed,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn in_holdout(&self, cx: usize, cy: usize) -> bool {
        in_rects(&self.holdouts, cx, cy)
    }

    pub fn epoch_order(&self, rng: &mut StdRng) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.cells.len()).collect();
        order.shuffle(rng);
        order
    }

    /// One-hot `[b, 1, grid, grid]` planes plus `[b, 1]` targets.
    pub fn batch<B: Backend>(
        &self,
        indices: &[usize],
        device: &B::Device,
    ) -> (Tensor<B, 4>, Tensor<B, 2>) {
        let b = indices.len();
        let plane = self.grid * self.grid;
        let mut input = vec![0.0f32; b * plane];
        let mut targets = Vec::with_capacity(b);
        for (slot, i) in indices.iter().enumerate() {
            let (cx, cy) = self.cells[*i];
            input[slot * plane + cy * self.grid + cx] = 1.0;
            targets.push(self.targets[*i]);
        }
        (
            Tensor::from_data(TensorData::new(input, [b, 1, self.grid, self.grid]), device),
            Tensor::from_data(TensorData::new(targets, [b, 1]), device),
        )
    }

    /// One-hot planes for every cell of the grid, row-major, for full-map
    /// evaluation.
    pub fn full_grid<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        let plane = self.grid * self.grid;
        let mut input = vec![0.0f32; plane * plane];
        for cy in 0..self.grid {
            for cx in 0..self.grid {
                let slot = cy * self.grid + cx;
                input[slot * plane + cy * self.grid + cx] = 1.0;
            }
        }
        Tensor::from_data(
            TensorData::new(input, [plane, 1, self.grid, self.grid]),
            device,
        )
    }
}

fn in_rects(rects: &[[usize; 4]], cx: usize, cy: usize) -> bool {
    rects
        .iter()
        .any(|r| cx >= r[0] && cx < r[1] && cy >= r[2] && cy < r[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poly_data_avoids_gaps() {
        let data = PolyData::generate(PolyKind::Cubic, 256, 7);
        assert_eq!(data.len(), 256);
        assert!(data.x.iter().all(|x| !data.in_gap(*x)));
    }

    #[test]
    fn poly_data_is_deterministic_per_seed() {
        let a = PolyData::generate(PolyKind::Sine, 64, 1111);
        let b = PolyData::generate(PolyKind::Sine, 64, 1111);
        assert_eq!(a.x, b.x);
        assert_eq!(a.y, b.y);
    }

    #[test]
    fn map_loc_skips_holdouts() {
        let data = MapLoc::generate(15, 1, 3);
        assert!(!data.is_empty());
        assert!(data.cells.iter().all(|(cx, cy)| !data.in_holdout(*cx, *cy)));
    }
}
