//! Per-pixel-column statistical combination kernels.
//!
//! Every kernel operates on the samples of one pixel position gathered
//! across a stack of frames, so each method is testable on a single
//! column of values. Iterative methods are written as explicit
//! fixed-point iterations with an iteration-count termination contract.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_COMBINE_ITERATIONS, DEFAULT_KAPPA, ENTROPY_BINS, ENTROPY_WINDOW, EPSILON};

/// Statistical combine method, selectable per master type and for the
/// light stack.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum CombineMethod {
    /// Arithmetic mean.
    Average,
    /// Order-statistic median; even counts average the two central samples.
    Median,
    /// Iterative mean/stddev clipping at `kappa` sigmas.
    KappaSigma { kappa: f32, iterations: usize },
    /// Kappa-sigma clipping with the median as the center statistic.
    MedianKappaSigma { kappa: f32, iterations: usize },
    /// Weighted average with weights refined from each sample's deviation
    /// from the running consensus.
    AutoAdaptive { iterations: usize },
    /// Weighted average with weights from a local-neighbourhood entropy
    /// estimate, favoring low-noise regions.
    EntropyWeighted,
}

impl Default for CombineMethod {
    fn default() -> Self {
        Self::Average
    }
}

impl CombineMethod {
    pub fn kappa_sigma() -> Self {
        Self::KappaSigma {
            kappa: DEFAULT_KAPPA,
            iterations: DEFAULT_COMBINE_ITERATIONS,
        }
    }

    pub fn median_kappa_sigma() -> Self {
        Self::MedianKappaSigma {
            kappa: DEFAULT_KAPPA,
            iterations: DEFAULT_COMBINE_ITERATIONS,
        }
    }

    /// True when the running stack needs the full aligned sample history
    /// rather than an online sum/count.
    pub fn needs_history(&self) -> bool {
        !matches!(self, Self::Average)
    }
}

impl std::fmt::Display for CombineMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Average => write!(f, "Average"),
            Self::Median => write!(f, "Median"),
            Self::KappaSigma { .. } => write!(f, "Kappa-Sigma"),
            Self::MedianKappaSigma { .. } => write!(f, "Median Kappa-Sigma"),
            Self::AutoAdaptive { .. } => write!(f, "Auto-Adaptive Weighted Average"),
            Self::EntropyWeighted => write!(f, "Entropy Weighted Average"),
        }
    }
}

/// Combine one column of samples. `values` is scratch space and may be
/// reordered. `EntropyWeighted` needs per-sample weights and is handled
/// by [`entropy_weighted`]; called through here it degrades to uniform
/// weights, i.e. a plain average.
pub fn combine_column(values: &mut [f32], method: CombineMethod) -> f32 {
    match method {
        CombineMethod::Average => mean(values),
        CombineMethod::Median => median(values),
        CombineMethod::KappaSigma { kappa, iterations } => {
            kappa_sigma_clip(values, kappa, iterations, false)
        }
        CombineMethod::MedianKappaSigma { kappa, iterations } => {
            kappa_sigma_clip(values, kappa, iterations, true)
        }
        CombineMethod::AutoAdaptive { iterations } => auto_adaptive(values, iterations),
        CombineMethod::EntropyWeighted => mean(values),
    }
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// O(n) median via `select_nth_unstable`, no full sort.
pub fn median(values: &mut [f32]) -> f32 {
    let n = values.len();
    match n {
        0 => 0.0,
        1 => values[0],
        _ if n % 2 == 1 => {
            let mid = n / 2;
            *values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b)).1
        }
        _ => {
            let mid = n / 2;
            values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            values[..mid].select_nth_unstable_by(mid - 1, |a, b| a.total_cmp(b));
            (values[mid - 1] + values[mid]) / 2.0
        }
    }
}

/// Iterative kappa-sigma clipping.
///
/// Each round computes the center statistic (mean, or median when
/// `median_center`) and standard deviation of the surviving samples, then
/// drops samples outside `center +/- kappa * stddev`. With
/// `iterations = 0` no sample is ever dropped and the result is the
/// plain average.
pub fn kappa_sigma_clip(values: &mut [f32], kappa: f32, iterations: usize, median_center: bool) -> f32 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let mut mask = vec![true; n];

    for _ in 0..iterations {
        let center = if median_center {
            masked_median(values, &mask)
        } else {
            masked_mean_stddev(values, &mask).0
        };
        let stddev = masked_stddev_about(values, &mask, center);
        if stddev < EPSILON {
            break;
        }
        let lo = center - kappa * stddev;
        let hi = center + kappa * stddev;
        let mut changed = false;
        for i in 0..n {
            if mask[i] && (values[i] < lo || values[i] > hi) {
                mask[i] = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let (final_sum, count) = masked_sum_count(values, &mask);
    if count > 0 {
        final_sum / count as f32
    } else {
        // All samples rejected: fall back to the full mean.
        mean(values)
    }
}

/// Auto-adaptive weighted average as a fixed-point iteration.
///
/// Starting from the plain mean, each round reweights every sample by
/// `1 / (1 + ((x - estimate)^2 / variance))` and recomputes the weighted
/// mean, pulling the estimate toward the consensus. Terminates after
/// `iterations` rounds or as soon as the column variance vanishes.
pub fn auto_adaptive(values: &[f32], iterations: usize) -> f32 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let mut estimate = mean(values);

    for _ in 0..iterations {
        let variance = values
            .iter()
            .map(|v| {
                let d = v - estimate;
                d * d
            })
            .sum::<f32>()
            / n as f32;
        if variance < EPSILON {
            break;
        }
        let mut weighted = 0.0f32;
        let mut total = 0.0f32;
        for &v in values {
            let d = v - estimate;
            let w = 1.0 / (1.0 + d * d / variance);
            weighted += w * v;
            total += w;
        }
        if total < EPSILON {
            break;
        }
        estimate = weighted / total;
    }
    estimate
}

/// Entropy-weighted average of one column given per-sample weights.
/// Falls back to the plain mean when all weights vanish.
pub fn entropy_weighted(values: &[f32], weights: &[f32]) -> f32 {
    debug_assert_eq!(values.len(), weights.len());
    let mut weighted = 0.0f32;
    let mut total = 0.0f32;
    for (&v, &w) in values.iter().zip(weights) {
        weighted += w * v;
        total += w;
    }
    if total > EPSILON {
        weighted / total
    } else {
        mean(values)
    }
}

/// Tiled Shannon-entropy map of one image plane.
///
/// The plane is cut into square windows of `2 * window + 1` pixels; each
/// window's samples are quantized into a histogram and its entropy
/// computed. A sample's combine weight is `1 / (1 + entropy)`, so flat,
/// low-noise regions weigh more than busy ones.
#[derive(Clone, Debug)]
pub struct EntropyMap {
    squares: Array2<f32>,
    window: usize,
}

impl EntropyMap {
    pub fn from_plane(plane: &ndarray::ArrayView2<f32>) -> Self {
        let window = ENTROPY_WINDOW;
        let side = 2 * window + 1;
        let (h, w) = plane.dim();
        let rows = h.div_ceil(side).max(1);
        let cols = w.div_ceil(side).max(1);
        let mut squares = Array2::<f32>::zeros((rows, cols));

        let mut histogram = [0u32; ENTROPY_BINS];
        for sq_row in 0..rows {
            for sq_col in 0..cols {
                let r0 = sq_row * side;
                let c0 = sq_col * side;
                let r1 = (r0 + side).min(h);
                let c1 = (c0 + side).min(w);

                histogram.fill(0);
                let mut count = 0u32;
                for r in r0..r1 {
                    for c in c0..c1 {
                        let v = plane[[r, c]].clamp(0.0, 1.0);
                        let bin = ((v * (ENTROPY_BINS - 1) as f32).round() as usize)
                            .min(ENTROPY_BINS - 1);
                        histogram[bin] += 1;
                        count += 1;
                    }
                }

                let mut entropy = 0.0f32;
                if count > 0 {
                    for &bin in &histogram {
                        if bin > 0 {
                            let p = bin as f32 / count as f32;
                            entropy -= p * p.log2();
                        }
                    }
                }
                squares[[sq_row, sq_col]] = entropy;
            }
        }

        Self { squares, window }
    }

    /// Combine weight for the sample at (row, col).
    pub fn weight_at(&self, row: usize, col: usize) -> f32 {
        let side = 2 * self.window + 1;
        let (rows, cols) = self.squares.dim();
        let sq_row = (row / side).min(rows - 1);
        let sq_col = (col / side).min(cols - 1);
        1.0 / (1.0 + self.squares[[sq_row, sq_col]])
    }
}

fn masked_sum_count(values: &[f32], mask: &[bool]) -> (f32, u32) {
    let mut sum = 0.0f32;
    let mut count = 0u32;
    for (i, &v) in values.iter().enumerate() {
        if mask[i] {
            sum += v;
            count += 1;
        }
    }
    (sum, count)
}

fn masked_mean_stddev(values: &[f32], mask: &[bool]) -> (f32, f32) {
    let (sum, count) = masked_sum_count(values, mask);
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f32;
    (mean, masked_stddev_about(values, mask, mean))
}

fn masked_stddev_about(values: &[f32], mask: &[bool], center: f32) -> f32 {
    let mut var_sum = 0.0f32;
    let mut count = 0u32;
    for (i, &v) in values.iter().enumerate() {
        if mask[i] {
            let d = v - center;
            var_sum += d * d;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        (var_sum / count as f32).sqrt()
    }
}

fn masked_median(values: &[f32], mask: &[bool]) -> f32 {
    let mut survivors: Vec<f32> = values
        .iter()
        .zip(mask)
        .filter(|(_, &m)| m)
        .map(|(&v, _)| v)
        .collect();
    median(&mut survivors)
}
