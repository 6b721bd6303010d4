//! Star detection on the luminance plane.
//!
//! Pipeline per frame:
//! 1. Robust background (median) and noise (MAD) estimate
//! 2. Threshold at `background + sigma * noise`
//! 3. Local-maximum candidate scan
//! 4. Half-maximum radius walk for FWHM, flux integration, sub-pixel centroid
//! 5. Saturation / minimum-size rejection, brightest-first cap

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_DETECTION_SIGMA, EPSILON, MAX_STARS_PER_FRAME, MIN_STAR_FWHM, SATURATION_LEVEL,
    STAR_MAX_RADIUS,
};

/// A detected star. Immutable once the frame's star list is built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Star {
    /// Sub-pixel centroid column.
    pub x: f64,
    /// Sub-pixel centroid row.
    pub y: f64,
    /// Integrated background-subtracted flux.
    pub flux: f64,
    /// Full width at half maximum, pixels.
    pub fwhm: f64,
    /// Peak sample value, normalized [0, 1].
    pub peak: f32,
}

/// Stars detected in one frame, ordered by flux descending.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StarList {
    pub stars: Vec<Star>,
    /// Robust sky background estimate, normalized [0, 1].
    pub background: f32,
    /// Robust noise estimate (1.4826 * MAD), normalized.
    pub noise: f32,
}

impl StarList {
    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    /// Median FWHM across detected stars, 0.0 when empty.
    pub fn median_fwhm(&self) -> f64 {
        if self.stars.is_empty() {
            return 0.0;
        }
        let mut widths: Vec<f64> = self.stars.iter().map(|s| s.fwhm).collect();
        let mid = widths.len() / 2;
        widths.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        if widths.len() % 2 == 1 {
            widths[mid]
        } else {
            let lo = widths[..mid]
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);
            (lo + widths[mid]) / 2.0
        }
    }
}

/// Star-detection tuning parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Detection threshold in noise sigmas above the background.
    pub sigma: f32,
    /// Smallest FWHM accepted as a star (hot-pixel filter).
    pub min_fwhm: f64,
    /// Maximum stars retained, brightest first.
    pub max_stars: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_DETECTION_SIGMA,
            min_fwhm: MIN_STAR_FWHM as f64,
            max_stars: MAX_STARS_PER_FRAME,
        }
    }
}

/// Median and MAD-derived noise of a luminance plane.
pub fn background_noise(plane: &Array2<f32>) -> (f32, f32) {
    let mut samples: Vec<f32> = plane.iter().cloned().collect();
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let median = median_in_place(&mut samples);
    let mut deviations: Vec<f32> = samples.iter().map(|v| (v - median).abs()).collect();
    let mad = median_in_place(&mut deviations);
    (median, 1.4826 * mad)
}

fn median_in_place(values: &mut [f32]) -> f32 {
    let n = values.len();
    let mid = n / 2;
    values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    if n % 2 == 1 {
        values[mid]
    } else {
        let lo = values[..mid].iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        (lo + values[mid]) / 2.0
    }
}

/// Detect stars in a luminance plane.
pub fn detect_stars(plane: &Array2<f32>, params: &DetectionParams) -> StarList {
    let (h, w) = plane.dim();
    let (background, noise) = background_noise(plane);
    let threshold = background + params.sigma * noise.max(EPSILON);

    let mut candidates: Vec<Star> = Vec::new();
    let margin = 2;
    if h <= 2 * margin || w <= 2 * margin {
        return StarList {
            stars: candidates,
            background,
            noise,
        };
    }

    for row in margin..h - margin {
        for col in margin..w - margin {
            let v = plane[[row, col]];
            if v < threshold || !is_local_max(plane, row, col, v) {
                continue;
            }
            if v >= SATURATION_LEVEL {
                continue;
            }
            if let Some(star) = measure_star(plane, row, col, v, background) {
                if star.fwhm >= params.min_fwhm {
                    candidates.push(star);
                }
            }
        }
    }

    // Brightest wins within its own exclusion radius.
    candidates.sort_by(|a, b| b.flux.total_cmp(&a.flux));
    let mut stars: Vec<Star> = Vec::new();
    for cand in candidates {
        let too_close = stars.iter().any(|s| {
            let dx = s.x - cand.x;
            let dy = s.y - cand.y;
            (dx * dx + dy * dy).sqrt() < (s.fwhm + cand.fwhm).max(2.0)
        });
        if !too_close {
            stars.push(cand);
            if stars.len() >= params.max_stars {
                break;
            }
        }
    }

    StarList {
        stars,
        background,
        noise,
    }
}

fn is_local_max(plane: &Array2<f32>, row: usize, col: usize, v: f32) -> bool {
    for dr in -1i64..=1 {
        for dc in -1i64..=1 {
            if dr == 0 && dc == 0 {
                continue;
            }
            let r = (row as i64 + dr) as usize;
            let c = (col as i64 + dc) as usize;
            if plane[[r, c]] > v {
                return false;
            }
        }
    }
    true
}

/// Walk rings outward from the peak until the ring mean drops below half
/// of the background-subtracted peak; the crossing radius gives the FWHM.
fn measure_star(
    plane: &Array2<f32>,
    row: usize,
    col: usize,
    peak: f32,
    background: f32,
) -> Option<Star> {
    let (h, w) = plane.dim();
    let amplitude = peak - background;
    if amplitude <= EPSILON {
        return None;
    }
    let half = background + amplitude / 2.0;

    let mut half_radius = None;
    let mut prev_mean = peak;
    for radius in 1..=STAR_MAX_RADIUS {
        if row < radius || col < radius || row + radius >= h || col + radius >= w {
            break;
        }
        let ring = ring_mean(plane, row, col, radius);
        if ring <= half {
            // Linear interpolation between the previous ring and this one.
            let span = prev_mean - ring;
            let frac = if span > EPSILON {
                (prev_mean - half) / span
            } else {
                0.5
            };
            half_radius = Some(radius as f64 - 1.0 + frac as f64);
            break;
        }
        prev_mean = ring;
    }
    let half_radius = half_radius?;
    let fwhm = 2.0 * half_radius.max(0.5);

    // Integrate flux and centroid over a window of twice the half radius.
    let win = (2.0 * half_radius).ceil() as usize + 1;
    let r0 = row.saturating_sub(win);
    let r1 = (row + win + 1).min(h);
    let c0 = col.saturating_sub(win);
    let c1 = (col + win + 1).min(w);

    let mut flux = 0.0f64;
    let mut sum_r = 0.0f64;
    let mut sum_c = 0.0f64;
    for r in r0..r1 {
        for c in c0..c1 {
            let excess = (plane[[r, c]] - background).max(0.0) as f64;
            flux += excess;
            sum_r += r as f64 * excess;
            sum_c += c as f64 * excess;
        }
    }
    if flux <= EPSILON as f64 {
        return None;
    }

    Some(Star {
        x: sum_c / flux,
        y: sum_r / flux,
        flux,
        fwhm,
        peak,
    })
}

fn ring_mean(plane: &Array2<f32>, row: usize, col: usize, radius: usize) -> f32 {
    // Eight compass samples at the given radius.
    let r = radius;
    let samples = [
        plane[[row - r, col]],
        plane[[row + r, col]],
        plane[[row, col - r]],
        plane[[row, col + r]],
        plane[[row - r, col - r]],
        plane[[row - r, col + r]],
        plane[[row + r, col - r]],
        plane[[row + r, col + r]],
    ];
    samples.iter().sum::<f32>() / samples.len() as f32
}
