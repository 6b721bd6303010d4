use serde::{Deserialize, Serialize};

use crate::consts::EPSILON;
use crate::register::detect::StarList;

/// Weights for the frame quality score. The score is the sum over detected
/// stars of `count_weight + sharpness_weight / FWHM + flux_weight * peak`,
/// so it grows monotonically with star count, sharpness (inverse FWHM),
/// and signal strength.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ScoreParams {
    pub count_weight: f64,
    pub sharpness_weight: f64,
    pub flux_weight: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            count_weight: 1.0,
            sharpness_weight: 1.0,
            flux_weight: 1.0,
        }
    }
}

/// Pure function of a star list: the overall frame score.
pub fn score_stars(stars: &StarList, params: &ScoreParams) -> f64 {
    stars
        .stars
        .iter()
        .map(|s| {
            params.count_weight
                + params.sharpness_weight / s.fwhm.max(EPSILON as f64)
                + params.flux_weight * s.peak as f64
        })
        .sum()
}

/// Quality metrics attached to a registered frame.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub score: f64,
    pub star_count: usize,
    /// Median FWHM across detected stars, pixels.
    pub fwhm: f64,
    /// Sky background as a percentage of full scale.
    pub sky_background_percent: f64,
}

impl QualityMetrics {
    pub fn from_stars(stars: &StarList, params: &ScoreParams) -> Self {
        Self {
            score: score_stars(stars, params),
            star_count: stars.len(),
            fwhm: stars.median_fwhm(),
            sky_background_percent: stars.background as f64 * 100.0,
        }
    }
}
