use serde::{Deserialize, Serialize};

use crate::quality::metrics::QualityMetrics;
use crate::register::solve::Transform;

/// Admission thresholds. Read at evaluation time; changing them never
/// re-evaluates previously admitted frames.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_score: f64,
    pub min_star_count: usize,
    pub max_fwhm: f64,
    pub max_sky_background_percent: f64,
    /// Largest admitted |dx| or |dy|, checked per axis.
    pub max_offset_pixels: f64,
    pub max_angle_degrees: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            min_star_count: 1,
            max_fwhm: 10.0,
            max_sky_background_percent: 50.0,
            max_offset_pixels: 500.0,
            max_angle_degrees: 5.0,
        }
    }
}

/// Which threshold a rejected frame violated. Ordered by check priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionKind {
    ScoreTooLow,
    StarCountTooLow,
    FwhmTooHigh,
    BackgroundTooHigh,
    OffsetTooHigh,
    AngleTooHigh,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScoreTooLow => write!(f, "score too low"),
            Self::StarCountTooLow => write!(f, "star count too low"),
            Self::FwhmTooHigh => write!(f, "FWHM too high"),
            Self::BackgroundTooHigh => write!(f, "sky background too high"),
            Self::OffsetTooHigh => write!(f, "offset too high"),
            Self::AngleTooHigh => write!(f, "angle too high"),
        }
    }
}

/// Gate decision for a registered frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    Stackable,
    Rejected {
        kind: RejectionKind,
        measured: f64,
        threshold: f64,
    },
}

/// Evaluate metrics and transform against the thresholds.
///
/// Checks run in a fixed priority order (score, star count, FWHM,
/// background, offset, angle); the first violation is reported. All
/// comparisons are inclusive: a value exactly on the threshold passes.
pub fn evaluate(metrics: &QualityMetrics, transform: &Transform, thresholds: &Thresholds) -> Verdict {
    if metrics.score < thresholds.min_score {
        return Verdict::Rejected {
            kind: RejectionKind::ScoreTooLow,
            measured: metrics.score,
            threshold: thresholds.min_score,
        };
    }
    if metrics.star_count < thresholds.min_star_count {
        return Verdict::Rejected {
            kind: RejectionKind::StarCountTooLow,
            measured: metrics.star_count as f64,
            threshold: thresholds.min_star_count as f64,
        };
    }
    if metrics.fwhm > thresholds.max_fwhm {
        return Verdict::Rejected {
            kind: RejectionKind::FwhmTooHigh,
            measured: metrics.fwhm,
            threshold: thresholds.max_fwhm,
        };
    }
    if metrics.sky_background_percent > thresholds.max_sky_background_percent {
        return Verdict::Rejected {
            kind: RejectionKind::BackgroundTooHigh,
            measured: metrics.sky_background_percent,
            threshold: thresholds.max_sky_background_percent,
        };
    }
    // Each translation axis is gated independently.
    let offset = transform.dx.abs().max(transform.dy.abs());
    if offset > thresholds.max_offset_pixels {
        return Verdict::Rejected {
            kind: RejectionKind::OffsetTooHigh,
            measured: offset,
            threshold: thresholds.max_offset_pixels,
        };
    }
    let angle = transform.angle_degrees.abs();
    if angle > thresholds.max_angle_degrees {
        return Verdict::Rejected {
            kind: RejectionKind::AngleTooHigh,
            measured: angle,
            threshold: thresholds.max_angle_degrees,
        };
    }
    Verdict::Stackable
}
