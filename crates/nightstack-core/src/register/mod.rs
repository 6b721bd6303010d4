//! Frame registration: star detection, quality metrics, transform solving.

pub mod detect;
pub mod solve;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::frame::PixelBuffer;
use crate::quality::metrics::{QualityMetrics, ScoreParams};
use detect::{detect_stars, DetectionParams, StarList};
use solve::{solve_transform, Transform};

/// Why a frame could not be registered. Never fatal to the pipeline:
/// the frame is retained for logging and marked non-stackable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RegistrationFailure {
    #[error("no stars found")]
    NoStarsFound,
    #[error("no transform found against the reference frame")]
    NoTransformFound,
    #[error("registration cancelled")]
    Cancelled,
}

/// Cooperative cancellation flag, checked between registration stages.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Registration tuning: detection parameters plus the score weighting.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct RegistrationParams {
    #[serde(default)]
    pub detection: DetectionParams,
    #[serde(default)]
    pub score: ScoreParams,
}

/// Successful registration of a single frame.
#[derive(Clone, Debug)]
pub struct Registration {
    pub stars: StarList,
    pub metrics: QualityMetrics,
    pub transform: Transform,
}

/// Register a frame: detect stars, derive quality metrics, and solve the
/// transform against the reference star list. The first accepted light
/// frame passes `reference = None` and gets the identity transform.
pub fn register(
    frame: &PixelBuffer,
    reference: Option<&StarList>,
    params: &RegistrationParams,
    cancel: &CancelToken,
) -> Result<Registration, RegistrationFailure> {
    if cancel.is_cancelled() {
        return Err(RegistrationFailure::Cancelled);
    }
    let plane = frame.luminance();

    if cancel.is_cancelled() {
        return Err(RegistrationFailure::Cancelled);
    }
    let stars = detect_stars(&plane, &params.detection);
    if stars.is_empty() {
        return Err(RegistrationFailure::NoStarsFound);
    }
    let metrics = QualityMetrics::from_stars(&stars, &params.score);
    debug!(
        stars = stars.len(),
        score = metrics.score,
        fwhm = metrics.fwhm,
        background = metrics.sky_background_percent,
        "frame registered"
    );

    if cancel.is_cancelled() {
        return Err(RegistrationFailure::Cancelled);
    }
    let transform = match reference {
        None => Transform::identity(),
        Some(reference) => {
            solve_transform(&stars, reference).ok_or(RegistrationFailure::NoTransformFound)?
        }
    };

    Ok(Registration {
        stars,
        metrics,
        transform,
    })
}
