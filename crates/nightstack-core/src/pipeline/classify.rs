//! Frame classification from hints and capture metadata.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::frame::{FrameRecord, FrameType};

/// Heuristic cut-offs used when a frame arrives without an explicit hint.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Exposures at or below this are bias/offset frames (seconds).
    pub max_offset_exposure: f64,
    /// Mean sample level at or above this marks a flat.
    pub flat_mean_level: f32,
    /// Mean sample level at or below this marks a dark exposure.
    pub dark_mean_level: f32,
    /// Relative exposure tolerance when matching a dark to the flats
    /// (a dark within this fraction of the flat exposure is a dark-flat).
    pub flat_exposure_tolerance: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_offset_exposure: 0.001,
            flat_mean_level: 0.25,
            dark_mean_level: 0.05,
            flat_exposure_tolerance: 0.1,
        }
    }
}

/// Assigns each incoming frame to one of the five frame types.
///
/// An explicit hint (the shell knows which watched folder a file came
/// from) always wins; otherwise exposure time and signal level decide.
/// Ambiguous frames default to Light.
#[derive(Clone, Debug, Default)]
pub struct FrameClassifier {
    config: ClassifierConfig,
    flat_exposure: Option<f64>,
}

impl FrameClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            flat_exposure: None,
        }
    }

    pub fn classify(&mut self, record: &FrameRecord) -> FrameType {
        if let Some(hint) = record.frame_type {
            if hint == FrameType::Flat {
                self.flat_exposure = Some(record.metadata.exposure_seconds);
            }
            return hint;
        }

        let exposure = record.metadata.exposure_seconds;
        let mean = record.buffer.mean();

        let frame_type = if exposure <= self.config.max_offset_exposure {
            FrameType::Offset
        } else if mean >= self.config.flat_mean_level {
            self.flat_exposure = Some(exposure);
            FrameType::Flat
        } else if mean <= self.config.dark_mean_level {
            match self.flat_exposure {
                Some(flat_exposure)
                    if relative_match(exposure, flat_exposure, self.config.flat_exposure_tolerance) =>
                {
                    FrameType::DarkFlat
                }
                _ => FrameType::Dark,
            }
        } else {
            FrameType::Light
        };

        debug!(
            path = %record.path.display(),
            %frame_type,
            exposure,
            mean = f64::from(mean),
            "frame classified"
        );
        frame_type
    }
}

fn relative_match(a: f64, b: f64, tolerance: f64) -> bool {
    if b <= 0.0 {
        return false;
    }
    ((a - b) / b).abs() <= tolerance
}
