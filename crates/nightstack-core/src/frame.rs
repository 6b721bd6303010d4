use std::path::PathBuf;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::consts::{LUMINANCE_B, LUMINANCE_G, LUMINANCE_R};
use crate::quality::gate::RejectionKind;
use crate::quality::metrics::QualityMetrics;
use crate::register::solve::Transform;
use crate::register::RegistrationFailure;

/// A decoded image buffer.
/// Samples are f32 normalized to [0.0, 1.0], shape = (channels, height, width).
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    pub data: Array3<f32>,
    /// Original bit depth before normalization (8, 16 or 32).
    pub bit_depth: u8,
}

impl PixelBuffer {
    pub fn new(data: Array3<f32>, bit_depth: u8) -> Self {
        Self { data, bit_depth }
    }

    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    /// (channels, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// True when both buffers have identical geometry and bit depth.
    pub fn same_geometry(&self, other: &PixelBuffer) -> bool {
        self.dim() == other.dim() && self.bit_depth == other.bit_depth
    }

    /// Luminance projection. Single-channel data is returned as-is;
    /// 3-channel data uses BT.601 weights; anything else averages channels.
    pub fn luminance(&self) -> Array2<f32> {
        let (c, h, w) = self.dim();
        match c {
            1 => self.data.index_axis(ndarray::Axis(0), 0).to_owned(),
            3 => {
                let mut out = Array2::<f32>::zeros((h, w));
                for row in 0..h {
                    for col in 0..w {
                        out[[row, col]] = LUMINANCE_R * self.data[[0, row, col]]
                            + LUMINANCE_G * self.data[[1, row, col]]
                            + LUMINANCE_B * self.data[[2, row, col]];
                    }
                }
                out
            }
            _ => {
                let mut out = Array2::<f32>::zeros((h, w));
                for ch in 0..c {
                    out += &self.data.index_axis(ndarray::Axis(0), ch);
                }
                out /= c as f32;
                out
            }
        }
    }

    /// Mean of all samples, used by the classifier heuristics.
    pub fn mean(&self) -> f32 {
        let n = self.data.len();
        if n == 0 {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / n as f32
    }
}

/// Closed set of frame kinds handled by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    Light,
    Dark,
    DarkFlat,
    Flat,
    Offset,
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => write!(f, "Light"),
            Self::Dark => write!(f, "Dark"),
            Self::DarkFlat => write!(f, "Dark Flat"),
            Self::Flat => write!(f, "Flat"),
            Self::Offset => write!(f, "Offset"),
        }
    }
}

/// Colour-filter-array layout of the sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfaPattern {
    None,
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

/// Capture metadata attached to every incoming frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub exposure_seconds: f64,
    pub iso_gain: Option<u32>,
    pub aperture: Option<f64>,
    /// Capture time, microseconds since the Unix epoch.
    pub timestamp_us: Option<u64>,
    pub cfa: CfaPattern,
    pub bit_depth: u8,
}

impl Default for FrameMetadata {
    fn default() -> Self {
        Self {
            exposure_seconds: 0.0,
            iso_gain: None,
            aperture: None,
            timestamp_us: None,
            cfa: CfaPattern::None,
            bit_depth: 16,
        }
    }
}

/// An incoming frame: identity, decoded pixels, and metadata.
/// Pipeline stages attach derived data; the buffer is released once the
/// frame reaches a terminal outcome.
#[derive(Clone, Debug)]
pub struct FrameRecord {
    pub path: PathBuf,
    pub frame_type: Option<FrameType>,
    pub buffer: PixelBuffer,
    pub metadata: FrameMetadata,
}

impl FrameRecord {
    pub fn new(path: impl Into<PathBuf>, buffer: PixelBuffer, metadata: FrameMetadata) -> Self {
        Self {
            path: path.into(),
            frame_type: None,
            buffer,
            metadata,
        }
    }

    /// Attach an explicit frame-type hint (e.g. from the watched-folder kind).
    pub fn with_hint(mut self, frame_type: FrameType) -> Self {
        self.frame_type = Some(frame_type);
        self
    }
}

/// Why a light frame was excluded from the stack.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RejectionReason {
    Registration(RegistrationFailure),
    Quality {
        kind: RejectionKind,
        measured: f64,
        threshold: f64,
    },
    /// Calibration or stacking refused the frame (e.g. a geometry
    /// mismatch against the running stack).
    Structural(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registration(failure) => write!(f, "{failure}"),
            Self::Quality {
                kind,
                measured,
                threshold,
            } => write!(f, "{kind} (measured {measured:.2}, threshold {threshold:.2})"),
            Self::Structural(message) => write!(f, "{message}"),
        }
    }
}

/// Terminal state of a frame. Each frame reaches exactly one of these.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FrameOutcome {
    Stacked {
        metrics: QualityMetrics,
        transform: Transform,
        stack_frame_count: usize,
    },
    Rejected {
        reason: RejectionReason,
        metrics: Option<QualityMetrics>,
    },
    MasterSource {
        frame_type: FrameType,
    },
}

/// Structured per-frame record emitted to the shell's logging collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Discovery sequence number of the frame.
    pub sequence: u64,
    pub path: PathBuf,
    pub outcome: FrameOutcome,
}
