use thiserror::Error;

use crate::frame::FrameType;

#[derive(Error, Debug)]
pub enum NightstackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "dimension mismatch: expected {expected_channels}x{expected_height}x{expected_width} \
         ({expected_bit_depth}-bit), got {actual_channels}x{actual_height}x{actual_width} \
         ({actual_bit_depth}-bit)"
    )]
    DimensionMismatch {
        expected_channels: usize,
        expected_height: usize,
        expected_width: usize,
        expected_bit_depth: u8,
        actual_channels: usize,
        actual_height: usize,
        actual_width: usize,
        actual_bit_depth: u8,
    },

    #[error("a master {0} frame is already present for this slot")]
    MultipleMasterFrames(FrameType),

    #[error("empty frame sequence")]
    EmptySequence,

    #[error("invalid accumulator state: {0}")]
    InvalidState(String),

    #[error("invalid stack snapshot: {0}")]
    Snapshot(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),
}

pub type Result<T> = std::result::Result<T, NightstackError>;
