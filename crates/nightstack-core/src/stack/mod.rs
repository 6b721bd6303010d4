//! Alignment resampling and incremental stacking.

pub mod accum;
pub mod combine;
pub mod resample;
