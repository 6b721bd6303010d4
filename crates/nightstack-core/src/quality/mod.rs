//! Per-frame quality: scoring and the admission gate.

pub mod gate;
pub mod metrics;
