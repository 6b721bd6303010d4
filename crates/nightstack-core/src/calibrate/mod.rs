//! Master-frame synthesis and light-frame calibration.

pub mod apply;
pub mod master;
