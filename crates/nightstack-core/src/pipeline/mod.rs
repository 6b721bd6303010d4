//! Live stacking pipeline: classification, configuration, coordination.

pub mod classify;
pub mod config;
pub mod coordinator;

pub use config::PipelineConfig;
pub use coordinator::PipelineCoordinator;
