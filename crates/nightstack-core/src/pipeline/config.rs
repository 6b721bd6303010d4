use serde::{Deserialize, Serialize};

use crate::frame::FrameType;
use crate::quality::gate::Thresholds;
use crate::register::RegistrationParams;
use crate::stack::combine::CombineMethod;

use super::classify::ClassifierConfig;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub registration: RegistrationParams,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub stacking: StackingConfig,
    #[serde(default)]
    pub masters: MasterConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
}

/// Combine method for the running light stack.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct StackingConfig {
    #[serde(default)]
    pub method: CombineMethod,
}

/// Combine method per master type, plus the batch size that triggers an
/// automatic master build.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MasterConfig {
    pub dark: CombineMethod,
    pub dark_flat: CombineMethod,
    pub flat: CombineMethod,
    pub offset: CombineMethod,
    /// Minimum batch size before a master is built.
    pub min_batch: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            dark: CombineMethod::kappa_sigma(),
            dark_flat: CombineMethod::kappa_sigma(),
            flat: CombineMethod::Median,
            offset: CombineMethod::Median,
            min_batch: 3,
        }
    }
}

impl MasterConfig {
    pub fn method_for(&self, frame_type: FrameType) -> CombineMethod {
        match frame_type {
            FrameType::Dark => self.dark,
            FrameType::DarkFlat => self.dark_flat,
            FrameType::Flat => self.flat,
            FrameType::Offset => self.offset,
            FrameType::Light => CombineMethod::Average,
        }
    }
}

/// Bounded worker pool for concurrent registration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Registration worker threads. Zero means one worker.
    pub registration_threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            registration_threads: 2,
        }
    }
}
