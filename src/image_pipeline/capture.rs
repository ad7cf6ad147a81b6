//! Capture module
//!
//! Drives the two camera sources through one capture event: concurrent
//! acquisition with per-source timeouts and retries, correction and
//! composition, and persistence of the raw pair and the composite.

mod orchestrator;
mod source;
pub mod storage;
pub mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::CaptureOrchestrator;
pub use source::{CameraSource, ReplayCamera};
pub use storage::{ArtifactKind, DirectorySink, NamingConvention, StorageSink};
pub use types::{
    CancelToken, CaptureConfig, CaptureConfigBuilder, CapturePairResult, CaptureState,
    CaptureStatus, StoredArtifact,
};
