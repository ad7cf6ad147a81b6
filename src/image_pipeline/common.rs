//! Common utilities module
//!
//! Error taxonomy and stage timing shared across the pipeline.

pub mod error;
pub mod timing;

pub use error::{
    AcquisitionError, CalibrationError, CaptureError, CompositionError, ConfigError, FrameError,
    OutputError, ProcessingError, ReaderError, Result,
};
pub use timing::{PipelineTimings, StepTiming, Timer};
