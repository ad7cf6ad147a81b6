//! Image processing pipeline module
//!
//! This module provides a structured approach to dual-sensor capture, with
//! separate modules for calibration, lens and perspective correction,
//! composition, RAW reading, TIFF writing, and capture orchestration.

pub mod calibration;
pub mod capture;
pub mod common;
pub mod composite;
pub mod config;
pub mod correction;
pub mod frame;
pub mod raw;
pub mod tiff;

pub use common::{
    AcquisitionError, CalibrationError, CaptureError, CompositionError, ConfigError, FrameError,
    OutputError, PipelineTimings, ProcessingError, ReaderError, Result,
};

pub use calibration::{CalibrationProfile, CalibrationSet, CalibrationStore};

pub use frame::{BorderPolicy, CameraId, Image, PixelFormat, RawFrame};

pub use correction::{
    CorrectedFrame, CorrectionConfig, CorrectionConfigBuilder, DistortionCorrector,
    PerspectiveCorrector,
};

pub use composite::{
    BlendCurve, CompositeArtifact, CompositorConfig, CompositorConfigBuilder, FrameCompositor,
    Layout,
};

pub use capture::{
    ArtifactKind, CameraSource, CancelToken, CaptureConfig, CaptureConfigBuilder,
    CaptureOrchestrator, CapturePairResult, CaptureState, CaptureStatus, DirectorySink,
    NamingConvention, ReplayCamera, StorageSink,
};

pub use config::PipelineConfig;

pub use raw::{RawImageReader, RawLoaderReader};

pub use tiff::{
    EncodingConfig, EncodingConfigBuilder, StandardTiffWriter, TiffCompression, TiffWriter,
};
