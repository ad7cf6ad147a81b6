use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::image_pipeline::frame::CameraId;

/// Rejections raised while building a [`RawFrame`](crate::image_pipeline::RawFrame).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("Invalid frame dimensions: width={0}, height={1}")]
    InvalidDimensions(usize, usize),

    #[error("Pixel buffer holds {found} samples, descriptor requires {expected}")]
    BufferLength { expected: usize, found: usize },

    #[error("Pixel format {format} expects {expected}-bit samples")]
    SampleContainer { format: String, expected: u8 },

    #[error("Bit depth {0} does not fit a 16-bit sample container")]
    BitDepth(u8),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Calibration source unreadable: {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("Calibration document is malformed: {0}")]
    Parse(String),

    #[error("Calibration for {0} is missing")]
    MissingCamera(CameraId),

    #[error("{camera}: {model} model expects {expected} coefficients, found {found}")]
    CoefficientCount {
        camera: CameraId,
        model: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{camera}: perspective matrix is not invertible ({reason})")]
    SingularHomography { camera: CameraId, reason: String },

    #[error("{camera}: crop {width}x{height}+{x}+{y} lies outside the {sensor_width}x{sensor_height} sensor")]
    CropOutOfRange {
        camera: CameraId,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        sensor_width: usize,
        sensor_height: usize,
    },

    #[error("{camera}: invalid {field}: {reason}")]
    InvalidValue {
        camera: CameraId,
        field: &'static str,
        reason: String,
    },

    #[error("Invalid sensor resolution {0}x{1}")]
    InvalidSensor(usize, usize),

    #[error("No calibration source configured for reload")]
    NoSource,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("Demosaic failed: {0}")]
    Demosaic(String),

    #[error("Degenerate transform: {0}")]
    DegenerateTransform(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositionError {
    #[error(
        "{layout} layout cannot reconcile {a_width}x{a_height} with {b_width}x{b_height} \
         (relative difference {difference:.3} exceeds tolerance {tolerance:.3})"
    )]
    IncompatibleDimensions {
        layout: &'static str,
        a_width: usize,
        a_height: usize,
        b_width: usize,
        b_height: usize,
        difference: f64,
        tolerance: f64,
    },

    #[error("{camera}: crop does not intersect the {width}x{height} frame")]
    EmptyCrop {
        camera: CameraId,
        width: usize,
        height: usize,
    },

    #[error("Frames differ in format: {a} vs {b}")]
    FormatMismatch { a: String, b: String },

    #[error("Blend overlap of {overlap}px exceeds frame width {width}px")]
    OverlapTooWide { overlap: usize, width: usize },
}

/// Failure of a single `request_frame` call on a camera source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("{camera} timed out after {timeout:?}")]
    Timeout { camera: CameraId, timeout: Duration },

    #[error("{camera} device error: {reason}")]
    Device { camera: CameraId, reason: String },

    #[error("{camera} returned an invalid frame: {source}")]
    InvalidFrame {
        camera: CameraId,
        #[source]
        source: FrameError,
    },
}

/// Terminal failure reason of one capture event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Partial capture: {failed} failed after {attempts} attempt(s): {cause}")]
    PartialCapture {
        failed: CameraId,
        attempts: u32,
        cause: AcquisitionError,
    },

    #[error("No frames captured: {cam0}; {cam1}")]
    NoFrames {
        cam0: AcquisitionError,
        cam1: AcquisitionError,
    },

    #[error("Processing failed: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Composition failed: {0}")]
    Composition(#[from] CompositionError),

    #[error("Capture cancelled before both frames arrived")]
    Cancelled,
}

/// Encoding or persistence failure for a single artifact.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to encode TIFF image: {0}")]
    EncodeError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config value: {0}")]
    Value(String),
}

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Failed to read input file: {0}")]
    InputReadError(String),

    #[error("Failed to decode RAW image: {0}")]
    DecodeError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub type Result<T, E = ProcessingError> = std::result::Result<T, E>;
