//! Frame types exchanged between camera sources and the correction chain

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::image_pipeline::common::error::FrameError;

/// One of the two fixed-mount sensors. `Cam0` is the left/top sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraId {
    Cam0,
    Cam1,
}

impl CameraId {
    pub const BOTH: [CameraId; 2] = [CameraId::Cam0, CameraId::Cam1];

    pub fn index(self) -> usize {
        match self {
            CameraId::Cam0 => 0,
            CameraId::Cam1 => 1,
        }
    }

    pub fn other(self) -> CameraId {
        match self {
            CameraId::Cam0 => CameraId::Cam1,
            CameraId::Cam1 => CameraId::Cam0,
        }
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cam{}", self.index())
    }
}

/// Colour filter array layout of a Bayer mosaic, named from the top-left 2x2 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cfa {
    Rggb,
    Bggr,
    Grbg,
    Gbrg,
}

impl Cfa {
    pub fn from_pattern(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "RGGB" => Some(Cfa::Rggb),
            "BGGR" => Some(Cfa::Bggr),
            "GRBG" => Some(Cfa::Grbg),
            "GBRG" => Some(Cfa::Gbrg),
            _ => None,
        }
    }
}

/// Supported sensor output layouts.
///
/// Anything a sensor produces must map onto one of these at the
/// [`RawFrame::new`] boundary; later stages rely on the layout being known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Mono8,
    Mono16 { bit_depth: u8 },
    Rgb8,
    Rgb16 { bit_depth: u8 },
    Bayer8 { cfa: Cfa },
    Bayer16 { cfa: Cfa, bit_depth: u8 },
}

impl PixelFormat {
    /// Samples stored per pixel in the raw buffer. Bayer mosaics carry one.
    pub fn samples_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Rgb16 { .. } => 3,
            _ => 1,
        }
    }

    pub fn bit_depth(self) -> u8 {
        match self {
            PixelFormat::Mono8 | PixelFormat::Rgb8 | PixelFormat::Bayer8 { .. } => 8,
            PixelFormat::Mono16 { bit_depth }
            | PixelFormat::Rgb16 { bit_depth }
            | PixelFormat::Bayer16 { bit_depth, .. } => bit_depth,
        }
    }

    /// Width of the storage container: 8 or 16 bits.
    pub fn container_bits(self) -> u8 {
        match self {
            PixelFormat::Mono8 | PixelFormat::Rgb8 | PixelFormat::Bayer8 { .. } => 8,
            _ => 16,
        }
    }

    pub fn is_mosaic(self) -> bool {
        matches!(self, PixelFormat::Bayer8 { .. } | PixelFormat::Bayer16 { .. })
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Mono8 => write!(f, "mono8"),
            PixelFormat::Mono16 { bit_depth } => write!(f, "mono16({bit_depth}-bit)"),
            PixelFormat::Rgb8 => write!(f, "rgb8"),
            PixelFormat::Rgb16 { bit_depth } => write!(f, "rgb16({bit_depth}-bit)"),
            PixelFormat::Bayer8 { cfa } => write!(f, "bayer8({cfa:?})"),
            PixelFormat::Bayer16 { cfa, bit_depth } => write!(f, "bayer16({cfa:?}, {bit_depth}-bit)"),
        }
    }
}

/// Raw sample storage, sized to the format's container.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl PixelData {
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn container_bits(&self) -> u8 {
        match self {
            PixelData::U8(_) => 8,
            PixelData::U16(_) => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
}

impl FrameDescriptor {
    pub fn new(width: usize, height: usize, format: PixelFormat) -> Self {
        Self { width, height, format }
    }

    pub fn sample_count(&self) -> usize {
        self.width * self.height * self.format.samples_per_pixel()
    }
}

/// An unmodified sensor capture.
///
/// Fields are private so a frame that exists has passed boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    camera: CameraId,
    captured_at: DateTime<Local>,
    descriptor: FrameDescriptor,
    data: PixelData,
}

impl RawFrame {
    pub fn new(
        camera: CameraId,
        captured_at: DateTime<Local>,
        descriptor: FrameDescriptor,
        data: PixelData,
    ) -> Result<Self, FrameError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(FrameError::InvalidDimensions(descriptor.width, descriptor.height));
        }

        let format = descriptor.format;
        let bit_depth = format.bit_depth();
        if bit_depth == 0 || bit_depth > 16 {
            return Err(FrameError::BitDepth(bit_depth));
        }

        if data.container_bits() != format.container_bits() {
            return Err(FrameError::SampleContainer {
                format: format.to_string(),
                expected: format.container_bits(),
            });
        }

        let expected = descriptor.sample_count();
        if data.len() != expected {
            return Err(FrameError::BufferLength {
                expected,
                found: data.len(),
            });
        }

        Ok(Self {
            camera,
            captured_at,
            descriptor,
            data,
        })
    }

    pub fn camera(&self) -> CameraId {
        self.camera
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }

    pub fn width(&self) -> usize {
        self.descriptor.width
    }

    pub fn height(&self) -> usize {
        self.descriptor.height
    }

    pub fn format(&self) -> PixelFormat {
        self.descriptor.format
    }

    pub fn data(&self) -> &PixelData {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono16(width: usize, height: usize, samples: usize) -> Result<RawFrame, FrameError> {
        RawFrame::new(
            CameraId::Cam0,
            Local::now(),
            FrameDescriptor::new(width, height, PixelFormat::Mono16 { bit_depth: 12 }),
            PixelData::U16(vec![0; samples]),
        )
    }

    #[test]
    fn accepts_consistent_frame() {
        let frame = mono16(4, 3, 12).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.format().bit_depth(), 12);
    }

    #[test]
    fn rejects_short_buffer() {
        let err = mono16(4, 3, 11).unwrap_err();
        assert_eq!(err, FrameError::BufferLength { expected: 12, found: 11 });
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(matches!(mono16(0, 3, 0), Err(FrameError::InvalidDimensions(0, 3))));
    }

    #[test]
    fn rejects_wrong_container() {
        let err = RawFrame::new(
            CameraId::Cam1,
            Local::now(),
            FrameDescriptor::new(2, 2, PixelFormat::Rgb8),
            PixelData::U16(vec![0; 12]),
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::SampleContainer { expected: 8, .. }));
    }

    #[test]
    fn rejects_oversized_bit_depth() {
        let err = RawFrame::new(
            CameraId::Cam0,
            Local::now(),
            FrameDescriptor::new(2, 2, PixelFormat::Bayer16 { cfa: Cfa::Rggb, bit_depth: 20 }),
            PixelData::U16(vec![0; 4]),
        )
        .unwrap_err();
        assert_eq!(err, FrameError::BitDepth(20));
    }

    #[test]
    fn camera_labels() {
        assert_eq!(CameraId::Cam0.to_string(), "cam0");
        assert_eq!(CameraId::Cam1.other(), CameraId::Cam0);
        assert_eq!(Cfa::from_pattern("grbg"), Some(Cfa::Grbg));
    }
}
