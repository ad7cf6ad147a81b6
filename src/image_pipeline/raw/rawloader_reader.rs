//! RAW image reader implementation using the rawloader library.
//!
//! Supports every format rawloader can decode (DNG, ARW, CR2, NEF, ...).
//! Single-sample images become Bayer mosaics with the file's CFA, three-sample
//! images become RGB.

use std::io::Cursor;

use chrono::Local;
use rawloader::RawImageData as RawloaderImageData;
use tracing::{debug, warn};

use crate::image_pipeline::common::error::ReaderError;
use crate::image_pipeline::frame::{
    CameraId, Cfa, FrameDescriptor, PixelData, PixelFormat, RawFrame,
};
use crate::image_pipeline::raw::reader::RawImageReader;

/// RAW image reader that uses the rawloader library for decoding.
pub struct RawLoaderReader;

/// Default bit depth when no white level information is available from the RAW file.
const DEFAULT_BITS_PER_SAMPLE: u8 = 16;

/// The bit width of the u16 data type, used for calculating actual bits per sample.
const U16_BITS: u32 = 16;

/// Significant bits implied by the sensor's white level
/// (4095 -> 12 bits, 16383 -> 14 bits).
fn bits_from_white_level(white_levels: &[u16]) -> u8 {
    match white_levels.iter().max().copied() {
        None | Some(0) => DEFAULT_BITS_PER_SAMPLE,
        Some(max) => (U16_BITS - max.leading_zeros()) as u8,
    }
}

impl RawImageReader for RawLoaderReader {
    fn read_raw(&self, data: &[u8], camera: CameraId) -> Result<RawFrame, ReaderError> {
        debug!(%camera, "Decoding RAW image, {} bytes", data.len());

        let decoded = rawloader::decode(&mut Cursor::new(data))
            .map_err(|e| ReaderError::DecodeError(e.to_string()))?;

        let (width, height) = (decoded.width, decoded.height);
        debug!("Decoded image: {}x{}, {} sample(s) per pixel", width, height, decoded.cpp);

        // Integer data is cast directly, float data (normalized 0.0-1.0) is scaled to u16 range
        let samples: Vec<u16> = match decoded.data {
            RawloaderImageData::Integer(values) => values.iter().map(|&v| v as u16).collect(),
            RawloaderImageData::Float(values) => values
                .iter()
                .map(|&v| (v.clamp(0.0, 1.0) * u16::MAX as f32) as u16)
                .collect(),
        };

        let bit_depth = bits_from_white_level(&decoded.whitelevels);
        let format = match decoded.cpp {
            1 => match Cfa::from_pattern(&decoded.cfa.name) {
                Some(cfa) => PixelFormat::Bayer16 { cfa, bit_depth },
                None => {
                    warn!(pattern = %decoded.cfa.name, "Unrecognized CFA, reading as monochrome");
                    PixelFormat::Mono16 { bit_depth }
                }
            },
            3 => PixelFormat::Rgb16 { bit_depth },
            other => {
                return Err(ReaderError::UnsupportedFormat(format!(
                    "{other} samples per pixel"
                )));
            }
        };
        debug!(%format, "Calculated bits_per_sample: {}", bit_depth);

        Ok(RawFrame::new(
            camera,
            Local::now(),
            FrameDescriptor::new(width, height, format),
            PixelData::U16(samples),
        )?)
    }
}
