//! Working image buffer shared by the correction and composition stages

use serde::{Deserialize, Serialize};

use crate::image_pipeline::common::error::ProcessingError;
use crate::image_pipeline::frame::demosaic;
use crate::image_pipeline::frame::types::{PixelData, PixelFormat, RawFrame};

/// What a resampler writes when the source location falls outside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderPolicy {
    /// Fill with zero (black).
    #[default]
    Black,
    /// Clamp to the nearest edge pixel.
    Replicate,
    /// Mirror about the edge pixel (`dcb|abcd|cba`).
    Reflect,
}

/// Tolerance for source locations landing a hair outside the last pixel centre.
const EDGE_EPS: f64 = 1e-6;

/// Interleaved `u16` image with one (mono) or three (RGB) channels.
///
/// `bit_depth` keeps the sensor's significant bits so values are never
/// rescaled on the way through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    channels: usize,
    bit_depth: u8,
    data: Vec<u16>,
}

impl Image {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        bit_depth: u8,
        data: Vec<u16>,
    ) -> Result<Self, ProcessingError> {
        if channels != 1 && channels != 3 {
            return Err(ProcessingError::UnsupportedFormat(format!(
                "{channels} channels"
            )));
        }
        if !(8..=16).contains(&bit_depth) {
            return Err(ProcessingError::UnsupportedFormat(format!(
                "{bit_depth}-bit samples"
            )));
        }
        if width == 0 || height == 0 || data.len() != width * height * channels {
            return Err(ProcessingError::UnsupportedFormat(format!(
                "{width}x{height}x{channels} image with {} samples",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            bit_depth,
            data,
        })
    }

    /// All-zero image.
    pub fn black(width: usize, height: usize, channels: usize, bit_depth: u8) -> Self {
        Self {
            width,
            height,
            channels,
            bit_depth,
            data: vec![0; width * height * channels],
        }
    }

    /// Builds an image from a per-sample generator `f(x, y, channel)`.
    pub fn from_fn<F>(width: usize, height: usize, channels: usize, bit_depth: u8, f: F) -> Self
    where
        F: Fn(usize, usize, usize) -> u16,
    {
        let mut data = Vec::with_capacity(width * height * channels);
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    data.push(f(x, y, c));
                }
            }
        }
        Self {
            width,
            height,
            channels,
            bit_depth,
            data,
        }
    }

    /// Normalizes a raw capture into the working layout.
    ///
    /// 8-bit samples are widened without scaling. Mosaics are demosaiced to
    /// RGB when `demosaic` is set and rejected otherwise.
    pub fn from_raw(frame: &RawFrame, demosaic: bool) -> Result<Self, ProcessingError> {
        let format = frame.format();
        let (width, height) = (frame.width(), frame.height());
        let bit_depth = format.bit_depth();
        if bit_depth < 8 {
            return Err(ProcessingError::UnsupportedFormat(format!(
                "{format}: fewer than 8 significant bits"
            )));
        }

        match (format, frame.data()) {
            (PixelFormat::Mono8 | PixelFormat::Rgb8, PixelData::U8(samples)) => Ok(Self {
                width,
                height,
                channels: format.samples_per_pixel(),
                bit_depth,
                data: samples.iter().map(|&v| v as u16).collect(),
            }),
            (PixelFormat::Mono16 { .. } | PixelFormat::Rgb16 { .. }, PixelData::U16(samples)) => {
                Ok(Self {
                    width,
                    height,
                    channels: format.samples_per_pixel(),
                    bit_depth,
                    data: samples.clone(),
                })
            }
            (PixelFormat::Bayer8 { cfa } | PixelFormat::Bayer16 { cfa, .. }, samples) => {
                if !demosaic {
                    return Err(ProcessingError::UnsupportedFormat(format!(
                        "{format}: mosaic input requires demosaicing"
                    )));
                }
                let rgb = demosaic::demosaic(samples, width, height, cfa, bit_depth)?;
                Ok(Self {
                    width,
                    height,
                    channels: 3,
                    bit_depth,
                    data: rgb,
                })
            }
            (format, _) => Err(ProcessingError::UnsupportedFormat(format.to_string())),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    pub fn data(&self) -> &[u16] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u16] {
        &mut self.data
    }

    pub fn max_value(&self) -> u16 {
        ((1u32 << self.bit_depth) - 1) as u16
    }

    pub fn row_len(&self) -> usize {
        self.width * self.channels
    }

    pub fn row(&self, y: usize) -> &[u16] {
        let len = self.row_len();
        &self.data[y * len..(y + 1) * len]
    }

    pub fn pixel(&self, x: usize, y: usize) -> &[u16] {
        let idx = (y * self.width + x) * self.channels;
        &self.data[idx..idx + self.channels]
    }

    /// True when both images can share a canvas without conversion.
    pub fn same_format(&self, other: &Image) -> bool {
        self.channels == other.channels && self.bit_depth == other.bit_depth
    }

    pub fn format_label(&self) -> String {
        let kind = if self.channels == 1 { "mono" } else { "rgb" };
        format!("{kind} {}-bit", self.bit_depth)
    }

    /// Bilinear sample at a continuous pixel-centre location.
    ///
    /// Writes one value per channel into `out` and returns `false` when the
    /// location resolves to the border fill under `border`.
    pub fn sample_bilinear(&self, sx: f64, sy: f64, border: BorderPolicy, out: &mut [f64]) -> bool {
        if !sx.is_finite() || !sy.is_finite() {
            return false;
        }

        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        let (sx, sy) = match border {
            BorderPolicy::Black => {
                if sx < -EDGE_EPS || sy < -EDGE_EPS || sx > max_x + EDGE_EPS || sy > max_y + EDGE_EPS {
                    return false;
                }
                (sx.clamp(0.0, max_x), sy.clamp(0.0, max_y))
            }
            BorderPolicy::Replicate => (sx.clamp(0.0, max_x), sy.clamp(0.0, max_y)),
            BorderPolicy::Reflect => (reflect_101(sx, max_x), reflect_101(sy, max_y)),
        };

        let x0 = sx.floor() as usize;
        let y0 = sy.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = sx - x0 as f64;
        let fy = sy - y0 as f64;

        let p00 = self.pixel(x0, y0);
        let p10 = self.pixel(x1, y0);
        let p01 = self.pixel(x0, y1);
        let p11 = self.pixel(x1, y1);
        for c in 0..self.channels {
            out[c] = p00[c] as f64 * (1.0 - fx) * (1.0 - fy)
                + p10[c] as f64 * fx * (1.0 - fy)
                + p01[c] as f64 * (1.0 - fx) * fy
                + p11[c] as f64 * fx * fy;
        }
        true
    }
}

/// Rounds a resampled value back into the sample range.
pub(crate) fn quantize(value: f64, max: u16) -> u16 {
    value.round().clamp(0.0, max as f64) as u16
}

fn reflect_101(v: f64, max: f64) -> f64 {
    if max <= 0.0 {
        return 0.0;
    }
    let period = 2.0 * max;
    let v = v.abs() % period;
    if v > max { period - v } else { v }
}
