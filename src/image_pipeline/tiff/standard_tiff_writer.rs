use std::io::{Cursor, Write};

use tiff::encoder::colortype::{Gray8, Gray16, RGB8, RGB16};
use tiff::encoder::compression::DeflateLevel;
use tiff::encoder::{Compression, TiffEncoder};
use tiff::tags::Predictor;
use tracing::debug;

use crate::image_pipeline::common::error::OutputError;
use crate::image_pipeline::frame::{Image, PixelData, RawFrame};
use crate::image_pipeline::tiff::types::{EncodingConfig, TiffCompression};
use crate::image_pipeline::tiff::writer::TiffWriter;

pub struct StandardTiffWriter;

/// Sample layout handed to the encoder.
enum Samples<'a> {
    Gray8(Vec<u8>),
    Gray16(&'a [u16]),
    Rgb8(Vec<u8>),
    Rgb16(&'a [u16]),
}

impl StandardTiffWriter {
    fn encode(
        &self,
        width: usize,
        height: usize,
        samples: Samples<'_>,
        config: &EncodingConfig,
    ) -> Result<Vec<u8>, OutputError> {
        let compression = match config.compression {
            TiffCompression::None => Compression::Uncompressed,
            TiffCompression::Lzw => Compression::Lzw,
            TiffCompression::DeflateFast => Compression::Deflate(DeflateLevel::Fast),
            TiffCompression::DeflateBalanced => Compression::Deflate(DeflateLevel::Balanced),
            TiffCompression::DeflateBest => Compression::Deflate(DeflateLevel::Best),
        };

        let mut buffer = Vec::new();
        let mut encoder = TiffEncoder::new(Cursor::new(&mut buffer))
            .map_err(|e| OutputError::EncodeError(e.to_string()))?
            .with_compression(compression);
        if config.horizontal_predictor {
            encoder = encoder.with_predictor(Predictor::Horizontal);
        }

        let (w, h) = (width as u32, height as u32);
        match samples {
            Samples::Gray8(data) => encoder.write_image::<Gray8>(w, h, &data),
            Samples::Gray16(data) => encoder.write_image::<Gray16>(w, h, data),
            Samples::Rgb8(data) => encoder.write_image::<RGB8>(w, h, &data),
            Samples::Rgb16(data) => encoder.write_image::<RGB16>(w, h, data),
        }
        .map_err(|e| OutputError::EncodeError(e.to_string()))?;

        Ok(buffer)
    }
}

impl TiffWriter for StandardTiffWriter {
    fn write_raw(
        &self,
        frame: &RawFrame,
        output: &mut dyn Write,
        config: &EncodingConfig,
    ) -> Result<(), OutputError> {
        debug!(
            camera = %frame.camera(),
            format = %frame.format(),
            "Encoding raw TIFF: {}x{}",
            frame.width(),
            frame.height()
        );

        let rgb = frame.format().samples_per_pixel() == 3;
        let samples = match (frame.data(), rgb) {
            (PixelData::U8(data), false) => Samples::Gray8(data.clone()),
            (PixelData::U8(data), true) => Samples::Rgb8(data.clone()),
            (PixelData::U16(data), false) => Samples::Gray16(data),
            (PixelData::U16(data), true) => Samples::Rgb16(data),
        };
        let buffer = self.encode(frame.width(), frame.height(), samples, config)?;
        output.write_all(&buffer)?;

        debug!(bytes = buffer.len(), "Raw TIFF encoding complete");
        Ok(())
    }

    fn write_image(
        &self,
        image: &Image,
        output: &mut dyn Write,
        config: &EncodingConfig,
    ) -> Result<(), OutputError> {
        debug!(
            format = %image.format_label(),
            "Encoding TIFF image: {}x{}",
            image.width(),
            image.height()
        );

        let narrow = || image.data().iter().map(|&v| v as u8).collect::<Vec<u8>>();
        let samples = match (image.channels(), image.bit_depth() <= 8) {
            (1, true) => Samples::Gray8(narrow()),
            (1, false) => Samples::Gray16(image.data()),
            (_, true) => Samples::Rgb8(narrow()),
            (_, false) => Samples::Rgb16(image.data()),
        };
        let buffer = self.encode(image.width(), image.height(), samples, config)?;
        output.write_all(&buffer)?;

        debug!(bytes = buffer.len(), "TIFF encoding complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_pipeline::frame::{CameraId, Cfa, FrameDescriptor, PixelFormat};
    use chrono::Local;
    use tiff::ColorType;
    use tiff::decoder::{Decoder, DecodingResult};

    fn decode(bytes: Vec<u8>) -> (u32, u32, ColorType, DecodingResult) {
        let mut decoder = Decoder::new(Cursor::new(bytes)).unwrap();
        let (w, h) = decoder.dimensions().unwrap();
        let color = decoder.colortype().unwrap();
        let data = decoder.read_image().unwrap();
        (w, h, color, data)
    }

    #[test]
    fn mosaic_is_written_as_gray16() {
        let samples: Vec<u16> = (0..24).map(|v| v * 100).collect();
        let frame = RawFrame::new(
            CameraId::Cam0,
            Local::now(),
            FrameDescriptor::new(
                6,
                4,
                PixelFormat::Bayer16 {
                    cfa: Cfa::Bggr,
                    bit_depth: 12,
                },
            ),
            PixelData::U16(samples.clone()),
        )
        .unwrap();

        let mut out = Vec::new();
        StandardTiffWriter
            .write_raw(&frame, &mut out, &EncodingConfig::default())
            .unwrap();

        let (w, h, color, data) = decode(out);
        assert_eq!((w, h), (6, 4));
        assert_eq!(color, ColorType::Gray(16));
        let DecodingResult::U16(decoded) = data else {
            panic!("expected 16-bit samples");
        };
        assert_eq!(decoded, samples);
    }

    #[test]
    fn eight_bit_rgb_image_is_written_as_rgb8() {
        let image = Image::from_fn(3, 2, 3, 8, |x, y, c| (x * 40 + y * 10 + c) as u16);
        let config = EncodingConfig::builder()
            .compression(TiffCompression::Lzw)
            .horizontal_predictor(true)
            .build();

        let mut out = Vec::new();
        StandardTiffWriter.write_image(&image, &mut out, &config).unwrap();

        let (w, h, color, data) = decode(out);
        assert_eq!((w, h), (3, 2));
        assert_eq!(color, ColorType::RGB(8));
        let DecodingResult::U8(decoded) = data else {
            panic!("expected 8-bit samples");
        };
        let expected: Vec<u8> = image.data().iter().map(|&v| v as u8).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn deflate_round_trips_mono16() {
        let image = Image::from_fn(16, 8, 1, 14, |x, y, _| (x * 1000 + y) as u16);
        let config = EncodingConfig::builder()
            .compression(TiffCompression::DeflateBest)
            .build();

        let mut out = Vec::new();
        StandardTiffWriter.write_image(&image, &mut out, &config).unwrap();

        let (_, _, _, data) = decode(out);
        let DecodingResult::U16(decoded) = data else {
            panic!("expected 16-bit samples");
        };
        assert_eq!(decoded, image.data());
    }
}
