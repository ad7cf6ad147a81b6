use std::io::Write;

use crate::image_pipeline::common::error::OutputError;
use crate::image_pipeline::frame::{Image, RawFrame};
use crate::image_pipeline::tiff::types::EncodingConfig;

/// Lossless TIFF encoding of pipeline artifacts.
pub trait TiffWriter: Send + Sync {
    /// Encodes an unmodified capture; mosaics stay single-channel.
    fn write_raw(
        &self,
        frame: &RawFrame,
        output: &mut dyn Write,
        config: &EncodingConfig,
    ) -> Result<(), OutputError>;

    /// Encodes a working image such as a composite.
    fn write_image(
        &self,
        image: &Image,
        output: &mut dyn Write,
        config: &EncodingConfig,
    ) -> Result<(), OutputError>;
}
