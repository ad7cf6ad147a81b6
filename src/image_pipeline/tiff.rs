//! TIFF writing module
//!
//! Lossless TIFF encoding of raw captures and composites with various
//! compression options.

mod standard_tiff_writer;
pub mod types;
mod writer;

pub use standard_tiff_writer::StandardTiffWriter;
pub use types::{EncodingConfig, EncodingConfigBuilder, TiffCompression};
pub use writer::TiffWriter;
