//! RAW file reading module
//!
//! Format-agnostic decoding of camera RAW files into validated frames.

mod rawloader_reader;
mod reader;

pub use rawloader_reader::RawLoaderReader;
pub use reader::RawImageReader;
