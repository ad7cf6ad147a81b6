//! Frame module
//!
//! Raw sensor captures, their boundary validation, and the working image
//! buffer the correction stages operate on.

mod demosaic;
pub mod image;
pub mod types;

pub use image::{BorderPolicy, Image};
pub use types::{CameraId, Cfa, FrameDescriptor, PixelData, PixelFormat, RawFrame};
