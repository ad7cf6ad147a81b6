use crate::image_pipeline::common::error::ReaderError;
use crate::image_pipeline::frame::{CameraId, RawFrame};

pub trait RawImageReader: Send + Sync {
    /// Decodes one RAW file into a frame attributed to `camera`.
    fn read_raw(&self, data: &[u8], camera: CameraId) -> Result<RawFrame, ReaderError>;
}
