//! Camera source collaborator

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::image_pipeline::common::error::{AcquisitionError, ReaderError};
use crate::image_pipeline::frame::{CameraId, RawFrame};
use crate::image_pipeline::raw::{RawImageReader, RawLoaderReader};

/// One physical sensor.
///
/// `request_frame` may block for at most `timeout` and reports
/// [`AcquisitionError::Timeout`] when no frame arrived in time.
pub trait CameraSource: Send + Sync {
    fn request_frame(&self, timeout: Duration) -> Result<RawFrame, AcquisitionError>;
}

/// Camera source that replays RAW files from disk, one per request.
pub struct ReplayCamera<R: RawImageReader = RawLoaderReader> {
    camera: CameraId,
    reader: R,
    queue: Mutex<VecDeque<PathBuf>>,
}

impl ReplayCamera<RawLoaderReader> {
    pub fn new(camera: CameraId, files: impl IntoIterator<Item = PathBuf>) -> Self {
        Self::with_reader(camera, RawLoaderReader, files)
    }
}

impl<R: RawImageReader> ReplayCamera<R> {
    pub fn with_reader(camera: CameraId, reader: R, files: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            camera,
            reader,
            queue: Mutex::new(files.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }
}

impl<R: RawImageReader> CameraSource for ReplayCamera<R> {
    #[instrument(skip(self), fields(camera = %self.camera))]
    fn request_frame(&self, timeout: Duration) -> Result<RawFrame, AcquisitionError> {
        let camera = self.camera;
        let started = Instant::now();
        let path = self
            .queue
            .lock()
            .pop_front()
            .ok_or_else(|| AcquisitionError::Device {
                camera,
                reason: "replay queue exhausted".to_string(),
            })?;

        let bytes = std::fs::read(&path).map_err(|e| AcquisitionError::Device {
            camera,
            reason: format!("{}: {e}", path.display()),
        })?;
        let frame = self
            .reader
            .read_raw(&bytes, camera)
            .map_err(|e| match e {
                ReaderError::Frame(source) => AcquisitionError::InvalidFrame { camera, source },
                other => AcquisitionError::Device {
                    camera,
                    reason: format!("{}: {other}", path.display()),
                },
            })?;

        if started.elapsed() > timeout {
            return Err(AcquisitionError::Timeout { camera, timeout });
        }
        debug!(path = %path.display(), "Replayed frame");
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_pipeline::common::error::FrameError;

    struct StubReader(Result<(), FrameError>);

    impl RawImageReader for StubReader {
        fn read_raw(&self, _data: &[u8], _camera: CameraId) -> Result<RawFrame, ReaderError> {
            match &self.0 {
                Ok(()) => Err(ReaderError::DecodeError("stub".to_string())),
                Err(e) => Err(ReaderError::Frame(e.clone())),
            }
        }
    }

    #[test]
    fn exhausted_queue_is_a_device_error() {
        let camera = ReplayCamera::with_reader(CameraId::Cam1, StubReader(Ok(())), Vec::new());
        let err = camera.request_frame(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, AcquisitionError::Device { camera: CameraId::Cam1, .. }));
    }

    #[test]
    fn reader_failures_map_to_acquisition_errors() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("frame.dng");
        std::fs::write(&file, b"raw").unwrap();

        let camera = ReplayCamera::with_reader(
            CameraId::Cam0,
            StubReader(Err(FrameError::InvalidDimensions(0, 4))),
            vec![file.clone(), file.clone()],
        );
        assert_eq!(camera.remaining(), 2);
        let err = camera.request_frame(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, AcquisitionError::InvalidFrame { camera: CameraId::Cam0, .. }));

        let camera = ReplayCamera::with_reader(CameraId::Cam0, StubReader(Ok(())), vec![file]);
        let err = camera.request_frame(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, AcquisitionError::Device { .. }));
        assert_eq!(camera.remaining(), 0);
    }
}
