use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;

use crate::image_pipeline::calibration::{
    CalibratedProfile, CalibrationProfile, CalibrationSet, CalibrationSource, CalibrationStore,
    CanvasPadding, CropRect, Distortion, OutputGeometry, ProfileVersion, Rotation,
    SensorResolution,
};
use crate::image_pipeline::capture::{
    ArtifactKind, CameraSource, CancelToken, CaptureConfig, CaptureOrchestrator, CaptureState,
    StorageSink,
};
use crate::image_pipeline::common::error::{
    AcquisitionError, CaptureError, CompositionError, OutputError, ProcessingError,
};
use crate::image_pipeline::config::PipelineConfig;
use crate::image_pipeline::frame::{
    CameraId, FrameDescriptor, Image, PixelData, PixelFormat, RawFrame,
};
use crate::image_pipeline::tiff::{EncodingConfig, StandardTiffWriter, TiffWriter};

enum Step {
    Frame,
    Timeout,
    Device,
    /// Delivers a frame labelled with the other camera.
    Foreign,
    /// Blocks, then delivers a frame.
    Sleep(Duration),
}

struct ScriptedCamera {
    camera: CameraId,
    descriptor: FrameDescriptor,
    data: PixelData,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedCamera {
    fn new(camera: CameraId, image: &Image, steps: Vec<Step>) -> Arc<Self> {
        let format = PixelFormat::Mono16 {
            bit_depth: image.bit_depth(),
        };
        Self::with_format(camera, image, format, steps)
    }

    fn with_format(camera: CameraId, image: &Image, format: PixelFormat, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            camera,
            descriptor: FrameDescriptor::new(image.width(), image.height(), format),
            data: PixelData::U16(image.data().to_vec()),
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn frame(&self, camera: CameraId) -> RawFrame {
        RawFrame::new(camera, Local::now(), self.descriptor, self.data.clone()).unwrap()
    }
}

impl CameraSource for ScriptedCamera {
    fn request_frame(&self, timeout: Duration) -> Result<RawFrame, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let camera = self.camera;
        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Frame) => Ok(self.frame(camera)),
            Some(Step::Timeout) => Err(AcquisitionError::Timeout { camera, timeout }),
            Some(Step::Foreign) => Ok(self.frame(camera.other())),
            Some(Step::Sleep(duration)) => {
                thread::sleep(duration);
                Ok(self.frame(camera))
            }
            Some(Step::Device) | None => Err(AcquisitionError::Device {
                camera,
                reason: "sensor offline".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct MemorySink {
    stored: Mutex<Vec<(ArtifactKind, String, usize)>>,
    fail_on: Option<ArtifactKind>,
}

impl MemorySink {
    fn failing_on(kind: ArtifactKind) -> Self {
        Self {
            fail_on: Some(kind),
            ..Self::default()
        }
    }

    fn kinds(&self) -> Vec<ArtifactKind> {
        self.stored.lock().iter().map(|(kind, _, _)| *kind).collect()
    }
}

impl StorageSink for MemorySink {
    fn store(&self, kind: ArtifactKind, identifier: &str, bytes: &[u8]) -> Result<(), OutputError> {
        if self.fail_on == Some(kind) {
            return Err(OutputError::IoError(std::io::Error::other("disk full")));
        }
        self.stored.lock().push((kind, identifier.to_string(), bytes.len()));
        Ok(())
    }
}

/// Refuses raw frames, encodes composites normally.
struct RawRejectingWriter;

impl TiffWriter for RawRejectingWriter {
    fn write_raw(
        &self,
        _frame: &RawFrame,
        _output: &mut dyn std::io::Write,
        _config: &EncodingConfig,
    ) -> Result<(), OutputError> {
        Err(OutputError::EncodeError("raw encoding disabled".to_string()))
    }

    fn write_image(
        &self,
        image: &Image,
        output: &mut dyn std::io::Write,
        config: &EncodingConfig,
    ) -> Result<(), OutputError> {
        StandardTiffWriter.write_image(image, output, config)
    }
}

fn pattern(width: usize, height: usize, seed: usize) -> Image {
    Image::from_fn(width, height, 1, 16, move |x, y, _| ((x * 5 + y * 11 + seed * 997) % 65536) as u16)
}

fn config() -> PipelineConfig {
    PipelineConfig {
        capture: CaptureConfig::builder()
            .frame_timeout(Duration::from_millis(200))
            .retries(1)
            .join_grace(Duration::from_millis(50))
            .build(),
        ..PipelineConfig::default()
    }
}

fn orchestrator(
    cam0: &Arc<ScriptedCamera>,
    cam1: &Arc<ScriptedCamera>,
    calibration: CalibrationStore,
    sink: MemorySink,
    config: PipelineConfig,
) -> CaptureOrchestrator<MemorySink> {
    CaptureOrchestrator::new(
        Arc::clone(cam0) as Arc<dyn CameraSource>,
        Arc::clone(cam1) as Arc<dyn CameraSource>,
        Arc::new(calibration),
        sink,
        config,
    )
}

fn calibrated(camera: CameraId, version: &str, crop: Option<CropRect>) -> CalibrationProfile {
    CalibrationProfile::Calibrated(CalibratedProfile {
        camera,
        version: ProfileVersion::new(version),
        sensor: SensorResolution {
            width: 100,
            height: 100,
        },
        distortion: Distortion::identity(),
        homography: None,
        geometry: OutputGeometry {
            crop,
            rotation: Rotation::None,
        },
        canvas: CanvasPadding::default(),
    })
}

fn set(cam0: CalibrationProfile, cam1: CalibrationProfile) -> CalibrationStore {
    CalibrationStore::from_set(CalibrationSet {
        cam0,
        cam1,
        source: CalibrationSource::Builtin,
    })
}

#[test]
fn test_both_frames_produce_composite_and_three_artifacts() {
    let (a, b) = (pattern(100, 100, 1), pattern(100, 100, 2));
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &a, vec![Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &b, vec![Step::Frame]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config());

    let result = orchestrator.trigger_capture();

    assert!(result.is_done(), "{}", result.reason());
    assert!(result.status.warnings().is_empty());
    let composite = result.composite.as_ref().unwrap();
    assert_eq!((composite.width(), composite.height()), (200, 100));
    for y in [0, 57, 99] {
        assert_eq!(&composite.image.row(y)[..100], a.row(y));
        assert_eq!(&composite.image.row(y)[100..], b.row(y));
    }

    let naming = &orchestrator.config().capture.naming;
    let identifiers: Vec<_> = result.stored.iter().map(|s| s.identifier.clone()).collect();
    assert_eq!(result.stored.len(), 3);
    assert!(identifiers.contains(&naming.raw_identifier(result.triggered_at, CameraId::Cam0)));
    assert!(identifiers.contains(&naming.raw_identifier(result.triggered_at, CameraId::Cam1)));
    assert_eq!(result.stored[2].kind, ArtifactKind::Composite);
    assert_eq!(result.stored[2].identifier, naming.composite_identifier(result.triggered_at));
    assert!(result.stored[2].identifier.starts_with("capture_"));
    assert_eq!(orchestrator.sink().stored.lock().len(), 3);

    assert_eq!(
        &result.history[..4],
        &[
            CaptureState::Idle,
            CaptureState::Triggered,
            CaptureState::AwaitingFrame(CameraId::Cam0),
            CaptureState::AwaitingFrame(CameraId::Cam1),
        ]
    );
    assert!(result.history[4..6].contains(&CaptureState::FrameReceived(CameraId::Cam0)));
    assert!(result.history[4..6].contains(&CaptureState::FrameReceived(CameraId::Cam1)));
    assert_eq!(
        &result.history[6..],
        &[
            CaptureState::BothReceived,
            CaptureState::Correcting,
            CaptureState::Composing,
            CaptureState::Persisting,
            CaptureState::Done,
        ]
    );
    assert_eq!(orchestrator.state(), CaptureState::Done);

    for step in ["acquire", "correct", "compose", "persist"] {
        assert!(result.timings.get_step(step).is_some(), "missing {step} timing");
    }
}

#[test]
fn test_timeout_after_retries_is_partial_capture() {
    let image = pattern(64, 48, 3);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Timeout, Step::Timeout]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config());

    let result = orchestrator.trigger_capture();

    assert!(!result.is_done());
    assert!(matches!(
        result.error(),
        Some(CaptureError::PartialCapture {
            failed: CameraId::Cam1,
            attempts: 2,
            cause: AcquisitionError::Timeout { camera: CameraId::Cam1, .. },
        })
    ));
    assert_eq!(cam1.calls(), 2);
    assert!(result.composite.is_none());
    assert!(result.frame(CameraId::Cam0).is_some());
    assert!(result.frame(CameraId::Cam1).is_none());
    assert_eq!(orchestrator.sink().kinds(), vec![ArtifactKind::Raw(CameraId::Cam0)]);
    assert_eq!(result.final_state(), CaptureState::Failed);
    assert!(result.history.contains(&CaptureState::Persisting));
    assert!(!result.history.contains(&CaptureState::BothReceived));
}

#[test]
fn test_single_timeout_is_retried() {
    let image = pattern(32, 32, 4);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Timeout, Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Frame]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config());

    let result = orchestrator.trigger_capture();

    assert!(result.is_done(), "{}", result.reason());
    assert_eq!(cam0.calls(), 2);
    assert_eq!(cam1.calls(), 1);
}

#[test]
fn test_device_error_is_not_retried() {
    let image = pattern(32, 32, 5);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Device, Step::Frame]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config());

    let result = orchestrator.trigger_capture();

    assert!(matches!(
        result.error(),
        Some(CaptureError::PartialCapture {
            failed: CameraId::Cam1,
            attempts: 1,
            cause: AcquisitionError::Device { .. },
        })
    ));
    assert_eq!(cam1.calls(), 1);
}

#[test]
fn test_frame_from_wrong_camera_is_a_device_error() {
    let image = pattern(32, 32, 6);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Foreign]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Frame]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config());

    let result = orchestrator.trigger_capture();

    assert!(matches!(
        result.error(),
        Some(CaptureError::PartialCapture {
            failed: CameraId::Cam0,
            cause: AcquisitionError::Device { camera: CameraId::Cam0, .. },
            ..
        })
    ));
    assert_eq!(orchestrator.sink().kinds(), vec![ArtifactKind::Raw(CameraId::Cam1)]);
}

#[test]
fn test_both_sources_failing_is_no_frames() {
    let image = pattern(32, 32, 7);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Device]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Timeout, Step::Timeout]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config());

    let result = orchestrator.trigger_capture();

    assert!(matches!(
        result.error(),
        Some(CaptureError::NoFrames {
            cam0: AcquisitionError::Device { .. },
            cam1: AcquisitionError::Timeout { .. },
        })
    ));
    assert!(result.stored.is_empty());
    assert_eq!(result.final_state(), CaptureState::Failed);
}

#[test]
fn test_hanging_source_is_abandoned_at_deadline() {
    let image = pattern(32, 32, 8);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Sleep(Duration::from_millis(800))]);
    let config = PipelineConfig {
        capture: CaptureConfig::builder()
            .frame_timeout(Duration::from_millis(20))
            .retries(0)
            .join_grace(Duration::from_millis(10))
            .build(),
        ..PipelineConfig::default()
    };
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config);

    let result = orchestrator.trigger_capture();

    assert_eq!(
        result.error(),
        Some(&CaptureError::PartialCapture {
            failed: CameraId::Cam1,
            attempts: 1,
            cause: AcquisitionError::Timeout {
                camera: CameraId::Cam1,
                timeout: Duration::from_millis(20),
            },
        })
    );
    assert!(result.timings.get_step("acquire").unwrap() < Duration::from_millis(500));
    assert_eq!(orchestrator.sink().kinds(), vec![ArtifactKind::Raw(CameraId::Cam0)]);
}

#[test]
fn test_processing_error_still_persists_raw_pair() {
    let image = Image::from_fn(16, 16, 1, 16, |x, y, _| ((x + y) % 16) as u16);
    let format = PixelFormat::Mono16 { bit_depth: 4 };
    let cam0 = ScriptedCamera::with_format(CameraId::Cam0, &image, format, vec![Step::Frame]);
    let cam1 = ScriptedCamera::with_format(CameraId::Cam1, &image, format, vec![Step::Frame]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config());

    let result = orchestrator.trigger_capture();

    assert!(matches!(
        result.error(),
        Some(CaptureError::Processing(ProcessingError::UnsupportedFormat(_)))
    ));
    assert!(result.composite.is_none());
    assert!(result.cam0.is_some() && result.cam1.is_some());
    let mut kinds = orchestrator.sink().kinds();
    kinds.sort_by_key(|kind| kind.to_string());
    assert_eq!(
        kinds,
        vec![ArtifactKind::Raw(CameraId::Cam0), ArtifactKind::Raw(CameraId::Cam1)]
    );
    assert!(!result.history.contains(&CaptureState::Composing));
    assert_eq!(
        &result.history[result.history.len() - 2..],
        &[CaptureState::Persisting, CaptureState::Failed]
    );
}

#[test]
fn test_composition_error_still_persists_raw_pair() {
    let image = pattern(100, 100, 9);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Frame]);
    let calibration = set(
        calibrated(CameraId::Cam0, "rig-b", Some(CropRect::new(0, 0, 50, 60))),
        calibrated(CameraId::Cam1, "rig-b", None),
    );
    let orchestrator = orchestrator(&cam0, &cam1, calibration, MemorySink::default(), config());

    let result = orchestrator.trigger_capture();

    assert!(matches!(
        result.error(),
        Some(CaptureError::Composition(CompositionError::IncompatibleDimensions { .. }))
    ));
    assert!(result.composite.is_none());
    assert_eq!(result.stored.len(), 2);
    assert!(result.stored.iter().all(|s| s.kind != ArtifactKind::Composite));
    assert!(result.history.contains(&CaptureState::Composing));
}

#[test]
fn test_composite_storage_failure_is_a_warning() {
    let image = pattern(40, 30, 10);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Frame]);
    let sink = MemorySink::failing_on(ArtifactKind::Composite);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), sink, config());

    let result = orchestrator.trigger_capture();

    assert!(result.is_done());
    assert!(result.composite.is_some());
    assert_eq!(result.status.warnings().len(), 1);
    assert!(result.status.warnings()[0].contains("composite"));
    assert_eq!(result.stored.len(), 2);
    assert!(result.reason().contains("done with warnings"));
}

#[test]
fn test_raw_encoding_failure_keeps_capture_done() {
    let image = pattern(40, 30, 16);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Frame]);
    let orchestrator = CaptureOrchestrator::with_writer(
        Arc::clone(&cam0) as Arc<dyn CameraSource>,
        Arc::clone(&cam1) as Arc<dyn CameraSource>,
        Arc::new(CalibrationStore::builtin()),
        MemorySink::default(),
        RawRejectingWriter,
        config(),
    );

    let result = orchestrator.trigger_capture();

    assert!(result.is_done());
    assert_eq!(result.status.warnings().len(), 2);
    assert!(result.status.warnings().iter().all(|w| w.contains("raw-camera")));
    assert_eq!(orchestrator.sink().kinds(), vec![ArtifactKind::Composite]);
}

#[test]
fn test_cancel_during_acquisition_discards_frames() {
    let image = pattern(32, 32, 11);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Sleep(Duration::from_millis(300))]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config());
    let token = CancelToken::new();

    let result = thread::scope(|scope| {
        let canceller = token.clone();
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });
        orchestrator.trigger_capture_with(&token)
    });

    assert_eq!(result.error(), Some(&CaptureError::Cancelled));
    assert!(result.cam0.is_none() && result.cam1.is_none());
    assert!(result.composite.is_none());
    assert!(orchestrator.sink().kinds().is_empty());
    assert!(!result.history.contains(&CaptureState::BothReceived));
    assert_eq!(result.final_state(), CaptureState::Failed);
}

#[test]
fn test_cancelled_token_never_requests_frames() {
    let image = pattern(32, 32, 12);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Frame]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config());
    let token = CancelToken::new();
    token.cancel();

    let result = orchestrator.trigger_capture_with(&token);

    assert_eq!(result.error(), Some(&CaptureError::Cancelled));
    assert_eq!(cam0.calls() + cam1.calls(), 0);
    assert_eq!(
        result.history,
        vec![CaptureState::Idle, CaptureState::Triggered, CaptureState::Failed]
    );
}

#[test]
fn test_reload_waits_for_in_flight_capture() {
    let doc = |version: &str| {
        format!(r#"{{ "version": "{version}", "cameras": {{ "cam0": {{}}, "cam1": {{}} }} }}"#)
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration.json");
    std::fs::write(&path, doc("v1")).unwrap();

    let image = pattern(32, 32, 13);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Sleep(Duration::from_millis(200)), Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Frame, Step::Frame]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::load(&path), MemorySink::default(), config());

    let first = thread::scope(|scope| {
        let capture = scope.spawn(|| orchestrator.trigger_capture());
        for _ in 0..100 {
            if matches!(
                orchestrator.state(),
                CaptureState::AwaitingFrame(_) | CaptureState::FrameReceived(_)
            ) {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        std::fs::write(&path, doc("v2")).unwrap();

        let reloaded = orchestrator.reload_calibration().unwrap();
        assert!(orchestrator.state().is_terminal());
        assert_eq!(reloaded.cam0.version().as_str(), "v2");
        capture.join().unwrap()
    });

    let composite = first.composite.as_ref().unwrap();
    assert_eq!(composite.frames[0].profile_version.as_str(), "v1");

    let second = orchestrator.trigger_capture();
    assert!(second.event_id > first.event_id);
    assert_eq!(
        second.composite.as_ref().unwrap().frames[1].profile_version.as_str(),
        "v2"
    );
}

#[test]
fn test_profile_version_is_recorded_in_provenance() {
    let image = pattern(100, 100, 14);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Frame]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Frame]);
    let calibration = set(
        calibrated(CameraId::Cam0, "rig-b", Some(CropRect::new(25, 0, 50, 100))),
        CalibrationProfile::Default(CameraId::Cam1),
    );
    let orchestrator = orchestrator(&cam0, &cam1, calibration, MemorySink::default(), config());

    let result = orchestrator.trigger_capture();

    let composite = result.composite.as_ref().unwrap();
    assert_eq!((composite.width(), composite.height()), (150, 100));
    assert_eq!(composite.frames[0].profile_version.as_str(), "rig-b");
    assert_eq!(composite.frames[1].profile_version.as_str(), "default");
    assert_eq!(composite.frames[0].crop, Some(CropRect::new(25, 0, 50, 100)));
}

#[test]
fn test_reason_names_the_failure() {
    let image = pattern(32, 32, 15);
    let cam0 = ScriptedCamera::new(CameraId::Cam0, &image, vec![Step::Timeout, Step::Timeout]);
    let cam1 = ScriptedCamera::new(CameraId::Cam1, &image, vec![Step::Frame]);
    let orchestrator = orchestrator(&cam0, &cam1, CalibrationStore::builtin(), MemorySink::default(), config());

    let result = orchestrator.trigger_capture();

    let reason = result.reason();
    assert!(reason.starts_with(&format!("capture {} failed", result.event_id)), "{reason}");
    assert!(reason.contains("cam0"), "{reason}");
    assert!(reason.contains("2 attempt"), "{reason}");
}
