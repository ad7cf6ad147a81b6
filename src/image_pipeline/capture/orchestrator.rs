use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use crossbeam_channel::{Sender, select};
use parking_lot::Mutex;
use tracing::{Span, debug, error, info, info_span, warn};

use crate::image_pipeline::calibration::{CalibrationProfile, CalibrationSet, CalibrationStore};
use crate::image_pipeline::capture::source::CameraSource;
use crate::image_pipeline::capture::storage::{ArtifactKind, StorageSink};
use crate::image_pipeline::capture::types::{
    CancelToken, CapturePairResult, CaptureState, CaptureStatus, StoredArtifact,
};
use crate::image_pipeline::common::error::{
    AcquisitionError, CalibrationError, CaptureError, OutputError, ProcessingError,
};
use crate::image_pipeline::common::timing::{PipelineTimings, Timer};
use crate::image_pipeline::composite::{CompositeArtifact, FrameCompositor};
use crate::image_pipeline::config::PipelineConfig;
use crate::image_pipeline::correction::{CorrectedFrame, DistortionCorrector, PerspectiveCorrector};
use crate::image_pipeline::frame::{CameraId, RawFrame};
use crate::image_pipeline::tiff::{StandardTiffWriter, TiffWriter};

/// What one acquisition branch reported.
struct Arrival {
    camera: CameraId,
    attempts: u32,
    result: Result<RawFrame, AcquisitionError>,
}

enum Acquired {
    Both([RawFrame; 2]),
    Partial {
        frame: RawFrame,
        failed: CameraId,
        attempts: u32,
        cause: AcquisitionError,
    },
    Neither {
        cam0: AcquisitionError,
        cam1: AcquisitionError,
    },
    Cancelled,
}

/// Bookkeeping of one capture event while it runs.
struct Event {
    id: u64,
    triggered_at: DateTime<Local>,
    history: Vec<CaptureState>,
    timings: PipelineTimings,
    stored: Vec<StoredArtifact>,
    warnings: Vec<String>,
}

/// Drives both camera sources through correction, composition and storage.
///
/// One capture event runs at a time. [`reload_calibration`](Self::reload_calibration)
/// waits for an in-flight event to reach a terminal state before swapping
/// profiles.
pub struct CaptureOrchestrator<S: StorageSink, W: TiffWriter = StandardTiffWriter> {
    cameras: [Arc<dyn CameraSource>; 2],
    calibration: Arc<CalibrationStore>,
    sink: S,
    writer: W,
    distortion: DistortionCorrector,
    perspective: PerspectiveCorrector,
    compositor: FrameCompositor,
    config: PipelineConfig,
    gate: Mutex<()>,
    state: Mutex<CaptureState>,
    next_event: AtomicU64,
}

impl<S: StorageSink> CaptureOrchestrator<S, StandardTiffWriter> {
    pub fn new(
        cam0: Arc<dyn CameraSource>,
        cam1: Arc<dyn CameraSource>,
        calibration: Arc<CalibrationStore>,
        sink: S,
        config: PipelineConfig,
    ) -> Self {
        Self::with_writer(cam0, cam1, calibration, sink, StandardTiffWriter, config)
    }
}

impl<S: StorageSink, W: TiffWriter> CaptureOrchestrator<S, W> {
    pub fn with_writer(
        cam0: Arc<dyn CameraSource>,
        cam1: Arc<dyn CameraSource>,
        calibration: Arc<CalibrationStore>,
        sink: S,
        writer: W,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cameras: [cam0, cam1],
            calibration,
            sink,
            writer,
            distortion: DistortionCorrector::new(config.correction),
            perspective: PerspectiveCorrector::new(config.correction),
            compositor: FrameCompositor::new(config.compositor),
            config,
            gate: Mutex::new(()),
            state: Mutex::new(CaptureState::Idle),
            next_event: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// State of the current or most recent capture event.
    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    /// Re-reads the calibration source once no capture event is active.
    pub fn reload_calibration(&self) -> Result<Arc<CalibrationSet>, CalibrationError> {
        let _gate = self.gate.lock();
        self.calibration.reload()
    }

    pub fn trigger_capture(&self) -> CapturePairResult {
        self.trigger_capture_with(&CancelToken::new())
    }

    /// Runs one capture event to a terminal state.
    ///
    /// `cancel` is honoured until both frames have arrived; after that the
    /// event runs to completion.
    pub fn trigger_capture_with(&self, cancel: &CancelToken) -> CapturePairResult {
        let _gate = self.gate.lock();
        let id = self.next_event.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("capture", event = id);
        let _enter = span.enter();

        let mut event = Event {
            id,
            triggered_at: Local::now(),
            history: Vec::new(),
            timings: PipelineTimings::new(),
            stored: Vec::new(),
            warnings: Vec::new(),
        };
        self.enter(&mut event, CaptureState::Idle);
        self.enter(&mut event, CaptureState::Triggered);
        info!(at = %event.triggered_at, "Capture triggered");

        // one snapshot for the whole event; a queued reload cannot change it
        let calibration = self.calibration.active();

        let timer = Timer::start("acquire");
        let acquired = self.acquire(&mut event, cancel, &span);
        event.timings.record(timer);

        match acquired {
            Acquired::Both(frames) => {
                self.enter(&mut event, CaptureState::BothReceived);
                self.process(event, frames, &calibration)
            }
            Acquired::Partial {
                frame,
                failed,
                attempts,
                cause,
            } => {
                warn!(%failed, attempts, error = %cause, "Partial capture");
                self.enter(&mut event, CaptureState::Persisting);
                let timer = Timer::start("persist");
                match self.store_raw(&frame, event.triggered_at) {
                    Ok(artifact) => event.stored.push(artifact),
                    Err(warning) => event.warnings.push(warning),
                }
                event.timings.record(timer);

                let frames = match frame.camera() {
                    CameraId::Cam0 => [Some(frame), None],
                    CameraId::Cam1 => [None, Some(frame)],
                };
                let error = CaptureError::PartialCapture {
                    failed,
                    attempts,
                    cause,
                };
                self.fail(event, error, frames)
            }
            Acquired::Neither { cam0, cam1 } => {
                self.fail(event, CaptureError::NoFrames { cam0, cam1 }, [None, None])
            }
            Acquired::Cancelled => {
                info!("Capture cancelled, discarding received frames");
                self.fail(event, CaptureError::Cancelled, [None, None])
            }
        }
    }

    fn enter(&self, event: &mut Event, state: CaptureState) {
        *self.state.lock() = state;
        event.history.push(state);
        debug!(%state, "Capture state");
    }

    /// Requests a frame from both sources concurrently and waits for both
    /// branches, the cancel token or the acquisition deadline.
    fn acquire(&self, event: &mut Event, cancel: &CancelToken, span: &Span) -> Acquired {
        if cancel.is_cancelled() {
            return Acquired::Cancelled;
        }

        let capture = &self.config.capture;
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut outcomes: [Option<Arrival>; 2] = [None, None];

        for camera in CameraId::BOTH {
            self.enter(event, CaptureState::AwaitingFrame(camera));
            let source = Arc::clone(&self.cameras[camera.index()]);
            if let Err(e) = spawn_acquisition(
                source,
                camera,
                capture.frame_timeout,
                capture.retries,
                tx.clone(),
                span.clone(),
            ) {
                error!(%camera, error = %e, "Failed to start acquisition thread");
                outcomes[camera.index()] = Some(Arrival {
                    camera,
                    attempts: 0,
                    result: Err(AcquisitionError::Device {
                        camera,
                        reason: format!("acquisition thread: {e}"),
                    }),
                });
            }
        }
        drop(tx);

        let deadline = Instant::now()
            .checked_add(capture.acquisition_deadline())
            .map_or_else(crossbeam_channel::never, crossbeam_channel::at);
        while outcomes.iter().any(Option::is_none) {
            select! {
                recv(rx) -> arrival => match arrival {
                    Ok(arrival) => {
                        let camera = arrival.camera;
                        match &arrival.result {
                            Ok(_) => self.enter(event, CaptureState::FrameReceived(camera)),
                            Err(e) => warn!(%camera, attempts = arrival.attempts, error = %e, "Acquisition failed"),
                        }
                        outcomes[camera.index()] = Some(arrival);
                    }
                    Err(_) => {
                        fill_missing(&mut outcomes, |camera| {
                            (0, AcquisitionError::Device {
                                camera,
                                reason: "acquisition ended without a result".to_string(),
                            })
                        });
                    }
                },
                recv(cancel.signal()) -> _ => return Acquired::Cancelled,
                recv(deadline) -> _ => {
                    warn!(deadline = ?capture.acquisition_deadline(), "Acquisition deadline passed");
                    fill_missing(&mut outcomes, |camera| {
                        (capture.retries.saturating_add(1), AcquisitionError::Timeout {
                            camera,
                            timeout: capture.frame_timeout,
                        })
                    });
                }
            }
        }

        let [Some(cam0), Some(cam1)] = outcomes else {
            unreachable!("loop exits only once both outcomes are present")
        };
        match (cam0.result, cam1.result) {
            (Ok(a), Ok(b)) => Acquired::Both([a, b]),
            (Ok(frame), Err(cause)) => Acquired::Partial {
                frame,
                failed: CameraId::Cam1,
                attempts: cam1.attempts,
                cause,
            },
            (Err(cause), Ok(frame)) => Acquired::Partial {
                frame,
                failed: CameraId::Cam0,
                attempts: cam0.attempts,
                cause,
            },
            (Err(cam0), Err(cam1)) => Acquired::Neither { cam0, cam1 },
        }
    }

    /// Correction and composition, with the raw pair persisted on a scoped
    /// thread alongside.
    fn process(
        &self,
        mut event: Event,
        frames: [RawFrame; 2],
        calibration: &CalibrationSet,
    ) -> CapturePairResult {
        let [cam0, cam1] = &frames;
        let at = event.triggered_at;
        let (processed, raw_persist) = thread::scope(|scope| {
            let raws = scope.spawn(|| self.store_raws([cam0, cam1], at));

            let processed = self.correct_and_compose(&mut event, [cam0, cam1], calibration);

            self.enter(&mut event, CaptureState::Persisting);
            let raw_persist = raws.join().unwrap_or_else(|_| RawPersist {
                stored: Vec::new(),
                warnings: vec!["raw persistence task panicked".to_string()],
                duration: Duration::ZERO,
            });
            (processed, raw_persist)
        });

        event.stored.extend(raw_persist.stored);
        event.warnings.extend(raw_persist.warnings);
        event.timings.add_step("persist", raw_persist.duration);

        let [cam0, cam1] = frames;
        match processed {
            Ok(composite) => {
                let timer = Timer::start("persist");
                self.persist_composite(&mut event, &composite);
                event.timings.record(timer);
                self.finish(event, [Some(cam0), Some(cam1)], Some(composite))
            }
            Err(e) => {
                error!(error = %e, "Capture processing failed, raw frames kept");
                self.fail(event, e, [Some(cam0), Some(cam1)])
            }
        }
    }

    fn correct_and_compose(
        &self,
        event: &mut Event,
        [cam0, cam1]: [&RawFrame; 2],
        calibration: &CalibrationSet,
    ) -> Result<CompositeArtifact, CaptureError> {
        self.enter(event, CaptureState::Correcting);
        let timer = Timer::start("correct");
        let (a, b) = rayon::join(
            || self.correct(cam0, calibration.profile(CameraId::Cam0)),
            || self.correct(cam1, calibration.profile(CameraId::Cam1)),
        );
        event.timings.record(timer);
        let (a, b) = (a?, b?);

        self.enter(event, CaptureState::Composing);
        let timer = Timer::start("compose");
        let composite = self.compositor.compose(&a, &b, &self.config.compositor.layout);
        event.timings.record(timer);
        Ok(composite?)
    }

    fn correct(
        &self,
        frame: &RawFrame,
        profile: &CalibrationProfile,
    ) -> Result<CorrectedFrame, ProcessingError> {
        let corrected = self.distortion.correct(frame, profile)?;
        self.perspective.rectify(corrected, profile.homography())
    }

    fn store_raws(&self, frames: [&RawFrame; 2], at: DateTime<Local>) -> RawPersist {
        let started = Instant::now();
        let mut persist = RawPersist::default();
        for frame in frames {
            match self.store_raw(frame, at) {
                Ok(artifact) => persist.stored.push(artifact),
                Err(warning) => persist.warnings.push(warning),
            }
        }
        persist.duration = started.elapsed();
        persist
    }

    fn store_raw(&self, frame: &RawFrame, at: DateTime<Local>) -> Result<StoredArtifact, String> {
        let kind = ArtifactKind::Raw(frame.camera());
        let identifier = self.config.capture.naming.identifier(kind, at);
        let stored = self
            .encode_raw(frame)
            .and_then(|bytes| self.sink.store(kind, &identifier, &bytes));
        match stored {
            Ok(()) => Ok(StoredArtifact { kind, identifier }),
            Err(e) => Err(persist_warning(kind, &identifier, &e)),
        }
    }

    fn persist_composite(&self, event: &mut Event, composite: &CompositeArtifact) {
        let kind = ArtifactKind::Composite;
        let identifier = self.config.capture.naming.identifier(kind, event.triggered_at);
        let mut bytes = Vec::new();
        let stored = self
            .writer
            .write_image(&composite.image, &mut bytes, &self.config.encoding)
            .and_then(|()| self.sink.store(kind, &identifier, &bytes));
        match stored {
            Ok(()) => event.stored.push(StoredArtifact { kind, identifier }),
            Err(e) => event.warnings.push(persist_warning(kind, &identifier, &e)),
        }
    }

    fn encode_raw(&self, frame: &RawFrame) -> Result<Vec<u8>, OutputError> {
        let mut bytes = Vec::new();
        self.writer.write_raw(frame, &mut bytes, &self.config.encoding)?;
        Ok(bytes)
    }

    fn finish(
        &self,
        mut event: Event,
        [cam0, cam1]: [Option<RawFrame>; 2],
        composite: Option<CompositeArtifact>,
    ) -> CapturePairResult {
        self.enter(&mut event, CaptureState::Done);
        info!(
            stored = event.stored.len(),
            warnings = event.warnings.len(),
            "Capture done"
        );
        CapturePairResult {
            event_id: event.id,
            triggered_at: event.triggered_at,
            cam0,
            cam1,
            composite,
            status: CaptureStatus::Done {
                warnings: event.warnings,
            },
            stored: event.stored,
            history: event.history,
            timings: event.timings,
        }
    }

    fn fail(
        &self,
        mut event: Event,
        error: CaptureError,
        [cam0, cam1]: [Option<RawFrame>; 2],
    ) -> CapturePairResult {
        self.enter(&mut event, CaptureState::Failed);
        warn!(error = %error, stored = event.stored.len(), "Capture failed");
        CapturePairResult {
            event_id: event.id,
            triggered_at: event.triggered_at,
            cam0,
            cam1,
            composite: None,
            status: CaptureStatus::Failed {
                error,
                warnings: event.warnings,
            },
            stored: event.stored,
            history: event.history,
            timings: event.timings,
        }
    }
}

#[derive(Default)]
struct RawPersist {
    stored: Vec<StoredArtifact>,
    warnings: Vec<String>,
    duration: Duration,
}

fn persist_warning(kind: ArtifactKind, identifier: &str, error: &OutputError) -> String {
    warn!(%kind, identifier, error = %error, "Artifact not persisted");
    format!("{kind} {identifier} not persisted: {error}")
}

fn fill_missing(outcomes: &mut [Option<Arrival>; 2], cause: impl Fn(CameraId) -> (u32, AcquisitionError)) {
    for camera in CameraId::BOTH {
        let slot = &mut outcomes[camera.index()];
        if slot.is_none() {
            let (attempts, error) = cause(camera);
            *slot = Some(Arrival {
                camera,
                attempts,
                result: Err(error),
            });
        }
    }
}

/// One acquisition branch: requests a frame, retrying only on timeout.
///
/// The thread is detached. A source that overruns the deadline finishes on
/// its own and its late result is dropped with the channel.
fn spawn_acquisition(
    source: Arc<dyn CameraSource>,
    camera: CameraId,
    timeout: Duration,
    retries: u32,
    tx: Sender<Arrival>,
    span: Span,
) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("acquire-{camera}"))
        .spawn(move || {
            let _enter = span.enter();
            let mut attempts = 0;
            let result = loop {
                attempts += 1;
                match source.request_frame(timeout) {
                    Ok(frame) if frame.camera() != camera => {
                        break Err(AcquisitionError::Device {
                            camera,
                            reason: format!("source delivered a frame from {}", frame.camera()),
                        });
                    }
                    Ok(frame) => break Ok(frame),
                    Err(AcquisitionError::Timeout { .. }) if attempts <= retries => {
                        warn!(%camera, attempt = attempts, "Frame request timed out, retrying");
                    }
                    Err(e) => break Err(e),
                }
            };
            // the receiver is gone once the event gave up on this branch
            let _ = tx.send(Arrival {
                camera,
                attempts,
                result,
            });
        })
        .map(|_| ())
}
