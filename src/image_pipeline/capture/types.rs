//! Capture event types

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::image_pipeline::capture::storage::{ArtifactKind, NamingConvention};
use crate::image_pipeline::common::error::CaptureError;
use crate::image_pipeline::common::timing::PipelineTimings;
use crate::image_pipeline::composite::CompositeArtifact;
use crate::image_pipeline::frame::{CameraId, RawFrame};

/// States a capture event moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Triggered,
    AwaitingFrame(CameraId),
    FrameReceived(CameraId),
    BothReceived,
    Correcting,
    Composing,
    Persisting,
    Done,
    Failed,
}

impl CaptureState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CaptureState::Done | CaptureState::Failed)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::Triggered => write!(f, "triggered"),
            CaptureState::AwaitingFrame(camera) => write!(f, "awaiting {camera}"),
            CaptureState::FrameReceived(camera) => write!(f, "received {camera}"),
            CaptureState::BothReceived => write!(f, "both received"),
            CaptureState::Correcting => write!(f, "correcting"),
            CaptureState::Composing => write!(f, "composing"),
            CaptureState::Persisting => write!(f, "persisting"),
            CaptureState::Done => write!(f, "done"),
            CaptureState::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal outcome of a capture event.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureStatus {
    /// The composite was produced. Persistence problems are listed as warnings.
    Done { warnings: Vec<String> },
    Failed {
        error: CaptureError,
        warnings: Vec<String>,
    },
}

impl CaptureStatus {
    pub fn warnings(&self) -> &[String] {
        match self {
            CaptureStatus::Done { warnings } | CaptureStatus::Failed { warnings, .. } => warnings,
        }
    }
}

/// An artifact the storage sink accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub kind: ArtifactKind,
    pub identifier: String,
}

/// Everything one capture event produced.
#[derive(Debug, Clone)]
pub struct CapturePairResult {
    pub event_id: u64,
    pub triggered_at: DateTime<Local>,
    pub cam0: Option<RawFrame>,
    pub cam1: Option<RawFrame>,
    pub composite: Option<CompositeArtifact>,
    pub status: CaptureStatus,
    pub stored: Vec<StoredArtifact>,
    pub history: Vec<CaptureState>,
    pub timings: PipelineTimings,
}

impl CapturePairResult {
    pub fn is_done(&self) -> bool {
        matches!(self.status, CaptureStatus::Done { .. })
    }

    pub fn error(&self) -> Option<&CaptureError> {
        match &self.status {
            CaptureStatus::Done { .. } => None,
            CaptureStatus::Failed { error, .. } => Some(error),
        }
    }

    pub fn frame(&self, camera: CameraId) -> Option<&RawFrame> {
        match camera {
            CameraId::Cam0 => self.cam0.as_ref(),
            CameraId::Cam1 => self.cam1.as_ref(),
        }
    }

    pub fn final_state(&self) -> CaptureState {
        self.history.last().copied().unwrap_or(CaptureState::Idle)
    }

    /// Human-readable terminal reason.
    pub fn reason(&self) -> String {
        match &self.status {
            CaptureStatus::Done { warnings } if warnings.is_empty() => {
                format!("capture {} done", self.event_id)
            }
            CaptureStatus::Done { warnings } => format!(
                "capture {} done with warnings: {}",
                self.event_id,
                warnings.join("; ")
            ),
            CaptureStatus::Failed { error, warnings } if warnings.is_empty() => {
                format!("capture {} failed: {error}", self.event_id)
            }
            CaptureStatus::Failed { error, warnings } => format!(
                "capture {} failed: {error} (warnings: {})",
                self.event_id,
                warnings.join("; ")
            ),
        }
    }
}

/// Cloneable handle that cancels an in-flight capture before both frames
/// have arrived.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    // dropping the sender disconnects `signal`, waking every waiter
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.trigger.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.trigger.lock().is_none()
    }

    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Acquisition and naming settings of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Per-attempt timeout handed to each camera source.
    #[serde(with = "millis", rename = "frame_timeout_ms")]
    pub frame_timeout: Duration,
    /// Additional attempts after a timeout.
    pub retries: u32,
    /// Slack past the timeout before a source that ignores it is abandoned.
    #[serde(with = "millis", rename = "join_grace_ms")]
    pub join_grace: Duration,
    pub naming: NamingConvention,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_secs(2),
            retries: 1,
            join_grace: Duration::from_millis(250),
            naming: NamingConvention::default(),
        }
    }
}

impl CaptureConfig {
    /// Largest retry count a config file may request.
    pub const MAX_RETRIES: u32 = 16;

    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder::default()
    }

    /// Wall-clock bound on waiting for both sources, saturating at
    /// `Duration::MAX`.
    pub fn acquisition_deadline(&self) -> Duration {
        self.frame_timeout
            .saturating_add(self.join_grace)
            .saturating_mul(self.retries.saturating_add(1))
    }
}

#[derive(Default)]
pub struct CaptureConfigBuilder {
    frame_timeout: Option<Duration>,
    retries: Option<u32>,
    join_grace: Option<Duration>,
    naming: Option<NamingConvention>,
}

impl CaptureConfigBuilder {
    pub fn frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn join_grace(mut self, grace: Duration) -> Self {
        self.join_grace = Some(grace);
        self
    }

    pub fn naming(mut self, naming: NamingConvention) -> Self {
        self.naming = Some(naming);
        self
    }

    pub fn build(self) -> CaptureConfig {
        let default = CaptureConfig::default();
        CaptureConfig {
            frame_timeout: self.frame_timeout.unwrap_or(default.frame_timeout),
            retries: self.retries.unwrap_or(default.retries),
            join_grace: self.join_grace.unwrap_or(default.join_grace),
            naming: self.naming.unwrap_or(default.naming),
        }
    }
}

/// `Duration` as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
