use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::image_pipeline::calibration::document::CalibrationDocument;
use crate::image_pipeline::calibration::types::{CalibrationSet, CalibrationSource};
use crate::image_pipeline::common::error::CalibrationError;

/// Reads and validates a calibration document without any fallback.
pub fn read_calibration(path: impl AsRef<Path>) -> Result<CalibrationSet, CalibrationError> {
    let path = path.as_ref();
    CalibrationDocument::read(path)?.into_set(CalibrationSource::File(path.to_path_buf()))
}

/// Owner of the active calibration profile pair.
///
/// Readers take an `Arc` snapshot, so a reload never changes a profile that
/// a running capture is already using. The swap happens only after the new
/// document validated completely.
pub struct CalibrationStore {
    source: Option<PathBuf>,
    active: RwLock<Arc<CalibrationSet>>,
    last_error: Mutex<Option<CalibrationError>>,
}

impl CalibrationStore {
    /// Store holding the built-in default profiles and no reload source.
    pub fn builtin() -> Self {
        Self {
            source: None,
            active: RwLock::new(Arc::new(CalibrationSet::builtin())),
            last_error: Mutex::new(None),
        }
    }

    /// Store holding an already-built profile pair and no reload source.
    pub fn from_set(set: CalibrationSet) -> Self {
        Self {
            source: None,
            active: RwLock::new(Arc::new(set)),
            last_error: Mutex::new(None),
        }
    }

    /// Loads `path`, falling back to the default profiles on any failure.
    ///
    /// The failure is kept for [`last_error`](Self::last_error) instead of
    /// being returned; a later [`reload`](Self::reload) retries the same path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let (set, error) = match read_calibration(&path) {
            Ok(set) => {
                info!(version = %set.cam0.version(), "Calibration loaded");
                (set, None)
            }
            Err(e) => {
                warn!(error = %e, "Calibration rejected, using default profiles");
                (CalibrationSet::builtin(), Some(e))
            }
        };

        Self {
            source: Some(path),
            active: RwLock::new(Arc::new(set)),
            last_error: Mutex::new(error),
        }
    }

    /// Snapshot of the active profile pair.
    pub fn active(&self) -> Arc<CalibrationSet> {
        Arc::clone(&self.active.read())
    }

    /// Re-reads the source and swaps the active pair if it validates.
    ///
    /// On failure the previous pair stays active and the error is both
    /// recorded and returned.
    #[instrument(skip(self))]
    pub fn reload(&self) -> Result<Arc<CalibrationSet>, CalibrationError> {
        let path = self.source.as_ref().ok_or(CalibrationError::NoSource)?;
        match read_calibration(path) {
            Ok(set) => {
                let set = Arc::new(set);
                *self.active.write() = Arc::clone(&set);
                *self.last_error.lock() = None;
                info!(version = %set.cam0.version(), "Calibration reloaded");
                Ok(set)
            }
            Err(e) => {
                warn!(error = %e, "Calibration reload rejected, keeping active profiles");
                *self.last_error.lock() = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Most recent load/reload failure, cleared by a successful reload.
    pub fn last_error(&self) -> Option<CalibrationError> {
        self.last_error.lock().clone()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::builtin()
    }
}
