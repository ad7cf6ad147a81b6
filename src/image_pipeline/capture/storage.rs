//! Storage collaborator and artifact naming

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::image_pipeline::common::error::{ConfigError, OutputError};
use crate::image_pipeline::frame::CameraId;

pub const DEFAULT_PREFIX: &str = "capture";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// What an artifact is; sinks may route kinds differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Raw(CameraId),
    Composite,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Raw(camera) => write!(f, "raw-camera-{}", camera.index()),
            ArtifactKind::Composite => write!(f, "composite"),
        }
    }
}

/// Durable destination for encoded artifacts.
pub trait StorageSink: Send + Sync {
    fn store(&self, kind: ArtifactKind, identifier: &str, bytes: &[u8]) -> Result<(), OutputError>;
}

/// Builds artifact identifiers from a prefix and the trigger timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingConvention {
    pub prefix: String,
    /// `chrono` strftime format.
    pub timestamp_format: String,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
        }
    }
}

impl NamingConvention {
    pub fn new(prefix: impl Into<String>, timestamp_format: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            timestamp_format: timestamp_format.into(),
        }
    }

    /// Rejects prefixes that would escape the sink and unparseable formats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() || self.prefix.contains(['/', '\\']) {
            return Err(ConfigError::Value(format!(
                "naming prefix {:?} must be a non-empty file name fragment",
                self.prefix
            )));
        }
        if StrftimeItems::new(&self.timestamp_format).any(|item| matches!(item, Item::Error)) {
            return Err(ConfigError::Value(format!(
                "invalid timestamp format {:?}",
                self.timestamp_format
            )));
        }
        Ok(())
    }

    /// `{prefix}_{timestamp}_cam{N}`
    pub fn raw_identifier(&self, at: DateTime<Local>, camera: CameraId) -> String {
        format!("{}_{}_cam{}", self.prefix, self.timestamp(at), camera.index())
    }

    /// `{prefix}_{timestamp}`
    pub fn composite_identifier(&self, at: DateTime<Local>) -> String {
        format!("{}_{}", self.prefix, self.timestamp(at))
    }

    pub fn identifier(&self, kind: ArtifactKind, at: DateTime<Local>) -> String {
        match kind {
            ArtifactKind::Raw(camera) => self.raw_identifier(at, camera),
            ArtifactKind::Composite => self.composite_identifier(at),
        }
    }

    fn timestamp(&self, at: DateTime<Local>) -> String {
        let mut out = String::new();
        if write!(out, "{}", at.format(&self.timestamp_format)).is_err() {
            out.clear();
            out.push_str(&at.format(DEFAULT_TIMESTAMP_FORMAT).to_string());
        }
        out
    }
}

/// Writes each artifact to `<root>/<identifier>.tiff`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{identifier}.tiff"))
    }
}

impl StorageSink for DirectorySink {
    fn store(&self, kind: ArtifactKind, identifier: &str, bytes: &[u8]) -> Result<(), OutputError> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.path_for(identifier);
        std::fs::write(&path, bytes)?;
        debug!(%kind, path = %path.display(), bytes = bytes.len(), "Artifact stored");
        Ok(())
    }
}
