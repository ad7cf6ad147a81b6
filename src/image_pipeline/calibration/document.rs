//! On-disk calibration document (JSON) and its structural validation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::image_pipeline::calibration::types::{
    CalibratedProfile, CalibrationProfile, CalibrationSet, CalibrationSource, CanvasPadding,
    CropRect, Distortion, DistortionModel, Homography, OutputGeometry, ProfileVersion, Rotation,
    SensorResolution,
};
use crate::image_pipeline::common::error::CalibrationError;
use crate::image_pipeline::frame::CameraId;

pub const UNVERSIONED: &str = "unversioned";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationDocument {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub sensor: SensorResolution,
    pub cameras: BTreeMap<CameraId, CameraEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraEntry {
    #[serde(default)]
    pub distortion: Option<DistortionEntry>,
    /// Row-major forward matrix.
    #[serde(default)]
    pub homography: Option<[[f64; 3]; 3]>,
    /// Backward 8-coefficient form, alternative to `homography`.
    #[serde(default)]
    pub perspective_coefficients: Option<Vec<f64>>,
    #[serde(default)]
    pub crop: Option<CropRect>,
    #[serde(default)]
    pub rotation_deg: f64,
    #[serde(default)]
    pub canvas: Option<CanvasPadding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DistortionEntry {
    RadialTangential {
        coefficients: Vec<f64>,
        #[serde(default)]
        center: Option<[f64; 2]>,
    },
    PolynomialBackward {
        order: usize,
        coefficients: Vec<f64>,
        #[serde(default)]
        center: Option<[f64; 2]>,
        #[serde(default)]
        units: CoefficientUnits,
    },
}

/// Unit of the radius a polynomial was fitted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoefficientUnits {
    /// Pixels of the nominal sensor resolution.
    #[default]
    Pixels,
    Normalized,
}

impl CalibrationDocument {
    pub fn from_json(text: &str) -> Result<Self, CalibrationError> {
        serde_json::from_str(text).map_err(|e| CalibrationError::Parse(e.to_string()))
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CalibrationError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    /// Validates every camera entry and builds the profile pair.
    pub fn into_set(self, source: CalibrationSource) -> Result<CalibrationSet, CalibrationError> {
        let sensor = self.sensor;
        if sensor.width == 0
            || sensor.height == 0
            || sensor.width > SensorResolution::MAX_DIMENSION
            || sensor.height > SensorResolution::MAX_DIMENSION
        {
            return Err(CalibrationError::InvalidSensor(sensor.width, sensor.height));
        }
        let version = ProfileVersion::new(self.version.unwrap_or_else(|| UNVERSIONED.to_string()));

        let mut cameras = self.cameras;
        let mut build = |camera: CameraId| -> Result<CalibrationProfile, CalibrationError> {
            let entry = cameras
                .remove(&camera)
                .ok_or(CalibrationError::MissingCamera(camera))?;
            validate_entry(camera, entry, sensor, version.clone())
                .map(CalibrationProfile::Calibrated)
        };
        let cam0 = build(CameraId::Cam0)?;
        let cam1 = build(CameraId::Cam1)?;

        Ok(CalibrationSet { cam0, cam1, source })
    }
}

fn validate_entry(
    camera: CameraId,
    entry: CameraEntry,
    sensor: SensorResolution,
    version: ProfileVersion,
) -> Result<CalibratedProfile, CalibrationError> {
    let distortion = match entry.distortion {
        Some(distortion) => validate_distortion(camera, distortion, sensor)?,
        None => Distortion::identity(),
    };

    let homography = match (entry.homography, entry.perspective_coefficients) {
        (Some(_), Some(_)) => {
            return Err(CalibrationError::InvalidValue {
                camera,
                field: "homography",
                reason: "both homography and perspective_coefficients are given".to_string(),
            });
        }
        (Some(rows), None) => Some(Homography::new(rows).map_err(|e| {
            CalibrationError::SingularHomography {
                camera,
                reason: e.to_string(),
            }
        })?),
        (None, Some(coefficients)) => {
            let coefficients: [f64; 8] =
                coefficients
                    .as_slice()
                    .try_into()
                    .map_err(|_| CalibrationError::CoefficientCount {
                        camera,
                        model: "perspective",
                        expected: 8,
                        found: coefficients.len(),
                    })?;
            Some(
                Homography::from_backward_coefficients(coefficients).map_err(|e| {
                    CalibrationError::SingularHomography {
                        camera,
                        reason: e.to_string(),
                    }
                })?,
            )
        }
        (None, None) => None,
    };

    if let Some(crop) = entry.crop {
        if crop.width == 0 || crop.height == 0 {
            return Err(CalibrationError::InvalidValue {
                camera,
                field: "crop",
                reason: format!("empty rectangle {}x{}", crop.width, crop.height),
            });
        }
        let fits = |offset: usize, extent: usize, limit: usize| {
            offset.checked_add(extent).is_some_and(|end| end <= limit)
        };
        if !fits(crop.x, crop.width, sensor.width) || !fits(crop.y, crop.height, sensor.height) {
            return Err(CalibrationError::CropOutOfRange {
                camera,
                x: crop.x,
                y: crop.y,
                width: crop.width,
                height: crop.height,
                sensor_width: sensor.width,
                sensor_height: sensor.height,
            });
        }
    }

    if !entry.rotation_deg.is_finite() {
        return Err(CalibrationError::InvalidValue {
            camera,
            field: "rotation_deg",
            reason: "not a finite angle".to_string(),
        });
    }

    let canvas = entry.canvas.unwrap_or_default();
    let within = |a: usize, b: usize, limit: usize| a.checked_add(b).is_some_and(|sum| sum <= limit);
    if !within(canvas.top, canvas.bottom, sensor.height)
        || !within(canvas.left, canvas.right, sensor.width)
    {
        return Err(CalibrationError::InvalidValue {
            camera,
            field: "canvas",
            reason: "padding exceeds the sensor resolution".to_string(),
        });
    }

    debug!(
        %camera,
        model = distortion.model.name(),
        homography = homography.is_some(),
        "Validated calibration entry"
    );

    Ok(CalibratedProfile {
        camera,
        version,
        sensor,
        distortion,
        homography,
        geometry: OutputGeometry {
            crop: entry.crop,
            rotation: Rotation::from_degrees(entry.rotation_deg),
        },
        canvas,
    })
}

fn validate_distortion(
    camera: CameraId,
    entry: DistortionEntry,
    sensor: SensorResolution,
) -> Result<Distortion, CalibrationError> {
    let non_finite = |field: &'static str| CalibrationError::InvalidValue {
        camera,
        field,
        reason: "contains a non-finite value".to_string(),
    };

    let (model, center) = match entry {
        DistortionEntry::RadialTangential {
            coefficients,
            center,
        } => {
            let c: [f64; DistortionModel::RADIAL_TANGENTIAL_COEFFICIENTS] = coefficients
                .as_slice()
                .try_into()
                .map_err(|_| CalibrationError::CoefficientCount {
                    camera,
                    model: "radial_tangential",
                    expected: DistortionModel::RADIAL_TANGENTIAL_COEFFICIENTS,
                    found: coefficients.len(),
                })?;
            if c.iter().any(|v| !v.is_finite()) {
                return Err(non_finite("distortion.coefficients"));
            }
            (DistortionModel::radial_tangential(c), center)
        }
        DistortionEntry::PolynomialBackward {
            order,
            coefficients,
            center,
            units,
        } => {
            if order == 0 || order > DistortionModel::MAX_POLYNOMIAL_ORDER {
                return Err(CalibrationError::InvalidValue {
                    camera,
                    field: "distortion.order",
                    reason: format!(
                        "{order} is outside 1..={}",
                        DistortionModel::MAX_POLYNOMIAL_ORDER
                    ),
                });
            }
            if coefficients.len() != order {
                return Err(CalibrationError::CoefficientCount {
                    camera,
                    model: "polynomial_backward",
                    expected: order,
                    found: coefficients.len(),
                });
            }
            if coefficients.iter().any(|v| !v.is_finite()) {
                return Err(non_finite("distortion.coefficients"));
            }
            if coefficients[0] <= 0.0 {
                return Err(CalibrationError::InvalidValue {
                    camera,
                    field: "distortion.coefficients",
                    reason: "constant term must be positive".to_string(),
                });
            }
            let coefficients = match units {
                CoefficientUnits::Normalized => coefficients,
                CoefficientUnits::Pixels => {
                    let radius = sensor.nominal_radius();
                    coefficients
                        .iter()
                        .enumerate()
                        .map(|(i, c)| c * radius.powi(i as i32))
                        .collect()
                }
            };
            (DistortionModel::PolynomialBackward { coefficients }, center)
        }
    };

    if let Some([cx, cy]) = center {
        if !cx.is_finite() || !cy.is_finite() {
            return Err(non_finite("distortion.center"));
        }
        if cx < 0.0 || cy < 0.0 || cx > sensor.width as f64 || cy > sensor.height as f64 {
            return Err(CalibrationError::InvalidValue {
                camera,
                field: "distortion.center",
                reason: format!(
                    "({cx}, {cy}) lies outside the {}x{} sensor",
                    sensor.width, sensor.height
                ),
            });
        }
    }

    Ok(Distortion { model, center })
}
