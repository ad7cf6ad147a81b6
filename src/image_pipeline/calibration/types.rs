//! Calibration profile types

use std::fmt;
use std::path::PathBuf;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::image_pipeline::common::error::ProcessingError;
use crate::image_pipeline::frame::CameraId;

/// Smallest accepted ratio between the extreme singular values of a homography.
pub const MIN_RECIPROCAL_CONDITION: f64 = 1e-12;

/// Iteration limits for inverting a distortion model numerically.
const UNDISTORT_MAX_ITERS: usize = 50;
const UNDISTORT_EPS: f64 = 1e-12;

/// Nominal sensor resolution the calibration was authored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorResolution {
    pub width: usize,
    pub height: usize,
}

impl SensorResolution {
    /// Largest accepted width or height.
    pub const MAX_DIMENSION: usize = 65_536;

    /// Half the diagonal; the unit length of normalized coordinates.
    pub fn nominal_radius(&self) -> f64 {
        nominal_radius(self.width, self.height)
    }
}

impl Default for SensorResolution {
    /// Full-resolution IMX708 output.
    fn default() -> Self {
        Self {
            width: 4608,
            height: 2592,
        }
    }
}

pub(crate) fn nominal_radius(width: usize, height: usize) -> f64 {
    0.5 * (width as f64).hypot(height as f64)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileVersion(String);

impl ProfileVersion {
    pub const DEFAULT: &'static str = "default";

    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lens model evaluated in normalized coordinates (distortion centre at the
/// origin, nominal radius = 1).
#[derive(Debug, Clone, PartialEq)]
pub enum DistortionModel {
    Identity,
    /// Brown-Conrady radial/tangential model.
    RadialTangential {
        k1: f64,
        k2: f64,
        p1: f64,
        p2: f64,
        k3: f64,
    },
    /// Radial scale polynomial `Σ cᵢ·rⁱ` mapping an undistorted radius to
    /// the distorted sampling location.
    PolynomialBackward { coefficients: Vec<f64> },
}

impl DistortionModel {
    /// Coefficient order `[k1, k2, p1, p2, k3]`.
    pub const RADIAL_TANGENTIAL_COEFFICIENTS: usize = 5;
    pub const MAX_POLYNOMIAL_ORDER: usize = 8;

    pub fn radial_tangential(c: [f64; 5]) -> Self {
        DistortionModel::RadialTangential {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DistortionModel::Identity => "identity",
            DistortionModel::RadialTangential { .. } => "radial_tangential",
            DistortionModel::PolynomialBackward { .. } => "polynomial_backward",
        }
    }

    /// True when `distort` is the identity map for every input.
    pub fn is_identity(&self) -> bool {
        match self {
            DistortionModel::Identity => true,
            DistortionModel::RadialTangential { k1, k2, p1, p2, k3 } => {
                [*k1, *k2, *p1, *p2, *k3].iter().all(|&c| c == 0.0)
            }
            DistortionModel::PolynomialBackward { coefficients } => coefficients
                .iter()
                .enumerate()
                .all(|(i, &c)| if i == 0 { c == 1.0 } else { c == 0.0 }),
        }
    }

    /// Undistorted normalized point to the distorted location the sensor saw.
    pub fn distort(&self, n: [f64; 2]) -> [f64; 2] {
        let [x, y] = n;
        match self {
            DistortionModel::Identity => n,
            DistortionModel::RadialTangential { k1, k2, p1, p2, k3 } => {
                let r2 = x * x + y * y;
                let r4 = r2 * r2;
                let r6 = r4 * r2;
                let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
                let x_tan = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let y_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                [x * radial + x_tan, y * radial + y_tan]
            }
            DistortionModel::PolynomialBackward { coefficients } => {
                let factor = radial_factor(coefficients, (x * x + y * y).sqrt());
                [x * factor, y * factor]
            }
        }
    }

    /// Inverse of [`distort`](Self::distort) by fixed-point iteration.
    pub fn undistort(&self, d: [f64; 2]) -> Option<[f64; 2]> {
        match self {
            DistortionModel::Identity => Some(d),
            DistortionModel::RadialTangential { k1, k2, p1, p2, k3 } => {
                let (mut x, mut y) = (d[0], d[1]);
                for _ in 0..UNDISTORT_MAX_ITERS {
                    let r2 = x * x + y * y;
                    let r4 = r2 * r2;
                    let r6 = r4 * r2;
                    let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;
                    if !radial.is_finite() || radial.abs() < 1e-12 {
                        return None;
                    }
                    let dx_tan = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                    let dy_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                    let x_next = (d[0] - dx_tan) / radial;
                    let y_next = (d[1] - dy_tan) / radial;
                    if !x_next.is_finite() || !y_next.is_finite() {
                        return None;
                    }
                    let step = ((x_next - x).powi(2) + (y_next - y).powi(2)).sqrt();
                    x = x_next;
                    y = y_next;
                    if step <= UNDISTORT_EPS {
                        break;
                    }
                }
                Some([x, y])
            }
            DistortionModel::PolynomialBackward { coefficients } => {
                let rd = (d[0] * d[0] + d[1] * d[1]).sqrt();
                if rd == 0.0 {
                    return Some(d);
                }
                let mut ru = rd / coefficients.first().copied().unwrap_or(1.0);
                for _ in 0..UNDISTORT_MAX_ITERS {
                    let factor = radial_factor(coefficients, ru);
                    if !factor.is_finite() || factor.abs() < 1e-12 {
                        return None;
                    }
                    let next = rd / factor;
                    let step = (next - ru).abs();
                    ru = next;
                    if step <= UNDISTORT_EPS {
                        break;
                    }
                }
                let scale = ru / rd;
                scale.is_finite().then(|| [d[0] * scale, d[1] * scale])
            }
        }
    }
}

fn radial_factor(coefficients: &[f64], r: f64) -> f64 {
    // Horner from the highest order term
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * r + c)
}

/// Distortion model plus the sensor-pixel location of its centre.
#[derive(Debug, Clone, PartialEq)]
pub struct Distortion {
    pub model: DistortionModel,
    /// Centre in nominal sensor pixels; `None` means the frame centre.
    pub center: Option<[f64; 2]>,
}

impl Distortion {
    pub fn identity() -> Self {
        Self {
            model: DistortionModel::Identity,
            center: None,
        }
    }

    /// Centre in the pixel grid of a `width`×`height` frame.
    pub fn center_for(&self, sensor: SensorResolution, width: usize, height: usize) -> [f64; 2] {
        match self.center {
            Some([cx, cy]) => [
                cx * width as f64 / sensor.width as f64,
                cy * height as f64 / sensor.height as f64,
            ],
            None => [(width as f64 - 1.0) * 0.5, (height as f64 - 1.0) * 0.5],
        }
    }
}

/// Invertible 3×3 projective transform from corrected-frame pixels onto the
/// shared reference plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Homography {
    forward: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl Homography {
    /// Builds from a row-major forward matrix.
    pub fn new(rows: [[f64; 3]; 3]) -> Result<Self, ProcessingError> {
        let forward = Matrix3::from_fn(|r, c| rows[r][c]);
        let inverse = checked_inverse(&forward)?;
        Ok(Self { forward, inverse })
    }

    /// Builds from the 8-coefficient backward form
    /// `src = ((a·x+b·y+c)/(g·x+h·y+1), (d·x+e·y+f)/(g·x+h·y+1))`.
    pub fn from_backward_coefficients(c: [f64; 8]) -> Result<Self, ProcessingError> {
        let inverse = Matrix3::new(c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7], 1.0);
        let forward = checked_inverse(&inverse)?;
        Ok(Self { forward, inverse })
    }

    pub fn identity() -> Self {
        Self {
            forward: Matrix3::identity(),
            inverse: Matrix3::identity(),
        }
    }

    pub fn forward(&self) -> &Matrix3<f64> {
        &self.forward
    }

    pub fn inverse(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    pub fn is_identity(&self) -> bool {
        self.forward == Matrix3::identity()
    }

    /// Reference-plane pixel to the corrected-frame location it came from.
    pub fn source_of(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.inverse * Vector3::new(x, y, 1.0);
        if p.z.abs() < 1e-12 {
            return None;
        }
        let (sx, sy) = (p.x / p.z, p.y / p.z);
        (sx.is_finite() && sy.is_finite()).then_some((sx, sy))
    }

    /// Corrected-frame pixel to its reference-plane location.
    pub fn project(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.forward * Vector3::new(x, y, 1.0);
        if p.z.abs() < 1e-12 {
            return None;
        }
        Some((p.x / p.z, p.y / p.z))
    }
}

/// Inverts `m` after rejecting non-finite or ill-conditioned matrices.
fn checked_inverse(m: &Matrix3<f64>) -> Result<Matrix3<f64>, ProcessingError> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(ProcessingError::DegenerateTransform(
            "matrix has non-finite entries".to_string(),
        ));
    }
    let singular = m.singular_values();
    let max = singular.max();
    let min = singular.min();
    if max == 0.0 || min / max < MIN_RECIPROCAL_CONDITION {
        return Err(ProcessingError::DegenerateTransform(format!(
            "reciprocal condition {:e} below {:e}",
            if max == 0.0 { 0.0 } else { min / max },
            MIN_RECIPROCAL_CONDITION
        )));
    }
    m.try_inverse().ok_or_else(|| {
        ProcessingError::DegenerateTransform("matrix is singular".to_string())
    })
}

/// Pixel rectangle, top-left origin.
///
/// Crops address the corrected frame the compositor receives, canvas padding
/// included, and are not rescaled from the nominal sensor resolution. The
/// sensor only bounds them at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl CropRect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Intersection with a `width`×`height` frame, `None` when empty.
    pub fn clamp_to(&self, width: usize, height: usize) -> Option<CropRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        (w > 0 && h > 0).then_some(CropRect::new(self.x, self.y, w, h))
    }
}

/// Rotation applied after cropping. Positive angles are counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Rotation {
    #[default]
    None,
    Ccw90,
    Ccw180,
    Ccw270,
    /// Resampled rotation about the frame centre, canvas size unchanged.
    Degrees(f64),
}

impl Rotation {
    pub fn from_degrees(degrees: f64) -> Self {
        let normalized = degrees.rem_euclid(360.0);
        let near = |target: f64| (normalized - target).abs() < 1e-9;
        if near(0.0) || near(360.0) {
            Rotation::None
        } else if near(90.0) {
            Rotation::Ccw90
        } else if near(180.0) {
            Rotation::Ccw180
        } else if near(270.0) {
            Rotation::Ccw270
        } else {
            Rotation::Degrees(degrees)
        }
    }

    pub fn degrees(&self) -> f64 {
        match self {
            Rotation::None => 0.0,
            Rotation::Ccw90 => 90.0,
            Rotation::Ccw180 => 180.0,
            Rotation::Ccw270 => 270.0,
            Rotation::Degrees(d) => *d,
        }
    }
}

/// Extra border added around the corrected frame so content pushed outward
/// by the distortion model stays on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasPadding {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl CanvasPadding {
    pub fn is_zero(&self) -> bool {
        *self == CanvasPadding::default()
    }
}

/// Crop and rotation the compositor applies to a corrected frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutputGeometry {
    pub crop: Option<CropRect>,
    pub rotation: Rotation,
}

/// Fully populated calibration for one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedProfile {
    pub camera: CameraId,
    pub version: ProfileVersion,
    pub sensor: SensorResolution,
    pub distortion: Distortion,
    pub homography: Option<Homography>,
    pub geometry: OutputGeometry,
    pub canvas: CanvasPadding,
}

/// Calibration for one camera: either complete or the explicit default.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationProfile {
    /// No calibration; every correction stage is the identity.
    Default(CameraId),
    Calibrated(CalibratedProfile),
}

impl CalibrationProfile {
    pub fn camera(&self) -> CameraId {
        match self {
            CalibrationProfile::Default(camera) => *camera,
            CalibrationProfile::Calibrated(p) => p.camera,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, CalibrationProfile::Default(_))
    }

    pub fn version(&self) -> ProfileVersion {
        match self {
            CalibrationProfile::Default(_) => ProfileVersion::new(ProfileVersion::DEFAULT),
            CalibrationProfile::Calibrated(p) => p.version.clone(),
        }
    }

    pub fn homography(&self) -> Option<&Homography> {
        match self {
            CalibrationProfile::Default(_) => None,
            CalibrationProfile::Calibrated(p) => p.homography.as_ref(),
        }
    }

    pub fn geometry(&self) -> OutputGeometry {
        match self {
            CalibrationProfile::Default(_) => OutputGeometry::default(),
            CalibrationProfile::Calibrated(p) => p.geometry,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationSource {
    Builtin,
    File(PathBuf),
}

/// The profile pair active for a capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSet {
    pub cam0: CalibrationProfile,
    pub cam1: CalibrationProfile,
    pub source: CalibrationSource,
}

impl CalibrationSet {
    /// Built-in pair of default profiles.
    pub fn builtin() -> Self {
        Self {
            cam0: CalibrationProfile::Default(CameraId::Cam0),
            cam1: CalibrationProfile::Default(CameraId::Cam1),
            source: CalibrationSource::Builtin,
        }
    }

    pub fn profile(&self, camera: CameraId) -> &CalibrationProfile {
        match camera {
            CameraId::Cam0 => &self.cam0,
            CameraId::Cam1 => &self.cam1,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.source == CalibrationSource::Builtin
    }
}
