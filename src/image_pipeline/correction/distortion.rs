use tracing::{debug, info, instrument};

use crate::image_pipeline::calibration::types::nominal_radius;
use crate::image_pipeline::calibration::{
    CalibratedProfile, CalibrationProfile, CanvasPadding, Distortion, SensorResolution,
};
use crate::image_pipeline::common::error::{ProcessingError, Result};
use crate::image_pipeline::correction::resample::warp;
use crate::image_pipeline::correction::types::{CorrectedFrame, CorrectionConfig};
use crate::image_pipeline::frame::{Image, RawFrame};

/// Removes lens distortion by inverse mapping.
///
/// For every destination pixel the lens model gives the location the sensor
/// actually recorded it at, normalized about the distortion centre by the
/// frame's half diagonal, and that location is sampled bilinearly.
#[derive(Debug, Clone, Default)]
pub struct DistortionCorrector {
    config: CorrectionConfig,
}

impl DistortionCorrector {
    pub fn new(config: CorrectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    /// Normalizes `frame` and undistorts it with `profile`.
    ///
    /// Default profiles and identity models produce a plain copy of the
    /// normalized image.
    #[instrument(skip_all, fields(camera = %frame.camera(), width = frame.width(), height = frame.height()))]
    pub fn correct(&self, frame: &RawFrame, profile: &CalibrationProfile) -> Result<CorrectedFrame> {
        let image = {
            let _span = tracing::info_span!("normalize", format = %frame.format()).entered();
            Image::from_raw(frame, self.config.demosaic)?
        };

        let image = match profile {
            CalibrationProfile::Default(_) => {
                debug!("Default profile, distortion correction is a copy");
                image
            }
            CalibrationProfile::Calibrated(p) => self.undistort(image, p)?,
        };

        info!(
            width = image.width(),
            height = image.height(),
            version = %profile.version(),
            "Distortion corrected"
        );
        Ok(CorrectedFrame {
            camera: frame.camera(),
            captured_at: frame.captured_at(),
            profile_version: profile.version(),
            geometry: profile.geometry(),
            image,
        })
    }

    fn undistort(&self, image: Image, profile: &CalibratedProfile) -> Result<Image> {
        let distortion = &profile.distortion;
        if distortion.model.is_identity() && profile.canvas.is_zero() {
            debug!("Identity model without padding, distortion correction is a copy");
            return Ok(image);
        }

        let (width, height) = (image.width(), image.height());
        let padding = scaled_padding(profile.canvas, profile.sensor, width, height);
        let [cx, cy] = distortion.center_for(profile.sensor, width, height);
        let radius = nominal_radius(width, height);
        let (left, top) = (padding.left as f64, padding.top as f64);
        let out_width = width + padding.left + padding.right;
        let out_height = height + padding.top + padding.bottom;

        let _span = tracing::info_span!(
            "undistort",
            model = distortion.model.name(),
            out_width,
            out_height
        )
        .entered();

        let warped = warp(&image, out_width, out_height, self.config.border, |u, v| {
            let n = [(u - left - cx) / radius, (v - top - cy) / radius];
            let [dx, dy] = distortion.model.distort(n);
            Some((cx + radius * dx, cy + radius * dy))
        });

        debug!(hits = warped.hits, total = out_width * out_height, "Undistort sampled");
        if warped.hits == 0 {
            return Err(ProcessingError::DegenerateTransform(format!(
                "{} model maps no destination pixel into the source frame",
                distortion.model.name()
            )));
        }
        Ok(warped.image)
    }

    /// Applies the forward lens model to an undistorted image.
    ///
    /// The inverse of [`correct`](Self::correct) for a profile without canvas
    /// padding: each destination pixel is undistorted numerically and sampled
    /// from `image`. Pixels where the model cannot be inverted take the
    /// border fill.
    #[instrument(skip_all, fields(camera = %profile.camera()))]
    pub fn distort_image(&self, image: &Image, profile: &CalibrationProfile) -> Result<Image> {
        let CalibrationProfile::Calibrated(p) = profile else {
            return Ok(image.clone());
        };
        if p.distortion.model.is_identity() {
            return Ok(image.clone());
        }
        let (width, height) = (image.width(), image.height());
        let distortion: &Distortion = &p.distortion;
        let [cx, cy] = distortion.center_for(p.sensor, width, height);
        let radius = nominal_radius(width, height);

        let warped = warp(image, width, height, self.config.border, |x, y| {
            let n = [(x - cx) / radius, (y - cy) / radius];
            let [ux, uy] = distortion.model.undistort(n)?;
            Some((cx + radius * ux, cy + radius * uy))
        });
        if warped.hits == 0 {
            return Err(ProcessingError::DegenerateTransform(format!(
                "{} model cannot be inverted anywhere on the frame",
                distortion.model.name()
            )));
        }
        Ok(warped.image)
    }
}

/// Padding authored in sensor pixels, rescaled to the actual frame size.
fn scaled_padding(
    padding: CanvasPadding,
    sensor: SensorResolution,
    width: usize,
    height: usize,
) -> CanvasPadding {
    if padding.is_zero() || (sensor.width == width && sensor.height == height) {
        return padding;
    }
    let sx = width as f64 / sensor.width as f64;
    let sy = height as f64 / sensor.height as f64;
    let scale = |v: usize, s: f64| (v as f64 * s).round() as usize;
    CanvasPadding {
        top: scale(padding.top, sy),
        bottom: scale(padding.bottom, sy),
        left: scale(padding.left, sx),
        right: scale(padding.right, sx),
    }
}
