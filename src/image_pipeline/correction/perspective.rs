use tracing::{debug, info, instrument};

use crate::image_pipeline::calibration::Homography;
use crate::image_pipeline::common::error::{ProcessingError, Result};
use crate::image_pipeline::correction::resample::warp;
use crate::image_pipeline::correction::types::{CorrectedFrame, CorrectionConfig};

/// Maps a distortion-corrected frame onto the reference plane of its
/// homography. The output keeps the input canvas size.
#[derive(Debug, Clone, Default)]
pub struct PerspectiveCorrector {
    config: CorrectionConfig,
}

impl PerspectiveCorrector {
    pub fn new(config: CorrectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    /// Rectifies `frame`; without a homography the frame passes through.
    #[instrument(skip_all, fields(camera = %frame.camera))]
    pub fn rectify(
        &self,
        frame: CorrectedFrame,
        homography: Option<&Homography>,
    ) -> Result<CorrectedFrame> {
        let Some(homography) = homography.filter(|h| !h.is_identity()) else {
            debug!("No homography, rectification is a pass-through");
            return Ok(frame);
        };

        let (width, height) = (frame.width(), frame.height());
        let warped = {
            let _span = tracing::info_span!("warp_perspective", width, height).entered();
            warp(&frame.image, width, height, self.config.border, |x, y| {
                homography.source_of(x, y)
            })
        };

        debug!(hits = warped.hits, total = width * height, "Perspective sampled");
        if warped.hits == 0 {
            return Err(ProcessingError::DegenerateTransform(
                "homography maps no reference-plane pixel into the frame".to_string(),
            ));
        }

        info!(width, height, "Perspective rectified");
        Ok(CorrectedFrame {
            image: warped.image,
            ..frame
        })
    }
}
