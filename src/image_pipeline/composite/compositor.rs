use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::image_pipeline::common::error::CompositionError;
use crate::image_pipeline::composite::transform::{crop, resize, rotate};
use crate::image_pipeline::composite::types::{
    BlendCurve, CompositeArtifact, CompositorConfig, FrameProvenance, Layout,
};
use crate::image_pipeline::correction::CorrectedFrame;
use crate::image_pipeline::frame::Image;
use crate::image_pipeline::frame::image::quantize;

/// Crops, rotates and joins two corrected frames.
#[derive(Debug, Clone, Default)]
pub struct FrameCompositor {
    config: CompositorConfig,
}

/// A frame after crop/rotate, waiting for the join.
struct Placed {
    image: Image,
    provenance: FrameProvenance,
}

impl FrameCompositor {
    pub fn new(config: CompositorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Joins `a` and `b` under `layout`.
    ///
    /// Each frame's own crop and rotation are applied first. When the shared
    /// dimension differs by no more than the configured tolerance, the larger
    /// frame is scaled down to match; beyond it the composition fails.
    #[instrument(skip_all, fields(layout = layout.name()))]
    pub fn compose(
        &self,
        a: &CorrectedFrame,
        b: &CorrectedFrame,
        layout: &Layout,
    ) -> Result<CompositeArtifact, CompositionError> {
        if !a.image.same_format(&b.image) {
            return Err(CompositionError::FormatMismatch {
                a: a.image.format_label(),
                b: b.image.format_label(),
            });
        }

        let (mut a, mut b) = {
            let _span = tracing::info_span!("crop_rotate").entered();
            (self.place(a)?, self.place(b)?)
        };

        {
            let _span = tracing::info_span!("match_dimensions").entered();
            self.match_dimensions(&mut a, &mut b, layout)?;
        }

        let image = {
            let _span = tracing::info_span!("join").entered();
            match *layout {
                Layout::Horizontal => join_horizontal(&a.image, &b.image, 0, BlendCurve::Linear),
                Layout::Vertical => join_vertical(&a.image, &b.image),
                Layout::Blend { overlap, curve } => {
                    let narrowest = a.image.width().min(b.image.width());
                    if overlap > narrowest {
                        return Err(CompositionError::OverlapTooWide {
                            overlap,
                            width: narrowest,
                        });
                    }
                    join_horizontal(&a.image, &b.image, overlap, curve)
                }
            }
        };

        info!(
            width = image.width(),
            height = image.height(),
            "Composite assembled"
        );
        Ok(CompositeArtifact {
            image,
            layout: *layout,
            frames: [a.provenance, b.provenance],
        })
    }

    fn place(&self, frame: &CorrectedFrame) -> Result<Placed, CompositionError> {
        let (width, height) = (frame.width(), frame.height());
        let geometry = frame.geometry;

        let crop_rect = match geometry.crop {
            Some(rect) => Some(rect.clamp_to(width, height).ok_or(
                CompositionError::EmptyCrop {
                    camera: frame.camera,
                    width,
                    height,
                },
            )?),
            None => None,
        };
        if let (Some(requested), Some(applied)) = (geometry.crop, crop_rect) {
            if requested != applied {
                debug!(camera = %frame.camera, ?requested, ?applied, "Crop clamped to frame");
            }
        }

        let cropped = match crop_rect {
            Some(rect) => crop(&frame.image, rect),
            None => frame.image.clone(),
        };
        let image = rotate(&cropped, geometry.rotation, self.config.border);

        Ok(Placed {
            provenance: FrameProvenance {
                camera: frame.camera,
                captured_at: frame.captured_at,
                profile_version: frame.profile_version.clone(),
                input_size: (width, height),
                crop: crop_rect,
                rotation: geometry.rotation,
                resized_to: None,
                placed_size: (image.width(), image.height()),
            },
            image,
        })
    }

    /// Resizes the larger frame so the layout's shared dimension agrees.
    fn match_dimensions(
        &self,
        a: &mut Placed,
        b: &mut Placed,
        layout: &Layout,
    ) -> Result<(), CompositionError> {
        let vertical = matches!(layout, Layout::Vertical);
        let shared = |p: &Placed| {
            if vertical {
                p.image.width()
            } else {
                p.image.height()
            }
        };
        let (sa, sb) = (shared(a), shared(b));
        if sa == sb {
            return Ok(());
        }

        let difference = sa.abs_diff(sb) as f64 / sa.max(sb) as f64;
        if difference > self.config.tolerance {
            return Err(CompositionError::IncompatibleDimensions {
                layout: layout.name(),
                a_width: a.image.width(),
                a_height: a.image.height(),
                b_width: b.image.width(),
                b_height: b.image.height(),
                difference,
                tolerance: self.config.tolerance,
            });
        }

        let (larger, target) = if sa > sb { (a, sb) } else { (b, sa) };
        let (w, h) = (larger.image.width(), larger.image.height());
        let (new_w, new_h) = if vertical {
            (target, scale_side(h, target, w))
        } else {
            (scale_side(w, target, h), target)
        };
        debug!(
            camera = %larger.provenance.camera,
            from = ?(w, h),
            to = ?(new_w, new_h),
            difference,
            "Resizing to match"
        );
        larger.image = resize(&larger.image, new_w, new_h);
        larger.provenance.resized_to = Some((new_w, new_h));
        larger.provenance.placed_size = (new_w, new_h);
        Ok(())
    }
}

/// `side * target / reference`, rounded, never zero.
fn scale_side(side: usize, target: usize, reference: usize) -> usize {
    ((side as f64 * target as f64 / reference as f64).round() as usize).max(1)
}

/// A left of B with the last `overlap` columns of A cross-faded into B.
fn join_horizontal(a: &Image, b: &Image, overlap: usize, curve: BlendCurve) -> Image {
    let channels = a.channels();
    let height = a.height();
    let width = a.width() + b.width() - overlap;
    let max = a.max_value();
    let seam_start = (a.width() - overlap) * channels;
    let seam_len = overlap * channels;

    let weights: Vec<f64> = (0..overlap)
        .map(|i| curve.weight((i as f64 + 0.5) / overlap as f64))
        .collect();

    let mut out = Image::black(width, height, channels, a.bit_depth());
    let row_len = out.row_len();
    out.data_mut()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let (ra, rb) = (a.row(y), b.row(y));
            row[..seam_start].copy_from_slice(&ra[..seam_start]);
            for (i, w) in weights.iter().enumerate() {
                for c in 0..channels {
                    let idx = i * channels + c;
                    let va = ra[seam_start + idx] as f64;
                    let vb = rb[idx] as f64;
                    row[seam_start + idx] = quantize(va * (1.0 - w) + vb * w, max);
                }
            }
            row[seam_start + seam_len..].copy_from_slice(&rb[seam_len..]);
        });
    out
}

/// A above B.
fn join_vertical(a: &Image, b: &Image) -> Image {
    let mut out = Image::black(a.width(), a.height() + b.height(), a.channels(), a.bit_depth());
    let split = a.data().len();
    let data = out.data_mut();
    data[..split].copy_from_slice(a.data());
    data[split..].copy_from_slice(b.data());
    out
}
