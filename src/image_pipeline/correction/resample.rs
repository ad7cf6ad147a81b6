//! Inverse-mapping resampler shared by every geometric stage.

use rayon::prelude::*;

use crate::image_pipeline::frame::image::quantize;
use crate::image_pipeline::frame::{BorderPolicy, Image};

/// Result of one warp: the destination image and how many of its pixels
/// were sampled from the source rather than filled by the border policy.
pub(crate) struct Warped {
    pub image: Image,
    pub hits: usize,
}

/// Fills a `width`×`height` destination by sampling `src` at `map(x, y)`.
///
/// `map` returns the continuous source location of a destination pixel
/// centre, or `None` when the transform is undefined there. Rows are
/// processed in parallel.
pub(crate) fn warp<F>(src: &Image, width: usize, height: usize, border: BorderPolicy, map: F) -> Warped
where
    F: Fn(f64, f64) -> Option<(f64, f64)> + Sync,
{
    let channels = src.channels();
    let max = src.max_value();
    let mut image = Image::black(width, height, channels, src.bit_depth());
    let row_len = image.row_len();

    let hits = image
        .data_mut()
        .par_chunks_mut(row_len)
        .enumerate()
        .map(|(y, row)| {
            let mut sample = [0.0f64; 3];
            let mut hits = 0usize;
            for x in 0..width {
                let Some((sx, sy)) = map(x as f64, y as f64) else {
                    continue;
                };
                if !src.sample_bilinear(sx, sy, border, &mut sample) {
                    continue;
                }
                hits += 1;
                let px = &mut row[x * channels..(x + 1) * channels];
                for (dst, &value) in px.iter_mut().zip(&sample[..channels]) {
                    *dst = quantize(value, max);
                }
            }
            hits
        })
        .sum();

    Warped { image, hits }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_map_copies_exactly() {
        let src = Image::from_fn(7, 5, 3, 12, |x, y, c| (x * 31 + y * 7 + c * 1000) as u16);
        let out = warp(&src, 7, 5, BorderPolicy::Black, |x, y| Some((x, y)));
        assert_eq!(out.hits, 35);
        assert_eq!(out.image, src);
    }

    #[test]
    fn shift_fills_border_with_black() {
        let src = Image::from_fn(4, 2, 1, 16, |_, _, _| 500);
        let out = warp(&src, 4, 2, BorderPolicy::Black, |x, y| Some((x + 2.0, y)));
        assert_eq!(out.hits, 4);
        assert_eq!(out.image.row(0), &[500, 500, 0, 0]);
    }

    #[test]
    fn undefined_locations_are_not_hits() {
        let src = Image::from_fn(3, 3, 1, 8, |_, _, _| 9);
        let out = warp(&src, 3, 3, BorderPolicy::Replicate, |_, _| None);
        assert_eq!(out.hits, 0);
        assert!(out.image.data().iter().all(|&v| v == 0));
    }
}
