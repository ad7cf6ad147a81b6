//! Crop, rotation and resize applied to corrected frames before the join.

use crate::image_pipeline::calibration::{CropRect, Rotation};
use crate::image_pipeline::correction::resample::warp;
use crate::image_pipeline::frame::{BorderPolicy, Image};

/// Copies `rect`, which must already lie inside `image`.
pub(crate) fn crop(image: &Image, rect: CropRect) -> Image {
    let channels = image.channels();
    let mut out = Image::black(rect.width, rect.height, channels, image.bit_depth());
    let out_row = out.row_len();
    for (y, dst) in out.data_mut().chunks_mut(out_row).enumerate() {
        let src = image.row(rect.y + y);
        dst.copy_from_slice(&src[rect.x * channels..(rect.x + rect.width) * channels]);
    }
    out
}

/// Rotates counter-clockwise. Quarter turns are exact pixel permutations,
/// other angles resample about the centre on a same-size canvas.
pub(crate) fn rotate(image: &Image, rotation: Rotation, border: BorderPolicy) -> Image {
    let (w, h) = (image.width(), image.height());
    match rotation {
        Rotation::None => image.clone(),
        Rotation::Ccw90 => permute(image, h, w, |x, y| (w - 1 - y, x)),
        Rotation::Ccw180 => permute(image, w, h, |x, y| (w - 1 - x, h - 1 - y)),
        Rotation::Ccw270 => permute(image, h, w, |x, y| (y, h - 1 - x)),
        Rotation::Degrees(degrees) => {
            let (sin, cos) = degrees.to_radians().sin_cos();
            let cx = (w as f64 - 1.0) * 0.5;
            let cy = (h as f64 - 1.0) * 0.5;
            warp(image, w, h, border, |x, y| {
                let (dx, dy) = (x - cx, y - cy);
                Some((cx + dx * cos - dy * sin, cy + dx * sin + dy * cos))
            })
            .image
        }
    }
}

fn permute<F>(image: &Image, width: usize, height: usize, source: F) -> Image
where
    F: Fn(usize, usize) -> (usize, usize),
{
    let channels = image.channels();
    let mut out = Image::black(width, height, channels, image.bit_depth());
    let data = out.data_mut();
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = source(x, y);
            let idx = (y * width + x) * channels;
            data[idx..idx + channels].copy_from_slice(image.pixel(sx, sy));
        }
    }
    out
}

/// Bilinear resize with pixel-centre alignment.
pub(crate) fn resize(image: &Image, width: usize, height: usize) -> Image {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    let sx = image.width() as f64 / width as f64;
    let sy = image.height() as f64 / height as f64;
    warp(image, width, height, BorderPolicy::Replicate, |x, y| {
        Some(((x + 0.5) * sx - 0.5, (y + 0.5) * sy - 0.5))
    })
    .image
}
