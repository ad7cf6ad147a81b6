use std::io::Cursor;

use bayer::{BayerDepth, CFA, Demosaic, RasterDepth, RasterMut};
use tracing::debug;

use crate::image_pipeline::common::error::ProcessingError;
use crate::image_pipeline::frame::types::{Cfa, PixelData};

fn bayer_cfa(cfa: Cfa) -> CFA {
    match cfa {
        Cfa::Rggb => CFA::RGGB,
        Cfa::Bggr => CFA::BGGR,
        Cfa::Grbg => CFA::GRBG,
        Cfa::Gbrg => CFA::GBRG,
    }
}

/// Linear demosaic of a single-channel mosaic into interleaved RGB.
///
/// Sample values are kept in the sensor's range; no white balance or colour
/// matrix is applied so geometric stages see the data the sensor produced.
pub(crate) fn demosaic(
    samples: &PixelData,
    width: usize,
    height: usize,
    cfa: Cfa,
    bit_depth: u8,
) -> Result<Vec<u16>, ProcessingError> {
    debug!(width, height, ?cfa, bit_depth, "Demosaicing mosaic frame");

    // bayer only reads 8-bit and 16-bit little-endian containers
    let (bayer_depth, raster_depth, bytes_per_sample, bayer_bytes): (_, _, usize, Vec<u8>) =
        match samples {
            PixelData::U8(values) => (BayerDepth::Depth8, RasterDepth::Depth8, 1, values.clone()),
            PixelData::U16(values) => (
                BayerDepth::Depth16LE,
                RasterDepth::Depth16,
                2,
                values.iter().flat_map(|&v| v.to_le_bytes()).collect(),
            ),
        };

    let mut output_buf = vec![0u8; width * height * 3 * bytes_per_sample];
    {
        let mut output_raster = RasterMut::new(width, height, raster_depth, &mut output_buf);
        let mut cursor = Cursor::new(&bayer_bytes[..]);
        bayer::run_demosaic(
            &mut cursor,
            bayer_depth,
            bayer_cfa(cfa),
            Demosaic::Linear,
            &mut output_raster,
        )
        .map_err(|e| ProcessingError::Demosaic(format!("{e:?}")))?;
    }

    let max = ((1u32 << bit_depth) - 1) as u16;
    let rgb = if bytes_per_sample == 1 {
        output_buf.iter().map(|&v| v as u16).collect()
    } else {
        output_buf
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]).min(max))
            .collect()
    };
    Ok(rgb)
}
