//! Build a master calibration frame from a batch of same-type exposures.

use ndarray::{Array2, Array3, Axis};
use rayon::prelude::*;
use tracing::info;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{NightstackError, Result};
use crate::frame::{FrameType, PixelBuffer};
use crate::stack::combine::{combine_column, entropy_weighted, CombineMethod, EntropyMap};

/// A synthesized calibration frame, tagged with the combine method and
/// the number of source frames it was built from.
#[derive(Clone, Debug)]
pub struct MasterFrame {
    pub buffer: PixelBuffer,
    pub frame_type: FrameType,
    pub method: CombineMethod,
    pub source_count: usize,
}

/// Combine N calibration frames of one type into a master frame.
///
/// All inputs must share the geometry and bit depth of the first frame;
/// any disagreement raises `DimensionMismatch` before any pixel work.
pub fn build_master(
    frames: &[PixelBuffer],
    frame_type: FrameType,
    method: CombineMethod,
) -> Result<MasterFrame> {
    let first = frames.first().ok_or(NightstackError::EmptySequence)?;
    let (channels, h, w) = first.dim();
    for frame in &frames[1..] {
        if !frame.same_geometry(first) {
            let actual = frame.dim();
            return Err(NightstackError::DimensionMismatch {
                expected_channels: channels,
                expected_height: h,
                expected_width: w,
                expected_bit_depth: first.bit_depth,
                actual_channels: actual.0,
                actual_height: actual.1,
                actual_width: actual.2,
                actual_bit_depth: frame.bit_depth,
            });
        }
    }

    let n = frames.len();
    let entropy: Option<Vec<Vec<EntropyMap>>> = match method {
        CombineMethod::EntropyWeighted => Some(
            frames
                .iter()
                .map(|f| {
                    (0..channels)
                        .map(|ch| EntropyMap::from_plane(&f.data.index_axis(Axis(0), ch)))
                        .collect()
                })
                .collect(),
        ),
        _ => None,
    };

    let mut data = Array3::<f32>::zeros((channels, h, w));
    for ch in 0..channels {
        let plane = combine_plane(frames, ch, n, h, w, method, entropy.as_deref());
        data.index_axis_mut(Axis(0), ch).assign(&plane);
    }

    info!(
        frame_type = %frame_type,
        method = %method,
        count = n,
        "master frame created from {n} pictures"
    );

    Ok(MasterFrame {
        buffer: PixelBuffer::new(data, first.bit_depth),
        frame_type,
        method,
        source_count: n,
    })
}

fn combine_plane(
    frames: &[PixelBuffer],
    ch: usize,
    n: usize,
    h: usize,
    w: usize,
    method: CombineMethod,
    entropy: Option<&[Vec<EntropyMap>]>,
) -> Array2<f32> {
    if h * w >= PARALLEL_PIXEL_THRESHOLD && n > 1 {
        // Row-parallel: each row allocates its own scratch column.
        let rows: Vec<Vec<f32>> = (0..h)
            .into_par_iter()
            .map(|row| {
                let mut column = vec![0.0f32; n];
                let mut weights = vec![0.0f32; n];
                let mut row_result = vec![0.0f32; w];
                for (col, result) in row_result.iter_mut().enumerate() {
                    *result = combine_at(
                        frames, ch, row, col, method, entropy, &mut column, &mut weights,
                    );
                }
                row_result
            })
            .collect();

        let mut plane = Array2::<f32>::zeros((h, w));
        for (row, row_data) in rows.into_iter().enumerate() {
            for (col, val) in row_data.into_iter().enumerate() {
                plane[[row, col]] = val;
            }
        }
        plane
    } else {
        let mut plane = Array2::<f32>::zeros((h, w));
        let mut column = vec![0.0f32; n];
        let mut weights = vec![0.0f32; n];
        for row in 0..h {
            for col in 0..w {
                plane[[row, col]] = combine_at(
                    frames, ch, row, col, method, entropy, &mut column, &mut weights,
                );
            }
        }
        plane
    }
}

#[allow(clippy::too_many_arguments)]
fn combine_at(
    frames: &[PixelBuffer],
    ch: usize,
    row: usize,
    col: usize,
    method: CombineMethod,
    entropy: Option<&[Vec<EntropyMap>]>,
    column: &mut [f32],
    weights: &mut [f32],
) -> f32 {
    for (i, frame) in frames.iter().enumerate() {
        column[i] = frame.data[[ch, row, col]];
    }
    match entropy {
        Some(maps) => {
            for (i, frame_maps) in maps.iter().enumerate() {
                weights[i] = frame_maps[ch].weight_at(row, col);
            }
            entropy_weighted(column, weights)
        }
        None => combine_column(column, method),
    }
}
