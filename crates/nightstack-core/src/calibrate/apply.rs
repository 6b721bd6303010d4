//! Numeric calibration of a light frame against master frames.
//!
//! Order of operations, each optional and pure (masters and the input
//! light are never modified, so the same masters serve many lights):
//! 1. Subtract the offset master, clamped at zero
//! 2. Subtract the dark master scaled by an optimization factor
//! 3. Normalize against the flat master, per channel

use ndarray::Axis;

use crate::consts::{EPSILON, MAX_DARK_FACTOR};
use crate::error::{NightstackError, Result};
use crate::frame::PixelBuffer;

use super::master::MasterFrame;

/// Per-pixel subtraction clamped at zero; offsets never drive a sample
/// negative.
pub fn subtract_offset(light: &PixelBuffer, offset: &PixelBuffer) -> PixelBuffer {
    let mut data = light.data.clone();
    data.zip_mut_with(&offset.data, |l, &o| *l = (*l - o).max(0.0));
    PixelBuffer::new(data, light.bit_depth)
}

/// Least-squares scale factor minimizing the residual thermal-signal
/// variance of `light - factor * dark`: `cov(light, dark) / var(dark)`,
/// clamped to `[0, MAX_DARK_FACTOR]`. Compensates for exposure and
/// temperature mismatch between the light and its calibration darks.
pub fn dark_scale_factor(light: &PixelBuffer, dark: &PixelBuffer) -> f32 {
    let n = light.data.len();
    if n == 0 || n != dark.data.len() {
        return 1.0;
    }
    let light_mean = light.mean() as f64;
    let dark_mean = dark.mean() as f64;

    let mut cov = 0.0f64;
    let mut var = 0.0f64;
    for (&l, &d) in light.data.iter().zip(dark.data.iter()) {
        let dl = l as f64 - light_mean;
        let dd = d as f64 - dark_mean;
        cov += dl * dd;
        var += dd * dd;
    }
    if var < EPSILON as f64 {
        return 1.0;
    }
    (cov / var).clamp(0.0, MAX_DARK_FACTOR as f64) as f32
}

/// Subtract `factor * dark` per pixel, clamped at zero.
pub fn subtract_dark(light: &PixelBuffer, dark: &PixelBuffer, factor: f32) -> PixelBuffer {
    let mut data = light.data.clone();
    data.zip_mut_with(&dark.data, |l, &d| *l = (*l - factor * d).max(0.0));
    PixelBuffer::new(data, light.bit_depth)
}

/// Divide by the flat master, itself normalized so its mean is 1 per
/// colour channel, correcting vignetting and per-pixel sensitivity.
/// The result is rescaled back into the normalized [0, 1] sample range.
pub fn apply_flat(light: &PixelBuffer, flat: &PixelBuffer) -> PixelBuffer {
    let (channels, h, w) = light.dim();
    let mut data = light.data.clone();

    for ch in 0..channels {
        let flat_plane = flat.data.index_axis(Axis(0), ch);
        let count = (h * w) as f32;
        let flat_mean = flat_plane.iter().sum::<f32>() / count.max(1.0);
        if flat_mean < EPSILON {
            continue;
        }
        let mut light_plane = data.index_axis_mut(Axis(0), ch);
        for row in 0..h {
            for col in 0..w {
                let gain = flat_plane[[row, col]] / flat_mean;
                if gain > EPSILON {
                    let v = light_plane[[row, col]] / gain;
                    light_plane[[row, col]] = v.clamp(0.0, 1.0);
                }
            }
        }
    }
    PixelBuffer::new(data, light.bit_depth)
}

/// Calibrate a light frame against the available masters. Absent masters
/// skip their step. Geometry disagreement between the light and any
/// master raises `DimensionMismatch` before any arithmetic.
pub fn calibrate(
    light: &PixelBuffer,
    offset: Option<&MasterFrame>,
    dark: Option<&MasterFrame>,
    flat: Option<&MasterFrame>,
) -> Result<PixelBuffer> {
    for master in [offset, dark, flat].into_iter().flatten() {
        check_geometry(light, &master.buffer)?;
    }

    let mut result = match offset {
        Some(offset) => subtract_offset(light, &offset.buffer),
        None => light.clone(),
    };

    if let Some(dark) = dark {
        // The dark is offset-subtracted the same way the light was, so
        // the optimization factor sees only the thermal signal.
        let dark_adjusted = match offset {
            Some(offset) => subtract_offset(&dark.buffer, &offset.buffer),
            None => dark.buffer.clone(),
        };
        let factor = dark_scale_factor(&result, &dark_adjusted);
        result = subtract_dark(&result, &dark_adjusted, factor);
    }

    if let Some(flat) = flat {
        result = apply_flat(&result, &flat.buffer);
    }

    Ok(result)
}

fn check_geometry(light: &PixelBuffer, master: &PixelBuffer) -> Result<()> {
    if light.dim() != master.dim() {
        let expected = light.dim();
        let actual = master.dim();
        return Err(NightstackError::DimensionMismatch {
            expected_channels: expected.0,
            expected_height: expected.1,
            expected_width: expected.2,
            expected_bit_depth: light.bit_depth,
            actual_channels: actual.0,
            actual_height: actual.1,
            actual_width: actual.2,
            actual_bit_depth: master.bit_depth,
        });
    }
    Ok(())
}
