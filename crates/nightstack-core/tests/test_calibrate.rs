mod common;

use approx::assert_abs_diff_eq;
use ndarray::Array3;

use common::flat_buffer;
use nightstack_core::calibrate::apply::{
    apply_flat, calibrate, dark_scale_factor, subtract_dark, subtract_offset,
};
use nightstack_core::calibrate::master::MasterFrame;
use nightstack_core::error::NightstackError;
use nightstack_core::frame::{FrameType, PixelBuffer};
use nightstack_core::stack::combine::CombineMethod;

fn master(buffer: PixelBuffer, frame_type: FrameType) -> MasterFrame {
    MasterFrame {
        buffer,
        frame_type,
        method: CombineMethod::Average,
        source_count: 1,
    }
}

#[test]
fn offset_subtraction_clamps_at_zero() {
    let light = flat_buffer(5.0, 4, 4);
    let offset = flat_buffer(10.0, 4, 4);
    let result = subtract_offset(&light, &offset);
    assert_abs_diff_eq!(result.data[[0, 2, 2]], 0.0, epsilon = 1e-9);
    // Input untouched.
    assert_abs_diff_eq!(light.data[[0, 2, 2]], 5.0, epsilon = 1e-9);
}

#[test]
fn offset_subtraction_is_exact_above_zero() {
    let light = flat_buffer(0.5, 4, 4);
    let offset = flat_buffer(0.1, 4, 4);
    let result = subtract_offset(&light, &offset);
    assert_abs_diff_eq!(result.data[[0, 1, 3]], 0.4, epsilon = 1e-6);
}

#[test]
fn dark_factor_recovers_known_scale() {
    // light = 0.5 * dark + constant: the optimizer should find 0.5.
    let mut dark = Array3::<f32>::zeros((1, 8, 8));
    let mut light = Array3::<f32>::zeros((1, 8, 8));
    for row in 0..8 {
        for col in 0..8 {
            let d = 0.1 + 0.01 * (row * 8 + col) as f32;
            dark[[0, row, col]] = d;
            light[[0, row, col]] = 0.5 * d + 0.05;
        }
    }
    let factor = dark_scale_factor(
        &PixelBuffer::new(light, 16),
        &PixelBuffer::new(dark, 16),
    );
    assert_abs_diff_eq!(factor, 0.5, epsilon = 1e-4);
}

#[test]
fn dark_subtraction_applies_factor_and_clamps() {
    let light = flat_buffer(0.3, 4, 4);
    let dark = flat_buffer(0.2, 4, 4);
    let half = subtract_dark(&light, &dark, 0.5);
    assert_abs_diff_eq!(half.data[[0, 0, 0]], 0.2, epsilon = 1e-6);
    let over = subtract_dark(&light, &dark, 2.0);
    assert_abs_diff_eq!(over.data[[0, 0, 0]], 0.0, epsilon = 1e-9);
}

#[test]
fn flat_normalization_removes_vignetting() {
    // Light is exactly half the flat everywhere: after dividing by the
    // mean-normalized flat, every pixel equals half the flat's mean.
    let mut flat = Array3::<f32>::zeros((1, 8, 8));
    let mut light = Array3::<f32>::zeros((1, 8, 8));
    for row in 0..8 {
        for col in 0..8 {
            let f = 0.4 + 0.02 * col as f32;
            flat[[0, row, col]] = f;
            light[[0, row, col]] = 0.5 * f;
        }
    }
    let flat = PixelBuffer::new(flat, 16);
    let light = PixelBuffer::new(light, 16);
    let flat_mean = flat.mean();
    let result = apply_flat(&light, &flat);
    for col in 0..8 {
        assert_abs_diff_eq!(
            result.data[[0, 3, col]],
            0.5 * flat_mean,
            epsilon = 1e-5
        );
    }
}

#[test]
fn calibrate_skips_absent_masters() {
    let light = flat_buffer(0.5, 4, 4);
    let result = calibrate(&light, None, None, None).unwrap();
    assert_abs_diff_eq!(result.data[[0, 2, 2]], 0.5, epsilon = 1e-9);
}

#[test]
fn calibrate_full_chain() {
    let light = flat_buffer(0.6, 4, 4);
    let offset = master(flat_buffer(0.1, 4, 4), FrameType::Offset);
    let flat = master(flat_buffer(0.5, 4, 4), FrameType::Flat);
    // Uniform flat normalizes to gain 1 and changes nothing.
    let result = calibrate(&light, Some(&offset), None, Some(&flat)).unwrap();
    assert_abs_diff_eq!(result.data[[0, 1, 1]], 0.5, epsilon = 1e-5);
}

#[test]
fn calibrate_rejects_mismatched_master() {
    let light = flat_buffer(0.5, 4, 4);
    let offset = master(flat_buffer(0.1, 4, 6), FrameType::Offset);
    let err = calibrate(&light, Some(&offset), None, None).unwrap_err();
    assert!(matches!(err, NightstackError::DimensionMismatch { .. }));
}

#[test]
fn calibration_is_pure() {
    let light = flat_buffer(0.5, 4, 4);
    let offset = master(flat_buffer(0.1, 4, 4), FrameType::Offset);
    let first = calibrate(&light, Some(&offset), None, None).unwrap();
    let second = calibrate(&light, Some(&offset), None, None).unwrap();
    assert_abs_diff_eq!(first.data[[0, 0, 0]], second.data[[0, 0, 0]], epsilon = 1e-9);
    assert_abs_diff_eq!(offset.buffer.data[[0, 0, 0]], 0.1, epsilon = 1e-9);
}
