mod common;

use approx::assert_abs_diff_eq;
use ndarray::Array3;

use common::flat_buffer;
use nightstack_core::calibrate::master::build_master;
use nightstack_core::error::NightstackError;
use nightstack_core::frame::{FrameType, PixelBuffer};
use nightstack_core::stack::combine::CombineMethod;

#[test]
fn three_offsets_average_to_their_common_value() {
    let frames = vec![
        flat_buffer(100.0, 8, 8),
        flat_buffer(100.0, 8, 8),
        flat_buffer(100.0, 8, 8),
    ];
    let master = build_master(&frames, FrameType::Offset, CombineMethod::Average).unwrap();
    assert_eq!(master.source_count, 3);
    assert_abs_diff_eq!(master.buffer.data[[0, 4, 4]], 100.0, epsilon = 1e-4);
}

#[test]
fn identical_frames_survive_every_method() {
    let frames = vec![flat_buffer(0.42, 16, 16); 5];
    for method in [
        CombineMethod::Average,
        CombineMethod::Median,
        CombineMethod::kappa_sigma(),
        CombineMethod::median_kappa_sigma(),
        CombineMethod::AutoAdaptive { iterations: 5 },
        CombineMethod::EntropyWeighted,
    ] {
        let master = build_master(&frames, FrameType::Dark, method).unwrap();
        assert_abs_diff_eq!(master.buffer.data[[0, 8, 8]], 0.42, epsilon = 1e-5);
        assert_eq!(master.method, method);
    }
}

#[test]
fn median_master_drops_single_hot_frame() {
    let mut frames = vec![flat_buffer(0.2, 8, 8); 4];
    frames.push(flat_buffer(0.9, 8, 8));
    let master = build_master(&frames, FrameType::Dark, CombineMethod::Median).unwrap();
    assert_abs_diff_eq!(master.buffer.data[[0, 3, 3]], 0.2, epsilon = 1e-6);
}

#[test]
fn dimension_mismatch_is_rejected() {
    let frames = vec![flat_buffer(0.1, 8, 8), flat_buffer(0.1, 8, 10)];
    let err = build_master(&frames, FrameType::Flat, CombineMethod::Average).unwrap_err();
    assert!(matches!(err, NightstackError::DimensionMismatch { .. }));
}

#[test]
fn bit_depth_mismatch_is_rejected() {
    let a = flat_buffer(0.1, 8, 8);
    let b = PixelBuffer::new(Array3::from_elem((1, 8, 8), 0.1), 8);
    let err = build_master(&[a, b], FrameType::Flat, CombineMethod::Average).unwrap_err();
    assert!(matches!(err, NightstackError::DimensionMismatch { .. }));
}

#[test]
fn empty_batch_is_rejected() {
    let err = build_master(&[], FrameType::Offset, CombineMethod::Average).unwrap_err();
    assert!(matches!(err, NightstackError::EmptySequence));
}

#[test]
fn master_keeps_multi_channel_geometry() {
    let frames = vec![
        PixelBuffer::new(Array3::from_elem((3, 6, 7), 0.25), 16),
        PixelBuffer::new(Array3::from_elem((3, 6, 7), 0.35), 16),
    ];
    let master = build_master(&frames, FrameType::Flat, CombineMethod::Average).unwrap();
    assert_eq!(master.buffer.dim(), (3, 6, 7));
    assert_abs_diff_eq!(master.buffer.data[[2, 5, 6]], 0.3, epsilon = 1e-6);
}
