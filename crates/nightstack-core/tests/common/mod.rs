use ndarray::Array3;

use nightstack_core::frame::{FrameMetadata, FrameRecord, PixelBuffer};

/// Default synthetic star positions (x, y), irregular enough that
/// pairwise distances are distinct for the matching voter.
pub const STAR_POSITIONS: [(f64, f64); 8] = [
    (25.0, 30.0),
    (45.0, 85.0),
    (70.0, 25.0),
    (95.0, 95.0),
    (55.0, 55.0),
    (25.0, 100.0),
    (100.0, 45.0),
    (80.0, 70.0),
];

/// Render a 128x128 mono frame with Gaussian stars on a flat background.
pub fn star_field(positions: &[(f64, f64)], background: f32, amplitude: f32) -> PixelBuffer {
    star_field_sized(128, positions, background, amplitude)
}

/// As [`star_field`], with an explicit square frame size.
pub fn star_field_sized(
    size: usize,
    positions: &[(f64, f64)],
    background: f32,
    amplitude: f32,
) -> PixelBuffer {
    let sigma = 1.5f64;
    let mut data = Array3::<f32>::from_elem((1, size, size), background);

    for &(x, y) in positions {
        let r0 = (y as isize - 6).max(0) as usize;
        let r1 = ((y as isize + 7).max(0) as usize).min(size);
        let c0 = (x as isize - 6).max(0) as usize;
        let c1 = ((x as isize + 7).max(0) as usize).min(size);
        for row in r0..r1 {
            for col in c0..c1 {
                let dx = col as f64 - x;
                let dy = row as f64 - y;
                let g = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                data[[0, row, col]] += amplitude * g as f32;
            }
        }
    }
    PixelBuffer::new(data, 16)
}

/// The default star field used as a registration reference.
pub fn reference_field() -> PixelBuffer {
    star_field(&STAR_POSITIONS, 0.05, 0.8)
}

/// The same field translated so that its transform onto the reference
/// is (dx, dy): stars are rendered at `p - (dx, dy)`.
pub fn shifted_field(dx: f64, dy: f64) -> PixelBuffer {
    let shifted: Vec<(f64, f64)> = STAR_POSITIONS
        .iter()
        .map(|&(x, y)| (x - dx, y - dy))
        .collect();
    star_field(&shifted, 0.05, 0.8)
}

/// Uniform single-channel buffer.
pub fn flat_buffer(value: f32, height: usize, width: usize) -> PixelBuffer {
    PixelBuffer::new(Array3::from_elem((1, height, width), value), 16)
}

/// Frame record with a given exposure, no hint.
pub fn record(path: &str, buffer: PixelBuffer, exposure_seconds: f64) -> FrameRecord {
    FrameRecord::new(
        path,
        buffer,
        FrameMetadata {
            exposure_seconds,
            ..FrameMetadata::default()
        },
    )
}
