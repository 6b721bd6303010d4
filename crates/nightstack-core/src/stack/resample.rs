//! Geometric resampling onto the reference grid.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::frame::PixelBuffer;
use crate::register::solve::Transform;

/// Axis-aligned pixel rectangle, end-exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Rect {
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: width,
            y1: height,
        }
    }

    pub fn width(&self) -> usize {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> usize {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    /// Intersection of two rectangles. The common-region crop policy:
    /// the running stack only ever shrinks, never pads.
    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

}

/// A frame resampled onto the reference grid, with the rectangle of
/// reference pixels its data actually covers.
#[derive(Clone, Debug)]
pub struct WarpedFrame {
    pub buffer: PixelBuffer,
    pub footprint: Rect,
}

/// Resample a calibrated frame onto the reference coordinate grid.
///
/// Each output pixel is mapped back through the inverse transform and
/// bilinearly interpolated from the source. Pixels whose source lies
/// outside the frame are left at zero and excluded from the footprint.
pub fn warp_to_reference(buffer: &PixelBuffer, transform: &Transform) -> WarpedFrame {
    if transform.is_identity() {
        return WarpedFrame {
            buffer: buffer.clone(),
            footprint: Rect::full(buffer.width(), buffer.height()),
        };
    }

    let (channels, h, w) = buffer.dim();
    let mut out = Array3::<f32>::zeros((channels, h, w));

    for row in 0..h {
        for col in 0..w {
            let (sx, sy) = transform.apply_inverse(col as f64, row as f64);
            if sx < 0.0 || sy < 0.0 || sx > (w - 1) as f64 || sy > (h - 1) as f64 {
                continue;
            }
            let x0 = sx.floor() as usize;
            let y0 = sy.floor() as usize;
            let x1 = (x0 + 1).min(w - 1);
            let y1 = (y0 + 1).min(h - 1);
            let fx = (sx - x0 as f64) as f32;
            let fy = (sy - y0 as f64) as f32;

            for ch in 0..channels {
                let top = buffer.data[[ch, y0, x0]] * (1.0 - fx) + buffer.data[[ch, y0, x1]] * fx;
                let bottom =
                    buffer.data[[ch, y1, x0]] * (1.0 - fx) + buffer.data[[ch, y1, x1]] * fx;
                out[[ch, row, col]] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }

    WarpedFrame {
        buffer: PixelBuffer::new(out, buffer.bit_depth),
        footprint: footprint(w, h, transform),
    }
}

/// Inner axis-aligned bound of the warped frame's coverage on the
/// reference grid. Exact for pure translation; conservative for the
/// small rotations live stacking sees.
pub fn footprint(width: usize, height: usize, transform: &Transform) -> Rect {
    if width == 0 || height == 0 {
        return Rect {
            x0: 0,
            y0: 0,
            x1: 0,
            y1: 0,
        };
    }
    let wf = (width - 1) as f64;
    let hf = (height - 1) as f64;
    let tl = transform.apply(0.0, 0.0);
    let tr = transform.apply(wf, 0.0);
    let bl = transform.apply(0.0, hf);
    let br = transform.apply(wf, hf);

    let x0 = tl.0.max(bl.0).max(0.0).ceil();
    let x1 = tr.0.min(br.0).min(wf).floor();
    let y0 = tl.1.max(tr.1).max(0.0).ceil();
    let y1 = bl.1.min(br.1).min(hf).floor();

    if x1 < x0 || y1 < y0 {
        return Rect {
            x0: 0,
            y0: 0,
            x1: 0,
            y1: 0,
        };
    }
    Rect {
        x0: x0 as usize,
        y0: y0 as usize,
        x1: x1 as usize + 1,
        y1: y1 as usize + 1,
    }
}
