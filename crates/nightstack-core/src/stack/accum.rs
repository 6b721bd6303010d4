//! The incremental stack accumulator.
//!
//! Owns the single RunningStack. Average keeps online per-pixel sum and
//! count state; every other combine method retains the full aligned
//! sample history and recombines lazily (exact statistics, no streaming
//! approximation). The running stack is cropped to the intersection of
//! all contributing footprints, never padded.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consts::{SNAPSHOT_MAGIC, SNAPSHOT_MAX_SAMPLES};
use crate::error::{NightstackError, Result};
use crate::frame::PixelBuffer;
use crate::register::solve::Transform;
use crate::stack::combine::{combine_column, entropy_weighted, CombineMethod, EntropyMap};
use crate::stack::resample::{warp_to_reference, Rect, WarpedFrame};

/// Accumulator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackState {
    Empty,
    Accumulating,
    Paused,
    Finalized,
}

/// Snapshot of the running stack after a mutation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StackSummary {
    pub frame_count: usize,
    pub total_exposure_seconds: f64,
    pub coverage: Rect,
}

#[derive(Debug)]
struct LastAdd {
    warped: WarpedFrame,
    prev_coverage: Rect,
    exposure_seconds: f64,
}

/// Incrementally folds calibrated, aligned light frames into a running
/// combined image. `add_frame` calls must be externally serialized; the
/// coordinator guarantees at most one mutation in flight.
#[derive(Debug)]
pub struct StackAccumulator {
    method: CombineMethod,
    state: StackState,
    dims: Option<(usize, usize, usize)>,
    bit_depth: u8,
    /// Online sum (f64 to avoid drift), Average method only.
    sum: Option<Array3<f64>>,
    /// Per-pixel contribution count, Average method only.
    count: Option<Array2<u32>>,
    /// Aligned sample history, all other methods.
    history: Vec<WarpedFrame>,
    coverage: Rect,
    last: Option<LastAdd>,
    frame_count: usize,
    total_exposure_seconds: f64,
    cached: Option<PixelBuffer>,
}

impl StackAccumulator {
    pub fn new(method: CombineMethod) -> Self {
        Self {
            method,
            state: StackState::Empty,
            dims: None,
            bit_depth: 16,
            sum: None,
            count: None,
            history: Vec::new(),
            coverage: Rect {
                x0: 0,
                y0: 0,
                x1: 0,
                y1: 0,
            },
            last: None,
            frame_count: 0,
            total_exposure_seconds: 0.0,
            cached: None,
        }
    }

    pub fn method(&self) -> CombineMethod {
        self.method
    }

    pub fn state(&self) -> StackState {
        self.state
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn total_exposure_seconds(&self) -> f64 {
        self.total_exposure_seconds
    }

    pub fn summary(&self) -> StackSummary {
        StackSummary {
            frame_count: self.frame_count,
            total_exposure_seconds: self.total_exposure_seconds,
            coverage: self.coverage,
        }
    }

    /// Align a calibrated frame onto the reference grid and fold it into
    /// the running stack. Structural failures leave the stack untouched.
    pub fn add_frame(
        &mut self,
        calibrated: &PixelBuffer,
        transform: &Transform,
        exposure_seconds: f64,
    ) -> Result<StackSummary> {
        match self.state {
            StackState::Finalized => {
                return Err(NightstackError::InvalidState(
                    "cannot add frames to a finalized stack".into(),
                ))
            }
            StackState::Paused => {
                return Err(NightstackError::InvalidState(
                    "stack is paused; resume before adding frames".into(),
                ))
            }
            StackState::Empty | StackState::Accumulating => {}
        }

        if let Some(dims) = self.dims {
            let actual = calibrated.dim();
            if actual != dims || calibrated.bit_depth != self.bit_depth {
                return Err(NightstackError::DimensionMismatch {
                    expected_channels: dims.0,
                    expected_height: dims.1,
                    expected_width: dims.2,
                    expected_bit_depth: self.bit_depth,
                    actual_channels: actual.0,
                    actual_height: actual.1,
                    actual_width: actual.2,
                    actual_bit_depth: calibrated.bit_depth,
                });
            }
        }

        let warped = warp_to_reference(calibrated, transform);
        let prev_coverage = self.coverage;
        let new_coverage = if self.state == StackState::Empty {
            warped.footprint
        } else {
            self.coverage.intersect(&warped.footprint)
        };
        if new_coverage.is_empty() {
            return Err(NightstackError::Pipeline(
                "aligned frame does not overlap the running stack".into(),
            ));
        }

        if self.state == StackState::Empty {
            let (c, h, w) = calibrated.dim();
            self.dims = Some((c, h, w));
            self.bit_depth = calibrated.bit_depth;
            if !self.method.needs_history() {
                self.sum = Some(Array3::zeros((c, h, w)));
                self.count = Some(Array2::zeros((h, w)));
            }
            self.state = StackState::Accumulating;
        }

        if self.method.needs_history() {
            self.history.push(warped.clone());
        } else {
            let sum = self.sum.as_mut().ok_or_else(|| {
                NightstackError::InvalidState("missing sum state for average stack".into())
            })?;
            let count = self.count.as_mut().ok_or_else(|| {
                NightstackError::InvalidState("missing count state for average stack".into())
            })?;
            accumulate(sum, count, &warped, 1.0);
        }

        self.coverage = new_coverage;
        self.frame_count += 1;
        self.total_exposure_seconds += exposure_seconds;
        self.cached = None;
        self.last = Some(LastAdd {
            warped,
            prev_coverage,
            exposure_seconds,
        });

        info!(
            frames = self.frame_count,
            exposure = self.total_exposure_seconds,
            coverage_w = self.coverage.width(),
            coverage_h = self.coverage.height(),
            "frame added to running stack"
        );
        Ok(self.summary())
    }

    /// Undo the most recent `add_frame`, restoring the running stack to
    /// its pre-add state. Only one level of undo is retained, and none
    /// survives a snapshot restore.
    pub fn remove_last_frame(&mut self) -> Result<StackSummary> {
        let last = self.last.take().ok_or_else(|| {
            NightstackError::InvalidState(
                "only the most recently added frame can be removed, and it is no longer available"
                    .into(),
            )
        })?;

        if self.method.needs_history() {
            self.history.pop();
        } else if let (Some(sum), Some(count)) = (self.sum.as_mut(), self.count.as_mut()) {
            accumulate(sum, count, &last.warped, -1.0);
        }

        self.coverage = last.prev_coverage;
        self.frame_count -= 1;
        self.total_exposure_seconds -= last.exposure_seconds;
        self.cached = None;

        if self.frame_count == 0 {
            self.clear();
        }
        debug!(frames = self.frame_count, "last frame removed from stack");
        Ok(self.summary())
    }

    /// Current combined image, cropped to the common coverage region.
    /// `None` while the stack is empty.
    pub fn current_stack(&mut self) -> Option<PixelBuffer> {
        if self.state == StackState::Empty || self.coverage.is_empty() {
            return None;
        }
        if let Some(cached) = &self.cached {
            return Some(cached.clone());
        }
        let result = if self.method.needs_history() {
            self.combine_history()?
        } else {
            self.combine_average()?
        };
        self.cached = Some(result.clone());
        Some(result)
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            StackState::Accumulating => {
                self.state = StackState::Paused;
                Ok(())
            }
            other => Err(NightstackError::InvalidState(format!(
                "cannot pause a stack in state {other:?}"
            ))),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            StackState::Paused => {
                self.state = StackState::Accumulating;
                Ok(())
            }
            other => Err(NightstackError::InvalidState(format!(
                "cannot resume a stack in state {other:?}"
            ))),
        }
    }

    /// Mark the stack complete. The combined image remains readable;
    /// no further mutation is accepted.
    pub fn finalize(&mut self) -> Result<()> {
        match self.state {
            StackState::Accumulating | StackState::Paused => {
                self.state = StackState::Finalized;
                Ok(())
            }
            other => Err(NightstackError::InvalidState(format!(
                "cannot finalize a stack in state {other:?}"
            ))),
        }
    }

    /// Discard everything and return to Empty.
    pub fn reset(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.state = StackState::Empty;
        self.dims = None;
        self.sum = None;
        self.count = None;
        self.history.clear();
        self.coverage = Rect {
            x0: 0,
            y0: 0,
            x1: 0,
            y1: 0,
        };
        self.last = None;
        self.frame_count = 0;
        self.total_exposure_seconds = 0.0;
        self.cached = None;
    }

    fn combine_average(&self) -> Option<PixelBuffer> {
        let sum = self.sum.as_ref()?;
        let count = self.count.as_ref()?;
        let (channels, _, _) = *self.dims.as_ref()?;
        let cov = &self.coverage;
        let mut out = Array3::<f32>::zeros((channels, cov.height(), cov.width()));

        for row in 0..cov.height() {
            for col in 0..cov.width() {
                let n = count[[cov.y0 + row, cov.x0 + col]];
                if n == 0 {
                    continue;
                }
                for ch in 0..channels {
                    out[[ch, row, col]] =
                        (sum[[ch, cov.y0 + row, cov.x0 + col]] / n as f64) as f32;
                }
            }
        }
        Some(PixelBuffer::new(out, self.bit_depth))
    }

    fn combine_history(&self) -> Option<PixelBuffer> {
        if self.history.is_empty() {
            return None;
        }
        let (channels, _, _) = *self.dims.as_ref()?;
        let cov = &self.coverage;
        let n = self.history.len();
        let mut out = Array3::<f32>::zeros((channels, cov.height(), cov.width()));
        let mut column = vec![0.0f32; n];

        let entropy: Option<Vec<Vec<EntropyMap>>> = match self.method {
            CombineMethod::EntropyWeighted => Some(
                self.history
                    .iter()
                    .map(|f| {
                        (0..channels)
                            .map(|ch| {
                                EntropyMap::from_plane(
                                    &f.buffer.data.index_axis(ndarray::Axis(0), ch),
                                )
                            })
                            .collect()
                    })
                    .collect(),
            ),
            _ => None,
        };
        let mut weights = vec![0.0f32; n];

        for ch in 0..channels {
            for row in 0..cov.height() {
                for col in 0..cov.width() {
                    let (src_row, src_col) = (cov.y0 + row, cov.x0 + col);
                    for (i, frame) in self.history.iter().enumerate() {
                        column[i] = frame.buffer.data[[ch, src_row, src_col]];
                    }
                    out[[ch, row, col]] = match &entropy {
                        Some(maps) => {
                            for (i, frame_maps) in maps.iter().enumerate() {
                                weights[i] = frame_maps[ch].weight_at(src_row, src_col);
                            }
                            entropy_weighted(&column, &weights)
                        }
                        None => combine_column(&mut column, self.method),
                    };
                }
            }
        }
        Some(PixelBuffer::new(out, self.bit_depth))
    }

    /// Write the running stack and its auxiliary state to a snapshot, so
    /// a later session can resume without replaying stacked frames.
    pub fn save_snapshot<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(SNAPSHOT_MAGIC)?;
        write_method(&mut w, self.method)?;
        w.write_u8(state_tag(self.state))?;
        w.write_u8(self.bit_depth)?;
        let (c, h, wd) = self.dims.unwrap_or((0, 0, 0));
        w.write_u64::<LittleEndian>(c as u64)?;
        w.write_u64::<LittleEndian>(h as u64)?;
        w.write_u64::<LittleEndian>(wd as u64)?;
        w.write_u64::<LittleEndian>(self.frame_count as u64)?;
        w.write_f64::<LittleEndian>(self.total_exposure_seconds)?;
        write_rect(&mut w, &self.coverage)?;

        match &self.sum {
            Some(sum) => {
                w.write_u8(1)?;
                for &v in sum.iter() {
                    w.write_f64::<LittleEndian>(v)?;
                }
            }
            None => w.write_u8(0)?,
        }
        match &self.count {
            Some(count) => {
                w.write_u8(1)?;
                for &v in count.iter() {
                    w.write_u32::<LittleEndian>(v)?;
                }
            }
            None => w.write_u8(0)?,
        }

        w.write_u64::<LittleEndian>(self.history.len() as u64)?;
        for frame in &self.history {
            write_rect(&mut w, &frame.footprint)?;
            for &v in frame.buffer.data.iter() {
                w.write_f32::<LittleEndian>(v)?;
            }
        }
        Ok(())
    }

    /// Restore an accumulator from a snapshot. The undo slot does not
    /// survive persistence.
    pub fn load_snapshot<R: Read>(mut r: R) -> Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(NightstackError::Snapshot("bad magic".into()));
        }
        let method = read_method(&mut r)?;
        let state = read_state(r.read_u8()?)?;
        let bit_depth = r.read_u8()?;
        let c = r.read_u64::<LittleEndian>()? as usize;
        let h = r.read_u64::<LittleEndian>()? as usize;
        let wd = r.read_u64::<LittleEndian>()? as usize;
        // Header dimensions are untrusted until checked.
        let samples = c
            .checked_mul(h)
            .and_then(|p| p.checked_mul(wd))
            .filter(|&p| p <= SNAPSHOT_MAX_SAMPLES)
            .ok_or_else(|| {
                NightstackError::Snapshot(format!("implausible dimensions {c}x{h}x{wd}"))
            })?;
        let frame_count = r.read_u64::<LittleEndian>()? as usize;
        let total_exposure_seconds = r.read_f64::<LittleEndian>()?;
        let coverage = read_rect(&mut r)?;

        let sum = if r.read_u8()? == 1 {
            let mut values = vec![0.0f64; samples];
            for v in values.iter_mut() {
                *v = r.read_f64::<LittleEndian>()?;
            }
            Some(
                Array3::from_shape_vec((c, h, wd), values)
                    .map_err(|e| NightstackError::Snapshot(e.to_string()))?,
            )
        } else {
            None
        };
        let count = if r.read_u8()? == 1 {
            let mut values = vec![0u32; h * wd];
            for v in values.iter_mut() {
                *v = r.read_u32::<LittleEndian>()?;
            }
            Some(
                Array2::from_shape_vec((h, wd), values)
                    .map_err(|e| NightstackError::Snapshot(e.to_string()))?,
            )
        } else {
            None
        };

        let history_len = r.read_u64::<LittleEndian>()? as usize;
        if history_len
            .checked_mul(samples.max(1))
            .map_or(true, |total| total > SNAPSHOT_MAX_SAMPLES)
        {
            return Err(NightstackError::Snapshot(format!(
                "implausible history length {history_len}"
            )));
        }
        let mut history = Vec::with_capacity(history_len);
        for _ in 0..history_len {
            let footprint = read_rect(&mut r)?;
            let mut values = vec![0.0f32; samples];
            for v in values.iter_mut() {
                *v = r.read_f32::<LittleEndian>()?;
            }
            let data = Array3::from_shape_vec((c, h, wd), values)
                .map_err(|e| NightstackError::Snapshot(e.to_string()))?;
            history.push(WarpedFrame {
                buffer: PixelBuffer::new(data, bit_depth),
                footprint,
            });
        }

        Ok(Self {
            method,
            state,
            dims: if frame_count > 0 { Some((c, h, wd)) } else { None },
            bit_depth,
            sum,
            count,
            history,
            coverage,
            last: None,
            frame_count,
            total_exposure_seconds,
            cached: None,
        })
    }
}

/// Add (`sign = 1.0`) or remove (`sign = -1.0`) a warped frame's
/// contribution over its footprint.
fn accumulate(sum: &mut Array3<f64>, count: &mut Array2<u32>, warped: &WarpedFrame, sign: f64) {
    let (channels, _, _) = warped.buffer.dim();
    let fp = &warped.footprint;
    for row in fp.y0..fp.y1 {
        for col in fp.x0..fp.x1 {
            for ch in 0..channels {
                sum[[ch, row, col]] += sign * warped.buffer.data[[ch, row, col]] as f64;
            }
            if sign > 0.0 {
                count[[row, col]] += 1;
            } else {
                count[[row, col]] = count[[row, col]].saturating_sub(1);
            }
        }
    }
}

fn state_tag(state: StackState) -> u8 {
    match state {
        StackState::Empty => 0,
        StackState::Accumulating => 1,
        StackState::Paused => 2,
        StackState::Finalized => 3,
    }
}

fn read_state(tag: u8) -> Result<StackState> {
    Ok(match tag {
        0 => StackState::Empty,
        1 => StackState::Accumulating,
        2 => StackState::Paused,
        3 => StackState::Finalized,
        other => return Err(NightstackError::Snapshot(format!("unknown state tag {other}"))),
    })
}

fn write_method<W: Write>(w: &mut W, method: CombineMethod) -> Result<()> {
    let (tag, kappa, iterations): (u8, f32, u64) = match method {
        CombineMethod::Average => (0, 0.0, 0),
        CombineMethod::Median => (1, 0.0, 0),
        CombineMethod::KappaSigma { kappa, iterations } => (2, kappa, iterations as u64),
        CombineMethod::MedianKappaSigma { kappa, iterations } => (3, kappa, iterations as u64),
        CombineMethod::AutoAdaptive { iterations } => (4, 0.0, iterations as u64),
        CombineMethod::EntropyWeighted => (5, 0.0, 0),
    };
    w.write_u8(tag)?;
    w.write_f32::<LittleEndian>(kappa)?;
    w.write_u64::<LittleEndian>(iterations)?;
    Ok(())
}

fn read_method<R: Read>(r: &mut R) -> Result<CombineMethod> {
    let tag = r.read_u8()?;
    let kappa = r.read_f32::<LittleEndian>()?;
    let iterations = r.read_u64::<LittleEndian>()? as usize;
    Ok(match tag {
        0 => CombineMethod::Average,
        1 => CombineMethod::Median,
        2 => CombineMethod::KappaSigma { kappa, iterations },
        3 => CombineMethod::MedianKappaSigma { kappa, iterations },
        4 => CombineMethod::AutoAdaptive { iterations },
        5 => CombineMethod::EntropyWeighted,
        other => {
            return Err(NightstackError::Snapshot(format!(
                "unknown combine method tag {other}"
            )))
        }
    })
}

fn write_rect<W: Write>(w: &mut W, rect: &Rect) -> Result<()> {
    w.write_u64::<LittleEndian>(rect.x0 as u64)?;
    w.write_u64::<LittleEndian>(rect.y0 as u64)?;
    w.write_u64::<LittleEndian>(rect.x1 as u64)?;
    w.write_u64::<LittleEndian>(rect.y1 as u64)?;
    Ok(())
}

fn read_rect<R: Read>(r: &mut R) -> Result<Rect> {
    Ok(Rect {
        x0: r.read_u64::<LittleEndian>()? as usize,
        y0: r.read_u64::<LittleEndian>()? as usize,
        x1: r.read_u64::<LittleEndian>()? as usize,
        y1: r.read_u64::<LittleEndian>()? as usize,
    })
}
