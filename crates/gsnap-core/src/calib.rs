use ndarray::{s, Array2};
use tracing::{debug, info, warn};

use crate::consts::EPSILON;
use crate::error::{GsnapError, Result};
use crate::frame::{BadPixelMask, MasterFrame};
use crate::io::sequence::FrameSequence;
use crate::stats::{masked_median, stack_mean, stack_median, stack_median_mad};

/// Cap on simultaneously resident frame data during calibration builds.
///
/// With `save_mem` off, whole sequences are stacked in memory. With it on,
/// computation proceeds by horizontal row bands sized so that the resident
/// pixel data never exceeds `max_frames_inmem` frames' worth; an absent
/// cap behaves as unbounded.
#[derive(Clone, Copy, Debug)]
pub struct MemoryPolicy {
    pub save_mem: bool,
    pub max_frames_inmem: Option<usize>,
}

impl MemoryPolicy {
    pub const UNBOUNDED: MemoryPolicy = MemoryPolicy {
        save_mem: false,
        max_frames_inmem: None,
    };

    pub fn bounded(max_frames: usize) -> Self {
        Self {
            save_mem: true,
            max_frames_inmem: Some(max_frames),
        }
    }

    /// Effective frame budget; `None` means unbounded.
    pub fn budget(&self) -> Option<usize> {
        if self.save_mem {
            self.max_frames_inmem
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.save_mem && self.max_frames_inmem == Some(0) {
            return Err(GsnapError::Config(
                "max_frames_inmem (0) must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            save_mem: true,
            max_frames_inmem: Some(crate::consts::DEFAULT_MAX_FRAMES_INMEM),
        }
    }
}

/// Per-pixel median across a dark sequence.
pub fn build_master_dark(seq: &FrameSequence, mem: MemoryPolicy) -> Result<MasterFrame> {
    mem.validate()?;
    let n = seq.frame_count();
    if n == 0 {
        return Err(GsnapError::EmptySequence);
    }
    let shape = seq.shape()?;
    info!(
        frames = n,
        rows = shape.0,
        cols = shape.1,
        "building master dark"
    );

    let mut out = Array2::<f32>::zeros(shape);
    for_each_band(seq, shape, mem.budget(), |row0, stack| {
        let med = stack_median(&stack)?;
        out.slice_mut(s![row0..row0 + med.nrows(), ..]).assign(&med);
        Ok(())
    })?;

    Ok(MasterFrame {
        data: out,
        nframes: n,
    })
}

/// Flag pixels whose mean dark value deviates from their median dark value
/// by more than `bp_threshold` MADs.
///
/// Statistics are per pixel across the dark sequence. A pixel whose MAD is
/// zero is flagged only when its mean and median actually differ, so a
/// constant column never divides by zero and never flags.
pub fn build_bad_pixel_mask(
    seq: &FrameSequence,
    bp_threshold: f32,
    mem: MemoryPolicy,
) -> Result<BadPixelMask> {
    mem.validate()?;
    if bp_threshold <= 0.0 {
        return Err(GsnapError::Config(format!(
            "bp_threshold ({}) must be positive",
            bp_threshold
        )));
    }
    let n = seq.frame_count();
    if n == 0 {
        return Err(GsnapError::EmptySequence);
    }
    let shape = seq.shape()?;
    info!(frames = n, threshold = bp_threshold, "finding bad pixels");

    let mut flags = Array2::<bool>::from_elem(shape, false);
    for_each_band(seq, shape, mem.budget(), |row0, stack| {
        let mean = stack_mean(&stack)?;
        let (med, mad) = stack_median_mad(&stack)?;
        let mut band_flags = flags.slice_mut(s![row0..row0 + mean.nrows(), ..]);
        for ((flag, (&m, &c)), &d) in band_flags
            .iter_mut()
            .zip(mean.iter().zip(med.iter()))
            .zip(mad.iter())
        {
            let dev = (m - c).abs();
            *flag = if d > EPSILON {
                dev > bp_threshold * d
            } else {
                dev > EPSILON
            };
        }
        Ok(())
    })?;

    let mask = BadPixelMask { flags };
    info!(
        flagged = mask.flagged_count(),
        total = shape.0 * shape.1,
        "bad pixel mask built"
    );
    Ok(mask)
}

/// Per-pixel median of dark-subtracted flat frames, normalized to unit
/// median over non-flagged pixels.
pub fn build_master_flat(
    seq: &FrameSequence,
    dark: &MasterFrame,
    mask: Option<&BadPixelMask>,
    mem: MemoryPolicy,
) -> Result<MasterFrame> {
    mem.validate()?;
    let n = seq.frame_count();
    if n == 0 {
        return Err(GsnapError::EmptySequence);
    }
    let shape = seq.shape()?;
    if dark.shape() != shape {
        return Err(GsnapError::shape_mismatch(shape, dark.shape()));
    }
    if let Some(m) = mask {
        if m.shape() != shape {
            return Err(GsnapError::shape_mismatch(shape, m.shape()));
        }
    }
    info!(frames = n, "building flatfield");

    // The dark-subtracted copy roughly doubles the per-band footprint, so
    // the frame budget is halved here.
    let budget = mem.budget().map(|b| (b / 2).max(1));

    let mut flat = Array2::<f32>::zeros(shape);
    for_each_band(seq, shape, budget, |row0, mut stack| {
        let row1 = row0 + stack[0].nrows();
        let dark_band = dark.data.slice(s![row0..row1, ..]);
        for band in &mut stack {
            *band -= &dark_band;
        }
        let med = stack_median(&stack)?;
        flat.slice_mut(s![row0..row1, ..]).assign(&med);
        Ok(())
    })?;

    let good = mask.map(|m| m.flags.mapv(|f| !f));
    match masked_median(&flat, good.as_ref()) {
        Some(norm) if norm.abs() > EPSILON => {
            flat /= norm;
            debug!(norm, "flatfield normalized to unit median");
        }
        _ => warn!("flatfield median is zero; leaving unnormalized"),
    }

    Ok(MasterFrame {
        data: flat,
        nframes: n,
    })
}

/// Run a per-band reduction over the sequence.
///
/// Unbounded: one band covering the whole frame, read via the plain frame
/// iterator. Bounded: row bands sized to the frame budget, re-iterating the
/// restartable sequence once per band and reading only that band from each
/// file.
fn for_each_band<F>(
    seq: &FrameSequence,
    shape: (usize, usize),
    budget: Option<usize>,
    mut f: F,
) -> Result<()>
where
    F: FnMut(usize, Vec<Array2<f32>>) -> Result<()>,
{
    let n = seq.frame_count();
    let (h, w) = shape;

    let Some(budget) = budget else {
        let mut stack = Vec::with_capacity(n);
        for frame in seq.frames() {
            let frame = frame?;
            if frame.shape() != shape {
                return Err(GsnapError::shape_mismatch(shape, frame.shape()));
            }
            stack.push(frame.data);
        }
        return f(0, stack);
    };

    let rows = band_rows(budget, h, n);
    debug!(band_rows = rows, passes = h.div_ceil(rows), "banded pass");
    let mut row0 = 0;
    while row0 < h {
        let row1 = (row0 + rows).min(h);
        let mut stack = Vec::with_capacity(n);
        for position in 0..n {
            let band = seq.read_band(position, row0, row1)?;
            if band.ncols() != w {
                return Err(GsnapError::shape_mismatch(shape, (h, band.ncols())));
            }
            stack.push(band);
        }
        f(row0, stack)?;
        row0 = row1;
    }
    Ok(())
}

/// Rows per band such that `n` bands of this height stay within `budget`
/// whole frames of resident pixel data.
fn band_rows(budget: usize, height: usize, n: usize) -> usize {
    ((budget * height) / n).clamp(1, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_rows_respects_budget() {
        // 10 frames of 100 rows with a 2-frame budget: 20 rows per band.
        assert_eq!(band_rows(2, 100, 10), 20);
        // Budget larger than the sequence covers the frame in one band.
        assert_eq!(band_rows(50, 100, 10), 100);
        // Never below one row.
        assert_eq!(band_rows(1, 4, 100), 1);
    }

    #[test]
    fn memory_policy_budget() {
        assert_eq!(MemoryPolicy::UNBOUNDED.budget(), None);
        assert_eq!(MemoryPolicy::bounded(8).budget(), Some(8));
        let off = MemoryPolicy {
            save_mem: false,
            max_frames_inmem: Some(8),
        };
        assert_eq!(off.budget(), None);
        assert!(MemoryPolicy::bounded(0).validate().is_err());
    }
}
