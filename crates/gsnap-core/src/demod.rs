use std::collections::VecDeque;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consts::EPSILON;
use crate::error::{GsnapError, Result};
use crate::frame::{BadPixelMask, MasterFrame};
use crate::io::sequence::FrameSequence;
use crate::phase::{ChopNodTiming, PhaseLabel};

/// How an on-source frame picks its off-source reference for sky
/// subtraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OffPairing {
    /// Temporally nearest off frame within the same nod cycle (ties go to
    /// the earlier one).
    Nearest,
    /// Mean of the two bracketing off frames; falls back to the single
    /// available one at a cycle edge.
    BracketMean,
}

/// What happens to pixels flagged in the bad-pixel mask (and to pixels
/// whose flatfield value is unusable).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BadPixelPolicy {
    /// Marked invalid (NaN) in the output.
    Exclude,
    /// Replaced by the mean of the valid 8-neighbourhood; stays invalid
    /// when no neighbour is valid.
    Interpolate,
}

#[derive(Clone, Copy, Debug)]
pub struct DemodConfig {
    pub pairing: OffPairing,
    pub bad_pixels: BadPixelPolicy,
    /// Cap on simultaneously resident frames, counting the pending-on
    /// buffer, the off reference, and the frame in flight.
    pub max_frames_inmem: Option<usize>,
}

impl Default for DemodConfig {
    fn default() -> Self {
        Self {
            pairing: OffPairing::Nearest,
            bad_pixels: BadPixelPolicy::Exclude,
            max_frames_inmem: None,
        }
    }
}

/// A sky-subtracted, flat-fielded science frame. Invalid pixels are NaN.
#[derive(Clone, Debug)]
pub struct ReducedFrame {
    pub data: Array2<f32>,
    pub file_number: usize,
    pub position: usize,
}

/// Counters describing one demodulation run.
#[derive(Clone, Copy, Debug, Default)]
pub struct DemodStats {
    pub frames_read: usize,
    pub on_frames: usize,
    pub off_frames: usize,
    pub transition_frames: usize,
    pub pairs_reduced: usize,
    pub dropped_unpaired: usize,
}

/// Running per-pixel sum and valid-sample count for coadding reduced
/// frames. The mean ignores invalid contributions pixel by pixel.
#[derive(Clone, Debug)]
pub struct Coadd {
    sum: Array2<f64>,
    count: Array2<u32>,
    frames: usize,
}

impl Coadd {
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            sum: Array2::zeros(shape),
            count: Array2::zeros(shape),
            frames: 0,
        }
    }

    pub fn accumulate(&mut self, frame: &ReducedFrame) {
        for ((acc, cnt), &v) in self
            .sum
            .iter_mut()
            .zip(self.count.iter_mut())
            .zip(frame.data.iter())
        {
            if !v.is_nan() {
                *acc += v as f64;
                *cnt += 1;
            }
        }
        self.frames += 1;
    }

    /// Number of reduced frames accumulated.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn counts(&self) -> &Array2<u32> {
        &self.count
    }

    /// Per-pixel mean over valid samples; NaN where no sample was valid.
    pub fn mean(&self) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros(self.sum.dim());
        for ((o, &s), &c) in out.iter_mut().zip(self.sum.iter()).zip(self.count.iter()) {
            *o = if c > 0 {
                (s / c as f64) as f32
            } else {
                f32::NAN
            };
        }
        out
    }
}

struct PendingOn {
    position: usize,
    file_number: usize,
    nod_cycle: usize,
    data: Array2<f32>,
}

struct OffRef {
    position: usize,
    nod_cycle: usize,
    data: Array2<f32>,
}

/// Streams a science sequence through dark subtraction, chop/nod sky
/// subtraction, flat-fielding, and the bad-pixel policy.
///
/// On frames wait in a bounded queue until their bracketing off frame
/// arrives; everything earlier is released as soon as it can no longer
/// pair, so at most the configured number of frames is resident.
pub struct DemodulationEngine<'a> {
    dark: &'a MasterFrame,
    flat: &'a MasterFrame,
    mask: &'a BadPixelMask,
    timing: ChopNodTiming,
    config: DemodConfig,
}

impl<'a> DemodulationEngine<'a> {
    pub fn new(
        dark: &'a MasterFrame,
        flat: &'a MasterFrame,
        mask: &'a BadPixelMask,
        timing: ChopNodTiming,
        config: DemodConfig,
    ) -> Result<Self> {
        let shape = dark.shape();
        if flat.shape() != shape {
            return Err(GsnapError::shape_mismatch(shape, flat.shape()));
        }
        if mask.shape() != shape {
            return Err(GsnapError::shape_mismatch(shape, mask.shape()));
        }
        if let Some(b) = config.max_frames_inmem {
            if b < 3 {
                return Err(GsnapError::Config(format!(
                    "max_frames_inmem ({}) must be at least 3 for on/off pairing",
                    b
                )));
            }
        }
        Ok(Self {
            dark,
            flat,
            mask,
            timing,
            config,
        })
    }

    /// Run the engine, handing each reduced frame to `sink` as soon as its
    /// pairing resolves.
    pub fn run<F>(&self, seq: &FrameSequence, mut sink: F) -> Result<DemodStats>
    where
        F: FnMut(ReducedFrame) -> Result<()>,
    {
        if seq.frame_count() == 0 {
            return Err(GsnapError::EmptySequence);
        }
        let shape = self.dark.shape();
        let mut stats = DemodStats::default();
        let mut pending: VecDeque<PendingOn> = VecDeque::new();
        let mut prev_off: Option<OffRef> = None;

        for frame in seq.frames() {
            let frame = frame?;
            if frame.shape() != shape {
                return Err(GsnapError::shape_mismatch(shape, frame.shape()));
            }
            stats.frames_read += 1;
            let position = frame.metadata.position;
            let label = self.timing.label(position);
            if label == PhaseLabel::Transition {
                stats.transition_frames += 1;
                continue;
            }
            let cycle = self.timing.nod_cycle(position);

            // On frames left over from an earlier nod cycle can no longer
            // get a later off in their own cycle; settle them now.
            while pending.front().is_some_and(|on| on.nod_cycle < cycle) {
                if let Some(on) = pending.pop_front() {
                    self.resolve(on, prev_off.as_ref(), None, &mut sink, &mut stats)?;
                }
            }

            match label {
                PhaseLabel::OnSource => {
                    stats.on_frames += 1;
                    let meta = frame.metadata;
                    let data = &frame.data - &self.dark.data;
                    if let Some(b) = self.config.max_frames_inmem {
                        // Resident: pending + this frame + off reference +
                        // the frame in flight.
                        while pending.len() + 3 > b {
                            let Some(on) = pending.pop_front() else {
                                break;
                            };
                            self.resolve(on, prev_off.as_ref(), None, &mut sink, &mut stats)?;
                        }
                    }
                    pending.push_back(PendingOn {
                        position,
                        file_number: meta.file_number,
                        nod_cycle: cycle,
                        data,
                    });
                }
                PhaseLabel::OffSource => {
                    stats.off_frames += 1;
                    let off = OffRef {
                        position,
                        nod_cycle: cycle,
                        data: &frame.data - &self.dark.data,
                    };
                    while let Some(on) = pending.pop_front() {
                        self.resolve(on, prev_off.as_ref(), Some(&off), &mut sink, &mut stats)?;
                    }
                    prev_off = Some(off);
                }
                PhaseLabel::Transition => unreachable!(),
            }
        }

        // Tail: whatever is left can only pair backwards.
        while let Some(on) = pending.pop_front() {
            self.resolve(on, prev_off.as_ref(), None, &mut sink, &mut stats)?;
        }

        if stats.pairs_reduced == 0 {
            return Err(GsnapError::NoUsablePairs);
        }
        info!(
            pairs = stats.pairs_reduced,
            on = stats.on_frames,
            off = stats.off_frames,
            transition = stats.transition_frames,
            dropped = stats.dropped_unpaired,
            "demodulation complete"
        );
        Ok(stats)
    }

    /// Run the engine and accumulate every reduced frame into a coadd.
    pub fn run_coadd(&self, seq: &FrameSequence) -> Result<(Coadd, DemodStats)> {
        let mut coadd = Coadd::new(self.dark.shape());
        let stats = self.run(seq, |reduced| {
            coadd.accumulate(&reduced);
            Ok(())
        })?;
        Ok((coadd, stats))
    }

    fn resolve<F>(
        &self,
        on: PendingOn,
        prev: Option<&OffRef>,
        next: Option<&OffRef>,
        sink: &mut F,
        stats: &mut DemodStats,
    ) -> Result<()>
    where
        F: FnMut(ReducedFrame) -> Result<()>,
    {
        let prev = prev.filter(|o| o.nod_cycle == on.nod_cycle);
        let next = next.filter(|o| o.nod_cycle == on.nod_cycle);

        let data = match (prev, next) {
            (None, None) => {
                stats.dropped_unpaired += 1;
                warn!(
                    frame = on.file_number,
                    "no off reference within nod cycle; dropping on frame"
                );
                return Ok(());
            }
            (Some(off), None) | (None, Some(off)) => self.reduce_single(&on.data, &off.data),
            (Some(p), Some(n)) => match self.config.pairing {
                OffPairing::Nearest => {
                    if on.position - p.position <= n.position - on.position {
                        self.reduce_single(&on.data, &p.data)
                    } else {
                        self.reduce_single(&on.data, &n.data)
                    }
                }
                OffPairing::BracketMean => self.reduce_bracket(&on.data, &p.data, &n.data),
            },
        };

        stats.pairs_reduced += 1;
        sink(ReducedFrame {
            data,
            file_number: on.file_number,
            position: on.position,
        })
    }

    fn reduce_single(&self, on: &Array2<f32>, off: &Array2<f32>) -> Array2<f32> {
        let diff = on - off;
        self.flatten_and_mask(diff)
    }

    fn reduce_bracket(
        &self,
        on: &Array2<f32>,
        before: &Array2<f32>,
        after: &Array2<f32>,
    ) -> Array2<f32> {
        let mut diff = on.clone();
        for ((d, &b), &a) in diff.iter_mut().zip(before.iter()).zip(after.iter()) {
            *d -= 0.5 * (b + a);
        }
        self.flatten_and_mask(diff)
    }

    /// Flat-field the sky-subtracted difference and apply the bad-pixel
    /// policy. Pixels that are masked, or whose flat value is ~0, never
    /// get divided; they go straight to the policy.
    fn flatten_and_mask(&self, mut diff: Array2<f32>) -> Array2<f32> {
        for ((row, col), v) in diff.indexed_iter_mut() {
            let flat = self.flat.data[[row, col]];
            if self.mask.is_bad(row, col) || flat.abs() <= EPSILON {
                *v = f32::NAN;
            } else {
                *v /= flat;
            }
        }
        if self.config.bad_pixels == BadPixelPolicy::Interpolate {
            interpolate_invalid(&mut diff);
        }
        diff
    }
}

/// Replace NaN pixels by the mean of their valid 8-neighbours, reading
/// from a snapshot so the fill order cannot matter. Pixels with no valid
/// neighbour stay NaN.
fn interpolate_invalid(data: &mut Array2<f32>) {
    let src = data.clone();
    let (h, w) = src.dim();
    for ((row, col), v) in data.indexed_iter_mut() {
        if !v.is_nan() {
            continue;
        }
        let mut sum = 0.0f32;
        let mut n = 0u32;
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let r = row as i64 + dr;
                let c = col as i64 + dc;
                if r < 0 || c < 0 || r >= h as i64 || c >= w as i64 {
                    continue;
                }
                let nv = src[[r as usize, c as usize]];
                if !nv.is_nan() {
                    sum += nv;
                    n += 1;
                }
            }
        }
        if n > 0 {
            *v = sum / n as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolate_fills_from_neighbours() {
        let mut data = Array2::from_elem((3, 3), 2.0f32);
        data[[1, 1]] = f32::NAN;
        interpolate_invalid(&mut data);
        assert_eq!(data[[1, 1]], 2.0);
    }

    #[test]
    fn interpolate_leaves_isolated_invalid() {
        let mut data = Array2::from_elem((1, 1), f32::NAN);
        interpolate_invalid(&mut data);
        assert!(data[[0, 0]].is_nan());
    }

    #[test]
    fn coadd_mean_ignores_invalid_samples() {
        let mut coadd = Coadd::new((1, 2));
        let mut a = Array2::from_elem((1, 2), 1.0f32);
        a[[0, 1]] = f32::NAN;
        let b = Array2::from_elem((1, 2), 3.0f32);
        coadd.accumulate(&ReducedFrame {
            data: a,
            file_number: 0,
            position: 0,
        });
        coadd.accumulate(&ReducedFrame {
            data: b,
            file_number: 1,
            position: 1,
        });
        let mean = coadd.mean();
        assert_eq!(mean[[0, 0]], 2.0);
        assert_eq!(mean[[0, 1]], 3.0);
        assert_eq!(coadd.counts()[[0, 1]], 1);
        assert_eq!(coadd.frames(), 2);
    }
}
