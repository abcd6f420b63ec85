use crate::error::{GsnapError, Result};

/// On/off classification of a raw frame within the chop/nod cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseLabel {
    OnSource,
    OffSource,
    /// Captured while the chopper or telescope was still settling after a
    /// phase boundary; excluded from demodulation.
    Transition,
}

/// Chop/nod timing for a run of evenly spaced frames.
///
/// The chop is the fast modulation and the nod the slow one; both alternate
/// sign every half period. A frame is on-source when the two signs agree
/// and off-source when they differ, so chopping and nodding each cancel in
/// the on-minus-off difference. Labeling is a pure function of frame
/// position and never inspects pixel data.
#[derive(Clone, Copy, Debug)]
pub struct ChopNodTiming {
    chop_freq: f64,
    nod_freq: f64,
    frame_rate: f64,
    settle_fraction: f64,
}

impl ChopNodTiming {
    /// Validates `chop_freq > nod_freq > 0`, a positive frame rate, and a
    /// settle fraction in `[0, 0.5)`.
    pub fn new(
        chop_freq: f64,
        nod_freq: f64,
        frame_rate: f64,
        settle_fraction: f64,
    ) -> Result<Self> {
        if !(nod_freq > 0.0) {
            return Err(GsnapError::Config(format!(
                "nodfreq ({}) must be positive",
                nod_freq
            )));
        }
        if !(chop_freq > nod_freq) {
            return Err(GsnapError::Config(format!(
                "chopfreq ({}) must exceed nodfreq ({})",
                chop_freq, nod_freq
            )));
        }
        if !(frame_rate > 0.0) {
            return Err(GsnapError::Config(format!(
                "frame rate ({}) must be positive",
                frame_rate
            )));
        }
        if !(0.0..0.5).contains(&settle_fraction) {
            return Err(GsnapError::Config(format!(
                "settle_fraction ({}) must be in [0, 0.5)",
                settle_fraction
            )));
        }
        Ok(Self {
            chop_freq,
            nod_freq,
            frame_rate,
            settle_fraction,
        })
    }

    pub fn chop_freq(&self) -> f64 {
        self.chop_freq
    }

    pub fn nod_freq(&self) -> f64 {
        self.nod_freq
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Midpoint acquisition time of the frame at a sequence position.
    fn frame_time(&self, position: usize) -> f64 {
        (position as f64 + 0.5) / self.frame_rate
    }

    /// Phase label of the frame at a sequence position.
    pub fn label(&self, position: usize) -> PhaseLabel {
        let t = self.frame_time(position);
        let (chop_sign, chop_settling) = half_cycle(t, self.chop_freq, self.settle_fraction);
        let (nod_sign, nod_settling) = half_cycle(t, self.nod_freq, self.settle_fraction);
        if chop_settling || nod_settling {
            return PhaseLabel::Transition;
        }
        if chop_sign == nod_sign {
            PhaseLabel::OnSource
        } else {
            PhaseLabel::OffSource
        }
    }

    /// Zero-based nod-cycle index of the frame at a sequence position.
    /// On/off pairing never crosses a nod cycle.
    pub fn nod_cycle(&self, position: usize) -> usize {
        (self.frame_time(position) * self.nod_freq) as usize
    }

    /// Frames per full chop cycle at this frame rate.
    pub fn frames_per_chop_cycle(&self) -> f64 {
        self.frame_rate / self.chop_freq
    }
}

/// Sign of the half cycle containing `t` for a square modulation of the
/// given frequency, and whether `t` falls within the settle window around a
/// half-cycle boundary (`settle` as a fraction of the half period).
fn half_cycle(t: f64, freq: f64, settle: f64) -> (i8, bool) {
    let phase = (t * freq).fract();
    let sign = if phase < 0.5 { 1 } else { -1 };
    let half_phase = (phase * 2.0).fract();
    let boundary_dist = half_phase.min(1.0 - half_phase);
    (sign, boundary_dist < settle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_chop_not_faster_than_nod() {
        assert!(ChopNodTiming::new(5.0, 10.0, 100.0, 0.0).is_err());
        assert!(ChopNodTiming::new(10.0, 10.0, 100.0, 0.0).is_err());
        assert!(ChopNodTiming::new(10.0, 1.0, 100.0, 0.0).is_ok());
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(ChopNodTiming::new(10.0, 0.0, 100.0, 0.0).is_err());
        assert!(ChopNodTiming::new(10.0, -1.0, 100.0, 0.0).is_err());
        assert!(ChopNodTiming::new(10.0, 1.0, 0.0, 0.0).is_err());
        assert!(ChopNodTiming::new(10.0, 1.0, 100.0, 0.5).is_err());
    }

    #[test]
    fn sign_convention_first_half_cycles_are_on() {
        // Both modulations start in their positive half: label is OnSource.
        let timing = ChopNodTiming::new(10.0, 1.0, 100.0, 0.0).unwrap();
        assert_eq!(timing.label(0), PhaseLabel::OnSource);
        // Frame 5 is in the chop's negative half but the nod's positive
        // half: signs differ.
        assert_eq!(timing.label(5), PhaseLabel::OffSource);
    }

    #[test]
    fn nod_cycle_advances_with_nod_period() {
        let timing = ChopNodTiming::new(10.0, 1.0, 100.0, 0.0).unwrap();
        assert_eq!(timing.nod_cycle(0), 0);
        assert_eq!(timing.nod_cycle(99), 0);
        assert_eq!(timing.nod_cycle(100), 1);
    }
}
