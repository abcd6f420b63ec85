use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::calib::MemoryPolicy;
use crate::consts::{
    DEFAULT_BP_THRESHOLD, DEFAULT_MAX_FRAMES_INMEM, DEFAULT_RAW_NAME_FMT, DEFAULT_SETTLE_FRACTION,
};
use crate::demod::{BadPixelPolicy, DemodConfig, OffPairing};
use crate::error::{GsnapError, Result};
use crate::io::sequence::FrameSequence;

/// Full reduction configuration, as read from a TOML file.
///
/// Everything the calibration builders and the demodulation engine consume
/// is validated here once; the core components re-check only the
/// relationships they depend on themselves.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ReductionConfig {
    #[serde(default)]
    pub data: DataArchConfig,
    #[serde(default)]
    pub computing: ComputingConfig,
    #[serde(default)]
    pub calib: CalibConfig,
    #[serde(default)]
    pub reduction: ReduceConfig,
}

/// How the raw frame files are laid out on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataArchConfig {
    /// Naming template with a single `*` for the file number,
    /// e.g. `gsnapImg*.fits`.
    pub raw_name_fmt: String,
    /// FITS extension index holding the 2D frame data.
    #[serde(default)]
    pub data_ext: usize,
}

impl Default for DataArchConfig {
    fn default() -> Self {
        Self {
            raw_name_fmt: DEFAULT_RAW_NAME_FMT.to_string(),
            data_ext: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComputingConfig {
    /// Bound the number of simultaneously resident frames.
    pub save_mem: bool,
    /// Frame cap when `save_mem` is on; absent means unbounded.
    pub max_frames_inmem: Option<usize>,
}

impl Default for ComputingConfig {
    fn default() -> Self {
        Self {
            save_mem: true,
            max_frames_inmem: Some(DEFAULT_MAX_FRAMES_INMEM),
        }
    }
}

/// Inclusive run of raw file numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FrameRange {
    pub start: usize,
    pub end: usize,
}

impl FrameRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn count(&self) -> usize {
        if self.end >= self.start {
            self.end - self.start + 1
        } else {
            0
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.end < self.start {
            return Err(GsnapError::Config(format!(
                "{} file range inverted ({}..{})",
                name, self.start, self.end
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibConfig {
    /// Directory holding the raw dark and flat frame files.
    pub raw_cals_path: PathBuf,
    /// Directory receiving the calibration products.
    pub calib_outpath: PathBuf,
    pub dark: FrameRange,
    pub flat: FrameRange,
    /// Bad-pixel threshold in MADs.
    pub bp_threshold: f32,
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self {
            raw_cals_path: PathBuf::from("raw/cals"),
            calib_outpath: PathBuf::from("calib"),
            dark: FrameRange::default(),
            flat: FrameRange::default(),
            bp_threshold: DEFAULT_BP_THRESHOLD,
        }
    }
}

/// Whether the reduction emits one file per reduced frame or one coadd.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    Frames,
    Coadd,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReduceConfig {
    /// Directory holding the raw science frame files.
    pub raw_data_path: PathBuf,
    /// Directory receiving the reduced output.
    pub reduce_outpath: PathBuf,
    pub data: FrameRange,
    /// Chop frequency in Hz (the fast modulation).
    pub chop_freq: f64,
    /// Nod frequency in Hz (the slow modulation).
    pub nod_freq: f64,
    /// Fallback acquisition rate in frames per second, used when the raw
    /// headers carry no FRMRATE.
    pub frame_rate: Option<f64>,
    /// Fraction of a chop/nod half-period treated as settling time.
    pub settle_fraction: f64,
    pub pairing: OffPairing,
    pub bad_pixels: BadPixelPolicy,
    pub output: OutputMode,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            raw_data_path: PathBuf::from("raw/data"),
            reduce_outpath: PathBuf::from("reduced"),
            data: FrameRange::default(),
            chop_freq: 10.0,
            nod_freq: 0.1,
            frame_rate: None,
            settle_fraction: DEFAULT_SETTLE_FRACTION,
            pairing: OffPairing::Nearest,
            bad_pixels: BadPixelPolicy::Exclude,
            output: OutputMode::Coadd,
        }
    }
}

impl ReductionConfig {
    /// Cross-parameter validation, independent of anything on disk.
    pub fn validate(&self) -> Result<()> {
        if self.data.raw_name_fmt.matches('*').count() != 1 {
            return Err(GsnapError::Config(format!(
                "raw_name_fmt ({}) must contain exactly one '*'",
                self.data.raw_name_fmt
            )));
        }
        self.calib.dark.validate("dark")?;
        self.calib.flat.validate("flat")?;
        self.reduction.data.validate("data")?;
        if self.calib.bp_threshold <= 0.0 {
            return Err(GsnapError::Config(format!(
                "bp_threshold ({}) must be positive",
                self.calib.bp_threshold
            )));
        }
        if self.reduction.nod_freq <= 0.0 {
            return Err(GsnapError::Config(format!(
                "nodfreq ({}) must be positive",
                self.reduction.nod_freq
            )));
        }
        if self.reduction.chop_freq <= self.reduction.nod_freq {
            return Err(GsnapError::Config(format!(
                "chopfreq ({}) must exceed nodfreq ({})",
                self.reduction.chop_freq, self.reduction.nod_freq
            )));
        }
        if !(0.0..0.5).contains(&self.reduction.settle_fraction) {
            return Err(GsnapError::Config(format!(
                "settle_fraction ({}) must be in [0, 0.5)",
                self.reduction.settle_fraction
            )));
        }
        self.memory_policy().validate()?;
        Ok(())
    }

    pub fn memory_policy(&self) -> MemoryPolicy {
        MemoryPolicy {
            save_mem: self.computing.save_mem,
            max_frames_inmem: self.computing.max_frames_inmem,
        }
    }

    pub fn demod_config(&self) -> DemodConfig {
        DemodConfig {
            pairing: self.reduction.pairing,
            bad_pixels: self.reduction.bad_pixels,
            max_frames_inmem: self.memory_policy().budget(),
        }
    }

    pub fn dark_sequence(&self) -> Result<FrameSequence> {
        FrameSequence::new(
            &self.calib.raw_cals_path,
            &self.data.raw_name_fmt,
            self.calib.dark.start,
            self.calib.dark.end,
            self.data.data_ext,
        )
    }

    pub fn flat_sequence(&self) -> Result<FrameSequence> {
        FrameSequence::new(
            &self.calib.raw_cals_path,
            &self.data.raw_name_fmt,
            self.calib.flat.start,
            self.calib.flat.end,
            self.data.data_ext,
        )
    }

    pub fn science_sequence(&self) -> Result<FrameSequence> {
        FrameSequence::new(
            &self.reduction.raw_data_path,
            &self.data.raw_name_fmt,
            self.reduction.data.start,
            self.reduction.data.end,
            self.data.data_ext,
        )
    }
}
