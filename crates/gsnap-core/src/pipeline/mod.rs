pub mod config;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::calib::{build_bad_pixel_mask, build_master_dark, build_master_flat};
use crate::demod::{Coadd, DemodulationEngine};
use crate::error::{GsnapError, Result};
use crate::frame::{BadPixelMask, MasterFrame};
use crate::io::fits::{self, FitsReader, Keyword};
use crate::phase::ChopNodTiming;

use self::config::{OutputMode, ReductionConfig};

pub fn dark_product_path(cfg: &ReductionConfig) -> PathBuf {
    cfg.calib.calib_outpath.join(format!(
        "dark_{}_{}.fits",
        cfg.calib.dark.start, cfg.calib.dark.end
    ))
}

pub fn bpmask_product_path(cfg: &ReductionConfig) -> PathBuf {
    cfg.calib.calib_outpath.join(format!(
        "bpmask_{}_{}.fits",
        cfg.calib.dark.start, cfg.calib.dark.end
    ))
}

pub fn flat_product_path(cfg: &ReductionConfig) -> PathBuf {
    cfg.calib.calib_outpath.join(format!(
        "flatfield_{}_{}.fits",
        cfg.calib.flat.start, cfg.calib.flat.end
    ))
}

pub fn coadd_product_path(cfg: &ReductionConfig) -> PathBuf {
    cfg.reduction.reduce_outpath.join(format!(
        "chopnod_{}_{}.fits",
        cfg.reduction.data.start, cfg.reduction.data.end
    ))
}

pub fn reduced_frame_path(cfg: &ReductionConfig, file_number: usize) -> PathBuf {
    cfg.reduction
        .reduce_outpath
        .join(format!("chopnod_{}.fits", file_number))
}

/// Build the master dark and write it to the calibration output path.
pub fn run_master_dark(cfg: &ReductionConfig) -> Result<PathBuf> {
    cfg.validate()?;
    let seq = cfg.dark_sequence()?;
    let master = build_master_dark(&seq, cfg.memory_policy())?;

    fs::create_dir_all(&cfg.calib.calib_outpath)?;
    let path = dark_product_path(cfg);
    fits::write_image(
        &path,
        &master.data,
        &[
            Keyword::text("FILETYPE", "Master Dark", ""),
            Keyword::int("NFRAMES", master.nframes as i64, "raw dark frames combined"),
            Keyword::int("FILE_STR", cfg.calib.dark.start as i64, "first raw file number"),
            Keyword::int("FILE_END", cfg.calib.dark.end as i64, "last raw file number"),
            Keyword::text("COMBTYPE", "median", "per-pixel combination"),
        ],
    )?;
    info!(path = %path.display(), "master dark written");
    Ok(path)
}

/// Build the bad-pixel mask from the dark sequence and write it.
pub fn run_bad_pixel_mask(cfg: &ReductionConfig) -> Result<PathBuf> {
    cfg.validate()?;
    let seq = cfg.dark_sequence()?;
    let mask = build_bad_pixel_mask(&seq, cfg.calib.bp_threshold, cfg.memory_policy())?;

    fs::create_dir_all(&cfg.calib.calib_outpath)?;
    let path = bpmask_product_path(cfg);
    fits::write_mask(
        &path,
        &mask.flags,
        &[
            Keyword::text("FILETYPE", "Pixel Mask", ""),
            Keyword::int("NFRAMES", seq.frame_count() as i64, "raw dark frames used"),
            Keyword::int("FILE_STR", cfg.calib.dark.start as i64, "first raw file number"),
            Keyword::int("FILE_END", cfg.calib.dark.end as i64, "last raw file number"),
            Keyword::real(
                "NSIG",
                cfg.calib.bp_threshold as f64,
                "threshold x M.A.D. used (bp_threshold)",
            ),
            Keyword::int(
                "NFLAGGED",
                mask.flagged_count() as i64,
                "total number bad pixels flagged",
            ),
        ],
    )?;
    info!(path = %path.display(), flagged = mask.flagged_count(), "bad pixel mask written");
    Ok(path)
}

/// Build the flatfield from the flat sequence, using the master dark (and
/// the bad-pixel mask for normalization when its product exists), and
/// write it.
pub fn run_master_flat(cfg: &ReductionConfig) -> Result<PathBuf> {
    cfg.validate()?;
    let dark_path = dark_product_path(cfg);
    let dark = load_master(&dark_path)?;

    let mask_path = bpmask_product_path(cfg);
    let mask = if mask_path.is_file() {
        Some(load_mask(&mask_path)?)
    } else {
        warn!(path = %mask_path.display(), "no bad pixel mask product; normalizing unmasked");
        None
    };

    let seq = cfg.flat_sequence()?;
    let flat = build_master_flat(&seq, &dark, mask.as_ref(), cfg.memory_policy())?;

    fs::create_dir_all(&cfg.calib.calib_outpath)?;
    let path = flat_product_path(cfg);
    let dark_name = file_name(&dark_path);
    let mut keywords = vec![
        Keyword::text("FILETYPE", "Flatfield", ""),
        Keyword::int("NFRAMES", flat.nframes as i64, "raw flat frames combined"),
        Keyword::int("FILE_STR", cfg.calib.flat.start as i64, "first raw file number"),
        Keyword::int("FILE_END", cfg.calib.flat.end as i64, "last raw file number"),
        Keyword::text("DARKFILE", &dark_name, "dark file used"),
    ];
    if mask.is_some() {
        keywords.push(Keyword::text(
            "MASKFILE",
            &file_name(&mask_path),
            "bad pix mask file used",
        ));
    }
    fits::write_image(&path, &flat.data, &keywords)?;
    info!(path = %path.display(), "flatfield written");
    Ok(path)
}

/// Run the three calibration builds in dependency order.
pub fn run_calibration(cfg: &ReductionConfig) -> Result<Vec<PathBuf>> {
    let dark = run_master_dark(cfg)?;
    let mask = run_bad_pixel_mask(cfg)?;
    let flat = run_master_flat(cfg)?;
    Ok(vec![dark, mask, flat])
}

/// Demodulate the science sequence against the calibration products on
/// disk, writing per-frame outputs or a single coadd per the configured
/// output mode. `on_reduced` is called with the running count of reduced
/// frames.
pub fn run_reduce(
    cfg: &ReductionConfig,
    mut on_reduced: impl FnMut(usize),
) -> Result<Vec<PathBuf>> {
    cfg.validate()?;
    let dark = load_master(&dark_product_path(cfg))?;
    let flat = load_master(&flat_product_path(cfg))?;
    let mask_path = bpmask_product_path(cfg);
    let mask = if mask_path.is_file() {
        load_mask(&mask_path)?
    } else {
        warn!(path = %mask_path.display(), "no bad pixel mask product; treating all pixels as good");
        BadPixelMask::none(dark.shape())
    };

    let seq = cfg.science_sequence()?;
    let frame_rate = match seq.frame_rate()? {
        Some(rate) => rate,
        None => cfg.reduction.frame_rate.ok_or_else(|| {
            GsnapError::Config(
                "frame rate unknown: raw headers carry no FRMRATE and frame_rate is not configured"
                    .into(),
            )
        })?,
    };
    let timing = ChopNodTiming::new(
        cfg.reduction.chop_freq,
        cfg.reduction.nod_freq,
        frame_rate,
        cfg.reduction.settle_fraction,
    )?;
    let engine = DemodulationEngine::new(&dark, &flat, &mask, timing, cfg.demod_config())?;

    fs::create_dir_all(&cfg.reduction.reduce_outpath)?;
    match cfg.reduction.output {
        OutputMode::Coadd => {
            let mut coadd = Coadd::new(dark.shape());
            let stats = engine.run(&seq, |reduced| {
                coadd.accumulate(&reduced);
                on_reduced(coadd.frames());
                Ok(())
            })?;
            let path = coadd_product_path(cfg);
            fits::write_image(
                &path,
                &coadd.mean(),
                &[
                    Keyword::text("FILETYPE", "Chop/Nod Coadd", ""),
                    Keyword::int("NFRAMES", stats.pairs_reduced as i64, "reduced frames coadded"),
                    Keyword::int(
                        "FILE_STR",
                        cfg.reduction.data.start as i64,
                        "first raw file number",
                    ),
                    Keyword::int(
                        "FILE_END",
                        cfg.reduction.data.end as i64,
                        "last raw file number",
                    ),
                    Keyword::real("CHOPFREQ", cfg.reduction.chop_freq, "chop frequency (Hz)"),
                    Keyword::real("NODFREQ", cfg.reduction.nod_freq, "nod frequency (Hz)"),
                    Keyword::real("FRMRATE", frame_rate, "frame rate (frames/s)"),
                ],
            )?;
            info!(path = %path.display(), pairs = stats.pairs_reduced, "coadd written");
            Ok(vec![path])
        }
        OutputMode::Frames => {
            let mut written = Vec::new();
            engine.run(&seq, |reduced| {
                let path = reduced_frame_path(cfg, reduced.file_number);
                fits::write_image(
                    &path,
                    &reduced.data,
                    &[
                        Keyword::text("FILETYPE", "Reduced Frame", ""),
                        Keyword::int(
                            "RAWFRAME",
                            reduced.file_number as i64,
                            "raw on-source file number",
                        ),
                        Keyword::real("CHOPFREQ", cfg.reduction.chop_freq, "chop frequency (Hz)"),
                        Keyword::real("NODFREQ", cfg.reduction.nod_freq, "nod frequency (Hz)"),
                        Keyword::real("FRMRATE", frame_rate, "frame rate (frames/s)"),
                    ],
                )?;
                written.push(path);
                on_reduced(written.len());
                Ok(())
            })?;
            info!(count = written.len(), "reduced frames written");
            Ok(written)
        }
    }
}

/// Load a master calibration frame product from disk.
pub fn load_master(path: &Path) -> Result<MasterFrame> {
    let reader = FitsReader::open(path)?;
    let data = reader.read_image(0)?;
    let nframes = reader
        .hdu(0)?
        .keyword_i64("NFRAMES")
        .unwrap_or(0)
        .max(0) as usize;
    Ok(MasterFrame { data, nframes })
}

/// Load a bad-pixel mask product from disk (non-zero = flagged).
pub fn load_mask(path: &Path) -> Result<BadPixelMask> {
    let reader = FitsReader::open(path)?;
    let flags = reader.read_image(0)?.mapv(|v| v != 0.0);
    Ok(BadPixelMask { flags })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
