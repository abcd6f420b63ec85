use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::error::{GsnapError, Result};
use crate::frame::{Frame, FrameMetadata};
use crate::io::fits::FitsReader;

/// A lazy, restartable run of raw frame files with numbers `[start, end]`
/// (inclusive), named by a template with a single `*` placeholder.
///
/// Frames are read one file at a time; iteration can be restarted from the
/// first file number as often as needed.
#[derive(Clone, Debug)]
pub struct FrameSequence {
    dir: PathBuf,
    prefix: String,
    suffix: String,
    /// Width of a fixed-width zero-padded number field, when the files on
    /// disk use one.
    pad_width: Option<usize>,
    start: usize,
    end: usize,
    ext: usize,
}

impl FrameSequence {
    /// Build a sequence over `[start, end]` in `dir`.
    ///
    /// The template must contain exactly one `*`. An inverted range yields
    /// an empty sequence; downstream consumers reject those with
    /// `EmptySequence`.
    pub fn new(
        dir: impl Into<PathBuf>,
        raw_name_fmt: &str,
        start: usize,
        end: usize,
        ext: usize,
    ) -> Result<Self> {
        let mut parts = raw_name_fmt.split('*');
        let (prefix, suffix) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(s), None) => (p.to_string(), s.to_string()),
            _ => {
                return Err(GsnapError::Config(format!(
                    "raw_name_fmt ({}) must contain exactly one '*'",
                    raw_name_fmt
                )))
            }
        };
        let dir = dir.into();
        let pad_width = detect_pad_width(&dir, &prefix, &suffix);
        Ok(Self {
            dir,
            prefix,
            suffix,
            pad_width,
            start,
            end,
            ext,
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn data_ext(&self) -> usize {
        self.ext
    }

    /// Number of frames in the range (zero when the range is inverted).
    pub fn frame_count(&self) -> usize {
        if self.end >= self.start {
            self.end - self.start + 1
        } else {
            0
        }
    }

    /// File number at a zero-based sequence position.
    pub fn file_number(&self, position: usize) -> usize {
        self.start + position
    }

    /// On-disk path for a file number.
    pub fn path_for(&self, number: usize) -> PathBuf {
        let name = match self.pad_width {
            Some(width) => format!("{}{:0>width$}{}", self.prefix, number, self.suffix),
            None => format!("{}{}{}", self.prefix, number, self.suffix),
        };
        self.dir.join(name)
    }

    /// Shape of the frames, peeked from the first file's header.
    pub fn shape(&self) -> Result<(usize, usize)> {
        if self.frame_count() == 0 {
            return Err(GsnapError::EmptySequence);
        }
        let number = self.start;
        let reader = self.open_reader(number)?;
        reader
            .image_dims(self.ext)
            .map_err(|e| malformed(number, e))
    }

    /// Acquisition rate in frames per second, from the first file's primary
    /// header (`FRMRATE`), when present.
    pub fn frame_rate(&self) -> Result<Option<f64>> {
        if self.frame_count() == 0 {
            return Err(GsnapError::EmptySequence);
        }
        let reader = self.open_reader(self.start)?;
        Ok(reader.hdu(0).ok().and_then(|hdu| hdu.keyword_f64("FRMRATE")))
    }

    /// Read the frame at a zero-based sequence position.
    pub fn read_frame(&self, position: usize) -> Result<Frame> {
        let number = self.file_number(position);
        let reader = self.open_reader(number)?;
        let data = reader
            .read_image(self.ext)
            .map_err(|e| malformed(number, e))?;
        Ok(Frame::new(
            data,
            FrameMetadata {
                file_number: number,
                position,
                ext: self.ext,
            },
        ))
    }

    /// Read only rows `[row_start, row_end)` of the frame at a position.
    pub fn read_band(
        &self,
        position: usize,
        row_start: usize,
        row_end: usize,
    ) -> Result<Array2<f32>> {
        let number = self.file_number(position);
        let reader = self.open_reader(number)?;
        reader
            .read_rows(self.ext, row_start, row_end)
            .map_err(|e| malformed(number, e))
    }

    /// Lazy iterator over the whole range, in ascending file-number order.
    pub fn frames(&self) -> impl Iterator<Item = Result<Frame>> + '_ {
        (0..self.frame_count()).map(move |i| self.read_frame(i))
    }

    fn open_reader(&self, number: usize) -> Result<FitsReader> {
        let path = self.path_for(number);
        if !path.is_file() {
            return Err(GsnapError::MissingFile { number, path });
        }
        FitsReader::open(&path).map_err(|e| malformed(number, e))
    }
}

fn malformed(number: usize, err: GsnapError) -> GsnapError {
    match err {
        GsnapError::InvalidFits(reason) => GsnapError::MalformedFrame { number, reason },
        other => other,
    }
}

/// Probe the directory for a zero-padded fixed-width file-number field.
///
/// Raw acquisition software may or may not zero-pad the number in the file
/// name; if any matching file's number field starts with '0', all files are
/// assumed to share that fixed width.
fn detect_pad_width(dir: &Path, prefix: &str, suffix: &str) -> Option<usize> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(field) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
        else {
            continue;
        };
        if !field.is_empty()
            && field.starts_with('0')
            && field.chars().all(|c| c.is_ascii_digit())
        {
            return Some(field.len());
        }
    }
    None
}
