use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GsnapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid FITS file: {0}")]
    InvalidFits(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing raw frame file {number}: {}", path.display())]
    MissingFile { number: usize, path: PathBuf },

    #[error("Malformed frame file {number}: {reason}")]
    MalformedFrame { number: usize, reason: String },

    #[error("Frame shape {got_h}x{got_w} does not match expected {expected_h}x{expected_w}")]
    ShapeMismatch {
        expected_h: usize,
        expected_w: usize,
        got_h: usize,
        got_w: usize,
    },

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("No usable on/off chop pairs in science sequence")]
    NoUsablePairs,
}

impl GsnapError {
    /// Shape-mismatch helper taking (rows, cols) pairs.
    pub fn shape_mismatch(expected: (usize, usize), got: (usize, usize)) -> Self {
        GsnapError::ShapeMismatch {
            expected_h: expected.0,
            expected_w: expected.1,
            got_h: got.0,
            got_w: got.1,
        }
    }
}

pub type Result<T> = std::result::Result<T, GsnapError>;
