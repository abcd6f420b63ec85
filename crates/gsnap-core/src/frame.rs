use ndarray::Array2;

/// A single raw detector frame in detector units (DN).
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
    pub metadata: FrameMetadata,
}

impl Frame {
    pub fn new(data: Array2<f32>, metadata: FrameMetadata) -> Self {
        Self { data, metadata }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameMetadata {
    /// File number substituted into the raw naming template.
    pub file_number: usize,
    /// Zero-based position within its sequence.
    pub position: usize,
    /// FITS extension index the data was read from.
    pub ext: usize,
}

/// A combined calibration frame (master dark or flatfield), pixel-aligned
/// with the raw frames it was built from.
#[derive(Clone, Debug)]
pub struct MasterFrame {
    pub data: Array2<f32>,
    /// Number of raw frames combined into this product.
    pub nframes: usize,
}

impl MasterFrame {
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// Per-pixel defect flags derived from dark-frame statistics.
#[derive(Clone, Debug)]
pub struct BadPixelMask {
    pub flags: Array2<bool>,
}

impl BadPixelMask {
    /// All-good mask of the given shape.
    pub fn none(shape: (usize, usize)) -> Self {
        Self {
            flags: Array2::from_elem(shape, false),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.flags.dim()
    }

    pub fn is_bad(&self, row: usize, col: usize) -> bool {
        self.flags[[row, col]]
    }

    pub fn flagged_count(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }
}
