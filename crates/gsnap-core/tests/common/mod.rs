use std::path::Path;

use gsnap_core::io::fits::{self, Keyword};
use gsnap_core::io::sequence::FrameSequence;
use ndarray::Array2;

/// Raw-file template used by all fixtures.
pub const RAW_FMT: &str = "gsnapImg*.fits";

/// Write one raw frame file for file number `number`.
pub fn write_raw_frame(dir: &Path, number: usize, data: &Array2<f32>, frame_rate: f64) {
    let path = dir.join(format!("gsnapImg{}.fits", number));
    fits::write_image(
        &path,
        data,
        &[Keyword::real("FRMRATE", frame_rate, "frame rate (frames/s)")],
    )
    .expect("write raw frame");
}

/// Write a run of raw frame files with numbers starting at `start`.
pub fn write_raw_sequence(dir: &Path, start: usize, frames: &[Array2<f32>], frame_rate: f64) {
    for (i, data) in frames.iter().enumerate() {
        write_raw_frame(dir, start + i, data, frame_rate);
    }
}

/// Sequence over `[start, end]` in `dir` with the fixture template.
pub fn raw_sequence(dir: &Path, start: usize, end: usize) -> FrameSequence {
    FrameSequence::new(dir, RAW_FMT, start, end, 0).expect("sequence")
}

pub fn const_frame(h: usize, w: usize, value: f32) -> Array2<f32> {
    Array2::from_elem((h, w), value)
}

/// Deterministic smooth pattern, distinct per frame index.
pub fn pattern_frame(h: usize, w: usize, index: usize) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(r, c)| {
        (index as f32 + 1.0) * 0.5
            + r as f32 * 0.25
            + c as f32 * 0.125
            + ((r * w + c + index) % 7) as f32
    })
}

/// Assert two arrays agree within `tol` at every pixel.
pub fn assert_frames_close(a: &Array2<f32>, b: &Array2<f32>, tol: f32) {
    assert_eq!(a.dim(), b.dim());
    for ((r, c), &va) in a.indexed_iter() {
        let vb = b[[r, c]];
        assert!(
            approx::abs_diff_eq!(va, vb, epsilon = tol),
            "pixel [{},{}] differs: {} vs {}",
            r,
            c,
            va,
            vb
        );
    }
}
