#[allow(dead_code)]
mod common;

use gsnap_core::calib::{
    build_bad_pixel_mask, build_master_dark, build_master_flat, MemoryPolicy,
};
use tempfile::TempDir;

/// Twelve 16x8 frames with a smooth, frame-dependent pattern. A 3-frame
/// budget forces multiple row-band passes over the sequence.
fn write_fixture(dir: &TempDir) {
    let frames: Vec<_> = (0..12).map(|i| common::pattern_frame(16, 8, i)).collect();
    common::write_raw_sequence(dir.path(), 50, &frames, 50.0);
}

#[test]
fn test_bounded_master_dark_matches_unbounded() {
    let dir = TempDir::new().unwrap();
    write_fixture(&dir);
    let seq = common::raw_sequence(dir.path(), 50, 61);

    let eager = build_master_dark(&seq, MemoryPolicy::UNBOUNDED).unwrap();
    let bounded = build_master_dark(&seq, MemoryPolicy::bounded(3)).unwrap();

    assert_eq!(eager.nframes, bounded.nframes);
    common::assert_frames_close(&eager.data, &bounded.data, 1e-6);
}

#[test]
fn test_bounded_bpmask_matches_unbounded() {
    let dir = TempDir::new().unwrap();
    // Pattern frames plus two injected defects.
    let mut frames: Vec<_> = (0..12).map(|i| common::pattern_frame(16, 8, i)).collect();
    frames[11][[3, 3]] += 500.0;
    frames[11][[9, 5]] -= 500.0;
    common::write_raw_sequence(dir.path(), 50, &frames, 50.0);
    let seq = common::raw_sequence(dir.path(), 50, 61);

    let eager = build_bad_pixel_mask(&seq, 7.0, MemoryPolicy::UNBOUNDED).unwrap();
    let bounded = build_bad_pixel_mask(&seq, 7.0, MemoryPolicy::bounded(3)).unwrap();

    assert_eq!(eager.flags, bounded.flags);
    assert!(eager.is_bad(3, 3));
    assert!(eager.is_bad(9, 5));
}

#[test]
fn test_bounded_flat_matches_unbounded() {
    let dir = TempDir::new().unwrap();
    write_fixture(&dir);
    let seq = common::raw_sequence(dir.path(), 50, 61);
    let dark = build_master_dark(&seq, MemoryPolicy::UNBOUNDED).unwrap();

    let flat_frames: Vec<_> = (0..12)
        .map(|i| {
            let mut f = common::pattern_frame(16, 8, i);
            f += 40.0;
            f
        })
        .collect();
    common::write_raw_sequence(dir.path(), 200, &flat_frames, 50.0);
    let flat_seq = common::raw_sequence(dir.path(), 200, 211);

    let eager = build_master_flat(&flat_seq, &dark, None, MemoryPolicy::UNBOUNDED).unwrap();
    let bounded = build_master_flat(&flat_seq, &dark, None, MemoryPolicy::bounded(3)).unwrap();

    common::assert_frames_close(&eager.data, &bounded.data, 1e-5);
}

#[test]
fn test_budget_of_one_still_works() {
    // Degenerate single-row bands.
    let dir = TempDir::new().unwrap();
    let frames: Vec<_> = (0..5).map(|i| common::pattern_frame(4, 3, i)).collect();
    common::write_raw_sequence(dir.path(), 0, &frames, 50.0);
    let seq = common::raw_sequence(dir.path(), 0, 4);

    let eager = build_master_dark(&seq, MemoryPolicy::UNBOUNDED).unwrap();
    let bounded = build_master_dark(&seq, MemoryPolicy::bounded(1)).unwrap();
    common::assert_frames_close(&eager.data, &bounded.data, 1e-6);
}
