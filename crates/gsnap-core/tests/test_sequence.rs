#[allow(dead_code)]
mod common;

use std::fs;

use gsnap_core::error::GsnapError;
use gsnap_core::io::fits::{self, Keyword};
use gsnap_core::io::sequence::FrameSequence;
use tempfile::TempDir;

#[test]
fn test_iterates_in_order_and_restarts() {
    let dir = TempDir::new().unwrap();
    let frames: Vec<_> = (0..4).map(|i| common::pattern_frame(3, 3, i)).collect();
    common::write_raw_sequence(dir.path(), 20, &frames, 50.0);

    let seq = common::raw_sequence(dir.path(), 20, 23);
    assert_eq!(seq.frame_count(), 4);
    assert_eq!(seq.shape().unwrap(), (3, 3));

    for pass in 0..2 {
        let read: Vec<_> = seq.frames().collect::<Result<_, _>>().unwrap();
        assert_eq!(read.len(), 4, "pass {}", pass);
        for (i, frame) in read.iter().enumerate() {
            assert_eq!(frame.metadata.file_number, 20 + i);
            assert_eq!(frame.metadata.position, i);
            assert_eq!(frame.data, frames[i]);
        }
    }
}

#[test]
fn test_missing_file_reports_number() {
    let dir = TempDir::new().unwrap();
    common::write_raw_frame(dir.path(), 10, &common::const_frame(2, 2, 1.0), 50.0);
    common::write_raw_frame(dir.path(), 12, &common::const_frame(2, 2, 1.0), 50.0);

    let seq = common::raw_sequence(dir.path(), 10, 12);
    let results: Vec<_> = seq.frames().collect();
    assert!(results[0].is_ok());
    match &results[1] {
        Err(GsnapError::MissingFile { number, .. }) => assert_eq!(*number, 11),
        other => panic!("expected MissingFile, got {:?}", other),
    }
}

#[test]
fn test_zero_padded_numbering_detected() {
    let dir = TempDir::new().unwrap();
    for number in 8..=12 {
        let path = dir.path().join(format!("gsnapImg{:03}.fits", number));
        fits::write_image(
            &path,
            &common::const_frame(2, 2, number as f32),
            &[Keyword::real("FRMRATE", 50.0, "")],
        )
        .unwrap();
    }

    let seq = common::raw_sequence(dir.path(), 8, 12);
    let read: Vec<_> = seq.frames().collect::<Result<_, _>>().unwrap();
    assert_eq!(read.len(), 5);
    assert_eq!(read[0].data[[0, 0]], 8.0);
    assert_eq!(read[4].data[[0, 0]], 12.0);
}

#[test]
fn test_malformed_file_reports_number() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("gsnapImg7.fits"), b"garbage").unwrap();

    let seq = common::raw_sequence(dir.path(), 7, 7);
    match seq.read_frame(0) {
        Err(GsnapError::MalformedFrame { number, .. }) => assert_eq!(number, 7),
        other => panic!("expected MalformedFrame, got {:?}", other),
    }
}

#[test]
fn test_bad_template_rejected() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        FrameSequence::new(dir.path(), "gsnapImg.fits", 0, 1, 0),
        Err(GsnapError::Config(_))
    ));
    assert!(matches!(
        FrameSequence::new(dir.path(), "g*snap*.fits", 0, 1, 0),
        Err(GsnapError::Config(_))
    ));
}

#[test]
fn test_frame_rate_from_header() {
    let dir = TempDir::new().unwrap();
    common::write_raw_frame(dir.path(), 3, &common::const_frame(2, 2, 0.0), 391.0);

    let seq = common::raw_sequence(dir.path(), 3, 3);
    assert_eq!(seq.frame_rate().unwrap(), Some(391.0));
}

#[test]
fn test_read_band_matches_frame_rows() {
    let dir = TempDir::new().unwrap();
    let frame = common::pattern_frame(6, 4, 2);
    common::write_raw_frame(dir.path(), 1, &frame, 50.0);

    let seq = common::raw_sequence(dir.path(), 1, 1);
    let band = seq.read_band(0, 2, 5).unwrap();
    assert_eq!(band.dim(), (3, 4));
    for r in 0..3 {
        for c in 0..4 {
            assert_eq!(band[[r, c]], frame[[r + 2, c]]);
        }
    }
}

#[test]
fn test_inverted_range_is_empty() {
    let dir = TempDir::new().unwrap();
    let seq = common::raw_sequence(dir.path(), 5, 4);
    assert_eq!(seq.frame_count(), 0);
    assert_eq!(seq.frames().count(), 0);
    assert!(matches!(seq.shape(), Err(GsnapError::EmptySequence)));
}
