use gsnap_core::error::GsnapError;
use gsnap_core::phase::{ChopNodTiming, PhaseLabel};

#[test]
fn test_on_off_counts_match_chop_duty_cycle() {
    // 10 Hz chop, 1 Hz nod, 100 frames/s, no settle window: one nod
    // period is 100 frames and the chop duty cycle splits it evenly.
    let timing = ChopNodTiming::new(10.0, 1.0, 100.0, 0.0).unwrap();

    let mut on = 0usize;
    let mut off = 0usize;
    let mut transition = 0usize;
    for i in 0..100 {
        match timing.label(i) {
            PhaseLabel::OnSource => on += 1,
            PhaseLabel::OffSource => off += 1,
            PhaseLabel::Transition => transition += 1,
        }
    }

    assert_eq!(on + off + transition, 100);
    assert_eq!(transition, 0);
    // Expected 50/50 within one frame's tolerance.
    assert!(on.abs_diff(50) <= 1, "on = {}", on);
    assert!(off.abs_diff(50) <= 1, "off = {}", off);
}

#[test]
fn test_nod_flip_swaps_on_and_off() {
    // Within the first nod half-cycle the first chop half is on-source;
    // after the nod flips, the same chop half becomes off-source.
    let timing = ChopNodTiming::new(10.0, 1.0, 100.0, 0.0).unwrap();
    assert_eq!(timing.label(0), PhaseLabel::OnSource);
    assert_eq!(timing.label(50), PhaseLabel::OffSource);
    assert_eq!(timing.label(55), PhaseLabel::OnSource);
}

#[test]
fn test_settle_window_marks_boundary_frames() {
    // With a 20% settle window the frames nearest each chop or nod
    // boundary are transitions; mid-phase frames keep their labels.
    let timing = ChopNodTiming::new(10.0, 1.0, 100.0, 0.2).unwrap();

    // Frame 0 sits at the nod boundary, frame 10 at a chop boundary.
    assert_eq!(timing.label(0), PhaseLabel::Transition);
    assert_eq!(timing.label(10), PhaseLabel::Transition);
    // Mid-phase frames away from both boundaries keep their labels.
    assert_eq!(timing.label(12), PhaseLabel::OnSource);
    assert_eq!(timing.label(17), PhaseLabel::OffSource);

    let mut counts = [0usize; 3];
    for i in 0..100 {
        match timing.label(i) {
            PhaseLabel::OnSource => counts[0] += 1,
            PhaseLabel::OffSource => counts[1] += 1,
            PhaseLabel::Transition => counts[2] += 1,
        }
    }
    assert_eq!(counts.iter().sum::<usize>(), 100);
    assert!(counts[2] > 0);
    assert_eq!(counts[0], counts[1]);
}

#[test]
fn test_slow_chop_rejected() {
    match ChopNodTiming::new(5.0, 10.0, 100.0, 0.0) {
        Err(GsnapError::Config(msg)) => {
            assert!(msg.contains("chopfreq"), "message: {}", msg);
            assert!(msg.contains('5'), "message: {}", msg);
        }
        other => panic!("expected Config error, got {:?}", other),
    }
}

#[test]
fn test_labels_do_not_depend_on_sequence_length() {
    let timing = ChopNodTiming::new(8.0, 0.5, 64.0, 0.1).unwrap();
    let first: Vec<_> = (0..32).map(|i| timing.label(i)).collect();
    let again: Vec<_> = (0..32).map(|i| timing.label(i)).collect();
    assert_eq!(first, again);
}
