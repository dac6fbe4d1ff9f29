//! End-to-end tracking scenarios on synthetic frames.
//!
//! A clean gray road, white vehicle regions, no noise: every property
//! asserted here is a direct consequence of the segmentation pipeline,
//! not of tuning.

use stmrf::{
    Capture, CaptureType, Direction, Line, RgbFrame, Tracker, TrackerParams,
};

const FRAME: usize = 80;
const ROAD: f32 = 0.6;

fn params() -> TrackerParams {
    TrackerParams {
        block_width: 8,
        block_height: 8,
        reverse_mrf: false,
        interlayer_feedback: false,
        slit: Line {
            y: 0,
            x_left: 0,
            x_right: FRAME,
            direction: Direction::Down,
        },
        capture: Capture {
            line: Line {
                y: 72,
                x_left: 0,
                x_right: FRAME,
                direction: Direction::Down,
            },
            kind: CaptureType::Touch,
        },
        ..TrackerParams::default()
    }
}

fn road() -> RgbFrame {
    RgbFrame::from_elem((FRAME, FRAME, 3), ROAD)
}

/// Gray road with one white rectangle at `rows x cols`.
fn frame_with_square(
    top: usize,
    left: usize,
    height: usize,
    width: usize,
) -> RgbFrame {
    let mut frame = road();
    frame
        .slice_mut(ndarray::s![top..top + height, left..left + width, ..])
        .fill(1.0);
    frame
}

#[test]
fn single_vehicle_keeps_one_identity_to_the_capture_line() {
    let mut tracker = Tracker::new(params(), road()).unwrap();

    // 16x24 px vehicle descending 1 px per frame from the slit
    let frame_at = |t: usize| frame_with_square(t, 32, 24, 16);

    let mut seen_ids = std::collections::BTreeSet::new();
    let mut registrations = Vec::new();
    let mut prev_box: Option<stmrf::Rect> = None;
    let mut first_box: Option<stmrf::Rect> = None;

    for t in 1..=50 {
        let registered = tracker
            .register_vehicle_step(&frame_at(t), &frame_at(t - 1))
            .unwrap();
        for &id in &registered {
            registrations.push((t, id));
        }

        let boxes = stmrf::registration::bounding_boxes(tracker.grid());
        assert!(boxes.len() <= 1, "split region at t={}", t);
        if let Some((&id, rect)) = boxes.iter().next() {
            seen_ids.insert(id);
            if first_box.is_none() {
                first_box = Some(*rect);
            }
            if let Some(prev) = prev_box {
                assert!(rect.y >= prev.y, "box moved backwards at t={}", t);
                assert!(rect.bottom() >= prev.bottom(), "trailing edge receded at t={}", t);
            }
            prev_box = Some(*rect);
        }
    }

    // one identity from slit to capture line
    assert_eq!(seen_ids.len(), 1);
    assert!(seen_ids.contains(&1));

    // counted exactly once, on the frame the leading edge touches row 72
    assert_eq!(registrations.len(), 1);
    let (t_registered, id) = registrations[0];
    assert_eq!(id, 1);
    assert_eq!(t_registered, 45);

    // net displacement follows the injected translation
    let first = first_box.unwrap();
    let last = prev_box.unwrap();
    assert!(last.bottom() > first.bottom());
}

#[test]
fn simultaneous_disjoint_entries_get_distinct_stable_ids() {
    let mut tracker = Tracker::new(params(), road()).unwrap();

    // two 16x16 px vehicles, five blocks apart, entering together
    let frame_at = |t: usize| {
        let mut frame = frame_with_square(t, 8, 16, 16);
        frame
            .slice_mut(ndarray::s![t..t + 16, 56..72, ..])
            .fill(1.0);
        frame
    };

    tracker
        .register_vehicle_step(&frame_at(1), &frame_at(0))
        .unwrap();
    let boxes = stmrf::registration::bounding_boxes(tracker.grid());
    let ids: Vec<_> = boxes.keys().copied().collect();
    assert_eq!(ids, vec![1, 2], "both entries must be labeled on frame one");
    assert_eq!(boxes[&1].x, 8);
    assert_eq!(boxes[&2].x, 56);

    // identities stay put on the next frame
    tracker
        .register_vehicle_step(&frame_at(2), &frame_at(1))
        .unwrap();
    let boxes = stmrf::registration::bounding_boxes(tracker.grid());
    let ids: Vec<_> = boxes.keys().copied().collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(boxes[&1].right() <= 32);
    assert!(boxes[&2].x >= 48);
}

#[test]
fn reverse_refinement_resolves_a_buffered_window() {
    let mut config = params();
    config.reverse_mrf = true;
    config.reverse_history_size = 5;
    let mut tracker = Tracker::new(config, road()).unwrap();

    for t in 0..5 {
        tracker
            .add_frame(frame_with_square(t, 32, 24, 16))
            .unwrap();
    }
    assert_eq!(tracker.history_len(), 5);

    let registered = tracker.reverse_st_mrf_step().unwrap();
    assert!(registered.is_empty(), "nothing near the capture line yet");

    let boxes = stmrf::registration::bounding_boxes(tracker.grid());
    assert_eq!(boxes.len(), 1, "one vehicle in the window");
    assert_eq!(boxes.keys().next(), Some(&1));

    // the forward sweep runs last, so the grid reflects the newest frame,
    // whose square has slipped off the first block row
    let rect = boxes[&1];
    assert_eq!(rect.x, 32);
    assert_eq!(rect.y, 8);
    assert_eq!(rect.bottom(), 24);
}
