use std::collections::{BTreeMap, BTreeSet};

use serde_derive::{Deserialize, Serialize};

use crate::geometry::{Capture, CaptureType, Direction, Line};
use crate::grid::BlockArray;
use crate::Id;

/// Axis-aligned pixel rectangle, top-left anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    #[inline]
    pub fn right(&self) -> usize {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> usize {
        self.y + self.height
    }
}

/// Pixel bounding box of every labeled region on the grid.
pub fn bounding_boxes(grid: &BlockArray) -> BTreeMap<Id, Rect> {
    let mut extents: BTreeMap<Id, (usize, usize, usize, usize)> = BTreeMap::new();
    for block in grid.iter() {
        if block.object_id == 0 {
            continue;
        }
        let entry = extents.entry(block.object_id).or_insert((
            block.start_y,
            block.start_x,
            block.end_y,
            block.end_x,
        ));
        entry.0 = entry.0.min(block.start_y);
        entry.1 = entry.1.min(block.start_x);
        entry.2 = entry.2.max(block.end_y);
        entry.3 = entry.3.max(block.end_x);
    }

    extents
        .into_iter()
        .map(|(id, (top, left, bottom, right))| {
            (
                id,
                Rect {
                    x: left,
                    y: top,
                    width: right - left,
                    height: bottom - top,
                },
            )
        })
        .collect()
}

fn overlaps_span(rect: &Rect, line: &Line) -> bool {
    rect.x < line.x_right && rect.right() > line.x_left
}

fn satisfies_capture(rect: &Rect, capture: &Capture) -> bool {
    let y = capture.line.y;
    match (capture.line.direction, capture.kind) {
        (Direction::Up, CaptureType::Cross) => rect.bottom() <= y,
        (Direction::Up, CaptureType::Touch) => rect.y <= y,
        (Direction::Down, CaptureType::Cross) => rect.y >= y,
        (Direction::Down, CaptureType::Touch) => rect.bottom() >= y,
    }
}

/// Ids on the approach side: overlapping the capture span but not yet past
/// the line.
pub fn active_vehicle_ids(boxes: &BTreeMap<Id, Rect>, capture: &Capture) -> BTreeSet<Id> {
    boxes
        .iter()
        .filter(|&(_, rect)| overlaps_span(rect, &capture.line) && !satisfies_capture(rect, capture))
        .map(|(&id, _)| id)
        .collect()
}

/// Ids counted this frame: previously active, now past the line.
pub fn registered_vehicle_ids(
    active: &BTreeSet<Id>,
    boxes: &BTreeMap<Id, Rect>,
    capture: &Capture,
) -> BTreeSet<Id> {
    boxes
        .iter()
        .filter(|&(id, rect)| {
            active.contains(id)
                && overlaps_span(rect, &capture.line)
                && satisfies_capture(rect, capture)
        })
        .map(|(&id, _)| id)
        .collect()
}
