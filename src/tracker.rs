use std::collections::BTreeSet;
use std::rc::Rc;

use nalgebra as na;
use ndarray::Zip;
use tracing::{debug, info};

use crate::background::{subtract_background, update_background_weighted};
use crate::circular_queue::CircularQueue;
use crate::config::TrackerParams;
use crate::error::{Error, Result};
use crate::geometry::{Capture, Slit};
use crate::grid::BlockArray;
use crate::illumination::{detect_headlights, is_night, shadow_mask};
use crate::imgproc::{edge_image, rgb_to_gray, Mask, RgbFrame};
use crate::motion::{find_group_coordinates, find_motion_vector, round_motion_vector};
use crate::mrf::{
    block_foreground, label_map, new_candidate_map, reset_map_before_slit, update_object_ids,
};
use crate::registration::{active_vehicle_ids, bounding_boxes, registered_vehicle_ids};
use crate::relabel::{relabel_components, MergePolicy};
use crate::solver::{IcmSolver, LabelSolver};
use crate::Id;

/// Maximal run of block rows inside one column sharing a single object id.
/// `length` counts the run's rows whose edge line disagrees with the
/// previous column, `const_obj_length` all rows of the id run walked so far.
#[derive(Debug, Clone, Copy)]
struct Interval {
    start: usize,
    length: usize,
    const_obj_length: usize,
    object_id: Id,
}

/// Frame-sequential tracking engine. Owns the grid, the running
/// background, the bounded frame history and the id counter; one instance
/// per camera, never shared across frames in flight.
pub struct Tracker<S: LabelSolver = IcmSolver> {
    params: TrackerParams,
    grid: BlockArray,
    slit: Slit,
    capture: Capture,
    background: RgbFrame,
    history: CircularQueue<(Rc<RgbFrame>, Rc<RgbFrame>)>,
    new_block_id: Id,
    frame_no: u64,
    solver: S,
}

impl Tracker {
    pub fn new(params: TrackerParams, background: RgbFrame) -> Result<Self> {
        Self::with_solver(params, background, IcmSolver::default())
    }
}

impl<S: LabelSolver> Tracker<S> {
    pub fn with_solver(params: TrackerParams, background: RgbFrame, solver: S) -> Result<Self> {
        let (height, width, channels) = background.dim();
        if channels != 3 {
            return Err(Error::InvalidConfig(format!(
                "background has {} channels, expected RGB",
                channels
            )));
        }
        if params.block_height == 0
            || params.block_width == 0
            || height % params.block_height != 0
            || width % params.block_width != 0
        {
            return Err(Error::InvalidConfig(format!(
                "{}x{} frame is not tiled exactly by {}x{} px blocks",
                height, width, params.block_height, params.block_width
            )));
        }

        let grid = BlockArray::new(
            height / params.block_height,
            width / params.block_width,
            params.block_height,
            params.block_width,
        )?;
        let slit = Slit::from_line(&params.slit, &grid)?;
        params.capture.line.validate(height, width, "capture")?;
        let capture = params.capture;

        info!(
            height = grid.height(),
            width = grid.width(),
            reverse = params.reverse_mrf,
            "tracker ready"
        );
        let history = CircularQueue::with_capacity(params.history_capacity());
        Ok(Self {
            params,
            grid,
            slit,
            capture,
            background,
            history,
            new_block_id: 1,
            frame_no: 0,
            solver,
        })
    }

    #[inline]
    pub fn grid(&self) -> &BlockArray {
        &self.grid
    }

    #[inline]
    pub fn background(&self) -> &RgbFrame {
        &self.background
    }

    #[inline]
    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    #[inline]
    pub fn slit(&self) -> &Slit {
        &self.slit
    }

    #[inline]
    pub fn capture(&self) -> &Capture {
        &self.capture
    }

    #[inline]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Folds a frame into the running background and buffers it, paired
    /// with a snapshot of the background as of this frame.
    pub fn add_frame(&mut self, frame: RgbFrame) -> Result<()> {
        if frame.dim() != self.background.dim() {
            return Err(Error::ShapeMismatch(format!(
                "frame is {:?}, background is {:?}",
                frame.dim(),
                self.background.dim()
            )));
        }
        update_background_weighted(
            &mut self.background,
            &frame,
            self.params.foreground_threshold,
            self.params.background_update_weight,
        )?;
        self.history
            .push((Rc::new(frame), Rc::new(self.background.clone())));
        Ok(())
    }

    /// Single forward step against the immediately preceding frame.
    /// Returns the ids registered at the capture line.
    pub fn register_vehicle_step(
        &mut self,
        frame: &RgbFrame,
        prev_frame: &RgbFrame,
    ) -> Result<BTreeSet<Id>> {
        let background = self.background.clone();
        self.step(frame, prev_frame, &background)
    }

    /// Bidirectional refinement over the buffered history: every adjacent
    /// pair is re-segmented newest-to-oldest, then oldest-to-newest, each
    /// frame against its own background snapshot. Ids that only stabilize
    /// late in the window propagate back before registration is decided.
    /// Returns the ids registered by the last forward pair.
    pub fn reverse_st_mrf_step(&mut self) -> Result<BTreeSet<Id>> {
        if self.history.is_empty() {
            return Err(Error::EmptyHistory);
        }
        let len = self.history.len();
        let mut registered = BTreeSet::new();
        if len < 2 {
            return Ok(registered);
        }

        for i in (0..len - 1).rev() {
            let (frame, background) = self.history_entry(i)?;
            let (reference, _) = self.history_entry(i + 1)?;
            registered = self.step(&frame, &reference, &background)?;
        }
        for i in 1..len {
            let (frame, background) = self.history_entry(i)?;
            let (reference, _) = self.history_entry(i - 1)?;
            registered = self.step(&frame, &reference, &background)?;
        }
        Ok(registered)
    }

    fn history_entry(&self, index: usize) -> Result<(Rc<RgbFrame>, Rc<RgbFrame>)> {
        let (frame, background) = self.history.get(index).ok_or_else(|| {
            Error::InternalConsistency(format!("history index {} out of range", index))
        })?;
        Ok((Rc::clone(frame), Rc::clone(background)))
    }

    fn step(
        &mut self,
        frame: &RgbFrame,
        prev_frame: &RgbFrame,
        background: &RgbFrame,
    ) -> Result<BTreeSet<Id>> {
        let expected = (self.grid.frame_height(), self.grid.frame_width(), 3);
        if frame.dim() != expected || prev_frame.dim() != expected {
            return Err(Error::ShapeMismatch(format!(
                "frame pair {:?}/{:?} does not match the grid area {:?}",
                frame.dim(),
                prev_frame.dim(),
                expected
            )));
        }

        self.frame_no += 1;
        debug!(frame = self.frame_no, "segmenting frame pair");

        let (stable, _sources) =
            relabel_components(&self.grid.object_map(), MergePolicy::FirstObserved)?;
        self.grid.set_object_ids(&stable)?;

        let prev_boxes = bounding_boxes(&self.grid);
        let active = active_vehicle_ids(&prev_boxes, &self.capture);

        let mut foreground =
            subtract_background(frame, background, self.params.foreground_threshold);
        if is_night(frame) {
            let lights = detect_headlights(frame);
            Zip::from(&mut foreground)
                .and(&lights)
                .for_each(|f, &l| *f = *f && l);
        } else {
            let shadows = shadow_mask(frame, background);
            Zip::from(&mut foreground)
                .and(&shadows)
                .for_each(|f, &s| *f = *f && !s);
        }

        self.segmentation_step(frame, prev_frame, &foreground)?;
        if self.params.interlayer_feedback {
            self.interlayer_feedback(frame)?;
        }

        let boxes = bounding_boxes(&self.grid);
        let registered = registered_vehicle_ids(&active, &boxes, &self.capture);
        for id in &registered {
            info!(id = *id, "vehicle registered");
        }
        Ok(registered)
    }

    /// Motion per id group, candidate propagation, label resolution, id
    /// injection at the slit.
    fn segmentation_step(
        &mut self,
        frame: &RgbFrame,
        prev_frame: &RgbFrame,
        foreground: &Mask,
    ) -> Result<()> {
        let prev_pixel_map = self.grid.pixel_object_map();
        let max_id = self.grid.iter().map(|b| b.object_id).max().unwrap_or(0);
        let groups = find_group_coordinates(&self.grid, max_id);
        let block_fg = block_foreground(
            &self.grid,
            foreground,
            self.params.block_foreground_threshold,
        );

        let mut vectors: Vec<na::Vector2<f32>> = Vec::with_capacity(groups.len());
        for group in &groups {
            vectors.push(find_motion_vector(
                &self.grid,
                frame,
                prev_frame,
                group,
                self.params.search_radius,
            )?);
        }
        let rounded: Vec<na::Vector2<i32>> = vectors
            .iter()
            .map(|&v| round_motion_vector(v, &self.grid))
            .collect();

        let mut candidates = new_candidate_map(self.grid.height(), self.grid.width());
        update_object_ids(
            &self.grid,
            &mut candidates,
            &groups,
            &rounded,
            &block_fg,
            self.params.search_radius,
        )?;
        reset_map_before_slit(&mut candidates, &self.slit);

        let labels = label_map(
            &self.solver,
            &self.grid,
            &candidates,
            frame,
            prev_frame,
            &vectors,
            &prev_pixel_map,
            &block_fg,
            self.params.smoothness_penalty,
        )?;
        self.grid.set_object_ids(&labels)?;

        let max_label = labels.iter().copied().max().unwrap_or(0);
        let first_free = self.new_block_id.max(max_label + 1);
        self.new_block_id = self.update_slit_objects(&block_fg, first_free)?;
        Ok(())
    }

    /// Walks the slit columns in ascending order. A foreground block keeps
    /// its id, inherits one from the 8-neighborhood or from the preceding
    /// slit block, or mints a fresh one; background blocks get 0. Returns
    /// the next free id, never below `first_free`.
    fn update_slit_objects(&mut self, foreground: &Mask, first_free: Id) -> Result<Id> {
        static D_YS: [isize; 8] = [-1, -1, 0, 1, 1, 1, 0, -1];
        static D_XS: [isize; 8] = [0, 1, 1, 1, 0, -1, -1, -1];

        let row = self.slit.block_y;
        let mut next = first_free;
        let mut max_assigned: Id = 0;
        let mut assigned: Vec<Id> = Vec::with_capacity(self.slit.block_cols().len());

        for (i, col) in self.slit.block_cols().enumerate() {
            let id = if !foreground[[row, col]] {
                0
            } else {
                let current = self.grid.at(row, col)?.object_id;
                if current != 0 {
                    current
                } else {
                    let mut inherited = 0;
                    for k in 0..8 {
                        let (nr, nc) = (row as isize + D_YS[k], col as isize + D_XS[k]);
                        if !self.grid.valid_coords(nr, nc) {
                            continue;
                        }
                        let neighbor = self.grid.at(nr as usize, nc as usize)?.object_id;
                        if neighbor != 0 {
                            inherited = neighbor;
                            break;
                        }
                    }
                    if inherited == 0 && i >= 1 {
                        inherited = assigned[i - 1];
                    }
                    if inherited == 0 {
                        inherited = next;
                        next += 1;
                    }
                    inherited
                }
            };
            self.grid.at_mut(row, col)?.object_id = id;
            assigned.push(id);
            max_assigned = max_assigned.max(id);
        }

        Ok(next.max(max_assigned + 1))
    }

    /// Splits over-merged regions along columns where the edge profile
    /// breaks from its left neighbor: the longest same-id run disagreeing
    /// with the previous column beyond the configured fraction is carved
    /// into a fresh id, then carried rightward while the underlying region
    /// stays continuous.
    fn interlayer_feedback(&mut self, frame: &RgbFrame) -> Result<()> {
        let height = self.grid.height();
        let width = self.grid.width();
        if width < 3 {
            return Ok(());
        }

        let gray = rgb_to_gray(frame);
        let edges = edge_image(&gray).mapv(|v| v > self.params.edge_brightness_threshold);

        let mut new_id = self.new_block_id;
        let mut pending = vec![0 as Id; height];
        let mut prev_line = self.column_edge_line(&edges, 0)?;

        for col in 1..width - 1 {
            let cur_line = self.column_edge_line(&edges, col)?;
            let best = self.longest_distant_interval(&cur_line, &prev_line, col)?;
            if best.object_id != 0
                && best.const_obj_length > 0
                && best.length as f32 / best.const_obj_length as f32
                    > self.params.interval_threshold
                && best.length >= self.params.min_edge_hamming_dist
            {
                for row in best.start..(best.start + best.length).min(height) {
                    pending[row] = new_id;
                }
                debug!(column = col, id = new_id, rows = best.length, "carved new id");
                new_id += 1;
            }

            for row in 0..height {
                if pending[row] == 0 {
                    continue;
                }
                let current = self.grid.at(row, col)?.object_id;
                let right = self.grid.at(row, col + 1)?.object_id;
                self.grid.at_mut(row, col)?.object_id = pending[row];
                if current != right {
                    pending[row] = 0;
                }
            }
            prev_line = cur_line;
        }

        self.new_block_id = new_id;
        Ok(())
    }

    /// Per block row of one column: true when the fraction of pixel rows
    /// containing an edge exceeds the edge threshold.
    fn column_edge_line(&self, edges: &Mask, col: usize) -> Result<Vec<bool>> {
        let mut line = Vec::with_capacity(self.grid.height());
        for row in 0..self.grid.height() {
            let block = self.grid.at(row, col)?;
            let mut edge_rows = 0usize;
            for r in block.rows() {
                if block.cols().any(|c| edges[[r, c]]) {
                    edge_rows += 1;
                }
            }
            line.push(
                edge_rows as f32 / self.grid.block_height() as f32 > self.params.edge_threshold,
            );
        }
        Ok(line)
    }

    /// Longest interval of rows in `col` keeping one non-zero id while the
    /// edge lines disagree. An id change or a point of agreement closes
    /// the current interval; rows without an id accrue nothing.
    fn longest_distant_interval(
        &self,
        cur: &[bool],
        prev: &[bool],
        col: usize,
    ) -> Result<Interval> {
        if cur.len() != prev.len() {
            return Err(Error::ShapeMismatch(format!(
                "edge lines of {} and {} rows",
                cur.len(),
                prev.len()
            )));
        }

        let mut best = Interval {
            start: 0,
            length: 0,
            const_obj_length: 0,
            object_id: 0,
        };
        let mut interval = best;
        for (row, (&c, &p)) in cur.iter().zip(prev).enumerate() {
            let id = self.grid.at(row, col)?.object_id;
            let id_changed = id != interval.object_id;
            if id_changed || c == p {
                if interval.length > best.length {
                    best = interval;
                }
                interval = Interval {
                    start: row,
                    length: 0,
                    const_obj_length: if id_changed {
                        0
                    } else {
                        interval.const_obj_length
                    },
                    object_id: id,
                };
            }
            if id != 0 {
                interval.const_obj_length += 1;
                if c != p {
                    interval.length += 1;
                }
            }
        }
        if interval.length > best.length {
            best = interval;
        }
        Ok(best)
    }
}
