use std::collections::BTreeSet;

use nalgebra as na;
use ndarray::{s, Array2, Zip};

use crate::error::{Error, Result};
use crate::geometry::{Direction, Slit};
use crate::grid::{Block, BlockArray};
use crate::imgproc::{region_fraction, LabelMap, Mask, RgbFrame};
use crate::solver::{masked_grid_edges, LabelSolver};
use crate::Id;

/// Per-block set of competing object ids, ordered ascending so the naive
/// path deterministically takes the lowest id.
pub type CandidateMap = Array2<BTreeSet<Id>>;

pub fn new_candidate_map(height: usize, width: usize) -> CandidateMap {
    CandidateMap::from_elem((height, width), BTreeSet::new())
}

pub fn is_foreground_block(mask: &Mask, block: &Block, threshold: f32) -> bool {
    region_fraction(mask, block.rows(), block.cols()) > threshold
}

/// Block-resolution foreground mask: true where the block's foreground
/// pixel fraction exceeds `threshold`.
pub fn block_foreground(grid: &BlockArray, mask: &Mask, threshold: f32) -> Mask {
    let mut out = Mask::from_elem((grid.height(), grid.width()), false);
    for (cell, block) in out.iter_mut().zip(grid.iter()) {
        *cell = is_foreground_block(mask, block, threshold);
    }
    out
}

/// Propagates each group's id along its rounded motion vector. The shifted
/// destination must land on a foreground block inside the grid; the id then
/// spreads to every foreground block within `radius` of it. Group `i` moves
/// by `vectors[i]` and carries id `i + 1`.
pub fn update_object_ids(
    grid: &BlockArray,
    candidates: &mut CandidateMap,
    groups: &[Vec<na::Point2<i32>>],
    vectors: &[na::Vector2<i32>],
    foreground: &Mask,
    radius: usize,
) -> Result<()> {
    if groups.len() != vectors.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} groups against {} motion vectors",
            groups.len(),
            vectors.len()
        )));
    }
    if candidates.dim() != (grid.height(), grid.width()) || foreground.dim() != candidates.dim() {
        return Err(Error::ShapeMismatch(format!(
            "candidate map {:?} / foreground {:?} do not cover the {}x{} grid",
            candidates.dim(),
            foreground.dim(),
            grid.height(),
            grid.width()
        )));
    }

    let r = radius as isize;
    for (group, vector) in groups.iter().zip(vectors) {
        for &coords in group {
            let id = grid.at(coords.y as usize, coords.x as usize)?.object_id;
            if id == 0 {
                return Err(Error::InternalConsistency(format!(
                    "zero id at block ({}, {}) inside a tracked group",
                    coords.y, coords.x
                )));
            }
            let dest_row = coords.y as isize + vector.y as isize;
            let dest_col = coords.x as isize + vector.x as isize;
            if !grid.valid_coords(dest_row, dest_col)
                || !foreground[[dest_row as usize, dest_col as usize]]
            {
                continue;
            }
            for dy in -r..=r {
                for dx in -r..=r {
                    let (row, col) = (dest_row + dy, dest_col + dx);
                    if grid.valid_coords(row, col) && foreground[[row as usize, col as usize]] {
                        candidates[[row as usize, col as usize]].insert(id);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Clears candidates on the approach side of the slit, so nothing
/// propagates backwards past the entry point.
pub fn reset_map_before_slit(candidates: &mut CandidateMap, slit: &Slit) {
    let (height, _) = candidates.dim();
    let rows = match slit.direction {
        Direction::Down => 0..slit.block_y,
        Direction::Up => (slit.block_y + 1).min(height)..height,
    };
    for row in rows {
        for set in candidates.row_mut(row) {
            set.clear();
        }
    }
}

/// Collapses each candidate set to its lowest id, 0 where empty.
pub fn label_map_naive(candidates: &CandidateMap) -> LabelMap {
    LabelMap::from_shape_fn(candidates.dim(), |(row, col)| {
        candidates[[row, col]].iter().next().copied().unwrap_or(0)
    })
}

/// Unscaled data-cost table, one row per block site, one column per label
/// (column index = id, column 0 = background). Defaults to `inf_val`;
/// background costs 0 except at blocks holding candidates, where it is
/// forbidden. A candidate id costs the mean absolute color difference
/// against the previous frame shifted by the id's unrounded vector, plus
/// the fraction of shifted pixels whose previous label disagreed. A shifted
/// region leaving the frame costs 0 for that pair.
pub fn unary_penalties(
    grid: &BlockArray,
    candidates: &CandidateMap,
    frame: &RgbFrame,
    prev_frame: &RgbFrame,
    vectors: &[na::Vector2<f32>],
    prev_pixel_labels: &LabelMap,
    inf_val: f64,
) -> Result<Array2<f64>> {
    let (height, width) = (grid.height(), grid.width());
    if candidates.dim() != (height, width) {
        return Err(Error::ShapeMismatch(format!(
            "candidate map {:?} does not cover the {}x{} grid",
            candidates.dim(),
            height,
            width
        )));
    }
    let (frame_h, frame_w) = (grid.frame_height(), grid.frame_width());
    if frame.dim() != (frame_h, frame_w, 3) || prev_frame.dim() != (frame_h, frame_w, 3) {
        return Err(Error::ShapeMismatch(format!(
            "frames {:?}/{:?} do not match the {}x{} grid area",
            frame.dim(),
            prev_frame.dim(),
            frame_h,
            frame_w
        )));
    }
    if prev_pixel_labels.dim() != (frame_h, frame_w) {
        return Err(Error::ShapeMismatch(format!(
            "pixel label map {:?} does not match the {}x{} frame",
            prev_pixel_labels.dim(),
            frame_h,
            frame_w
        )));
    }

    let max_id = candidates
        .iter()
        .filter_map(|set| set.iter().next_back().copied())
        .max()
        .unwrap_or(0);
    let labels = (max_id + 1) as usize;
    let (bh, bw) = (grid.block_height(), grid.block_width());

    let mut table = Array2::from_elem((height * width, labels), inf_val);
    table.column_mut(0).fill(0.0);

    for row in 0..height {
        for col in 0..width {
            let set = &candidates[[row, col]];
            if set.is_empty() {
                continue;
            }
            let site = grid.index(row, col);
            table[[site, 0]] = inf_val;
            let block = grid.at(row, col)?;
            for &id in set {
                let vector = vectors.get((id - 1) as usize).ok_or_else(|| {
                    Error::InternalConsistency(format!("no motion vector for id {}", id))
                })?;
                // same integer narrowing as the vector search: toward zero
                let pr0 = (block.start_y as f32 + vector.y) as isize;
                let pc0 = (block.start_x as f32 + vector.x) as isize;
                if pr0 < 0
                    || pc0 < 0
                    || pr0 + bh as isize > frame_h as isize
                    || pc0 + bw as isize > frame_w as isize
                {
                    table[[site, id as usize]] = 0.0;
                    continue;
                }
                let (pr0, pc0) = (pr0 as usize, pc0 as usize);

                let current = frame.slice(s![block.rows(), block.cols(), ..]);
                let shifted = prev_frame.slice(s![pr0..pr0 + bh, pc0..pc0 + bw, ..]);
                let mut diff = 0.0f64;
                Zip::from(&current).and(&shifted).for_each(|&a, &b| {
                    diff += (a - b).abs() as f64;
                });
                let color = diff / (bh * bw * 3) as f64;

                let labels_there = prev_pixel_labels.slice(s![pr0..pr0 + bh, pc0..pc0 + bw]);
                let mismatch = labels_there.iter().filter(|&&lab| lab != id).count();
                let disagreement = mismatch as f64 / (bh * bw) as f64;

                table[[site, id as usize]] = color + disagreement;
            }
        }
    }
    Ok(table)
}

fn smoothness_table(labels: usize, penalty: i32) -> Array2<i32> {
    Array2::from_shape_fn(
        (labels, labels),
        |(a, b)| if a == b { 0 } else { penalty },
    )
}

/// Resolves the candidate map to one id per block. When no block holds two
/// or more competing ids the naive collapse is exact; otherwise the label
/// field is solved as a pairwise MRF over foreground blocks.
pub fn label_map<S: LabelSolver + ?Sized>(
    solver: &S,
    grid: &BlockArray,
    candidates: &CandidateMap,
    frame: &RgbFrame,
    prev_frame: &RgbFrame,
    vectors: &[na::Vector2<f32>],
    prev_pixel_labels: &LabelMap,
    foreground: &Mask,
    smoothness_penalty: i32,
) -> Result<LabelMap> {
    static INF_VAL: f64 = 1e3;
    static MULT: f64 = 1e3;

    if candidates.iter().map(|set| set.len()).max().unwrap_or(0) < 2 {
        return Ok(label_map_naive(candidates));
    }

    let penalties = unary_penalties(
        grid,
        candidates,
        frame,
        prev_frame,
        vectors,
        prev_pixel_labels,
        INF_VAL,
    )?;
    let data = penalties.mapv(|v| (v * MULT) as i32);
    let labels = data.ncols();
    let sites = data.nrows();
    let smooth = smoothness_table(labels, smoothness_penalty);
    let edges = masked_grid_edges(foreground);

    let assignment = solver.solve(sites, labels, &edges, &data, &smooth)?;
    if assignment.len() != sites {
        return Err(Error::ShapeMismatch(format!(
            "solver returned {} labels for {} sites",
            assignment.len(),
            sites
        )));
    }

    let width = grid.width();
    Ok(LabelMap::from_shape_fn(
        (grid.height(), width),
        |(row, col)| assignment[row * width + col] as Id,
    ))
}
