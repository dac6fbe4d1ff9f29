use nalgebra as na;
use ndarray::{s, Array2, Zip};
use tracing::warn;

use crate::error::Result;
use crate::grid::BlockArray;
use crate::imgproc::RgbFrame;
use crate::Id;

/// Groups block coordinates by object id; entry `i` holds the blocks of
/// object `i + 1`. Ids past `max_id` are ignored.
pub fn find_group_coordinates(grid: &BlockArray, max_id: Id) -> Vec<Vec<na::Point2<i32>>> {
    let mut groups = vec![Vec::new(); max_id.max(0) as usize];
    let width = grid.width();
    for (index, block) in grid.iter().enumerate() {
        let id = block.object_id;
        if id > 0 && id <= max_id {
            let row = index / width;
            let col = index % width;
            groups[(id - 1) as usize].push(na::Point2::new(col as i32, row as i32));
        }
    }
    groups
}

/// Sum of squared differences between the block at `coords` in `frame` and
/// every candidate position within `radius` blocks in `prev_frame`. The
/// surface is indexed by pixel offset, `(radius * block_h, radius * block_w)`
/// being the zero offset. A block whose search window would leave the grid
/// returns the all-zero surface, a neutral term in any group sum.
pub fn motion_vector_similarity_map(
    grid: &BlockArray,
    frame: &RgbFrame,
    prev_frame: &RgbFrame,
    coords: na::Point2<i32>,
    radius: usize,
) -> Result<Array2<f64>> {
    let bh = grid.block_height();
    let bw = grid.block_width();

    let half_h = (radius * bh) as isize;
    let half_w = (radius * bw) as isize;
    let mut surface = Array2::zeros((2 * radius * bh + 1, 2 * radius * bw + 1));

    let reach = radius as isize;
    if !grid.valid_coords(coords.y as isize - reach, coords.x as isize - reach)
        || !grid.valid_coords(coords.y as isize + reach, coords.x as isize + reach)
    {
        if !grid.valid_coords(coords.y as isize, coords.x as isize) {
            warn!(row = coords.y, col = coords.x, "similarity block outside grid");
        }
        return Ok(surface);
    }
    let block = grid.at(coords.y as usize, coords.x as usize)?;
    let template = frame.slice(s![block.rows(), block.cols(), ..]);

    for oy in -half_h..=half_h {
        for ox in -half_w..=half_w {
            let top = (block.start_y as isize + oy) as usize;
            let left = (block.start_x as isize + ox) as usize;
            let candidate = prev_frame.slice(s![top..top + bh, left..left + bw, ..]);
            let mut ssd = 0.0f64;
            Zip::from(&template).and(&candidate).for_each(|&a, &b| {
                let d = (a - b) as f64;
                ssd += d * d;
            });
            surface[[(oy + half_h) as usize, (ox + half_w) as usize]] = ssd;
        }
    }

    Ok(surface)
}

/// Best pixel displacement for a whole group: the per-block similarity
/// surfaces are summed and the offset with the lowest total cost wins.
/// Ties prefer the smallest displacement, then scan order. A group made
/// entirely of border blocks resolves to the zero vector.
pub fn find_motion_vector(
    grid: &BlockArray,
    frame: &RgbFrame,
    prev_frame: &RgbFrame,
    group: &[na::Point2<i32>],
    radius: usize,
) -> Result<na::Vector2<f32>> {
    let bh = grid.block_height();
    let bw = grid.block_width();
    let mut summed = Array2::<f64>::zeros((2 * radius * bh + 1, 2 * radius * bw + 1));
    for &coords in group {
        let map = motion_vector_similarity_map(grid, frame, prev_frame, coords, radius)?;
        summed += &map;
    }

    let half_h = (radius * bh) as i32;
    let half_w = (radius * bw) as i32;
    let mut best = (f64::INFINITY, i64::MAX, i32::MAX, i32::MAX);
    let mut vector = na::Vector2::new(0.0f32, 0.0);
    for ((row, col), &cost) in summed.indexed_iter() {
        let oy = row as i32 - half_h;
        let ox = col as i32 - half_w;
        let key = (cost, (oy as i64).pow(2) + (ox as i64).pow(2), oy, ox);
        if key < best {
            best = key;
            vector = na::Vector2::new(ox as f32, oy as f32);
        }
    }
    Ok(vector)
}

/// Converts a pixel displacement to whole blocks, rounding half away
/// from zero.
pub fn round_motion_vector(vector: na::Vector2<f32>, grid: &BlockArray) -> na::Vector2<i32> {
    na::Vector2::new(
        (vector.x / grid.block_width() as f32).round() as i32,
        (vector.y / grid.block_height() as f32).round() as i32,
    )
}
