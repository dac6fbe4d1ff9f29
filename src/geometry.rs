use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::BlockArray;

/// Traffic direction across a reference line, in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Toward smaller row indices.
    Up,
    /// Toward larger row indices.
    Down,
}

/// How a vehicle has to relate to the capture line to be counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureType {
    /// The whole bounding box is past the line.
    Cross,
    /// The leading edge has reached the line.
    Touch,
}

/// Horizontal reference line in pixel coordinates, spanning
/// `[x_left, x_right)` at row `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub y: usize,
    pub x_left: usize,
    pub x_right: usize,
    pub direction: Direction,
}

impl Line {
    pub(crate) fn validate(&self, frame_height: usize, frame_width: usize, what: &str) -> Result<()> {
        if self.x_left >= self.x_right || self.x_right > frame_width || self.y >= frame_height {
            return Err(Error::InvalidConfig(format!(
                "{} line y={} x=[{}, {}) does not fit a {}x{} frame",
                what, self.y, self.x_left, self.x_right, frame_height, frame_width
            )));
        }
        Ok(())
    }
}

/// Entry sensor: the single grid row where new object ids are minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slit {
    pub block_y: usize,
    pub block_x_left: usize,
    pub block_x_right: usize,
    pub direction: Direction,
}

impl Slit {
    pub fn from_line(line: &Line, grid: &BlockArray) -> Result<Self> {
        line.validate(grid.frame_height(), grid.frame_width(), "slit")?;

        let block_y = line.y / grid.block_height();
        let block_x_left = line.x_left / grid.block_width();
        let block_x_right = line.x_right / grid.block_width();
        if block_x_left >= block_x_right {
            return Err(Error::InvalidConfig(format!(
                "slit span [{}, {}) is narrower than one block",
                line.x_left, line.x_right
            )));
        }

        Ok(Self {
            block_y,
            block_x_left,
            block_x_right,
            direction: line.direction,
        })
    }

    #[inline]
    pub fn block_cols(&self) -> std::ops::Range<usize> {
        self.block_x_left..self.block_x_right
    }
}

/// Exit sensor: counting is triggered when a tracked box satisfies the
/// capture condition for the line's direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub line: Line,
    pub kind: CaptureType,
}
