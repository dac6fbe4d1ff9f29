use nalgebra as na;
use ndarray::Array2;
use std::ops::Range;

use crate::error::{Error, Result};
use crate::imgproc::LabelMap;
use crate::Id;

/// One tile of the frame. Pixel bounds are fixed at construction; only the
/// object id is rewritten as frames are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start_y: usize,
    pub start_x: usize,
    pub end_y: usize,
    pub end_x: usize,
    pub object_id: Id,
}

impl Block {
    #[inline]
    pub fn rows(&self) -> Range<usize> {
        self.start_y..self.end_y
    }

    #[inline]
    pub fn cols(&self) -> Range<usize> {
        self.start_x..self.end_x
    }
}

/// Fixed rectangular tiling of the frame. Blocks are stored row-major and
/// own the per-block object ids; all coordinate queries are bounds-checked.
#[derive(Debug, Clone)]
pub struct BlockArray {
    blocks: Vec<Block>,
    height: usize,
    width: usize,
    block_height: usize,
    block_width: usize,
}

impl BlockArray {
    /// `height`/`width` are in block units, `block_height`/`block_width` in pixels.
    pub fn new(height: usize, width: usize, block_height: usize, block_width: usize) -> Result<Self> {
        if height == 0 || width == 0 || block_height == 0 || block_width == 0 {
            return Err(Error::InvalidConfig(format!(
                "degenerate grid {}x{} of {}x{} px blocks",
                height, width, block_height, block_width
            )));
        }

        let mut blocks = Vec::with_capacity(height * width);
        for row in 0..height {
            for col in 0..width {
                blocks.push(Block {
                    start_y: row * block_height,
                    start_x: col * block_width,
                    end_y: (row + 1) * block_height,
                    end_x: (col + 1) * block_width,
                    object_id: 0,
                });
            }
        }

        Ok(Self {
            blocks,
            height,
            width,
            block_height,
            block_width,
        })
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn block_height(&self) -> usize {
        self.block_height
    }

    #[inline]
    pub fn block_width(&self) -> usize {
        self.block_width
    }

    /// Covered frame height in pixels.
    #[inline]
    pub fn frame_height(&self) -> usize {
        self.height * self.block_height
    }

    /// Covered frame width in pixels.
    #[inline]
    pub fn frame_width(&self) -> usize {
        self.width * self.block_width
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    #[inline]
    pub fn valid_coords(&self, row: isize, col: isize) -> bool {
        row >= 0 && col >= 0 && (row as usize) < self.height && (col as usize) < self.width
    }

    pub fn at(&self, row: usize, col: usize) -> Result<&Block> {
        if row >= self.height || col >= self.width {
            return Err(Error::OutOfRange {
                row: row as isize,
                col: col as isize,
            });
        }
        Ok(&self.blocks[row * self.width + col])
    }

    pub fn at_mut(&mut self, row: usize, col: usize) -> Result<&mut Block> {
        if row >= self.height || col >= self.width {
            return Err(Error::OutOfRange {
                row: row as isize,
                col: col as isize,
            });
        }
        let index = row * self.width + col;
        Ok(&mut self.blocks[index])
    }

    pub fn at_index(&self, index: usize) -> Result<&Block> {
        if index >= self.blocks.len() {
            return Err(Error::OutOfRange {
                row: (index / self.width) as isize,
                col: (index % self.width) as isize,
            });
        }
        Ok(&self.blocks[index])
    }

    pub fn at_index_mut(&mut self, index: usize) -> Result<&mut Block> {
        if index >= self.blocks.len() {
            return Err(Error::OutOfRange {
                row: (index / self.width) as isize,
                col: (index % self.width) as isize,
            });
        }
        Ok(&mut self.blocks[index])
    }

    /// Block covering the given pixel, `x` column and `y` row.
    pub fn at_pixel(&self, point: na::Point2<i32>) -> Result<&Block> {
        let (row, col) = self.pixel_to_block(point)?;
        self.at(row, col)
    }

    pub fn at_pixel_mut(&mut self, point: na::Point2<i32>) -> Result<&mut Block> {
        let (row, col) = self.pixel_to_block(point)?;
        self.at_mut(row, col)
    }

    fn pixel_to_block(&self, point: na::Point2<i32>) -> Result<(usize, usize)> {
        let row = point.y.div_euclid(self.block_height as i32) as isize;
        let col = point.x.div_euclid(self.block_width as i32) as isize;
        if !self.valid_coords(row, col) {
            return Err(Error::OutOfRange { row, col });
        }
        Ok((row as usize, col as usize))
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'_ Block> {
        self.blocks.iter()
    }

    /// Overwrites every block id from a `(height, width)` label matrix.
    pub fn set_object_ids(&mut self, ids: &LabelMap) -> Result<()> {
        if ids.dim() != (self.height, self.width) {
            return Err(Error::ShapeMismatch(format!(
                "label matrix is {:?}, grid is {:?}",
                ids.dim(),
                (self.height, self.width)
            )));
        }

        for (block, &id) in self.blocks.iter_mut().zip(ids.iter()) {
            block.object_id = id;
        }
        Ok(())
    }

    /// Per-block id matrix.
    pub fn object_map(&self) -> LabelMap {
        Array2::from_shape_fn((self.height, self.width), |(r, c)| {
            self.blocks[r * self.width + c].object_id
        })
    }

    /// Block ids rendered at pixel resolution.
    pub fn pixel_object_map(&self) -> LabelMap {
        let mut map = LabelMap::zeros((self.frame_height(), self.frame_width()));
        for block in &self.blocks {
            map.slice_mut(ndarray::s![block.rows(), block.cols()])
                .fill(block.object_id);
        }
        map
    }
}
