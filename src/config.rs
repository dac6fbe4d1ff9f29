use serde_derive::{Deserialize, Serialize};

use crate::geometry::{Capture, CaptureType, Direction, Line};

/// Everything the tracking core consumes. Geometry defaults are
/// placeholders and must be set by the caller; `Tracker::new` validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Block size in pixels.
    pub block_width: usize,
    pub block_height: usize,
    /// Per-channel difference treated as change against the background.
    pub foreground_threshold: f32,
    /// Blend weight of the running background update.
    pub background_update_weight: f32,
    /// Number of leading frames averaged into the initial background.
    pub background_init_length: usize,
    /// Frames buffered for the reverse refinement pass.
    pub reverse_history_size: usize,
    /// Motion search radius in blocks.
    pub search_radius: usize,
    /// Fraction of foreground pixels that makes a block foreground.
    pub block_foreground_threshold: f32,
    pub reverse_mrf: bool,
    pub interlayer_feedback: bool,
    /// Fraction of edge rows that marks a block-row edge line.
    pub edge_threshold: f32,
    /// Gradient magnitude treated as an edge pixel.
    pub edge_brightness_threshold: f32,
    /// Disagreement fraction that carves an interval into a new id.
    pub interval_threshold: f32,
    /// Minimum interval length, in block rows.
    pub min_edge_hamming_dist: usize,
    /// Pairwise label-change penalty of the MRF.
    pub smoothness_penalty: i32,
    pub slit: Line,
    pub capture: Capture,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            block_width: 16,
            block_height: 20,
            foreground_threshold: 0.05,
            background_update_weight: 0.05,
            background_init_length: 300,
            reverse_history_size: 5,
            search_radius: 1,
            block_foreground_threshold: 0.5,
            reverse_mrf: true,
            interlayer_feedback: true,
            edge_threshold: 0.5,
            edge_brightness_threshold: 0.1,
            interval_threshold: 0.5,
            min_edge_hamming_dist: 4,
            smoothness_penalty: 20,
            slit: Line {
                y: 0,
                x_left: 0,
                x_right: 0,
                direction: Direction::Down,
            },
            capture: Capture {
                line: Line {
                    y: 0,
                    x_left: 0,
                    x_right: 0,
                    direction: Direction::Down,
                },
                kind: CaptureType::Cross,
            },
        }
    }
}

impl TrackerParams {
    /// History capacity actually used: the reverse pass needs the buffer,
    /// forward-only operation does not.
    #[inline]
    pub fn history_capacity(&self) -> usize {
        if self.reverse_mrf {
            self.reverse_history_size
        } else {
            0
        }
    }
}
