pub mod background;
pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod illumination;
pub mod imgproc;
pub mod motion;
pub mod mrf;
pub mod registration;
pub mod relabel;
pub mod solver;
pub mod tracker;

mod circular_queue;

pub use config::TrackerParams;
pub use error::{Error, Result};
pub use geometry::{Capture, CaptureType, Direction, Line, Slit};
pub use grid::{Block, BlockArray};
pub use imgproc::{GrayImage, LabelMap, Mask, RgbFrame};
pub use registration::Rect;
pub use relabel::MergePolicy;
pub use solver::{IcmSolver, LabelSolver};
pub use tracker::Tracker;

/// Object identity carried by grid blocks; zero marks background.
pub type Id = i32;
