use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("block coordinates out of range: row {row}, col {col}")]
    OutOfRange { row: isize, col: isize },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("internal consistency violation: {0}")]
    InternalConsistency(String),

    #[error("frame source yielded no frames")]
    EmptySource,

    #[error("frame history is empty")]
    EmptyHistory,
}
