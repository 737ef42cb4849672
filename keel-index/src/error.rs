//! Error types for index structures and walkers.

use keel_block::BlockError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    /// Underlying block/allocator failure (growth, bounds, alignment).
    #[error(transparent)]
    Block(#[from] BlockError),

    /// A tree's stored metadata does not describe a usable structure.
    #[error("corrupt index metadata: {0}")]
    Metadata(&'static str),

    /// Key or cell position outside the structure.
    #[error("position {pos} out of bounds (len {len})")]
    Position { pos: usize, len: usize },

    /// A variable-length value failed to decode.
    #[error("value decode failed at byte {0}")]
    Decode(usize),
}

pub type Result<T> = std::result::Result<T, IndexError>;
