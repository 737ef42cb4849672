//! Error types for node construction and dispatch.

use keel_block::BlockError;
use keel_index::IndexError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    /// Underlying block/allocator failure.
    #[error(transparent)]
    Block(#[from] BlockError),

    /// Underlying index structure failure.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// No shape in the closed list matches the block's tag. Treated as
    /// data corruption: fatal for the operation, never retried.
    #[error("can't dispatch node type: unknown tag {0:#06x}")]
    UnknownShape(u32),

    /// A two-block operation was handed blocks of different shapes.
    #[error("shape mismatch: left tag {left:#06x}, right tag {right:#06x}")]
    ShapeMismatch { left: u32, right: u32 },

    /// The operation has no overload for this shape.
    #[error("operation not supported for {0} nodes")]
    Unsupported(&'static str),

    /// The node header or a payload element fails a structural check.
    #[error("corrupt node: {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, NodeError>;
