//! Error types for block and allocator operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockError {
    /// A growth request could not be satisfied within the block's limit,
    /// or a parent allocator was itself exhausted. Never retried here;
    /// callers decide whether to migrate to a larger block or split.
    #[error("out of memory: requested {requested} bytes, limit {limit}")]
    OutOfMemory { requested: u32, limit: u32 },

    /// Element or byte index outside the valid range.
    #[error("index {index} out of bounds (len {len})")]
    Bounds { index: usize, len: usize },

    /// An element offset fails the structure's required alignment.
    /// Indicates layout corruption.
    #[error("offset {offset} is not {align}-byte aligned")]
    Alignment { offset: u32, align: u32 },

    /// Not enough bytes in the input; need at least this many total.
    #[error("incomplete block image: need at least {0} bytes")]
    Incomplete(usize),

    /// A structural invariant does not hold (bad header sizes,
    /// non-monotone offsets, dangling back-pointer).
    #[error("corrupt block: {0}")]
    Corrupt(&'static str),
}

pub type Result<T> = std::result::Result<T, BlockError>;
