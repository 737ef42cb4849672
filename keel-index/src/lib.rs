//! # Keel Index
//!
//! Hierarchical summary indexes, rank/select primitives, and search walkers
//! for the Keel storage kernel.
//!
//! This crate provides:
//! - Value codecs (fixed-width and zig-zag LEB128) for packed key storage
//! - Word-parallel bit rank/select and a searchable [`BitSeq`]
//! - [`SummaryTree`]: a packed sum/max reduction tree living inside one
//!   block element, with O(log n) prefix-sum and rank queries
//! - The [`Walker`] framework driving comparator/direction-parameterized
//!   searches across packed structures
//!
//! ## Design principles
//!
//! 1. **Everything in the block**: tree state lives in allocator elements;
//!    handles address elements, never bytes
//! 2. **Full rebuild over clever patching**: `reindex` reconstructs every
//!    line; queries stay allocation-free
//! 3. **Explicit outcomes**: searches return [`WalkResult`], never a
//!    sentinel index

pub mod bitseq;
pub mod codec;
pub mod error;
pub mod sum_tree;
pub mod walk;

pub use bitseq::{rank0_words, rank1_words, select0_words, select1_words, BitSeq};
pub use codec::{FixedCodec, ValueCodec, VarCodec, VAR_MAX_LEN};
pub use error::{IndexError, Result};
pub use sum_tree::{ReduceKind, SummaryTree, TreeConfig};
pub use walk::{Direction, IterState, SearchKind, WalkResult, Walker};
