//! # Keel Block
//!
//! Packed block buffer and sub-block allocator for the Keel storage kernel.
//!
//! A block is one contiguous, fixed-capacity byte buffer holding a
//! self-describing allocator region: an offset table delimiting named
//! sub-regions ("elements"), a kind bitmap marking which elements are
//! themselves nested allocators, and the element data on an 8-byte-aligned
//! base. All offsets are block-relative, so blocks relocate and serialize
//! byte-for-byte.
//!
//! ## Design principles
//!
//! 1. **No raw pointers**: handles are typed relative offsets, resolved
//!    through bounds-checked accessors on the owning [`Block`].
//! 2. **Fail before mutating**: growth requirements are computed up front;
//!    a failed operation never leaves a region half-shifted.
//! 3. **Lock-step metadata**: offsets, bitmap, and nested back-pointers are
//!    only ever updated together, and every shift reports what it relinked.

pub mod alloc;
pub mod block;
pub mod error;
pub mod layout;

pub use alloc::ShiftOutcome;
pub use block::{AllocRef, Block, ElemKind};
pub use error::{BlockError, Result};
pub use layout::{round_up, ALIGNMENT};
