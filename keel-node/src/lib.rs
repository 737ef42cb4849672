//! # Keel Node
//!
//! Closed node-shape list and tag dispatch for the Keel storage kernel.
//!
//! A container's node blocks all carry a tag stamped at construction.
//! Dispatch resolves the tag against the compile-time shape list, binds a
//! borrowed typed view over the block's elements, and invokes the caller's
//! operation: closed-set polymorphism with no runtime type information,
//! no virtual calls, and no allocation, sitting on the hot path of every
//! tree traversal.
//!
//! This crate provides:
//! - The node header ([`NodeHeader`]) and its construction stamp
//! - The shape list ([`NodeShape`]) with static metadata reflection
//! - Typed views (branch, fixed leaf, bitmap leaf, VLE leaf)
//! - The dispatch entry points: [`dispatch`], [`dispatch_mut`],
//!   [`dispatch_pair`], [`dispatch_by_class`]

pub mod dispatch;
pub mod error;
pub mod header;
pub mod shapes;

pub use dispatch::{
    dispatch, dispatch_by_class, dispatch_mut, dispatch_pair, dispatch_pair_mut, NodeClassOp,
    NodeOp, NodeOpMut, NodePairOp, NodePairOpMut,
};
pub use error::{NodeError, Result};
pub use header::{init_header, NodeHeader, FLAG_LEAF, NODE_HEADER_ELEM, NODE_HEADER_SIZE};
pub use shapes::{
    build_metadata_list, init_branch, init_leaf_bitmap, init_leaf_fixed, init_leaf_vle,
    write_leaf_bitmap, write_leaf_vle, BitmapLeafView, BitmapLeafViewMut, BranchView,
    BranchViewMut, LeafFixedView, LeafFixedViewMut, NodeShape, NodeView, ShapeMetadata,
    VleLeafView, VleLeafViewMut, NODE_PAYLOAD_ELEM,
};
