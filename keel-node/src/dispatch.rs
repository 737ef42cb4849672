//! Tag dispatch: route an opaque block to a typed shape view.
//!
//! Given a block, dispatch reads the tag stamped in the node header,
//! matches it against the closed shape list, binds a stack-local typed
//! view, and invokes the matching operation overload: a direct call with
//! no function-pointer table and no heap allocation. The number of comparisons
//! is bounded by the (small, fixed) shape count. An unmatched tag is
//! [`NodeError::UnknownShape`]: corruption, fatal for the operation.
//!
//! Operations are visitors over the closed list. Every overload defaults
//! to [`NodeError::Unsupported`], so an operation implements only the
//! shapes it handles. [`dispatch_by_class`] routes on the leaf/branch bit
//! alone for shape-agnostic tree algorithms, and [`dispatch_pair`] drives
//! two-block operations (merge/split/compare) over same-shape blocks.

use keel_block::Block;
use tracing::warn;

use crate::error::{NodeError, Result};
use crate::header::NodeHeader;
use crate::shapes::{
    BitmapLeafView, BitmapLeafViewMut, BranchView, BranchViewMut, LeafFixedView, LeafFixedViewMut,
    NodeShape, NodeView, VleLeafView, VleLeafViewMut,
};

// ============================================================================
// Operation traits
// ============================================================================

/// Read-only operation over the closed shape list.
pub trait NodeOp {
    type Output;

    fn branch(self, _view: BranchView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("branch"))
    }

    fn leaf_fixed(self, _view: LeafFixedView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-fixed"))
    }

    fn leaf_bitmap(self, _view: BitmapLeafView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-bitmap"))
    }

    fn leaf_vle(self, _view: VleLeafView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-vle"))
    }
}

/// Mutating operation over the closed shape list.
pub trait NodeOpMut {
    type Output;

    fn branch(self, _view: BranchViewMut<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("branch"))
    }

    fn leaf_fixed(self, _view: LeafFixedViewMut<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-fixed"))
    }

    fn leaf_bitmap(self, _view: BitmapLeafViewMut<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-bitmap"))
    }

    fn leaf_vle(self, _view: VleLeafViewMut<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-vle"))
    }
}

/// Two-block operation; both blocks carry the same shape.
pub trait NodePairOp {
    type Output;

    fn branch(self, _a: BranchView<'_>, _b: BranchView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("branch"))
    }

    fn leaf_fixed(self, _a: LeafFixedView<'_>, _b: LeafFixedView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-fixed"))
    }

    fn leaf_bitmap(self, _a: BitmapLeafView<'_>, _b: BitmapLeafView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-bitmap"))
    }

    fn leaf_vle(self, _a: VleLeafView<'_>, _b: VleLeafView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-vle"))
    }
}

/// Two-block operation mutating the first block (merge/split targets);
/// both blocks carry the same shape.
pub trait NodePairOpMut {
    type Output;

    fn branch(self, _a: BranchViewMut<'_>, _b: BranchView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("branch"))
    }

    fn leaf_fixed(self, _a: LeafFixedViewMut<'_>, _b: LeafFixedView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-fixed"))
    }

    fn leaf_bitmap(self, _a: BitmapLeafViewMut<'_>, _b: BitmapLeafView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-bitmap"))
    }

    fn leaf_vle(self, _a: VleLeafViewMut<'_>, _b: VleLeafView<'_>) -> Result<Self::Output>
    where
        Self: Sized,
    {
        Err(NodeError::Unsupported("leaf-vle"))
    }
}

/// Leaf/branch-only operation for shape-agnostic tree algorithms
/// (e.g. recursive node construction).
pub trait NodeClassOp {
    type Output;

    fn branch(self, view: NodeView<'_>) -> Result<Self::Output>;
    fn leaf(self, view: NodeView<'_>) -> Result<Self::Output>;
}

// ============================================================================
// Dispatch entry points
// ============================================================================

fn resolve(header: NodeHeader) -> Result<NodeShape> {
    NodeShape::from_tag(header.tag).ok_or_else(|| {
        warn!(tag = header.tag, "can't dispatch node type");
        NodeError::UnknownShape(header.tag)
    })
}

/// Resolve `block`'s shape and invoke the matching overload of `op`.
pub fn dispatch<Op: NodeOp>(block: &Block, op: Op) -> Result<Op::Output> {
    let header = NodeHeader::read(block)?;
    match resolve(header)? {
        NodeShape::Branch => op.branch(BranchView::bind(block, header)?),
        NodeShape::LeafFixed => op.leaf_fixed(LeafFixedView::bind(block, header)?),
        NodeShape::LeafBitmap => op.leaf_bitmap(BitmapLeafView::bind(block, header)?),
        NodeShape::LeafVle => op.leaf_vle(VleLeafView::bind(block, header)?),
    }
}

/// Mutating variant of [`dispatch`].
pub fn dispatch_mut<Op: NodeOpMut>(block: &mut Block, op: Op) -> Result<Op::Output> {
    let header = NodeHeader::read(block)?;
    match resolve(header)? {
        NodeShape::Branch => op.branch(BranchViewMut::bind(block, header)?),
        NodeShape::LeafFixed => op.leaf_fixed(LeafFixedViewMut::bind(block, header)?),
        NodeShape::LeafBitmap => op.leaf_bitmap(BitmapLeafViewMut { header, block }),
        NodeShape::LeafVle => op.leaf_vle(VleLeafViewMut { header, block }),
    }
}

/// Resolve two blocks of the same shape and invoke the matching pair
/// overload. Differing tags are a [`NodeError::ShapeMismatch`].
pub fn dispatch_pair<Op: NodePairOp>(a: &Block, b: &Block, op: Op) -> Result<Op::Output> {
    let ha = NodeHeader::read(a)?;
    let hb = NodeHeader::read(b)?;
    if ha.tag != hb.tag {
        return Err(NodeError::ShapeMismatch {
            left: ha.tag,
            right: hb.tag,
        });
    }
    match resolve(ha)? {
        NodeShape::Branch => op.branch(BranchView::bind(a, ha)?, BranchView::bind(b, hb)?),
        NodeShape::LeafFixed => {
            op.leaf_fixed(LeafFixedView::bind(a, ha)?, LeafFixedView::bind(b, hb)?)
        }
        NodeShape::LeafBitmap => {
            op.leaf_bitmap(BitmapLeafView::bind(a, ha)?, BitmapLeafView::bind(b, hb)?)
        }
        NodeShape::LeafVle => op.leaf_vle(VleLeafView::bind(a, ha)?, VleLeafView::bind(b, hb)?),
    }
}

/// Mutating variant of [`dispatch_pair`]: the first block is the
/// operation's target, the second is read-only.
pub fn dispatch_pair_mut<Op: NodePairOpMut>(
    a: &mut Block,
    b: &Block,
    op: Op,
) -> Result<Op::Output> {
    let ha = NodeHeader::read(a)?;
    let hb = NodeHeader::read(b)?;
    if ha.tag != hb.tag {
        return Err(NodeError::ShapeMismatch {
            left: ha.tag,
            right: hb.tag,
        });
    }
    match resolve(ha)? {
        NodeShape::Branch => op.branch(BranchViewMut::bind(a, ha)?, BranchView::bind(b, hb)?),
        NodeShape::LeafFixed => {
            op.leaf_fixed(LeafFixedViewMut::bind(a, ha)?, LeafFixedView::bind(b, hb)?)
        }
        NodeShape::LeafBitmap => op.leaf_bitmap(
            BitmapLeafViewMut { header: ha, block: a },
            BitmapLeafView::bind(b, hb)?,
        ),
        NodeShape::LeafVle => op.leaf_vle(
            VleLeafViewMut { header: ha, block: a },
            VleLeafView::bind(b, hb)?,
        ),
    }
}

/// Route on the leaf/branch bit alone, ignoring the exact shape tag.
pub fn dispatch_by_class<Op: NodeClassOp>(block: &Block, op: Op) -> Result<Op::Output> {
    let header = NodeHeader::read(block)?;
    let view = NodeView { header, block };
    if header.is_leaf() {
        op.leaf(view)
    } else {
        op.branch(view)
    }
}

// ============================================================================
// Tests
// ============================================================================
