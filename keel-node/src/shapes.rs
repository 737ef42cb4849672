//! The closed list of node shapes and their typed views.
//!
//! A shape is a `(tag, leaf-flag)` pair naming one concrete packed layout.
//! The active set is fixed at compile time: adding a shape means adding an
//! enum variant, a view, and a dispatch arm. There is no open registry and
//! no runtime type information.
//!
//! | shape        | tag | leaf | payload (element 1)                          |
//! |--------------|-----|------|----------------------------------------------|
//! | `Branch`     | 1   | no   | sum tree of child subtree sizes              |
//! | `LeafFixed`  | 2   | yes  | summary tree of fixed-width keys             |
//! | `LeafBitmap` | 3   | yes  | `bit_len: u64` + rank/select words           |
//! | `LeafVle`    | 4   | yes  | `count: u32` + pad + zig-zag LEB128 stream   |
//!
//! Views borrow the block; binding one performs the structural checks once
//! and allocates nothing.

use keel_block::{AllocRef, Block, ElemKind};
use keel_index::codec::{ValueCodec, VarCodec};
use keel_index::{bitseq, BitSeq, ReduceKind, SummaryTree, TreeConfig, VAR_MAX_LEN};

use crate::error::{NodeError, Result};
use crate::header::{init_header, NodeHeader};

/// Element slot of the shape payload within the root allocator.
pub const NODE_PAYLOAD_ELEM: usize = 1;

// ============================================================================
// Shape list
// ============================================================================

/// One entry in the closed, compile-time-enumerable shape list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NodeShape {
    Branch = 1,
    LeafFixed = 2,
    LeafBitmap = 3,
    LeafVle = 4,
}

impl NodeShape {
    /// Every registered shape, in dispatch order.
    pub fn all() -> &'static [NodeShape] {
        &[
            NodeShape::Branch,
            NodeShape::LeafFixed,
            NodeShape::LeafBitmap,
            NodeShape::LeafVle,
        ]
    }

    /// Canonical wire tag. Single source of truth for node headers;
    /// encoders and decoders must agree on this mapping.
    #[inline]
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Parse from a wire tag. `None` for unknown tags.
    pub fn from_tag(tag: u32) -> Option<NodeShape> {
        match tag {
            1 => Some(NodeShape::Branch),
            2 => Some(NodeShape::LeafFixed),
            3 => Some(NodeShape::LeafBitmap),
            4 => Some(NodeShape::LeafVle),
            _ => None,
        }
    }

    #[inline]
    pub fn is_leaf(self) -> bool {
        !matches!(self, NodeShape::Branch)
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeShape::Branch => "branch",
            NodeShape::LeafFixed => "leaf-fixed",
            NodeShape::LeafBitmap => "leaf-bitmap",
            NodeShape::LeafVle => "leaf-vle",
        }
    }

    /// Static descriptor for schema/reflection surfaces.
    pub fn metadata(self) -> ShapeMetadata {
        ShapeMetadata {
            tag: self.tag(),
            name: self.name(),
            leaf: self.is_leaf(),
        }
    }
}

/// Static shape descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeMetadata {
    pub tag: u32,
    pub name: &'static str,
    pub leaf: bool,
}

/// Walk every shape in the closed list once and append its descriptor.
/// Not data-dependent; used for schema/reflection, never on the hot path.
pub fn build_metadata_list(out: &mut Vec<ShapeMetadata>) {
    for &shape in NodeShape::all() {
        out.push(shape.metadata());
    }
}

// ============================================================================
// Node construction
// ============================================================================

/// Format `block` as a branch node at `level`: header plus a sum tree of
/// child subtree sizes. The block must be freshly created with two
/// elements.
pub fn init_branch(block: &mut Block, level: u32, cfg: TreeConfig) -> Result<SummaryTree> {
    if cfg.kind != ReduceKind::Sum {
        return Err(NodeError::Corrupt("branch sizes must be a sum tree"));
    }
    init_header(block, NodeShape::Branch, level)?;
    Ok(SummaryTree::create(block, AllocRef::ROOT, NODE_PAYLOAD_ELEM, cfg)?)
}

/// Format `block` as a fixed-width key leaf. The tree kind picks the
/// search family: sum trees rank, max trees locate sorted keys.
pub fn init_leaf_fixed(block: &mut Block, cfg: TreeConfig) -> Result<SummaryTree> {
    init_header(block, NodeShape::LeafFixed, 0)?;
    Ok(SummaryTree::create(block, AllocRef::ROOT, NODE_PAYLOAD_ELEM, cfg)?)
}

/// Format `block` as an empty bitmap leaf.
pub fn init_leaf_bitmap(block: &mut Block) -> Result<()> {
    init_header(block, NodeShape::LeafBitmap, 0)?;
    block.allocate(AllocRef::ROOT, NODE_PAYLOAD_ELEM, 8, ElemKind::Raw)?;
    Ok(())
}

/// Format `block` as an empty variable-length key leaf.
pub fn init_leaf_vle(block: &mut Block) -> Result<()> {
    init_header(block, NodeShape::LeafVle, 0)?;
    block.allocate(AllocRef::ROOT, NODE_PAYLOAD_ELEM, 8, ElemKind::Raw)?;
    Ok(())
}

/// Replace a bitmap leaf's payload with `seq`.
pub fn write_leaf_bitmap(block: &mut Block, seq: &BitSeq) -> Result<()> {
    let size = 8 + seq.words().len() * 8;
    block.resize(AllocRef::ROOT, NODE_PAYLOAD_ELEM, size)?;
    let payload = block.element_bytes_mut(AllocRef::ROOT, NODE_PAYLOAD_ELEM)?;
    payload[0..8].copy_from_slice(&(seq.len() as u64).to_le_bytes());
    for (i, w) in seq.words().iter().enumerate() {
        payload[8 + i * 8..16 + i * 8].copy_from_slice(&w.to_le_bytes());
    }
    Ok(())
}

/// Replace a VLE leaf's payload with `values`, zig-zag LEB128 encoded.
pub fn write_leaf_vle(block: &mut Block, values: &[i64]) -> Result<()> {
    let codec = VarCodec;
    let mut stream = Vec::with_capacity(values.len() * 2);
    for &v in values {
        let mut buf = [0u8; VAR_MAX_LEN];
        let len = codec.encode(v, &mut buf);
        stream.extend_from_slice(&buf[..len]);
    }
    block.resize(AllocRef::ROOT, NODE_PAYLOAD_ELEM, 8 + stream.len())?;
    let payload = block.element_bytes_mut(AllocRef::ROOT, NODE_PAYLOAD_ELEM)?;
    payload[0..4].copy_from_slice(&(values.len() as u32).to_le_bytes());
    payload[4..8].copy_from_slice(&0u32.to_le_bytes());
    payload[8..8 + stream.len()].copy_from_slice(&stream);
    Ok(())
}

// ============================================================================
// Shared views
// ============================================================================

/// Branch node view: the child-size sum tree.
pub struct BranchView<'a> {
    pub header: NodeHeader,
    pub sizes: SummaryTree,
    pub block: &'a Block,
}

impl<'a> BranchView<'a> {
    pub(crate) fn bind(block: &'a Block, header: NodeHeader) -> Result<BranchView<'a>> {
        let sizes = SummaryTree::open(block, AllocRef::ROOT, NODE_PAYLOAD_ELEM)?;
        if sizes.config(block)?.kind != ReduceKind::Sum {
            return Err(NodeError::Corrupt("branch sizes must be a sum tree"));
        }
        Ok(BranchView {
            header,
            sizes,
            block,
        })
    }

    /// Number of children.
    pub fn child_count(&self) -> Result<usize> {
        Ok(self.sizes.len(self.block)?)
    }

    /// Total keys in the subtree under this branch.
    pub fn subtree_size(&self) -> Result<i64> {
        let n = self.sizes.len(self.block)?;
        Ok(self.sizes.sum(self.block, 0, n)?)
    }
}

/// Fixed-width key leaf view.
pub struct LeafFixedView<'a> {
    pub header: NodeHeader,
    pub keys: SummaryTree,
    pub block: &'a Block,
}

impl<'a> LeafFixedView<'a> {
    pub(crate) fn bind(block: &'a Block, header: NodeHeader) -> Result<LeafFixedView<'a>> {
        Ok(LeafFixedView {
            header,
            keys: SummaryTree::open(block, AllocRef::ROOT, NODE_PAYLOAD_ELEM)?,
            block,
        })
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.keys.len(self.block)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.keys.is_empty(self.block)?)
    }
}

/// Bitmap leaf view: rank/select over a two-symbol sequence.
pub struct BitmapLeafView<'a> {
    pub header: NodeHeader,
    payload: &'a [u8],
}

impl<'a> BitmapLeafView<'a> {
    pub(crate) fn bind(block: &'a Block, header: NodeHeader) -> Result<BitmapLeafView<'a>> {
        let payload = block.element_bytes(AllocRef::ROOT, NODE_PAYLOAD_ELEM)?;
        if payload.len() < 8 {
            return Err(NodeError::Corrupt("bitmap payload too small"));
        }
        let len = u64::from_le_bytes(payload[0..8].try_into().unwrap()) as usize;
        if len > (payload.len() - 8) * 8 {
            return Err(NodeError::Corrupt("bitmap length exceeds payload"));
        }
        Ok(BitmapLeafView { header, payload })
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        u64::from_le_bytes(self.payload[0..8].try_into().unwrap()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn words(&self) -> &[u8] {
        &self.payload[8..]
    }

    /// Occurrences of `symbol` strictly before `end`.
    pub fn rank(&self, end: usize, symbol: bool) -> usize {
        bitseq::rank_bytes(self.words(), self.len(), end, symbol)
    }

    /// Position of the k-th occurrence of `symbol` (1-based), forward.
    pub fn select_fw(&self, symbol: bool, k: usize) -> Option<usize> {
        bitseq::select_fw_bytes(self.words(), self.len(), symbol, k)
    }

    /// Position of the k-th occurrence of `symbol` from the end (1-based).
    pub fn select_bw(&self, symbol: bool, k: usize) -> Option<usize> {
        bitseq::select_bw_bytes(self.words(), self.len(), symbol, k)
    }
}

/// Variable-length key leaf view.
pub struct VleLeafView<'a> {
    pub header: NodeHeader,
    payload: &'a [u8],
}

impl<'a> VleLeafView<'a> {
    pub(crate) fn bind(block: &'a Block, header: NodeHeader) -> Result<VleLeafView<'a>> {
        let payload = block.element_bytes(AllocRef::ROOT, NODE_PAYLOAD_ELEM)?;
        if payload.len() < 8 {
            return Err(NodeError::Corrupt("vle payload too small"));
        }
        Ok(VleLeafView { header, payload })
    }

    /// Number of encoded values.
    pub fn len(&self) -> usize {
        u32::from_le_bytes(self.payload[0..4].try_into().unwrap()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `pos`. Linear decode from the stream start; VLE leaves are
    /// iterated or rebuilt wholesale, not random-accessed on hot paths.
    pub fn get(&self, pos: usize) -> Result<i64> {
        let n = self.len();
        if pos >= n {
            return Err(NodeError::Corrupt("vle position out of bounds"));
        }
        let codec = VarCodec;
        let mut at = 8usize;
        for _ in 0..pos {
            let (_, used) = codec.decode(&self.payload[at..])?;
            at += used;
        }
        let (value, _) = codec.decode(&self.payload[at..])?;
        Ok(value)
    }

    /// Decode the full stream.
    pub fn decode_all(&self) -> Result<Vec<i64>> {
        let codec = VarCodec;
        let mut out = Vec::with_capacity(self.len());
        let mut at = 8usize;
        for _ in 0..self.len() {
            let (value, used) = codec.decode(&self.payload[at..])?;
            out.push(value);
            at += used;
        }
        Ok(out)
    }
}

/// Shape-agnostic view used by by-class dispatch: header plus block, no
/// payload typing.
pub struct NodeView<'a> {
    pub header: NodeHeader,
    pub block: &'a Block,
}

// ============================================================================
// Mutable views
// ============================================================================

/// Mutable branch view.
pub struct BranchViewMut<'a> {
    pub header: NodeHeader,
    pub sizes: SummaryTree,
    pub block: &'a mut Block,
}

impl<'a> BranchViewMut<'a> {
    pub(crate) fn bind(block: &'a mut Block, header: NodeHeader) -> Result<BranchViewMut<'a>> {
        let sizes = SummaryTree::open(block, AllocRef::ROOT, NODE_PAYLOAD_ELEM)?;
        Ok(BranchViewMut {
            header,
            sizes,
            block,
        })
    }
}

/// Mutable fixed-width key leaf view.
pub struct LeafFixedViewMut<'a> {
    pub header: NodeHeader,
    pub keys: SummaryTree,
    pub block: &'a mut Block,
}

impl<'a> LeafFixedViewMut<'a> {
    pub(crate) fn bind(block: &'a mut Block, header: NodeHeader) -> Result<LeafFixedViewMut<'a>> {
        let keys = SummaryTree::open(block, AllocRef::ROOT, NODE_PAYLOAD_ELEM)?;
        Ok(LeafFixedViewMut {
            header,
            keys,
            block,
        })
    }
}

/// Mutable bitmap leaf view.
pub struct BitmapLeafViewMut<'a> {
    pub header: NodeHeader,
    pub block: &'a mut Block,
}

impl<'a> BitmapLeafViewMut<'a> {
    /// Replace the payload with `seq`.
    pub fn write(&mut self, seq: &BitSeq) -> Result<()> {
        write_leaf_bitmap(self.block, seq)
    }
}

/// Mutable variable-length key leaf view.
pub struct VleLeafViewMut<'a> {
    pub header: NodeHeader,
    pub block: &'a mut Block,
}

impl<'a> VleLeafViewMut<'a> {
    /// Replace the payload with `values`.
    pub fn write(&mut self, values: &[i64]) -> Result<()> {
        write_leaf_vle(self.block, values)
    }
}

// ============================================================================
// Tests
// ============================================================================
