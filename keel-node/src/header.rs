//! Node header: the tag element stamped into every node block.
//!
//! Element 0 of a node block's root allocator holds a fixed 16-byte header:
//!
//! ```text
//! tag:      u32  [0..4]    shape tag, stamped at construction, never changes
//! flags:    u32  [4..8]    bit 0 = leaf
//! level:    u32  [8..12]   0 for leaves, height above the leaf line for branches
//! reserved: u32  [12..16]
//! ```

use keel_block::{AllocRef, Block, ElemKind};

use crate::error::{NodeError, Result};
use crate::shapes::NodeShape;

/// Element slot of the node header within the root allocator.
pub const NODE_HEADER_ELEM: usize = 0;

/// Serialized header size.
pub const NODE_HEADER_SIZE: usize = 16;

/// Leaf bit in `flags`.
pub const FLAG_LEAF: u32 = 1;

/// Decoded node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub tag: u32,
    pub flags: u32,
    pub level: u32,
}

impl NodeHeader {
    /// Read the header from element 0 of `block`.
    pub fn read(block: &Block) -> Result<NodeHeader> {
        let bytes = block.element_bytes(AllocRef::ROOT, NODE_HEADER_ELEM)?;
        if bytes.len() < NODE_HEADER_SIZE {
            return Err(NodeError::Corrupt("node header element too small"));
        }
        Ok(NodeHeader {
            tag: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            flags: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            level: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        })
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.flags & FLAG_LEAF != 0
    }
}

/// Allocate element 0 and stamp the header for a freshly formatted node
/// block. The tag is persistent: it is written once here and never changes
/// for the block's lifetime.
pub fn init_header(block: &mut Block, shape: NodeShape, level: u32) -> Result<()> {
    block.allocate(AllocRef::ROOT, NODE_HEADER_ELEM, NODE_HEADER_SIZE, ElemKind::Raw)?;
    let flags = if shape.is_leaf() { FLAG_LEAF } else { 0 };
    let bytes = block.element_bytes_mut(AllocRef::ROOT, NODE_HEADER_ELEM)?;
    bytes[0..4].copy_from_slice(&shape.tag().to_le_bytes());
    bytes[4..8].copy_from_slice(&flags.to_le_bytes());
    bytes[8..12].copy_from_slice(&level.to_le_bytes());
    bytes[12..16].copy_from_slice(&0u32.to_le_bytes());
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut block = Block::new(256, 2).unwrap();
        init_header(&mut block, NodeShape::Branch, 3).unwrap();

        let header = NodeHeader::read(&block).unwrap();
        assert_eq!(header.tag, NodeShape::Branch.tag());
        assert!(!header.is_leaf());
        assert_eq!(header.level, 3);
    }

    #[test]
    fn test_leaf_flag_follows_shape() {
        let mut block = Block::new(256, 2).unwrap();
        init_header(&mut block, NodeShape::LeafFixed, 0).unwrap();
        assert!(NodeHeader::read(&block).unwrap().is_leaf());
    }

    #[test]
    fn test_header_survives_serialization() {
        let mut block = Block::new(256, 2).unwrap();
        init_header(&mut block, NodeShape::LeafBitmap, 0).unwrap();
        let restored = Block::deserialize(&block.serialize()).unwrap();
        let header = NodeHeader::read(&restored).unwrap();
        assert_eq!(header.tag, NodeShape::LeafBitmap.tag());
        assert!(header.is_leaf());
    }

    #[test]
    fn test_read_rejects_missing_header() {
        let block = Block::new(256, 2).unwrap();
        assert!(matches!(
            NodeHeader::read(&block),
            Err(NodeError::Corrupt(_))
        ));
    }
}
