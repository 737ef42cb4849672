//! Owned block buffer and typed region handles.
//!
//! A [`Block`] owns one contiguous byte buffer holding a root allocator
//! region at offset 0, plus any nested regions inside allocatable elements.
//! Every handle into the buffer is a relative offset ([`AllocRef`]) that can
//! only be dereferenced through the bounds-checked accessors here; the
//! buffer is relocatable and never exposes raw interior pointers.
//!
//! ## Serialization
//!
//! `serialize` writes the root region verbatim: `block_size`, `layout_size`,
//! `bitmap_size`, the full offset table, the kind bitmap, then element data
//! from the 8-byte-aligned base. Nested structures keep their relative
//! offsets, so the image round-trips byte-for-byte. `deserialize` performs a
//! full structural validation (recursing into formatted nested regions)
//! before accepting the image.

use crate::error::{BlockError, Result};
use crate::layout::{self, ALIGNMENT, BACKPTR_SIZE, HEADER_SIZE};

/// Handle to an allocator region: the region's byte offset within the block
/// buffer. The root region is [`AllocRef::ROOT`]; nested regions live inside
/// allocatable elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocRef(pub(crate) u32);

impl AllocRef {
    /// The root allocator region at buffer offset 0.
    pub const ROOT: AllocRef = AllocRef(0);

    /// Byte offset of this region within the block buffer.
    #[inline]
    pub fn offset(self) -> u32 {
        self.0
    }
}

/// Element kind, mirrored by one bit per element in the kind bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemKind {
    /// Opaque bytes; the allocator never looks inside.
    Raw,
    /// The element is itself a nested allocator region (preceded by an
    /// 8-byte back-pointer prefix) and satisfies the layout invariants
    /// recursively.
    Allocatable,
}

/// A fixed-capacity block: one owned buffer, a root allocator region, and
/// an optional growth limit.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) buf: Vec<u8>,
    pub(crate) limit: usize,
}

impl Block {
    /// Create a fixed-size block: `limit == block_size`, so any growth
    /// request past the initial capacity fails with `OutOfMemory`.
    pub fn new(block_size: usize, n_elements: usize) -> Result<Block> {
        Self::with_limit(block_size, block_size, n_elements)
    }

    /// Create a growable block. The root region starts at `block_size`
    /// bytes and may be enlarged up to `limit` by allocator growth.
    pub fn with_limit(block_size: usize, limit: usize, n_elements: usize) -> Result<Block> {
        if limit < block_size {
            return Err(BlockError::Corrupt("limit smaller than block size"));
        }
        let min = Self::min_region_size(n_elements);
        if block_size < min {
            return Err(BlockError::Bounds {
                index: block_size,
                len: min,
            });
        }
        let mut block = Block {
            buf: vec![0u8; block_size],
            limit,
        };
        block.format_region(0, block_size, n_elements);
        Ok(block)
    }

    /// Smallest region able to describe `n` elements (header + offset
    /// table + bitmap, aligned; zero data bytes).
    pub fn min_region_size(n_elements: usize) -> usize {
        layout::round_up(HEADER_SIZE + layout::layout_len(n_elements) + layout::bitmap_len(n_elements))
    }

    /// Zero-fill and stamp a fresh region header at `region`. All elements
    /// start at size 0. The span must already be inside the buffer.
    pub(crate) fn format_region(&mut self, region: usize, region_size: usize, n_elements: usize) {
        debug_assert!(region + region_size <= self.buf.len());
        debug_assert!(region_size >= Self::min_region_size(n_elements));
        self.buf[region..region + region_size].fill(0);
        layout::set_block_size(&mut self.buf, region, region_size);
        layout::set_layout_size(&mut self.buf, region, layout::layout_len(n_elements));
        layout::set_bitmap_size(&mut self.buf, region, layout::bitmap_len(n_elements));
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Total bytes of the root region (== the serialized image size).
    pub fn block_size(&self) -> usize {
        layout::block_size(&self.buf, 0)
    }

    /// Growth ceiling for the root region.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of elements in `region`.
    pub fn n_elements(&self, region: AllocRef) -> usize {
        layout::n_elements(&self.buf, region.0 as usize)
    }

    /// Data-relative offset of element `idx` (valid through the fence at
    /// `idx == n_elements`).
    pub fn element_offset(&self, region: AllocRef, idx: usize) -> Result<usize> {
        let n = self.n_elements(region);
        if idx > n {
            return Err(BlockError::Bounds { index: idx, len: n + 1 });
        }
        Ok(layout::element_offset(&self.buf, region.0 as usize, idx))
    }

    /// Byte size of element `idx`.
    pub fn element_size(&self, region: AllocRef, idx: usize) -> Result<usize> {
        let n = self.n_elements(region);
        if idx >= n {
            return Err(BlockError::Bounds { index: idx, len: n });
        }
        Ok(layout::element_size(&self.buf, region.0 as usize, idx))
    }

    /// Kind of element `idx`, from the bitmap.
    pub fn element_kind(&self, region: AllocRef, idx: usize) -> Result<ElemKind> {
        let n = self.n_elements(region);
        if idx >= n {
            return Err(BlockError::Bounds { index: idx, len: n });
        }
        Ok(if layout::bitmap_get(&self.buf, region.0 as usize, idx) {
            ElemKind::Allocatable
        } else {
            ElemKind::Raw
        })
    }

    /// Absolute byte range of element `idx` within the buffer.
    pub(crate) fn element_abs_range(&self, region: AllocRef, idx: usize) -> Result<(usize, usize)> {
        let n = self.n_elements(region);
        if idx >= n {
            return Err(BlockError::Bounds { index: idx, len: n });
        }
        let r = region.0 as usize;
        let base = r + layout::data_base(&self.buf, r);
        let start = base + layout::element_offset(&self.buf, r, idx);
        let end = base + layout::element_offset(&self.buf, r, idx + 1);
        Ok((start, end))
    }

    /// Borrow element `idx` as bytes.
    pub fn element_bytes(&self, region: AllocRef, idx: usize) -> Result<&[u8]> {
        let (start, end) = self.element_abs_range(region, idx)?;
        Ok(&self.buf[start..end])
    }

    /// Borrow element `idx` as mutable bytes.
    pub fn element_bytes_mut(&mut self, region: AllocRef, idx: usize) -> Result<&mut [u8]> {
        let (start, end) = self.element_abs_range(region, idx)?;
        Ok(&mut self.buf[start..end])
    }

    /// Free bytes remaining in `region`'s data span.
    pub fn free_space(&self, region: AllocRef) -> usize {
        let r = region.0 as usize;
        let n = layout::n_elements(&self.buf, r);
        let data_span = layout::block_size(&self.buf, r) - layout::data_base(&self.buf, r);
        data_span - layout::element_offset(&self.buf, r, n)
    }

    /// Bytes in use from the region start through the last element.
    pub fn allocated(&self, region: AllocRef) -> usize {
        let r = region.0 as usize;
        let n = layout::n_elements(&self.buf, r);
        layout::data_base(&self.buf, r) + layout::element_offset(&self.buf, r, n)
    }

    /// Back-pointer of `region`: 0 for the root, otherwise the distance from
    /// the enclosing element's start back to the owning region's start.
    pub fn allocator_offset(&self, region: AllocRef) -> u32 {
        if region.0 == 0 {
            0
        } else {
            layout::read_u32(&self.buf, region.0 as usize - BACKPTR_SIZE)
        }
    }

    /// Owning region and element index of a nested region; `None` for the
    /// root.
    pub fn parent_of(&self, region: AllocRef) -> Result<Option<(AllocRef, usize)>> {
        if region.0 == 0 {
            return Ok(None);
        }
        let elem_start = region.0 as usize - BACKPTR_SIZE;
        let owner = layout::read_u32(&self.buf, elem_start) as usize;
        let parent = elem_start
            .checked_sub(owner)
            .ok_or(BlockError::Corrupt("back-pointer past buffer start"))?;
        let idx = self.resolve(AllocRef(parent as u32), elem_start)?;
        if !layout::bitmap_get(&self.buf, parent, idx) {
            return Err(BlockError::Corrupt("back-pointer into a raw element"));
        }
        Ok(Some((AllocRef(parent as u32), idx)))
    }

    /// Region handle for the nested allocator inside allocatable element
    /// `idx` (skipping the back-pointer prefix).
    pub fn nested_region(&self, region: AllocRef, idx: usize) -> Result<AllocRef> {
        if self.element_kind(region, idx)? != ElemKind::Allocatable {
            return Err(BlockError::Corrupt("element is not allocatable"));
        }
        let (start, end) = self.element_abs_range(region, idx)?;
        if end - start < BACKPTR_SIZE + HEADER_SIZE {
            return Err(BlockError::Corrupt("allocatable element too small"));
        }
        Ok(AllocRef((start + BACKPTR_SIZE) as u32))
    }

    /// Reverse lookup: which element of `region` owns the absolute buffer
    /// offset `pos`? Binary search of the offset table.
    pub fn resolve(&self, region: AllocRef, pos: usize) -> Result<usize> {
        let r = region.0 as usize;
        let n = layout::n_elements(&self.buf, r);
        let base = r + layout::data_base(&self.buf, r);
        let end = base + layout::element_offset(&self.buf, r, n);
        if pos < base || pos >= end {
            return Err(BlockError::Bounds {
                index: pos,
                len: end,
            });
        }
        let rel = pos - base;
        // First element whose end fence lies past `rel`; monotone offsets
        // guarantee its start fence is <= rel.
        let mut lo = 0usize;
        let mut hi = n;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if layout::element_offset(&self.buf, r, mid + 1) <= rel {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Check that element `idx` starts on an `align`-byte boundary.
    /// Failure indicates layout corruption.
    pub fn check_element_alignment(&self, region: AllocRef, idx: usize, align: usize) -> Result<()> {
        let (start, _) = self.element_abs_range(region, idx)?;
        if start % align != 0 {
            return Err(BlockError::Alignment {
                offset: start as u32,
                align: align as u32,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Pack / serialize
    // ========================================================================

    /// Trim the root region to its allocated size, dropping tail free space.
    /// Used before a block is persisted. Nested regions are left untouched.
    pub fn pack(&mut self) {
        let new_size = self.allocated(AllocRef::ROOT);
        layout::set_block_size(&mut self.buf, 0, new_size);
        self.buf.truncate(new_size);
    }

    /// Serialize the root region verbatim: header fields, offset table,
    /// bitmap, element data, in that order.
    pub fn serialize(&self) -> Vec<u8> {
        self.buf[..self.block_size()].to_vec()
    }

    /// Deserialize and structurally validate a block image. The resulting
    /// block is fixed-size (`limit == block_size`); callers wanting headroom
    /// re-wrap with [`Block::set_limit`].
    pub fn deserialize(data: &[u8]) -> Result<Block> {
        if data.len() < HEADER_SIZE {
            return Err(BlockError::Incomplete(HEADER_SIZE));
        }
        let bs = layout::block_size(data, 0);
        if data.len() < bs {
            return Err(BlockError::Incomplete(bs));
        }
        let block = Block {
            buf: data[..bs].to_vec(),
            limit: bs,
        };
        block.validate_region(0, bs)?;
        Ok(block)
    }

    /// Raise the growth ceiling of a deserialized block.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit < self.block_size() {
            return Err(BlockError::Corrupt("limit smaller than block size"));
        }
        self.limit = limit;
        Ok(())
    }

    /// Validate one region: header sizes, offset monotonicity, bounds, and
    /// back-pointers of formatted nested regions (recursively).
    fn validate_region(&self, region: usize, span: usize) -> Result<()> {
        if span < HEADER_SIZE {
            return Err(BlockError::Corrupt("region smaller than header"));
        }
        let bs = layout::block_size(&self.buf, region);
        if bs > span {
            return Err(BlockError::Corrupt("region block_size exceeds its span"));
        }
        let ls = layout::layout_size(&self.buf, region);
        if ls < 4 || ls % 4 != 0 {
            return Err(BlockError::Corrupt("bad layout_size"));
        }
        let n = ls / 4 - 1;
        if layout::bitmap_size(&self.buf, region) < layout::bitmap_len(n) {
            return Err(BlockError::Corrupt("bitmap too small for element count"));
        }
        let base = layout::data_base(&self.buf, region);
        if base > bs {
            return Err(BlockError::Corrupt("data base past region end"));
        }
        if layout::element_offset(&self.buf, region, 0) != 0 {
            return Err(BlockError::Corrupt("first element offset not zero"));
        }
        for i in 0..n {
            if layout::element_offset(&self.buf, region, i)
                > layout::element_offset(&self.buf, region, i + 1)
            {
                return Err(BlockError::Corrupt("offset table not monotone"));
            }
        }
        if base + layout::element_offset(&self.buf, region, n) > bs {
            return Err(BlockError::Corrupt("element data past region end"));
        }

        for i in 0..n {
            if !layout::bitmap_get(&self.buf, region, i) {
                continue;
            }
            let size = layout::element_size(&self.buf, region, i);
            if size == 0 {
                continue;
            }
            if size < BACKPTR_SIZE + HEADER_SIZE {
                return Err(BlockError::Corrupt("allocatable element too small"));
            }
            let start = region + base + layout::element_offset(&self.buf, region, i);
            let owner = layout::read_u32(&self.buf, start) as usize;
            if owner != start - region {
                return Err(BlockError::Corrupt("stale back-pointer"));
            }
            let nested = start + BACKPTR_SIZE;
            if nested % ALIGNMENT != 0 {
                return Err(BlockError::Alignment {
                    offset: nested as u32,
                    align: ALIGNMENT as u32,
                });
            }
            let nested_bs = layout::block_size(&self.buf, nested);
            if nested_bs == 0 {
                // Allocated but never formatted; nothing more to check.
                continue;
            }
            self.validate_region(nested, size - BACKPTR_SIZE)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_block_all_elements_empty() {
        let block = Block::new(4096, 3).unwrap();
        assert_eq!(block.block_size(), 4096);
        assert_eq!(block.n_elements(AllocRef::ROOT), 3);
        for i in 0..3 {
            assert_eq!(block.element_size(AllocRef::ROOT, i).unwrap(), 0);
            assert_eq!(block.element_kind(AllocRef::ROOT, i).unwrap(), ElemKind::Raw);
        }
        // 12 + 16 + 1 = 29 -> base 32
        assert_eq!(block.free_space(AllocRef::ROOT), 4096 - 32);
        assert_eq!(block.allocated(AllocRef::ROOT), 32);
    }

    #[test]
    fn test_min_region_size() {
        // 12 + 4 + 0 = 16
        assert_eq!(Block::min_region_size(0), 16);
        // 12 + 16 + 1 = 29 -> 32
        assert_eq!(Block::min_region_size(3), 32);
    }

    #[test]
    fn test_new_block_too_small() {
        let err = Block::new(8, 3).unwrap_err();
        assert!(matches!(err, BlockError::Bounds { .. }));
    }

    #[test]
    fn test_bounds_checked_accessors() {
        let block = Block::new(256, 2).unwrap();
        assert!(matches!(
            block.element_size(AllocRef::ROOT, 2),
            Err(BlockError::Bounds { index: 2, len: 2 })
        ));
        assert!(block.element_offset(AllocRef::ROOT, 2).is_ok()); // fence
        assert!(block.element_offset(AllocRef::ROOT, 3).is_err());
    }

    #[test]
    fn test_root_allocator_offset_is_zero() {
        let block = Block::new(256, 1).unwrap();
        assert_eq!(block.allocator_offset(AllocRef::ROOT), 0);
        assert!(block.parent_of(AllocRef::ROOT).unwrap().is_none());
    }

    #[test]
    fn test_serialize_roundtrip_empty() {
        let block = Block::new(512, 4).unwrap();
        let image = block.serialize();
        assert_eq!(image.len(), 512);
        let restored = Block::deserialize(&image).unwrap();
        assert_eq!(restored.serialize(), image);
    }

    #[test]
    fn test_deserialize_incomplete() {
        let block = Block::new(512, 4).unwrap();
        let image = block.serialize();
        assert!(matches!(
            Block::deserialize(&image[..8]),
            Err(BlockError::Incomplete(HEADER_SIZE))
        ));
        assert!(matches!(
            Block::deserialize(&image[..100]),
            Err(BlockError::Incomplete(512))
        ));
    }

    #[test]
    fn test_deserialize_rejects_non_monotone_offsets() {
        let block = Block::new(256, 2).unwrap();
        let mut image = block.serialize();
        // offsets live right after the 12-byte header; fence 1 < fence 0
        layout::write_u32(&mut image, HEADER_SIZE, 64);
        layout::write_u32(&mut image, HEADER_SIZE + 4, 8);
        let err = Block::deserialize(&image).unwrap_err();
        assert!(matches!(err, BlockError::Corrupt(_)));
    }

    #[test]
    fn test_deserialize_rejects_bad_layout_size() {
        let block = Block::new(256, 2).unwrap();
        let mut image = block.serialize();
        layout::write_u32(&mut image, 4, 7);
        assert!(matches!(
            Block::deserialize(&image),
            Err(BlockError::Corrupt(_))
        ));
    }

    #[test]
    fn test_set_limit() {
        let mut block = Block::deserialize(&Block::new(256, 1).unwrap().serialize()).unwrap();
        assert_eq!(block.limit(), 256);
        block.set_limit(1024).unwrap();
        assert_eq!(block.limit(), 1024);
        assert!(block.set_limit(16).is_err());
    }
}
