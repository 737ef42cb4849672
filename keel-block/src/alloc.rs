//! Allocator mutations: allocate, resize, free, import, and region growth.
//!
//! Every mutation keeps the offset table, the kind bitmap, and nested
//! back-pointers in lock-step. Growth computes the required space first and
//! fails before touching any bytes, so a failed operation never leaves a
//! partially shifted region behind.

use tracing::debug;

use crate::block::{AllocRef, Block, ElemKind};
use crate::error::{BlockError, Result};
use crate::layout::{self, BACKPTR_SIZE};

/// Result of a shift-and-relink pass over the elements after a resized one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShiftOutcome {
    /// Later elements whose bytes moved.
    pub shifted: usize,
    /// Nested allocators whose back-pointers were re-stamped.
    pub relinked: usize,
}

impl Block {
    /// Allocate element `idx`, currently empty, at `size` bytes (rounded up
    /// to the alignment quantum). Enlarges the region first when the free
    /// space is short, cascading into the parent for nested regions. For
    /// [`ElemKind::Allocatable`] the element's back-pointer prefix is
    /// stamped; the nested region itself is formatted by
    /// [`Block::init_nested`].
    ///
    /// A zero `size` is a programming error.
    pub fn allocate(
        &mut self,
        region: AllocRef,
        idx: usize,
        size: usize,
        kind: ElemKind,
    ) -> Result<ShiftOutcome> {
        debug_assert!(size > 0, "zero-size allocate is a programming error");
        debug_assert_eq!(
            self.element_size(region, idx)?,
            0,
            "allocate over a non-empty element"
        );
        let outcome = self.resize(region, idx, size)?;
        let r = region.offset() as usize;
        layout::bitmap_set(&mut self.buf, r, idx, kind == ElemKind::Allocatable);
        if kind == ElemKind::Allocatable {
            self.stamp_backptr(region, idx)?;
        }
        Ok(outcome)
    }

    /// Allocate element `idx` as a nested allocator of `n_elements` and
    /// format it in one step. `size` covers the back-pointer prefix plus the
    /// nested region.
    pub fn allocate_nested(
        &mut self,
        region: AllocRef,
        idx: usize,
        size: usize,
        n_elements: usize,
    ) -> Result<AllocRef> {
        let min = BACKPTR_SIZE + Block::min_region_size(n_elements);
        if size < min {
            return Err(BlockError::Bounds { index: size, len: min });
        }
        self.allocate(region, idx, size, ElemKind::Allocatable)?;
        self.init_nested(region, idx, n_elements)
    }

    /// Format the nested region inside allocatable element `idx`. The
    /// element must already be allocated; its back-pointer prefix is left
    /// untouched.
    pub fn init_nested(
        &mut self,
        region: AllocRef,
        idx: usize,
        n_elements: usize,
    ) -> Result<AllocRef> {
        let nested = self.nested_region(region, idx)?;
        let span = self.element_size(region, idx)? - BACKPTR_SIZE;
        if span < Block::min_region_size(n_elements) {
            return Err(BlockError::Bounds {
                index: span,
                len: Block::min_region_size(n_elements),
            });
        }
        self.format_region(nested.offset() as usize, span, n_elements);
        Ok(nested)
    }

    /// Resize element `idx` to `new_size` bytes (rounded up). Positive
    /// deltas grow the region first if needed (cascading to the parent),
    /// shift every later element forward, and zero-fill the fresh bytes.
    /// Negative deltas shift back and zero the vacated tail. Offsets,
    /// bitmap, and nested back-pointers stay in lock-step.
    pub fn resize(&mut self, region: AllocRef, idx: usize, new_size: usize) -> Result<ShiftOutcome> {
        let n = self.n_elements(region);
        if idx >= n {
            return Err(BlockError::Bounds { index: idx, len: n });
        }
        let new_size = layout::round_up(new_size);
        let old_size = self.element_size(region, idx)?;
        if new_size == old_size {
            return Ok(ShiftOutcome::default());
        }

        if new_size > old_size {
            let delta = new_size - old_size;
            let free = self.free_space(region);
            if delta > free {
                self.enlarge(region, delta - free)?;
            }
        }

        let r = region.offset() as usize;
        let base = r + layout::data_base(&self.buf, r);
        let tail_start = base + layout::element_offset(&self.buf, r, idx + 1);
        let tail_end = base + layout::element_offset(&self.buf, r, n);

        if new_size > old_size {
            let delta = new_size - old_size;
            self.buf.copy_within(tail_start..tail_end, tail_start + delta);
            let gap = base + layout::element_offset(&self.buf, r, idx) + old_size;
            self.buf[gap..gap + delta].fill(0);
            for j in idx + 1..=n {
                let off = layout::element_offset(&self.buf, r, j);
                layout::set_element_offset(&mut self.buf, r, j, off + delta);
            }
        } else {
            let delta = old_size - new_size;
            self.buf.copy_within(tail_start..tail_end, tail_start - delta);
            for j in idx + 1..=n {
                let off = layout::element_offset(&self.buf, r, j);
                layout::set_element_offset(&mut self.buf, r, j, off - delta);
            }
            // Zero the vacated tail so logically equal blocks serialize
            // identically.
            let new_end = base + layout::element_offset(&self.buf, r, n);
            self.buf[new_end..new_end + delta].fill(0);
        }

        // An allocatable element regrown from empty has a zeroed prefix;
        // its start never moves, so stamping is idempotent otherwise.
        if layout::bitmap_get(&self.buf, r, idx) && new_size >= BACKPTR_SIZE {
            self.stamp_backptr(region, idx)?;
        }

        self.relink_after(region, idx)
    }

    /// Free element `idx`: resize to zero and clear its kind bit.
    pub fn free(&mut self, region: AllocRef, idx: usize) -> Result<ShiftOutcome> {
        let outcome = self.resize(region, idx, 0)?;
        let r = region.offset() as usize;
        layout::bitmap_set(&mut self.buf, r, idx, false);
        Ok(outcome)
    }

    /// Copy one element's bytes wholesale from another allocator instance,
    /// preserving its kind. Used for packed-structure splitting/merging and
    /// cross-container copy.
    pub fn import_element(
        &mut self,
        region: AllocRef,
        idx: usize,
        src: &Block,
        src_region: AllocRef,
        src_idx: usize,
    ) -> Result<ShiftOutcome> {
        let src_size = src.element_size(src_region, src_idx)?;
        let src_kind = src.element_kind(src_region, src_idx)?;
        let outcome = self.resize(region, idx, src_size)?;
        let r = region.offset() as usize;
        layout::bitmap_set(&mut self.buf, r, idx, src_kind == ElemKind::Allocatable);
        if src_size > 0 {
            let (src_start, src_end) = src.element_abs_range(src_region, src_idx)?;
            let dst = self.element_bytes_mut(region, idx)?;
            dst[..src_size].copy_from_slice(&src.buf[src_start..src_end]);
        }
        // The copied back-pointer encodes the source's distances; re-stamp
        // for this region. Interior offsets are relative and survive as-is.
        if src_kind == ElemKind::Allocatable && src_size >= BACKPTR_SIZE {
            self.stamp_backptr(region, idx)?;
        }
        Ok(outcome)
    }

    /// Grow `region` by at least `min_delta` bytes: extend the owned buffer
    /// at the root (bounded by the block limit), or resize the enclosing
    /// element through the parent region, recursively.
    pub fn enlarge(&mut self, region: AllocRef, min_delta: usize) -> Result<()> {
        let delta = layout::round_up(min_delta);
        let r = region.offset() as usize;
        let bs = layout::block_size(&self.buf, r);
        match self.parent_of(region)? {
            None => {
                let new_size = bs + delta;
                if new_size > self.limit {
                    return Err(BlockError::OutOfMemory {
                        requested: new_size as u32,
                        limit: self.limit as u32,
                    });
                }
                self.buf.resize(new_size, 0);
                layout::set_block_size(&mut self.buf, 0, new_size);
                debug!(new_size, "grew root block");
            }
            Some((parent, idx)) => {
                let elem_size = self.element_size(parent, idx)?;
                debug!(
                    region = r,
                    delta, "growing nested region through parent"
                );
                self.resize(parent, idx, elem_size + delta)?;
                layout::set_block_size(&mut self.buf, r, bs + delta);
            }
        }
        Ok(())
    }

    /// Re-stamp the back-pointer prefix of allocatable element `idx`.
    fn stamp_backptr(&mut self, region: AllocRef, idx: usize) -> Result<()> {
        let r = region.offset() as usize;
        let (start, end) = self.element_abs_range(region, idx)?;
        if end - start < BACKPTR_SIZE {
            return Err(BlockError::Corrupt("allocatable element too small"));
        }
        layout::write_u32(&mut self.buf, start, (start - r) as u32);
        layout::write_u32(&mut self.buf, start + 4, 0);
        Ok(())
    }

    /// Shift bookkeeping: count moved elements after `idx` and re-stamp the
    /// back-pointers of any nested allocators among them.
    fn relink_after(&mut self, region: AllocRef, idx: usize) -> Result<ShiftOutcome> {
        let r = region.offset() as usize;
        let n = layout::n_elements(&self.buf, r);
        let mut outcome = ShiftOutcome::default();
        for j in idx + 1..n {
            if layout::element_size(&self.buf, r, j) == 0 {
                continue;
            }
            outcome.shifted += 1;
            if layout::bitmap_get(&self.buf, r, j) {
                self.stamp_backptr(region, j)?;
                outcome.relinked += 1;
            }
        }
        Ok(outcome)
    }
}

// ============================================================================
// Tests
// ============================================================================
