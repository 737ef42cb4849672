//! Packed summary tree: a reducible accumulator index over an array of keys.
//!
//! A [`SummaryTree`] lives inside one allocatable element of a block, as a
//! nested allocator with three elements:
//!
//! ```text
//! [0] metadata (16 bytes):
//!     size:              u32  [0..4]    current key count
//!     values_per_branch: u16  [4..6]    keys reduced per first-line cell
//!     branching_factor:  u16  [6..8]    cells reduced per higher-line cell
//!     reduce_kind:       u32  [8..12]   0 = sum, 1 = max
//!     reserved:          u32  [12..16]
//! [1] index lines: i64 LE cells, all levels in one flat array
//! [2] raw keys:    i64 LE
//! ```
//!
//! Index lines are stored back-to-front: the root line first, the widest
//! line last, so the flat start offset of a line decreases as its level
//! increases and a parent cell's position is its child position scaled and
//! shifted by the running line start. The whole index is rebuilt by
//! [`SummaryTree::reindex`] after any structural mutation; incremental
//! maintenance is not attempted.
//!
//! Search ([`SummaryTree::find_fw`]/[`find_bw`](SummaryTree::find_bw))
//! walks up from the start position's base group, scans at most one group
//! of cells per line, and descends where the target falls inside a cell:
//! amortized O(log n) with no heap allocation. Rank-style search requires
//! non-negative keys (monotone prefix sums); `sum`/`max_in` have no such
//! restriction.

use tracing::debug;

use keel_block::{AllocRef, Block, ElemKind};

use crate::error::{IndexError, Result};
use crate::walk::{SearchKind, WalkResult};

/// Element slots inside the tree's nested allocator.
const ELEM_META: usize = 0;
const ELEM_INDEX: usize = 1;
const ELEM_KEYS: usize = 2;

const META_SIZE: usize = 16;

/// Upper bound on index height; with a branching factor of at least 2 the
/// flat index for any block-sized key array stays far below this.
const MAX_HEIGHT: usize = 32;

/// Reduction applied when building index cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    /// Ordinary addition; supports prefix sums and rank search.
    Sum = 0,
    /// Element-wise max; supports range max and sorted-key location.
    Max = 1,
}

impl ReduceKind {
    fn from_u32(v: u32) -> Option<ReduceKind> {
        match v {
            0 => Some(ReduceKind::Sum),
            1 => Some(ReduceKind::Max),
            _ => None,
        }
    }
}

/// Tree shape parameters, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Keys reduced into one first-line cell.
    pub values_per_branch: u16,
    /// Cells reduced into one higher-line cell.
    pub branching_factor: u16,
    pub kind: ReduceKind,
}

impl Default for TreeConfig {
    fn default() -> TreeConfig {
        TreeConfig {
            values_per_branch: 32,
            branching_factor: 32,
            kind: ReduceKind::Sum,
        }
    }
}

/// Handle to a summary tree stored in element `idx` of `parent`. The
/// handle addresses the element, not its bytes, so it stays valid while
/// sibling elements move; re-derive nothing after shifts.
#[derive(Debug, Clone, Copy)]
pub struct SummaryTree {
    parent: AllocRef,
    idx: usize,
}

impl SummaryTree {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create an empty tree in element `idx` of `parent` (which must be an
    /// unallocated slot). The element is allocated as a nested allocator
    /// and formatted with empty index and key arrays.
    pub fn create(
        block: &mut Block,
        parent: AllocRef,
        idx: usize,
        cfg: TreeConfig,
    ) -> Result<SummaryTree> {
        if cfg.values_per_branch < 2 || cfg.branching_factor < 2 {
            return Err(IndexError::Metadata("fan-out must be at least 2"));
        }
        let size = keel_block::layout::BACKPTR_SIZE
            + Block::min_region_size(3)
            + keel_block::round_up(META_SIZE);
        let region = block.allocate_nested(parent, idx, size, 3)?;
        block.allocate(region, ELEM_META, META_SIZE, ElemKind::Raw)?;

        let meta = block.element_bytes_mut(region, ELEM_META)?;
        meta[0..4].copy_from_slice(&0u32.to_le_bytes());
        meta[4..6].copy_from_slice(&cfg.values_per_branch.to_le_bytes());
        meta[6..8].copy_from_slice(&cfg.branching_factor.to_le_bytes());
        meta[8..12].copy_from_slice(&(cfg.kind as u32).to_le_bytes());
        Ok(SummaryTree { parent, idx })
    }

    /// Open and validate a tree previously created in element `idx` of
    /// `parent` (e.g. after deserializing the block).
    pub fn open(block: &Block, parent: AllocRef, idx: usize) -> Result<SummaryTree> {
        let tree = SummaryTree { parent, idx };
        let region = tree.region(block)?;
        if block.n_elements(region) != 3 {
            return Err(IndexError::Metadata("summary tree needs 3 elements"));
        }
        if block.element_size(region, ELEM_META)? < META_SIZE {
            return Err(IndexError::Metadata("metadata element too small"));
        }
        let cfg = tree.config(block)?;
        if cfg.values_per_branch < 2 || cfg.branching_factor < 2 {
            return Err(IndexError::Metadata("fan-out must be at least 2"));
        }
        let n = tree.len(block)?;
        if n * 8 > block.element_size(region, ELEM_KEYS)? {
            return Err(IndexError::Metadata("key count exceeds key element"));
        }
        block.check_element_alignment(region, ELEM_KEYS, 8)?;
        Ok(tree)
    }

    /// The nested allocator region holding this tree.
    pub fn region(&self, block: &Block) -> Result<AllocRef> {
        Ok(block.nested_region(self.parent, self.idx)?)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Current key count.
    pub fn len(&self, block: &Block) -> Result<usize> {
        let region = self.region(block)?;
        let meta = block.element_bytes(region, ELEM_META)?;
        Ok(u32::from_le_bytes(meta[0..4].try_into().unwrap()) as usize)
    }

    pub fn is_empty(&self, block: &Block) -> Result<bool> {
        Ok(self.len(block)? == 0)
    }

    pub fn config(&self, block: &Block) -> Result<TreeConfig> {
        let region = self.region(block)?;
        let meta = block.element_bytes(region, ELEM_META)?;
        let kind = u32::from_le_bytes(meta[8..12].try_into().unwrap());
        Ok(TreeConfig {
            values_per_branch: u16::from_le_bytes(meta[4..6].try_into().unwrap()),
            branching_factor: u16::from_le_bytes(meta[6..8].try_into().unwrap()),
            kind: ReduceKind::from_u32(kind)
                .ok_or(IndexError::Metadata("unknown reduce kind"))?,
        })
    }

    fn set_len(&self, block: &mut Block, n: usize) -> Result<()> {
        let region = self.region(block)?;
        let meta = block.element_bytes_mut(region, ELEM_META)?;
        meta[0..4].copy_from_slice(&(n as u32).to_le_bytes());
        Ok(())
    }

    // ========================================================================
    // Key access and mutation
    // ========================================================================

    pub fn get(&self, block: &Block, pos: usize) -> Result<i64> {
        let n = self.len(block)?;
        if pos >= n {
            return Err(IndexError::Position { pos, len: n });
        }
        let region = self.region(block)?;
        let keys = block.element_bytes(region, ELEM_KEYS)?;
        Ok(read_i64(keys, pos))
    }

    /// Overwrite the key at `pos`. The index is stale until the next
    /// [`SummaryTree::reindex`].
    pub fn set(&self, block: &mut Block, pos: usize, value: i64) -> Result<()> {
        let n = self.len(block)?;
        if pos >= n {
            return Err(IndexError::Position { pos, len: n });
        }
        let region = self.region(block)?;
        let keys = block.element_bytes_mut(region, ELEM_KEYS)?;
        write_i64(keys, pos, value);
        Ok(())
    }

    /// Insert `value` at `pos`, shifting later keys right. Grows the key
    /// element through the allocator (cascading into the parent block when
    /// the nested region is full).
    pub fn insert(&self, block: &mut Block, pos: usize, value: i64) -> Result<()> {
        self.insert_many(block, pos, &[value])
    }

    /// Append `values` at the end.
    pub fn extend(&self, block: &mut Block, values: &[i64]) -> Result<()> {
        let n = self.len(block)?;
        self.insert_many(block, n, values)
    }

    /// Splice `values` in at `pos`.
    pub fn insert_many(&self, block: &mut Block, pos: usize, values: &[i64]) -> Result<()> {
        let n = self.len(block)?;
        if pos > n {
            return Err(IndexError::Position { pos, len: n });
        }
        if values.is_empty() {
            return Ok(());
        }
        let region = self.region(block)?;
        block.resize(region, ELEM_KEYS, (n + values.len()) * 8)?;
        let keys = block.element_bytes_mut(region, ELEM_KEYS)?;
        keys.copy_within(pos * 8..n * 8, (pos + values.len()) * 8);
        for (i, &v) in values.iter().enumerate() {
            write_i64(keys, pos + i, v);
        }
        self.set_len(block, n + values.len())
    }

    /// Remove keys in `[from, to)`, shifting later keys left and shrinking
    /// the key element.
    pub fn remove(&self, block: &mut Block, from: usize, to: usize) -> Result<()> {
        let n = self.len(block)?;
        if from > to || to > n {
            return Err(IndexError::Position { pos: to, len: n });
        }
        if from == to {
            return Ok(());
        }
        let region = self.region(block)?;
        let keys = block.element_bytes_mut(region, ELEM_KEYS)?;
        keys.copy_within(to * 8..n * 8, from * 8);
        let removed = to - from;
        block.resize(region, ELEM_KEYS, (n - removed) * 8)?;
        self.set_len(block, n - removed)
    }

    // ========================================================================
    // Reindex
    // ========================================================================

    /// Rebuild every index line from the raw keys. Idempotent; called after
    /// any structural mutation.
    pub fn reindex(&self, block: &mut Block) -> Result<()> {
        let n = self.len(block)?;
        let cfg = self.config(block)?;
        let lines = Lines::compute(n, cfg.values_per_branch as usize, cfg.branching_factor as usize);
        let region = self.region(block)?;
        block.resize(region, ELEM_INDEX, lines.total * 8)?;
        if n == 0 {
            return Ok(());
        }
        debug!(keys = n, lines = lines.count, "rebuilding summary index");

        let mut cells = vec![identity(cfg.kind); lines.total];
        {
            let region = self.region(block)?;
            let keys = block.element_bytes(region, ELEM_KEYS)?;
            let vpb = cfg.values_per_branch as usize;
            for g in 0..lines.sizes[0] {
                let from = g * vpb;
                let to = (from + vpb).min(n);
                let mut acc = identity(cfg.kind);
                for p in from..to {
                    acc = reduce(cfg.kind, acc, read_i64(keys, p));
                }
                cells[lines.starts[0] + g] = acc;
            }
        }
        let bf = cfg.branching_factor as usize;
        for j in 1..lines.count {
            for g in 0..lines.sizes[j] {
                let from = g * bf;
                let to = (from + bf).min(lines.sizes[j - 1]);
                let mut acc = identity(cfg.kind);
                for c in from..to {
                    acc = reduce(cfg.kind, acc, cells[lines.starts[j - 1] + c]);
                }
                cells[lines.starts[j] + g] = acc;
            }
        }

        let region = self.region(block)?;
        let index = block.element_bytes_mut(region, ELEM_INDEX)?;
        for (i, &c) in cells.iter().enumerate() {
            write_i64(index, i, c);
        }
        Ok(())
    }

    // ========================================================================
    // Range queries
    // ========================================================================

    /// Prefix-structured range sum over `[from, to)` in O(log n): whole
    /// interior groups resolve from index lines, boundary fragments from
    /// raw keys. Sum trees only.
    pub fn sum(&self, block: &Block, from: usize, to: usize) -> Result<i64> {
        let ctx = self.ctx(block)?;
        if ctx.kind != ReduceKind::Sum {
            return Err(IndexError::Metadata("sum on a max tree"));
        }
        ctx.check_range(from, to)?;
        if from == to {
            return Ok(0);
        }
        Ok(ctx.range_reduce(0, from, to))
    }

    /// Range max over `[from, to)`; `None` for an empty range. Max trees
    /// only.
    pub fn max_in(&self, block: &Block, from: usize, to: usize) -> Result<Option<i64>> {
        let ctx = self.ctx(block)?;
        if ctx.kind != ReduceKind::Max {
            return Err(IndexError::Metadata("max_in on a sum tree"));
        }
        ctx.check_range(from, to)?;
        if from == to {
            return Ok(None);
        }
        Ok(Some(ctx.range_reduce(0, from, to)))
    }

    // ========================================================================
    // Rank search (sum trees)
    // ========================================================================

    /// Forward rank search from `start`: locate where the running sum of
    /// keys meets `target` under `kind`. See [`WalkResult`] for the result
    /// semantics; requires non-negative keys.
    pub fn find_fw(
        &self,
        block: &Block,
        start: usize,
        kind: SearchKind,
        target: i64,
    ) -> Result<WalkResult> {
        let ctx = self.ctx(block)?;
        if ctx.kind != ReduceKind::Sum {
            return Err(IndexError::Metadata("rank search on a max tree"));
        }
        Ok(ctx.find_fw(start, kind, target))
    }

    /// Backward rank search from `start` (clamped to the last key) down
    /// toward position 0.
    pub fn find_bw(
        &self,
        block: &Block,
        start: usize,
        kind: SearchKind,
        target: i64,
    ) -> Result<WalkResult> {
        let ctx = self.ctx(block)?;
        if ctx.kind != ReduceKind::Sum {
            return Err(IndexError::Metadata("rank search on a max tree"));
        }
        Ok(ctx.find_bw(start, kind, target))
    }

    // ========================================================================
    // Key location (max trees)
    // ========================================================================

    /// First position at or after `start` whose key satisfies `kind`
    /// against `key` (`Ge`/`Gt` only). On sorted keys this is the
    /// lower/upper bound; the max index skips whole groups.
    pub fn locate_fw(
        &self,
        block: &Block,
        start: usize,
        kind: SearchKind,
        key: i64,
    ) -> Result<Option<usize>> {
        let ctx = self.ctx(block)?;
        if ctx.kind != ReduceKind::Max {
            return Err(IndexError::Metadata("locate on a sum tree"));
        }
        if !matches!(kind, SearchKind::Ge | SearchKind::Gt) {
            return Err(IndexError::Metadata("locate supports Ge and Gt"));
        }
        Ok(ctx.locate_fw(start, kind, key))
    }

    fn ctx<'a>(&self, block: &'a Block) -> Result<TreeCtx<'a>> {
        let region = self.region(block)?;
        let n = self.len(block)?;
        let cfg = self.config(block)?;
        let lines = Lines::compute(
            n,
            cfg.values_per_branch as usize,
            cfg.branching_factor as usize,
        );
        let index = block.element_bytes(region, ELEM_INDEX)?;
        if index.len() < lines.total * 8 {
            return Err(IndexError::Metadata("summary index stale; reindex required"));
        }
        Ok(TreeCtx {
            keys: block.element_bytes(region, ELEM_KEYS)?,
            index,
            n,
            vpb: cfg.values_per_branch as usize,
            bf: cfg.branching_factor as usize,
            kind: cfg.kind,
            lines,
        })
    }
}

// ============================================================================
// Line geometry
// ============================================================================

/// Sizes and flat start offsets of every index line. Line 0 is the widest
/// (reduces raw keys); the last line is the single-cell root, stored first
/// in the flat array.
#[derive(Debug, Clone, Copy)]
struct Lines {
    sizes: [usize; MAX_HEIGHT],
    starts: [usize; MAX_HEIGHT],
    count: usize,
    total: usize,
}

impl Lines {
    fn compute(n: usize, vpb: usize, bf: usize) -> Lines {
        let mut lines = Lines {
            sizes: [0; MAX_HEIGHT],
            starts: [0; MAX_HEIGHT],
            count: 0,
            total: 0,
        };
        if n == 0 {
            return lines;
        }
        let mut l = n.div_ceil(vpb);
        lines.sizes[0] = l;
        lines.count = 1;
        while l > 1 {
            l = l.div_ceil(bf);
            lines.sizes[lines.count] = l;
            lines.count += 1;
        }
        // Flat order is top line first; a line starts after every line
        // above it.
        let mut start = 0usize;
        for j in (0..lines.count).rev() {
            lines.starts[j] = start;
            start += lines.sizes[j];
        }
        lines.total = start;
        lines
    }
}

#[inline]
fn read_i64(bytes: &[u8], pos: usize) -> i64 {
    i64::from_le_bytes(bytes[pos * 8..pos * 8 + 8].try_into().unwrap())
}

#[inline]
fn write_i64(bytes: &mut [u8], pos: usize, value: i64) {
    bytes[pos * 8..pos * 8 + 8].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn identity(kind: ReduceKind) -> i64 {
    match kind {
        ReduceKind::Sum => 0,
        ReduceKind::Max => i64::MIN,
    }
}

#[inline]
fn reduce(kind: ReduceKind, a: i64, b: i64) -> i64 {
    match kind {
        ReduceKind::Sum => a + b,
        ReduceKind::Max => a.max(b),
    }
}

// ============================================================================
// Read-side context
// ============================================================================

/// Borrowed view over one tree's keys and index, with the line geometry
/// precomputed. All query algorithms run here, allocation-free.
struct TreeCtx<'a> {
    keys: &'a [u8],
    index: &'a [u8],
    n: usize,
    vpb: usize,
    bf: usize,
    kind: ReduceKind,
    lines: Lines,
}

impl TreeCtx<'_> {
    #[inline]
    fn key(&self, p: usize) -> i64 {
        read_i64(self.keys, p)
    }

    /// Cell `i` of line `j` (0-based line; 0 reduces raw keys).
    #[inline]
    fn cell(&self, j: usize, i: usize) -> i64 {
        read_i64(self.index, self.lines.starts[j] + i)
    }

    fn check_range(&self, from: usize, to: usize) -> Result<()> {
        if from > to || to > self.n {
            return Err(IndexError::Position {
                pos: to.max(from),
                len: self.n,
            });
        }
        Ok(())
    }

    /// Reduce `[from, to)` at `level` (0 = raw keys, `j + 1` = line `j`):
    /// boundary fragments scan one group each, whole interior groups
    /// resolve one level up.
    fn range_reduce(&self, level: usize, from: usize, to: usize) -> i64 {
        debug_assert!(from < to);
        let group = if level == 0 { self.vpb } else { self.bf };
        let gf = from / group;
        let gl = (to - 1) / group;
        if gf == gl {
            return self.scan_reduce(level, from, to);
        }
        let mut acc = self.scan_reduce(level, from, (gf + 1) * group);
        if gf + 1 < gl {
            acc = reduce(self.kind, acc, self.range_reduce(level + 1, gf + 1, gl));
        }
        reduce(self.kind, acc, self.scan_reduce(level, gl * group, to))
    }

    fn scan_reduce(&self, level: usize, from: usize, to: usize) -> i64 {
        let mut acc = identity(self.kind);
        for p in from..to {
            let v = if level == 0 {
                self.key(p)
            } else {
                self.cell(level - 1, p)
            };
            acc = reduce(self.kind, acc, v);
        }
        acc
    }

    // ------------------------------------------------------------------------
    // Forward rank search
    // ------------------------------------------------------------------------

    /// Does the running sum meet the target once `v` is consumed? For
    /// `Ge`/`Gt` this finds the stop cell; for `Le`/`Lt` it detects the
    /// first overshoot.
    #[inline]
    fn crosses(kind: SearchKind, s: i64, v: i64, target: i64) -> bool {
        match kind {
            SearchKind::Ge | SearchKind::Lt => s + v >= target,
            SearchKind::Gt | SearchKind::Le => s + v > target,
        }
    }

    fn hit_fw(kind: SearchKind, p: usize, start: usize, s: i64, v: i64) -> WalkResult {
        match kind {
            SearchKind::Ge | SearchKind::Gt => WalkResult::Found {
                pos: p,
                prefix: s + v,
            },
            SearchKind::Le | SearchKind::Lt => {
                if p == start {
                    WalkResult::End { prefix: 0 }
                } else {
                    WalkResult::Found {
                        pos: p - 1,
                        prefix: s,
                    }
                }
            }
        }
    }

    fn find_fw(&self, start: usize, kind: SearchKind, target: i64) -> WalkResult {
        if start >= self.n {
            return WalkResult::End { prefix: 0 };
        }
        let mut s = 0i64;

        // Finish the base group holding `start`.
        let g0 = start / self.vpb;
        let g0_end = ((g0 + 1) * self.vpb).min(self.n);
        for p in start..g0_end {
            let v = self.key(p);
            if Self::crosses(kind, s, v, target) {
                return Self::hit_fw(kind, p, start, s, v);
            }
            s += v;
        }

        // Ascend: one group of cells per line, descending where the target
        // falls inside a cell.
        let mut level = 1usize;
        let mut cell = g0 + 1;
        while level <= self.lines.count {
            let lsz = self.lines.sizes[level - 1];
            let scan_end = if level == self.lines.count {
                lsz
            } else {
                (((cell / self.bf) + 1) * self.bf).min(lsz)
            };
            for p in cell..scan_end {
                let v = self.cell(level - 1, p);
                if Self::crosses(kind, s, v, target) {
                    return self.descend_fw(kind, target, level, p, s, start);
                }
                s += v;
            }
            if level == self.lines.count {
                return WalkResult::End { prefix: s };
            }
            cell = cell / self.bf + 1;
            level += 1;
        }
        WalkResult::End { prefix: s }
    }

    /// The target falls inside `cell` at `level` (1-based); `s` excludes
    /// it. Narrow down to the exact key. The reduction invariant guarantees
    /// the crossing re-fires at every level.
    fn descend_fw(
        &self,
        kind: SearchKind,
        target: i64,
        mut level: usize,
        mut cell: usize,
        mut s: i64,
        start: usize,
    ) -> WalkResult {
        while level > 1 {
            let from = cell * self.bf;
            let to = (from + self.bf).min(self.lines.sizes[level - 2]);
            level -= 1;
            let mut next = None;
            for p in from..to {
                let v = self.cell(level - 1, p);
                if Self::crosses(kind, s, v, target) {
                    next = Some(p);
                    break;
                }
                s += v;
            }
            debug_assert!(next.is_some(), "index line inconsistent with keys");
            match next {
                Some(p) => cell = p,
                None => return WalkResult::End { prefix: s },
            }
        }
        let from = cell * self.vpb;
        let to = (from + self.vpb).min(self.n);
        for p in from..to {
            let v = self.key(p);
            if Self::crosses(kind, s, v, target) {
                return Self::hit_fw(kind, p, start, s, v);
            }
            s += v;
        }
        debug_assert!(false, "index line inconsistent with keys");
        WalkResult::End { prefix: s }
    }

    // ------------------------------------------------------------------------
    // Backward rank search
    // ------------------------------------------------------------------------

    fn hit_bw(kind: SearchKind, p: usize, start: usize, s: i64, v: i64) -> WalkResult {
        match kind {
            SearchKind::Ge | SearchKind::Gt => WalkResult::Found {
                pos: p,
                prefix: s + v,
            },
            SearchKind::Le | SearchKind::Lt => {
                if p == start {
                    WalkResult::End { prefix: 0 }
                } else {
                    WalkResult::Found {
                        pos: p + 1,
                        prefix: s,
                    }
                }
            }
        }
    }

    fn find_bw(&self, start: usize, kind: SearchKind, target: i64) -> WalkResult {
        if self.n == 0 {
            return WalkResult::End { prefix: 0 };
        }
        let start = start.min(self.n - 1);
        let mut s = 0i64;

        // Finish the base group holding `start`, scanning down.
        let g0 = start / self.vpb;
        for p in (g0 * self.vpb..=start).rev() {
            let v = self.key(p);
            if Self::crosses(kind, s, v, target) {
                return Self::hit_bw(kind, p, start, s, v);
            }
            s += v;
        }
        if g0 == 0 {
            return WalkResult::End { prefix: s };
        }

        let mut level = 1usize;
        let mut cell = g0 - 1;
        loop {
            let group_begin = if level == self.lines.count {
                0
            } else {
                (cell / self.bf) * self.bf
            };
            for p in (group_begin..=cell).rev() {
                let v = self.cell(level - 1, p);
                if Self::crosses(kind, s, v, target) {
                    return self.descend_bw(kind, target, level, p, s, start);
                }
                s += v;
            }
            if level == self.lines.count || group_begin == 0 {
                return WalkResult::End { prefix: s };
            }
            cell = cell / self.bf - 1;
            level += 1;
        }
    }

    fn descend_bw(
        &self,
        kind: SearchKind,
        target: i64,
        mut level: usize,
        mut cell: usize,
        mut s: i64,
        start: usize,
    ) -> WalkResult {
        while level > 1 {
            let from = cell * self.bf;
            let to = (from + self.bf).min(self.lines.sizes[level - 2]);
            level -= 1;
            let mut next = None;
            for p in (from..to).rev() {
                let v = self.cell(level - 1, p);
                if Self::crosses(kind, s, v, target) {
                    next = Some(p);
                    break;
                }
                s += v;
            }
            debug_assert!(next.is_some(), "index line inconsistent with keys");
            match next {
                Some(p) => cell = p,
                None => return WalkResult::End { prefix: s },
            }
        }
        let from = cell * self.vpb;
        let to = (from + self.vpb).min(self.n);
        for p in (from..to).rev() {
            let v = self.key(p);
            if Self::crosses(kind, s, v, target) {
                return Self::hit_bw(kind, p, start, s, v);
            }
            s += v;
        }
        debug_assert!(false, "index line inconsistent with keys");
        WalkResult::End { prefix: s }
    }

    // ------------------------------------------------------------------------
    // Key location (max trees)
    // ------------------------------------------------------------------------

    #[inline]
    fn satisfies(kind: SearchKind, v: i64, key: i64) -> bool {
        match kind {
            SearchKind::Ge => v >= key,
            SearchKind::Gt => v > key,
            _ => unreachable!("locate supports Ge and Gt"),
        }
    }

    fn locate_fw(&self, start: usize, kind: SearchKind, key: i64) -> Option<usize> {
        if start >= self.n {
            return None;
        }
        let g0 = start / self.vpb;
        let g0_end = ((g0 + 1) * self.vpb).min(self.n);
        for p in start..g0_end {
            if Self::satisfies(kind, self.key(p), key) {
                return Some(p);
            }
        }

        let mut level = 1usize;
        let mut cell = g0 + 1;
        while level <= self.lines.count {
            let lsz = self.lines.sizes[level - 1];
            let scan_end = if level == self.lines.count {
                lsz
            } else {
                (((cell / self.bf) + 1) * self.bf).min(lsz)
            };
            for p in cell..scan_end {
                if Self::satisfies(kind, self.cell(level - 1, p), key) {
                    return self.descend_locate(kind, key, level, p);
                }
            }
            if level == self.lines.count {
                return None;
            }
            cell = cell / self.bf + 1;
            level += 1;
        }
        None
    }

    fn descend_locate(
        &self,
        kind: SearchKind,
        key: i64,
        mut level: usize,
        mut cell: usize,
    ) -> Option<usize> {
        while level > 1 {
            let from = cell * self.bf;
            let to = (from + self.bf).min(self.lines.sizes[level - 2]);
            level -= 1;
            cell = (from..to).find(|&p| Self::satisfies(kind, self.cell(level - 1, p), key))?;
        }
        let from = cell * self.vpb;
        let to = (from + self.vpb).min(self.n);
        (from..to).find(|&p| Self::satisfies(kind, self.key(p), key))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use keel_block::AllocRef;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const ROOT: AllocRef = AllocRef::ROOT;

    fn small_cfg(kind: ReduceKind) -> TreeConfig {
        TreeConfig {
            values_per_branch: 4,
            branching_factor: 4,
            kind,
        }
    }

    fn tree_with(keys: &[i64], cfg: TreeConfig) -> (Block, SummaryTree) {
        let mut block = Block::with_limit(256, 1 << 20, 1).unwrap();
        let tree = SummaryTree::create(&mut block, ROOT, 0, cfg).unwrap();
        tree.extend(&mut block, keys).unwrap();
        tree.reindex(&mut block).unwrap();
        (block, tree)
    }

    // ---- Reference implementations ----

    fn naive_find_fw(keys: &[i64], start: usize, kind: SearchKind, target: i64) -> WalkResult {
        let mut s = 0i64;
        for (p, &v) in keys.iter().enumerate().skip(start) {
            if TreeCtx::crosses(kind, s, v, target) {
                return TreeCtx::hit_fw(kind, p, start, s, v);
            }
            s += v;
        }
        WalkResult::End { prefix: s }
    }

    fn naive_find_bw(keys: &[i64], start: usize, kind: SearchKind, target: i64) -> WalkResult {
        if keys.is_empty() {
            return WalkResult::End { prefix: 0 };
        }
        let start = start.min(keys.len() - 1);
        let mut s = 0i64;
        for p in (0..=start).rev() {
            let v = keys[p];
            if TreeCtx::crosses(kind, s, v, target) {
                return TreeCtx::hit_bw(kind, p, start, s, v);
            }
            s += v;
        }
        WalkResult::End { prefix: s }
    }

    // ---- Construction and metadata ----

    #[test]
    fn test_create_and_open() {
        let (block, tree) = tree_with(&[], small_cfg(ReduceKind::Sum));
        assert_eq!(tree.len(&block).unwrap(), 0);
        assert!(tree.is_empty(&block).unwrap());

        let reopened = SummaryTree::open(&block, ROOT, 0).unwrap();
        let cfg = reopened.config(&block).unwrap();
        assert_eq!(cfg.values_per_branch, 4);
        assert_eq!(cfg.branching_factor, 4);
        assert_eq!(cfg.kind, ReduceKind::Sum);
    }

    #[test]
    fn test_create_rejects_degenerate_fanout() {
        let mut block = Block::new(512, 1).unwrap();
        let cfg = TreeConfig {
            values_per_branch: 1,
            branching_factor: 4,
            kind: ReduceKind::Sum,
        };
        assert!(SummaryTree::create(&mut block, ROOT, 0, cfg).is_err());
    }

    #[test]
    fn test_open_rejects_raw_element() {
        let mut block = Block::new(512, 1).unwrap();
        block.allocate(ROOT, 0, 64, keel_block::ElemKind::Raw).unwrap();
        assert!(SummaryTree::open(&block, ROOT, 0).is_err());
    }

    #[test]
    fn test_open_survives_serialize_roundtrip() {
        let (block, _) = tree_with(&[5, 3, 8, 1], small_cfg(ReduceKind::Sum));
        let restored = Block::deserialize(&block.serialize()).unwrap();
        let tree = SummaryTree::open(&restored, ROOT, 0).unwrap();
        assert_eq!(tree.len(&restored).unwrap(), 4);
        assert_eq!(tree.sum(&restored, 0, 4).unwrap(), 17);
    }

    // ---- Mutation ----

    #[test]
    fn test_insert_get_set_remove() {
        let (mut block, tree) = tree_with(&[10, 30], small_cfg(ReduceKind::Sum));
        tree.insert(&mut block, 1, 20).unwrap();
        assert_eq!(tree.len(&block).unwrap(), 3);
        assert_eq!(tree.get(&block, 0).unwrap(), 10);
        assert_eq!(tree.get(&block, 1).unwrap(), 20);
        assert_eq!(tree.get(&block, 2).unwrap(), 30);

        tree.set(&mut block, 1, 25).unwrap();
        assert_eq!(tree.get(&block, 1).unwrap(), 25);

        tree.remove(&mut block, 0, 2).unwrap();
        assert_eq!(tree.len(&block).unwrap(), 1);
        assert_eq!(tree.get(&block, 0).unwrap(), 30);

        assert!(tree.get(&block, 1).is_err());
        assert!(tree.set(&mut block, 1, 0).is_err());
    }

    #[test]
    fn test_keys_survive_sibling_shift() {
        // The tree sits in element 1; growing element 0 must not disturb it.
        let mut block = Block::with_limit(512, 1 << 16, 2).unwrap();
        block.allocate(ROOT, 0, 16, keel_block::ElemKind::Raw).unwrap();
        let tree = SummaryTree::create(&mut block, ROOT, 1, small_cfg(ReduceKind::Sum)).unwrap();
        tree.extend(&mut block, &[7, 7, 7]).unwrap();
        tree.reindex(&mut block).unwrap();

        block.resize(ROOT, 0, 256).unwrap();

        assert_eq!(tree.len(&block).unwrap(), 3);
        assert_eq!(tree.sum(&block, 0, 3).unwrap(), 21);
    }

    // ---- Nine ones, vpb = bf = 4 ----

    #[test]
    fn test_nine_ones_scenario() {
        let (block, tree) = tree_with(&[1; 9], small_cfg(ReduceKind::Sum));
        assert_eq!(tree.sum(&block, 0, 9).unwrap(), 9);

        let result = tree.find_fw(&block, 0, SearchKind::Le, 5).unwrap();
        assert_eq!(result, WalkResult::Found { pos: 4, prefix: 5 });

        let result = tree.find_fw(&block, 0, SearchKind::Ge, 5).unwrap();
        assert_eq!(result, WalkResult::Found { pos: 4, prefix: 5 });
    }

    // ---- Reindex ----

    #[test]
    fn test_reindex_idempotent() {
        let mut rng = StdRng::seed_from_u64(7);
        let keys: Vec<i64> = (0..137).map(|_| rng.gen_range(0..100)).collect();
        let (mut block, tree) = tree_with(&keys, small_cfg(ReduceKind::Sum));

        let first = block.serialize();
        tree.reindex(&mut block).unwrap();
        assert_eq!(block.serialize(), first);
    }

    #[test]
    fn test_reindex_after_remove_shrinks_index() {
        let (mut block, tree) = tree_with(&[1; 64], small_cfg(ReduceKind::Sum));
        tree.remove(&mut block, 0, 60).unwrap();
        tree.reindex(&mut block).unwrap();
        assert_eq!(tree.sum(&block, 0, 4).unwrap(), 4);

        let region = tree.region(&block).unwrap();
        // 4 keys, vpb 4 -> a single one-cell line.
        assert_eq!(block.element_size(region, ELEM_INDEX).unwrap(), 8);
    }

    #[test]
    fn test_empty_tree_queries() {
        let (block, tree) = tree_with(&[], small_cfg(ReduceKind::Sum));
        assert_eq!(tree.sum(&block, 0, 0).unwrap(), 0);
        assert_eq!(
            tree.find_fw(&block, 0, SearchKind::Ge, 1).unwrap(),
            WalkResult::End { prefix: 0 }
        );
        assert_eq!(
            tree.find_bw(&block, 0, SearchKind::Ge, 1).unwrap(),
            WalkResult::End { prefix: 0 }
        );
    }

    // ---- Sum correctness ----

    #[test]
    fn test_sum_matches_naive_random() {
        let mut rng = StdRng::seed_from_u64(0x50F7);
        for &n in &[1usize, 3, 4, 5, 16, 17, 64, 100, 257] {
            let keys: Vec<i64> = (0..n).map(|_| rng.gen_range(-50..50)).collect();
            let (block, tree) = tree_with(&keys, small_cfg(ReduceKind::Sum));

            for _ in 0..200 {
                let from = rng.gen_range(0..=n);
                let to = rng.gen_range(from..=n);
                let naive: i64 = keys[from..to].iter().sum();
                assert_eq!(tree.sum(&block, from, to).unwrap(), naive, "n={n} [{from},{to})");
            }
            assert_eq!(
                tree.sum(&block, 0, n).unwrap(),
                keys.iter().sum::<i64>()
            );
        }
    }

    #[test]
    fn test_sum_bounds_checked() {
        let (block, tree) = tree_with(&[1, 2, 3], small_cfg(ReduceKind::Sum));
        assert!(tree.sum(&block, 0, 4).is_err());
        assert!(tree.sum(&block, 2, 1).is_err());
    }

    // ---- Rank search ----

    #[test]
    fn test_find_fw_matches_naive_random() {
        let mut rng = StdRng::seed_from_u64(0xF1FD);
        for &n in &[1usize, 4, 9, 16, 17, 65, 200] {
            let keys: Vec<i64> = (0..n).map(|_| rng.gen_range(0..6)).collect();
            let (block, tree) = tree_with(&keys, small_cfg(ReduceKind::Sum));
            let total: i64 = keys.iter().sum();

            for kind in [SearchKind::Lt, SearchKind::Le, SearchKind::Gt, SearchKind::Ge] {
                for _ in 0..100 {
                    let start = rng.gen_range(0..=n);
                    let target = rng.gen_range(-1..=total + 1);
                    assert_eq!(
                        tree.find_fw(&block, start, kind, target).unwrap(),
                        naive_find_fw(&keys, start, kind, target),
                        "n={n} start={start} kind={kind:?} target={target}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_find_bw_matches_naive_random() {
        let mut rng = StdRng::seed_from_u64(0xB4CD);
        for &n in &[1usize, 4, 9, 16, 17, 65, 200] {
            let keys: Vec<i64> = (0..n).map(|_| rng.gen_range(0..6)).collect();
            let (block, tree) = tree_with(&keys, small_cfg(ReduceKind::Sum));
            let total: i64 = keys.iter().sum();

            for kind in [SearchKind::Lt, SearchKind::Le, SearchKind::Gt, SearchKind::Ge] {
                for _ in 0..100 {
                    let start = rng.gen_range(0..n);
                    let target = rng.gen_range(-1..=total + 1);
                    assert_eq!(
                        tree.find_bw(&block, start, kind, target).unwrap(),
                        naive_find_bw(&keys, start, kind, target),
                        "n={n} start={start} kind={kind:?} target={target}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_find_fw_past_end() {
        let (block, tree) = tree_with(&[1; 9], small_cfg(ReduceKind::Sum));
        assert_eq!(
            tree.find_fw(&block, 9, SearchKind::Ge, 1).unwrap(),
            WalkResult::End { prefix: 0 }
        );
    }

    #[test]
    fn test_find_fw_le_immediate_overshoot() {
        // First key already exceeds the target: no qualifying position.
        let (block, tree) = tree_with(&[10, 1, 1], small_cfg(ReduceKind::Sum));
        assert_eq!(
            tree.find_fw(&block, 0, SearchKind::Le, 5).unwrap(),
            WalkResult::End { prefix: 0 }
        );
    }

    #[test]
    fn test_find_on_max_tree_rejected() {
        let (block, tree) = tree_with(&[1, 2, 3], small_cfg(ReduceKind::Max));
        assert!(tree.find_fw(&block, 0, SearchKind::Ge, 1).is_err());
        assert!(tree.sum(&block, 0, 3).is_err());
    }

    // ---- Max trees ----

    #[test]
    fn test_max_in_matches_naive_random() {
        let mut rng = StdRng::seed_from_u64(0x3A7);
        for &n in &[1usize, 4, 9, 33, 129] {
            let keys: Vec<i64> = (0..n).map(|_| rng.gen_range(-1000..1000)).collect();
            let (block, tree) = tree_with(&keys, small_cfg(ReduceKind::Max));

            for _ in 0..200 {
                let from = rng.gen_range(0..=n);
                let to = rng.gen_range(from..=n);
                let naive = keys[from..to].iter().copied().max();
                assert_eq!(tree.max_in(&block, from, to).unwrap(), naive);
            }
        }
    }

    #[test]
    fn test_locate_fw_sorted_bounds() {
        let keys: Vec<i64> = vec![2, 4, 4, 4, 9, 12, 12, 30, 41];
        let (block, tree) = tree_with(&keys, small_cfg(ReduceKind::Max));

        // Lower bound (Ge)
        assert_eq!(tree.locate_fw(&block, 0, SearchKind::Ge, 4).unwrap(), Some(1));
        assert_eq!(tree.locate_fw(&block, 0, SearchKind::Ge, 5).unwrap(), Some(4));
        assert_eq!(tree.locate_fw(&block, 0, SearchKind::Ge, 42).unwrap(), None);
        // Upper bound (Gt)
        assert_eq!(tree.locate_fw(&block, 0, SearchKind::Gt, 4).unwrap(), Some(4));
        assert_eq!(tree.locate_fw(&block, 0, SearchKind::Gt, 41).unwrap(), None);
        // Restart past the first match
        assert_eq!(tree.locate_fw(&block, 2, SearchKind::Ge, 4).unwrap(), Some(2));
        assert_eq!(tree.locate_fw(&block, 5, SearchKind::Ge, 12).unwrap(), Some(5));
        // Past the end
        assert_eq!(tree.locate_fw(&block, 9, SearchKind::Ge, 0).unwrap(), None);
    }

    #[test]
    fn test_locate_fw_matches_naive_random() {
        let mut rng = StdRng::seed_from_u64(0x10CA7E);
        for &n in &[1usize, 5, 16, 63, 130] {
            let keys: Vec<i64> = (0..n).map(|_| rng.gen_range(0..40)).collect();
            let (block, tree) = tree_with(&keys, small_cfg(ReduceKind::Max));

            for kind in [SearchKind::Ge, SearchKind::Gt] {
                for _ in 0..100 {
                    let start = rng.gen_range(0..=n);
                    let key = rng.gen_range(-1..42);
                    let naive = keys
                        .iter()
                        .enumerate()
                        .skip(start)
                        .find(|(_, &v)| TreeCtx::satisfies(kind, v, key))
                        .map(|(p, _)| p);
                    assert_eq!(
                        tree.locate_fw(&block, start, kind, key).unwrap(),
                        naive,
                        "n={n} start={start} kind={kind:?} key={key}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_locate_rejects_lt_le() {
        let (block, tree) = tree_with(&[1, 2], small_cfg(ReduceKind::Max));
        assert!(tree.locate_fw(&block, 0, SearchKind::Le, 1).is_err());
    }

    // ---- Growth through the allocator ----

    #[test]
    fn test_large_extend_cascades_growth() {
        // Starts in a 256-byte block; 4096 keys force both the nested
        // region and the root block to grow repeatedly.
        let mut block = Block::with_limit(256, 1 << 20, 1).unwrap();
        let tree = SummaryTree::create(&mut block, ROOT, 0, TreeConfig::default()).unwrap();
        let keys: Vec<i64> = (0..4096).map(|i| i % 7).collect();
        for chunk in keys.chunks(100) {
            tree.extend(&mut block, chunk).unwrap();
        }
        tree.reindex(&mut block).unwrap();

        assert_eq!(tree.len(&block).unwrap(), 4096);
        assert_eq!(
            tree.sum(&block, 0, 4096).unwrap(),
            keys.iter().sum::<i64>()
        );
        // Deep result still correct after all the cascading shifts.
        let naive: i64 = keys[1000..3000].iter().sum();
        assert_eq!(tree.sum(&block, 1000, 3000).unwrap(), naive);
    }

    #[test]
    fn test_growth_fails_cleanly_in_fixed_block() {
        let mut block = Block::new(256, 1).unwrap();
        let tree = SummaryTree::create(&mut block, ROOT, 0, TreeConfig::default()).unwrap();
        let mut appended = 0usize;
        loop {
            match tree.extend(&mut block, &[1]) {
                Ok(()) => appended += 1,
                Err(IndexError::Block(keel_block::BlockError::OutOfMemory { .. })) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
            assert!(appended < 1000, "fixed block never filled");
        }
        // Everything appended before the failure is intact.
        assert_eq!(tree.len(&block).unwrap(), appended);
        for p in 0..appended {
            assert_eq!(tree.get(&block, p).unwrap(), 1);
        }
        // Freeing keys releases space; the index then fits again.
        tree.remove(&mut block, appended - 4, appended).unwrap();
        tree.reindex(&mut block).unwrap();
        let n = appended - 4;
        assert_eq!(tree.sum(&block, 0, n).unwrap(), n as i64);
    }
}
