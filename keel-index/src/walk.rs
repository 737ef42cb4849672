//! Search walkers: direction- and comparator-parameterized traversal state.
//!
//! A [`Walker`] couples a comparator ([`SearchKind`]), a [`Direction`], a
//! target value/rank, and a running accumulated sum. Container iterators
//! drive it through three phases: [`Walker::prepare`] captures the
//! iterator's cached prefix as the baseline, [`Walker::stream`] runs the
//! summary-index search of one packed structure (adjusting the running sum
//! by that structure's contribution), and [`Walker::finish`] writes the
//! resolved position back and returns the accumulated sum.
//!
//! ## Edge policy
//!
//! A forward search that exhausts the structure clamps the local position
//! to `len` and leaves the shortfall observable via
//! [`Walker::unconsumed`]; a backward search clamps to `-1`. Callers use
//! the clamp to continue into a sibling node.

use keel_block::Block;

use crate::error::Result;
use crate::sum_tree::SummaryTree;

/// Comparator for rank/value searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Lt,
    Le,
    Gt,
    Ge,
}

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Outcome of one summary-index search.
///
/// Replaces the classic negative-index sentinel with an explicit sum type.
/// `End` carries the prefix accumulated up to the scan limit; callers rely
/// on it to continue a search across node boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkResult {
    /// The comparator resolved a position; `prefix` is the sum accumulated
    /// through it (for `Ge`/`Gt`: including the found cell; for `Le`/`Lt`:
    /// through the last qualifying cell).
    Found { pos: usize, prefix: i64 },
    /// No position in the scanned range resolved. For `Ge`/`Gt` this means
    /// the scan ran off the structure with `prefix` short of the target;
    /// for `Le`/`Lt` with `prefix == 0` it means even the first cell
    /// overshot.
    End { prefix: i64 },
}

impl WalkResult {
    /// The accumulated prefix, in either variant.
    #[inline]
    pub fn prefix(&self) -> i64 {
        match *self {
            WalkResult::Found { prefix, .. } | WalkResult::End { prefix } => prefix,
        }
    }

    #[inline]
    pub fn is_found(&self) -> bool {
        matches!(self, WalkResult::Found { .. })
    }
}

/// Cached iterator position shared between a container iterator and its
/// walkers: a local position within the current node plus the prefix sum
/// accumulated over the nodes before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterState {
    /// Local position within the current structure; `-1` after a backward
    /// search ran off the front, `len` after a forward search ran off the
    /// end.
    pub pos: i64,
    /// Prefix sum accumulated before the current structure.
    pub prefix: i64,
}

/// A search in flight: comparator, direction, target, running sum.
#[derive(Debug, Clone, Copy)]
pub struct Walker {
    kind: SearchKind,
    direction: Direction,
    target: i64,
    sum: i64,
}

impl Walker {
    pub fn forward(kind: SearchKind, target: i64) -> Walker {
        Walker {
            kind,
            direction: Direction::Forward,
            target,
            sum: 0,
        }
    }

    pub fn backward(kind: SearchKind, target: i64) -> Walker {
        Walker {
            kind,
            direction: Direction::Backward,
            target,
            sum: 0,
        }
    }

    #[inline]
    pub fn kind(&self) -> SearchKind {
        self.kind
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Running accumulated sum.
    #[inline]
    pub fn sum(&self) -> i64 {
        self.sum
    }

    /// Target still unconsumed by the accumulated sum.
    #[inline]
    pub fn unconsumed(&self) -> i64 {
        self.target - self.sum
    }

    /// Capture the iterator's cached prefix as this walker's baseline.
    pub fn prepare(&mut self, state: &IterState) {
        self.sum = state.prefix;
    }

    /// Run this walker over one packed structure from `start`, folding the
    /// structure's contribution into the running sum. The returned result
    /// is local to the structure.
    pub fn stream(&mut self, block: &Block, tree: &SummaryTree, start: usize) -> Result<WalkResult> {
        let local_target = self.target - self.sum;
        let result = match self.direction {
            Direction::Forward => tree.find_fw(block, start, self.kind, local_target)?,
            Direction::Backward => tree.find_bw(block, start, self.kind, local_target)?,
        };
        self.sum += result.prefix();
        Ok(result)
    }

    /// Resolve the final local position into the iterator state and return
    /// the accumulated sum. `len` is the current structure's key count,
    /// used for the exhaustion clamp.
    pub fn finish(&self, state: &mut IterState, result: WalkResult, len: usize) -> i64 {
        state.pos = match (result, self.direction) {
            (WalkResult::Found { pos, .. }, _) => pos as i64,
            (WalkResult::End { .. }, Direction::Forward) => len as i64,
            (WalkResult::End { .. }, Direction::Backward) => -1,
        };
        state.prefix = self.sum;
        self.sum
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sum_tree::{ReduceKind, TreeConfig};
    use keel_block::{AllocRef, Block};

    fn ones_tree(n: usize) -> (Block, SummaryTree) {
        let mut block = Block::with_limit(256, 64 * 1024, 1).unwrap();
        let cfg = TreeConfig {
            values_per_branch: 4,
            branching_factor: 4,
            kind: ReduceKind::Sum,
        };
        let tree = SummaryTree::create(&mut block, AllocRef::ROOT, 0, cfg).unwrap();
        tree.extend(&mut block, &vec![1i64; n]).unwrap();
        tree.reindex(&mut block).unwrap();
        (block, tree)
    }

    #[test]
    fn test_walker_prepare_captures_baseline() {
        let mut walker = Walker::forward(SearchKind::Ge, 10);
        walker.prepare(&IterState { pos: 3, prefix: 7 });
        assert_eq!(walker.sum(), 7);
        assert_eq!(walker.unconsumed(), 3);
    }

    #[test]
    fn test_walker_stream_and_finish_found() {
        let (block, tree) = ones_tree(9);
        let mut walker = Walker::forward(SearchKind::Ge, 5);
        let mut state = IterState::default();
        walker.prepare(&state);

        let result = walker.stream(&block, &tree, 0).unwrap();
        assert_eq!(result, WalkResult::Found { pos: 4, prefix: 5 });

        let sum = walker.finish(&mut state, result, tree.len(&block).unwrap());
        assert_eq!(sum, 5);
        assert_eq!(state.pos, 4);
        assert_eq!(state.prefix, 5);
    }

    #[test]
    fn test_walker_baseline_offsets_local_target() {
        let (block, tree) = ones_tree(9);
        // Iterator already accumulated 3 from earlier nodes; global target 8
        // means local rank 5.
        let mut walker = Walker::forward(SearchKind::Ge, 8);
        walker.prepare(&IterState { pos: 0, prefix: 3 });

        let result = walker.stream(&block, &tree, 0).unwrap();
        assert_eq!(result, WalkResult::Found { pos: 4, prefix: 5 });
        assert_eq!(walker.sum(), 8);
        assert_eq!(walker.unconsumed(), 0);
    }

    #[test]
    fn test_forward_exhaustion_clamps_to_len() {
        let (block, tree) = ones_tree(9);
        let mut walker = Walker::forward(SearchKind::Ge, 20);
        let mut state = IterState::default();
        walker.prepare(&state);

        let result = walker.stream(&block, &tree, 0).unwrap();
        assert_eq!(result, WalkResult::End { prefix: 9 });

        walker.finish(&mut state, result, 9);
        assert_eq!(state.pos, 9); // clamped to len
        assert_eq!(walker.unconsumed(), 11); // shortfall for the next node
    }

    #[test]
    fn test_backward_exhaustion_clamps_to_minus_one() {
        let (block, tree) = ones_tree(9);
        let mut walker = Walker::backward(SearchKind::Ge, 20);
        let mut state = IterState::default();
        walker.prepare(&state);

        let result = walker.stream(&block, &tree, 8).unwrap();
        assert_eq!(result, WalkResult::End { prefix: 9 });

        walker.finish(&mut state, result, 9);
        assert_eq!(state.pos, -1);
        assert_eq!(walker.unconsumed(), 11);
    }

    #[test]
    fn test_walker_continues_across_structures() {
        // Two 9-key structures in one block; global rank 13 resolves in the
        // second at local index 3.
        let mut block = Block::with_limit(512, 64 * 1024, 2).unwrap();
        let cfg = TreeConfig {
            values_per_branch: 4,
            branching_factor: 4,
            kind: ReduceKind::Sum,
        };
        let left = SummaryTree::create(&mut block, AllocRef::ROOT, 0, cfg).unwrap();
        left.extend(&mut block, &vec![1i64; 9]).unwrap();
        left.reindex(&mut block).unwrap();
        let right = SummaryTree::create(&mut block, AllocRef::ROOT, 1, cfg).unwrap();
        right.extend(&mut block, &vec![1i64; 9]).unwrap();
        right.reindex(&mut block).unwrap();

        let mut walker = Walker::forward(SearchKind::Ge, 13);
        let mut state = IterState::default();
        walker.prepare(&state);

        let first = walker.stream(&block, &left, 0).unwrap();
        assert_eq!(first, WalkResult::End { prefix: 9 });
        walker.finish(&mut state, first, 9);
        assert_eq!(state.pos, 9);

        // Continue into the sibling with the running sum intact.
        let second = walker.stream(&block, &right, 0).unwrap();
        assert_eq!(second, WalkResult::Found { pos: 3, prefix: 4 });
        let total = walker.finish(&mut state, second, 9);
        assert_eq!(total, 13);
        assert_eq!(state.pos, 3);
    }
}
