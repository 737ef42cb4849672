//! Word-parallel rank/select primitives and a searchable bit sequence.
//!
//! Rank counts occurrences of a symbol up to a position; select is its
//! inverse, the position of the k-th occurrence. The helpers here are pure
//! functions over explicit word slices (popcount per 64-bit word, then a
//! bit-by-bit finish inside the final word); [`BitSeq`] wraps them into a
//! growable two-symbol sequence used by searchable leaf payloads.
//!
//! Inverse law: when `end` lands just past an occurrence of `symbol`,
//! `select_fw(symbol, rank(end, symbol)) == end - 1`.

/// Count of 1-bits in `words` strictly before bit position `end`.
pub fn rank1_words(words: &[u64], end: usize) -> usize {
    let full = end / 64;
    let mut count = 0usize;
    for &w in &words[..full] {
        count += w.count_ones() as usize;
    }
    let tail = end % 64;
    if tail != 0 {
        let mask = (1u64 << tail) - 1;
        count += (words[full] & mask).count_ones() as usize;
    }
    count
}

/// Count of 0-bits in `words` strictly before bit position `end`.
#[inline]
pub fn rank0_words(words: &[u64], end: usize) -> usize {
    end - rank1_words(words, end)
}

/// Bit position of the k-th 1-bit (1-based). `None` when fewer than `k`
/// 1-bits exist in the first `len` bits.
pub fn select1_words(words: &[u64], len: usize, k: usize) -> Option<usize> {
    if k == 0 {
        return None;
    }
    let mut remaining = k;
    for (i, &w) in words.iter().enumerate() {
        let ones = w.count_ones() as usize;
        if remaining > ones {
            remaining -= ones;
            continue;
        }
        let pos = i * 64 + select_in_word(w, remaining as u32) as usize;
        return if pos < len { Some(pos) } else { None };
    }
    None
}

/// Bit position of the k-th 0-bit (1-based) within the first `len` bits.
pub fn select0_words(words: &[u64], len: usize, k: usize) -> Option<usize> {
    if k == 0 {
        return None;
    }
    let mut remaining = k;
    for (i, &w) in words.iter().enumerate() {
        let zeros = (!w).count_ones() as usize;
        if remaining > zeros {
            remaining -= zeros;
            continue;
        }
        let pos = i * 64 + select_in_word(!w, remaining as u32) as usize;
        return if pos < len { Some(pos) } else { None };
    }
    None
}

/// Bit offset of the k-th set bit of `w` (1-based; caller guarantees
/// `w.count_ones() >= k`). Byte-skipping popcount, then a shift loop over
/// the final byte.
fn select_in_word(mut w: u64, mut k: u32) -> u32 {
    debug_assert!(k >= 1 && w.count_ones() >= k);
    let mut pos = 0u32;
    loop {
        let byte_ones = (w & 0xFF).count_ones();
        if k <= byte_ones {
            break;
        }
        k -= byte_ones;
        w >>= 8;
        pos += 8;
    }
    loop {
        if w & 1 != 0 {
            k -= 1;
            if k == 0 {
                return pos;
            }
        }
        w >>= 1;
        pos += 1;
    }
}

// ============================================================================
// Byte-slice variants
// ============================================================================

/// Read word `i` from little-endian bytes, zero-padding a short tail.
#[inline]
fn word_at(bytes: &[u8], i: usize) -> u64 {
    let start = i * 8;
    if start + 8 <= bytes.len() {
        u64::from_le_bytes(bytes[start..start + 8].try_into().unwrap())
    } else {
        let mut tail = [0u8; 8];
        let rest = &bytes[start.min(bytes.len())..];
        tail[..rest.len()].copy_from_slice(rest);
        u64::from_le_bytes(tail)
    }
}

/// Occurrences of `symbol` strictly before bit `end` in a little-endian
/// byte payload holding `len` bits.
pub fn rank_bytes(bytes: &[u8], len: usize, end: usize, symbol: bool) -> usize {
    let end = end.min(len);
    let full = end / 64;
    let mut ones = 0usize;
    for i in 0..full {
        ones += word_at(bytes, i).count_ones() as usize;
    }
    let tail = end % 64;
    if tail != 0 {
        let mask = (1u64 << tail) - 1;
        ones += (word_at(bytes, full) & mask).count_ones() as usize;
    }
    if symbol {
        ones
    } else {
        end - ones
    }
}

/// Position of the k-th occurrence (1-based) of `symbol` in a byte payload
/// holding `len` bits, scanning forward.
pub fn select_fw_bytes(bytes: &[u8], len: usize, symbol: bool, k: usize) -> Option<usize> {
    if k == 0 {
        return None;
    }
    let n_words = len.div_ceil(64);
    let mut remaining = k;
    for i in 0..n_words {
        let w = if symbol {
            word_at(bytes, i)
        } else {
            !word_at(bytes, i)
        };
        let count = w.count_ones() as usize;
        if remaining > count {
            remaining -= count;
            continue;
        }
        let pos = i * 64 + select_in_word(w, remaining as u32) as usize;
        return if pos < len { Some(pos) } else { None };
    }
    None
}

/// Position of the k-th occurrence (1-based) of `symbol` counting back from
/// the end of a byte payload holding `len` bits.
pub fn select_bw_bytes(bytes: &[u8], len: usize, symbol: bool, k: usize) -> Option<usize> {
    let total = rank_bytes(bytes, len, len, symbol);
    if k == 0 || k > total {
        return None;
    }
    select_fw_bytes(bytes, len, symbol, total - k + 1)
}

// ============================================================================
// BitSeq
// ============================================================================

/// A growable two-symbol sequence with rank/select search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSeq {
    words: Vec<u64>,
    len: usize,
}

impl BitSeq {
    pub fn new() -> BitSeq {
        BitSeq::default()
    }

    /// Build from an iterator of symbols.
    pub fn from_symbols(symbols: impl IntoIterator<Item = bool>) -> BitSeq {
        let mut seq = BitSeq::new();
        for s in symbols {
            seq.push(s);
        }
        seq
    }

    /// Reconstruct from backing words and a bit length (e.g. a block
    /// element payload). Bits past `len` in the last word are ignored.
    pub fn from_words(words: Vec<u64>, len: usize) -> BitSeq {
        debug_assert!(len <= words.len() * 64);
        BitSeq { words, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing words (bits past `len` are zero unless built `from_words`).
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn push(&mut self, symbol: bool) {
        let word = self.len / 64;
        if word == self.words.len() {
            self.words.push(0);
        }
        if symbol {
            self.words[word] |= 1 << (self.len % 64);
        }
        self.len += 1;
    }

    pub fn get(&self, pos: usize) -> Option<bool> {
        if pos >= self.len {
            return None;
        }
        Some(self.words[pos / 64] & (1 << (pos % 64)) != 0)
    }

    pub fn set(&mut self, pos: usize, symbol: bool) {
        assert!(pos < self.len);
        let mask = 1u64 << (pos % 64);
        if symbol {
            self.words[pos / 64] |= mask;
        } else {
            self.words[pos / 64] &= !mask;
        }
    }

    /// Occurrences of `symbol` strictly before `end` (clamped to the
    /// sequence length).
    pub fn rank(&self, end: usize, symbol: bool) -> usize {
        let end = end.min(self.len);
        if symbol {
            rank1_words(&self.words, end)
        } else {
            rank0_words(&self.words, end)
        }
    }

    /// Position of the k-th occurrence of `symbol` (1-based), scanning
    /// forward.
    pub fn select_fw(&self, symbol: bool, k: usize) -> Option<usize> {
        if symbol {
            select1_words(&self.words, self.len, k)
        } else {
            select0_words(&self.words, self.len, k)
        }
    }

    /// Position of the k-th occurrence of `symbol` counting back from the
    /// end (1-based).
    pub fn select_bw(&self, symbol: bool, k: usize) -> Option<usize> {
        let total = self.rank(self.len, symbol);
        if k == 0 || k > total {
            return None;
        }
        self.select_fw(symbol, total - k + 1)
    }
}

// ============================================================================
// Tests
// ============================================================================
