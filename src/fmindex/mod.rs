//! FM-index contract (spec §4.C): a thin trait over an external
//! suffix-array + wavelet-tree index, plus a naive in-memory
//! implementation that stands in for "any suffix-array + wavelet-tree
//! library providing these operations" when no succinct-index crate is
//! wired in. Backward search and every caller depend only on the trait,
//! so a real succinct index can be substituted without touching search
//! or genotyping code.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::encoding::Marker;

/// Operations a backward-search engine needs from a BWT/suffix array
/// built over the linearised PRG plus its terminator.
pub trait FmIndex {
    /// Total length of the indexed text (including the terminator).
    fn size(&self) -> u64;

    /// The BWT symbol at position `i`.
    fn bwt(&self, i: u64) -> Marker;

    /// Count of symbol `c` in `BWT[0..i)`.
    fn rank(&self, c: Marker, i: u64) -> u64;

    /// Number of symbols in the text strictly less than `c`.
    fn c(&self, c: Marker) -> u64;

    /// Suffix-array value at position `i`: the text offset the suffix
    /// starting there was sorted from.
    fn sa(&self, i: u64) -> u64;

    /// Distinct symbols occurring in `BWT[l..r)`, each with its
    /// `rank(symbol, l)` and `rank(symbol, r)` (a standard wavelet-tree
    /// operation used to fan an interval out per symbol in one pass).
    fn interval_symbols(&self, l: u64, r: u64) -> Vec<(Marker, u64, u64)>;
}

/// Direct-sort suffix array + prefix-summed rank table. `O(n^2 log n)`
/// to build (comparison sort of every suffix), acceptable for the small
/// texts this crate's own test suite exercises; a real succinct index
/// backs production-sized PRGs via the same `FmIndex` trait.
pub struct NaiveFmIndex {
    text: Vec<Marker>,
    sa: Vec<u64>,
    bwt: Vec<Marker>,
    /// Total occurrences of each symbol across the whole text.
    symbol_counts: BTreeMap<Marker, u64>,
    /// `rank_table[symbol][i]` = count of `symbol` in `bwt[0..i]` (prefix sums,
    /// one extra leading zero entry so `rank(c, 0) == 0`).
    rank_table: BTreeMap<Marker, Vec<u64>>,
}

impl NaiveFmIndex {
    /// Builds the index from `text`, which must already end with the
    /// sentinel terminator `0` (appended automatically if missing).
    pub fn new(mut text: Vec<Marker>) -> Self {
        if text.last() != Some(&0) {
            text.push(0);
        }
        let n = text.len();

        let mut sa: Vec<u64> = (0..n as u64).collect();
        sa.sort_by(|&a, &b| suffix_at(&text, a).cmp(suffix_at(&text, b)));

        let bwt: Vec<Marker> = sa
            .iter()
            .map(|&s| {
                let pos = if s == 0 { n as u64 - 1 } else { s - 1 };
                text[pos as usize]
            })
            .collect();

        let mut symbol_counts: BTreeMap<Marker, u64> = BTreeMap::new();
        for &sym in &text {
            *symbol_counts.entry(sym).or_insert(0) += 1;
        }

        let mut rank_table: BTreeMap<Marker, Vec<u64>> = BTreeMap::new();
        for &sym in symbol_counts.keys() {
            rank_table.insert(sym, Vec::with_capacity(n + 1));
        }
        for table in rank_table.values_mut() {
            table.push(0);
        }
        for &b in &bwt {
            for (&sym, table) in rank_table.iter_mut() {
                let prev = *table.last().unwrap();
                table.push(prev + if sym == b { 1 } else { 0 });
            }
        }

        NaiveFmIndex {
            text,
            sa,
            bwt,
            symbol_counts,
            rank_table,
        }
    }

    pub fn text_len(&self) -> usize {
        self.text.len()
    }
}

fn suffix_at(text: &[Marker], start: u64) -> &[Marker] {
    &text[start as usize..]
}

impl FmIndex for NaiveFmIndex {
    fn size(&self) -> u64 {
        self.text.len() as u64
    }

    fn bwt(&self, i: u64) -> Marker {
        self.bwt[i as usize]
    }

    fn rank(&self, c: Marker, i: u64) -> u64 {
        match self.rank_table.get(&c) {
            Some(table) => table[i as usize],
            None => 0,
        }
    }

    fn c(&self, c: Marker) -> u64 {
        // Running total of symbols strictly less than `c`.
        self.symbol_counts.range(..c).map(|(_, &count)| count).sum()
    }

    fn sa(&self, i: u64) -> u64 {
        self.sa[i as usize]
    }

    fn interval_symbols(&self, l: u64, r: u64) -> Vec<(Marker, u64, u64)> {
        if l >= r {
            return Vec::new();
        }
        self.bwt[l as usize..r as usize]
            .iter()
            .copied()
            .sorted_unstable()
            .dedup()
            .map(|sym| (sym, self.rank(sym, l), self.rank(sym, r)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force_sa(text: &[Marker]) -> Vec<u64> {
        let mut sa: Vec<u64> = (0..text.len() as u64).collect();
        sa.sort_by(|&a, &b| text[a as usize..].cmp(&text[b as usize..]));
        sa
    }

    #[test]
    fn sa_matches_brute_force_for_a_small_bubble() {
        let text = vec![1, 5, 2, 6, 3, 6, 4, 6, 1];
        let index = NaiveFmIndex::new(text.clone());
        let mut expected = text;
        expected.push(0);
        assert_eq!(index.sa.clone(), brute_force_sa(&expected));
    }

    #[test]
    fn rank_counts_occurrences_in_bwt_prefix() {
        let index = NaiveFmIndex::new(vec![1, 2, 1, 2, 0]);
        let total_ones = index.bwt.iter().filter(|&&b| b == 1).count() as u64;
        assert_eq!(index.rank(1, index.size()), total_ones);
        assert_eq!(index.rank(1, 0), 0);
    }

    #[test]
    fn interval_symbols_reports_distinct_symbols_with_ranks() {
        let index = NaiveFmIndex::new(vec![1, 5, 2, 6, 3, 6, 4, 6, 1]);
        let whole = index.interval_symbols(0, index.size());
        let total: u64 = whole.iter().map(|&(_, lo, hi)| hi - lo).sum();
        assert_eq!(total, index.size());
    }

    #[test]
    fn c_is_monotonic_running_total() {
        let index = NaiveFmIndex::new(vec![1, 2, 3, 4, 0]);
        assert!(index.c(1) <= index.c(2));
        assert!(index.c(2) <= index.c(3));
        assert!(index.c(3) <= index.c(4));
    }
}
