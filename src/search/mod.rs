//! Backward search (spec §4.D): exact backward extension of a read over
//! the FM-index, fanning a suffix-array interval out into one child per
//! variant marker crossed. The source threads parallel doubly-linked
//! lists of `(interval, sites)`; here that collapses into a flat vector
//! of branch records (Design Note 2) with an explicit `origin` tag
//! (Design Note 3) standing in for the source's `delete_first_interval`
//! flag.

use crate::encoding::{site_id_of, AlleleId, Marker};
use crate::fmindex::FmIndex;

/// Half-open suffix-array interval. Empty iff `l == r`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaInterval(pub u64, pub u64);

impl SaInterval {
    pub fn is_empty(&self) -> bool {
        self.0 == self.1
    }
}

/// Whether a branch is the original (pre-fan-out) suffix or the result
/// of crossing a variant marker. At search end, `Original` branches are
/// dropped if at least one `FannedOut` sibling from the same crossing
/// survived -- they represent a match that never left the non-variant
/// reference and are redundant with the variant-crossing branches it
/// spawned (source's `delete_first_interval`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Original,
    FannedOut,
}

/// One SA interval together with the sites it has crossed so far.
/// `sites` is ordered outermost-crossed-first; each entry's
/// `allele_path` records every allele id visited within that site
/// (nested sites append further entries, not further path elements).
#[derive(Debug, Clone)]
pub struct Branch {
    pub interval: SaInterval,
    pub sites: Vec<(Marker, Vec<AlleleId>)>,
    pub origin: Origin,
}

impl Branch {
    fn root(interval: SaInterval) -> Self {
        Branch {
            interval,
            sites: Vec::new(),
            origin: Origin::Original,
        }
    }
}

pub type SearchState = Vec<Branch>;

/// True if `m` is a site-entry marker (odd) rather than an allele-entry
/// marker (even); used by `fan_out_markers` to pick how a crossing is
/// recorded.
fn is_odd(m: Marker) -> bool {
    m % 2 == 1
}

/// Backward search over `pattern`, starting from `initial` SA intervals
/// (either `[(0, N)]` for a cold search, or the kmer-seeded branch list
/// during quasimap). `mask_a[text_position]` gives the allele id owning
/// that position, used to resolve which allele an even-marker fan-out
/// entered. `kmer_precalc_done` suppresses the implicit seeding of the
/// full-text interval -- when true, `initial` is trusted as-is even if
/// it is empty (a kmer with no matches).
pub fn backward_search(
    index: &dyn FmIndex,
    mask_a: &[AlleleId],
    pattern: &[Marker],
    initial: Vec<Branch>,
    kmer_precalc_done: bool,
) -> SearchState {
    let mut branches: Vec<Branch> = if initial.is_empty() && !kmer_precalc_done {
        vec![Branch::root(SaInterval(0, index.size()))]
    } else {
        initial
    };

    for &base in pattern.iter().rev() {
        if branches.is_empty() {
            break;
        }
        branches = fan_out_markers(index, mask_a, branches);
        branches = extend_all(index, base, branches);
    }

    prune_redundant_originals(branches)
}

/// Step 1 of the main loop: before consuming the next base, expand every
/// branch whose current interval spans one or more variant markers into
/// one child branch per marker, inserted immediately after the parent so
/// iteration order still identifies the pre-fan-out branch.
fn fan_out_markers(index: &dyn FmIndex, mask_a: &[AlleleId], branches: Vec<Branch>) -> Vec<Branch> {
    let mut out = Vec::with_capacity(branches.len());
    for branch in branches {
        let SaInterval(l, r) = branch.interval;
        let markers = index.interval_symbols(l, r);
        out.push(branch.clone());
        for (m, rank_l, rank_r) in markers {
            if m < 5 {
                continue;
            }
            let child_interval = SaInterval(index.c(m) + rank_l, index.c(m) + rank_r);
            if child_interval.is_empty() {
                continue;
            }
            let mut child = branch.clone();
            child.interval = child_interval;
            child.origin = Origin::FannedOut;
            if is_odd(m) {
                push_site_crossing(&mut child.sites, m, 1);
            } else {
                let text_pos = index.sa(child_interval.0);
                let allele_id = mask_a.get(text_pos as usize).copied().unwrap_or(0);
                // Use the site's canonical (odd, entry) marker so this entry's
                // site_id_of() agrees with a later crossing of the matching
                // entry marker further left in the same branch -- pushing the
                // even marker itself (site_id_of(m) == m - 1) would disagree.
                push_site_crossing(&mut child.sites, m - 1, allele_id);
            }
            out.push(child);
        }
    }
    out
}

/// Appends an allele id to the path of the last `sites` entry if it
/// already concerns the same site; otherwise opens a new entry. This is
/// what keeps two consecutive markers (an allele boundary immediately
/// followed by another) from spawning spurious separate site-crossing
/// records for the same bubble.
fn push_site_crossing(sites: &mut Vec<(Marker, Vec<AlleleId>)>, marker: Marker, allele_id: AlleleId) {
    if let Some(last) = sites.last_mut() {
        if site_id_of(last.0) == site_id_of(marker) {
            last.1.push(allele_id);
            return;
        }
    }
    sites.push((marker, vec![allele_id]));
}

/// Step 2: extend every branch by `base`, dropping any whose resulting
/// interval is empty.
fn extend_all(index: &dyn FmIndex, base: Marker, branches: Vec<Branch>) -> Vec<Branch> {
    branches
        .into_iter()
        .filter_map(|mut branch| {
            let SaInterval(l, r) = branch.interval;
            let l2 = index.c(base) + index.rank(base, l);
            let r2 = index.c(base) + index.rank(base, r);
            if l2 == r2 {
                return None;
            }
            branch.interval = SaInterval(l2, r2);
            Some(branch)
        })
        .collect()
}

/// Step 3: drop `Original` branches that have at least one `FannedOut`
/// descendant still alive. A branch's descendants are identified by
/// sharing no `Original` ancestry after the first fan-out that split
/// it -- in the flat representation that is simply "any other branch
/// survived the search", since only `Original` branches ever represent
/// the pristine non-variant suffix and a read either never touches a
/// variant site (single `Original` survivor, nothing to prune) or forks
/// at the first site it touches (the `Original` branch becomes
/// redundant with its fanned-out siblings).
fn prune_redundant_originals(branches: Vec<Branch>) -> SearchState {
    let any_fanned_out = branches.iter().any(|b| b.origin == Origin::FannedOut);
    if !any_fanned_out {
        return branches;
    }
    branches
        .into_iter()
        .filter(|b| b.origin != Origin::Original)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmindex::NaiveFmIndex;

    // A 5 C 6 G 6 T 6 A -- site 5 with alleles C, G, T (mask_a built by hand
    // to mirror the coverage-graph builder's own allele assignment).
    fn single_bubble() -> (NaiveFmIndex, Vec<AlleleId>) {
        let text = vec![1u32, 5, 2, 6, 3, 6, 4, 6, 1];
        let mask_a = vec![0, 0, 1, 0, 2, 0, 3, 0, 0, 0];
        (NaiveFmIndex::new(text), mask_a)
    }

    #[test]
    fn search_across_a_single_bubble_fans_out_per_allele() {
        let (index, mask_a) = single_bubble();
        let result = backward_search(&index, &mask_a, &[1u32, 4], Vec::new(), false);
        assert!(!result.is_empty());
        for branch in &result {
            assert!(!branch.interval.is_empty());
        }
        assert!(result.iter().any(|b| !b.sites.is_empty()));
    }

    #[test]
    fn every_returned_interval_is_non_empty() {
        let (index, mask_a) = single_bubble();
        let result = backward_search(&index, &mask_a, &[2u32], Vec::new(), false);
        for branch in &result {
            assert!(branch.interval.0 < branch.interval.1);
        }
    }

    #[test]
    fn no_match_yields_empty_search_state() {
        let (index, mask_a) = single_bubble();
        let result = backward_search(&index, &mask_a, &[1u32, 1, 1, 1, 1, 1, 1, 1], Vec::new(), false);
        assert!(result.is_empty());
    }
}
