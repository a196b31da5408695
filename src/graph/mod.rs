//! Coverage graph: the bubble-aware directed graph built once from a
//! `PrgString`. Nodes live in a flat arena addressed by integer index
//! (Design Note 1) rather than by shared, reference-counted handles --
//! this also makes the back-edges that a naive port would need to share
//! between `bubble_map` / `random_access` / the root's transitive edges
//! trivial, since everything is just a `NodeIndex` into the arena.

mod builder;

pub use builder::CoverageGraphBuilder;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::encoding::{AlleleId, Marker, SiteId};

/// Index into `CoverageGraph::nodes`. Never dereferenced across graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// One node of the coverage graph: either a run of sequence, or an empty
/// site-entry/site-exit boundary. Coverage counters are the only mutable
/// state and are updated with relaxed atomics during quasimap -- races
/// only cause under-counting, which single-increment-per-allele-per-read
/// bookkeeping upstream is designed to avoid.
#[derive(Debug)]
pub struct CoverageNode {
    pub position: i64,
    pub site_id: SiteId,
    pub allele_id: AlleleId,
    pub sequence: Vec<u8>,
    pub is_site_boundary: bool,
    pub coverage: Vec<AtomicU32>,
    pub edges: Vec<NodeIndex>,
}

impl CoverageNode {
    fn new_sequence(position: i64, site_id: SiteId, allele_id: AlleleId) -> Self {
        CoverageNode {
            position,
            site_id,
            allele_id,
            sequence: Vec::new(),
            is_site_boundary: false,
            coverage: Vec::new(),
            edges: Vec::new(),
        }
    }

    fn new_boundary(position: i64, site_id: SiteId, allele_id: AlleleId) -> Self {
        CoverageNode {
            position,
            site_id,
            allele_id,
            sequence: Vec::new(),
            is_site_boundary: true,
            coverage: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn has_sequence(&self) -> bool {
        !self.sequence.is_empty()
    }

    fn add_sequence_base(&mut self, base: u8) {
        self.sequence.push(base);
        self.coverage.push(AtomicU32::new(0));
    }

    /// Bumps every per-base counter of this node by one. A read is not
    /// tracked to an exact sub-span of a node during backward search (the
    /// branch representation records which allele was crossed, not the
    /// exact bases matched within it), so a hit credits the whole node.
    pub fn record_hit(&self) {
        for counter in &self.coverage {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn coverage_snapshot(&self) -> Vec<u32> {
        self.coverage.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }
}

/// Owns every node; `bubble_map`, `par_map` and `random_access` all index
/// into `nodes`. Immutable after `build()` except for node coverage
/// counters.
#[derive(Debug)]
pub struct CoverageGraph {
    nodes: Vec<CoverageNode>,
    pub root: NodeIndex,
    pub sink: NodeIndex,
    pub bubble_map: HashMap<NodeIndex, NodeIndex>,
    pub par_map: HashMap<SiteId, (SiteId, AlleleId)>,
    pub random_access: Vec<(NodeIndex, usize)>,
    pub bubble_starts: HashMap<SiteId, NodeIndex>,
    pub bubble_ends: HashMap<SiteId, NodeIndex>,
}

impl CoverageGraph {
    pub fn build(prg: &crate::prg::PrgString) -> Self {
        CoverageGraphBuilder::new(prg).run()
    }

    pub fn node(&self, idx: NodeIndex) -> &CoverageNode {
        &self.nodes[idx.idx()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges_of(&self, idx: NodeIndex) -> &[NodeIndex] {
        &self.nodes[idx.idx()].edges
    }

    /// Outermost-first traversal order of bubble entry nodes: sites whose
    /// parent is not itself a nested site (`par_map` lookup misses) come
    /// first, then their children, recursively.
    pub fn bubbles_outermost_first(&self) -> Vec<SiteId> {
        let mut depth: HashMap<SiteId, u32> = HashMap::new();
        for &site in self.bubble_starts.keys() {
            depth.insert(site, self.depth_of(site));
        }
        let mut sites: Vec<SiteId> = self.bubble_starts.keys().copied().collect();
        sites.sort_by_key(|s| (depth[s], *s));
        sites
    }

    fn depth_of(&self, site: SiteId) -> u32 {
        let mut cur = site;
        let mut depth = 0;
        while let Some((parent_site, _)) = self.par_map.get(&cur) {
            depth += 1;
            cur = *parent_site;
            if *parent_site == 0 {
                break;
            }
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prg::PrgString;

    fn build_single_bubble() -> CoverageGraph {
        // A 5 C 6 G 6 T 5 A
        let prg = PrgString::new(vec![1, 5, 2, 6, 3, 6, 4, 6, 1]).unwrap();
        CoverageGraph::build(&prg)
    }

    #[test]
    fn every_bubble_entry_has_exactly_one_exit_and_position_ordering_holds() {
        let graph = build_single_bubble();
        assert_eq!(graph.bubble_map.len(), 1);
        for (&entry, &exit) in graph.bubble_map.iter() {
            assert!(graph.node(entry).position <= graph.node(exit).position);
        }
    }

    #[test]
    fn random_access_is_total_over_every_position() {
        let prg = PrgString::new(vec![1, 5, 2, 6, 3, 6, 4, 6, 1]).unwrap();
        let graph = CoverageGraph::build(&prg);
        assert_eq!(graph.random_access.len(), prg.len());
        for (idx, _offset) in &graph.random_access {
            assert!(idx.0 < graph.node_count() as u32);
        }
    }

    #[test]
    fn nested_site_resolves_parent_locus() {
        // A 5 [ C 7 G 8 T ] 6 A 6 A -- site 5 has alleles [C(nested site 7: G|T), A]
        let prg = PrgString::new(vec![1, 5, 2, 7, 3, 8, 4, 6, 1, 6, 1]).unwrap();
        let graph = CoverageGraph::build(&prg);
        assert_eq!(graph.par_map.get(&7), Some(&(5, 1)));
    }
}
