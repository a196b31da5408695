use std::collections::HashMap;

use crate::encoding::{decode_base, is_site_entry, is_variant_marker, AlleleId, Marker, SiteId};
use crate::prg::PrgString;

use super::{CoverageGraph, CoverageNode, NodeIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerType {
    Sequence,
    SiteEntry,
    AlleleEnd,
    SiteEnd,
}

/// Single left-to-right pass building the coverage graph from a
/// `PrgString` (spec §4.B, ported from `cov_Graph_Builder`).
pub struct CoverageGraphBuilder<'a> {
    prg: &'a PrgString,
    nodes: Vec<CoverageNode>,
    cur_node: NodeIndex,
    back_wire: NodeIndex,
    cur_locus: (SiteId, AlleleId),
    cur_pos: i64,
    bubble_starts: HashMap<SiteId, NodeIndex>,
    bubble_ends: HashMap<SiteId, NodeIndex>,
    bubble_map: HashMap<NodeIndex, NodeIndex>,
    par_map: HashMap<SiteId, (SiteId, AlleleId)>,
    random_access: Vec<(NodeIndex, usize)>,
    root: NodeIndex,
}

impl<'a> CoverageGraphBuilder<'a> {
    pub fn new(prg: &'a PrgString) -> Self {
        let mut nodes = Vec::new();
        let root = push(&mut nodes, CoverageNode::new_sequence(-1, 0, 0));
        let cur_node = push(&mut nodes, CoverageNode::new_sequence(0, 0, 0));

        CoverageGraphBuilder {
            prg,
            nodes,
            cur_node,
            back_wire: root,
            cur_locus: (0, 0),
            cur_pos: 0,
            bubble_starts: HashMap::new(),
            bubble_ends: HashMap::new(),
            bubble_map: HashMap::new(),
            par_map: HashMap::new(),
            random_access: vec![(NodeIndex(0), 0); prg.len()],
            root,
        }
    }

    pub fn run(mut self) -> CoverageGraph {
        for pos in 0..self.prg.len() {
            self.process_marker(pos);
        }
        self.make_sink();

        CoverageGraph {
            nodes: self.nodes,
            root: self.root,
            sink: self.back_wire,
            bubble_map: self.bubble_map,
            par_map: self.par_map,
            random_access: self.random_access,
            bubble_starts: self.bubble_starts,
            bubble_ends: self.bubble_ends,
        }
    }

    fn marker_type(&self, pos: usize) -> MarkerType {
        let m = self.prg.as_slice()[pos];
        if !is_variant_marker(m) {
            return MarkerType::Sequence;
        }
        if is_site_entry(m) {
            return MarkerType::SiteEntry;
        }
        let end_pos = *self
            .prg
            .end_positions()
            .get(&m)
            .expect("even marker must be present in end_positions after PrgString validation");
        debug_assert!(pos <= end_pos);
        if pos < end_pos {
            MarkerType::AlleleEnd
        } else {
            MarkerType::SiteEnd
        }
    }

    fn process_marker(&mut self, pos: usize) {
        let m = self.prg.as_slice()[pos];
        let t = self.marker_type(pos);

        match t {
            MarkerType::Sequence => self.add_sequence(m),
            MarkerType::SiteEntry => self.enter_site(m),
            MarkerType::AlleleEnd => self.end_allele(m),
            MarkerType::SiteEnd => self.exit_site(m),
        }

        let target = if t == MarkerType::Sequence {
            self.cur_node
        } else {
            self.back_wire
        };
        let seq_size = self.nodes[target.idx()].sequence.len();
        let offset = if seq_size <= 1 { 0 } else { seq_size - 1 };
        self.random_access[pos] = (target, offset);
    }

    fn add_sequence(&mut self, m: Marker) {
        let base = decode_base(m);
        self.nodes[self.cur_node.idx()].add_sequence_base(base);
        self.cur_pos += 1;
    }

    fn enter_site(&mut self, m: Marker) {
        let site_entry = push(
            &mut self.nodes,
            CoverageNode::new_boundary(self.cur_pos, m, 0),
        );
        self.wire(site_entry);

        let site_exit = push(
            &mut self.nodes,
            CoverageNode::new_boundary(self.cur_pos, m, 0),
        );
        self.bubble_map.insert(site_entry, site_exit);
        self.bubble_starts.insert(m, site_entry);
        self.bubble_ends.insert(m, site_exit);

        if self.cur_locus != (0, 0) {
            self.par_map.insert(m, self.cur_locus);
        }

        self.cur_locus = (m, 1);
        self.back_wire = site_entry;
        self.cur_node = push(
            &mut self.nodes,
            CoverageNode::new_sequence(self.cur_pos, m, 1),
        );
    }

    fn end_allele(&mut self, m: Marker) {
        let site_id = crate::encoding::site_id_of(m);
        self.reach_allele_end(site_id);

        let site_entry = self.bubble_starts[&site_id];
        self.back_wire = site_entry;
        self.cur_pos = self.nodes[site_entry.idx()].position;

        self.cur_locus.1 += 1;
        self.cur_node = push(
            &mut self.nodes,
            CoverageNode::new_sequence(self.cur_pos, site_id, self.cur_locus.1),
        );
    }

    fn exit_site(&mut self, m: Marker) {
        let site_id = crate::encoding::site_id_of(m);
        let site_exit = self.reach_allele_end(site_id);

        self.cur_locus = self.par_map.get(&site_id).copied().unwrap_or((0, 0));

        self.back_wire = site_exit;
        self.cur_pos = self.nodes[site_exit.idx()].position;
        self.cur_node = push(
            &mut self.nodes,
            CoverageNode::new_sequence(self.cur_pos, self.cur_locus.0, self.cur_locus.1),
        );
    }

    fn reach_allele_end(&mut self, site_id: SiteId) -> NodeIndex {
        debug_assert_eq!(self.cur_locus.0, site_id);
        let site_exit = self.bubble_ends[&site_id];
        self.wire(site_exit);
        if self.nodes[site_exit.idx()].position < self.cur_pos {
            self.nodes[site_exit.idx()].position = self.cur_pos;
        }
        site_exit
    }

    fn wire(&mut self, target: NodeIndex) {
        if self.nodes[self.cur_node.idx()].has_sequence() {
            add_edge(&mut self.nodes, self.back_wire, self.cur_node);
            add_edge(&mut self.nodes, self.cur_node, target);
        } else {
            add_edge(&mut self.nodes, self.back_wire, target);
        }
    }

    fn make_sink(&mut self) {
        let sink = push(
            &mut self.nodes,
            CoverageNode::new_sequence(self.cur_pos + 1, 0, 0),
        );
        self.wire(sink);
        self.back_wire = sink;
    }
}

fn push(nodes: &mut Vec<CoverageNode>, node: CoverageNode) -> NodeIndex {
    let idx = NodeIndex(nodes.len() as u32);
    nodes.push(node);
    idx
}

fn add_edge(nodes: &mut [CoverageNode], from: NodeIndex, to: NodeIndex) {
    nodes[from.idx()].edges.push(to);
}
