//! Simulation mode (spec §4.I, supplemented from `original_source`'s
//! `simulate.hpp`): assigns a uniformly random genotype to every bubble,
//! independent of any read coverage. Shares `Genotype`'s shape with the
//! level genotyper so downstream personalised-reference/JSON code does
//! not need to know which genotyper produced a call.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::genotype::Ploidy;
use crate::graph::CoverageGraph;
use crate::reference::CalledSites;

/// Assigns a random allele (or allele pair, for diploid) per bubble
/// using a seeded PRNG, replacing the source's bespoke
/// `RandomInclusiveInt` with `rand::rngs::StdRng`.
pub struct RandomGenotyper {
    rng: StdRng,
    ploidy: Ploidy,
}

impl RandomGenotyper {
    pub fn new(seed: u64, ploidy: Ploidy) -> Self {
        RandomGenotyper {
            rng: StdRng::seed_from_u64(seed),
            ploidy,
        }
    }

    /// Number of alleles at a bubble is derived from the graph: one past
    /// the highest `allele_id` recorded for that site's entry node's
    /// descendants. Callers that already track per-site allele counts
    /// can skip the graph lookup by calling `sample_site` directly.
    pub fn simulate(&mut self, graph: &CoverageGraph) -> CalledSites {
        let mut calls = CalledSites::new();
        for (&site_id, &entry) in graph.bubble_starts.iter() {
            let allele_count = count_alleles(graph, entry);
            if allele_count == 0 {
                continue;
            }
            calls.insert(site_id, Some(self.sample_site(allele_count)));
        }
        calls
    }

    pub fn sample_site(&mut self, allele_count: usize) -> crate::genotype::Genotype {
        match self.ploidy {
            Ploidy::Haploid => crate::genotype::Genotype::Haploid(self.rng.gen_range(0..allele_count)),
            Ploidy::Diploid => {
                let a = self.rng.gen_range(0..allele_count);
                let b = self.rng.gen_range(0..allele_count);
                crate::genotype::Genotype::Diploid(a, b)
            }
        }
    }
}

fn count_alleles(graph: &CoverageGraph, entry: crate::graph::NodeIndex) -> usize {
    let site_id = graph.node(entry).site_id;
    let mut max_allele = 0u32;
    let mut frontier: Vec<crate::graph::NodeIndex> = graph.edges_of(entry).to_vec();
    let mut visited = std::collections::HashSet::new();
    while let Some(idx) = frontier.pop() {
        if !visited.insert(idx) {
            continue;
        }
        let node = graph.node(idx);
        if node.site_id != site_id {
            continue;
        }
        max_allele = max_allele.max(node.allele_id);
        frontier.extend(graph.edges_of(idx).iter().copied());
    }
    max_allele as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prg::PrgString;

    #[test]
    fn simulate_assigns_a_genotype_to_every_bubble() {
        let markers = vec![1u32, 5, 2, 6, 3, 6, 4, 6, 1];
        let prg = PrgString::new(markers).unwrap();
        let graph = CoverageGraph::build(&prg);

        let mut sim = RandomGenotyper::new(42, Ploidy::Haploid);
        let calls = sim.simulate(&graph);
        assert_eq!(calls.len(), 1);
        assert!(calls.get(&5).unwrap().is_some());
    }

    #[test]
    fn diploid_simulation_is_deterministic_for_a_fixed_seed() {
        let markers = vec![1u32, 5, 2, 6, 3, 6, 4, 6, 1];
        let prg = PrgString::new(markers).unwrap();
        let graph = CoverageGraph::build(&prg);

        let calls_a = RandomGenotyper::new(7, Ploidy::Diploid).simulate(&graph);
        let calls_b = RandomGenotyper::new(7, Ploidy::Diploid).simulate(&graph);
        assert_eq!(format!("{:?}", calls_a), format!("{:?}", calls_b));
    }
}
