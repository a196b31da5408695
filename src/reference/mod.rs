//! Personalised reference assembly (spec §4.H, thin/non-core). Walks the
//! genotyped coverage graph from the root and splices each haploid
//! copy's called allele sequence at every bubble, appending plain
//! sequence to every copy unmodified. Ported from the source's
//! `personalised_reference.cpp`.

use std::collections::HashMap;

use crate::encoding::{AlleleId, SiteId};
use crate::errors::{GramError, GramResult};
use crate::genotype::Genotype;
use crate::graph::{CoverageGraph, NodeIndex};

/// Resolved call for one bubble: the called allele(s) (one per haploid
/// copy) or `None` if the site was null-genotyped -- a null site, or one
/// whose parent allele was not itself called, contributes the reference
/// (allele 0) path to every copy, mirroring a graph walk that simply
/// has nothing better to splice in.
pub type CalledSites = HashMap<SiteId, Option<Genotype>>;

/// Ploidy is inferred from the first non-null call; every other called
/// site must agree, else `GramError::InconsistentPloidy`.
fn infer_ploidy(calls: &CalledSites) -> GramResult<usize> {
    let mut ploidy = None;
    for call in calls.values().flatten() {
        let this_ploidy = match call {
            Genotype::Haploid(_) => 1,
            Genotype::Diploid(_, _) => 2,
        };
        match ploidy {
            None => ploidy = Some(this_ploidy),
            Some(p) if p != this_ploidy => return Err(GramError::InconsistentPloidy),
            _ => {}
        }
    }
    Ok(ploidy.unwrap_or(1))
}

/// Builds one personalised-reference sequence per haploid copy, walking
/// the graph from root to sink. Output is deduplicated (a `BTreeSet`
/// over the completed sequences stands in for the source's
/// `unique_Fastas`).
pub fn build_personalised_references(
    graph: &CoverageGraph,
    calls: &CalledSites,
) -> GramResult<Vec<Vec<u8>>> {
    let ploidy = infer_ploidy(calls)?;
    let mut copies: Vec<Vec<u8>> = vec![Vec::new(); ploidy];

    let mut node_idx = graph.root;
    loop {
        let node = graph.node(node_idx);
        if node.has_sequence() {
            for copy in copies.iter_mut() {
                copy.extend_from_slice(&node.sequence);
            }
        }

        if let Some(&exit) = graph.bubble_map.get(&node_idx) {
            let site_id = graph.node(node_idx).site_id;
            let chosen = calls.get(&site_id).and_then(|c| c.as_ref());
            let allele_ids: Vec<AlleleId> = match chosen {
                Some(Genotype::Haploid(a)) => vec![*a as AlleleId + 1; ploidy],
                Some(Genotype::Diploid(a, b)) => {
                    vec![*a as AlleleId + 1, *b as AlleleId + 1]
                }
                None => vec![1; ploidy],
            };
            for (copy, &allele_id) in copies.iter_mut().zip(allele_ids.iter()) {
                splice_allele(graph, node_idx, allele_id, copy);
            }
            node_idx = exit;
            continue;
        }

        let edges = graph.edges_of(node_idx);
        match edges.first() {
            Some(&next) => node_idx = next,
            None => break,
        }
    }

    let unique: std::collections::BTreeSet<Vec<u8>> = copies.into_iter().collect();
    Ok(unique.into_iter().collect())
}

/// Appends the sequence of allele `allele_id` at bubble `entry` to
/// `copy`, walking only the nodes belonging to that allele.
fn splice_allele(graph: &CoverageGraph, entry: NodeIndex, allele_id: AlleleId, copy: &mut Vec<u8>) {
    let site_id = graph.node(entry).site_id;
    let mut frontier: Vec<NodeIndex> = graph.edges_of(entry).to_vec();
    let mut visited = std::collections::HashSet::new();
    while let Some(idx) = frontier.pop() {
        if !visited.insert(idx) {
            continue;
        }
        let node = graph.node(idx);
        if node.site_id != site_id || node.allele_id != allele_id {
            continue;
        }
        copy.extend_from_slice(&node.sequence);
        frontier.extend(graph.edges_of(idx).iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prg::PrgString;

    #[test]
    fn mismatched_ploidy_across_called_sites_is_fatal() {
        let markers = vec![1u32, 5, 2, 7, 3, 8, 4, 6, 1, 6, 1];
        let prg = PrgString::new(markers).unwrap();
        let graph = CoverageGraph::build(&prg);

        let mut calls: CalledSites = HashMap::new();
        calls.insert(5, Some(Genotype::Haploid(0)));
        calls.insert(7, Some(Genotype::Diploid(0, 1)));

        let result = build_personalised_references(&graph, &calls);
        assert!(matches!(result, Err(GramError::InconsistentPloidy)));
    }

    #[test]
    fn null_site_falls_back_to_reference_allele() {
        let markers = vec![1u32, 5, 2, 6, 3, 6, 4, 6, 1];
        let prg = PrgString::new(markers).unwrap();
        let graph = CoverageGraph::build(&prg);

        let calls: CalledSites = HashMap::new();
        let refs = build_personalised_references(&graph, &calls).unwrap();
        assert_eq!(refs.len(), 1);
        assert!(refs[0].starts_with(b"A"));
    }
}
