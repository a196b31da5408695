//! Level genotyper (spec §4.G): converts grouped per-equivalence-class
//! read counts into haploid/homozygous/heterozygous log-likelihoods over
//! the alleles of a bubble, picks the maximum, and derives a confidence
//! from the top two likelihoods. Ported from `level_genotyping/model.hpp`
//! and `probabilities.cpp`; `PoissonLogPmf` mirrors the source's
//! `AbstractPmf` memoisation (compute once per queried count, cache
//! keyed on that count, safe to reuse across a whole bubble traversal
//! since genotyping runs one bubble at a time on a single thread).

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use ordered_float::OrderedFloat;
use statrs::distribution::{Discrete, Poisson};

use crate::encoding::AlleleId;

pub type GroupedAlleleCounts = HashMap<BTreeSet<AlleleId>, u32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ploidy {
    Haploid,
    Diploid,
}

/// One allele at a bubble: its sequence, per-base coverage, and the
/// haplogroup id it belongs to (its own allele id for a top-level site,
/// the parent's allele id for a nested one's outer context).
#[derive(Debug, Clone)]
pub struct Allele {
    pub sequence: Vec<u8>,
    pub per_base_coverage: Vec<u32>,
    pub haplogroup_id: AlleleId,
}

impl Allele {
    pub fn credible_positions(&self, credible_cov_t: u32) -> usize {
        self.per_base_coverage
            .iter()
            .filter(|&&c| c >= credible_cov_t)
            .count()
    }

    pub fn total_coverage(&self) -> u64 {
        self.per_base_coverage.iter().map(|&c| c as u64).sum()
    }
}

/// Poisson log-pmf for a fixed lambda, memoised per queried count (Design
/// Note 4). Lambda `<= 0` is clamped to a small epsilon so degenerate
/// zero-depth bubbles still produce a (very negative but finite)
/// likelihood rather than panicking.
pub struct PoissonLogPmf {
    dist: Poisson,
    cache: RefCell<HashMap<u64, f64>>,
}

impl PoissonLogPmf {
    pub fn new(lambda: f64) -> Self {
        let safe_lambda = if lambda > 0.0 { lambda } else { 1e-9 };
        PoissonLogPmf {
            dist: Poisson::new(safe_lambda).expect("lambda must be positive and finite"),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn log_pmf(&self, k: u64) -> f64 {
        if let Some(&v) = self.cache.borrow().get(&k) {
            return v;
        }
        let v = self.dist.ln_pmf(k);
        self.cache.borrow_mut().insert(k, v);
        v
    }
}

/// Shared per-run likelihood parameters (spec §3 `Likelihood stats`).
pub struct LikelihoodStats {
    pub mean_cov_depth: f64,
    pub mean_pb_error: f64,
    pub log_mean_pb_error: f64,
    pub log_no_zero: f64,
    pub log_no_zero_half_depth: f64,
    pub credible_cov_t: u32,
    pub poisson_full_depth: PoissonLogPmf,
    pub poisson_half_depth: PoissonLogPmf,
}

impl LikelihoodStats {
    pub fn new(mean_cov_depth: f64, mean_pb_error: f64, credible_cov_t: u32) -> Self {
        LikelihoodStats {
            mean_cov_depth,
            mean_pb_error,
            log_mean_pb_error: mean_pb_error.ln(),
            log_no_zero: (1.0 - mean_pb_error).ln(),
            log_no_zero_half_depth: (1.0 - mean_pb_error).ln(),
            credible_cov_t,
            poisson_full_depth: PoissonLogPmf::new(mean_cov_depth),
            poisson_half_depth: PoissonLogPmf::new(mean_cov_depth / 2.0),
        }
    }
}

/// Which alleles the genotyper settled on, as positions into the bubble's
/// `alleles` vector, or `None` if the site was null-genotyped. These
/// indices are the original (ungrouped) ones -- par_map/parent-allele
/// comparisons and personalised-reference splicing need them as-is.
/// `rescale` derives the reporting-only `0..k` called-allele view from
/// `called_alleles` on top of this (spec §4.G stage 9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Genotype {
    Haploid(usize),
    Diploid(usize, usize),
}

#[derive(Debug, Clone)]
pub struct GenotypeCall {
    pub genotype: Option<Genotype>,
    /// Sorted, deduplicated original allele indices appearing in
    /// `genotype` -- the "called alleles" of spec §4.G stage 9 (e.g.
    /// `{0,2}` for a chosen het `Diploid(0,2)`). Empty when `genotype`
    /// is `None`.
    pub called_alleles: Vec<usize>,
    pub confidence: f64,
    pub likelihoods: Vec<(Genotype, f64)>,
    pub covs: Vec<f64>,
}

/// Haploid exclusive-coverage sums for a genotyped allele `allele` within
/// a grouped-count map: `Σ gp_counts[G]` over every group containing it.
fn haploid_coverage(gp_counts: &GroupedAlleleCounts, allele: AlleleId) -> f64 {
    gp_counts
        .iter()
        .filter(|(group, _)| group.contains(&allele))
        .map(|(_, &count)| count as f64)
        .sum()
}

fn singleton_coverage(gp_counts: &GroupedAlleleCounts, allele: AlleleId) -> f64 {
    let singleton: BTreeSet<AlleleId> = [allele].into_iter().collect();
    gp_counts.get(&singleton).copied().unwrap_or(0) as f64
}

/// Splits every multi-allelic class between `a` and `b` for a
/// heterozygous hypothesis: classes naming only `a` (never `b`, ignoring
/// any other alleles also present) accrue entirely to `a` and vice
/// versa; classes naming both are dispatched proportionally to each
/// allele's already-accrued exclusive share, or split 1:1 when neither
/// has any (spec §4.G stage 6, example scenarios 3-4).
fn dispatch_heterozygous_coverage(
    gp_counts: &GroupedAlleleCounts,
    a: AlleleId,
    b: AlleleId,
) -> (f64, f64) {
    let mut unique_a = 0.0;
    let mut unique_b = 0.0;
    let mut shared = 0.0;
    for (group, &count) in gp_counts {
        match (group.contains(&a), group.contains(&b)) {
            (true, true) => shared += count as f64,
            (true, false) => unique_a += count as f64,
            (false, true) => unique_b += count as f64,
            (false, false) => {}
        }
    }
    if unique_a + unique_b == 0.0 {
        (unique_a + shared / 2.0, unique_b + shared / 2.0)
    } else {
        let total = unique_a + unique_b;
        (
            unique_a + shared * (unique_a / total),
            unique_b + shared * (unique_b / total),
        )
    }
}

pub struct LevelGenotyperModel<'a> {
    alleles: Vec<Allele>,
    gp_counts: GroupedAlleleCounts,
    ploidy: Ploidy,
    l_stats: &'a LikelihoodStats,
}

impl<'a> LevelGenotyperModel<'a> {
    pub fn new(
        mut alleles: Vec<Allele>,
        gp_counts: GroupedAlleleCounts,
        ploidy: Ploidy,
        l_stats: &'a LikelihoodStats,
    ) -> Self {
        assign_empty_allele_coverage(&mut alleles, &gp_counts);
        LevelGenotyperModel {
            alleles,
            gp_counts,
            ploidy,
            l_stats,
        }
    }

    fn haploid_log_likelihood(&self, allele_idx: usize) -> f64 {
        let allele = &self.alleles[allele_idx];
        let coverage = haploid_coverage(&self.gp_counts, allele.haplogroup_id).round() as u64;
        let credible = allele.credible_positions(self.l_stats.credible_cov_t) as f64;
        let len = allele.per_base_coverage.len() as f64;
        self.l_stats.poisson_full_depth.log_pmf(coverage)
            + credible * self.l_stats.log_no_zero
            + (len - credible) * self.l_stats.log_mean_pb_error
    }

    /// Homozygous diploid likelihood: both copies are the same allele, so
    /// the observed coverage and credible-position terms are identical to
    /// the haploid hypothesis, evaluated against the same full-depth
    /// Poisson (spec §4.G stage 5).
    fn homozygous_log_likelihood(&self, allele_idx: usize) -> f64 {
        self.haploid_log_likelihood(allele_idx)
    }

    fn heterozygous_log_likelihood(&self, a_idx: usize, b_idx: usize) -> f64 {
        let a = &self.alleles[a_idx];
        let b = &self.alleles[b_idx];
        let (cov_a, cov_b) = if a.haplogroup_id == b.haplogroup_id {
            let shared = haploid_coverage(&self.gp_counts, a.haplogroup_id);
            (shared / 2.0, shared / 2.0)
        } else {
            dispatch_heterozygous_coverage(&self.gp_counts, a.haplogroup_id, b.haplogroup_id)
        };

        let credible_a = a.credible_positions(self.l_stats.credible_cov_t) as f64;
        let credible_b = b.credible_positions(self.l_stats.credible_cov_t) as f64;
        let len_a = a.per_base_coverage.len() as f64;
        let len_b = b.per_base_coverage.len() as f64;

        self.l_stats.poisson_half_depth.log_pmf(cov_a.round() as u64)
            + self.l_stats.poisson_half_depth.log_pmf(cov_b.round() as u64)
            + credible_a * self.l_stats.log_no_zero_half_depth
            + (len_a - credible_a) * self.l_stats.log_mean_pb_error
            + credible_b * self.l_stats.log_no_zero_half_depth
            + (len_b - credible_b) * self.l_stats.log_mean_pb_error
    }

    /// Allele pairs eligible for a heterozygous hypothesis: each allele
    /// must carry at least one unit of strict singleton coverage
    /// (`gp_counts[{a}] >= 1`), bounding the combinatorics and matching
    /// the Open Question in spec §9 -- a site whose coverage is entirely
    /// multi-allelic yields an empty set here, not a fabricated pair.
    fn heterozygous_candidates(&self) -> Vec<(usize, usize)> {
        let n = self.alleles.len();
        let mut pairs = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                let hap_i = self.alleles[i].haplogroup_id;
                let hap_j = self.alleles[j].haplogroup_id;
                if singleton_coverage(&self.gp_counts, hap_i) >= 1.0
                    && singleton_coverage(&self.gp_counts, hap_j) >= 1.0
                {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }

    fn total_coverage(&self) -> u64 {
        self.gp_counts.values().map(|&c| c as u64).sum()
    }

    /// Runs stages 1-9 and returns the call. A null call is recorded
    /// instead of a panic whenever the chosen likelihood is not a strict
    /// maximum, or there is no coverage at all (spec §4.G stage 8).
    pub fn genotype(&self) -> GenotypeCall {
        let mut candidates: Vec<(Genotype, f64)> = Vec::new();

        for (idx, _) in self.alleles.iter().enumerate() {
            match self.ploidy {
                Ploidy::Haploid => {
                    candidates.push((Genotype::Haploid(idx), self.haploid_log_likelihood(idx)));
                }
                Ploidy::Diploid => {
                    candidates.push((
                        Genotype::Diploid(idx, idx),
                        self.homozygous_log_likelihood(idx),
                    ));
                }
            }
        }
        if self.ploidy == Ploidy::Diploid {
            for (i, j) in self.heterozygous_candidates() {
                candidates.push((Genotype::Diploid(i, j), self.heterozygous_log_likelihood(i, j)));
            }
        }

        let covs: Vec<f64> = self
            .alleles
            .iter()
            .map(|a| haploid_coverage(&self.gp_counts, a.haplogroup_id))
            .collect();

        if self.total_coverage() == 0 || candidates.is_empty() {
            return GenotypeCall {
                genotype: None,
                called_alleles: Vec::new(),
                confidence: 0.0,
                likelihoods: candidates,
                covs,
            };
        }

        candidates.sort_by_key(|(_, ll)| std::cmp::Reverse(OrderedFloat(*ll)));
        let (best_genotype, best_ll) = candidates[0].clone();
        let is_unique_max = candidates.len() < 2 || candidates[1].1 < best_ll;

        if !is_unique_max {
            return GenotypeCall {
                genotype: None,
                called_alleles: Vec::new(),
                confidence: 0.0,
                likelihoods: candidates,
                covs,
            };
        }

        let confidence = if candidates.len() >= 2 {
            best_ll - candidates[1].1
        } else {
            best_ll
        };

        GenotypeCall {
            called_alleles: called_alleles(&best_genotype),
            genotype: Some(best_genotype),
            confidence,
            likelihoods: candidates,
            covs,
        }
    }
}

/// The distinct allele indices appearing in `genotype`, sorted ascending
/// (spec §4.G stage 9's "called alleles", e.g. `Diploid(0, 2)` ->
/// `{0,2}`), not the alleles that happen to carry coverage.
pub fn called_alleles(genotype: &Genotype) -> Vec<usize> {
    let mut ids = match genotype {
        Genotype::Haploid(a) => vec![*a],
        Genotype::Diploid(a, b) => vec![*a, *b],
    };
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Rescales allele indices in `genotype` to their position within
/// `called`, the ascending list of called-allele indices (spec §4.G
/// stage 9, e.g. `{0,2,4} -> {0,1,2}`). `called` is expected to contain
/// every index `genotype` refers to.
pub fn rescale(genotype: &Genotype, called: &[usize]) -> Genotype {
    let map_idx = |idx: usize| -> usize {
        called.iter().position(|&c| c == idx).unwrap_or(idx)
    };
    match genotype {
        Genotype::Haploid(a) => Genotype::Haploid(map_idx(*a)),
        Genotype::Diploid(a, b) => Genotype::Diploid(map_idx(*a), map_idx(*b)),
    }
}

/// Stage 1: an empty-sequence (deletion) allele gets one synthetic base
/// of coverage equal to the sum of every grouped-count entry whose key
/// contains its haplogroup.
fn assign_empty_allele_coverage(alleles: &mut [Allele], gp_counts: &GroupedAlleleCounts) {
    for allele in alleles.iter_mut() {
        if allele.sequence.is_empty() && allele.per_base_coverage.is_empty() {
            let synthetic = haploid_coverage(gp_counts, allele.haplogroup_id).round() as u32;
            allele.per_base_coverage.push(synthetic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(pairs: &[(&[AlleleId], u32)]) -> GroupedAlleleCounts {
        pairs
            .iter()
            .map(|(ids, count)| (ids.iter().copied().collect(), *count))
            .collect()
    }

    #[test]
    fn haploid_coverage_from_singleton_counts() {
        let gp = groups(&[(&[0], 5), (&[1], 10), (&[3], 1)]);
        let expected = [5.0, 10.0, 0.0, 1.0];
        for (allele, exp) in expected.iter().enumerate() {
            assert_eq!(haploid_coverage(&gp, allele as AlleleId), *exp);
        }
    }

    #[test]
    fn haploid_coverage_with_multi_allelic_classes() {
        let gp = groups(&[(&[0], 5), (&[0, 1], 4), (&[1], 10), (&[2, 3], 1)]);
        assert_eq!(haploid_coverage(&gp, 0), 9.0);
        assert_eq!(haploid_coverage(&gp, 1), 14.0);
        assert_eq!(haploid_coverage(&gp, 2), 1.0);
        assert_eq!(haploid_coverage(&gp, 3), 1.0);
        assert_eq!(singleton_coverage(&gp, 0), 5.0);
        assert_eq!(singleton_coverage(&gp, 1), 10.0);
        assert_eq!(singleton_coverage(&gp, 2), 0.0);
    }

    #[test]
    fn diploid_coverage_dispatch_proportional_to_unique_shares() {
        let gp = groups(&[(&[0], 7), (&[0, 1], 4), (&[1], 20), (&[0, 3], 3), (&[2, 3], 1)]);
        let (cov_a, cov_b) = dispatch_heterozygous_coverage(&gp, 0, 1);
        assert!((cov_a - (10.0 + 4.0 / 3.0)).abs() < 1e-9);
        assert!((cov_b - (20.0 + 8.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn diploid_dispatch_with_zero_singletons_splits_evenly() {
        let gp = groups(&[(&[0, 1], 3), (&[2, 3], 1)]);
        let (cov_a, cov_b) = dispatch_heterozygous_coverage(&gp, 0, 1);
        assert!((cov_a - 1.5).abs() < 1e-9);
        assert!((cov_b - 1.5).abs() < 1e-9);
    }

    #[test]
    fn credible_positions_counts_bases_at_or_above_threshold() {
        let allele = Allele {
            sequence: b"ATCGCCG".to_vec(),
            per_base_coverage: vec![0, 0, 2, 3, 3, 5, 4],
            haplogroup_id: 0,
        };
        assert_eq!(allele.credible_positions(3), 4);
    }

    #[test]
    fn all_multiallelic_site_yields_no_heterozygous_candidates() {
        let gp = groups(&[(&[0, 1], 10)]);
        let l_stats = LikelihoodStats::new(10.0, 0.001, 3);
        let alleles = vec![
            Allele { sequence: b"AC".to_vec(), per_base_coverage: vec![5, 5], haplogroup_id: 0 },
            Allele { sequence: b"GG".to_vec(), per_base_coverage: vec![5, 5], haplogroup_id: 1 },
        ];
        let model = LevelGenotyperModel::new(alleles, gp, Ploidy::Diploid, &l_stats);
        assert!(model.heterozygous_candidates().is_empty());
    }

    #[test]
    fn chosen_genotype_is_strict_maximum_or_null() {
        let gp = groups(&[(&[0], 20)]);
        let l_stats = LikelihoodStats::new(20.0, 0.001, 3);
        let alleles = vec![
            Allele { sequence: b"AAAA".to_vec(), per_base_coverage: vec![20, 20, 20, 20], haplogroup_id: 0 },
            Allele { sequence: b"CCCC".to_vec(), per_base_coverage: vec![0, 0, 0, 0], haplogroup_id: 1 },
        ];
        let model = LevelGenotyperModel::new(alleles, gp, Ploidy::Haploid, &l_stats);
        let call = model.genotype();
        assert!(call.genotype.is_some());
        let top = call.likelihoods[0].1;
        assert!(call.likelihoods[1..].iter().all(|(_, ll)| *ll < top));
    }

    #[test]
    fn zero_coverage_site_is_null() {
        let gp = GroupedAlleleCounts::new();
        let l_stats = LikelihoodStats::new(20.0, 0.001, 3);
        let alleles = vec![Allele { sequence: b"AA".to_vec(), per_base_coverage: vec![0, 0], haplogroup_id: 0 }];
        let model = LevelGenotyperModel::new(alleles, gp, Ploidy::Haploid, &l_stats);
        let call = model.genotype();
        assert!(call.genotype.is_none());
    }
}
