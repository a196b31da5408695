//! Kmer precomputation (spec §4.E): seed SA intervals for every kmer in
//! a kmer file, computed once and cached to a precalc file so later runs
//! can skip recomputation. Kmers are partitioned round-robin across a
//! fixed `rayon` pool sized the way `lorikeet.rs` sizes its own global
//! pool (`--threads`, clamped to hardware concurrency).

use std::collections::HashMap;

use rayon::prelude::*;

use crate::encoding::{encode_dna_bases, AlleleId, Marker};
use crate::fmindex::FmIndex;
use crate::search::{backward_search, Branch, Origin, SaInterval, SearchState};

pub const MAX_THREADS: usize = 25;

/// Picks the kmer-precompute / quasimap thread count the way the
/// teacher's CLI sizes its rayon pool: hardware concurrency minus one,
/// clamped to `[1, MAX_THREADS]`.
pub fn thread_count(requested: Option<usize>) -> usize {
    let available = requested.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    available.saturating_sub(1).clamp(1, MAX_THREADS)
}

/// Cached backward-search result for one kmer: its final branch list and
/// whether it occurs in the non-variant reference (no fan-out survived
/// beyond the `Original` branch).
#[derive(Debug, Clone)]
pub struct KmerEntry {
    pub kmer: Vec<Marker>,
    pub branches: SearchState,
    pub in_reference: bool,
}

/// Runs backward search from the full-text interval for every kmer in
/// `kmers`, across a pool of `threads` workers. Each worker owns its own
/// output map; the caller (standing in for "the main thread") collects
/// them after every worker has finished, mirroring the source's
/// join-then-dump-serially contract -- shared inputs (`index`, `mask_a`)
/// are read-only for the whole call.
pub fn precompute_kmers(
    index: &dyn FmIndex,
    mask_a: &[AlleleId],
    kmers: &[Vec<u8>],
    threads: usize,
) -> HashMap<Vec<u8>, KmerEntry> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .expect("failed to build kmer precompute thread pool");

    pool.install(|| {
        kmers
            .par_iter()
            .map(|raw_kmer| {
                let encoded = encode_dna_bases(raw_kmer);
                let branches = backward_search(index, mask_a, &encoded, Vec::new(), false);
                let in_reference = !branches
                    .iter()
                    .any(|b| b.origin == Origin::FannedOut);
                (
                    raw_kmer.clone(),
                    KmerEntry {
                        kmer: encoded,
                        branches,
                        in_reference,
                    },
                )
            })
            .collect()
    })
}

/// Serialises one kmer's cached entry to the precalc line format (§6):
/// `<bases>|<0|1>|<l1 r1 l2 r2 …>||<site_block>|<site_block>|…`
/// The doubled `|` after the SA intervals reserves a slot for reverse
/// intervals, kept for file compatibility; this crate does not populate
/// it.
pub fn dump_entry(raw_kmer: &[u8], entry: &KmerEntry) -> String {
    let bases = String::from_utf8_lossy(raw_kmer);
    let occurs = if entry.in_reference { "1" } else { "0" };
    let intervals: Vec<String> = entry
        .branches
        .iter()
        .flat_map(|b| vec![b.interval.0.to_string(), b.interval.1.to_string()])
        .collect();
    let site_blocks: Vec<String> = entry
        .branches
        .iter()
        .map(|b| {
            b.sites
                .iter()
                .map(|(marker, alleles)| {
                    let allele_strs: Vec<String> = alleles.iter().map(|a| a.to_string()).collect();
                    format!("{} {}", marker, allele_strs.join(" "))
                })
                .collect::<Vec<_>>()
                .join("@")
        })
        .collect();

    format!(
        "{}|{}|{}||{}",
        bases,
        occurs,
        intervals.join(" "),
        site_blocks.join("|")
    )
}

/// Parses one precalc line back into a `KmerEntry`. Returns `None` on a
/// blank line (callers skip those); malformed lines produce
/// `GramError::CorruptPrecalc` via `parse_precalc_line`.
pub fn parse_entry(line: &str) -> crate::errors::GramResult<(Vec<u8>, KmerEntry)> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 4 {
        return Err(crate::errors::GramError::CorruptPrecalc(format!(
            "expected at least 4 fields, got {} in line {:?}",
            fields.len(),
            line
        )));
    }
    let raw_kmer = fields[0].as_bytes().to_vec();
    let in_reference = match fields[1] {
        "1" => true,
        "0" => false,
        other => {
            return Err(crate::errors::GramError::CorruptPrecalc(format!(
                "expected 0 or 1 for occurs-in-reference flag, got {:?}",
                other
            )))
        }
    };
    let interval_values: Vec<u64> = if fields[2].trim().is_empty() {
        Vec::new()
    } else {
        fields[2]
            .split_whitespace()
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    crate::errors::GramError::CorruptPrecalc(format!(
                        "non-numeric SA interval bound {:?}",
                        v
                    ))
                })
            })
            .collect::<crate::errors::GramResult<Vec<u64>>>()?
    };
    if interval_values.len() % 2 != 0 {
        return Err(crate::errors::GramError::CorruptPrecalc(
            "odd number of SA interval bounds".to_string(),
        ));
    }

    let num_branches = interval_values.len() / 2;
    let site_field_blocks: Vec<&str> = if num_branches == 0 {
        Vec::new()
    } else {
        fields[4..].to_vec()
    };
    if site_field_blocks.len() != num_branches {
        return Err(crate::errors::GramError::CorruptPrecalc(format!(
            "expected {} site blocks for {} branches, got {}",
            num_branches,
            num_branches,
            site_field_blocks.len()
        )));
    }

    let mut branches = Vec::with_capacity(num_branches);
    for (i, site_block) in site_field_blocks.iter().enumerate() {
        let interval = SaInterval(interval_values[2 * i], interval_values[2 * i + 1]);
        let sites = if site_block.is_empty() {
            Vec::new()
        } else {
            site_block
                .split('@')
                .map(|entry| parse_site_entry(entry))
                .collect::<crate::errors::GramResult<Vec<_>>>()?
        };
        branches.push(Branch {
            interval,
            sites,
            origin: if in_reference && i == 0 {
                Origin::Original
            } else {
                Origin::FannedOut
            },
        });
    }

    let kmer = encode_dna_bases(&raw_kmer);
    Ok((
        raw_kmer,
        KmerEntry {
            kmer,
            branches,
            in_reference,
        },
    ))
}

fn parse_site_entry(entry: &str) -> crate::errors::GramResult<(Marker, Vec<AlleleId>)> {
    let mut parts = entry.split_whitespace();
    let marker = parts
        .next()
        .ok_or_else(|| crate::errors::GramError::CorruptPrecalc("empty site entry".to_string()))?
        .parse::<Marker>()
        .map_err(|_| crate::errors::GramError::CorruptPrecalc(format!("non-numeric marker in {:?}", entry)))?;
    let alleles: Vec<AlleleId> = parts
        .map(|a| {
            a.parse::<AlleleId>().map_err(|_| {
                crate::errors::GramError::CorruptPrecalc(format!("non-numeric allele id in {:?}", entry))
            })
        })
        .collect::<crate::errors::GramResult<Vec<_>>>()?;
    Ok((marker, alleles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmindex::NaiveFmIndex;

    fn single_bubble() -> (NaiveFmIndex, Vec<AlleleId>) {
        let text = vec![1u32, 5, 2, 6, 3, 6, 4, 6, 1];
        let mask_a = vec![0, 0, 1, 0, 2, 0, 3, 0, 0, 0];
        (NaiveFmIndex::new(text), mask_a)
    }

    #[test]
    fn precompute_runs_across_multiple_kmers() {
        let (index, mask_a) = single_bubble();
        let kmers = vec![b"A".to_vec(), b"C".to_vec()];
        let results = precompute_kmers(&index, &mask_a, &kmers, 2);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn dump_then_parse_round_trips_sa_intervals_and_sites() {
        let (index, mask_a) = single_bubble();
        let raw_kmer = b"A".to_vec();
        let encoded = encode_dna_bases(&raw_kmer);
        let branches = backward_search(&index, &mask_a, &encoded, Vec::new(), false);
        let entry = KmerEntry {
            kmer: encoded,
            branches,
            in_reference: true,
        };
        let dumped = dump_entry(&raw_kmer, &entry);
        let (parsed_kmer, parsed_entry) = parse_entry(&dumped).unwrap();
        assert_eq!(parsed_kmer, raw_kmer);
        assert_eq!(parsed_entry.branches.len(), entry.branches.len());
        for (a, b) in parsed_entry.branches.iter().zip(entry.branches.iter()) {
            assert_eq!(a.interval.0, b.interval.0);
            assert_eq!(a.interval.1, b.interval.1);
            assert_eq!(a.sites, b.sites);
        }
    }

    #[test]
    fn parse_rejects_wrong_field_count() {
        let err = parse_entry("ACGT|1|0 5").unwrap_err();
        assert!(matches!(err, crate::errors::GramError::CorruptPrecalc(_)));
    }
}
