//! Serialisation & IO (ambient, spec §6): PRG file reading lives on
//! `PrgString::from_marker_file`; this module covers the kmer precalc
//! file, allele-coverage / genotype JSON emission, and a minimal
//! line-oriented read source standing in for the FASTA/FASTQ parsing
//! spec.md marks out of scope ("referenced only via their interfaces").

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::Serialize;

use crate::encoding::SiteId;
use crate::errors::{GramError, GramResult};
use crate::genotype::{rescale, Genotype, GenotypeCall};
use crate::kmer::{dump_entry, parse_entry, KmerEntry};

/// Loads a kmer precalc file written by a prior run. A malformed line
/// is `GramError::CorruptPrecalc`; callers fall back to recomputing on
/// that error, per spec §7 ("cache misses: regenerate").
pub fn load_precalc(path: &Path) -> GramResult<HashMap<Vec<u8>, KmerEntry>> {
    let file = std::fs::File::open(path).map_err(|source| GramError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);
    let mut entries = HashMap::new();
    for line in reader.lines() {
        let line = line.map_err(|source| GramError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let (kmer, entry) = parse_entry(&line)?;
        entries.insert(kmer, entry);
    }
    Ok(entries)
}

/// Dumps every cached kmer entry to `path`, one per line, in the order
/// given. The main thread does this serially after every precompute
/// worker has joined (spec §4.E thread-pool contract).
pub fn dump_precalc(path: &Path, entries: &[(Vec<u8>, KmerEntry)]) -> GramResult<()> {
    let mut file = std::fs::File::create(path).map_err(|source| GramError::Io {
        path: path.display().to_string(),
        source,
    })?;
    for (raw_kmer, entry) in entries {
        writeln!(file, "{}", dump_entry(raw_kmer, entry)).map_err(|source| GramError::Io {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Allele-coverage JSON: `[[cov_a0_site0, cov_a1_site0, ...], ...]`,
/// ordered by ascending site id.
pub fn allele_coverage_json(per_site_covs: &[Vec<u32>]) -> GramResult<String> {
    serde_json::to_string(per_site_covs).map_err(|e| GramError::CorruptPrecalc(e.to_string()))
}

/// One site's genotype-call JSON shape (spec §6).
#[derive(Serialize)]
pub struct GenotypeSiteReport {
    #[serde(rename = "GT")]
    pub gt: Option<Vec<usize>>,
    pub likelihoods: Vec<(String, f64)>,
    pub confidence: f64,
    pub covs: Vec<f64>,
    pub alleles: Vec<String>,
    pub haplogroups: Vec<u32>,
}

impl GenotypeSiteReport {
    /// Builds the report so `gt` indexes `alleles`/`haplogroups`/`covs`:
    /// when a genotype was called, all four are reduced to the called
    /// alleles (spec §4.G stage 9) in ascending original-index order and
    /// `gt` is rescaled to index into that reduced set; a null call keeps
    /// the full-length arrays since there is no called set to reduce to.
    pub fn from_call(call: &GenotypeCall, allele_seqs: &[String], haplogroups: &[u32]) -> Self {
        let likelihoods = call
            .likelihoods
            .iter()
            .map(|(g, ll)| (format!("{:?}", g), *ll))
            .collect();

        let (gt, alleles, haplogroups, covs) = match &call.genotype {
            Some(g) if !call.called_alleles.is_empty() => {
                let rescaled = rescale(g, &call.called_alleles);
                let alleles = call.called_alleles.iter().map(|&i| allele_seqs[i].clone()).collect();
                let haplogroups = call.called_alleles.iter().map(|&i| haplogroups[i]).collect();
                let covs = call.called_alleles.iter().map(|&i| call.covs[i]).collect();
                (Some(genotype_to_indices(&rescaled)), alleles, haplogroups, covs)
            }
            Some(g) => (Some(genotype_to_indices(g)), allele_seqs.to_vec(), haplogroups.to_vec(), call.covs.clone()),
            None => (None, allele_seqs.to_vec(), haplogroups.to_vec(), call.covs.clone()),
        };

        GenotypeSiteReport {
            gt,
            likelihoods,
            confidence: call.confidence,
            covs,
            alleles,
            haplogroups,
        }
    }
}

fn genotype_to_indices(genotype: &Genotype) -> Vec<usize> {
    match genotype {
        Genotype::Haploid(a) => vec![*a],
        Genotype::Diploid(a, b) => vec![*a, *b],
    }
}

/// One JSON array, ordered by ascending site id, parallel to the
/// allele-coverage report's per-site ordering.
pub fn genotype_report_json(reports: &HashMap<SiteId, GenotypeSiteReport>) -> GramResult<String> {
    let mut site_ids: Vec<&SiteId> = reports.keys().collect();
    site_ids.sort();
    let ordered: Vec<&GenotypeSiteReport> = site_ids.into_iter().map(|id| &reports[id]).collect();
    serde_json::to_string(&ordered).map_err(|e| GramError::CorruptPrecalc(e.to_string()))
}

/// One encoded read pulled from a read source, ready for `quasimap_read`.
pub struct EncodedRead {
    pub name: String,
    pub bases: Vec<u8>,
}

/// Minimal line-oriented read source: FASTA (`>name` / sequence lines)
/// or FASTQ (`@name` / sequence / `+` / quality, quality discarded since
/// backward search is exact-match only). Real FASTQ parsing is out of
/// scope (spec.md "out of scope, referenced only via their interfaces");
/// this is the interface a richer parser would implement.
pub trait ReadSource: Iterator<Item = GramResult<EncodedRead>> {}

pub struct FastaReader<R> {
    lines: std::io::Lines<BufReader<R>>,
    pending_name: Option<String>,
}

impl FastaReader<std::fs::File> {
    pub fn open(path: &Path) -> GramResult<Self> {
        let file = std::fs::File::open(path).map_err(|source| GramError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut lines = BufReader::new(file).lines();
        let pending_name = loop {
            match lines.next() {
                Some(Ok(line)) if line.starts_with('>') => break Some(line),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(GramError::Io {
                        path: path.display().to_string(),
                        source: e,
                    })
                }
                None => break None,
            }
        };
        Ok(FastaReader { lines, pending_name })
    }
}

impl<R: std::io::Read> Iterator for FastaReader<R> {
    type Item = GramResult<EncodedRead>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut name = self.pending_name.take()?;
        if let Some(stripped) = name.strip_prefix('>') {
            name = stripped.to_string();
        }
        let mut bases = Vec::new();
        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    if line.starts_with('>') {
                        self.pending_name = Some(line);
                        break;
                    }
                    bases.extend(line.trim().bytes());
                }
                Some(Err(e)) => return Some(Err(GramError::Io {
                    path: "<fasta>".to_string(),
                    source: e,
                })),
                None => break,
            }
        }
        Some(Ok(EncodedRead { name, bases }))
    }
}

impl<R: std::io::Read> ReadSource for FastaReader<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype::Genotype;
    use std::io::Cursor;

    #[test]
    fn allele_coverage_json_shape() {
        let covs = vec![vec![1, 2, 3], vec![4, 5]];
        let json = allele_coverage_json(&covs).unwrap();
        assert_eq!(json, "[[1,2,3],[4,5]]");
    }

    #[test]
    fn genotype_report_includes_gt_and_confidence() {
        let call = GenotypeCall {
            genotype: Some(Genotype::Haploid(1)),
            called_alleles: vec![1],
            confidence: 3.5,
            likelihoods: vec![(Genotype::Haploid(1), -2.0), (Genotype::Haploid(0), -5.5)],
            covs: vec![1.0, 9.0],
        };
        let report = GenotypeSiteReport::from_call(&call, &["A".into(), "C".into()], &[0, 1]);
        assert_eq!(report.gt, Some(vec![0]));
        assert_eq!(report.alleles, vec!["C".to_string()]);
        assert_eq!(report.haplogroups, vec![1]);
        assert_eq!(report.covs, vec![9.0]);
        assert_eq!(report.confidence, 3.5);
    }

    #[test]
    fn precalc_round_trip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("precalc.txt");
        let entries = vec![(
            b"AC".to_vec(),
            KmerEntry {
                kmer: vec![1, 2],
                branches: vec![crate::search::Branch {
                    interval: crate::search::SaInterval(0, 3),
                    sites: vec![(5, vec![1])],
                    origin: crate::search::Origin::FannedOut,
                }],
                in_reference: false,
            },
        )];
        dump_precalc(&path, &entries).unwrap();
        let parsed = load_precalc(&path).unwrap();
        assert_eq!(parsed.len(), 1);
        let entry = &parsed[&b"AC".to_vec()];
        assert_eq!(entry.branches[0].interval.0, 0);
        assert_eq!(entry.branches[0].interval.1, 3);
    }

    #[test]
    fn fasta_reader_splits_records_on_header_lines() {
        let data = b">read1\nACGT\n>read2\nTTTT\nAAAA\n".to_vec();
        let mut reader = FastaReader {
            lines: BufReader::new(Cursor::new(data)).lines(),
            pending_name: Some(">read1".to_string()),
        };
        let first = reader.next().unwrap().unwrap();
        assert_eq!(first.name, "read1");
        assert_eq!(first.bases, b"ACGT");
        let second = reader.next().unwrap().unwrap();
        assert_eq!(second.name, "read2");
        assert_eq!(second.bases, b"TTTTAAAA");
    }
}
