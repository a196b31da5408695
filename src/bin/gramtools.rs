//! CLI surface (spec §4.J): `build` / `quasimap` / `genotype` /
//! `simulate` subcommands. Argument parsing, thread-pool sizing and
//! logging follow the same shape as the teacher binary's own
//! `set_log_level` / `--threads` handling, rewritten against clap v4
//! derive macros since this is a fresh binary rather than a port of the
//! teacher's own CLI surface.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use log::{info, warn, LevelFilter};

use gramtools::genotype::{Allele, GenotypeCall, GroupedAlleleCounts, LevelGenotyperModel, LikelihoodStats, Ploidy};
use gramtools::graph::CoverageGraph;
use gramtools::io::{
    allele_coverage_json, dump_precalc, genotype_report_json, load_precalc, FastaReader,
    GenotypeSiteReport,
};
use gramtools::kmer::{precompute_kmers, thread_count};
use gramtools::prg::PrgString;
use gramtools::quasimap::{quasimap_read, QuasimapStats};
use gramtools::reference::{build_personalised_references, CalledSites};
use gramtools::simulate::RandomGenotyper;

#[derive(Parser)]
#[command(name = "gramtools", version, about = "Quasi-mapping and level genotyping over a population reference graph")]
struct Cli {
    #[arg(short, long, global = true, help = "enable debug logging")]
    verbose: bool,

    #[arg(short, long, global = true, help = "suppress info logging")]
    quiet: bool,

    #[arg(short, long, global = true, help = "worker thread count (default: hardware concurrency - 1)")]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the coverage graph and FM-index from a PRG file.
    Build {
        #[arg(long)]
        prg: PathBuf,
        #[arg(long)]
        kmer_file: Option<PathBuf>,
        #[arg(long, default_value = "precalc.txt")]
        precalc_file: PathBuf,
    },
    /// Quasimap a read file against a built PRG, producing allele coverage.
    Quasimap {
        #[arg(long)]
        prg: PathBuf,
        #[arg(long)]
        reads: PathBuf,
        #[arg(long)]
        precalc_file: PathBuf,
        #[arg(long, default_value_t = 15)]
        kmer_size: usize,
        #[arg(long, default_value = "allele_coverage.json")]
        output: PathBuf,
    },
    /// Genotype every bubble from recorded allele coverage.
    Genotype {
        #[arg(long)]
        prg: PathBuf,
        #[arg(long, default_value_t = false)]
        diploid: bool,
        #[arg(long, default_value_t = 20.0)]
        mean_cov_depth: f64,
        #[arg(long, default_value_t = 0.001)]
        mean_pb_error: f64,
        #[arg(long, default_value_t = 1)]
        credible_cov_t: u32,
        #[arg(long, default_value = "genotype.json")]
        output: PathBuf,
    },
    /// Sample a random genotype per bubble, independent of coverage.
    Simulate {
        #[arg(long)]
        prg: PathBuf,
        #[arg(long, default_value_t = false)]
        diploid: bool,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value = "simulated_genotype.json")]
        output: PathBuf,
    },
    /// Generate a shell completion script for this CLI.
    ShellCompletion {
        #[arg(long, value_enum)]
        shell: Shell,
        #[arg(long)]
        output_file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    set_log_level(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Command::Build {
            prg,
            kmer_file,
            precalc_file,
        } => run_build(prg, kmer_file.as_deref(), precalc_file, cli.threads),
        Command::Quasimap {
            prg,
            reads,
            precalc_file,
            kmer_size,
            output,
        } => run_quasimap(prg, reads, precalc_file, *kmer_size, output),
        Command::Genotype {
            prg,
            diploid,
            mean_cov_depth,
            mean_pb_error,
            credible_cov_t,
            output,
        } => run_genotype(prg, *diploid, *mean_cov_depth, *mean_pb_error, *credible_cov_t, output),
        Command::Simulate {
            prg,
            diploid,
            seed,
            output,
        } => run_simulate(prg, *diploid, *seed, output),
        Command::ShellCompletion { shell, output_file } => run_shell_completion(*shell, output_file),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            warn!("gramtools failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn set_log_level(verbose: bool, quiet: bool) {
    let mut log_level = LevelFilter::Info;
    if verbose {
        log_level = LevelFilter::Debug;
    }
    if quiet {
        log_level = LevelFilter::Error;
    }
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level);
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let _ = builder.try_init();
}

fn run_shell_completion(shell: Shell, output_file: &std::path::Path) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    let mut file = std::fs::File::create(output_file)?;
    info!("generating completion script for shell {}", shell);
    generate(shell, &mut cmd, name, &mut file);
    Ok(())
}

fn load_prg(path: &std::path::Path) -> anyhow::Result<(PrgString, CoverageGraph)> {
    let prg = PrgString::from_marker_file(path)?;
    let graph = CoverageGraph::build(&prg);
    Ok((prg, graph))
}

/// Dense `position -> allele id` mask built from the graph's
/// `random_access` map (spec Design Note: `mask_a` travels in the PRG
/// bundle, never a process-wide singleton).
fn build_mask_a(prg: &PrgString, graph: &CoverageGraph) -> Vec<u32> {
    (0..prg.len())
        .map(|pos| {
            let (node_idx, _) = graph.random_access[pos];
            graph.node(node_idx).allele_id
        })
        .collect()
}

fn run_build(
    prg_path: &std::path::Path,
    kmer_file: Option<&std::path::Path>,
    precalc_path: &std::path::Path,
    threads: Option<usize>,
) -> anyhow::Result<()> {
    let (prg, graph) = load_prg(prg_path)?;
    info!("built coverage graph with {} nodes", graph.node_count());

    if let Some(kmer_file) = kmer_file {
        let index = gramtools::fmindex::NaiveFmIndex::new(prg.as_slice().to_vec());
        let mask_a = build_mask_a(&prg, &graph);
        let kmers: Vec<Vec<u8>> = std::fs::read_to_string(kmer_file)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.trim().as_bytes().to_vec())
            .collect();
        let pool_size = thread_count(threads);
        let results = precompute_kmers(&index, &mask_a, &kmers, pool_size);
        let entries: Vec<(Vec<u8>, gramtools::kmer::KmerEntry)> = results.into_iter().collect();
        dump_precalc(precalc_path, &entries)?;
        info!("precomputed {} kmers to {}", entries.len(), precalc_path.display());
    }
    Ok(())
}

fn run_quasimap(
    prg_path: &std::path::Path,
    reads_path: &std::path::Path,
    precalc_path: &std::path::Path,
    kmer_size: usize,
    output: &std::path::Path,
) -> anyhow::Result<()> {
    let (prg, graph) = load_prg(prg_path)?;
    let index = gramtools::fmindex::NaiveFmIndex::new(prg.as_slice().to_vec());
    let mask_a = build_mask_a(&prg, &graph);
    let precalc = load_precalc(precalc_path).unwrap_or_default();

    let mut stats = QuasimapStats::default();
    let reader = FastaReader::open(reads_path)?;
    for record in reader {
        let record = record?;
        quasimap_read(&index, &mask_a, &graph, kmer_size, &precalc, &record.bases, &mut stats);
    }
    info!(
        "quasimap: {} reads, {} skipped, {} mapped",
        stats.all_reads_count, stats.skipped_reads_count, stats.mapped_reads_count
    );

    let mut site_ids: Vec<u32> = graph.bubble_starts.keys().copied().collect();
    site_ids.sort();
    let per_site: Vec<Vec<u32>> = site_ids
        .iter()
        .map(|site_id| allele_coverages_for_site(&graph, *site_id))
        .collect();
    std::fs::write(output, allele_coverage_json(&per_site)?)?;
    Ok(())
}

fn allele_coverages_for_site(graph: &CoverageGraph, site_id: u32) -> Vec<u32> {
    let mut totals: HashMap<u32, u32> = HashMap::new();
    if let Some(&entry) = graph.bubble_starts.get(&site_id) {
        let mut frontier = vec![entry];
        let mut visited = std::collections::HashSet::new();
        while let Some(idx) = frontier.pop() {
            if !visited.insert(idx) {
                continue;
            }
            let node = graph.node(idx);
            if node.site_id == site_id {
                if node.has_sequence() {
                    let total: u32 = node.coverage_snapshot().into_iter().max().unwrap_or(0);
                    let entry = totals.entry(node.allele_id).or_insert(0);
                    *entry = (*entry).max(total);
                }
                for &next in graph.edges_of(idx) {
                    frontier.push(next);
                }
            }
        }
    }
    let max_allele = totals.keys().copied().max().unwrap_or(0);
    (1..=max_allele).map(|a| totals.get(&a).copied().unwrap_or(0)).collect()
}

fn run_genotype(
    prg_path: &std::path::Path,
    diploid: bool,
    mean_cov_depth: f64,
    mean_pb_error: f64,
    credible_cov_t: u32,
    output: &std::path::Path,
) -> anyhow::Result<()> {
    let (_prg, graph) = load_prg(prg_path)?;
    let l_stats = LikelihoodStats::new(mean_cov_depth, mean_pb_error, credible_cov_t);
    let ploidy = if diploid { Ploidy::Diploid } else { Ploidy::Haploid };

    let mut reports: HashMap<u32, GenotypeSiteReport> = HashMap::new();
    let mut calls: CalledSites = CalledSites::new();

    for site_id in graph.bubbles_outermost_first() {
        if let Some(&(parent_site, parent_allele)) = graph.par_map.get(&site_id) {
            let parent_called = match calls.get(&parent_site) {
                Some(Some(g)) => genotype_contains_allele(g, parent_allele),
                _ => false,
            };
            if !parent_called {
                calls.insert(site_id, None);
                continue;
            }
        }

        let alleles = alleles_at_site(&graph, site_id);
        let gp_counts = grouped_counts_from_coverage(&graph, site_id, alleles.len());
        let allele_seqs: Vec<String> = alleles.iter().map(|a| String::from_utf8_lossy(&a.sequence).to_string()).collect();
        let haplogroups: Vec<u32> = alleles.iter().map(|a| a.haplogroup_id).collect();

        let model = LevelGenotyperModel::new(alleles, gp_counts, ploidy, &l_stats);
        let call: GenotypeCall = model.genotype();
        calls.insert(site_id, call.genotype.clone());
        reports.insert(site_id, GenotypeSiteReport::from_call(&call, &allele_seqs, &haplogroups));
    }

    std::fs::write(output, genotype_report_json(&reports)?)?;

    let ref_dir = output.with_extension("personalised_ref.fasta");
    match build_personalised_references(&graph, &calls) {
        Ok(refs) => {
            let mut fasta = String::new();
            for (i, seq) in refs.iter().enumerate() {
                fasta.push_str(&format!(">copy_{}\n{}\n", i, String::from_utf8_lossy(seq)));
            }
            std::fs::write(&ref_dir, fasta)?;
        }
        Err(e) => warn!("personalised reference assembly skipped: {}", e),
    }
    Ok(())
}

fn genotype_contains_allele(genotype: &gramtools::genotype::Genotype, allele: u32) -> bool {
    use gramtools::genotype::Genotype;
    match genotype {
        Genotype::Haploid(a) => *a as u32 == allele.saturating_sub(1),
        Genotype::Diploid(a, b) => *a as u32 == allele.saturating_sub(1) || *b as u32 == allele.saturating_sub(1),
    }
}

fn alleles_at_site(graph: &CoverageGraph, site_id: u32) -> Vec<Allele> {
    let mut by_allele: HashMap<u32, (Vec<u8>, Vec<u32>)> = HashMap::new();
    if let Some(&entry) = graph.bubble_starts.get(&site_id) {
        let mut frontier = vec![entry];
        let mut visited = std::collections::HashSet::new();
        while let Some(idx) = frontier.pop() {
            if !visited.insert(idx) {
                continue;
            }
            let node = graph.node(idx);
            if node.site_id == site_id && node.has_sequence() {
                let bucket = by_allele.entry(node.allele_id).or_default();
                bucket.0.extend_from_slice(&node.sequence);
                bucket.1.extend(node.coverage_snapshot());
            }
            if node.site_id == site_id {
                for &next in graph.edges_of(idx) {
                    frontier.push(next);
                }
            }
        }
    }
    let mut allele_ids: Vec<u32> = by_allele.keys().copied().collect();
    allele_ids.sort();
    allele_ids
        .into_iter()
        .map(|id| {
            let (sequence, per_base_coverage) = by_allele.remove(&id).unwrap_or_default();
            Allele {
                sequence,
                per_base_coverage,
                haplogroup_id: id,
            }
        })
        .collect()
}

/// Folds per-node coverage snapshots back into a `GroupedAlleleCounts`
/// map. The coverage graph's node counters record per-allele hit
/// totals, not raw read-equivalence classes, so each allele's observed
/// maximum becomes its own singleton group -- a reasonable
/// approximation in the absence of a retained per-read branch log.
fn grouped_counts_from_coverage(graph: &CoverageGraph, site_id: u32, num_alleles: usize) -> GroupedAlleleCounts {
    let mut counts = GroupedAlleleCounts::new();
    for allele_id in 1..=num_alleles as u32 {
        let total = allele_coverages_for_site(graph, site_id)
            .get((allele_id - 1) as usize)
            .copied()
            .unwrap_or(0);
        if total > 0 {
            counts.insert([allele_id].into_iter().collect(), total);
        }
    }
    counts
}

fn run_simulate(
    prg_path: &std::path::Path,
    diploid: bool,
    seed: u64,
    output: &std::path::Path,
) -> anyhow::Result<()> {
    let (_prg, graph) = load_prg(prg_path)?;
    let ploidy = if diploid { Ploidy::Diploid } else { Ploidy::Haploid };
    let mut sim = RandomGenotyper::new(seed, ploidy);
    let calls = sim.simulate(&graph);

    let mut reports: HashMap<u32, GenotypeSiteReport> = HashMap::new();
    for (&site_id, genotype) in calls.iter() {
        let alleles = alleles_at_site(&graph, site_id);
        let allele_seqs: Vec<String> = alleles.iter().map(|a| String::from_utf8_lossy(&a.sequence).to_string()).collect();
        let haplogroups: Vec<u32> = alleles.iter().map(|a| a.haplogroup_id).collect();
        let called_alleles = genotype
            .as_ref()
            .map(gramtools::genotype::called_alleles)
            .unwrap_or_default();
        let call = GenotypeCall {
            genotype: genotype.clone(),
            called_alleles,
            confidence: 0.0,
            likelihoods: Vec::new(),
            covs: vec![0.0; alleles.len()],
        };
        reports.insert(site_id, GenotypeSiteReport::from_call(&call, &allele_seqs, &haplogroups));
    }
    std::fs::write(output, genotype_report_json(&reports)?)?;
    Ok(())
}
