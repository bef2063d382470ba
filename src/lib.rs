// src/lib.rs
pub mod types;
pub mod error;
pub mod taxdb;
pub mod accession;
pub mod hits;
pub mod coverage;
pub mod ownership;
pub mod classify_query;
pub mod lca;
pub mod merge;
pub mod report;

use rayon::prelude::*;
use std::io::Read;
use std::path::PathBuf;

use crate::accession::{AccessionIndex, AccessionResolver, IndexMode};
use crate::classify_query::{build_lineages, classify_query, group_by_query, QueryHits};
use crate::error::Error;
use crate::hits::{open_maybe_gz, read_fasta_lengths, read_hits, HitFormat, QueryLengths};
use crate::lca::{select_all, LcaMode};
use crate::merge::{merge_by_contig, top_hits, ContigNaming};
use crate::ownership::OwnershipPolicy;
use crate::report::{contig_report, coverage_report, lca_report, parse_coverage_report, top_hit_report};
use crate::taxdb::TaxonomyStore;
use crate::types::{ContigRecord, CoverageRecord, Hit, LcaCall, Rank};

/// Knobs of one engine run. `Default` reproduces the classic pipeline behaviour.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub hit_format: HitFormat,
    pub lca_mode: LcaMode,
    pub contig_naming: ContigNaming,
    pub ownership_policy: OwnershipPolicy,
    /// Count a hit to the same taxon over the same region only once in the statistics.
    pub dedup_identical_hits: bool,
    pub accession_index_mode: IndexMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hit_format: HitFormat::Guess,
            lca_mode: LcaMode::OwnedCoverage,
            contig_naming: ContigNaming::Identity,
            ownership_policy: OwnershipPolicy::FirstWriter,
            dedup_identical_hits: true,
            accession_index_mode: IndexMode::OnDisk,
        }
    }
}

/// Structured results of a run. Text is generated on demand.
pub struct ClassificationResults {
    /// Per-query, per-rank rows in output order
    pub coverage_records: Vec<CoverageRecord>,

    /// One call per query whose evidence narrowed to a single taxon
    pub lca_calls: Vec<LcaCall>,

    /// Coverage rows summed per contig
    pub contig_records: Vec<ContigRecord>,

    /// Diagnostics
    pub missing_accessions: Vec<String>,
    pub invalid_identifiers: Vec<String>,
    pub skipped_hits: usize,
}

impl ClassificationResults {
    pub fn get_coverage_report(&self) -> String {
        coverage_report(&self.coverage_records)
    }

    pub fn get_lca_report(&self) -> String {
        lca_report(&self.lca_calls)
    }

    pub fn get_contig_report(&self) -> String {
        contig_report(&self.contig_records)
    }

    /// Leading taxon per (contig, rank), optionally restricted to one rank and
    /// prefixed with a project name.
    pub fn get_top_hit_report(&self, rank: Option<Rank>, project: Option<&str>) -> String {
        top_hit_report(&top_hits(&self.contig_records, rank), project)
    }

    /// Missing accessions, one per line.
    pub fn get_missing_accessions_text(&self) -> String {
        self.missing_accessions
            .iter()
            .map(|a| format!("{}\n", a))
            .collect()
    }
}

/// Classifies every query found in `hits`.
///
/// Hits are grouped by query (arrival order kept within a query), the queries run
/// on the rayon pool, and rows come back sorted by query id. The output does not
/// depend on the number of threads.
pub fn classify_queries_parallel(
    hits: &[Hit],
    resolver: &AccessionResolver,
    taxonomy: &TaxonomyStore,
    config: &EngineConfig,
) -> Vec<CoverageRecord> {
    let grouped = group_by_query(hits, resolver);
    let lineages = build_lineages(taxonomy, grouped.values());
    let tie_break = config.ownership_policy.tie_break();

    let queries: Vec<&QueryHits> = grouped.values().collect();
    let per_query: Vec<Vec<CoverageRecord>> = queries
        .par_iter()
        .map(|query| classify_query(query, &lineages, tie_break, config.dedup_identical_hits))
        .collect();

    log::info!(
        "Classified {} queries from {} hits using {} lineages",
        per_query.len(),
        hits.len(),
        lineages.len()
    );
    per_query.into_iter().flatten().collect()
}

/// Taxonomy and accession resolver, loaded once and reused across runs.
pub struct References {
    pub taxonomy: TaxonomyStore,
    pub resolver: AccessionResolver,
}

impl References {
    pub fn load(
        taxonomy_path: &str,
        accession_index_path: &str,
        mode: IndexMode,
    ) -> Result<Self, Error> {
        let taxonomy = TaxonomyStore::load(taxonomy_path)?;
        let index = AccessionIndex::open_with_mode(accession_index_path, mode)?;
        Ok(Self {
            taxonomy,
            resolver: AccessionResolver::new(index),
        })
    }
}

/// Classifies hit files against already loaded references.
///
/// The resolver's missing and invalid sets accumulate over every run that
/// shares it.
pub fn classify_with(
    refs: &References,
    hits_paths: Vec<PathBuf>,
    lengths_fasta: Option<PathBuf>,
    config: &EngineConfig,
) -> Result<ClassificationResults, Error> {
    // 1. Query lengths for formats that do not carry them
    let lengths = match lengths_fasta {
        Some(path) => read_fasta_lengths(path)?,
        None => QueryLengths::new(),
    };

    // 2. Read all hits
    let mut all_hits = Vec::new();
    let mut skipped_hits = 0;
    for path in hits_paths {
        let batch = read_hits(&path, config.hit_format, &lengths)?;
        skipped_hits += batch.skipped;
        all_hits.extend(batch.hits);
    }

    // 3. Classify, call LCAs, merge by contig
    let coverage_records =
        classify_queries_parallel(&all_hits, &refs.resolver, &refs.taxonomy, config);
    let lca_calls = select_all(&coverage_records, config.lca_mode);
    let contig_records = merge_by_contig(&coverage_records, config.contig_naming);

    let missing_accessions = refs.resolver.missing_accessions();
    if !missing_accessions.is_empty() {
        log::warn!("{} accessions were not found in the index", missing_accessions.len());
    }

    Ok(ClassificationResults {
        coverage_records,
        lca_calls,
        contig_records,
        missing_accessions,
        invalid_identifiers: refs.resolver.invalid_identifiers(),
        skipped_hits,
    })
}

/// Unified function to classify alignment hits from one or multiple files
pub fn classify_hits(
    taxonomy_path: &str,
    accession_index_path: &str,
    hits_paths: Vec<PathBuf>,
    lengths_fasta: Option<PathBuf>,
    config: &EngineConfig,
) -> Result<ClassificationResults, Error> {
    let refs = References::load(taxonomy_path, accession_index_path, config.accession_index_mode)?;
    classify_with(&refs, hits_paths, lengths_fasta, config)
}

/// Merges coverage tables written by independent runs into contig rows.
pub fn merge_coverage_files(
    paths: &[PathBuf],
    naming: ContigNaming,
) -> Result<Vec<ContigRecord>, Error> {
    let mut records = Vec::new();
    for path in paths {
        let mut text = String::new();
        open_maybe_gz(path)?.read_to_string(&mut text)?;
        let rows = parse_coverage_report(&text)?;
        log::info!("Read {} coverage rows from {}", rows.len(), path.display());
        records.extend(rows);
    }
    Ok(merge_by_contig(&records, naming))
}
