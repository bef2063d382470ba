//src/merge.rs

use std::collections::BTreeMap;

use ahash::AHashMap;
use rayon::prelude::*;

use crate::types::{ContigRecord, CoverageRecord, Rank, RecordKind};

/// How a query id maps onto the contig it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContigNaming {
    /// Every query is its own contig.
    #[default]
    Identity,
    /// Drop everything from the last occurrence of the separator,
    /// e.g. `contig7_3` → `contig7` with `StripSuffix('_')`.
    StripSuffix(char),
}

impl ContigNaming {
    pub fn contig_id<'a>(&self, query_id: &'a str) -> &'a str {
        match self {
            ContigNaming::Identity => query_id,
            ContigNaming::StripSuffix(sep) => match query_id.rfind(*sep) {
                Some(pos) if pos > 0 => &query_id[..pos],
                _ => query_id,
            },
        }
    }
}

/// Sums coverage rows of queries that belong to the same contig.
///
/// For each (contig, rank, name) the hit counts, hit lengths, mismatches, linear
/// and owned lengths are summed and the contributing queries counted. The contig
/// length is the summed length of its distinct member queries. Contigs are
/// processed in parallel and returned sorted by id, using the same row order as
/// per-query output.
pub fn merge_by_contig(records: &[CoverageRecord], naming: ContigNaming) -> Vec<ContigRecord> {
    let mut contigs: BTreeMap<&str, Vec<&CoverageRecord>> = BTreeMap::new();
    for record in records {
        contigs
            .entry(naming.contig_id(&record.query_id))
            .or_default()
            .push(record);
    }

    let contigs: Vec<(&str, Vec<&CoverageRecord>)> = contigs.into_iter().collect();
    let merged: Vec<Vec<ContigRecord>> = contigs
        .par_iter()
        .map(|(contig_id, rows)| merge_contig(contig_id, rows))
        .collect();

    log::info!("Merged {} coverage rows into {} contigs", records.len(), merged.len());
    merged.into_iter().flatten().collect()
}

fn merge_contig(contig_id: &str, rows: &[&CoverageRecord]) -> Vec<ContigRecord> {
    let mut lengths: BTreeMap<&str, u64> = BTreeMap::new();
    for row in rows {
        lengths.entry(row.query_id.as_str()).or_insert(row.query_length);
    }
    let length: u64 = lengths.values().sum();

    let mut sums: AHashMap<(Rank, &str), ContigRecord> = AHashMap::new();
    for row in rows {
        let entry = sums
            .entry((row.rank, row.name.as_str()))
            .or_insert_with(|| ContigRecord {
                contig_id: contig_id.to_string(),
                rank: row.rank,
                kind: row.kind,
                name: row.name.clone(),
                taxon_id: row.taxon_id,
                parent: row.parent.clone(),
                length,
                num_hits: 0,
                total_hit_length: 0,
                total_mismatches: 0,
                linear_length: 0,
                rank_linear_length: 0,
                num_merged: 0,
                owned_length: 0,
            });
        entry.num_hits += row.num_hits;
        entry.total_hit_length += row.total_hit_length;
        entry.total_mismatches += row.total_mismatches;
        entry.linear_length += row.linear_length;
        entry.owned_length += row.owned_length;
        entry.num_merged += 1;
    }

    let mut rank_linear: AHashMap<Rank, u64> = AHashMap::new();
    for record in sums.values().filter(|r| r.kind == RecordKind::Taxon) {
        *rank_linear.entry(record.rank).or_default() += record.linear_length;
    }

    let mut out: Vec<ContigRecord> = sums
        .into_values()
        .map(|mut r| {
            if r.kind == RecordKind::Taxon {
                r.rank_linear_length = rank_linear.get(&r.rank).copied().unwrap_or(0);
            }
            r
        })
        .collect();
    out.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then_with(|| (a.kind == RecordKind::Unclassified).cmp(&(b.kind == RecordKind::Unclassified)))
            .then_with(|| b.owned_length.cmp(&a.owned_length))
            .then_with(|| a.name.cmp(&b.name))
    });
    out
}

/// The leading taxon row of every (contig, rank), optionally for one rank only.
///
/// Rows must be in `merge_by_contig` order, so the leading row is the one owning
/// the most bases. Ranks with only an `unclassified` row produce nothing.
pub fn top_hits(records: &[ContigRecord], rank: Option<Rank>) -> Vec<&ContigRecord> {
    let mut top: Vec<&ContigRecord> = Vec::new();
    for record in records {
        if record.kind == RecordKind::Unclassified || rank.is_some_and(|r| r != record.rank) {
            continue;
        }
        let seen = top
            .last()
            .is_some_and(|t| t.contig_id == record.contig_id && t.rank == record.rank);
        if !seen {
            top.push(record);
        }
    }
    top
}
