//src/lca.rs

use crate::types::{CoverageRecord, LcaCall, Rank};

/// What makes a taxon a candidate at a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LcaMode {
    /// The taxon owns at least one base after tie-breaking.
    #[default]
    OwnedCoverage,
    /// The taxon has at least one recorded hit.
    AnyHit,
}

impl LcaMode {
    fn qualifies(&self, record: &CoverageRecord) -> bool {
        if record.is_unclassified() {
            return false;
        }
        match self {
            LcaMode::OwnedCoverage => record.owned_length > 0,
            LcaMode::AnyHit => record.num_hits > 0,
        }
    }
}

/// Picks the finest rank with exactly one candidate taxon.
///
/// `records` are the rows of a single query. Returns `None` when every rank is
/// either empty or tied, which is how ambiguity is reported.
pub fn select_lca(records: &[CoverageRecord], mode: LcaMode) -> Option<LcaCall> {
    for rank in Rank::LADDER.iter().rev() {
        let mut candidates = records
            .iter()
            .filter(|r| r.rank == *rank && mode.qualifies(r));
        if let (Some(only), None) = (candidates.next(), candidates.next()) {
            return Some(LcaCall {
                query_id: only.query_id.clone(),
                rank: *rank,
                record: only.clone(),
            });
        }
    }
    None
}

/// Runs `select_lca` over the rows of many queries.
/// Rows must be grouped by query, as the classifier emits them.
pub fn select_all(records: &[CoverageRecord], mode: LcaMode) -> Vec<LcaCall> {
    records
        .chunk_by(|a, b| a.query_id == b.query_id)
        .filter_map(|rows| select_lca(rows, mode))
        .collect()
}
