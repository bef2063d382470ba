//src/types.rs

use std::fmt;
use std::str::FromStr;

/// One of the eight major ranks, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rank {
    Superkingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    Strain,
}

impl Rank {
    /// The rank ladder from coarsest to finest.
    pub const LADDER: [Rank; 8] = [
        Rank::Superkingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
        Rank::Strain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Superkingdom => "superkingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
            Rank::Strain => "strain",
        }
    }

    /// One-letter code used in lineage strings (`k__Bacteria|p__...`).
    pub fn code(&self) -> char {
        match self {
            Rank::Superkingdom => 'k',
            Rank::Phylum => 'p',
            Rank::Class => 'c',
            Rank::Order => 'o',
            Rank::Family => 'f',
            Rank::Genus => 'g',
            Rank::Species => 's',
            Rank::Strain => 'n',
        }
    }

    /// Position in the ladder, 0 for superkingdom.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Next coarser rank, `None` for superkingdom.
    pub fn coarser(&self) -> Option<Rank> {
        match self.index() {
            0 => None,
            i => Some(Rank::LADDER[i - 1]),
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Rank::LADDER
            .iter()
            .copied()
            .find(|r| r.as_str() == lower)
            .ok_or_else(|| format!("unknown rank '{s}'"))
    }
}

/// Label used for bases no hit claims.
pub const UNCLASSIFIED: &str = "unclassified";

/// A normalized alignment of a query against a reference sequence.
/// Coordinates are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub subject: String,
    pub query_id: String,
    pub query_length: u64,
    pub query_start: u64,
    pub query_end: u64,
    pub mismatches: u64,
}

/// A hit whose subject has been resolved to a taxon id (0 = unknown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHit {
    pub taxon_id: u32,
    pub query_start: u64,
    pub query_end: u64,
    pub mismatches: u64,
}

/// Distinguishes taxon rows from the synthetic unclassified row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Taxon,
    Unclassified,
}

/// Finalized per-query, per-rank, per-taxon classification record.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRecord {
    pub query_id: String,
    pub rank: Rank,
    pub kind: RecordKind,
    pub name: String,
    /// Taxon id at this rank; `None` for placeholder names and unclassified.
    pub taxon_id: Option<u32>,
    /// Name at the next coarser rank.
    pub parent: String,
    pub query_length: u64,
    pub num_hits: u64,
    pub total_hit_length: u64,
    pub total_mismatches: u64,
    pub linear_length: u64,
    pub rank_linear_length: u64,
    /// Disjoint, sorted `(start, end)` intervals owned by this taxon.
    pub owned_regions: Vec<(u64, u64)>,
    pub owned_length: u64,
}

impl CoverageRecord {
    pub fn is_unclassified(&self) -> bool {
        self.kind == RecordKind::Unclassified
    }

    pub fn average_identity(&self) -> Option<f64> {
        ratio(
            self.total_hit_length.saturating_sub(self.total_mismatches),
            self.total_hit_length,
        )
    }

    pub fn coverage(&self) -> Option<f64> {
        ratio(self.linear_length, self.query_length)
    }

    pub fn scaled_coverage(&self) -> Option<f64> {
        ratio(self.linear_length, self.rank_linear_length)
    }
}

/// Contig-level sum of coverage records over the queries of one contig.
#[derive(Debug, Clone, PartialEq)]
pub struct ContigRecord {
    pub contig_id: String,
    pub rank: Rank,
    pub kind: RecordKind,
    pub name: String,
    pub taxon_id: Option<u32>,
    pub parent: String,
    /// Summed length of the member queries.
    pub length: u64,
    pub num_hits: u64,
    pub total_hit_length: u64,
    pub total_mismatches: u64,
    pub linear_length: u64,
    pub rank_linear_length: u64,
    /// Number of queries contributing to this row.
    pub num_merged: u64,
    pub owned_length: u64,
}

impl ContigRecord {
    pub fn average_identity(&self) -> Option<f64> {
        ratio(
            self.total_hit_length.saturating_sub(self.total_mismatches),
            self.total_hit_length,
        )
    }

    pub fn coverage(&self) -> Option<f64> {
        ratio(self.linear_length, self.length)
    }

    pub fn scaled_coverage(&self) -> Option<f64> {
        ratio(self.linear_length, self.rank_linear_length)
    }
}

/// The single best call for one query, if any rank narrowed to one taxon.
#[derive(Debug, Clone, PartialEq)]
pub struct LcaCall {
    pub query_id: String,
    pub rank: Rank,
    pub record: CoverageRecord,
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    if den == 0 {
        None
    } else {
        Some(num as f64 / den as f64)
    }
}
