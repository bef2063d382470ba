//src/classify_query.rs

use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};

use crate::accession::{AccessionResolver, UNKNOWN_TAXID};
use crate::coverage::CoverageTracker;
use crate::ownership::{OwnershipResolver, TieBreak};
use crate::taxdb::{Lineage, TaxonomyStore};
use crate::types::{CoverageRecord, Hit, Rank, RecordKind, ResolvedHit, UNCLASSIFIED};

/// All hits of one query sequence, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryHits {
    pub query_id: String,
    pub query_length: u64,
    pub hits: Vec<ResolvedHit>,
}

/// Lineages of every taxon seen in the input, computed once and shared read-only.
pub type LineageTable = AHashMap<u32, Lineage>;

/// Resolves subjects and groups hits by query id, keeping arrival order within
/// each query. Queries come back sorted by id.
pub fn group_by_query(hits: &[Hit], resolver: &AccessionResolver) -> BTreeMap<String, QueryHits> {
    let mut grouped: BTreeMap<String, QueryHits> = BTreeMap::new();

    for hit in hits {
        let taxon_id = resolver.resolve_sequence_id(&hit.subject);
        let entry = grouped
            .entry(hit.query_id.clone())
            .or_insert_with(|| QueryHits {
                query_id: hit.query_id.clone(),
                query_length: hit.query_length,
                hits: Vec::new(),
            });

        if entry.query_length != hit.query_length {
            log::warn!(
                "Query {} reported with lengths {} and {}; keeping {}",
                hit.query_id,
                entry.query_length,
                hit.query_length,
                entry.query_length
            );
            if hit.query_end > entry.query_length {
                log::warn!("Skipping hit {}..{} past the end of {}", hit.query_start, hit.query_end, hit.query_id);
                continue;
            }
        }

        entry.hits.push(ResolvedHit {
            taxon_id,
            query_start: hit.query_start,
            query_end: hit.query_end,
            mismatches: hit.mismatches,
        });
    }

    grouped
}

/// Builds the lineage of every distinct taxon id among the queries.
/// Unknown ids are logged and left out, so their hits count as unclassified.
pub fn build_lineages<'a, I>(taxonomy: &TaxonomyStore, queries: I) -> LineageTable
where
    I: IntoIterator<Item = &'a QueryHits>,
{
    let mut table = LineageTable::new();
    let mut unknown: AHashSet<u32> = AHashSet::new();

    for query in queries {
        for hit in &query.hits {
            if hit.taxon_id == UNKNOWN_TAXID || table.contains_key(&hit.taxon_id) || unknown.contains(&hit.taxon_id) {
                continue;
            }
            match taxonomy.lineage(hit.taxon_id) {
                Ok(lineage) => {
                    table.insert(hit.taxon_id, lineage);
                }
                Err(e) => {
                    log::warn!("{}; its hits are left unclassified", e);
                    unknown.insert(hit.taxon_id);
                }
            }
        }
    }
    table
}

struct TaxonEntry {
    tracker: CoverageTracker,
    taxon_id: Option<u32>,
    parent: String,
}

/// Computes the per-rank records of one query.
///
/// Records come out rank by rank, coarsest first. Within a rank, taxa are sorted
/// by owned length (descending) then name, and the `unclassified` record closes
/// the rank.
pub fn classify_query(
    query: &QueryHits,
    lineages: &LineageTable,
    tie_break: &dyn TieBreak,
    dedup_identical_hits: bool,
) -> Vec<CoverageRecord> {
    // Hits without a lineage never claim bases, so they stay unclassified.
    let placed: Vec<(&ResolvedHit, &Lineage)> = query
        .hits
        .iter()
        .filter_map(|h| lineages.get(&h.taxon_id).map(|l| (h, l)))
        .collect();

    // Identical (taxon, region) pairs contribute to the statistics once.
    let mut seen: AHashSet<(u32, u64, u64)> = AHashSet::new();
    let counted: Vec<bool> = placed
        .iter()
        .map(|(h, _)| !dedup_identical_hits || seen.insert((h.taxon_id, h.query_start, h.query_end)))
        .collect();

    let mut records = Vec::new();
    for rank in Rank::LADDER {
        let mut taxa: AHashMap<&str, TaxonEntry> = AHashMap::new();
        let mut ownership = OwnershipResolver::new(tie_break);

        for ((hit, lineage), &count) in placed.iter().zip(&counted) {
            let name = lineage.name(rank);
            ownership.claim(name, hit.query_start, hit.query_end);

            let entry = taxa.entry(name).or_insert_with(|| TaxonEntry {
                tracker: CoverageTracker::new(),
                taxon_id: lineage.taxon_id(rank),
                parent: lineage.parent_name(rank).to_string(),
            });
            if count {
                entry.tracker.add_hit(hit.query_start, hit.query_end, hit.mismatches);
            }
        }

        let owned = ownership.finish(query.query_length);
        let rank_linear_length: u64 = taxa.values().map(|t| t.tracker.linear_length()).sum();

        let mut rank_records: Vec<CoverageRecord> = taxa
            .into_iter()
            .map(|(name, entry)| CoverageRecord {
                query_id: query.query_id.clone(),
                rank,
                kind: RecordKind::Taxon,
                name: name.to_string(),
                taxon_id: entry.taxon_id,
                parent: entry.parent,
                query_length: query.query_length,
                num_hits: entry.tracker.num_hits,
                total_hit_length: entry.tracker.total_hit_length,
                total_mismatches: entry.tracker.total_mismatches,
                linear_length: entry.tracker.linear_length(),
                rank_linear_length,
                owned_regions: owned.owned(name).to_vec(),
                owned_length: owned.owned_length(name),
            })
            .collect();
        rank_records.sort_by(|a, b| b.owned_length.cmp(&a.owned_length).then_with(|| a.name.cmp(&b.name)));
        records.extend(rank_records);

        records.push(CoverageRecord {
            query_id: query.query_id.clone(),
            rank,
            kind: RecordKind::Unclassified,
            name: UNCLASSIFIED.to_string(),
            taxon_id: None,
            parent: String::new(),
            query_length: query.query_length,
            num_hits: 0,
            total_hit_length: 0,
            total_mismatches: 0,
            linear_length: owned.unclassified_length(),
            rank_linear_length: 0,
            owned_regions: owned.unclassified().to_vec(),
            owned_length: owned.unclassified_length(),
        });
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accession::AccessionIndex;
    use crate::ownership::FirstWriterWins;
    use crate::taxdb::tests::store;

    fn query(hits: &[(u32, u64, u64, u64)], len: u64) -> QueryHits {
        QueryHits {
            query_id: "q1".to_string(),
            query_length: len,
            hits: hits
                .iter()
                .map(|&(taxon_id, s, e, mm)| ResolvedHit {
                    taxon_id,
                    query_start: s,
                    query_end: e,
                    mismatches: mm,
                })
                .collect(),
        }
    }

    fn run(q: &QueryHits) -> Vec<CoverageRecord> {
        let lineages = build_lineages(&store(), [q]);
        classify_query(q, &lineages, &FirstWriterWins, true)
    }

    fn at<'a>(records: &'a [CoverageRecord], rank: Rank, name: &str) -> &'a CoverageRecord {
        records
            .iter()
            .find(|r| r.rank == rank && r.name == name)
            .unwrap_or_else(|| panic!("no record for {rank} {name}"))
    }

    #[test]
    fn test_linear_length_unions_overlaps() {
        let q = query(&[(4, 1, 50, 0), (4, 40, 70, 0)], 100);
        let records = run(&q);
        let sp = at(&records, Rank::Species, "Bacillus anthracis");
        assert_eq!(sp.linear_length, 70);
        assert_eq!(sp.total_hit_length, 81);
        assert_eq!(sp.num_hits, 2);
        assert_eq!(sp.owned_regions, vec![(1, 70)]);
        let unc = at(&records, Rank::Species, UNCLASSIFIED);
        assert_eq!(unc.owned_regions, vec![(71, 100)]);
    }

    #[test]
    fn test_ownership_between_two_species() {
        let q = query(&[(4, 1, 60, 0), (6, 50, 100, 0)], 100);
        let records = run(&q);
        let a = at(&records, Rank::Species, "Bacillus anthracis");
        let b = at(&records, Rank::Species, "Bacillus cereus");
        assert_eq!((a.owned_regions.clone(), a.owned_length), (vec![(1, 60)], 60));
        assert_eq!((b.owned_regions.clone(), b.owned_length), (vec![(61, 100)], 40));
        assert_eq!(a.rank_linear_length, 60 + 51);

        // Both species collapse into one genus that owns everything.
        let genus = at(&records, Rank::Genus, "Bacillus");
        assert_eq!(genus.owned_regions, vec![(1, 100)]);
        assert_eq!(genus.linear_length, 100);
        assert_eq!(genus.num_hits, 2);
    }

    #[test]
    fn test_ownership_partitions_each_rank() {
        let q = query(&[(5, 10, 30, 1), (21, 20, 80, 0), (6, 75, 95, 2), (30, 1, 5, 0)], 120);
        let records = run(&q);
        for rank in Rank::LADDER {
            let total: u64 = records.iter().filter(|r| r.rank == rank).map(|r| r.owned_length).sum();
            assert_eq!(total, 120, "rank {rank}");
        }
    }

    #[test]
    fn test_placeholders_and_parents() {
        let q = query(&[(5, 1, 10, 0)], 10);
        let records = run(&q);
        let family = at(&records, Rank::Family, "Bacillus - no_family_rank");
        assert_eq!(family.taxon_id, None);
        assert_eq!(family.parent, "Bacillales");
        let genus = at(&records, Rank::Genus, "Bacillus");
        assert_eq!(genus.taxon_id, Some(3));
        assert_eq!(genus.parent, "Bacillus - no_family_rank");
        let strain = at(&records, Rank::Strain, "Bacillus anthracis str. Ames");
        assert_eq!(strain.taxon_id, Some(5));
        assert_eq!(at(&records, Rank::Superkingdom, "Bacteria").parent, "root");
    }

    #[test]
    fn test_unknown_taxa_stay_unclassified() {
        let q = query(&[(0, 1, 50, 0), (999, 51, 60, 0)], 60);
        let records = run(&q);
        assert_eq!(records.len(), Rank::LADDER.len());
        assert!(records.iter().all(|r| r.is_unclassified() && r.owned_length == 60));
    }

    #[test]
    fn test_identical_hits_counted_once() {
        let q = query(&[(4, 1, 50, 3), (4, 1, 50, 0), (4, 1, 50, 0)], 100);
        let lineages = build_lineages(&store(), [&q]);
        let dedup = classify_query(&q, &lineages, &FirstWriterWins, true);
        let all = classify_query(&q, &lineages, &FirstWriterWins, false);
        let d = at(&dedup, Rank::Species, "Bacillus anthracis");
        let a = at(&all, Rank::Species, "Bacillus anthracis");
        assert_eq!((d.num_hits, d.total_mismatches), (1, 3));
        assert_eq!((a.num_hits, a.total_mismatches), (3, 3));
    }

    #[test]
    fn test_rows_sorted_by_owned_length() {
        let q = query(&[(21, 1, 10, 0), (4, 11, 100, 0)], 100);
        let records = run(&q);
        let species: Vec<&str> = records
            .iter()
            .filter(|r| r.rank == Rank::Species)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(species, vec!["Bacillus anthracis", "Listeria monocytogenes", UNCLASSIFIED]);
    }

    #[test]
    fn test_group_by_query_keeps_arrival_order() {
        let resolver = AccessionResolver::new(AccessionIndex::from_entries([("NC_000001", 4u32)]));
        let hit = |q: &str, s: u64, e: u64, subject: &str| Hit {
            subject: subject.to_string(),
            query_id: q.to_string(),
            query_length: 100,
            query_start: s,
            query_end: e,
            mismatches: 0,
        };
        let hits = vec![
            hit("b", 5, 9, "NC_000001.1"),
            hit("a", 1, 2, "6"),
            hit("b", 1, 3, "NC_999999.1"),
        ];
        let grouped = group_by_query(&hits, &resolver);
        let ids: Vec<&String> = grouped.keys().collect();
        assert_eq!(ids, vec!["a", "b"]);
        let b = &grouped["b"];
        assert_eq!(b.hits[0].taxon_id, 4);
        assert_eq!(b.hits[1].taxon_id, UNKNOWN_TAXID);
        assert_eq!(grouped["a"].hits[0].taxon_id, 6);
    }
}
