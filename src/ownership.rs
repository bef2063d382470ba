//src/ownership.rs

use ahash::AHashMap;

use crate::coverage::IntervalSet;

/// One hit's request to own `[start, end]` for a taxon label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    /// Index of the label in the resolver.
    pub owner: usize,
    pub start: u64,
    pub end: u64,
    /// Arrival position of the hit within its query.
    pub order: usize,
}

/// Decides who keeps bases claimed by more than one hit.
///
/// Implementations return `(start, end, owner)` segments that never overlap.
pub trait TieBreak: Send + Sync {
    fn assign(&self, claims: &[Claim]) -> Vec<(u64, u64, usize)>;
}

/// Bases go to the first hit (in arrival order) that covers them.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstWriterWins;

impl TieBreak for FirstWriterWins {
    fn assign(&self, claims: &[Claim]) -> Vec<(u64, u64, usize)> {
        claim_in_order(claims.iter())
    }
}

/// Longer hits claim first; equal lengths fall back to arrival order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongestHitFirst;

impl TieBreak for LongestHitFirst {
    fn assign(&self, claims: &[Claim]) -> Vec<(u64, u64, usize)> {
        let mut ordered: Vec<&Claim> = claims.iter().collect();
        ordered.sort_by_key(|c| (std::cmp::Reverse(c.end - c.start), c.order));
        claim_in_order(ordered.into_iter())
    }
}

fn claim_in_order<'a, I: Iterator<Item = &'a Claim>>(claims: I) -> Vec<(u64, u64, usize)> {
    let mut taken = IntervalSet::new();
    let mut segments = Vec::new();
    for claim in claims {
        for (s, e) in taken.gaps_within(claim.start, claim.end) {
            segments.push((s, e, claim.owner));
        }
        taken.insert(claim.start, claim.end);
    }
    segments
}

/// Which `TieBreak` the engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipPolicy {
    #[default]
    FirstWriter,
    LongestHit,
}

impl OwnershipPolicy {
    pub fn tie_break(&self) -> &'static dyn TieBreak {
        match self {
            OwnershipPolicy::FirstWriter => &FirstWriterWins,
            OwnershipPolicy::LongestHit => &LongestHitFirst,
        }
    }
}

/// Collects the claims of one query at one rank and partitions its bases.
pub struct OwnershipResolver<'p> {
    policy: &'p dyn TieBreak,
    labels: Vec<String>,
    label_index: AHashMap<String, usize>,
    claims: Vec<Claim>,
}

/// Result of ownership resolution for one query at one rank.
#[derive(Debug, Clone, Default)]
pub struct OwnershipMap {
    owned: AHashMap<String, Vec<(u64, u64)>>,
    unclassified: Vec<(u64, u64)>,
}

impl<'p> OwnershipResolver<'p> {
    pub fn new(policy: &'p dyn TieBreak) -> Self {
        Self {
            policy,
            labels: Vec::new(),
            label_index: AHashMap::new(),
            claims: Vec::new(),
        }
    }

    /// Records a hit in arrival order.
    pub fn claim(&mut self, label: &str, start: u64, end: u64) {
        let owner = match self.label_index.get(label) {
            Some(&idx) => idx,
            None => {
                let idx = self.labels.len();
                self.labels.push(label.to_string());
                self.label_index.insert(label.to_string(), idx);
                idx
            }
        };
        let order = self.claims.len();
        self.claims.push(Claim {
            owner,
            start,
            end,
            order,
        });
    }

    /// Partitions `[1, query_length]`: owned runs per label, the rest unclassified.
    /// Touching runs of the same label are merged.
    pub fn finish(self, query_length: u64) -> OwnershipMap {
        let mut segments = self.policy.assign(&self.claims);
        segments.sort_unstable();

        let mut per_owner: Vec<Vec<(u64, u64)>> = vec![Vec::new(); self.labels.len()];
        for (s, e, owner) in segments {
            let runs = &mut per_owner[owner];
            match runs.last_mut() {
                Some(last) if last.1 + 1 == s => last.1 = e,
                _ => runs.push((s, e)),
            }
        }

        let covered = IntervalSet::from_ranges(self.claims.iter().map(|c| (c.start, c.end)));
        let unclassified = if query_length == 0 {
            Vec::new()
        } else {
            covered.gaps_within(1, query_length)
        };

        let owned = self.labels.into_iter().zip(per_owner).collect();
        OwnershipMap { owned, unclassified }
    }
}

impl OwnershipMap {
    /// Runs owned by `label`; empty if the label claimed nothing that survived.
    pub fn owned(&self, label: &str) -> &[(u64, u64)] {
        self.owned.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn owned_length(&self, label: &str) -> u64 {
        span_sum(self.owned(label))
    }

    pub fn unclassified(&self) -> &[(u64, u64)] {
        &self.unclassified
    }

    pub fn unclassified_length(&self) -> u64 {
        span_sum(&self.unclassified)
    }
}

fn span_sum(runs: &[(u64, u64)]) -> u64 {
    runs.iter().map(|&(s, e)| e - s + 1).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_writer_keeps_overlap() {
        let mut r = OwnershipResolver::new(&FirstWriterWins);
        r.claim("A", 1, 60);
        r.claim("B", 50, 100);
        let map = r.finish(100);
        assert_eq!(map.owned("A"), &[(1, 60)]);
        assert_eq!(map.owned("B"), &[(61, 100)]);
        assert_eq!(map.owned_length("A"), 60);
        assert_eq!(map.owned_length("B"), 40);
        assert!(map.unclassified().is_empty());
    }

    #[test]
    fn test_touching_runs_merge() {
        let mut r = OwnershipResolver::new(&FirstWriterWins);
        r.claim("B", 5, 8);
        r.claim("A", 1, 10);
        r.claim("A", 11, 12);
        let map = r.finish(20);
        assert_eq!(map.owned("A"), &[(1, 4), (9, 12)]);
        assert_eq!(map.owned("B"), &[(5, 8)]);
        assert_eq!(map.unclassified(), &[(13, 20)]);
    }

    #[test]
    fn test_every_base_owned_exactly_once() {
        let claims = [
            ("A", 3, 17),
            ("B", 10, 40),
            ("C", 1, 2),
            ("A", 35, 60),
            ("B", 70, 71),
            ("C", 15, 90),
        ];
        for policy in [OwnershipPolicy::FirstWriter, OwnershipPolicy::LongestHit] {
            let mut r = OwnershipResolver::new(policy.tie_break());
            for &(label, s, e) in &claims {
                r.claim(label, s, e);
            }
            let map = r.finish(120);
            let owned: u64 = ["A", "B", "C"].iter().map(|l| map.owned_length(l)).sum();
            assert_eq!(owned + map.unclassified_length(), 120);
            assert_eq!(map.unclassified(), &[(91, 120)]);

            let mut all: Vec<(u64, u64)> = ["A", "B", "C"]
                .iter()
                .flat_map(|l| map.owned(l).to_vec())
                .chain(map.unclassified().to_vec())
                .collect();
            all.sort_unstable();
            for pair in all.windows(2) {
                assert!(pair[0].1 < pair[1].0, "overlap between {:?}", pair);
            }
        }
    }

    #[test]
    fn test_longest_hit_policy() {
        let mut r = OwnershipResolver::new(&LongestHitFirst);
        r.claim("A", 1, 10);
        r.claim("B", 1, 50);
        let map = r.finish(50);
        assert!(map.owned("A").is_empty());
        assert_eq!(map.owned("B"), &[(1, 50)]);
    }

    #[test]
    fn test_no_claims_is_all_unclassified() {
        let map = OwnershipResolver::new(&FirstWriterWins).finish(42);
        assert_eq!(map.unclassified(), &[(1, 42)]);
        assert_eq!(map.unclassified_length(), 42);
    }
}
