//src/coverage.rs

/// Sorted set of disjoint, non-adjacent, 1-based inclusive base ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<(u64, u64)>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the union of arbitrary (possibly overlapping) ranges with one
    /// sort and sweep.
    pub fn from_ranges<I: IntoIterator<Item = (u64, u64)>>(ranges: I) -> Self {
        let mut sorted: Vec<(u64, u64)> = ranges.into_iter().filter(|&(s, e)| s <= e).collect();
        sorted.sort_unstable();

        let mut intervals: Vec<(u64, u64)> = Vec::with_capacity(sorted.len());
        for (s, e) in sorted {
            match intervals.last_mut() {
                Some(last) if s <= last.1.saturating_add(1) => last.1 = last.1.max(e),
                _ => intervals.push((s, e)),
            }
        }
        Self { intervals }
    }

    /// Adds `[start, end]`, merging with overlapping or touching neighbours.
    pub fn insert(&mut self, start: u64, end: u64) {
        if start > end {
            return;
        }
        let first = self
            .intervals
            .partition_point(|&(_, e)| e.saturating_add(1) < start);

        let mut last = first;
        let mut new_start = start;
        let mut new_end = end;
        while last < self.intervals.len() && self.intervals[last].0 <= end.saturating_add(1) {
            new_start = new_start.min(self.intervals[last].0);
            new_end = new_end.max(self.intervals[last].1);
            last += 1;
        }
        self.intervals.splice(first..last, [(new_start, new_end)]);
    }

    /// Number of covered bases.
    pub fn covered_len(&self) -> u64 {
        self.intervals.iter().map(|&(s, e)| e - s + 1).sum()
    }

    pub fn intervals(&self) -> &[(u64, u64)] {
        &self.intervals
    }

    /// Sub-ranges of `[start, end]` not covered by this set.
    pub fn gaps_within(&self, start: u64, end: u64) -> Vec<(u64, u64)> {
        let mut gaps = Vec::new();
        if start > end {
            return gaps;
        }
        let first = self.intervals.partition_point(|&(_, e)| e < start);
        let mut cursor = start;
        for &(s, e) in &self.intervals[first..] {
            if s > end {
                break;
            }
            if s > cursor {
                gaps.push((cursor, s - 1));
            }
            cursor = cursor.max(e.saturating_add(1));
            if cursor > end {
                return gaps;
            }
        }
        if cursor <= end {
            gaps.push((cursor, end));
        }
        gaps
    }
}

/// Hit statistics and union coverage for one taxon of one query at one rank.
#[derive(Debug, Clone, Default)]
pub struct CoverageTracker {
    covered: IntervalSet,
    pub num_hits: u64,
    pub total_hit_length: u64,
    pub total_mismatches: u64,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hit(&mut self, start: u64, end: u64, mismatches: u64) {
        self.covered.insert(start, end);
        self.num_hits += 1;
        self.total_hit_length += end - start + 1;
        self.total_mismatches += mismatches;
    }

    /// Size of the union of all hit ranges.
    pub fn linear_length(&self) -> u64 {
        self.covered.covered_len()
    }

    /// `(total_hit_length - total_mismatches) / total_hit_length`, `None` without hits.
    pub fn average_identity(&self) -> Option<f64> {
        if self.total_hit_length == 0 {
            None
        } else {
            Some(
                self.total_hit_length.saturating_sub(self.total_mismatches) as f64
                    / self.total_hit_length as f64,
            )
        }
    }
}
