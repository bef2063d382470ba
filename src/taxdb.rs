//src/taxdb.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{TaxonomyLoadError, UnknownTaxonError};
use crate::types::Rank;

/// Taxon id of the universal root.
pub const ROOT_TAXID: u32 = 1;

/// Rank string used by unranked nodes.
pub const NO_RANK: &str = "no rank";

#[derive(Debug, Clone)]
pub struct TaxNode {
    pub parent_id: u32,
    pub depth: u32,
    pub rank: String,
    pub name: String,
}

/// Immutable taxonomy tree, indexed directly by taxon id.
#[derive(Debug, Clone)]
pub struct TaxonomyStore {
    nodes: Vec<Option<TaxNode>>,
    num_taxa: usize,
}

/// Names (and ids where one exists) of a taxon at every ladder rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lineage {
    names: [String; 8],
    taxon_ids: [Option<u32>; 8],
}

impl Lineage {
    pub fn name(&self, rank: Rank) -> &str {
        &self.names[rank.index()]
    }

    /// `None` when the name at this rank is a synthesized placeholder.
    pub fn taxon_id(&self, rank: Rank) -> Option<u32> {
        self.taxon_ids[rank.index()]
    }

    /// Name at the next coarser ladder rank, `"root"` above superkingdom.
    pub fn parent_name(&self, rank: Rank) -> &str {
        match rank.coarser() {
            Some(up) => self.name(up),
            None => "root",
        }
    }
}

/// Switches for `lineage_string`.
#[derive(Debug, Clone, Copy)]
pub struct LineageOptions {
    /// Show all seven major ranks, filling gaps with placeholders.
    pub print_all_ranks: bool,
    /// Append `n__<taxon name>`.
    pub print_strain: bool,
    pub replace_spaces: bool,
}

impl Default for LineageOptions {
    fn default() -> Self {
        Self {
            print_all_ranks: true,
            print_strain: false,
            replace_spaces: true,
        }
    }
}

impl TaxonomyStore {
    /// Loads a taxonomy table with rows
    /// ```text
    /// <taxid>\t<depth>\t<parentid>\t<rank>\t<name>
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TaxonomyLoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TaxonomyLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_reader(BufReader::new(file), path)?;
        log::info!("Loaded taxonomy with {} taxa from {}", store.num_taxa, path.display());
        Ok(store)
    }

    /// Parses a taxonomy table from any reader. `path` is only used in errors.
    pub fn from_reader<R: BufRead>(reader: R, path: &Path) -> Result<Self, TaxonomyLoadError> {
        let mut nodes: Vec<Option<TaxNode>> = Vec::new();
        let mut num_taxa = 0usize;

        for (idx, line_result) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line_result.map_err(|source| TaxonomyLoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let malformed = |reason: String| TaxonomyLoadError::Malformed {
                path: path.to_path_buf(),
                line: line_no,
                reason,
            };

            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 5 {
                return Err(malformed(format!("expected 5 columns, found {}", parts.len())));
            }

            let taxid: u32 = parts[0]
                .trim()
                .parse()
                .map_err(|_| malformed(format!("bad taxon id '{}'", parts[0])))?;
            let depth: u32 = parts[1]
                .trim()
                .parse()
                .map_err(|_| malformed(format!("bad depth '{}'", parts[1])))?;
            let parent_id: u32 = parts[2]
                .trim()
                .parse()
                .map_err(|_| malformed(format!("bad parent id '{}'", parts[2])))?;
            if taxid == 0 {
                return Err(malformed("taxon id 0 is reserved for unknown".to_string()));
            }

            let slot = taxid as usize;
            if slot >= nodes.len() {
                nodes.resize(slot + 1, None);
            }
            if nodes[slot].is_none() {
                num_taxa += 1;
            }
            nodes[slot] = Some(TaxNode {
                parent_id,
                depth,
                rank: parts[3].trim().to_string(),
                name: parts[4].trim().to_string(),
            });
        }

        if num_taxa == 0 {
            return Err(TaxonomyLoadError::Empty(path.to_path_buf()));
        }
        if nodes.get(ROOT_TAXID as usize).map_or(true, Option::is_none) {
            return Err(TaxonomyLoadError::MissingRoot(path.to_path_buf()));
        }
        // Current NCBI trees hang Bacteria (2) under "cellular organisms", never directly under root.
        if let Some(Some(bacteria)) = nodes.get(2) {
            if bacteria.parent_id == ROOT_TAXID {
                return Err(TaxonomyLoadError::OutOfDate(path.to_path_buf()));
            }
        }

        Ok(Self { nodes, num_taxa })
    }

    pub fn len(&self) -> usize {
        self.num_taxa
    }

    pub fn is_empty(&self) -> bool {
        self.num_taxa == 0
    }

    pub fn node(&self, taxon_id: u32) -> Result<&TaxNode, UnknownTaxonError> {
        self.nodes
            .get(taxon_id as usize)
            .and_then(Option::as_ref)
            .ok_or(UnknownTaxonError(taxon_id))
    }

    pub fn rank_of(&self, taxon_id: u32) -> Result<&str, UnknownTaxonError> {
        self.node(taxon_id).map(|n| n.rank.as_str())
    }

    pub fn name_of(&self, taxon_id: u32) -> Result<&str, UnknownTaxonError> {
        self.node(taxon_id).map(|n| n.name.as_str())
    }

    pub fn depth_of(&self, taxon_id: u32) -> Result<u32, UnknownTaxonError> {
        self.node(taxon_id).map(|n| n.depth)
    }

    /// Immediate ancestor; the root is its own parent.
    pub fn parent_of(&self, taxon_id: u32) -> Result<u32, UnknownTaxonError> {
        let node = self.node(taxon_id)?;
        if taxon_id == ROOT_TAXID || node.parent_id == 0 {
            Ok(ROOT_TAXID)
        } else {
            Ok(node.parent_id)
        }
    }

    /// Climbs past unranked nodes; returns the taxon itself if it is ranked.
    pub fn nearest_ranked_ancestor(&self, mut taxon_id: u32) -> Result<u32, UnknownTaxonError> {
        for _ in 0..=self.nodes.len() {
            if taxon_id == ROOT_TAXID || self.rank_of(taxon_id)? != NO_RANK {
                break;
            }
            taxon_id = self.parent_of(taxon_id)?;
        }
        Ok(taxon_id)
    }

    /// First ancestor (or self) whose rank equals `target_rank`, ignoring case.
    ///
    /// `"root"` always yields the root and `"strain"` yields the taxon itself.
    /// Returns `None` when the root is reached without a match.
    pub fn climb_to_rank(
        &self,
        taxon_id: u32,
        target_rank: &str,
    ) -> Result<Option<(u32, &str)>, UnknownTaxonError> {
        let name = self.name_of(taxon_id)?;
        if target_rank.eq_ignore_ascii_case("root") {
            return Ok(Some((ROOT_TAXID, self.name_of(ROOT_TAXID)?)));
        }
        if target_rank.eq_ignore_ascii_case("strain") {
            return Ok(Some((taxon_id, name)));
        }

        let mut current = taxon_id;
        for _ in 0..=self.nodes.len() {
            let node = self.node(current)?;
            if node.rank.eq_ignore_ascii_case(target_rank) {
                return Ok(Some((current, node.name.as_str())));
            }
            if current == ROOT_TAXID || node.name == "root" {
                break;
            }
            current = self.parent_of(current)?;
        }
        Ok(None)
    }

    /// Taxon id at a ladder rank, if the lineage has one.
    pub fn rank_taxon_id(&self, taxon_id: u32, rank: Rank) -> Result<Option<u32>, UnknownTaxonError> {
        Ok(self.climb_to_rank(taxon_id, rank.as_str())?.map(|(id, _)| id))
    }

    /// Ranked ancestors of a taxon at the seven ranks above strain, coarsest first.
    /// Unranked nodes are skipped before climbing.
    fn ladder(&self, taxon_id: u32) -> Result<[Option<(u32, &str)>; 7], UnknownTaxonError> {
        let start = self.nearest_ranked_ancestor(taxon_id)?;
        let mut found = [None; 7];
        for rank in &Rank::LADDER[..7] {
            found[rank.index()] = self.climb_to_rank(start, rank.as_str())?;
        }
        Ok(found)
    }

    /// Projects a taxon onto every ladder rank.
    ///
    /// Ranks missing from the lineage get `"<finer name> - no_<rank>_rank"`,
    /// filled from the strain slot (the taxon's own name) upwards.
    pub fn lineage(&self, taxon_id: u32) -> Result<Lineage, UnknownTaxonError> {
        let mut names: [String; 8] = Default::default();
        let mut taxon_ids: [Option<u32>; 8] = [None; 8];

        let strain = Rank::Strain.index();
        names[strain] = self.name_of(taxon_id)?.to_string();
        taxon_ids[strain] = Some(taxon_id);

        for (slot, entry) in self.ladder(taxon_id)?.into_iter().enumerate() {
            if let Some((id, name)) = entry {
                names[slot] = name.to_string();
                taxon_ids[slot] = Some(id);
            }
        }

        for rank in Rank::LADDER.iter().rev().skip(1) {
            let slot = rank.index();
            if taxon_ids[slot].is_none() {
                names[slot] = format!("{} - no_{}_rank", names[slot + 1], rank.as_str());
            }
        }

        Ok(Lineage { names, taxon_ids })
    }

    /// Renders a lineage as `k__Bacteria|p__Firmicutes|...|s__Bacillus_anthracis`.
    pub fn lineage_string(
        &self,
        taxon_id: u32,
        opts: LineageOptions,
    ) -> Result<String, UnknownTaxonError> {
        let own_name = self.name_of(taxon_id)?;
        let clean = |s: &str| {
            if opts.replace_spaces {
                s.replace(' ', "_")
            } else {
                s.to_string()
            }
        };

        let found = self.ladder(taxon_id)?.map(|entry| entry.map(|(_, name)| clean(name)));

        let mut last = clean(own_name);
        let mut parts = Vec::with_capacity(8);
        for rank in Rank::LADDER[..7].iter().rev() {
            let code = rank.code();
            let value = match &found[rank.index()] {
                Some(name) => name.clone(),
                None if opts.print_all_ranks => format!("{last} - no_{code}_rank"),
                None => continue,
            };
            parts.push(format!("{code}__{value}"));
            last = value;
        }
        parts.reverse();

        if opts.print_strain {
            parts.push(format!("n__{}", clean(own_name)));
        }
        Ok(parts.join("|"))
    }

    /// True if `ancestor` is `descendant` or one of its ancestors.
    pub fn contains(&self, ancestor: u32, mut descendant: u32) -> Result<bool, UnknownTaxonError> {
        let target_depth = self.depth_of(ancestor)?;
        for _ in 0..=self.nodes.len() {
            if self.depth_of(descendant)? <= target_depth || descendant == ROOT_TAXID {
                break;
            }
            descendant = self.parent_of(descendant)?;
        }
        Ok(ancestor == descendant)
    }
}
