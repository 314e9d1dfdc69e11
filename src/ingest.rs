//! Ingestion and repair: feeding lineages into the hierarchy, reconciling
//! multiply-parented taxa, and removing lineages again.
use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, Result};
use crate::hierarchy::{single_char, split_exact, TaxonomicHierarchy};
use crate::rank::NO_RANK;
use crate::taxon::{Taxon, TAXON_SEP};

/// One entry of the rank detail list paired with an ingested lineage
/// string. Field names follow the Entrez record shape these are usually
/// deserialized from.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LineageEntry {
    #[serde(rename = "ScientificName")]
    pub scientific_name: String,
    #[serde(rename = "Rank")]
    pub rank: String,
}

impl LineageEntry {
    pub fn new(scientific_name: impl Into<String>, rank: impl Into<String>) -> Self {
        LineageEntry {
            scientific_name: scientific_name.into(),
            rank: rank.into(),
        }
    }
}

/// A reference-tree leaf: an opaque identifier attached to an
/// already-prefixed lineage. The lineage is rewritten to the ingested
/// portion when a blacklisted taxon truncates it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TreeLeaf {
    pub id: String,
    pub lineage: String,
}

impl TreeLeaf {
    pub fn new(id: impl Into<String>, lineage: impl Into<String>) -> Self {
        TreeLeaf {
            id: id.into(),
            lineage: lineage.into(),
        }
    }
}

/// A request to remove one organism's lineage from the hierarchy.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RemovalRecord {
    pub organism: String,
    pub lineage: String,
    #[serde(default)]
    pub taxon_rank: Option<String>,
}

enum ClashDecision {
    Defer,
    KeyChain,
}

impl TaxonomicHierarchy {
    /// Feeds one lineage into the hierarchy, guided by the paired rank
    /// detail records. Creates missing taxa, bumps coverage on known ones
    /// and wires parent links in lineage order. On a mismatch between the
    /// two inputs the partially built branch is rolled back and the feed
    /// fails; the hierarchy stays usable.
    ///
    /// Returns the store key of the lineage's tip, when one survived the
    /// blacklist.
    pub fn feed(&mut self, lineage: &str, lineage_ex: &[LineageEntry]) -> Result<Option<String>> {
        let mut previous: Option<String> = None;
        self.whet();

        let mut taxa: VecDeque<&str> = lineage.split(self.sep.as_str()).collect();
        let mut details: VecDeque<&LineageEntry> = lineage_ex.iter().collect();

        while !taxa.is_empty() && !details.is_empty() {
            let (Some(taxon_name), Some(info)) = (taxa.pop_front(), details.pop_front()) else {
                break;
            };
            if taxon_name != info.scientific_name {
                if let Some(prev) = previous.clone() {
                    self.remove_leaf_nodes(&[prev])?;
                }
                return Err(self.fatal(ErrorKind::IngestionMismatch(format!(
                    "taxon '{}' does not match the paired detail record '{}'",
                    taxon_name, info.scientific_name
                ))));
            }

            let rank = self.registry.normalize(&info.rank);
            let Some(rank_prefix) = rank.chars().next() else {
                continue;
            };
            self.registry.record(rank_prefix, &rank);

            let taxon = self.digest_taxon(taxon_name, &rank, rank_prefix, previous.as_deref());
            if taxon.is_none() && previous.is_some() {
                break;
            }
            previous = taxon;
        }

        if !taxa.is_empty() || !details.is_empty() {
            if let Some(prev) = previous.clone() {
                self.remove_leaf_nodes(&[prev])?;
            }
            return Err(self.fatal(ErrorKind::IngestionMismatch(format!(
                "unconsumed input remains after pairing: {} lineage taxa, {} detail records",
                taxa.len(),
                details.len()
            ))));
        }

        self.lineages_fed += 1;
        Ok(previous)
    }

    /// Adds one taxon to the store, or revisits the stored one. A name
    /// arriving with its rank prefix already attached is stripped first.
    /// Blacklisted names are swallowed and `None` is returned.
    pub(crate) fn digest_taxon(
        &mut self,
        taxon: &str,
        rank: &str,
        rank_prefix: char,
        previous: Option<&str>,
    ) -> Option<String> {
        let prefixed = format!("{}{}", rank_prefix, TAXON_SEP);
        let name = taxon.strip_prefix(&prefixed).unwrap_or(taxon);
        let prefix_name = format!("{}{}{}", rank_prefix, TAXON_SEP, name);

        if self.bad_taxa.iter().any(|bad| bad == name) {
            return None;
        }

        if self.hierarchy.contains_key(&prefix_name) {
            let existing_parent = self
                .hierarchy
                .get(&prefix_name)
                .and_then(|taxon| taxon.parent.clone());
            Some(self.evaluate_hierarchy_clash(&prefix_name, previous, existing_parent.as_deref()))
        } else {
            let mut taxon = Taxon::new(name, rank, rank_prefix);
            taxon.parent = previous.map(str::to_string);
            self.hierarchy.insert(prefix_name.clone(), taxon);
            Some(prefix_name)
        }
    }

    /// Decides what to do when a stored taxon is revisited with a different
    /// parent: count the visit when the parents agree, defer to the
    /// conflict set when the divergence runs through `no rank` taxa or is
    /// shallow, and alias the child into a twin when the branches genuinely
    /// diverge.
    pub(crate) fn evaluate_hierarchy_clash(
        &mut self,
        child: &str,
        new_parent: Option<&str>,
        existing_parent: Option<&str>,
    ) -> String {
        let p1_key = match new_parent {
            None => {
                self.bump_coverage(child);
                return child.to_string();
            }
            Some(key) if Some(key) == existing_parent => {
                self.bump_coverage(child);
                return child.to_string();
            }
            Some(key) => key.to_string(),
        };
        let p2_key = match existing_parent {
            Some(key) => key.to_string(),
            // nothing to reconcile against; give the child a twin
            None => return self.hierarchy_key_chain(child, &p1_key),
        };

        let decision = {
            let store = &self.hierarchy;
            match (store.get(&p1_key), store.get(&p2_key)) {
                (Some(p1), Some(p2)) => match Taxon::lca(p1, p2, store) {
                    None => ClashDecision::KeyChain,
                    Some(lca) => {
                        let p1_slice = Taxon::lineage_slice(p1, Some(lca), store);
                        let p2_slice = Taxon::lineage_slice(p2, Some(lca), store);
                        let p1_blank =
                            !p1_slice.is_empty() && p1_slice.iter().all(|t| t.rank == NO_RANK);
                        let p2_blank =
                            !p2_slice.is_empty() && p2_slice.iter().all(|t| t.rank == NO_RANK);
                        if p1_blank || p2_blank {
                            ClashDecision::Defer
                        } else if p1.tax_dist(lca, store).max(p2.tax_dist(lca, store)) > 1 {
                            // the path between a parent and the LCA is too
                            // long to pop; alias instead
                            ClashDecision::KeyChain
                        } else {
                            ClashDecision::Defer
                        }
                    }
                },
                _ => ClashDecision::KeyChain,
            }
        };

        match decision {
            ClashDecision::Defer => {
                self.bump_coverage(child);
                self.flag_conflict(&p1_key, &p2_key);
                child.to_string()
            }
            ClashDecision::KeyChain => self.hierarchy_key_chain(child, &p1_key),
        }
    }

    /// Disambiguates a taxon label that legitimately appears in two
    /// divergent branches by storing a numbered twin (`name_1`, `name_2`,
    /// ...) under the new parent. An existing twin under the same parent is
    /// reused.
    pub(crate) fn hierarchy_key_chain(&mut self, child: &str, parent: &str) -> String {
        let (prefix, rank, base_name) = match self.hierarchy.get(child) {
            Some(taxon) => (taxon.prefix, taxon.rank.clone(), taxon.name.clone()),
            None => return child.to_string(),
        };

        let mut i = 1;
        loop {
            let alias = format!("{}{}{}_{}", prefix, TAXON_SEP, base_name, i);
            if let Some(existing) = self.hierarchy.get(&alias) {
                if existing.parent.as_deref() == Some(parent) {
                    return alias;
                }
                i += 1;
                continue;
            }
            debug!(
                "taxon '{}' with diverging lineage ({}) renamed '{}'",
                base_name,
                self.emit(parent, false),
                alias
            );
            let mut twin = Taxon::new(&format!("{}_{}", base_name, i), &rank, prefix);
            twin.parent = Some(parent.to_string());
            self.hierarchy.insert(alias.clone(), twin);
            return alias;
        }
    }

    fn bump_coverage(&mut self, key: &str) {
        if let Some(taxon) = self.hierarchy.get_mut(key) {
            taxon.coverage += 1;
        }
    }

    fn flag_conflict(&mut self, a: &str, b: &str) {
        let pair = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        self.conflicts.insert(pair);
    }

    /// Resolves every pending conflict pair, merging the obsolete taxon of
    /// each pair into its chosen representative. Returns the obsolete-key to
    /// representative-key mapping so callers can rewrite external
    /// references.
    pub fn resolve_conflicts(&mut self) -> HashMap<String, String> {
        let mut replaced_nodes: HashMap<String, String> = HashMap::new();
        if self.conflicts.is_empty() {
            return replaced_nodes;
        }

        let mut summary = String::from(
            "taxonomic hierarchy conflicts were resolved by merging the left taxon into the right:\n",
        );
        while let Some((one_key, two_key)) = self.conflicts.pop_first() {
            let info = match (self.hierarchy.get(&one_key), self.hierarchy.get(&two_key)) {
                (Some(one), Some(two)) => {
                    if one.valid(&self.hierarchy) && two.valid(&self.hierarchy) {
                        Some((one.rank.clone(), one.coverage, two.rank.clone(), two.coverage))
                    } else {
                        None
                    }
                }
                _ => None,
            };
            let Some((one_rank, one_cov, two_rank, two_cov)) = info else {
                continue;
            };

            let (rep_key, obs_key) = if one_rank == NO_RANK && two_rank == NO_RANK {
                if one_cov > two_cov {
                    (one_key, two_key)
                } else {
                    (two_key, one_key)
                }
            } else if one_rank == NO_RANK {
                (two_key, one_key)
            } else if two_rank == NO_RANK {
                (one_key, two_key)
            } else {
                debug!(
                    "conflicting taxa '{}' and '{}' both carry valid ranks and were skipped",
                    one_key, two_key
                );
                continue;
            };

            let obs_label = match self.hierarchy.get(&obs_key) {
                Some(taxon) => format!("'{}' ({})", taxon.name, taxon.rank),
                None => obs_key.clone(),
            };
            let rep_label = match self.hierarchy.get(&rep_key) {
                Some(taxon) => format!("'{}' ({})", taxon.name, taxon.rank),
                None => rep_key.clone(),
            };
            self.redirect_hierarchy_paths(&rep_key, &obs_key);
            summary.push_str(&format!("\t{} -> {}\n", obs_label, rep_label));
            replaced_nodes.insert(obs_key, rep_key);
        }
        debug!("{}", summary);
        replaced_nodes
    }

    /// Folds the obsolete taxon into the representative: absorbs its
    /// coverage unless the representative descends from it, reparents its
    /// children, and removes every taxon between it and its LCA with the
    /// representative.
    pub(crate) fn redirect_hierarchy_paths(&mut self, rep_key: &str, obs_key: &str) {
        let obs = match self.hierarchy.get(obs_key) {
            Some(taxon) => taxon.clone(),
            None => return,
        };
        let obs_lineage: Vec<String> = obs
            .lineage(&self.hierarchy)
            .iter()
            .map(|taxon| taxon.prefix_taxon())
            .collect();

        // the representative may already sit in the obsolete taxon's
        // lineage; absorbing would double count
        if !obs_lineage.iter().any(|key| key == rep_key) {
            if let Some(rep) = self.hierarchy.get_mut(rep_key) {
                rep.absorb(&obs);
            }
        }

        for (key, taxon) in self.hierarchy.iter_mut() {
            if taxon.parent.as_deref() == Some(obs_key) && key != rep_key {
                taxon.parent = Some(rep_key.to_string());
            }
        }

        let doomed: Vec<String> = {
            let store = &self.hierarchy;
            match (store.get(obs_key), store.get(rep_key)) {
                (Some(obs), Some(rep)) => {
                    let lca = Taxon::lca(obs, rep, store);
                    Taxon::lineage_slice(obs, lca, store)
                        .iter()
                        .map(|taxon| taxon.prefix_taxon())
                        .collect()
                }
                _ => Vec::new(),
            }
        };
        for key in doomed {
            self.rm_taxon_from_hierarchy(&key, 1);
        }
    }

    /// Decrements a taxon's coverage, dropping it from the store when the
    /// count reaches zero.
    pub(crate) fn rm_taxon_from_hierarchy(&mut self, key: &str, decrement: i64) {
        let remove = match self.hierarchy.get_mut(key) {
            Some(taxon) => {
                taxon.coverage -= decrement;
                taxon.coverage <= 0
            }
            None => false,
        };
        if remove {
            self.hierarchy.remove(key);
        }
    }

    /// Unwinds whole lineages: every taxon on each named leaf's path to
    /// root loses one coverage count, and `lineages_fed` steps back per
    /// removed leaf. The trie is refreshed afterwards.
    pub fn remove_leaf_nodes<S: AsRef<str>>(&mut self, taxa: &[S]) -> Result<()> {
        let mut keys: Vec<&str> = taxa.iter().map(AsRef::as_ref).collect();
        keys.sort_unstable();

        for key in keys {
            let chain: Option<Vec<String>> = self.get_taxon(key).map(|leaf| {
                leaf.lineage(&self.hierarchy)
                    .iter()
                    .map(|taxon| taxon.prefix_taxon())
                    .collect()
            });
            if let Some(chain) = chain {
                for ancestor in chain {
                    self.rm_taxon_from_hierarchy(&ancestor, 1);
                }
                self.lineages_fed = self.lineages_fed.saturating_sub(1);
            }
        }
        self.trie_check()
    }

    /// Resolves removal records to stored keys and delegates to
    /// [remove_leaf_nodes](Self::remove_leaf_nodes).
    pub fn jetison_taxa_from_hierarchy(&mut self, records: &[RemovalRecord]) -> Result<()> {
        let mut taxa_names: Vec<String> = Vec::new();
        for record in records {
            let taxon = if !record.organism.is_empty()
                && !self.canonical_prefix.is_match(&record.organism)
            {
                match record.taxon_rank.as_deref().and_then(|rank| rank.chars().next()) {
                    Some(prefix) => {
                        let keyed = format!("{}{}{}", prefix, TAXON_SEP, record.organism);
                        if self.hierarchy.contains_key(&keyed) {
                            keyed
                        } else {
                            last_segment(&record.lineage, &self.sep)
                        }
                    }
                    None => last_segment(&record.lineage, &self.sep),
                }
            } else if self.hierarchy.contains_key(&record.organism) {
                record.organism.clone()
            } else {
                continue;
            };
            taxa_names.push(taxon);
        }

        let unique = taxa_names.iter().collect::<HashSet<_>>().len();
        debug!(
            "removing {} taxa ({} unique) from taxonomic hierarchy",
            taxa_names.len(),
            unique
        );
        self.remove_leaf_nodes(&taxa_names)
    }

    /// Adds a single new child taxon directly under an existing parent.
    /// The parent must be present under its prefixed key. The child's rank
    /// is taken on trust; rank progression is not verified here.
    pub fn append_to_hierarchy_dict(
        &mut self,
        child: &str,
        parent: &str,
        rank: &str,
        rank_prefix: char,
    ) -> Result<()> {
        if !self.hierarchy.contains_key(parent) {
            let kind = if !self.canonical_prefix.is_match(parent) {
                ErrorKind::UnknownParent(format!(
                    "rank prefix expected on parent taxon '{}'",
                    parent
                ))
            } else {
                ErrorKind::UnknownParent(format!("parent taxon '{}' not in hierarchy", parent))
            };
            return Err(self.fatal(kind));
        }
        self.whet();
        self.validate_rank_prefixes()?;
        self.digest_taxon(child, rank, rank_prefix, Some(parent));
        Ok(())
    }

    /// Loads already-prefixed tree-leaf lineages, deriving each taxon's
    /// rank from its prefix via the provided or default prefix map. A
    /// prefix outside the map abandons the rest of that leaf's lineage; a
    /// blacklisted taxon truncates the leaf and rewrites its lineage to the
    /// ingested part.
    pub fn feed_leaf_nodes(
        &mut self,
        ref_leaves: &mut [TreeLeaf],
        rank_prefix_name_map: Option<&[(char, &str)]>,
    ) -> Result<()> {
        self.registry.seed_leaf_prefixes(rank_prefix_name_map);
        self.whet();
        self.validate_rank_prefixes()?;

        for ref_leaf in ref_leaves.iter_mut() {
            if ref_leaf.lineage.is_empty() {
                continue;
            }
            let mut previous: Option<String> = None;
            let taxa: Vec<String> = ref_leaf
                .lineage
                .split(self.sep.as_str())
                .map(str::to_string)
                .collect();
            for taxon_name in &taxa {
                let prefix = taxon_name.split(TAXON_SEP).next().and_then(single_char);
                let rank = match prefix.and_then(|prefix| self.registry.settled_rank(prefix)) {
                    Some(rank) => rank.to_string(),
                    None => {
                        debug!(
                            "unexpected format of taxon '{}' in lineage '{}' - no rank prefix separated by '{}'?",
                            taxon_name, ref_leaf.lineage, TAXON_SEP
                        );
                        break;
                    }
                };
                let Some(rank_prefix) = prefix else {
                    break;
                };
                let taxon =
                    self.digest_taxon(taxon_name, &rank, rank_prefix, previous.as_deref());
                if taxon.is_none() && previous.is_some() {
                    if let Some(prev) = previous.as_deref() {
                        ref_leaf.lineage = self.emit(prev, true);
                    }
                    break;
                }
                previous = taxon;
            }
            self.lineages_fed += 1;
        }
        Ok(())
    }

    /// Validates a prefixed lineage against the hierarchy and repairs it:
    /// appends the organism as a species when a genus-resolved six-rank
    /// lineage lacks one, and truncates at the first taxon whose rank depth
    /// overshoots its position. Returns `r__Root` when nothing survives.
    pub fn check_lineage(&mut self, lineage: &str, organism: &str, verbose: bool) -> Result<String> {
        if !self.trie_key_prefix || !self.clean_trie {
            self.clean_trie = true;
            debug!("switching multifurcating trie to include rank prefixes");
            self.build_multifurcating_trie(true, false)?;
        }
        if verbose {
            debug!(
                "check_lineage(): lineage = '{}', organism = '{}', trie_key_prefix = {}, clean_trie = {}",
                lineage, organism, self.trie_key_prefix, self.clean_trie
            );
        }

        let lineage = self.clean_lineage_string(lineage, true)?;
        if lineage.is_empty() {
            return Ok(String::new());
        }
        if !self.project_lineage(&lineage)? {
            return Err(self.fatal(ErrorKind::MalformedLineage(format!(
                "lineage '{}' not in taxonomic hierarchy",
                lineage
            ))));
        }

        // an unprefixed organism may appear as a trie value below this
        // lineage; adopt its stored, prefixed form
        let mut organism = organism.to_string();
        if !self.canonical_prefix.is_match(&organism) {
            for (child_lineage, taxon) in self.trie.items_with_prefix(&lineage) {
                if taxon == organism {
                    if let Some(tip) = child_lineage.split(self.sep.as_str()).last() {
                        organism = tip.to_string();
                    }
                }
            }
        }

        let mut lineage_list: Vec<String> = lineage
            .split(self.sep.as_str())
            .map(str::to_string)
            .collect();
        let rank_resolution = self.resolved_to(&lineage)?;
        let rank_depth = match self.registry.depth_of(&rank_resolution) {
            Some(depth) => depth,
            None => return Err(self.fatal(ErrorKind::UnknownRank(rank_resolution))),
        };

        let tip_is_species = lineage_list
            .last()
            .is_some_and(|tip| self.proper_species.is_match(tip));
        if tip_is_species {
            if verbose {
                debug!("check_lineage(): perfect lineage");
            }
        } else if lineage_list.len() == 6 && rank_depth == 6 && self.proper_species.is_match(&organism)
        {
            if !self.canonical_prefix.is_match(&organism) {
                if self.registry.settled_rank('s') == Some("species") {
                    organism = format!("s{}{}", TAXON_SEP, organism);
                } else {
                    return Err(self.fatal(ErrorKind::UnknownRank(
                        "unexpected rank prefix for species".to_string(),
                    )));
                }
            }
            let parent = lineage_list.last().cloned().unwrap_or_default();
            self.append_to_hierarchy_dict(&organism, &parent, "species", 's')?;
            lineage_list.push(organism.clone());
            if verbose {
                debug!("check_lineage(): organism name added to complete the lineage");
            }
        } else if verbose {
            debug!("check_lineage(): truncated lineage");
        }

        self.validate_rank_prefixes()?;
        // enforce the progression of ranks from root to tip
        let mut cut: Option<usize> = None;
        for (i, taxon) in lineage_list.iter().enumerate() {
            let (prefix_str, _) = match split_exact(taxon) {
                Some(parts) => parts,
                None => {
                    return Err(self.fatal(ErrorKind::MalformedLineage(format!(
                        "rank prefix required on taxon '{}'",
                        taxon
                    ))));
                }
            };
            let rank = match single_char(prefix_str)
                .and_then(|prefix| self.registry.settled_rank(prefix))
            {
                Some(rank) => rank.to_string(),
                None => return Err(self.fatal(ErrorKind::UnknownRank(prefix_str.to_string()))),
            };
            match self.registry.depth_of(&rank) {
                None => {
                    debug!(
                        "rank '{}' is not in the list of accepted taxonomic ranks; lineage truncated to '{}'",
                        rank,
                        lineage_list[..i].join(&self.sep)
                    );
                    cut = Some(i);
                    break;
                }
                Some(depth) if depth > i + 1 => {
                    debug!(
                        "order of taxonomic ranks in cleaned lineage '{}' is unexpected; lineage truncated to '{}'",
                        lineage_list.join(&self.sep),
                        lineage_list[..i].join(&self.sep)
                    );
                    cut = Some(i);
                    break;
                }
                Some(_) => {}
            }
        }
        if let Some(i) = cut {
            let excised: Vec<String> = lineage_list[i..].to_vec();
            lineage_list.truncate(i);
            for key in &excised {
                if self.get_taxon(key).is_some() {
                    self.rm_taxon_from_hierarchy(key, 1);
                }
            }
        }

        if lineage_list.is_empty() {
            lineage_list.push("r__Root".to_string());
        }
        Ok(lineage_list.join(&self.sep))
    }
}

fn last_segment(lineage: &str, sep: &str) -> String {
    lineage.split(sep).last().unwrap_or("").to_string()
}
