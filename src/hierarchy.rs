//! The taxonomic hierarchy store and its read-side operations.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, error};
use regex::Regex;
use serde::Serialize;

use crate::errors::{Error, ErrorKind, Result};
use crate::rank::RankRegistry;
use crate::taxon::{Taxon, TAXON_SEP};
use crate::trie::LineageTrie;

/// Default separator between the ranks of a serialized lineage.
pub const DEFAULT_SEPARATOR: &str = "; ";

/// An in-memory model of a classification tree, fed from heterogeneous
/// lineage sources and queried for exact and fuzzy lineage membership.
///
/// The store owns every [Taxon] under its prefixed-name key; parent links
/// are store keys resolved on demand. A lineage trie derived from the store
/// accelerates whole-lineage lookups and is rebuilt lazily whenever the
/// `lineages_fed` and `lineages_into_trie` counters disagree.
#[derive(Clone, Debug)]
pub struct TaxonomicHierarchy {
    pub(crate) hierarchy: HashMap<String, Taxon>,
    pub(crate) registry: RankRegistry,
    /// Pending conflict pairs, canonicalised as `(min_key, max_key)`.
    pub(crate) conflicts: BTreeSet<(String, String)>,
    pub(crate) trie: LineageTrie,
    pub(crate) sep: String,
    pub(crate) bad_taxa: Vec<String>,
    pub(crate) trie_key_prefix: bool,
    pub(crate) trie_value_prefix: bool,
    pub(crate) clean_trie: bool,
    pub(crate) lineages_fed: usize,
    pub(crate) lineages_into_trie: usize,
    pub(crate) canonical_prefix: Regex,
    pub(crate) proper_species: Regex,
}

/// A snapshot of the hierarchy's bookkeeping, dumped whenever an operation
/// aborts fatally.
#[derive(Debug, Serialize)]
pub struct HierarchyState {
    pub clean_trie: bool,
    pub trie_key_prefix: bool,
    pub trie_value_prefix: bool,
    pub rank_prefix_map_values: &'static str,
    pub accepted_ranks_depths: BTreeMap<String, usize>,
    pub lineages_fed: usize,
    pub lineages_into_trie: usize,
    pub rank_prefix_map: serde_json::Value,
    pub taxon_sep: String,
    pub lin_sep: String,
}

impl TaxonomicHierarchy {
    pub fn new() -> Self {
        Self::with_separator(DEFAULT_SEPARATOR)
    }

    pub fn with_separator(sep: impl Into<String>) -> Self {
        let sep = sep.into();
        TaxonomicHierarchy {
            hierarchy: HashMap::new(),
            registry: RankRegistry::new(),
            conflicts: BTreeSet::new(),
            trie: LineageTrie::new(sep.clone()),
            sep,
            bad_taxa: vec![
                "cellular organisms".to_string(),
                "unclassified".to_string(),
            ],
            trie_key_prefix: true,
            trie_value_prefix: false,
            clean_trie: true,
            lineages_fed: 0,
            lineages_into_trie: 0,
            canonical_prefix: Regex::new(r"^[nrdpcofgs]__").expect("static pattern"),
            proper_species: Regex::new(r"^(s__)?[A-Z][a-z]+ [a-z]+$").expect("static pattern"),
        }
    }

    /// Replaces the taxon blacklist applied during ingestion.
    pub fn with_bad_taxa(mut self, bad_taxa: Vec<String>) -> Self {
        self.bad_taxa = bad_taxa;
        self
    }

    /// Controls whether `no rank` taxa are excluded from trie keys.
    pub fn with_clean_trie(mut self, clean: bool) -> Self {
        self.clean_trie = clean;
        self
    }

    pub fn separator(&self) -> &str {
        &self.sep
    }

    /// The taxon store, keyed by prefixed name. Read-only access for callers
    /// that drive [Taxon] operations directly.
    pub fn taxa(&self) -> &HashMap<String, Taxon> {
        &self.hierarchy
    }

    pub fn len(&self) -> usize {
        self.hierarchy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hierarchy.is_empty()
    }

    /// Number of lineages handed to the hierarchy so far.
    pub fn lineages_fed(&self) -> usize {
        self.lineages_fed
    }

    pub fn get_state(&self) -> HierarchyState {
        HierarchyState {
            clean_trie: self.clean_trie,
            trie_key_prefix: self.trie_key_prefix,
            trie_value_prefix: self.trie_value_prefix,
            rank_prefix_map_values: if self.registry.is_settled() { "str" } else { "set" },
            accepted_ranks_depths: self.registry.depth_table(),
            lineages_fed: self.lineages_fed,
            lineages_into_trie: self.lineages_into_trie,
            rank_prefix_map: self.registry.dump(),
            taxon_sep: TAXON_SEP.to_string(),
            lin_sep: self.sep.clone(),
        }
    }

    /// Builds a fatal error, logging the state snapshot first so the host
    /// has something to debug with after the abort.
    pub(crate) fn fatal(&self, kind: ErrorKind) -> Error {
        let err = Error::new(kind);
        let state = serde_json::to_string_pretty(&self.get_state()).unwrap_or_default();
        error!("{}\nsummary of taxonomic hierarchy state:\n{}", err, state);
        err
    }

    pub fn get_taxon(&self, prefix_taxon: &str) -> Option<&Taxon> {
        let taxon = self.hierarchy.get(prefix_taxon);
        if taxon.is_none() {
            debug!(
                "taxon '{}' not present in taxonomic hierarchy",
                prefix_taxon
            );
        }
        taxon
    }

    /// The names of every stored taxon, with or without rank prefixes.
    pub fn get_taxon_names(&self, with_prefix: bool) -> HashSet<String> {
        self.hierarchy
            .values()
            .map(|taxon| {
                if with_prefix {
                    taxon.prefix_taxon()
                } else {
                    taxon.name.clone()
                }
            })
            .collect()
    }

    /// Reconstructs the lineage string of a stored taxon by walking parent
    /// links root-ward. Returns an empty string for an unknown key.
    pub fn emit(&self, prefix_taxon: &str, with_prefix: bool) -> String {
        let taxon = match self.get_taxon(prefix_taxon) {
            Some(taxon) => taxon,
            None => return String::new(),
        };
        let segments: Vec<String> = taxon
            .lineage(&self.hierarchy)
            .iter()
            .map(|taxon| {
                if with_prefix {
                    taxon.prefix_taxon()
                } else {
                    taxon.name.clone()
                }
            })
            .collect();
        segments.join(&self.sep)
    }

    pub fn whet(&mut self) {
        self.registry.whet();
    }

    pub fn validate_rank_prefixes(&mut self) -> Result<()> {
        match self.registry.validate() {
            Ok(()) => Ok(()),
            Err(kind) => Err(self.fatal(kind)),
        }
    }

    fn tip_rank(&self, lineage: &str) -> Result<String> {
        let taxon = lineage.split(self.sep.as_str()).last().unwrap_or("");
        let prefix = match taxon.chars().next() {
            Some(prefix) => prefix,
            None => {
                return Err(self.fatal(ErrorKind::MalformedLineage(format!(
                    "empty taxon in lineage '{}'",
                    lineage
                ))));
            }
        };
        match self.registry.settled_rank(prefix) {
            Some(rank) => Ok(rank.to_string()),
            None => Err(self.fatal(ErrorKind::UnknownRank(prefix.to_string()))),
        }
    }

    /// Whether a prefixed lineage is resolved at least as deep as the given
    /// rank.
    pub fn resolved_as(&mut self, lineage: &str, rank_name: &str) -> Result<bool> {
        self.validate_rank_prefixes()?;
        let wanted = match self.registry.depth_of(rank_name) {
            Some(depth) => depth,
            None => return Err(self.fatal(ErrorKind::UnknownRank(rank_name.to_string()))),
        };
        let rank = self.tip_rank(lineage)?;
        let depth = match self.registry.depth_of(&rank) {
            Some(depth) => depth,
            None => return Err(self.fatal(ErrorKind::UnknownRank(rank))),
        };
        Ok(depth >= wanted)
    }

    /// The rank name the tip of a prefixed lineage is resolved to.
    pub fn resolved_to(&mut self, lineage: &str) -> Result<String> {
        self.validate_rank_prefixes()?;
        self.tip_rank(lineage)
    }

    /// All stored taxa at a given canonical rank.
    pub fn rank_representatives(&self, rank_name: &str, with_prefix: bool) -> Result<HashSet<String>> {
        if self.registry.depth_of(rank_name).is_none() {
            return Err(self.fatal(ErrorKind::UnknownRank(rank_name.to_string())));
        }
        Ok(self
            .hierarchy
            .values()
            .filter(|taxon| taxon.rank == rank_name)
            .map(|taxon| {
                if with_prefix {
                    taxon.prefix_taxon()
                } else {
                    taxon.name.clone()
                }
            })
            .collect())
    }

    /// A human-readable count of taxa per canonical rank, root-ward first.
    pub fn summarize_taxa(&mut self) -> Result<String> {
        self.validate_rank_prefixes()?;

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for taxon in self.hierarchy.values() {
            *counts.entry(taxon.rank.as_str()).or_insert(0) += 1;
        }

        let mut summary = String::from("Number of unique lineages:\n");
        for (rank, _) in self.registry.ranks_by_depth() {
            let count = match counts.get(rank.as_str()) {
                Some(count) => count.to_string(),
                None => continue,
            };
            let mut buffer = String::from(" ");
            while rank.len() + count.len() + buffer.len() < 12 {
                buffer.push(' ');
            }
            summary.push_str(&format!("\t{}{}{}\n", rank, buffer, count));
        }
        Ok(summary)
    }

    /// Truncates every lineage in the map to the depth of `rank`, dropping
    /// lineages that do not reach it. Fails when a retained tip's prefix
    /// disagrees with the requested rank.
    pub fn trim_lineages_to_rank(
        &mut self,
        leaf_taxa_map: &HashMap<String, String>,
        rank: &str,
    ) -> Result<HashMap<String, String>> {
        let depth = match self.registry.depth_of(rank) {
            Some(depth) => depth,
            None => return Err(self.fatal(ErrorKind::UnknownRank(rank.to_string()))),
        };
        self.validate_rank_prefixes()?;

        let mut trimmed: HashMap<String, String> = HashMap::new();
        let mut truncated = 0;
        let mut nodes: Vec<&String> = leaf_taxa_map.keys().collect();
        nodes.sort();

        for node in nodes {
            let lineage: Vec<&str> = leaf_taxa_map[node].split(self.sep.as_str()).collect();
            if lineage.len() == 1 || lineage.len() < depth {
                truncated += 1;
                continue;
            }
            let kept = &lineage[..depth];
            let tip = match kept.last() {
                Some(tip) => *tip,
                None => {
                    return Err(self.fatal(ErrorKind::MalformedLineage(format!(
                        "lineage trimmed to rank '{}' is empty",
                        rank
                    ))));
                }
            };
            trimmed.insert(node.clone(), kept.join(&self.sep));

            let tip_rank = match tip
                .chars()
                .next()
                .and_then(|prefix| self.registry.settled_rank(prefix))
            {
                Some(tip_rank) => tip_rank.to_string(),
                None => {
                    return Err(self.fatal(ErrorKind::UnknownRank(format!(
                        "prefix of trimmed taxon '{}'",
                        tip
                    ))));
                }
            };
            if tip_rank != rank {
                return Err(self.fatal(ErrorKind::MalformedLineage(format!(
                    "rank prefix '{}' disagrees with rank name '{}' in trimmed lineage",
                    tip_rank, rank
                ))));
            }
        }
        debug!(
            "{} lineages truncated before '{}' were removed during lineage trimming",
            truncated, rank
        );
        Ok(trimmed)
    }

    /// Drops `no rank` and non-canonical segments from a prefixed lineage,
    /// repairing stray taxon separators once before giving up on a segment.
    pub fn clean_lineage_string(&mut self, lineage: &str, with_prefix: bool) -> Result<String> {
        self.validate_rank_prefixes()?;

        let mut reconstructed: Vec<String> = Vec::new();
        for raw in lineage.split(self.sep.as_str()) {
            let segment = if split_exact(raw).is_some() {
                raw.to_string()
            } else {
                repair_taxon_sep(raw)
            };
            let (prefix_str, name) = match split_exact(&segment) {
                Some(parts) => parts,
                None => {
                    return Err(self.fatal(ErrorKind::MalformedLineage(format!(
                        "rank prefix required, none found on taxon '{}' in lineage '{}'",
                        raw, lineage
                    ))));
                }
            };
            if segment.starts_with("n__") {
                continue;
            }
            let rank = match single_char(prefix_str).and_then(|prefix| self.registry.settled_rank(prefix))
            {
                Some(rank) => rank.to_string(),
                None => {
                    return Err(self.fatal(ErrorKind::UnknownRank(prefix_str.to_string())));
                }
            };
            if self.registry.depth_of(&rank).is_some() && !name.is_empty() {
                let kept = if with_prefix {
                    segment.clone()
                } else {
                    self.canonical_prefix.replace(&segment, "").into_owned()
                };
                reconstructed.push(kept);
            }
        }
        Ok(reconstructed.join(&self.sep))
    }

    /// Strips the `x__` prefix from every well-formed segment of a lineage.
    pub fn strip_rank_prefix(&self, lineage: &str) -> String {
        lineage
            .split(self.sep.as_str())
            .map(|segment| match split_exact(segment) {
                Some((_, name)) => name,
                None => segment,
            })
            .collect::<Vec<&str>>()
            .join(&self.sep)
    }

    /// Rebuilds the trie from every lineage in the store, plus a synthetic
    /// `r__Root` entry. The flags choose whether keys and values carry rank
    /// prefixes, and are remembered for lazy rebuilds.
    pub fn build_multifurcating_trie(&mut self, key_prefix: bool, value_prefix: bool) -> Result<()> {
        self.trie_key_prefix = key_prefix;
        self.trie_value_prefix = value_prefix;

        let mut lineages: BTreeSet<String> = BTreeSet::new();
        lineages.insert("r__Root".to_string());
        let keys: Vec<String> = self.hierarchy.keys().cloned().collect();
        for key in keys {
            lineages.insert(self.emit(&key, true));
        }

        self.trie.clear();
        for lin in lineages {
            let cleaned = self.clean_lineage_string(&lin, value_prefix)?;
            let mut taxon = cleaned
                .split(self.sep.as_str())
                .last()
                .unwrap_or("")
                .to_string();
            if !value_prefix {
                taxon = self.canonical_prefix.replace(&taxon, "").into_owned();
            }
            let key = if self.clean_trie {
                self.clean_lineage_string(&lin, key_prefix)?
            } else if !key_prefix {
                self.strip_rank_prefix(&lin)
            } else {
                lin.clone()
            };
            if !key.is_empty() && !taxon.is_empty() {
                self.trie.insert(&key, taxon);
            }
        }

        self.lineages_into_trie = self.lineages_fed;
        Ok(())
    }

    /// Rebuilds the trie with its last-used flags if it has fallen behind
    /// the store.
    pub fn trie_check(&mut self) -> Result<()> {
        if self.lineages_fed != self.lineages_into_trie {
            self.build_multifurcating_trie(self.trie_key_prefix, self.trie_value_prefix)?;
        }
        Ok(())
    }

    /// Exact trie lookup; empty string when the lineage is absent.
    pub fn query_trie(&self, lineage: &str) -> String {
        match self.trie.get(lineage) {
            Some(taxon) => taxon.to_string(),
            None => {
                debug!("lineage '{}' is not present in the trie", lineage);
                String::new()
            }
        }
    }

    /// Whether an entire lineage exists in the hierarchy, after making sure
    /// the trie is current. The lineage must match the trie's key flags.
    pub fn project_lineage(&mut self, lineage: &str) -> Result<bool> {
        self.trie_check()?;
        Ok(self.trie.contains_key(lineage))
    }

    /// Projects a rank-prefix-less lineage onto the hierarchy, stripping
    /// taxa from the tip until a known prefix of it is found, and returns
    /// the stored prefixed lineage of the hit. Empty string when exhausted.
    pub fn get_prefixed_lineage_from_bare(&mut self, bare_lineage: &str) -> Result<String> {
        if self.trie_key_prefix || !self.trie_value_prefix {
            self.build_multifurcating_trie(false, true)?;
        }

        let mut lineage_split: Vec<String> = bare_lineage
            .split(self.sep.as_str())
            .map(str::to_string)
            .collect();
        if self.clean_trie {
            self.rm_bad_taxa_from_lineage(&mut lineage_split);
            self.rm_absent_taxa_from_lineage(&mut lineage_split);
        }

        while !lineage_split.is_empty() {
            let taxon = self.query_trie(&lineage_split.join(&self.sep));
            if !taxon.is_empty() {
                let emitted = self.emit(&taxon, true);
                return self.clean_lineage_string(&emitted, true);
            }
            lineage_split.pop();
        }
        Ok(String::new())
    }

    /// Removes blacklisted taxa from an unprefixed split lineage.
    fn rm_bad_taxa_from_lineage(&self, lineage_split: &mut Vec<String>) {
        if self.bad_taxa.is_empty() {
            return;
        }
        lineage_split.retain(|taxon| !self.bad_taxa.contains(taxon));
    }

    /// Removes taxa the hierarchy has never seen from an unprefixed split
    /// lineage, screening out non-canonical names before trie queries.
    fn rm_absent_taxa_from_lineage(&self, lineage_split: &mut Vec<String>) {
        let known = self.get_taxon_names(false);
        lineage_split.retain(|taxon| known.contains(taxon));
    }
}

impl Default for TaxonomicHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `x__Name` into prefix and name, requiring exactly one taxon
/// separator.
pub(crate) fn split_exact(segment: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = segment.split(TAXON_SEP).collect();
    if parts.len() == 2 {
        Some((parts[0], parts[1]))
    } else {
        None
    }
}

pub(crate) fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

/// Rewrites taxon separators that do not delimit a single-letter rank prefix
/// into single underscores, so a mangled segment like `s__Bacillus__cereus`
/// can be split on its one legitimate separator.
pub(crate) fn repair_taxon_sep(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let keep_lead =
        bytes.len() >= 3 && bytes[0].is_ascii_lowercase() && bytes[1] == b'_' && bytes[2] == b'_';
    if keep_lead {
        let mut repaired = String::with_capacity(segment.len());
        repaired.push_str(&segment[..3]);
        repaired.push_str(&segment[3..].replace(TAXON_SEP, "_"));
        repaired
    } else {
        segment.replace(TAXON_SEP, "_")
    }
}
