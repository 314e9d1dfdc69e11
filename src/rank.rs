//! Code related to handling of taxonomic ranks and their prefixes
use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::warn;

use crate::errors::ErrorKind;

/// Sentinel rank assigned to taxa that sit outside the canonical rank set.
pub const NO_RANK: &str = "no rank";

/// Prefix-to-rank seeds used when loading already-prefixed tree leaves.
const LEAF_PREFIXES: &[(char, &str)] = &[
    ('d', "domain"),
    ('p', "phylum"),
    ('c', "class"),
    ('o', "order"),
    ('f', "family"),
    ('g', "genus"),
    ('s', "species"),
    ('t', "type_strain"),
];

/// The rank names a single prefix character has been seen standing for.
///
/// While lineages are being ingested a prefix gathers every rank name it is
/// paired with; `validate_rank_prefixes` settles each entry to a single name
/// before queries are allowed to consult it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrefixRanks {
    Gathering(BTreeSet<String>),
    Settled(String),
}

/// Bidirectional rank vocabulary: canonical rank depths, rank-name aliases
/// and the mutable prefix registry.
#[derive(Clone, Debug)]
pub struct RankRegistry {
    depths: HashMap<String, usize>,
    aliases: HashMap<String, String>,
    prefixes: BTreeMap<char, PrefixRanks>,
}

impl RankRegistry {
    pub fn new() -> Self {
        let mut depths = HashMap::new();
        for (depth, rank) in [
            "root", "domain", "phylum", "class", "order", "family", "genus", "species",
        ]
        .iter()
        .enumerate()
        {
            depths.insert((*rank).to_string(), depth);
        }

        let mut aliases = HashMap::new();
        aliases.insert("superkingdom".to_string(), "domain".to_string());
        aliases.insert("strain".to_string(), "type_strain".to_string());

        let mut prefixes = BTreeMap::new();
        prefixes.insert(
            'n',
            PrefixRanks::Gathering(BTreeSet::from([NO_RANK.to_string()])),
        );
        prefixes.insert(
            'r',
            PrefixRanks::Gathering(BTreeSet::from(["root".to_string()])),
        );

        RankRegistry {
            depths,
            aliases,
            prefixes,
        }
    }

    /// The depth of a canonical rank, root = 0 through species = 7.
    pub fn depth_of(&self, rank: &str) -> Option<usize> {
        self.depths.get(rank).copied()
    }

    /// Canonical rank names ordered root-ward to tip-ward.
    pub fn ranks_by_depth(&self) -> Vec<(String, usize)> {
        let mut ranks: Vec<(String, usize)> = self
            .depths
            .iter()
            .map(|(rank, depth)| (rank.clone(), *depth))
            .collect();
        ranks.sort_by_key(|(_, depth)| *depth);
        ranks
    }

    pub(crate) fn depth_table(&self) -> BTreeMap<String, usize> {
        self.depths
            .iter()
            .map(|(rank, depth)| (rank.clone(), *depth))
            .collect()
    }

    /// Maps an ingested rank name onto the canonical vocabulary: accepted
    /// names pass through, aliased names are substituted, anything else
    /// becomes `no rank`.
    pub fn normalize(&self, rank: &str) -> String {
        if self.depths.contains_key(rank) {
            rank.to_string()
        } else if let Some(canonical) = self.aliases.get(rank) {
            canonical.clone()
        } else {
            NO_RANK.to_string()
        }
    }

    /// Records that `prefix` was seen standing for `rank`.
    pub fn record(&mut self, prefix: char, rank: &str) {
        let entry = self
            .prefixes
            .entry(prefix)
            .or_insert_with(|| PrefixRanks::Gathering(BTreeSet::new()));
        match entry {
            PrefixRanks::Gathering(names) => {
                names.insert(rank.to_string());
            }
            PrefixRanks::Settled(name) => {
                let mut names = BTreeSet::from([name.clone()]);
                names.insert(rank.to_string());
                *entry = PrefixRanks::Gathering(names);
            }
        }
    }

    /// Reopens every settled prefix for further gathering. Call before any
    /// ingestion in case `validate_rank_prefixes` already ran.
    pub fn whet(&mut self) {
        for entry in self.prefixes.values_mut() {
            if let PrefixRanks::Settled(name) = entry {
                *entry = PrefixRanks::Gathering(BTreeSet::from([name.clone()]));
            }
        }
    }

    /// Settles every gathering prefix to a single rank name, failing when a
    /// prefix was paired with more than one.
    pub fn validate(&mut self) -> Result<(), ErrorKind> {
        for (prefix, entry) in self.prefixes.iter_mut() {
            if let PrefixRanks::Gathering(names) = entry {
                match names.len() {
                    0 => warn!("prefix '{}' exists without a rank name", prefix),
                    1 => {
                        let name = names.iter().next().cloned().unwrap_or_default();
                        *entry = PrefixRanks::Settled(name);
                    }
                    _ => {
                        return Err(ErrorKind::PrefixAmbiguity {
                            prefix: *prefix,
                            ranks: names.iter().cloned().collect::<Vec<_>>().join(","),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// The rank name a prefix settled to, if validation has run.
    pub fn settled_rank(&self, prefix: char) -> Option<&str> {
        match self.prefixes.get(&prefix) {
            Some(PrefixRanks::Settled(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Whether every prefix has settled to a single rank name.
    pub fn is_settled(&self) -> bool {
        self.prefixes
            .values()
            .all(|entry| matches!(entry, PrefixRanks::Settled(_)))
    }

    /// Replaces prefix entries from a caller-supplied map, or from the
    /// default single-letter map when none is given. Repeating a prefix in
    /// the slice gathers several names under it.
    pub(crate) fn seed_leaf_prefixes(&mut self, map: Option<&[(char, &str)]>) {
        let pairs = map.unwrap_or(LEAF_PREFIXES);
        let mut fresh: BTreeMap<char, BTreeSet<String>> = BTreeMap::new();
        for (prefix, rank) in pairs {
            fresh.entry(*prefix).or_default().insert((*rank).to_string());
        }
        for (prefix, names) in fresh {
            self.prefixes.insert(prefix, PrefixRanks::Gathering(names));
        }
    }

    pub(crate) fn dump(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (prefix, entry) in &self.prefixes {
            let value = match entry {
                PrefixRanks::Settled(name) => serde_json::Value::String(name.clone()),
                PrefixRanks::Gathering(names) => serde_json::Value::Array(
                    names
                        .iter()
                        .map(|name| serde_json::Value::String(name.clone()))
                        .collect(),
                ),
            };
            map.insert(prefix.to_string(), value);
        }
        serde_json::Value::Object(map)
    }
}

impl Default for RankRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_depths() {
        let registry = RankRegistry::new();
        assert_eq!(registry.depth_of("root"), Some(0));
        assert_eq!(registry.depth_of("domain"), Some(1));
        assert_eq!(registry.depth_of("species"), Some(7));
        assert_eq!(registry.depth_of("type_strain"), None);
        assert_eq!(registry.depth_of(NO_RANK), None);

        let ordered: Vec<String> = registry
            .ranks_by_depth()
            .into_iter()
            .map(|(rank, _)| rank)
            .collect();
        assert_eq!(ordered[0], "root");
        assert_eq!(ordered[7], "species");
    }

    #[test]
    fn test_normalize() {
        let registry = RankRegistry::new();
        assert_eq!(registry.normalize("phylum"), "phylum");
        assert_eq!(registry.normalize("superkingdom"), "domain");
        assert_eq!(registry.normalize("strain"), "type_strain");
        assert_eq!(registry.normalize("biotype"), NO_RANK);
    }

    #[test]
    fn test_record_and_validate() {
        let mut registry = RankRegistry::new();
        registry.record('d', "domain");
        assert!(registry.settled_rank('d').is_none());
        assert!(!registry.is_settled());

        registry.validate().unwrap();
        assert_eq!(registry.settled_rank('d'), Some("domain"));
        assert_eq!(registry.settled_rank('n'), Some(NO_RANK));
        assert_eq!(registry.settled_rank('r'), Some("root"));
        assert!(registry.is_settled());

        // whet reopens the entries, recording keeps working
        registry.whet();
        assert!(registry.settled_rank('d').is_none());
        registry.record('d', "domain");
        registry.validate().unwrap();
        assert_eq!(registry.settled_rank('d'), Some("domain"));
    }

    #[test]
    fn test_ambiguous_prefix_fails_validation() {
        let mut registry = RankRegistry::new();
        registry.record('d', "domain");
        registry.record('d', "division");
        let err = registry.validate().unwrap_err();
        assert!(matches!(err, ErrorKind::PrefixAmbiguity { prefix: 'd', .. }));
    }

    #[test]
    fn test_seed_leaf_prefixes() {
        let mut registry = RankRegistry::new();
        registry.seed_leaf_prefixes(None);
        registry.validate().unwrap();
        assert_eq!(registry.settled_rank('g'), Some("genus"));
        assert_eq!(registry.settled_rank('t'), Some("type_strain"));

        // a caller-supplied map replaces the seeded entries wholesale
        let mut registry = RankRegistry::new();
        registry.record('d', "domain");
        registry.seed_leaf_prefixes(Some(&[('d', "division")]));
        registry.validate().unwrap();
        assert_eq!(registry.settled_rank('d'), Some("division"));
    }
}
