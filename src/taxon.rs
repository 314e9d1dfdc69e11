//! The Taxon node: a single classification unit in the hierarchy.
//!
//! Taxa are owned exclusively by the hierarchy's store, keyed by their
//! prefixed name (e.g. `p__Proteobacteria`). Parent links are plain store
//! keys rather than owned pointers, so reparenting a node during conflict
//! resolution is a value update and ownership never cycles.
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Separator between a rank prefix and the taxon name. Not configurable.
pub const TAXON_SEP: &str = "__";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxon {
    /// Human-readable name, never carrying the rank prefix.
    pub name: String,
    /// Canonical rank name, or the `no rank` sentinel.
    pub rank: String,
    /// Single-character rank prefix derived from the rank's first letter.
    pub prefix: char,
    /// Store key of the parent taxon; `None` for root-most nodes.
    pub parent: Option<String>,
    /// Number of ingested lineages this taxon is an ancestor of, itself
    /// included. The taxon is dropped from the store once this reaches zero.
    pub coverage: i64,
}

impl Taxon {
    pub fn new(name: &str, rank: &str, prefix: char) -> Self {
        Taxon {
            name: name.to_string(),
            rank: rank.to_string(),
            prefix,
            parent: None,
            coverage: 1,
        }
    }

    /// The store key for this taxon, e.g. `g__Escherichia`.
    pub fn prefix_taxon(&self) -> String {
        format!("{}{}{}", self.prefix, TAXON_SEP, self.name)
    }

    /// Folds another taxon's coverage into this one. Used when a conflict's
    /// chosen representative replaces an obsolete duplicate.
    pub fn absorb(&mut self, other: &Taxon) {
        self.coverage += other.coverage;
    }

    /// Whether this taxon can still participate in conflict resolution.
    pub fn valid(&self, store: &HashMap<String, Taxon>) -> bool {
        if self.name == "unclassified" {
            return false;
        }
        store.contains_key(&self.prefix_taxon())
    }

    /// The chain of taxa from the root-most ancestor down to this taxon,
    /// resolved through the store. The walk stops at a parent key that is no
    /// longer stored; parent links form a forest, so a repeated key means a
    /// rogue cycle and also stops the walk.
    pub fn lineage<'t>(&'t self, store: &'t HashMap<String, Taxon>) -> Vec<&'t Taxon> {
        let mut chain: Vec<&Taxon> = vec![self];
        let mut seen: HashSet<String> = HashSet::from([self.prefix_taxon()]);
        let mut parent = self.parent.as_deref();
        while let Some(key) = parent {
            if !seen.insert(key.to_string()) {
                break;
            }
            match store.get(key) {
                Some(taxon) => {
                    chain.push(taxon);
                    parent = taxon.parent.as_deref();
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// The number of parent-link hops separating two taxa.
    pub fn tax_dist(&self, other: &Taxon, store: &HashMap<String, Taxon>) -> usize {
        if self.name == other.name {
            return 0;
        }
        if self.parent.is_none() && other.parent.is_none() {
            return 1;
        }
        let own = self.lineage(store);
        if let Some(pos) = own.iter().position(|taxon| taxon.name == other.name) {
            return own.len() - 1 - pos;
        }
        let theirs = other.lineage(store);
        if let Some(pos) = theirs.iter().position(|taxon| taxon.name == self.name) {
            return theirs.len() - 1 - pos;
        }
        // the chains never meet; count the other taxon's walk to its root
        // plus the final hop between unrelated roots
        theirs.len()
    }

    /// The lowest common ancestor of two taxa, or `None` when their parent
    /// chains never meet.
    pub fn lca<'t>(
        left: &'t Taxon,
        right: &'t Taxon,
        store: &'t HashMap<String, Taxon>,
    ) -> Option<&'t Taxon> {
        let mut l1 = left.lineage(store);
        let mut l2 = right.lineage(store);
        let shared = l1.len().min(l2.len());
        l1.truncate(shared);
        l2.truncate(shared);

        while let (Some(t1), Some(t2)) = (l1.pop(), l2.pop()) {
            if t1.prefix == t2.prefix && t1.name == t2.name {
                return Some(t1);
            }
        }
        None
    }

    /// The taxa strictly between `stop` and `start`, start inclusive,
    /// ordered root-ward to tip-ward. Empty when `stop` is absent from the
    /// start taxon's lineage.
    pub fn lineage_slice<'t>(
        start: &'t Taxon,
        stop: Option<&Taxon>,
        store: &'t HashMap<String, Taxon>,
    ) -> Vec<&'t Taxon> {
        let stop = match stop {
            Some(taxon) => taxon,
            None => return Vec::new(),
        };
        let lineage = start.lineage(store);
        match lineage
            .iter()
            .position(|taxon| taxon.prefix == stop.prefix && taxon.name == stop.name)
        {
            Some(pos) => lineage[pos + 1..].to_vec(),
            None => Vec::new(),
        }
    }
}
