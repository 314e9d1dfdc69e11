//! An in-memory taxonomic hierarchy for canonicalizing, repairing and
//! querying the lineages of reference sequences.
//!
//! The hierarchy is fed lineage strings paired with rank details (or
//! already-prefixed tree-leaf lineages), reconciles taxa that appear under
//! several parents, and answers exact and fuzzy lineage queries through a
//! trie kept coherent with the store.
//!
//! ```
//! use taxotree::{LineageEntry, TaxonomicHierarchy};
//!
//! # fn main() -> taxotree::Result<()> {
//! let mut hierarchy = TaxonomicHierarchy::new();
//! let details = vec![
//!     LineageEntry::new("Bacteria", "superkingdom"),
//!     LineageEntry::new("Proteobacteria", "phylum"),
//! ];
//! hierarchy.feed("Bacteria; Proteobacteria", &details)?;
//!
//! assert_eq!(
//!     hierarchy.emit("p__Proteobacteria", true),
//!     "d__Bacteria; p__Proteobacteria"
//! );
//! assert!(hierarchy.project_lineage("d__Bacteria; p__Proteobacteria")?);
//! # Ok(())
//! # }
//! ```

mod errors;
mod hierarchy;
mod ingest;
mod rank;
mod taxon;
mod trie;

pub use crate::errors::{Error, ErrorKind, Result};
pub use crate::hierarchy::{HierarchyState, TaxonomicHierarchy, DEFAULT_SEPARATOR};
pub use crate::ingest::{LineageEntry, RemovalRecord, TreeLeaf};
pub use crate::rank::{PrefixRanks, RankRegistry, NO_RANK};
pub use crate::taxon::{Taxon, TAXON_SEP};
pub use crate::trie::LineageTrie;
