//! A multifurcating trie over lineage strings.
//!
//! Keys are full lineage strings split on the hierarchy's separator, so each
//! trie edge is one taxon. Terminal nodes carry the tip taxon's name, with or
//! without its rank prefix depending on how the hierarchy built the trie.
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
struct TrieNode {
    children: BTreeMap<String, TrieNode>,
    value: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LineageTrie {
    separator: String,
    root: TrieNode,
    len: usize,
}

impl LineageTrie {
    pub fn new(separator: impl Into<String>) -> Self {
        LineageTrie {
            separator: separator.into(),
            root: TrieNode::default(),
            len: 0,
        }
    }

    fn node(&self, key: &str) -> Option<&TrieNode> {
        let mut current = &self.root;
        for segment in key.split(self.separator.as_str()) {
            current = current.children.get(segment)?;
        }
        Some(current)
    }

    /// Inserts a lineage, replacing the value of an existing entry.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        let mut current = &mut self.root;
        for segment in key.split(self.separator.as_str()) {
            current = current.children.entry(segment.to_string()).or_default();
        }
        if current.value.replace(value.into()).is_none() {
            self.len += 1;
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.node(key)?.value.as_deref()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.node(key).is_some_and(|node| node.value.is_some())
    }

    pub fn clear(&mut self) {
        self.root = TrieNode::default();
        self.len = 0;
    }

    /// Number of terminal entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All `(lineage, value)` entries at or below the given lineage, in
    /// lexicographic segment order.
    pub fn items_with_prefix(&self, prefix: &str) -> Vec<(String, String)> {
        let mut items = Vec::new();
        if let Some(node) = self.node(prefix) {
            self.collect(node, prefix.to_string(), &mut items);
        }
        items
    }

    fn collect(&self, node: &TrieNode, key: String, items: &mut Vec<(String, String)>) {
        if let Some(value) = &node.value {
            items.push((key.clone(), value.clone()));
        }
        for (segment, child) in &node.children {
            let child_key = format!("{}{}{}", key, self.separator, segment);
            self.collect(child, child_key, items);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn example_trie() -> LineageTrie {
        let mut trie = LineageTrie::new("; ");
        trie.insert("d__Bacteria", "Bacteria");
        trie.insert("d__Bacteria; p__Proteobacteria", "Proteobacteria");
        trie.insert(
            "d__Bacteria; p__Proteobacteria; c__Gammaproteobacteria",
            "Gammaproteobacteria",
        );
        trie.insert("d__Archaea", "Archaea");
        trie
    }

    #[test]
    fn test_exact_lookup() {
        let trie = example_trie();
        assert_eq!(trie.len(), 4);
        assert_eq!(
            trie.get("d__Bacteria; p__Proteobacteria"),
            Some("Proteobacteria")
        );
        assert!(trie.contains_key("d__Archaea"));
        // interior paths without a terminal value are not entries
        assert_eq!(trie.get("d__Bacteria; p__Firmicutes"), None);
        assert!(!trie.contains_key("p__Proteobacteria"));
    }

    #[test]
    fn test_insert_replaces() {
        let mut trie = example_trie();
        trie.insert("d__Archaea", "Archaea again");
        assert_eq!(trie.len(), 4);
        assert_eq!(trie.get("d__Archaea"), Some("Archaea again"));
    }

    #[test]
    fn test_items_with_prefix() {
        let trie = example_trie();
        let items = trie.items_with_prefix("d__Bacteria");
        let keys: Vec<&str> = items.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "d__Bacteria",
                "d__Bacteria; p__Proteobacteria",
                "d__Bacteria; p__Proteobacteria; c__Gammaproteobacteria",
            ]
        );
        assert!(trie.items_with_prefix("d__Eukaryota").is_empty());
    }

    #[test]
    fn test_clear() {
        let mut trie = example_trie();
        trie.clear();
        assert!(trie.is_empty());
        assert_eq!(trie.get("d__Bacteria"), None);
    }
}
