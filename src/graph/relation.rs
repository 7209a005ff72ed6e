use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::key::PackageKey;

/// Adjacency map `package -> [packages it depends on]` for one ecosystem run.
///
/// Edges are deduplicated per parent. How often a package was reached is kept
/// separately in [`RelationTree::occurrences`], so a diamond seen from two
/// parents yields two edges but a repeated identical edge yields one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationTree {
    edges: BTreeMap<PackageKey, Vec<PackageKey>>,
    direct: Vec<PackageKey>,
    total: Vec<PackageKey>,
    occurrences: BTreeMap<PackageKey, usize>,
    root: Option<PackageKey>,
}

impl RelationTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` was encountered once more.
    pub fn record(&mut self, key: &PackageKey) {
        let count = self.occurrences.entry(key.clone()).or_insert(0);
        if *count == 0 {
            self.total.push(key.clone());
        }
        *count += 1;
    }

    /// Add `parent -> child`. Returns `false` when the edge already existed.
    pub fn add_edge(&mut self, parent: &PackageKey, child: &PackageKey) -> bool {
        self.record(child);
        let children = self.edges.entry(parent.clone()).or_default();
        if children.contains(child) {
            return false;
        }
        children.push(child.clone());
        true
    }

    /// Mark `key` as declared by the project itself.
    pub fn add_direct(&mut self, key: &PackageKey) {
        self.record(key);
        self.mark_direct(key);
    }

    /// Flag an already recorded package as direct without counting it again.
    pub fn mark_direct(&mut self, key: &PackageKey) {
        if !self.direct.contains(key) {
            self.direct.push(key.clone());
        }
    }

    /// Replace the direct set, e.g. with names read from a manifest.
    pub fn set_direct(&mut self, keys: Vec<PackageKey>) {
        self.direct.clear();
        for key in keys {
            self.mark_direct(&key);
        }
    }

    pub fn set_root(&mut self, key: PackageKey) {
        self.root = Some(key);
    }

    pub fn root(&self) -> Option<&PackageKey> {
        self.root.as_ref()
    }

    pub fn is_root(&self, key: &PackageKey) -> bool {
        self.root.as_ref() == Some(key)
    }

    pub fn is_direct(&self, key: &PackageKey) -> bool {
        self.direct.contains(key)
    }

    pub fn direct(&self) -> &[PackageKey] {
        &self.direct
    }

    /// Every package encountered, in first-seen order.
    pub fn total(&self) -> &[PackageKey] {
        &self.total
    }

    /// Outgoing edges of `key`; empty for a key that was never inserted.
    pub fn dependencies_of(&self, key: &PackageKey) -> &[PackageKey] {
        self.edges.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn occurrences(&self, key: &PackageKey) -> usize {
        self.occurrences.get(key).copied().unwrap_or(0)
    }

    /// Every package reachable from `starts` along recorded edges, starts
    /// included.
    pub fn reachable_from<'a>(&self, starts: impl IntoIterator<Item = &'a PackageKey>) -> HashSet<PackageKey> {
        let mut seen: HashSet<PackageKey> = HashSet::new();
        let mut queue: VecDeque<&PackageKey> = starts.into_iter().collect();
        while let Some(key) = queue.pop_front() {
            if !seen.insert(key.clone()) {
                continue;
            }
            queue.extend(self.dependencies_of(key));
        }
        seen
    }

    #[cfg(test)]
    pub fn edges(&self) -> impl Iterator<Item = (&PackageKey, &[PackageKey])> {
        self.edges.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count() == 0 && self.direct.is_empty() && self.root.is_none()
    }

    /// Union `other` into `self`. Merging the same tree again changes nothing.
    pub fn merge(&mut self, other: &RelationTree) {
        for (parent, children) in &other.edges {
            let mine = self.edges.entry(parent.clone()).or_default();
            for child in children {
                if !mine.contains(child) {
                    mine.push(child.clone());
                }
            }
        }
        for key in &other.direct {
            if !self.direct.contains(key) {
                self.direct.push(key.clone());
            }
        }
        for key in &other.total {
            let count = other.occurrences(key);
            let mine = self.occurrences.entry(key.clone()).or_insert(0);
            if *mine == 0 {
                self.total.push(key.clone());
            }
            *mine = (*mine).max(count);
        }
        if self.root.is_none() {
            self.root = other.root.clone();
        }
    }

    /// Rewrite every edge target and direct entry whose name appears in
    /// `selected` to the version recorded there.
    ///
    /// Used where a tool reports requested versions or ranges but the graph
    /// must point at what was actually installed.
    pub fn pin_versions(&mut self, selected: &HashMap<String, String>) {
        let pin = |key: &PackageKey| match selected.get(key.name()) {
            Some(version) if version != key.version() => key.with_version(version.clone()),
            _ => key.clone(),
        };

        for children in self.edges.values_mut() {
            let mut pinned: Vec<PackageKey> = Vec::with_capacity(children.len());
            for child in children.iter().map(pin) {
                if !pinned.contains(&child) {
                    pinned.push(child);
                }
            }
            *children = pinned;
        }

        let mut direct = Vec::with_capacity(self.direct.len());
        for key in self.direct.iter().map(pin) {
            if !direct.contains(&key) {
                direct.push(key);
            }
        }
        self.direct = direct;

        let mut occurrences: BTreeMap<PackageKey, usize> = BTreeMap::new();
        let mut total = Vec::with_capacity(self.total.len());
        for key in &self.total {
            let count = self.occurrences.get(key).copied().unwrap_or(0);
            let pinned = pin(key);
            let slot = occurrences.entry(pinned.clone()).or_insert(0);
            if *slot == 0 {
                total.push(pinned);
            }
            *slot += count;
        }
        self.occurrences = occurrences;
        self.total = total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str, version: &str) -> PackageKey {
        PackageKey::new(name, version)
    }

    #[test]
    fn test_unknown_key_has_no_edges() {
        let tree = RelationTree::new();
        assert!(tree.dependencies_of(&key("ghost", "0.0.0")).is_empty());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_duplicate_edges_counted_not_stored() {
        let mut tree = RelationTree::new();
        assert!(tree.add_edge(&key("a", "1"), &key("b", "1")));
        assert!(!tree.add_edge(&key("a", "1"), &key("b", "1")));
        tree.add_edge(&key("c", "1"), &key("b", "1"));

        assert_eq!(tree.dependencies_of(&key("a", "1")), &[key("b", "1")]);
        assert_eq!(tree.occurrences(&key("b", "1")), 3);
        assert_eq!(tree.edge_count(), 2);
        assert_eq!(tree.total(), &[key("b", "1")]);
    }

    #[test]
    fn test_reachable_from() {
        let mut tree = RelationTree::new();
        tree.add_edge(&key("app", "1"), &key("lib", "1"));
        tree.add_edge(&key("lib", "1"), &key("leaf", "1"));
        tree.add_edge(&key("leaf", "1"), &key("lib", "1"));
        tree.add_edge(&key("tool", "1"), &key("extra", "1"));

        let reached = tree.reachable_from([&key("app", "1")]);
        assert_eq!(reached.len(), 3);
        assert!(reached.contains(&key("leaf", "1")));
        assert!(!reached.contains(&key("extra", "1")));
        assert!(tree.reachable_from(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut other = RelationTree::new();
        other.add_direct(&key("a", "1"));
        other.add_edge(&key("a", "1"), &key("b", "2"));
        other.set_root(key("root", "0"));

        let mut tree = RelationTree::new();
        tree.merge(&other);
        let once = tree.clone();
        tree.merge(&other);
        assert_eq!(tree, once);
        assert_eq!(tree.root(), Some(&key("root", "0")));
    }

    #[test]
    fn test_pin_versions() {
        let mut tree = RelationTree::new();
        tree.add_direct(&key("a", "^1.0"));
        tree.add_edge(&key("a", "1.2.0"), &key("b", ">=2"));
        tree.add_edge(&key("a", "1.2.0"), &key("b", "2.1.0"));

        let selected: HashMap<String, String> = [
            ("a".to_string(), "1.2.0".to_string()),
            ("b".to_string(), "2.1.0".to_string()),
        ]
        .into_iter()
        .collect();
        tree.pin_versions(&selected);

        assert_eq!(tree.direct(), &[key("a", "1.2.0")]);
        assert_eq!(tree.dependencies_of(&key("a", "1.2.0")), &[key("b", "2.1.0")]);
        assert_eq!(tree.occurrences(&key("b", "2.1.0")), 2);
    }
}
