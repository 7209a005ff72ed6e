//! Nested JSON dependency documents (`npm ls`, `pnpm ls`, `pipdeptree`,
//! `swift package show-dependencies`) and the `cargo metadata` resolve graph.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ScanError, ScanResult};
use crate::graph::{PackageKey, RelationTree};
use crate::models::Ecosystem;

/// Field names of one nested document flavour.
#[derive(Debug, Clone, Copy)]
pub struct TreeShape {
    /// Field holding the package name; map children fall back to their key.
    pub name_field: &'static str,
    pub version_field: &'static str,
    pub children_field: &'static str,
}

pub const NPM_SHAPE: TreeShape = TreeShape {
    name_field: "name",
    version_field: "version",
    children_field: "dependencies",
};

pub const PIPDEPTREE_SHAPE: TreeShape = TreeShape {
    name_field: "package_name",
    version_field: "installed_version",
    children_field: "dependencies",
};

pub const SWIFT_SHAPE: TreeShape = TreeShape {
    name_field: "identity",
    version_field: "version",
    children_field: "dependencies",
};

/// One package reached by the walk, with the JSON node it came from.
#[derive(Debug, Clone)]
pub struct NodeRef<'a> {
    pub key: PackageKey,
    /// Name as printed by the tool, before key normalization.
    pub name: String,
    pub version: String,
    pub value: &'a Value,
}

/// Iterative walker over nested dependency documents.
///
/// Edges are visited once per `(parent, child)` pair: a diamond reached from
/// two parents produces both edges, while the shared subtree is only walked
/// again for edges that are new.
pub struct NestedWalker<'a> {
    ecosystem: Ecosystem,
    shape: TreeShape,
    tree: RelationTree,
    nodes: Vec<NodeRef<'a>>,
    seen_nodes: HashSet<PackageKey>,
    visited: HashSet<(Option<PackageKey>, PackageKey)>,
}

impl<'a> NestedWalker<'a> {
    pub fn new(ecosystem: Ecosystem, shape: TreeShape) -> Self {
        NestedWalker {
            ecosystem,
            shape,
            tree: RelationTree::new(),
            nodes: Vec::new(),
            seen_nodes: HashSet::new(),
            visited: HashSet::new(),
        }
    }

    /// Walk a document rooted at a single project node; the root's children
    /// become the direct set.
    pub fn walk_root(&mut self, root: &'a Value) -> Option<PackageKey> {
        let name = root.get(self.shape.name_field).and_then(Value::as_str)?;
        let version = root
            .get(self.shape.version_field)
            .and_then(Value::as_str)
            .unwrap_or("");
        let key = PackageKey::for_ecosystem(self.ecosystem, name, version);
        self.tree.set_root(key.clone());
        self.push_node(&key, name, version, root);
        if let Some(children) = root.get(self.shape.children_field) {
            self.walk_children(Some(&key), children);
        }
        Some(key)
    }

    /// Walk `children` under `parent`. With no parent the first level is
    /// taken as direct dependencies and gets no incoming edge.
    pub fn walk_children(&mut self, parent: Option<&PackageKey>, children: &'a Value) {
        let root = self.tree.root().cloned();
        let mut stack: Vec<(Option<PackageKey>, &'a Value)> = vec![(parent.cloned(), children)];

        while let Some((parent, children)) = stack.pop() {
            for (name, node) in self.entries(children) {
                let Some(version) = self.usable_version(&name, node) else {
                    continue;
                };
                let key = PackageKey::for_ecosystem(self.ecosystem, &name, &version);
                if !self.visited.insert((parent.clone(), key.clone())) {
                    continue;
                }

                match &parent {
                    Some(p) => {
                        self.tree.add_edge(p, &key);
                        if root.as_ref() == Some(p) {
                            self.tree.mark_direct(&key);
                        }
                    }
                    None => self.tree.add_direct(&key),
                }
                self.push_node(&key, &name, &version, node);

                if let Some(grandchildren) = node.get(self.shape.children_field) {
                    stack.push((Some(key), grandchildren));
                }
            }
        }
    }

    fn entries(&self, children: &'a Value) -> Vec<(String, &'a Value)> {
        match children {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| {
                    let name = v
                        .get(self.shape.name_field)
                        .and_then(Value::as_str)
                        .unwrap_or(k.as_str());
                    (name.to_string(), v)
                })
                .collect(),
            Value::Array(list) => list
                .iter()
                .filter_map(|v| {
                    let name = v.get(self.shape.name_field).and_then(Value::as_str)?;
                    Some((name.to_string(), v))
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// `None` for placeholders: `{}`, missing or unmet peer entries, and
    /// nodes without a version.
    fn usable_version(&self, name: &str, node: &Value) -> Option<String> {
        let obj = node.as_object()?;
        if obj.is_empty() {
            debug!(package = name, "skipping empty placeholder");
            return None;
        }
        let flagged = |field: &str| obj.get(field).and_then(Value::as_bool).unwrap_or(false);
        if flagged("missing") || flagged("peerMissing") {
            debug!(package = name, "skipping missing dependency");
            return None;
        }
        match obj.get(self.shape.version_field).and_then(Value::as_str) {
            Some(v) if !v.is_empty() => Some(v.to_string()),
            _ => {
                debug!(package = name, "skipping dependency without version");
                None
            }
        }
    }

    fn push_node(&mut self, key: &PackageKey, name: &str, version: &str, value: &'a Value) {
        if self.seen_nodes.insert(key.clone()) {
            self.nodes.push(NodeRef {
                key: key.clone(),
                name: name.to_string(),
                version: version.to_string(),
                value,
            });
        }
    }

    pub fn finish(self) -> (RelationTree, Vec<NodeRef<'a>>) {
        (self.tree, self.nodes)
    }
}

/// Parse `npm ls --json` output.
pub fn parse_npm_tree(ecosystem: Ecosystem, doc: &Value) -> (RelationTree, Vec<NodeRef<'_>>) {
    let mut walker = NestedWalker::new(ecosystem, NPM_SHAPE);
    if walker.walk_root(doc).is_none() {
        // unnamed project: its dependencies are still the direct set
        if let Some(children) = doc.get("dependencies") {
            walker.walk_children(None, children);
        }
    }
    walker.finish()
}

/// Parse `pnpm ls --json -r` output: an array of workspace projects whose
/// own names never appear in the graph.
pub fn parse_pnpm_tree(doc: &Value) -> ScanResult<(RelationTree, Vec<NodeRef<'_>>)> {
    let projects = doc
        .as_array()
        .ok_or_else(|| ScanError::parse("pnpm ls output", "expected a JSON array of projects"))?;
    let mut walker = NestedWalker::new(Ecosystem::Pnpm, NPM_SHAPE);
    for project in projects {
        if let Some(children) = project.get("dependencies") {
            walker.walk_children(None, children);
        }
    }
    Ok(walker.finish())
}

/// Parse `pipdeptree --json-tree` output.
pub fn parse_pipdeptree(doc: &Value) -> ScanResult<(RelationTree, Vec<NodeRef<'_>>)> {
    if !doc.is_array() {
        return Err(ScanError::parse("pipdeptree output", "expected a JSON array"));
    }
    let mut walker = NestedWalker::new(Ecosystem::Pypi, PIPDEPTREE_SHAPE);
    walker.walk_children(None, doc);
    Ok(walker.finish())
}

/// Parse `swift package show-dependencies --format json` output.
pub fn parse_swift_tree(doc: &Value) -> (RelationTree, Vec<NodeRef<'_>>) {
    let mut walker = NestedWalker::new(Ecosystem::Swift, SWIFT_SHAPE);
    walker.walk_root(doc);
    walker.finish()
}

static CARGO_ID_NEW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*#(\S*)@(\S*)").expect("static regex"));
static CARGO_ID_OLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S*)\s(\S*)\s").expect("static regex"));

/// Map a `cargo metadata` package id to a key, for ids missing from `packages`.
pub fn cargo_id_to_key(id: &str) -> Option<PackageKey> {
    if let Some(c) = CARGO_ID_NEW.captures(id) {
        return Some(PackageKey::new(&c[1], &c[2]));
    }
    CARGO_ID_OLD
        .captures(id)
        .map(|c| PackageKey::new(&c[1], &c[2]))
}

/// Edges from the `resolve.nodes` adjacency list of `cargo metadata`.
///
/// Dev-only dependencies are dropped. The resolve root, or every workspace
/// member of a virtual workspace, contributes the direct set.
pub fn parse_cargo_resolve(doc: &Value) -> ScanResult<RelationTree> {
    let packages = doc
        .get("packages")
        .and_then(Value::as_array)
        .ok_or_else(|| ScanError::parse("cargo metadata", "missing `packages`"))?;

    let mut ids: HashMap<&str, PackageKey> = HashMap::new();
    for pkg in packages {
        let (Some(id), Some(name), Some(version)) = (
            pkg.get("id").and_then(Value::as_str),
            pkg.get("name").and_then(Value::as_str),
            pkg.get("version").and_then(Value::as_str),
        ) else {
            continue;
        };
        ids.insert(id, PackageKey::new(name, version));
    }
    let key_of = |id: &str| ids.get(id).cloned().or_else(|| cargo_id_to_key(id));

    let mut tree = RelationTree::new();
    let Some(resolve) = doc.get("resolve").filter(|r| !r.is_null()) else {
        warn!("cargo metadata has no resolve graph");
        return Ok(tree);
    };

    let root_id = resolve.get("root").and_then(Value::as_str);
    let members: Vec<&str> = doc
        .get("workspace_members")
        .and_then(Value::as_array)
        .map(|m| m.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let direct_parents: Vec<&str> = match root_id {
        Some(root) => vec![root],
        None => members.clone(),
    };

    if let Some(root) = root_id.and_then(key_of) {
        tree.set_root(root);
    }

    let nodes = resolve
        .get("nodes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for node in nodes {
        let Some(id) = node.get("id").and_then(Value::as_str) else {
            continue;
        };
        let Some(parent) = key_of(id) else {
            warn!(id, "cannot map cargo package id");
            continue;
        };
        tree.record(&parent);

        for dep_id in non_dev_dependencies(node) {
            let Some(child) = key_of(dep_id) else {
                warn!(id = dep_id, "cannot map cargo dependency id");
                continue;
            };
            tree.add_edge(&parent, &child);
            if direct_parents.contains(&id) {
                tree.mark_direct(&child);
            }
        }
    }

    Ok(tree)
}

fn non_dev_dependencies(node: &Value) -> Vec<&str> {
    match node.get("deps").and_then(Value::as_array) {
        Some(deps) => deps
            .iter()
            .filter(|dep| {
                let kinds = dep
                    .get("dep_kinds")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                kinds.is_empty()
                    || kinds
                        .iter()
                        .any(|k| k.get("kind").and_then(Value::as_str) != Some("dev"))
            })
            .filter_map(|dep| dep.get("pkg").and_then(Value::as_str))
            .collect(),
        None => node
            .get("dependencies")
            .and_then(Value::as_array)
            .map(|d| d.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(name: &str, version: &str) -> PackageKey {
        PackageKey::new(name, version)
    }

    #[test]
    fn test_npm_minimal_root() {
        let doc = json!({
            "name": "r",
            "version": "1.0.0",
            "dependencies": {"x": {"version": "2.0.0", "dependencies": {}}}
        });
        let (tree, nodes) = parse_npm_tree(Ecosystem::Npm, &doc);
        assert_eq!(tree.dependencies_of(&key("r", "1.0.0")), &[key("x", "2.0.0")]);
        assert_eq!(tree.root(), Some(&key("r", "1.0.0")));
        assert_eq!(tree.direct(), &[key("x", "2.0.0")]);
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_npm_skips_placeholders_and_keeps_diamonds() {
        let doc = json!({
            "name": "app",
            "version": "0.0.1",
            "dependencies": {
                "a": {"version": "1.0.0", "dependencies": {"shared": {"version": "3.0.0"}}},
                "b": {"version": "1.0.0", "dependencies": {
                    "shared": {"version": "3.0.0"},
                    "peer": {"required": "^2", "peerMissing": true},
                    "gone": {"required": "^1", "missing": true},
                    "empty": {}
                }},
                "nover": {"resolved": "file:../x"}
            }
        });
        let (tree, nodes) = parse_npm_tree(Ecosystem::Npm, &doc);
        assert_eq!(tree.dependencies_of(&key("a", "1.0.0")), &[key("shared", "3.0.0")]);
        assert_eq!(tree.dependencies_of(&key("b", "1.0.0")), &[key("shared", "3.0.0")]);
        assert_eq!(tree.occurrences(&key("shared", "3.0.0")), 2);
        assert_eq!(nodes.len(), 4);
        assert_eq!(tree.direct().len(), 2);
    }

    #[test]
    fn test_walk_is_deterministic() {
        let doc = json!({
            "name": "app", "version": "1.0.0",
            "dependencies": {
                "a": {"version": "1.0.0", "dependencies": {"c": {"version": "1.0.0"}}},
                "b": {"version": "2.0.0", "dependencies": {"c": {"version": "1.0.0"}}}
            }
        });
        let (first, _) = parse_npm_tree(Ecosystem::Npm, &doc);
        let (second, _) = parse_npm_tree(Ecosystem::Npm, &doc);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_document() {
        let empty = json!({});
        let (tree, nodes) = parse_npm_tree(Ecosystem::Npm, &empty);
        assert!(tree.is_empty());
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_pnpm_projects_are_not_nodes() {
        let doc = json!([
            {"name": "web", "version": "1.0.0", "private": true, "dependencies": {
                "react": {"from": "react", "version": "18.2.0", "dependencies": {
                    "loose-envify": {"from": "loose-envify", "version": "1.4.0"}
                }}
            }},
            {"name": "api", "version": "1.0.0", "dependencies": {
                "react": {"from": "react", "version": "18.2.0"}
            }}
        ]);
        let (tree, nodes) = parse_pnpm_tree(&doc).unwrap();
        assert_eq!(tree.root(), None);
        assert_eq!(tree.direct(), &[key("react", "18.2.0")]);
        assert_eq!(
            tree.dependencies_of(&key("react", "18.2.0")),
            &[key("loose-envify", "1.4.0")]
        );
        assert!(nodes.iter().all(|n| n.name != "web" && n.name != "api"));
        assert!(parse_pnpm_tree(&json!({})).is_err());
    }

    #[test]
    fn test_pipdeptree() {
        let doc = json!([
            {"key": "requests", "package_name": "Requests", "installed_version": "2.31.0",
             "dependencies": [
                {"key": "idna", "package_name": "idna", "installed_version": "3.4",
                 "required_version": ">=2.5", "dependencies": []},
                {"key": "charset-normalizer", "package_name": "charset_normalizer",
                 "installed_version": "3.2.0", "dependencies": []}
             ]}
        ]);
        let (tree, nodes) = parse_pipdeptree(&doc).unwrap();
        assert_eq!(tree.direct(), &[key("requests", "2.31.0")]);
        assert_eq!(
            tree.dependencies_of(&key("requests", "2.31.0")),
            &[key("idna", "3.4"), key("charset-normalizer", "3.2.0")]
        );
        assert_eq!(nodes[0].name, "Requests");
    }

    #[test]
    fn test_swift_tree() {
        let doc = json!({
            "identity": "myapp", "name": "MyApp", "version": "unspecified",
            "dependencies": [
                {"identity": "alamofire", "name": "Alamofire", "version": "5.6.4",
                 "url": "https://github.com/Alamofire/Alamofire.git", "dependencies": []}
            ]
        });
        let (tree, _) = parse_swift_tree(&doc);
        assert_eq!(tree.root(), Some(&key("myapp", "unspecified")));
        assert_eq!(tree.direct(), &[key("alamofire", "5.6.4")]);
    }

    #[test]
    fn test_cargo_resolve() {
        let doc = json!({
            "packages": [
                {"name": "app", "version": "0.1.0", "id": "path+file:///w/app#0.1.0"},
                {"name": "serde", "version": "1.0.150",
                 "id": "registry+https://github.com/rust-lang/crates.io-index#serde@1.0.150"},
                {"name": "tempfile", "version": "3.8.0",
                 "id": "registry+https://github.com/rust-lang/crates.io-index#tempfile@3.8.0"}
            ],
            "workspace_members": ["path+file:///w/app#0.1.0"],
            "resolve": {
                "root": "path+file:///w/app#0.1.0",
                "nodes": [
                    {"id": "path+file:///w/app#0.1.0",
                     "dependencies": [],
                     "deps": [
                        {"name": "serde", "pkg": "registry+https://github.com/rust-lang/crates.io-index#serde@1.0.150",
                         "dep_kinds": [{"kind": null, "target": null}]},
                        {"name": "tempfile", "pkg": "registry+https://github.com/rust-lang/crates.io-index#tempfile@3.8.0",
                         "dep_kinds": [{"kind": "dev", "target": null}]}
                     ]},
                    {"id": "registry+https://github.com/rust-lang/crates.io-index#serde@1.0.150",
                     "dependencies": [], "deps": []}
                ]
            }
        });
        let tree = parse_cargo_resolve(&doc).unwrap();
        assert_eq!(tree.root(), Some(&key("app", "0.1.0")));
        assert_eq!(tree.dependencies_of(&key("app", "0.1.0")), &[key("serde", "1.0.150")]);
        assert_eq!(tree.direct(), &[key("serde", "1.0.150")]);
    }

    #[test]
    fn test_cargo_id_fallback() {
        assert_eq!(
            cargo_id_to_key("registry+https://github.com/rust-lang/crates.io-index#libc@0.2.147"),
            Some(key("libc", "0.2.147"))
        );
        assert_eq!(
            cargo_id_to_key("libc 0.2.147 (registry+https://github.com/rust-lang/crates.io-index)"),
            Some(key("libc", "0.2.147"))
        );
        assert_eq!(cargo_id_to_key("garbage"), None);
    }
}
