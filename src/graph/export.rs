use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::models::DependencyItem;

const DEPENDS_ON: &str = "depends_on";

/// Directed graph of purls, one edge per `depends_on` entry.
pub struct DependencyGraph {
    graph: DiGraph<String, &'static str>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a DependencyItem>) -> Self {
        let mut graph = DependencyGraph {
            graph: DiGraph::new(),
            nodes: HashMap::new(),
        };
        for item in items {
            let from = graph.node(&item.purl);
            for target in &item.depends_on {
                let to = graph.node(target);
                if graph.graph.find_edge(from, to).is_none() {
                    graph.graph.add_edge(from, to, DEPENDS_ON);
                }
            }
        }
        graph
    }

    fn node(&mut self, purl: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(purl) {
            return idx;
        }
        let idx = self.graph.add_node(purl.to_string());
        self.nodes.insert(purl.to_string(), idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn to_dot(&self) -> String {
        Dot::with_config(&self.graph, &[Config::EdgeNoLabel]).to_string()
    }

    /// Write the graph as Graphviz DOT.
    pub fn write_dot(&self, path: &Path) -> Result<()> {
        debug!(
            nodes = self.node_count(),
            edges = self.edge_count(),
            path = %path.display(),
            "writing dependency graph"
        );
        std::fs::write(path, self.to_dot())
            .with_context(|| format!("failed to write graph to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::key::PackageKey;
    use crate::models::{Classification, Ecosystem, OssItem};

    fn item(purl: &str, depends_on: &[&str]) -> DependencyItem {
        DependencyItem {
            ecosystem: Ecosystem::Npm,
            key: PackageKey::new(purl, ""),
            oss_items: vec![OssItem::new(purl, "")],
            purl: purl.to_string(),
            depends_on_raw: Vec::new(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            classification: Some(Classification::Direct),
        }
    }

    #[test]
    fn test_graph_shape() {
        let items = vec![
            item("pkg:npm/a@1.0.0", &["pkg:npm/b@1.0.0", "pkg:npm/c@1.0.0"]),
            item("pkg:npm/b@1.0.0", &["pkg:npm/c@1.0.0"]),
            item("pkg:npm/c@1.0.0", &[]),
        ];
        let graph = DependencyGraph::from_items(&items);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_dot_output() {
        let items = vec![item("pkg:npm/a@1.0.0", &["pkg:npm/b@1.0.0"])];
        let dot = DependencyGraph::from_items(&items).to_dot();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("pkg:npm/a@1.0.0"));
        assert!(dot.contains("0 -> 1"));
    }

    #[test]
    fn test_write_dot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deps.dot");
        let items = vec![item("pkg:npm/a@1.0.0", &[])];
        DependencyGraph::from_items(&items).write_dot(&path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("pkg:npm/a@1.0.0"));
    }
}
