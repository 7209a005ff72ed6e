//! Line-oriented `parent child` edge lists (`go mod graph`).

use tracing::{debug, warn};

use crate::graph::{PackageKey, RelationTree};
use crate::models::Ecosystem;

/// Requirements on the toolchain itself, not on modules.
const PSEUDO_MODULES: [&str; 2] = ["go", "toolchain"];

fn split_module(token: &str) -> (&str, Option<&str>) {
    match token.split_once('@') {
        Some((path, version)) => (path, Some(version)),
        None => (token, None),
    }
}

/// Parse `go mod graph` output.
///
/// A left side without `@version` is the main module: it becomes the root
/// and its requirements the direct set. Versions lose their leading `v`.
pub fn parse_go_graph(text: &str) -> RelationTree {
    let mut tree = RelationTree::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(left), Some(right), None) = (fields.next(), fields.next(), fields.next()) else {
            warn!(line = line_no + 1, content = line, "skipping malformed graph line");
            continue;
        };

        let (parent_path, parent_version) = split_module(left);
        let (child_path, child_version) = split_module(right);
        if PSEUDO_MODULES.contains(&child_path) || PSEUDO_MODULES.contains(&parent_path) {
            continue;
        }
        let Some(child_version) = child_version else {
            debug!(line = line_no + 1, module = child_path, "requirement without version");
            continue;
        };

        let child = PackageKey::for_ecosystem(Ecosystem::Go, child_path, child_version);
        match parent_version {
            Some(version) => {
                let parent = PackageKey::for_ecosystem(Ecosystem::Go, parent_path, version);
                tree.add_edge(&parent, &child);
            }
            None => {
                let parent = PackageKey::for_ecosystem(Ecosystem::Go, parent_path, "");
                if tree.root().is_none() {
                    tree.set_root(parent.clone());
                }
                tree.add_edge(&parent, &child);
                tree.mark_direct(&child);
            }
        }
    }

    tree
}
