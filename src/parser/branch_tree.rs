//! Text trees drawn with `|`, `+---` / `\---` (gradle) and `+-` / `\-` (maven).

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::graph::{PackageKey, RelationTree};
use crate::models::Ecosystem;

// `+--- group:artifact:1.0`, `\--- group:artifact:1.0 -> 1.1 (*)`, `+--- group:artifact -> 1.1`
static GRADLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([+\\])---\s([^:\s]+):([^:\s]+)(?::([^:\s]+))?(?:\s+->\s+([^:\s]+))?")
        .expect("static regex")
});

// `+- group:artifact:type[:classifier]:version:scope`
static MAVEN_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([+\\])-\s([^:\s]+):([^:\s]+):((?:[^:\s]+:){2,3}[^:\s]+)").expect("static regex")
});

// first tree line: `group:artifact:type:version` with no branch glyph
static MAVEN_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:\s\[]+):([^:\s]+):([^:\s]+):([^:\s]+)\s*$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepthState {
    Normal,
    /// A `\` branch was followed by a node at the same visual depth: the
    /// renderer dropped a `|`, so every node is one level deeper than drawn.
    Continuing,
}

/// Converts the number of `|` glyphs on a line into the node's real depth.
///
/// The ASCII renderers stop drawing a `|` column once the last child of a
/// subtree (`\`) has been printed, so nodes under a last child appear one
/// level shallower than they are.
#[derive(Debug, Clone)]
pub struct DepthTracker {
    state: DepthState,
    prev_marker: Option<char>,
    depth: isize,
}

impl Default for DepthTracker {
    fn default() -> Self {
        DepthTracker {
            state: DepthState::Normal,
            prev_marker: None,
            depth: -1,
        }
    }
}

impl DepthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. `pipes` is the `|` count, `marker` the branch glyph when
    /// the line holds a node. Returns the effective depth for node lines.
    pub fn observe(&mut self, pipes: usize, marker: Option<char>) -> Option<usize> {
        let prev_marker = self.prev_marker;
        let prev_depth = self.depth;
        self.depth = pipes as isize;

        let Some(marker) = marker else {
            self.prev_marker = None;
            return None;
        };
        self.prev_marker = Some(marker);

        let after_last_child = prev_marker == Some('\\');
        match self.state {
            DepthState::Normal if after_last_child && prev_depth == self.depth => {
                self.state = DepthState::Continuing;
            }
            DepthState::Continuing if after_last_child && prev_depth != self.depth => {
                self.state = DepthState::Normal;
            }
            _ => {}
        }
        if self.state == DepthState::Continuing {
            self.depth += 1;
        }
        Some(self.depth as usize)
    }
}

/// Depth-indexed ancestor stack.
#[derive(Debug, Default)]
struct AncestorStack(Vec<PackageKey>);

impl AncestorStack {
    /// Place `key` at `depth` and return its parent, if any.
    fn place(&mut self, depth: usize, key: PackageKey) -> Option<PackageKey> {
        self.0.truncate(depth);
        let parent = self.0.last().cloned();
        self.0.push(key);
        parent
    }
}

fn attach(tree: &mut RelationTree, parent: Option<PackageKey>, child: &PackageKey) {
    match parent {
        Some(parent) => {
            tree.add_edge(&parent, child);
        }
        None => tree.add_direct(child),
    }
}

/// Parse `gradle dependencies` style output.
///
/// Only blocks opened by a header naming one of `configurations` are read; a
/// blank line closes the block. Each block is parsed on its own and merged,
/// so subprojects sharing a subtree contribute each edge once.
pub fn parse_gradle_tree(ecosystem: Ecosystem, text: &str, configurations: &[String]) -> RelationTree {
    let mut tree = RelationTree::new();
    let mut block: Option<RelationTree> = None;
    let mut tracker = DepthTracker::new();
    let mut stack = AncestorStack::default();

    for (line_no, line) in text.lines().enumerate() {
        let Some(current) = block.as_mut() else {
            if configurations.iter().any(|c| is_configuration_header(line, c)) {
                debug!(line = line_no + 1, header = line, "entering configuration");
                block = Some(RelationTree::new());
                tracker = DepthTracker::new();
                stack = AncestorStack::default();
            }
            continue;
        };
        if line.trim().is_empty() {
            tree.merge(current);
            block = None;
            continue;
        }

        let pipes = line.matches('|').count();
        let caps = GRADLE_LINE.captures(line);
        let node = caps.as_ref().and_then(|c| {
            let version = c.get(5).or_else(|| c.get(4))?.as_str();
            Some((c[1].chars().next()?, format!("{}:{}", &c[2], &c[3]), version.to_string()))
        });

        let Some(depth) = tracker.observe(pipes, node.as_ref().map(|n| n.0)) else {
            if !line.contains("project ") && !line.starts_with("No dependencies") {
                warn!(line = line_no + 1, content = line, "skipping unrecognized tree line");
            }
            continue;
        };
        let Some((_, name, version)) = node else {
            continue;
        };

        let key = PackageKey::for_ecosystem(ecosystem, &name, &version);
        let parent = stack.place(depth, key.clone());
        attach(current, parent, &key);
    }
    if let Some(current) = block {
        tree.merge(&current);
    }

    tree
}

fn is_configuration_header(line: &str, configuration: &str) -> bool {
    line.strip_prefix(configuration)
        .map(|rest| rest.starts_with(" -") || rest.starts_with("\t-"))
        .unwrap_or(false)
}

/// Parse `mvn dependency:tree` output, with or without the `[INFO] ` prefix.
///
/// The first branchless coordinate line becomes the root. `test` scoped nodes
/// are skipped but still advance the depth tracker.
pub fn parse_maven_tree(text: &str) -> RelationTree {
    let mut tree = RelationTree::new();
    let mut tracker = DepthTracker::new();
    let mut stack = AncestorStack::default();

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw
            .strip_prefix("[INFO] ")
            .or_else(|| raw.strip_prefix("[INFO]"))
            .unwrap_or(raw);
        if line.trim().is_empty() || raw.starts_with("[WARNING]") || raw.starts_with("[ERROR]") {
            continue;
        }

        if tree.root().is_none() {
            if let Some(c) = MAVEN_ROOT.captures(line.trim_end()) {
                let key = PackageKey::for_ecosystem(
                    Ecosystem::Maven,
                    &format!("{}:{}", &c[1], &c[2]),
                    &c[4],
                );
                debug!(root = %key, "maven root");
                tree.set_root(key);
                continue;
            }
        }

        let pipes = line.matches('|').count();
        let node = MAVEN_LINE.captures(line).and_then(|c| {
            let fields: Vec<&str> = c[4].split(':').collect();
            // type:version:scope or type:classifier:version:scope
            let (version, scope) = match fields.as_slice() {
                [_, version, scope] | [_, _, version, scope] => (*version, *scope),
                _ => return None,
            };
            Some((
                c[1].chars().next()?,
                format!("{}:{}", &c[2], &c[3]),
                version.to_string(),
                scope.to_string(),
            ))
        });

        let Some(depth) = tracker.observe(pipes, node.as_ref().map(|n| n.0)) else {
            continue;
        };
        let Some((_, name, version, scope)) = node else {
            continue;
        };
        if scope == "test" {
            debug!(line = line_no + 1, package = %name, "skipping test scope");
            continue;
        }

        let key = PackageKey::for_ecosystem(Ecosystem::Maven, &name, &version);
        let parent = stack.place(depth, key.clone());
        attach(&mut tree, parent, &key);
    }

    tree
}
