use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{normalize_repository_url, Analyzer, ScanContext};
use crate::error::{ScanError, ScanResult};
use crate::graph::{assemble, PackageEntry};
use crate::license::DeclaredLicense;
use crate::models::{DependencyItem, Ecosystem, OssItem};
use crate::parser::json_tree::{parse_npm_tree, parse_pnpm_tree, NodeRef};
use crate::runner::CleanupGuard;

const NPM_PACKAGE_URL: &str = "https://www.npmjs.com/package/";

/// npm, yarn and pnpm projects.
pub struct NodeAnalyzer {
    ecosystem: Ecosystem,
}

impl NodeAnalyzer {
    pub fn new(ecosystem: Ecosystem) -> Self {
        Self { ecosystem }
    }

    fn install_args(&self) -> (&'static str, &'static [&'static str]) {
        match self.ecosystem {
            Ecosystem::Yarn => ("yarn", &["install", "--production"][..]),
            Ecosystem::Pnpm => ("pnpm", &["install", "-P"][..]),
            _ => ("npm", &["install", "--omit=dev"][..]),
        }
    }

    fn ls_args(&self) -> (&'static str, &'static [&'static str]) {
        match self.ecosystem {
            Ecosystem::Pnpm => (
                "pnpm",
                &["ls", "--json", "-r", "--depth", "Infinity", "-P", "--long"][..],
            ),
            _ => ("npm", &["ls", "--json", "--all", "--long", "--omit=dev"][..]),
        }
    }
}

#[async_trait]
impl Analyzer for NodeAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        self.ecosystem
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let manifest = ctx.root.join("package.json");
        if !manifest.is_file() {
            return Err(ScanError::ManifestMissing { path: manifest });
        }

        let mut guard = CleanupGuard::new();
        if guard.track_if_absent(ctx.root.join("node_modules")) {
            let (tool, args) = self.install_args();
            info!(ecosystem = %self.ecosystem, "node_modules missing; installing production dependencies");
            ctx.runner.command(tool, &ctx.root).args(args.iter().copied()).run().await?;
        }

        let (tool, args) = self.ls_args();
        let output = ctx
            .runner
            .command(tool, &ctx.root)
            .args(args.iter().copied())
            .capture()
            .await?;
        let doc: Value =
            serde_json::from_str(&output).map_err(|e| ScanError::parse(format!("{tool} ls output"), e))?;

        build_items(self.ecosystem, &doc, &ctx.root, ctx.classify)
    }
}

/// Turn an `npm ls` / `pnpm ls` document into dependency items.
pub fn build_items(
    ecosystem: Ecosystem,
    doc: &Value,
    project: &Path,
    classify: bool,
) -> ScanResult<Vec<DependencyItem>> {
    let (tree, nodes) = match ecosystem {
        Ecosystem::Pnpm => parse_pnpm_tree(doc)?,
        _ => parse_npm_tree(ecosystem, doc),
    };
    debug!(%ecosystem, packages = nodes.len(), edges = tree.edge_count(), "parsed tree");

    let entries = nodes
        .iter()
        .map(|node| package_entry(ecosystem, node, project))
        .collect();
    Ok(assemble(ecosystem, entries, &tree, classify))
}

/// Metadata of one package, from the `--long` tree node or its installed
/// `package.json`.
///
/// npm and yarn put the repository in `homepage` and the registry version page
/// in `download_location`; pnpm does the reverse.
fn package_entry(ecosystem: Ecosystem, node: &NodeRef<'_>, project: &Path) -> PackageEntry {
    let installed = installed_manifest(node, project);
    let field = |name: &str| {
        node.value
            .get(name)
            .filter(|v| !v.is_null())
            .or_else(|| installed.as_ref().and_then(|m| m.get(name)))
    };

    let license = field("license")
        .or_else(|| field("licenses"))
        .map(DeclaredLicense::from_value)
        .unwrap_or_default();
    let repository = field("repository")
        .and_then(|r| r.as_str().or_else(|| r.get("url").and_then(Value::as_str)))
        .map(normalize_repository_url)
        .filter(|r| !r.is_empty());
    let private = field("private").and_then(Value::as_bool).unwrap_or(false);
    let resolved = node
        .value
        .get("resolved")
        .and_then(Value::as_str)
        .unwrap_or("");

    let registry_url = format!("{NPM_PACKAGE_URL}{}", node.name);
    let version_url = format!("{registry_url}/v/{}", node.version);

    let mut item = OssItem::new(&node.name, &node.version);
    item.license = license.license;
    let mut caveats: Vec<String> = Vec::new();
    if private {
        item.homepage = repository.unwrap_or_default();
        item.download_location = item.homepage.clone();
        caveats.push("private".to_string());
    } else if ecosystem == Ecosystem::Pnpm {
        item.homepage = registry_url;
        item.download_location = repository.unwrap_or_else(|| version_url.clone());
    } else {
        item.homepage = repository.unwrap_or(registry_url);
        item.download_location = version_url.clone();
    }
    caveats.extend(license.caveat);
    item.comment = caveats.join(", ");

    PackageEntry::new(node.key.clone(), item)
        .with_url(version_url)
        .local(resolved.starts_with("file:") || resolved.starts_with("link:"))
}

fn installed_manifest(node: &NodeRef<'_>, project: &Path) -> Option<Value> {
    let dir: PathBuf = match node.value.get("path").and_then(Value::as_str) {
        Some(path) => PathBuf::from(path),
        None => project.join("node_modules").join(&node.name),
    };
    let content = std::fs::read_to_string(dir.join("package.json")).ok()?;
    serde_json::from_str(&content).ok()
}
