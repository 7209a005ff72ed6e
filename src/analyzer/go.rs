use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{license_in_dir, Analyzer, ScanContext};
use crate::error::{ScanError, ScanResult};
use crate::graph::{assemble, PackageEntry, PackageKey, RelationTree};
use crate::models::{DependencyItem, Ecosystem, OssItem};
use crate::parser::edge_list::parse_go_graph;

const GO_PACKAGE_URL: &str = "https://pkg.go.dev/";

/// One object of the `go list -m -json all` stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GoModule {
    pub path: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub main: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub replace: Option<Box<GoModule>>,
}

impl GoModule {
    /// Path and version actually built, after `replace` directives.
    fn effective(&self) -> (&str, &str) {
        match &self.replace {
            Some(r) if !r.version.is_empty() => (&r.path, &r.version),
            _ => (&self.path, &self.version),
        }
    }
}

pub struct GoAnalyzer;

impl GoAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for GoAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Go
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let go_mod = ctx.root.join("go.mod");
        if !go_mod.is_file() {
            return Err(ScanError::ManifestMissing { path: go_mod });
        }

        let listing = ctx
            .runner
            .command("go", &ctx.root)
            .args(["list", "-m", "-json", "all"])
            .capture()
            .await?;
        let modules = parse_module_stream(&listing)?;

        let graph = ctx
            .runner
            .command("go", &ctx.root)
            .args(["mod", "graph"])
            .capture()
            .await;
        let (tree, classify) = match graph {
            Ok(text) => (parse_go_graph(&text), ctx.classify),
            Err(e) => {
                warn!(error = %e, "no module graph; reporting without classification");
                (RelationTree::new(), false)
            }
        };

        Ok(build_items(&modules, tree, classify))
    }
}

/// `go list -m -json` prints concatenated objects rather than an array.
pub fn parse_module_stream(text: &str) -> ScanResult<Vec<GoModule>> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<GoModule>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ScanError::parse("go list output", e))
}

/// Join the module listing with the `go mod graph` tree.
///
/// The graph names every version a module requires; edges are pinned to the
/// versions the build list selected. The main module is not reported. A graph
/// without a single edge (only warnings on stdout) disables classification.
pub fn build_items(modules: &[GoModule], mut tree: RelationTree, classify: bool) -> Vec<DependencyItem> {
    let classify = if classify && tree.is_empty() {
        warn!("module graph has no edges; reporting without classification");
        false
    } else {
        classify
    };
    let selected: HashMap<String, String> = modules
        .iter()
        .filter(|m| !m.main && !m.version.is_empty())
        .map(|m| {
            let key = PackageKey::for_ecosystem(Ecosystem::Go, &m.path, &m.version);
            (key.name().to_string(), key.version().to_string())
        })
        .collect();
    tree.pin_versions(&selected);

    let entries = modules
        .iter()
        .filter(|m| {
            if m.main {
                debug!(module = %m.path, "skipping main module");
            }
            !m.main
        })
        .map(|m| {
            let key = PackageKey::for_ecosystem(Ecosystem::Go, &m.path, &m.version);
            let (path, version) = m.effective();
            let homepage = format!("{GO_PACKAGE_URL}{path}@{version}");

            let mut item = OssItem::new(&m.path, key.version());
            item.homepage = homepage.clone();
            item.download_location = homepage.clone();
            if let Some(license) = m.dir.as_deref().and_then(license_in_dir) {
                item.license = license;
            }
            if m.replace.is_some() {
                item.comment = format!("replaced by {path}");
            }
            PackageEntry::new(key, item).with_url(homepage)
        })
        .collect();

    assemble(Ecosystem::Go, entries, &tree, classify)
}
