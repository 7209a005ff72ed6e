use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{normalize_repository_url, Analyzer, ScanContext};
use crate::error::{read_to_string, ScanError, ScanResult};
use crate::graph::{assemble, PackageEntry, PackageKey, RelationTree};
use crate::license::spdx::detect_from_text;
use crate::models::{DependencyItem, Ecosystem, OssItem};

const MIRROR_URL: &str = "https://github.com/needle-mirror/";
const UNITY_INTERNAL_URL: &str = "https://github.cds.internal.unity3d.com";
const PROPRIETARY: &str = "Proprietary License";

/// One entry of `Packages/packages-lock.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct LockedPackage {
    pub version: String,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
}

/// Parse `Packages/packages-lock.json`; packages come back in name order.
pub fn parse_packages_lock(text: &str) -> ScanResult<Vec<(String, LockedPackage)>> {
    let doc: Value =
        serde_json::from_str(text).map_err(|e| ScanError::parse("packages-lock.json", e))?;
    let deps = doc
        .get("dependencies")
        .and_then(Value::as_object)
        .ok_or_else(|| ScanError::parse("packages-lock.json", "missing `dependencies`"))?;
    let mut packages = Vec::with_capacity(deps.len());
    for (name, entry) in deps {
        let pkg: LockedPackage = serde_json::from_value(entry.clone())
            .map_err(|e| ScanError::parse(format!("packages-lock.json entry {name}"), e))?;
        packages.push((name.clone(), pkg));
    }
    Ok(packages)
}

pub struct UnityAnalyzer;

impl UnityAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for UnityAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Unity
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let lock_path = ctx.root.join("Packages").join("packages-lock.json");
        if !lock_path.is_file() {
            return Err(ScanError::ManifestMissing { path: lock_path });
        }
        let packages = parse_packages_lock(&read_to_string(&lock_path)?)?;
        let cache = ctx.root.join("Library").join("PackageCache");
        Ok(build_items(&packages, &cache, ctx.classify))
    }
}

/// Package-level edges pinned to the locked versions; `depth == 0` is direct.
pub fn build_tree(packages: &[(String, LockedPackage)]) -> RelationTree {
    let locked: HashMap<String, String> = packages
        .iter()
        .map(|(name, pkg)| (name.clone(), pkg.version.clone()))
        .collect();

    let mut tree = RelationTree::new();
    for (name, pkg) in packages {
        let key = PackageKey::new(name, &pkg.version);
        tree.record(&key);
        if pkg.depth == 0 {
            tree.mark_direct(&key);
        }
        let mut children: Vec<(&String, &String)> = pkg.dependencies.iter().collect();
        children.sort();
        for (child, range) in children {
            tree.add_edge(&key, &PackageKey::new(child, range));
        }
    }
    tree.pin_versions(&locked);
    tree
}

pub fn build_items(
    packages: &[(String, LockedPackage)],
    cache: &Path,
    classify: bool,
) -> Vec<DependencyItem> {
    let tree = build_tree(packages);
    let entries = packages
        .iter()
        .map(|(name, pkg)| {
            let dir = cache.join(format!("{name}@{}", pkg.version));
            let license = cached_license(&dir);
            let repository = cached_repository(&dir);

            let homepage = match repository {
                Some(url) if !url.starts_with(UNITY_INTERNAL_URL) => url,
                _ if license != PROPRIETARY => format!("{MIRROR_URL}{name}"),
                _ => String::new(),
            };

            let mut item = OssItem::new(name, &pkg.version);
            item.license = license;
            item.homepage = homepage.clone();
            item.download_location = homepage.clone();
            PackageEntry::new(PackageKey::new(name, &pkg.version), item)
                .with_url(homepage)
                .local(pkg.source == "embedded" || pkg.source == "local")
        })
        .collect();
    assemble(Ecosystem::Unity, entries, &tree, classify)
}

/// License of a cached package from its `LICENSE.md`. Packages shipped
/// without one are proprietary Unity packages.
fn cached_license(dir: &Path) -> String {
    match std::fs::read_to_string(dir.join("LICENSE.md")) {
        Ok(text) => detect_from_text(&text).unwrap_or_default(),
        Err(_) => {
            debug!(dir = %dir.display(), "no LICENSE.md in package cache");
            PROPRIETARY.to_string()
        }
    }
}

fn cached_repository(dir: &Path) -> Option<String> {
    let content = std::fs::read_to_string(dir.join("package.json")).ok()?;
    let manifest: Value = serde_json::from_str(&content).ok()?;
    let repo = manifest.get("repository")?;
    repo.as_str()
        .or_else(|| repo.get("url").and_then(Value::as_str))
        .map(normalize_repository_url)
        .filter(|u| !u.is_empty())
}
