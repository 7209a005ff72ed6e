use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{license_in_dir, normalize_repository_url, Analyzer, ScanContext};
use crate::error::{read_to_string, ScanError, ScanResult};
use crate::graph::{assemble, PackageEntry, PackageKey};
use crate::models::{DependencyItem, Ecosystem, OssItem};
use crate::parser::manifest::{parse_pub_deps, PubDeps, PubPackage};
use crate::runner::CleanupGuard;

const PUB_URL: &str = "https://pub.dev/packages/";

/// Dart and Flutter packages through `pub deps --json`.
pub struct PubAnalyzer;

impl PubAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

/// Flutter projects depend on the `flutter` SDK package.
fn pub_tool(pubspec: &str) -> &'static str {
    let flutter = serde_yaml::from_str::<serde_yaml::Value>(pubspec)
        .ok()
        .and_then(|doc| doc.get("dependencies").cloned())
        .and_then(|deps| deps.get("flutter").cloned())
        .is_some();
    if flutter {
        "flutter"
    } else {
        "dart"
    }
}

fn pub_cache() -> Option<PathBuf> {
    std::env::var_os("PUB_CACHE")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".pub-cache")))
}

#[async_trait]
impl Analyzer for PubAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pub
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let pubspec_path = ctx.root.join("pubspec.yaml");
        if !pubspec_path.is_file() {
            return Err(ScanError::ManifestMissing { path: pubspec_path });
        }
        let tool = pub_tool(&read_to_string(&pubspec_path)?);

        let mut guard = CleanupGuard::new();
        if guard.track_if_absent(ctx.root.join("pubspec.lock")) {
            guard.track_if_absent(ctx.root.join(".dart_tool"));
            info!(tool, "pubspec.lock missing; resolving dependencies");
            ctx.runner
                .command(tool, &ctx.root)
                .args(["pub", "get"])
                .run()
                .await?;
        }

        let output = ctx
            .runner
            .command(tool, &ctx.root)
            .args(["pub", "deps", "--json"])
            .capture()
            .await?;
        let doc: Value =
            serde_json::from_str(&output).map_err(|e| ScanError::parse("pub deps output", e))?;
        let deps = parse_pub_deps(&doc)?;

        let hosted = pub_cache().map(|c| c.join("hosted").join("pub.dev"));
        Ok(build_items(&deps, hosted.as_deref(), ctx.classify))
    }
}

/// Rows for `pub deps`. Dev dependencies are kept but flagged `exclude`.
pub fn build_items(deps: &PubDeps, hosted: Option<&Path>, classify: bool) -> Vec<DependencyItem> {
    let entries = deps
        .packages
        .iter()
        .map(|pkg| {
            let key = PackageKey::new(&pkg.name, &pkg.version);
            let cached = hosted.map(|h| h.join(format!("{}-{}", pkg.name, pkg.version)));
            let pubspec = cached.as_deref().and_then(cached_pubspec);
            let field = |name: &str| {
                pubspec
                    .as_ref()
                    .and_then(|p| p.get(name))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            };

            let package_url = format!("{PUB_URL}{}", pkg.name);
            let version_url = format!("{package_url}/versions/{}", pkg.version);

            let mut item = OssItem::new(&pkg.name, &pkg.version);
            item.exclude = pkg.kind == "dev";
            item.homepage = field("homepage")
                .or_else(|| field("repository").map(|r| normalize_repository_url(&r)))
                .unwrap_or_else(|| package_url.clone());
            item.download_location = if pkg.source == "hosted" {
                version_url.clone()
            } else {
                item.homepage.clone()
            };
            if let Some(license) = cached.as_deref().and_then(license_in_dir) {
                item.license = license;
            }
            item.comment = source_caveat(pkg).unwrap_or_default();

            let entry = PackageEntry::new(key, item).local(pkg.source == "path");
            if pkg.source == "hosted" {
                entry.with_url(version_url)
            } else {
                entry
            }
        })
        .collect();
    assemble(Ecosystem::Pub, entries, &deps.tree, classify)
}

fn source_caveat(pkg: &PubPackage) -> Option<String> {
    match pkg.source.as_str() {
        "sdk" => Some("sdk package".to_string()),
        "git" => Some("git dependency".to_string()),
        _ => None,
    }
}

fn cached_pubspec(dir: &Path) -> Option<serde_yaml::Value> {
    let path = dir.join("pubspec.yaml");
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_yaml::from_str(&content) {
        Ok(doc) => Some(doc),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "unreadable cached pubspec");
            None
        }
    }
}
