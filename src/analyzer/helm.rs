use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde_yaml::Value as Yaml;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::{Analyzer, ScanContext};
use crate::error::{read_to_string, ScanError, ScanResult};
use crate::graph::{assemble, PackageEntry, PackageKey, RelationTree};
use crate::license::DeclaredLicense;
use crate::models::{DependencyItem, Ecosystem, OssItem};
use crate::runner::CleanupGuard;

/// Helm charts: subcharts declared in `Chart.yaml` (apiVersion v2) or
/// `requirements.yaml` (v1).
pub struct HelmAnalyzer;

impl HelmAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

fn read_yaml(path: &Path) -> ScanResult<Yaml> {
    let content = read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|e| ScanError::parse(path.display().to_string(), e))
}

/// Entries of a `dependencies` sequence as `(name, version)`.
pub fn chart_dependencies(doc: &Yaml) -> Vec<(String, String)> {
    doc.get("dependencies")
        .and_then(Yaml::as_sequence)
        .map(|deps| {
            deps.iter()
                .filter_map(|d| {
                    let name = d.get("name").and_then(Yaml::as_str)?;
                    let version = d.get("version").and_then(Yaml::as_str).unwrap_or("");
                    Some((name.to_string(), version.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Analyzer for HelmAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Helm
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let chart_path = ctx.root.join("Chart.yaml");
        if !chart_path.is_file() {
            return Err(ScanError::ManifestMissing { path: chart_path });
        }
        let chart = read_yaml(&chart_path)?;
        let mut declared = chart_dependencies(&chart);
        let (requirements, lock_name) = if declared.is_empty() {
            ("requirements.yaml", "requirements.lock")
        } else {
            ("Chart.yaml", "Chart.lock")
        };
        if declared.is_empty() && ctx.root.join(requirements).is_file() {
            declared = chart_dependencies(&read_yaml(&ctx.root.join(requirements))?);
        }
        let lock_path = ctx.root.join(lock_name);
        let locked: HashMap<String, String> = if lock_path.is_file() {
            chart_dependencies(&read_yaml(&lock_path)?).into_iter().collect()
        } else {
            HashMap::new()
        };

        let charts_dir = ctx.root.join("charts");
        let mut guard = CleanupGuard::new();
        if !declared.is_empty() && guard.track_if_absent(&charts_dir) {
            info!("charts/ missing; running helm dependency build");
            ctx.runner
                .command("helm", &ctx.root)
                .args(["dependency", "build"])
                .run()
                .await?;
        }

        // packaged subcharts are unpacked next to a copy of the plain ones
        let unpacked = TempDir::new().map_err(|e| ScanError::io(std::env::temp_dir(), e))?;
        let mut archives: Vec<_> = std::fs::read_dir(&charts_dir)
            .map(|rd| rd.flatten().map(|e| e.path()).collect())
            .unwrap_or_else(|_| Vec::new());
        archives.retain(|p| p.extension().and_then(|e| e.to_str()) == Some("tgz"));
        archives.sort();
        for archive in &archives {
            let result = ctx
                .runner
                .command("tar", &ctx.root)
                .arg("-xzf")
                .arg(archive.to_string_lossy())
                .arg("-C")
                .arg(unpacked.path().to_string_lossy())
                .run()
                .await;
            if let Err(e) = result {
                warn!(archive = %archive.display(), error = %e, "cannot unpack subchart");
            }
        }

        Ok(build_items(
            &declared,
            &locked,
            &[charts_dir.as_path(), unpacked.path()],
            ctx.classify,
        ))
    }
}

fn subchart(dirs: &[&Path], name: &str) -> Option<Yaml> {
    dirs.iter()
        .map(|d| d.join(name).join("Chart.yaml"))
        .find(|p| p.is_file())
        .and_then(|p| match read_yaml(&p) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(error = %e, "unreadable subchart");
                None
            }
        })
}

/// Every declared subchart is a direct dependency; the version comes from
/// the subchart itself, then `Chart.lock`, then the declared range.
pub fn build_items(
    declared: &[(String, String)],
    locked: &HashMap<String, String>,
    chart_dirs: &[&Path],
    classify: bool,
) -> Vec<DependencyItem> {
    let mut tree = RelationTree::new();
    let entries = declared
        .iter()
        .map(|(name, range)| {
            let meta = subchart(chart_dirs, name);
            if meta.is_none() {
                debug!(chart = %name, "subchart metadata not found");
            }
            let field = |f: &str| {
                meta.as_ref()
                    .and_then(|m| m.get(f))
                    .and_then(Yaml::as_str)
                    .map(str::to_string)
            };
            let raw_version = field("version")
                .or_else(|| locked.get(name).cloned())
                .unwrap_or_else(|| range.clone());
            let key = PackageKey::for_ecosystem(Ecosystem::Helm, name, &raw_version);
            tree.add_direct(&key);

            let mut item = OssItem::new(name, key.version());
            item.homepage = field("home").unwrap_or_default();
            item.download_location = meta
                .as_ref()
                .and_then(|m| m.get("sources"))
                .and_then(Yaml::as_sequence)
                .and_then(|s| s.first())
                .and_then(Yaml::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| item.homepage.clone());
            let license = meta
                .as_ref()
                .and_then(|m| m.get("annotations"))
                .and_then(|a| a.get("licenses"))
                .and_then(Yaml::as_str)
                .map(DeclaredLicense::parse)
                .unwrap_or_default();
            item.license = license.license;
            item.comment = license.caveat.unwrap_or_default();
            PackageEntry::new(key, item)
        })
        .collect();
    assemble(Ecosystem::Helm, entries, &tree, classify)
}
