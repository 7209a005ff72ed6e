use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{normalize_repository_url, Analyzer, ScanContext};
use crate::error::{ScanError, ScanResult};
use crate::graph::{assemble, PackageEntry, PackageKey};
use crate::license::DeclaredLicense;
use crate::models::{DependencyItem, Ecosystem, OssItem};
use crate::parser::json_tree::parse_cargo_resolve;

const CRATES_URL: &str = "https://crates.io/crates/";

/// The subset of a `cargo metadata` package the report needs.
#[derive(Debug, Deserialize)]
struct CargoPackage {
    #[serde(default)]
    id: String,
    name: String,
    version: String,
    license: Option<String>,
    license_file: Option<String>,
    repository: Option<String>,
    homepage: Option<String>,
    /// `None` for path dependencies and workspace members.
    source: Option<String>,
}

pub struct CargoAnalyzer;

impl CargoAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for CargoAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Cargo
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let manifest = ctx.root.join("Cargo.toml");
        if !manifest.is_file() {
            return Err(ScanError::ManifestMissing { path: manifest });
        }

        let mut command = ctx
            .runner
            .command("cargo", &ctx.root)
            .args(["metadata", "--format-version", "1"]);
        if ctx.root.join("Cargo.lock").is_file() {
            command = command.arg("--locked");
        }
        let output = command.capture().await?;
        let doc: Value =
            serde_json::from_str(&output).map_err(|e| ScanError::parse("cargo metadata output", e))?;

        build_items(&doc, ctx.classify)
    }
}

/// Packages of a `cargo metadata` document that the resolve graph reaches
/// from the root, or from every workspace member of a virtual workspace.
/// Dev-only edges are not followed, so crates used only by tests drop out.
///
/// Without a resolve graph (`--no-deps`) every listed package is reported.
pub fn build_items(doc: &Value, classify: bool) -> ScanResult<Vec<DependencyItem>> {
    let tree = parse_cargo_resolve(doc)?;
    let packages: Vec<CargoPackage> = doc
        .get("packages")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ScanError::parse("cargo metadata packages", e))?
        .unwrap_or_default();

    let members: Vec<&str> = doc
        .get("workspace_members")
        .and_then(Value::as_array)
        .map(|m| m.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let starts: Vec<PackageKey> = match tree.root() {
        Some(root) => vec![root.clone()],
        None => packages
            .iter()
            .filter(|p| members.contains(&p.id.as_str()))
            .map(|p| PackageKey::new(&p.name, &p.version))
            .collect(),
    };
    let resolved = tree.root().is_some() || !tree.total().is_empty();
    let reachable = tree.reachable_from(&starts);

    let entries = packages
        .into_iter()
        .filter_map(|pkg| {
            let key = PackageKey::new(&pkg.name, &pkg.version);
            if resolved && !reachable.contains(&key) {
                debug!(package = %key, "not reachable from the workspace");
                return None;
            }
            Some(package_entry(key, pkg))
        })
        .collect();

    Ok(assemble(Ecosystem::Cargo, entries, &tree, classify))
}

fn package_entry(key: PackageKey, pkg: CargoPackage) -> PackageEntry {
    let local = pkg.source.is_none();
    let crate_url = format!("{CRATES_URL}{}", pkg.name);
    let version_url = format!("{crate_url}/{}", pkg.version);

    // pre-2018 manifests separate alternatives with `/`
    let declared = pkg
        .license
        .as_deref()
        .map(|l| DeclaredLicense::parse(&l.replace('/', " OR ")))
        .unwrap_or_default();

    let mut item = OssItem::new(&pkg.name, &pkg.version);
    item.license = declared.license;
    let mut caveats: Vec<String> = declared.caveat.into_iter().collect();
    if item.license.is_empty() {
        if let Some(file) = &pkg.license_file {
            caveats.push(format!("license file: {file}"));
        }
    }
    item.comment = caveats.join(", ");

    let repository = pkg
        .repository
        .as_deref()
        .map(normalize_repository_url)
        .filter(|r| !r.is_empty());
    if local {
        item.homepage = pkg.homepage.or(repository).unwrap_or_default();
        item.download_location = item.homepage.clone();
    } else {
        item.homepage = pkg.homepage.unwrap_or_else(|| crate_url.clone());
        item.download_location = version_url.clone();
    }

    let entry = PackageEntry::new(key, item).local(local);
    if local {
        entry
    } else {
        entry.with_url(version_url)
    }
}
