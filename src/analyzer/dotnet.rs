use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info, warn};

use super::{normalize_repository_url, Analyzer, ScanContext};
use crate::error::{read_to_string, ScanError, ScanResult};
use crate::graph::{assemble, PackageEntry, PackageKey, RelationTree};
use crate::license::DeclaredLicense;
use crate::models::{DependencyItem, Ecosystem, OssItem};
use crate::parser::manifest::{
    parse_package_references, parse_packages_config, parse_project_assets, Pinned,
};
use crate::runner::CleanupGuard;

const NUGET_PACKAGE_URL: &str = "https://www.nuget.org/packages/";

/// NuGet projects: SDK-style through `obj/project.assets.json`, legacy ones
/// through `packages.config`.
pub struct NugetAnalyzer;

impl NugetAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

fn project_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(root)
        .map(|rd| {
            rd.flatten()
                .map(|e| e.path())
                .filter(|p| {
                    p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e == "csproj" || e == "fsproj")
                        .unwrap_or(false)
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Where restored packages live: `NUGET_PACKAGES` or `~/.nuget/packages`.
fn global_packages_dir() -> Option<PathBuf> {
    std::env::var_os("NUGET_PACKAGES")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".nuget").join("packages")))
}

#[async_trait]
impl Analyzer for NugetAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Nuget
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let projects = project_files(&ctx.root);
        let assets_path = ctx.root.join("obj").join("project.assets.json");

        let mut guard = CleanupGuard::new();
        if !projects.is_empty() && guard.track_if_absent(ctx.root.join("obj")) {
            info!("project.assets.json missing; running dotnet restore");
            ctx.runner
                .command("dotnet", &ctx.root)
                .arg("restore")
                .run()
                .await?;
        }

        let (packages, tree, classify) = if assets_path.is_file() {
            let assets = parse_project_assets(&read_to_string(&assets_path)?)?;
            let mut declared = assets.declared;
            for project in &projects {
                for name in parse_package_references(project)? {
                    if !declared.iter().any(|d| d.eq_ignore_ascii_case(&name)) {
                        declared.push(name);
                    }
                }
            }
            let mut tree = assets.tree;
            tree.set_direct(direct_keys(&assets.packages, &declared));
            (assets.packages, tree, ctx.classify)
        } else {
            let config = ctx.root.join("packages.config");
            if !config.is_file() {
                return Err(ScanError::ManifestMissing { path: config });
            }
            let (packages, tree) = flat_packages(parse_packages_config(&config)?);
            (packages, tree, false)
        };

        let packages_dir = global_packages_dir();
        Ok(build_items(&packages, &tree, packages_dir.as_deref(), classify))
    }
}

fn key_of(pkg: &Pinned) -> PackageKey {
    PackageKey::for_ecosystem(Ecosystem::Nuget, &pkg.name, &pkg.version)
}

/// Keys of the resolved packages whose names were declared by the project.
fn direct_keys(packages: &[Pinned], declared: &[String]) -> Vec<PackageKey> {
    declared
        .iter()
        .filter_map(|name| {
            let found = packages.iter().find(|p| p.name.eq_ignore_ascii_case(name));
            if found.is_none() {
                debug!(package = %name, "declared package was not resolved");
            }
            found.map(key_of)
        })
        .collect()
}

/// `packages.config` has no edges and does not tell declared packages from
/// pulled-in ones, so its rows are reported unclassified.
fn flat_packages(packages: Vec<Pinned>) -> (Vec<Pinned>, RelationTree) {
    let mut tree = RelationTree::new();
    for pkg in &packages {
        tree.add_direct(&key_of(pkg));
    }
    (packages, tree)
}

pub fn build_items(
    packages: &[Pinned],
    tree: &RelationTree,
    packages_dir: Option<&Path>,
    classify: bool,
) -> Vec<DependencyItem> {
    let entries = packages
        .iter()
        .map(|pkg| {
            let nuspec = packages_dir.and_then(|dir| read_nuspec(dir, pkg));
            let registry_url = format!("{NUGET_PACKAGE_URL}{}", pkg.name);
            let version_url = format!("{registry_url}/{}", pkg.version);

            let mut item = OssItem::new(&pkg.name, &pkg.version);
            item.homepage = registry_url;
            item.download_location = version_url.clone();
            if let Some(meta) = nuspec {
                let declared = meta
                    .license
                    .as_deref()
                    .map(DeclaredLicense::parse)
                    .unwrap_or_default();
                item.license = declared.license;
                let mut caveats: Vec<String> = declared.caveat.into_iter().collect();
                if item.license.is_empty() {
                    if let Some(url) = meta.license_url {
                        caveats.push(format!("license url: {url}"));
                    }
                }
                item.comment = caveats.join(", ");
                if let Some(project) = meta.project_url.or(meta.repository) {
                    item.homepage = project;
                }
            }
            PackageEntry::new(key_of(pkg), item).with_url(version_url)
        })
        .collect();
    assemble(Ecosystem::Nuget, entries, tree, classify)
}

/// Fields of a `.nuspec` that feed a report row.
#[derive(Debug, Default, PartialEq)]
pub struct NuspecMeta {
    pub license: Option<String>,
    pub license_url: Option<String>,
    pub project_url: Option<String>,
    pub repository: Option<String>,
}

fn read_nuspec(dir: &Path, pkg: &Pinned) -> Option<NuspecMeta> {
    let lower = pkg.name.to_lowercase();
    let path = dir
        .join(&lower)
        .join(pkg.version.to_lowercase())
        .join(format!("{lower}.nuspec"));
    match std::fs::read_to_string(&path) {
        Ok(content) => Some(parse_nuspec(&content)),
        Err(_) => {
            debug!(path = %path.display(), "nuspec not found");
            None
        }
    }
}

/// Parse the metadata of a `.nuspec` file.
pub fn parse_nuspec(content: &str) -> NuspecMeta {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut meta = NuspecMeta::default();
    let mut buf = Vec::new();
    let mut current_tag = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                current_tag = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                if current_tag == "repository" {
                    meta.repository = repository_url(e);
                }
            }
            Ok(Event::Empty(ref e)) => {
                if e.name().local_name().as_ref() == b"repository" {
                    meta.repository = repository_url(e);
                }
            }
            Ok(Event::End(_)) => current_tag.clear(),
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().trim().to_string();
                match current_tag.as_str() {
                    _ if text.is_empty() => {}
                    "license" => meta.license = Some(text),
                    "licenseUrl" => meta.license_url = Some(text),
                    "projectUrl" => meta.project_url = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "stopping at malformed nuspec");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    meta
}

fn repository_url(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"url")
        .and_then(|a| a.unescape_value().ok())
        .map(|v| normalize_repository_url(&v))
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;
    use crate::parser::manifest::parse_project_assets;
    use tempfile::TempDir;

    const NUSPEC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>Newtonsoft.Json</id>
    <version>13.0.1</version>
    <license type="expression">MIT</license>
    <licenseUrl>https://licenses.nuget.org/MIT</licenseUrl>
    <projectUrl>https://www.newtonsoft.com/json</projectUrl>
    <repository type="git" url="https://github.com/JamesNK/Newtonsoft.Json.git" />
  </metadata>
</package>"#;

    #[test]
    fn test_parse_nuspec() {
        let meta = parse_nuspec(NUSPEC);
        assert_eq!(meta.license.as_deref(), Some("MIT"));
        assert_eq!(meta.license_url.as_deref(), Some("https://licenses.nuget.org/MIT"));
        assert_eq!(meta.project_url.as_deref(), Some("https://www.newtonsoft.com/json"));
        assert_eq!(
            meta.repository.as_deref(),
            Some("https://github.com/JamesNK/Newtonsoft.Json")
        );
    }

    #[test]
    fn test_assets_items_with_nuspec() {
        let assets = r#"{
            "version": 3,
            "targets": {
                "net6.0": {
                    "Newtonsoft.Json/13.0.1": {"type": "package"},
                    "Serilog.Sinks.Console/4.1.0": {
                        "type": "package",
                        "dependencies": {"Serilog": "2.10.0"}
                    },
                    "Serilog/2.12.0": {"type": "package"}
                }
            },
            "libraries": {
                "Newtonsoft.Json/13.0.1": {"type": "package"},
                "Serilog/2.12.0": {"type": "package"},
                "Serilog.Sinks.Console/4.1.0": {"type": "package"}
            },
            "projectFileDependencyGroups": {
                "net6.0": ["Newtonsoft.Json >= 13.0.1", "Serilog.Sinks.Console >= 4.1.0"]
            }
        }"#;
        let parsed = parse_project_assets(assets).unwrap();
        let mut tree = parsed.tree;
        tree.set_direct(direct_keys(&parsed.packages, &parsed.declared));

        let cache = TempDir::new().unwrap();
        let dir = cache.path().join("newtonsoft.json").join("13.0.1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("newtonsoft.json.nuspec"), NUSPEC).unwrap();

        let items = build_items(&parsed.packages, &tree, Some(cache.path()), true);
        assert_eq!(items.len(), 3);

        let json = items.iter().find(|i| i.key.name() == "newtonsoft.json").unwrap();
        assert_eq!(json.purl, "pkg:nuget/Newtonsoft.Json@13.0.1");
        assert_eq!(json.classification, Some(Classification::Direct));
        assert_eq!(json.oss_items[0].license, "MIT");
        assert_eq!(json.oss_items[0].homepage, "https://www.newtonsoft.com/json");

        let sink = items.iter().find(|i| i.key.name() == "serilog.sinks.console").unwrap();
        assert_eq!(sink.depends_on, vec!["pkg:nuget/Serilog@2.12.0".to_string()]);

        let serilog = items.iter().find(|i| i.key.name() == "serilog").unwrap();
        assert_eq!(serilog.classification, Some(Classification::Transitive));
        assert_eq!(serilog.oss_items[0].license, "");
        assert_eq!(serilog.oss_items[0].homepage, "https://www.nuget.org/packages/Serilog");
    }

    #[test]
    fn test_packages_config_is_flat() {
        let (packages, tree) = flat_packages(vec![
            Pinned {
                name: "log4net".to_string(),
                version: "2.0.15".to_string(),
            },
            Pinned {
                name: "NUnit".to_string(),
                version: "3.13.3".to_string(),
            },
        ]);
        let items = build_items(&packages, &tree, None, false);
        assert_eq!(items.len(), 2);
        assert!(items
            .iter()
            .all(|i| i.classification.is_none() && i.depends_on.is_empty()));
        assert_eq!(items[1].purl, "pkg:nuget/NUnit@3.13.3");
        assert_eq!(
            items[1].oss_items[0].download_location,
            "https://www.nuget.org/packages/NUnit/3.13.3"
        );
    }

    #[test]
    fn test_project_files_sorted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.csproj"), "<Project/>").unwrap();
        std::fs::write(dir.path().join("a.fsproj"), "<Project/>").unwrap();
        std::fs::write(dir.path().join("readme.md"), "").unwrap();
        let files = project_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.fsproj"));
    }
}
