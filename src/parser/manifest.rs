//! Graphs rebuilt from lock/asset manifests whose edges name dependencies
//! by name or range instead of by the resolved version.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::{read_to_string, ScanError, ScanResult};
use crate::graph::{PackageKey, RelationTree};
use crate::models::Ecosystem;

static POD_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S*)(?:\s\((.*)\))?").expect("static regex"));

/// A `(name, version)` pair exactly as the manifest spells it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pinned {
    pub name: String,
    pub version: String,
}

fn pod_entry(entry: &str) -> (String, String) {
    match POD_ENTRY.captures(entry.trim()) {
        Some(c) => (
            c[1].to_string(),
            c.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
        ),
        None => (entry.trim().to_string(), String::new()),
    }
}

#[derive(Debug)]
pub struct PodfileLock {
    pub tree: RelationTree,
    /// Every pod in `PODS`, subspecs included (`Pod/Subspec`).
    pub pods: Vec<Pinned>,
    /// Pods installed from a path or git checkout rather than a spec repo.
    pub external: Vec<String>,
}

/// Parse a CocoaPods `Podfile.lock`.
pub fn parse_podfile_lock(text: &str) -> ScanResult<PodfileLock> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| ScanError::parse("Podfile.lock", e))?;

    let spec_repos: Vec<String> = doc
        .get("SPEC REPOS")
        .and_then(|v| v.as_mapping())
        .map(|repos| {
            repos
                .values()
                .filter_map(|v| v.as_sequence())
                .flatten()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let external: Vec<String> = doc
        .get("EXTERNAL SOURCES")
        .and_then(|v| v.as_mapping())
        .map(|m| m.keys().filter_map(|k| k.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    if spec_repos.is_empty() && external.is_empty() {
        return Err(ScanError::parse(
            "Podfile.lock",
            "neither SPEC REPOS nor EXTERNAL SOURCES is present",
        ));
    }

    let mut pods: Vec<Pinned> = Vec::new();
    let mut raw_edges: Vec<(PackageKey, Vec<String>)> = Vec::new();
    for entry in doc
        .get("PODS")
        .and_then(|v| v.as_sequence())
        .map(Vec::as_slice)
        .unwrap_or(&[])
    {
        if let Some(s) = entry.as_str() {
            let (name, version) = pod_entry(s);
            pods.push(Pinned { name, version });
        } else if let Some(map) = entry.as_mapping() {
            for (k, children) in map {
                let Some(k) = k.as_str() else { continue };
                let (name, version) = pod_entry(k);
                let child_names = children
                    .as_sequence()
                    .map(|seq| {
                        seq.iter()
                            .filter_map(|c| c.as_str().map(|c| pod_entry(c).0))
                            .collect()
                    })
                    .unwrap_or_default();
                raw_edges.push((PackageKey::new(&name, &version), child_names));
                pods.push(Pinned { name, version });
            }
        }
    }

    let versions: HashMap<&str, &str> = pods
        .iter()
        .map(|p| (p.name.as_str(), p.version.as_str()))
        .collect();

    let mut tree = RelationTree::new();
    for pod in &pods {
        tree.record(&PackageKey::new(&pod.name, &pod.version));
    }
    for (parent, children) in &raw_edges {
        for child in children {
            match versions.get(child.as_str()) {
                Some(version) => {
                    tree.add_edge(parent, &PackageKey::new(child, *version));
                }
                None => warn!(pod = %parent, dependency = child, "dependency not listed in PODS"),
            }
        }
    }
    for entry in doc
        .get("DEPENDENCIES")
        .and_then(|v| v.as_sequence())
        .map(Vec::as_slice)
        .unwrap_or(&[])
    {
        let Some(s) = entry.as_str() else { continue };
        let (name, _) = pod_entry(s);
        if let Some(version) = versions.get(name.as_str()) {
            tree.mark_direct(&PackageKey::new(&name, *version));
        }
    }

    Ok(PodfileLock {
        tree,
        pods,
        external,
    })
}

#[derive(Debug)]
pub struct NugetAssets {
    pub tree: RelationTree,
    pub packages: Vec<Pinned>,
    /// Names declared in `projectFileDependencyGroups`.
    pub declared: Vec<String>,
}

/// Parse `obj/project.assets.json`.
///
/// Target dependency entries carry the requested lower bound, so every edge
/// is re-pointed at the version resolved in `libraries`.
pub fn parse_project_assets(text: &str) -> ScanResult<NugetAssets> {
    let doc: Value =
        serde_json::from_str(text).map_err(|e| ScanError::parse("project.assets.json", e))?;
    let libraries = doc
        .get("libraries")
        .and_then(Value::as_object)
        .ok_or_else(|| ScanError::parse("project.assets.json", "missing `libraries`"))?;

    let split = |id: &str| -> Option<(String, String)> {
        let (name, version) = id.split_once('/')?;
        Some((name.to_string(), version.to_string()))
    };

    let mut packages = Vec::new();
    let mut resolved: HashMap<String, String> = HashMap::new();
    for (id, lib) in libraries {
        if lib.get("type").and_then(Value::as_str) != Some("package") {
            continue;
        }
        let Some((name, version)) = split(id) else { continue };
        resolved.insert(name.to_lowercase(), version.clone());
        packages.push(Pinned { name, version });
    }

    let groups = doc
        .get("projectFileDependencyGroups")
        .and_then(Value::as_object);
    let frameworks: Vec<&str> = groups
        .map(|g| g.keys().map(String::as_str).collect())
        .unwrap_or_default();
    let mut declared: Vec<String> = Vec::new();
    for entry in groups.into_iter().flat_map(|g| g.values()) {
        for dep in entry.as_array().map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(name) = dep.as_str().and_then(|d| d.split_whitespace().next()) {
                if !declared.iter().any(|d| d.eq_ignore_ascii_case(name)) {
                    declared.push(name.to_string());
                }
            }
        }
    }

    let mut tree = RelationTree::new();
    for pkg in &packages {
        tree.record(&PackageKey::for_ecosystem(Ecosystem::Nuget, &pkg.name, &pkg.version));
    }
    if let Some(targets) = doc.get("targets").and_then(Value::as_object) {
        for (framework, entries) in targets {
            if !frameworks.contains(&framework.as_str()) {
                continue;
            }
            for (id, entry) in entries.as_object().into_iter().flatten() {
                if entry.get("type").and_then(Value::as_str) != Some("package") {
                    continue;
                }
                let Some((name, version)) = split(id) else { continue };
                let parent = PackageKey::for_ecosystem(Ecosystem::Nuget, &name, &version);
                let deps = entry.get("dependencies").and_then(Value::as_object);
                for (dep, range) in deps.into_iter().flatten() {
                    let range = range.as_str().unwrap_or("");
                    let child = PackageKey::for_ecosystem(Ecosystem::Nuget, dep, range);
                    tree.add_edge(&parent, &child);
                }
            }
        }
    }
    tree.pin_versions(&resolved);

    Ok(NugetAssets {
        tree,
        packages,
        declared,
    })
}

/// `<PackageReference Include="..." />` names from a `.csproj`.
pub fn parse_package_references(path: &Path) -> ScanResult<Vec<String>> {
    let content = read_to_string(path)?;
    Ok(xml_attribute_values(&content, "PackageReference", "Include")
        .into_iter()
        .map(|(name, _)| name)
        .collect())
}

/// `<package id="..." version="..." />` entries from `packages.config`.
pub fn parse_packages_config(path: &Path) -> ScanResult<Vec<Pinned>> {
    let content = read_to_string(path)?;
    Ok(xml_attribute_values(&content, "package", "id")
        .into_iter()
        .map(|(name, version)| Pinned { name, version })
        .collect())
}

/// Collect `(name_attr, version)` from every `tag` element.
fn xml_attribute_values(content: &str, tag: &str, name_attr: &str) -> Vec<(String, String)> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut found = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => {
                let local = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                if local == tag {
                    let mut name = String::new();
                    let mut version = String::new();
                    for attr in e.attributes().flatten() {
                        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                        let val = attr.unescape_value().unwrap_or_default().into_owned();
                        if key == name_attr {
                            name = val;
                        } else if key.eq_ignore_ascii_case("version") {
                            version = val;
                        }
                    }
                    if !name.is_empty() {
                        found.push((name, version));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "stopping at malformed XML");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    found
}

#[derive(Debug, Clone, PartialEq)]
pub struct PubPackage {
    pub name: String,
    pub version: String,
    /// `root`, `direct`, `dev` or `transitive`.
    pub kind: String,
    /// `hosted`, `git`, `path`, `sdk` or `root`.
    pub source: String,
}

#[derive(Debug)]
pub struct PubDeps {
    pub tree: RelationTree,
    pub packages: Vec<PubPackage>,
}

/// Parse `dart pub deps --json` / `flutter pub deps --json`.
pub fn parse_pub_deps(doc: &Value) -> ScanResult<PubDeps> {
    let list = doc
        .get("packages")
        .and_then(Value::as_array)
        .ok_or_else(|| ScanError::parse("pub deps output", "missing `packages`"))?;
    let root_name = doc.get("root").and_then(Value::as_str);

    let field = |p: &Value, f: &str| p.get(f).and_then(Value::as_str).unwrap_or("").to_string();
    let entries: Vec<(PubPackage, &Value)> = list
        .iter()
        .map(|p| {
            let pkg = PubPackage {
                name: field(p, "name"),
                version: field(p, "version"),
                kind: field(p, "kind"),
                source: field(p, "source"),
            };
            (pkg, p)
        })
        .filter(|(p, _)| !p.name.is_empty())
        .collect();
    let versions: HashMap<&str, &str> = entries
        .iter()
        .map(|(p, _)| (p.name.as_str(), p.version.as_str()))
        .collect();

    let mut tree = RelationTree::new();
    for (pkg, raw) in &entries {
        let key = PackageKey::new(&pkg.name, &pkg.version);
        tree.record(&key);
        if pkg.kind == "root" || root_name == Some(pkg.name.as_str()) {
            tree.set_root(key.clone());
        }
        if pkg.kind == "direct" || pkg.kind == "dev" {
            tree.mark_direct(&key);
        }
        for dep in raw
            .get("dependencies")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter_map(Value::as_str)
        {
            match versions.get(dep) {
                Some(version) => {
                    tree.add_edge(&key, &PackageKey::new(dep, *version));
                }
                None => warn!(package = %key, dependency = dep, "dependency not in package list"),
            }
        }
    }

    let packages = entries.into_iter().map(|(p, _)| p).collect();
    Ok(PubDeps { tree, packages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn key(name: &str, version: &str) -> PackageKey {
        PackageKey::new(name, version)
    }

    const PODFILE_LOCK: &str = r#"PODS:
  - Alamofire (5.6.4)
  - FirebaseCore (10.0.0):
    - FirebaseCoreInternal (~> 10.0)
    - GoogleUtilities/Environment (~> 7.8)
  - FirebaseCoreInternal (10.3.0)
  - GoogleUtilities/Environment (7.10.0)
  - LocalPod (0.1.0)

DEPENDENCIES:
  - Alamofire (~> 5.6)
  - FirebaseCore
  - LocalPod (from `../LocalPod`)

SPEC REPOS:
  trunk:
    - Alamofire
    - FirebaseCore
    - FirebaseCoreInternal
    - GoogleUtilities

EXTERNAL SOURCES:
  LocalPod:
    :path: "../LocalPod"

COCOAPODS: 1.11.3
"#;

    #[test]
    fn test_podfile_lock() {
        let lock = parse_podfile_lock(PODFILE_LOCK).unwrap();
        assert_eq!(lock.pods.len(), 5);
        assert_eq!(lock.external, vec!["LocalPod".to_string()]);
        assert_eq!(
            lock.tree.dependencies_of(&key("FirebaseCore", "10.0.0")),
            &[
                key("FirebaseCoreInternal", "10.3.0"),
                key("GoogleUtilities/Environment", "7.10.0")
            ]
        );
        assert_eq!(
            lock.tree.direct(),
            &[
                key("Alamofire", "5.6.4"),
                key("FirebaseCore", "10.0.0"),
                key("LocalPod", "0.1.0")
            ]
        );
    }

    #[test]
    fn test_podfile_lock_without_sources() {
        assert!(parse_podfile_lock("PODS:\n  - A (1.0)\n").is_err());
        assert!(parse_podfile_lock("PODS: [").is_err());
    }

    #[test]
    fn test_project_assets_resolves_ranges() {
        let doc = json!({
            "version": 3,
            "targets": {
                "net6.0": {
                    "Microsoft.Extensions.Logging/7.0.0": {
                        "type": "package",
                        "dependencies": {"Microsoft.Extensions.Primitives": "6.0.0"}
                    },
                    "Microsoft.Extensions.Primitives/7.0.0": {"type": "package"},
                    "MyLib/1.0.0": {"type": "project"}
                },
                "net6.0/linux-x64": {
                    "Ignored/1.0.0": {"type": "package", "dependencies": {"Other": "1.0.0"}}
                }
            },
            "libraries": {
                "Microsoft.Extensions.Logging/7.0.0": {"type": "package"},
                "Microsoft.Extensions.Primitives/7.0.0": {"type": "package"},
                "MyLib/1.0.0": {"type": "project"}
            },
            "projectFileDependencyGroups": {
                "net6.0": ["Microsoft.Extensions.Logging >= 7.0.0", "MyLib >= 1.0.0"]
            }
        });
        let assets = parse_project_assets(&doc.to_string()).unwrap();
        assert_eq!(assets.packages.len(), 2);
        assert_eq!(
            assets
                .tree
                .dependencies_of(&key("microsoft.extensions.logging", "7.0.0")),
            &[key("microsoft.extensions.primitives", "7.0.0")]
        );
        assert_eq!(assets.tree.edge_count(), 1);
        assert_eq!(
            assets.declared,
            vec!["Microsoft.Extensions.Logging".to_string(), "MyLib".to_string()]
        );
    }

    #[test]
    fn test_parse_csproj_and_packages_config() {
        let mut csproj = NamedTempFile::new().unwrap();
        write!(
            csproj,
            r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Newtonsoft.Json" Version="13.0.1" />
    <PackageReference Include="Serilog">
      <Version>2.12.0</Version>
    </PackageReference>
  </ItemGroup>
</Project>"#
        )
        .unwrap();
        assert_eq!(
            parse_package_references(csproj.path()).unwrap(),
            vec!["Newtonsoft.Json".to_string(), "Serilog".to_string()]
        );

        let mut config = NamedTempFile::new().unwrap();
        write!(
            config,
            r#"<?xml version="1.0" encoding="utf-8"?>
<packages>
  <package id="NUnit" version="3.13.3" targetFramework="net48" />
</packages>"#
        )
        .unwrap();
        assert_eq!(
            parse_packages_config(config.path()).unwrap(),
            vec![Pinned {
                name: "NUnit".to_string(),
                version: "3.13.3".to_string()
            }]
        );
    }

    #[test]
    fn test_pub_deps() {
        let doc = json!({
            "root": "my_app",
            "packages": [
                {"name": "my_app", "version": "1.0.0+1", "kind": "root", "source": "root",
                 "dependencies": ["http", "lints"]},
                {"name": "http", "version": "0.13.5", "kind": "direct", "source": "hosted",
                 "dependencies": ["async"]},
                {"name": "lints", "version": "2.0.1", "kind": "dev", "source": "hosted",
                 "dependencies": []},
                {"name": "async", "version": "2.11.0", "kind": "transitive", "source": "hosted",
                 "dependencies": ["missing_pkg"]}
            ]
        });
        let deps = parse_pub_deps(&doc).unwrap();
        assert_eq!(deps.tree.root(), Some(&key("my_app", "1.0.0+1")));
        assert_eq!(
            deps.tree.dependencies_of(&key("my_app", "1.0.0+1")),
            &[key("http", "0.13.5"), key("lints", "2.0.1")]
        );
        assert_eq!(deps.tree.direct(), &[key("http", "0.13.5"), key("lints", "2.0.1")]);
        assert_eq!(deps.tree.dependencies_of(&key("async", "2.11.0")), &[] as &[PackageKey]);
        assert_eq!(deps.packages[2].kind, "dev");
    }
}
