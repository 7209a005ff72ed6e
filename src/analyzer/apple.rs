//! CocoaPods, Swift Package Manager and Carthage.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{license_in_dir, normalize_repository_url, Analyzer, ScanContext};
use crate::error::{read_to_string, ScanError, ScanResult};
use crate::graph::{assemble, PackageEntry, PackageKey, RelationTree};
use crate::license::DeclaredLicense;
use crate::models::{DependencyItem, Ecosystem, OssItem};
use crate::parser::json_tree::parse_swift_tree;
use crate::parser::manifest::{parse_podfile_lock, PodfileLock};

const COCOAPODS_URL: &str = "https://cocoapods.org/pods/";

fn base_pod(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

pub struct CocoapodsAnalyzer;

impl CocoapodsAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Podspec of `pod`, from the local podspec copies or the spec repo.
    async fn podspec(&self, ctx: &ScanContext, pod: &str, version: &str) -> Option<Value> {
        let local = ctx
            .root
            .join("Pods")
            .join("Local Podspecs")
            .join(format!("{pod}.podspec.json"));
        let path = if local.is_file() {
            local
        } else {
            let output = ctx
                .runner
                .command("pod", &ctx.root)
                .args(["spec", "which", pod])
                .arg(format!("--version={version}"))
                .capture()
                .await;
            match output {
                Ok(out) => PathBuf::from(out.trim()),
                Err(e) => {
                    debug!(pod, error = %e, "podspec lookup failed");
                    return None;
                }
            }
        };
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            debug!(pod, path = %path.display(), "only JSON podspecs are read");
            return None;
        }
        let content = std::fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }
}

#[async_trait]
impl Analyzer for CocoapodsAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Cocoapods
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let lock_path = ctx.root.join("Podfile.lock");
        if !lock_path.is_file() {
            return Err(ScanError::ManifestMissing { path: lock_path });
        }
        let lock = parse_podfile_lock(&read_to_string(&lock_path)?)?;

        let mut specs: HashMap<String, Value> = HashMap::new();
        for pod in &lock.pods {
            let base = base_pod(&pod.name);
            if specs.contains_key(base) {
                continue;
            }
            if let Some(spec) = self.podspec(ctx, base, &pod.version).await {
                specs.insert(base.to_string(), spec);
            }
        }

        Ok(build_pod_items(&lock, &specs, ctx.classify))
    }
}

/// Rows for every pod of a `Podfile.lock`, subspecs included.
pub fn build_pod_items(
    lock: &PodfileLock,
    specs: &HashMap<String, Value>,
    classify: bool,
) -> Vec<DependencyItem> {
    let entries = lock
        .pods
        .iter()
        .map(|pod| {
            let base = base_pod(&pod.name);
            let registry_url = format!("{COCOAPODS_URL}{base}");
            let spec = specs.get(base);
            let spec_str = |field: &str| {
                spec.and_then(|s| s.get(field))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            };

            let license = spec
                .and_then(|s| s.get("license"))
                .map(DeclaredLicense::from_value)
                .unwrap_or_default();
            let source = spec.and_then(|s| s.get("source")).and_then(|src| {
                src.get("git")
                    .or_else(|| src.get("http"))
                    .and_then(Value::as_str)
                    .map(normalize_repository_url)
            });

            let mut item = OssItem::new(&pod.name, &pod.version);
            item.license = license.license;
            item.comment = license.caveat.unwrap_or_default();
            item.homepage = spec_str("homepage").unwrap_or_else(|| registry_url.clone());
            item.download_location = source.unwrap_or_else(|| registry_url.clone());

            let external = lock.external.iter().any(|e| e == base);
            PackageEntry::new(PackageKey::new(&pod.name, &pod.version), item)
                .with_url(registry_url)
                .local(external)
        })
        .collect();
    assemble(Ecosystem::Cocoapods, entries, &lock.tree, classify)
}

/// A pin of `Package.resolved`, either file format version.
#[derive(Debug, Clone, PartialEq)]
pub struct SwiftPin {
    pub identity: String,
    pub location: String,
    pub version: String,
}

fn identity_from_location(location: &str) -> String {
    let last = location.trim_end_matches('/').rsplit('/').next().unwrap_or(location);
    last.strip_suffix(".git").unwrap_or(last).to_lowercase()
}

/// Parse `Package.resolved`: version 1 nests pins under `object`, versions
/// 2 and 3 list them at the top level with an `identity`.
pub fn parse_package_resolved(text: &str) -> ScanResult<Vec<SwiftPin>> {
    let doc: Value =
        serde_json::from_str(text).map_err(|e| ScanError::parse("Package.resolved", e))?;
    let pins = doc
        .get("pins")
        .or_else(|| doc.get("object").and_then(|o| o.get("pins")))
        .and_then(Value::as_array)
        .ok_or_else(|| ScanError::parse("Package.resolved", "missing `pins`"))?;

    Ok(pins
        .iter()
        .filter_map(|pin| {
            let location = pin
                .get("location")
                .or_else(|| pin.get("repositoryURL"))
                .and_then(Value::as_str)?
                .to_string();
            let identity = pin
                .get("identity")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| identity_from_location(&location));
            let state = pin.get("state");
            let version = state
                .and_then(|s| s.get("version"))
                .and_then(Value::as_str)
                .or_else(|| state.and_then(|s| s.get("branch")).and_then(Value::as_str))
                .or_else(|| state.and_then(|s| s.get("revision")).and_then(Value::as_str))
                .unwrap_or("")
                .to_string();
            Some(SwiftPin {
                identity,
                location,
                version,
            })
        })
        .collect())
}

/// `Package.resolved` at the root, or inside an Xcode project or workspace.
fn find_package_resolved(root: &Path) -> Option<PathBuf> {
    let direct = root.join("Package.resolved");
    if direct.is_file() {
        return Some(direct);
    }
    let mut bundles: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("xcodeproj") | Some("xcworkspace")
            )
        })
        .collect();
    bundles.sort();
    bundles.into_iter().find_map(|bundle| {
        let shared = if bundle.extension().and_then(|e| e.to_str()) == Some("xcodeproj") {
            bundle.join("project.xcworkspace").join("xcshareddata")
        } else {
            bundle.join("xcshareddata")
        };
        let candidate = shared.join("swiftpm").join("Package.resolved");
        candidate.is_file().then_some(candidate)
    })
}

pub struct SwiftAnalyzer;

impl SwiftAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for SwiftAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Swift
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let resolved = find_package_resolved(&ctx.root).ok_or_else(|| ScanError::ManifestMissing {
            path: ctx.root.join("Package.resolved"),
        })?;
        let pins = parse_package_resolved(&read_to_string(&resolved)?)?;

        let tree = if ctx.root.join("Package.swift").is_file() {
            let output = ctx
                .runner
                .command("swift", &ctx.root)
                .args(["package", "show-dependencies", "--format", "json"])
                .capture()
                .await?;
            let doc: Value = serde_json::from_str(&output)
                .map_err(|e| ScanError::parse("swift show-dependencies output", e))?;
            Some(parse_swift_tree(&doc).0)
        } else {
            debug!("no Package.swift; pins are reported without a graph");
            None
        };

        let checkouts = ctx.root.join(".build").join("checkouts");
        Ok(build_swift_items(&pins, tree, &checkouts, ctx.classify))
    }
}

/// Rows for the pins of `Package.resolved`. Without a dependency tree the
/// rows are left unclassified.
pub fn build_swift_items(
    pins: &[SwiftPin],
    tree: Option<RelationTree>,
    checkouts: &Path,
    classify: bool,
) -> Vec<DependencyItem> {
    let (tree, classify) = match tree {
        Some(tree) => (tree, classify),
        None => (RelationTree::new(), false),
    };
    let entries = pins
        .iter()
        .map(|pin| {
            let key = PackageKey::for_ecosystem(Ecosystem::Swift, &pin.identity, &pin.version);
            let repository = normalize_repository_url(&pin.location);
            let checkout = checkouts.join(identity_from_location(&pin.location));

            let mut item = OssItem::new(&pin.identity, &pin.version);
            item.homepage = repository.clone();
            item.download_location = pin.location.clone();
            if let Some(license) = license_in_dir(&checkout) {
                item.license = license;
            }
            PackageEntry::new(key, item).with_url(repository)
        })
        .collect();
    assemble(Ecosystem::Swift, entries, &tree, classify)
}

/// One line of a `Cartfile` / `Cartfile.resolved`.
#[derive(Debug, Clone, PartialEq)]
pub struct CartfileEntry {
    /// `github`, `git` or `binary`.
    pub origin: String,
    pub source: String,
    pub version: String,
}

impl CartfileEntry {
    pub fn name(&self) -> String {
        match self.origin.as_str() {
            "github" if !self.source.contains("://") => self.source.clone(),
            _ => {
                let last = self
                    .source
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or(&self.source);
                last.trim_end_matches(".git")
                    .trim_end_matches(".json")
                    .to_string()
            }
        }
    }

    pub fn url(&self) -> String {
        match self.origin.as_str() {
            "github" if !self.source.contains("://") => format!("https://github.com/{}", self.source),
            _ => normalize_repository_url(&self.source),
        }
    }
}

/// Parse `origin "source" ["version"]` lines, skipping comments.
pub fn parse_cartfile(text: &str) -> Vec<CartfileEntry> {
    text.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or("").trim();
            let (origin, rest) = line.split_once(char::is_whitespace)?;
            let quoted: Vec<&str> = rest.split('"').skip(1).step_by(2).collect();
            let source = quoted.first()?;
            Some(CartfileEntry {
                origin: origin.to_string(),
                source: source.to_string(),
                version: quoted.get(1).map(|v| v.to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

pub struct CarthageAnalyzer;

impl CarthageAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for CarthageAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Carthage
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let resolved_path = ctx.root.join("Cartfile.resolved");
        if !resolved_path.is_file() {
            return Err(ScanError::ManifestMissing { path: resolved_path });
        }
        let resolved = parse_cartfile(&read_to_string(&resolved_path)?);
        let cartfile = ctx.root.join("Cartfile");
        let declared = if cartfile.is_file() {
            parse_cartfile(&read_to_string(&cartfile)?)
        } else {
            warn!("Cartfile missing; no package is marked direct");
            Vec::new()
        };
        let checkouts = ctx.root.join("Carthage").join("Checkouts");
        Ok(build_carthage_items(&resolved, &declared, &checkouts, ctx.classify))
    }
}

pub fn build_carthage_items(
    resolved: &[CartfileEntry],
    declared: &[CartfileEntry],
    checkouts: &Path,
    classify: bool,
) -> Vec<DependencyItem> {
    let mut tree = RelationTree::new();
    let entries = resolved
        .iter()
        .map(|entry| {
            let name = entry.name();
            let key = PackageKey::new(&name, &entry.version);
            if declared.iter().any(|d| d.source == entry.source) {
                tree.add_direct(&key);
            } else {
                tree.record(&key);
            }

            let url = entry.url();
            let repo = name.rsplit('/').next().unwrap_or(&name).to_string();
            let mut item = OssItem::new(&name, &entry.version);
            item.homepage = url.clone();
            item.download_location = url.clone();
            if let Some(license) = license_in_dir(&checkouts.join(repo)) {
                item.license = license;
            }
            if entry.origin == "binary" {
                item.comment = "binary framework".to_string();
            }
            PackageEntry::new(key, item).with_url(url)
        })
        .collect();
    assemble(Ecosystem::Carthage, entries, &tree, classify)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;
    use serde_json::json;
    use tempfile::TempDir;

    const PODFILE_LOCK: &str = r#"PODS:
  - Alamofire (5.6.4)
  - FirebaseCore (10.0.0):
    - GoogleUtilities/Environment (~> 7.8)
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
    - GoogleUtilities

EXTERNAL SOURCES:
  LocalPod:
    :path: "../LocalPod"
"#;

    #[test]
    fn test_pod_items() {
        let lock = parse_podfile_lock(PODFILE_LOCK).unwrap();
        let mut specs = HashMap::new();
        specs.insert(
            "Alamofire".to_string(),
            json!({
                "license": {"type": "MIT", "file": "LICENSE"},
                "homepage": "https://github.com/Alamofire/Alamofire",
                "source": {"git": "https://github.com/Alamofire/Alamofire.git", "tag": "5.6.4"}
            }),
        );
        let items = build_pod_items(&lock, &specs, true);
        assert_eq!(items.len(), 4);

        let alamofire = &items[0];
        assert_eq!(alamofire.purl, "pkg:cocoapods/Alamofire@5.6.4");
        assert_eq!(alamofire.classification, Some(Classification::Direct));
        assert_eq!(alamofire.oss_items[0].license, "MIT");
        assert_eq!(
            alamofire.oss_items[0].download_location,
            "https://github.com/Alamofire/Alamofire"
        );

        let core = &items[1];
        assert_eq!(
            core.depends_on,
            vec!["pkg:cocoapods/GoogleUtilities@7.10.0#Environment".to_string()]
        );
        assert_eq!(core.oss_items[0].homepage, "https://cocoapods.org/pods/FirebaseCore");

        assert_eq!(items[2].classification, Some(Classification::Transitive));
        assert_eq!(items[3].classification, Some(Classification::Local));
    }

    #[test]
    fn test_package_resolved_versions() {
        let v1 = r#"{"object": {"pins": [
            {"package": "Alamofire", "repositoryURL": "https://github.com/Alamofire/Alamofire.git",
             "state": {"branch": null, "revision": "abc", "version": "5.6.4"}}
        ]}, "version": 1}"#;
        let v2 = r#"{"pins": [
            {"identity": "swift-log", "kind": "remoteSourceControl",
             "location": "https://github.com/apple/swift-log.git",
             "state": {"revision": "def", "version": "1.5.2"}},
            {"identity": "pinned-branch", "location": "https://github.com/a/pinned-branch",
             "state": {"branch": "main", "revision": "123"}}
        ], "version": 2}"#;

        let pins = parse_package_resolved(v1).unwrap();
        assert_eq!(pins[0].identity, "alamofire");
        assert_eq!(pins[0].version, "5.6.4");

        let pins = parse_package_resolved(v2).unwrap();
        assert_eq!(pins.len(), 2);
        assert_eq!(pins[1].version, "main");
        assert!(parse_package_resolved(r#"{"version": 2}"#).is_err());
    }

    #[test]
    fn test_swift_items_with_tree() {
        let pins = vec![
            SwiftPin {
                identity: "swift-nio".to_string(),
                location: "https://github.com/apple/swift-nio.git".to_string(),
                version: "2.50.0".to_string(),
            },
            SwiftPin {
                identity: "swift-atomics".to_string(),
                location: "https://github.com/apple/swift-atomics.git".to_string(),
                version: "1.1.0".to_string(),
            },
        ];
        let doc = json!({
            "identity": "server", "name": "server", "url": "/src/server", "version": "unspecified",
            "dependencies": [{
                "identity": "swift-nio", "name": "swift-nio",
                "url": "https://github.com/apple/swift-nio.git", "version": "2.50.0",
                "dependencies": [{
                    "identity": "swift-atomics", "name": "swift-atomics",
                    "url": "https://github.com/apple/swift-atomics.git", "version": "1.1.0",
                    "dependencies": []
                }]
            }]
        });
        let checkouts = TempDir::new().unwrap();
        let nio = checkouts.path().join("swift-nio");
        std::fs::create_dir_all(&nio).unwrap();
        std::fs::write(nio.join("LICENSE.txt"), "Apache License\n Version 2.0, January 2004").unwrap();

        let tree = parse_swift_tree(&doc).0;
        let items = build_swift_items(&pins, Some(tree), checkouts.path(), true);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].purl, "pkg:swift/github.com/apple/swift-nio@2.50.0");
        assert_eq!(items[0].classification, Some(Classification::Direct));
        assert_eq!(items[0].oss_items[0].license, "Apache-2.0");
        assert_eq!(
            items[0].depends_on,
            vec!["pkg:swift/github.com/apple/swift-atomics@1.1.0".to_string()]
        );
        assert_eq!(items[1].classification, Some(Classification::Transitive));

        let flat = build_swift_items(&pins, None, checkouts.path(), true);
        assert!(flat.iter().all(|i| i.classification.is_none()));
    }

    #[test]
    fn test_find_package_resolved_in_xcodeproj() {
        let dir = TempDir::new().unwrap();
        let swiftpm = dir
            .path()
            .join("App.xcodeproj")
            .join("project.xcworkspace")
            .join("xcshareddata")
            .join("swiftpm");
        std::fs::create_dir_all(&swiftpm).unwrap();
        std::fs::write(swiftpm.join("Package.resolved"), "{}").unwrap();
        assert_eq!(
            find_package_resolved(dir.path()),
            Some(swiftpm.join("Package.resolved"))
        );
    }

    #[test]
    fn test_cartfile() {
        let resolved = parse_cartfile(
            r#"binary "https://dl.example.com/Lib.json" "2.0.0"
github "Alamofire/Alamofire" "5.6.4"
git "https://gitlab.com/team/Kit.git" "1.2.0"
github "ReactiveCocoa/ReactiveSwift" "7.1.1"
"#,
        );
        let declared = parse_cartfile(
            "# networking\ngithub \"Alamofire/Alamofire\" ~> 5.0\ngit \"https://gitlab.com/team/Kit.git\"\n",
        );
        assert_eq!(resolved.len(), 4);
        assert_eq!(declared.len(), 2);
        assert_eq!(declared[0].version, "");

        let checkouts = TempDir::new().unwrap();
        let items = build_carthage_items(&resolved, &declared, checkouts.path(), true);
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].key.name(), "Lib");
        assert_eq!(items[0].oss_items[0].comment, "binary framework");

        let alamofire = &items[1];
        assert_eq!(alamofire.key.name(), "Alamofire/Alamofire");
        assert_eq!(alamofire.purl, "pkg:github/Alamofire/Alamofire@5.6.4");
        assert_eq!(alamofire.classification, Some(Classification::Direct));

        assert_eq!(items[2].oss_items[0].homepage, "https://gitlab.com/team/Kit");
        assert_eq!(items[2].classification, Some(Classification::Direct));
        assert_eq!(items[3].classification, Some(Classification::Transitive));
    }
}
