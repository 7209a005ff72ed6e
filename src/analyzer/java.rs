use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, warn};

use super::{Analyzer, ScanContext};
use crate::error::{read_to_string, ScanError, ScanResult};
use crate::graph::{assemble, PackageEntry, RelationTree};
use crate::license::spdx::normalize;
use crate::models::{DependencyItem, Ecosystem, OssItem};
use crate::parser::branch_tree::{parse_gradle_tree, parse_maven_tree};

const MAVEN_URL: &str = "https://mvnrepository.com/artifact/";

/// Declares an `allDeps` report task in every project without touching the
/// build scripts.
const GRADLE_INIT_SCRIPT: &str = "allprojects {\n    task allDeps(type: DependencyReportTask) {}\n}\n";

/// License data from a build plugin report, keyed by `group:artifact`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LicenseInfo {
    pub license: String,
    pub homepage: Option<String>,
}

pub type LicenseMap = HashMap<String, LicenseInfo>;

fn wrapper_or(root: &Path, wrapper: &str, fallback: &str) -> String {
    let script = root.join(wrapper);
    if script.is_file() {
        script.to_string_lossy().into_owned()
    } else {
        fallback.to_string()
    }
}

/// Maven projects, through `dependency:tree`.
pub struct MavenAnalyzer;

impl MavenAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Analyzer for MavenAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Maven
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let pom = ctx.root.join("pom.xml");
        if !pom.is_file() {
            return Err(ScanError::ManifestMissing { path: pom });
        }
        let mvn = wrapper_or(&ctx.root, "mvnw", "mvn");
        let scratch = TempDir::new().map_err(|e| ScanError::io(std::env::temp_dir(), e))?;
        let output = scratch.path().join("dependency-tree.txt");

        ctx.runner
            .command(&mvn, &ctx.root)
            .args(["-B", "dependency:tree"])
            .arg(format!("-DoutputFile={}", output.display()))
            .arg("-DappendOutput=true")
            .run()
            .await?;
        let text = read_to_string(&output)?;
        let tree = parse_maven_tree(&text);

        let licenses_xml = ctx
            .root
            .join("target")
            .join("generated-resources")
            .join("licenses.xml");
        let licenses = if licenses_xml.is_file() {
            parse_licenses_xml(&read_to_string(&licenses_xml)?)
        } else {
            debug!(path = %licenses_xml.display(), "no license plugin report");
            LicenseMap::new()
        };

        Ok(build_items(Ecosystem::Maven, &tree, &licenses, ctx.classify))
    }
}

/// Gradle and Android projects, through an injected `allDeps` task.
pub struct GradleAnalyzer {
    ecosystem: Ecosystem,
}

impl GradleAnalyzer {
    pub fn new(ecosystem: Ecosystem) -> Self {
        Self { ecosystem }
    }

    fn license_report(&self, ctx: &ScanContext) -> ScanResult<LicenseMap> {
        let (path, parse): (PathBuf, fn(&str) -> LicenseMap) = match self.ecosystem {
            Ecosystem::Android => {
                let name = "android_dependency_output.txt";
                let in_root = ctx.root.join(name);
                let path = if in_root.is_file() {
                    in_root
                } else {
                    ctx.root.join(&ctx.config.gradle.android_app).join(name)
                };
                (path, parse_android_report)
            }
            _ => (
                ctx.root
                    .join("build")
                    .join("reports")
                    .join("license")
                    .join("dependency-license.json"),
                parse_gradle_license_report,
            ),
        };
        if !path.is_file() {
            debug!(path = %path.display(), "no license plugin report");
            return Ok(LicenseMap::new());
        }
        Ok(parse(&read_to_string(&path)?))
    }
}

#[async_trait]
impl Analyzer for GradleAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        self.ecosystem
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let gradle = wrapper_or(&ctx.root, "gradlew", "gradle");
        let scratch = TempDir::new().map_err(|e| ScanError::io(std::env::temp_dir(), e))?;
        let init = scratch.path().join("all-deps.gradle");
        std::fs::write(&init, GRADLE_INIT_SCRIPT).map_err(|e| ScanError::io(&init, e))?;

        let (task, configurations) = match self.ecosystem {
            Ecosystem::Android => (
                format!(":{}:allDeps", ctx.config.gradle.android_app),
                &ctx.config.gradle.android_configurations,
            ),
            _ => ("allDeps".to_string(), &ctx.config.gradle.configurations),
        };
        let text = ctx
            .runner
            .command(&gradle, &ctx.root)
            .args(["-q", "--init-script"])
            .arg(init.to_string_lossy())
            .arg(task)
            .capture()
            .await?;

        let tree = parse_gradle_tree(self.ecosystem, &text, configurations);
        let licenses = self.license_report(ctx)?;
        Ok(build_items(self.ecosystem, &tree, &licenses, ctx.classify))
    }
}

/// Every package of the tree, with license data where the plugin report has it.
pub fn build_items(
    ecosystem: Ecosystem,
    tree: &RelationTree,
    licenses: &LicenseMap,
    classify: bool,
) -> Vec<DependencyItem> {
    let entries = tree
        .total()
        .iter()
        .filter(|key| !tree.is_root(key))
        .map(|key| {
            let (group, artifact) = key.name().split_once(':').unwrap_or(("", key.name()));
            let homepage = format!("{MAVEN_URL}{group}/{artifact}");
            let download = format!("{homepage}/{}", key.version());

            let mut item = OssItem::new(key.name(), key.version());
            item.download_location = download.clone();
            item.homepage = homepage;
            if let Some(info) = licenses.get(key.name()) {
                item.license = info.license.clone();
                if let Some(home) = &info.homepage {
                    item.homepage = home.clone();
                }
            }
            PackageEntry::new(key.clone(), item).with_url(download)
        })
        .collect();
    assemble(ecosystem, entries, tree, classify)
}

fn join_licenses(names: &[String]) -> String {
    let mut ids: Vec<String> = Vec::new();
    for id in names.iter().map(|n| normalize(n).replace(',', "")) {
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids.join(",")
}

/// Parse `target/generated-resources/licenses.xml` from the license plugin.
pub fn parse_licenses_xml(content: &str) -> LicenseMap {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut map = LicenseMap::new();
    let mut buf = Vec::new();

    let mut in_dependency = false;
    let mut in_license = false;
    let mut current_tag = String::new();
    let mut group_id = String::new();
    let mut artifact_id = String::new();
    let mut license_names: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                match name.as_str() {
                    "dependency" => {
                        in_dependency = true;
                        group_id.clear();
                        artifact_id.clear();
                        license_names.clear();
                    }
                    "license" if in_dependency => in_license = true,
                    _ => {}
                }
                current_tag = name;
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned();
                match name.as_str() {
                    "dependency" if in_dependency => {
                        if !artifact_id.is_empty() {
                            map.insert(
                                format!("{group_id}:{artifact_id}"),
                                LicenseInfo {
                                    license: join_licenses(&license_names),
                                    homepage: None,
                                },
                            );
                        }
                        in_dependency = false;
                    }
                    "license" => in_license = false,
                    _ => {}
                }
                current_tag.clear();
            }
            Ok(Event::Text(ref e)) => {
                if in_dependency {
                    let text = e.unescape().unwrap_or_default().into_owned();
                    match current_tag.as_str() {
                        "groupId" if !in_license => group_id = text,
                        "artifactId" if !in_license => artifact_id = text,
                        "name" if in_license => license_names.push(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "stopping at malformed licenses.xml");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    map
}

/// Parse `build/reports/license/dependency-license.json`.
///
/// Entries name either `group:artifact:version` or only a jar file; the
/// latter carry no coordinates and are skipped.
pub fn parse_gradle_license_report(content: &str) -> LicenseMap {
    let doc: Value = match serde_json::from_str(content) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(error = %e, "unreadable gradle license report");
            return LicenseMap::new();
        }
    };
    let mut map = LicenseMap::new();
    for dep in doc
        .get("dependencies")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
    {
        let Some(name) = dep.get("name").and_then(Value::as_str) else {
            continue;
        };
        let mut parts = name.split(':');
        let (Some(group), Some(artifact), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
            debug!(name, "license entry without coordinates");
            continue;
        };
        let names: Vec<String> = dep
            .get("licenses")
            .and_then(Value::as_array)
            .map(|ls| {
                ls.iter()
                    .filter_map(|l| l.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        map.insert(
            format!("{group}:{artifact}"),
            LicenseInfo {
                license: join_licenses(&names),
                homepage: None,
            },
        );
    }
    map
}

/// Parse the tab separated `android_dependency_output.txt` report.
///
/// The first two lines are headers; rows carry
/// `index, manifest, name, version, license, download, homepage[, .., ..]`.
pub fn parse_android_report(content: &str) -> LicenseMap {
    content
        .lines()
        .skip(2)
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().split('\t').collect();
            if fields.len() != 7 && fields.len() != 9 {
                return None;
            }
            let homepage = fields[6].trim();
            Some((
                fields[2].to_string(),
                LicenseInfo {
                    license: join_licenses(&[fields[4].to_string()]),
                    homepage: (!homepage.is_empty()).then(|| homepage.to_string()),
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PackageKey;
    use crate::models::Classification;

    #[test]
    fn test_parse_licenses_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<licenseSummary>
  <dependencies>
    <dependency>
      <groupId>org.apache.commons</groupId>
      <artifactId>commons-lang3</artifactId>
      <version>3.12.0</version>
      <licenses>
        <license>
          <name>Apache License, Version 2.0</name>
          <url>https://www.apache.org/licenses/LICENSE-2.0.txt</url>
        </license>
      </licenses>
    </dependency>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <version>4.13.2</version>
      <licenses>
        <license><name>Eclipse Public License 1.0</name></license>
        <license><name>MIT License</name></license>
      </licenses>
    </dependency>
  </dependencies>
</licenseSummary>"#;
        let map = parse_licenses_xml(xml);
        assert_eq!(map.len(), 2);
        assert_eq!(map["org.apache.commons:commons-lang3"].license, "Apache-2.0");
        assert_eq!(map["junit:junit"].license, "Eclipse Public License 1.0,MIT");
    }

    #[test]
    fn test_parse_gradle_license_report() {
        let json = r#"{"dependencies": [
            {"moduleName": "com.google.guava:guava", "name": "com.google.guava:guava:31.1-jre",
             "file": "guava-31.1-jre.jar", "licenses": [{"name": "Apache 2.0", "url": ""}]},
            {"name": "local-lib.jar", "file": "local-lib.jar", "licenses": []}
        ]}"#;
        let map = parse_gradle_license_report(json);
        assert_eq!(map.len(), 1);
        assert_eq!(map["com.google.guava:guava"].license, "Apache-2.0");
        assert!(parse_gradle_license_report("not json").is_empty());
    }

    #[test]
    fn test_parse_android_report() {
        let text = "header\n---\n\
                    1\tbuild.gradle\tandroidx.core:core\t1.9.0\tApache-2.0\thttps://dl\thttps://developer.android.com\n\
                    broken\tline\n";
        let map = parse_android_report(text);
        assert_eq!(map.len(), 1);
        let info = &map["androidx.core:core"];
        assert_eq!(info.license, "Apache-2.0");
        assert_eq!(info.homepage.as_deref(), Some("https://developer.android.com"));
    }

    #[test]
    fn test_maven_items_skip_root() {
        let text = "\
[INFO] com.example:app:jar:1.0.0
[INFO] +- org.apache.commons:commons-lang3:jar:3.12.0:compile
[INFO] \\- junit:junit:jar:4.13.2:test
";
        let tree = parse_maven_tree(text);
        let mut licenses = LicenseMap::new();
        licenses.insert(
            "org.apache.commons:commons-lang3".to_string(),
            LicenseInfo {
                license: "Apache-2.0".to_string(),
                homepage: None,
            },
        );
        let items = build_items(Ecosystem::Maven, &tree, &licenses, true);
        assert_eq!(items.len(), 1);
        let lang = &items[0];
        assert_eq!(lang.key, PackageKey::new("org.apache.commons:commons-lang3", "3.12.0"));
        assert_eq!(lang.purl, "pkg:maven/org.apache.commons/commons-lang3@3.12.0");
        assert_eq!(lang.classification, Some(Classification::Direct));
        assert_eq!(lang.oss_items[0].license, "Apache-2.0");
        assert_eq!(
            lang.oss_items[0].download_location,
            "https://mvnrepository.com/artifact/org.apache.commons/commons-lang3/3.12.0"
        );
    }

    #[test]
    fn test_gradle_items() {
        let text = "\
runtimeClasspath - Runtime classpath of source set 'main'.
+--- com.squareup.okhttp3:okhttp:4.10.0
|    \\--- com.squareup.okio:okio:3.0.0 -> 3.2.0
\\--- com.google.guava:guava:31.1-jre

testRuntimeClasspath - Test runtime classpath.
\\--- junit:junit:4.13.2
";
        let tree = parse_gradle_tree(
            Ecosystem::Gradle,
            text,
            &["runtimeClasspath".to_string()],
        );
        let items = build_items(Ecosystem::Gradle, &tree, &LicenseMap::new(), true);
        assert_eq!(items.len(), 3);
        let okhttp = &items[0];
        assert_eq!(okhttp.depends_on, vec!["pkg:maven/com.squareup.okio/okio@3.2.0".to_string()]);
        let okio = items.iter().find(|i| i.key.name() == "com.squareup.okio:okio").unwrap();
        assert_eq!(okio.classification, Some(Classification::Transitive));
    }
}
