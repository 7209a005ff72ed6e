use serde::{Deserialize, Serialize};

use crate::graph::key::PackageKey;

/// Package ecosystems the scanner knows how to reconstruct a graph for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Npm,
    Yarn,
    Pnpm,
    Pypi,
    Maven,
    Gradle,
    Android,
    Go,
    Cargo,
    Nuget,
    Cocoapods,
    Swift,
    Carthage,
    Pub,
    Helm,
    Unity,
}

impl Ecosystem {
    #[cfg(test)]
    pub const ALL: [Ecosystem; 16] = [
        Ecosystem::Npm,
        Ecosystem::Yarn,
        Ecosystem::Pnpm,
        Ecosystem::Pypi,
        Ecosystem::Maven,
        Ecosystem::Gradle,
        Ecosystem::Android,
        Ecosystem::Go,
        Ecosystem::Cargo,
        Ecosystem::Nuget,
        Ecosystem::Cocoapods,
        Ecosystem::Swift,
        Ecosystem::Carthage,
        Ecosystem::Pub,
        Ecosystem::Helm,
        Ecosystem::Unity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::Yarn => "yarn",
            Ecosystem::Pnpm => "pnpm",
            Ecosystem::Pypi => "pypi",
            Ecosystem::Maven => "maven",
            Ecosystem::Gradle => "gradle",
            Ecosystem::Android => "android",
            Ecosystem::Go => "go",
            Ecosystem::Cargo => "cargo",
            Ecosystem::Nuget => "nuget",
            Ecosystem::Cocoapods => "cocoapods",
            Ecosystem::Swift => "swift",
            Ecosystem::Carthage => "carthage",
            Ecosystem::Pub => "pub",
            Ecosystem::Helm => "helm",
            Ecosystem::Unity => "unity",
        }
    }

    /// The package-url `type` component used for this ecosystem.
    pub fn purl_type(&self) -> &'static str {
        match self {
            Ecosystem::Npm | Ecosystem::Yarn | Ecosystem::Pnpm => "npm",
            Ecosystem::Maven | Ecosystem::Gradle | Ecosystem::Android => "maven",
            Ecosystem::Go => "golang",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved occurrence of a package.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OssItem {
    pub name: String,
    pub version: String,
    /// Comma-joined when a package declares several licenses.
    pub license: String,
    pub homepage: String,
    pub download_location: String,
    /// Caveat text; the classification tag is prepended when rows are built.
    pub comment: String,
    pub exclude: bool,
}

impl OssItem {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        OssItem {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }
}

/// Where a package sits in the dependency graph of one ecosystem run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Classification {
    Root,
    Local,
    Direct,
    Transitive,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Root => write!(f, "root package"),
            Classification::Local => write!(f, "local package"),
            Classification::Direct => write!(f, "direct"),
            Classification::Transitive => write!(f, "transitive"),
        }
    }
}

/// A distinct package of one ecosystem run together with its resolved edges.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyItem {
    pub ecosystem: Ecosystem,
    pub key: PackageKey,
    pub oss_items: Vec<OssItem>,
    pub purl: String,
    pub depends_on_raw: Vec<PackageKey>,
    pub depends_on: Vec<String>,
    pub classification: Option<Classification>,
}

impl DependencyItem {
    /// Flatten into report rows, one per owned [`OssItem`].
    pub fn rows(&self) -> Vec<ReportRow> {
        self.oss_items
            .iter()
            .map(|oss| {
                let mut comment: Vec<String> = Vec::new();
                if let Some(tag) = self.classification {
                    comment.push(tag.to_string());
                }
                if !oss.comment.is_empty() {
                    comment.push(oss.comment.clone());
                }
                ReportRow {
                    purl: self.purl.clone(),
                    name: oss.name.clone(),
                    version: oss.version.clone(),
                    license: oss.license.clone(),
                    download_location: oss.download_location.clone(),
                    homepage: oss.homepage.clone(),
                    exclude: oss.exclude,
                    comment: comment.join(", "),
                    depends_on: self.depends_on.clone(),
                }
            })
            .collect()
    }
}

/// The row shape every report writer consumes. Field order is part of the
/// output contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub purl: String,
    pub name: String,
    pub version: String,
    pub license: String,
    pub download_location: String,
    pub homepage: String,
    pub exclude: bool,
    pub comment: String,
    pub depends_on: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(classification: Option<Classification>, caveat: &str) -> DependencyItem {
        let mut oss = OssItem::new("foo", "1.0.0");
        oss.license = "MIT".to_string();
        oss.comment = caveat.to_string();
        DependencyItem {
            ecosystem: Ecosystem::Cargo,
            key: PackageKey::new("foo", "1.0.0"),
            oss_items: vec![oss],
            purl: "pkg:cargo/foo@1.0.0".to_string(),
            depends_on_raw: Vec::new(),
            depends_on: vec!["pkg:cargo/bar@0.2.0".to_string()],
            classification,
        }
    }

    #[test]
    fn test_row_comment_joins_tag_and_caveat() {
        let rows = item(Some(Classification::Direct), "license from nuspec").rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].comment, "direct, license from nuspec");
    }

    #[test]
    fn test_row_comment_without_classification() {
        let rows = item(None, "").rows();
        assert_eq!(rows[0].comment, "");
    }

    #[test]
    fn test_row_field_order() {
        let rows = item(Some(Classification::Root), "").rows();
        let json = serde_json::to_string(&rows[0]).unwrap();
        let fields = [
            "\"purl\"",
            "\"name\"",
            "\"version\"",
            "\"license\"",
            "\"download_location\"",
            "\"homepage\"",
            "\"exclude\"",
            "\"comment\"",
            "\"depends_on\"",
        ];
        let positions: Vec<usize> = fields.iter().map(|f| json.find(f).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_purl_types() {
        assert_eq!(Ecosystem::Yarn.purl_type(), "npm");
        assert_eq!(Ecosystem::Android.purl_type(), "maven");
        assert_eq!(Ecosystem::Go.purl_type(), "golang");
        assert_eq!(Ecosystem::Helm.purl_type(), "helm");
    }
}
