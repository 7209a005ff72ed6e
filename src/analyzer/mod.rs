//! Per-ecosystem analyzers.
//!
//! Each analyzer runs (or reads the output of) the ecosystem's own tooling,
//! rebuilds the [`RelationTree`](crate::graph::RelationTree) with one of the
//! [`parser`](crate::parser) families, gathers package metadata and hands
//! both to [`assemble`](crate::graph::assemble).

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::Config;
use crate::error::ScanResult;
use crate::license::spdx::detect_from_text;
use crate::models::{DependencyItem, Ecosystem};
use crate::runner::ToolRunner;

pub mod apple;
pub mod dart;
pub mod dotnet;
pub mod go;
pub mod helm;
pub mod java;
pub mod node;
pub mod python;
pub mod rust;
pub mod unity;

/// Inputs shared by every analyzer of one scan.
#[derive(Debug, Clone)]
pub struct ScanContext {
    /// Directory holding the manifests.
    pub root: PathBuf,
    pub config: Config,
    pub runner: ToolRunner,
    /// Classify packages and resolve `depends_on`.
    pub classify: bool,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    fn ecosystem(&self) -> Ecosystem;

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>>;
}

/// The analyzer responsible for `ecosystem`.
pub fn analyzer_for(ecosystem: Ecosystem) -> Box<dyn Analyzer> {
    match ecosystem {
        Ecosystem::Npm | Ecosystem::Yarn | Ecosystem::Pnpm => {
            Box::new(node::NodeAnalyzer::new(ecosystem))
        }
        Ecosystem::Pypi => Box::new(python::PythonAnalyzer::new()),
        Ecosystem::Maven => Box::new(java::MavenAnalyzer::new()),
        Ecosystem::Gradle | Ecosystem::Android => Box::new(java::GradleAnalyzer::new(ecosystem)),
        Ecosystem::Go => Box::new(go::GoAnalyzer::new()),
        Ecosystem::Cargo => Box::new(rust::CargoAnalyzer::new()),
        Ecosystem::Nuget => Box::new(dotnet::NugetAnalyzer::new()),
        Ecosystem::Cocoapods => Box::new(apple::CocoapodsAnalyzer::new()),
        Ecosystem::Swift => Box::new(apple::SwiftAnalyzer::new()),
        Ecosystem::Carthage => Box::new(apple::CarthageAnalyzer::new()),
        Ecosystem::Pub => Box::new(dart::PubAnalyzer::new()),
        Ecosystem::Helm => Box::new(helm::HelmAnalyzer::new()),
        Ecosystem::Unity => Box::new(unity::UnityAnalyzer::new()),
    }
}

/// Normalize a repository URL from package metadata into a browsable one.
///
/// `git+https://`, `git://` and `git+ssh://git@` prefixes become `https://`,
/// scp-style `git@host:path` becomes `https://host/path`, and a trailing
/// `.git` is dropped.
pub fn normalize_repository_url(raw: &str) -> String {
    let url = raw.trim();
    let url = if let Some(rest) = url.strip_prefix("git+ssh://git@") {
        format!("https://{}", rest.replacen(':', "/", 1))
    } else if let Some(rest) = url
        .strip_prefix("git+https://")
        .or_else(|| url.strip_prefix("git://"))
        .or_else(|| url.strip_prefix("git+http://"))
    {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("git@") {
        format!("https://{}", rest.replacen(':', "/", 1))
    } else if let Some(rest) = url.strip_prefix("github:") {
        format!("https://github.com/{rest}")
    } else {
        url.to_string()
    };
    url.strip_suffix(".git").map(str::to_string).unwrap_or(url)
}

const LICENSE_FILES: [&str; 5] = ["LICENSE", "LICENSE.md", "LICENSE.txt", "LICENCE", "COPYING"];

/// Guess the license of a checked-out package from the license file at its
/// top level.
pub fn license_in_dir(dir: &Path) -> Option<String> {
    LICENSE_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
        .and_then(|p| std::fs::read_to_string(p).ok())
        .and_then(|text| detect_from_text(&text))
}
