use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::{Analyzer, ScanContext};
use crate::error::{read_to_string, ScanError, ScanResult};
use crate::graph::{assemble, PackageEntry, PackageKey};
use crate::license::spdx::normalize;
use crate::models::{DependencyItem, Ecosystem, OssItem};
use crate::parser::json_tree::parse_pipdeptree;
use crate::runner::ToolCommand;

const PYPI_URL: &str = "https://pypi.org/project/";

/// Tools installed to inspect the environment; not part of the project.
const HELPER_PACKAGES: [&str; 9] = [
    "pip",
    "setuptools",
    "wheel",
    "pipdeptree",
    "pip-licenses",
    "prettytable",
    "ptable",
    "wcwidth",
    "tomli",
];

static REQUIREMENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9][A-Za-z0-9_\-\.]*)").expect("static regex"));

/// Analyzer for Python projects.
///
/// Inspects the configured interpreter, an in-project `venv`/`.venv`, or a
/// temporary virtualenv the manifest is installed into.
pub struct PythonAnalyzer;

impl PythonAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

/// The interpreter to inspect, plus the scratch venv that owns it (if any).
struct Environment {
    python: PathBuf,
    scratch: Option<TempDir>,
}

/// `python -m pip` without the version nag or interactive prompts.
fn pip(ctx: &ScanContext, python: &str) -> ToolCommand {
    ctx.runner
        .command(python, &ctx.root)
        .env("PIP_DISABLE_PIP_VERSION_CHECK", "1")
        .env("PIP_NO_INPUT", "1")
        .args(["-m", "pip"])
}

fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

impl PythonAnalyzer {
    async fn environment(&self, ctx: &ScanContext) -> ScanResult<Environment> {
        if let Some(python) = &ctx.config.python.interpreter {
            return Ok(Environment {
                python: python.clone(),
                scratch: None,
            });
        }
        for name in ["venv", ".venv"] {
            let python = venv_python(&ctx.root.join(name));
            if python.is_file() {
                debug!(python = %python.display(), "using project virtualenv");
                return Ok(Environment {
                    python,
                    scratch: None,
                });
            }
        }

        let scratch = TempDir::new().map_err(|e| ScanError::io(std::env::temp_dir(), e))?;
        let venv = scratch.path().join("venv");
        info!(venv = %venv.display(), "creating temporary virtualenv");
        ctx.runner
            .command("python3", &ctx.root)
            .args(["-m", "venv"])
            .arg(venv.to_string_lossy())
            .run()
            .await?;
        let python = venv_python(&venv);
        let python_str = python.to_string_lossy().into_owned();

        let install = pip(ctx, &python_str).args(["install", "-q"]);
        if ctx.root.join("requirements.txt").is_file() {
            install.args(["-r", "requirements.txt"]).run().await?;
        } else if ctx.root.join("setup.py").is_file() || ctx.root.join("pyproject.toml").is_file() {
            install.arg(".").run().await?;
        }

        Ok(Environment {
            python,
            scratch: Some(scratch),
        })
    }
}

#[async_trait]
impl Analyzer for PythonAnalyzer {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pypi
    }

    async fn analyze(&self, ctx: &ScanContext) -> ScanResult<Vec<DependencyItem>> {
        let env = self.environment(ctx).await?;
        let python = env.python.to_string_lossy().into_owned();

        // a user-owned environment gets back exactly what it had
        let before = match env.scratch {
            Some(_) => None,
            None => Some(installed_packages(ctx, &python).await?),
        };

        let outputs = inspect(ctx, &python).await;
        if let Some(before) = before {
            restore_environment(ctx, &python, &before).await;
        }
        let (tree_json, licenses_json) = outputs?;

        let tree_doc: Value = serde_json::from_str(&tree_json)
            .map_err(|e| ScanError::parse("pipdeptree output", e))?;
        let licenses_doc: Value = serde_json::from_str(&licenses_json)
            .map_err(|e| ScanError::parse("pip-licenses output", e))?;
        let declared = declared_requirements(&ctx.root)?;

        build_items(&tree_doc, &licenses_doc, &declared, ctx.classify)
    }
}

/// Install the helpers and capture the pipdeptree and pip-licenses documents.
async fn inspect(ctx: &ScanContext, python: &str) -> ScanResult<(String, String)> {
    pip(ctx, python)
        .args(["install", "-q", "pipdeptree", "pip-licenses"])
        .run()
        .await?;

    let tree_json = ctx
        .runner
        .command(python, &ctx.root)
        .args(["-m", "pipdeptree", "--json-tree"])
        .capture()
        .await?;
    let licenses_json = ctx
        .runner
        .command(python, &ctx.root)
        .args(["-m", "piplicenses", "--from=mixed", "--with-urls", "--format=json"])
        .capture()
        .await?;
    Ok((tree_json, licenses_json))
}

async fn installed_packages(ctx: &ScanContext, python: &str) -> ScanResult<Vec<String>> {
    let freeze = pip(ctx, python)
        .args(["list", "--format=freeze"])
        .capture()
        .await?;
    Ok(parse_freeze(&freeze))
}

/// Uninstall whatever the helper install added to the environment.
async fn restore_environment(ctx: &ScanContext, python: &str, before: &[String]) {
    let after = match installed_packages(ctx, python).await {
        Ok(after) => after,
        Err(e) => {
            warn!(error = %e, "cannot list packages; helper tools stay installed");
            return;
        }
    };
    let added = added_packages(before, &after);
    if added.is_empty() {
        return;
    }
    info!(packages = ?added, "removing helper tools");
    let result = pip(ctx, python)
        .args(["uninstall", "-y", "-q"])
        .args(added)
        .run()
        .await;
    if let Err(e) = result {
        warn!(error = %e, "cannot uninstall helper tools");
    }
}

/// Normalized names of `name==version` lines.
fn parse_freeze(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| REQUIREMENT_NAME.captures(line).map(|c| c[1].to_string()))
        .map(|name| PackageKey::for_ecosystem(Ecosystem::Pypi, &name, "").name().to_string())
        .collect()
}

fn added_packages(before: &[String], after: &[String]) -> Vec<String> {
    after.iter().filter(|name| !before.contains(name)).cloned().collect()
}

/// Join the pipdeptree graph with pip-licenses metadata.
///
/// Only packages reachable from a top-level package that is not one of the
/// helper tools are reported, so a helper's own dependencies drop out unless
/// the project needs them too. `declared` names from the manifest replace the
/// tree's top level as the direct set when present.
pub fn build_items(
    tree_doc: &Value,
    licenses_doc: &Value,
    declared: &[String],
    classify: bool,
) -> ScanResult<Vec<DependencyItem>> {
    let (mut tree, nodes) = parse_pipdeptree(tree_doc)?;
    let metadata = license_metadata(licenses_doc);

    let is_helper = |key: &PackageKey| {
        HELPER_PACKAGES.contains(&key.name()) && !declared.iter().any(|d| d == key.name())
    };
    let project_roots: Vec<&PackageKey> = tree.direct().iter().filter(|k| !is_helper(*k)).collect();
    let reachable = tree.reachable_from(project_roots);

    if !declared.is_empty() {
        let direct: Vec<PackageKey> = tree
            .total()
            .iter()
            .filter(|k| declared.iter().any(|d| d == k.name()))
            .cloned()
            .collect();
        tree.set_direct(direct);
    }

    let entries = nodes
        .iter()
        .filter(|node| {
            let keep = reachable.contains(&node.key);
            if !keep {
                debug!(package = %node.key, "only reachable from helper tools");
            }
            keep
        })
        .map(|node| {
            let mut item = OssItem::new(&node.name, &node.version);
            item.download_location = format!("{PYPI_URL}{}/{}", node.name, node.version);
            if let Some(meta) = metadata.get(node.key.name()) {
                item.license = meta.license.clone();
                item.homepage = meta.homepage.clone();
            }
            let url = item.download_location.clone();
            PackageEntry::new(node.key.clone(), item).with_url(url)
        })
        .collect();

    Ok(assemble(Ecosystem::Pypi, entries, &tree, classify))
}

#[derive(Debug, Clone, Default, PartialEq)]
struct PackageMetadata {
    license: String,
    homepage: String,
}

/// `pip-licenses --format=json` keyed by normalized package name.
fn license_metadata(doc: &Value) -> HashMap<String, PackageMetadata> {
    let text = |entry: &Value, field: &str| -> String {
        let value = match entry.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(";"),
            _ => String::new(),
        };
        if value == "UNKNOWN" {
            String::new()
        } else {
            value
        }
    };

    doc.as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[])
        .iter()
        .filter_map(|entry| {
            let name = entry.get("Name").and_then(Value::as_str)?;
            let license = text(entry, "License")
                .split(';')
                .map(normalize)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(",");
            let key = PackageKey::for_ecosystem(Ecosystem::Pypi, name, "");
            Some((
                key.name().to_string(),
                PackageMetadata {
                    license,
                    homepage: text(entry, "URL"),
                },
            ))
        })
        .collect()
}

/// Normalized names the project declares in `requirements.txt` or
/// `pyproject.toml`.
pub fn declared_requirements(root: &Path) -> ScanResult<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    let requirements = root.join("requirements.txt");
    if requirements.is_file() {
        names.extend(parse_requirements_txt(&read_to_string(&requirements)?));
    }
    let pyproject = root.join("pyproject.toml");
    if pyproject.is_file() {
        names.extend(parse_pyproject_toml(&read_to_string(&pyproject)?)?);
    }

    let mut normalized: Vec<String> = Vec::new();
    for name in names {
        let name = PackageKey::for_ecosystem(Ecosystem::Pypi, &name, "").name().to_string();
        if !normalized.contains(&name) {
            normalized.push(name);
        }
    }
    Ok(normalized)
}

/// Requirement names from `requirements.txt`; options and comments are skipped.
fn parse_requirements_txt(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(|line| REQUIREMENT_NAME.captures(line).map(|c| c[1].to_string()))
        .collect()
}

#[derive(Debug, Deserialize)]
struct Pyproject {
    project: Option<PyprojectProject>,
    tool: Option<PyprojectTool>,
}

#[derive(Debug, Deserialize)]
struct PyprojectProject {
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PyprojectTool {
    poetry: Option<PoetrySection>,
}

#[derive(Debug, Deserialize)]
struct PoetrySection {
    #[serde(default)]
    dependencies: HashMap<String, toml::Value>,
}

/// `[project].dependencies` and `[tool.poetry.dependencies]` names.
fn parse_pyproject_toml(content: &str) -> ScanResult<Vec<String>> {
    let pyproject: Pyproject =
        toml::from_str(content).map_err(|e| ScanError::parse("pyproject.toml", e))?;
    let mut names: Vec<String> = Vec::new();

    if let Some(project) = pyproject.project {
        names.extend(
            project
                .dependencies
                .iter()
                .filter_map(|d| REQUIREMENT_NAME.captures(d.trim()).map(|c| c[1].to_string())),
        );
    }
    if let Some(poetry) = pyproject.tool.and_then(|t| t.poetry) {
        let mut poetry_names: Vec<String> = poetry
            .dependencies
            .into_keys()
            .filter(|n| n != "python")
            .collect();
        poetry_names.sort();
        names.extend(poetry_names);
    }

    Ok(names)
}
