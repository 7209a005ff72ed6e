use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::models::Ecosystem;

/// Manifest files, relative to the directory that holds them, that mark an
/// ecosystem. `build.gradle` is resolved to gradle or android separately.
const MANIFESTS: &[(&str, Ecosystem)] = &[
    ("package.json", Ecosystem::Npm),
    ("requirements.txt", Ecosystem::Pypi),
    ("setup.py", Ecosystem::Pypi),
    ("pyproject.toml", Ecosystem::Pypi),
    ("pom.xml", Ecosystem::Maven),
    ("go.mod", Ecosystem::Go),
    ("Cargo.toml", Ecosystem::Cargo),
    ("packages.config", Ecosystem::Nuget),
    ("obj/project.assets.json", Ecosystem::Nuget),
    ("Podfile.lock", Ecosystem::Cocoapods),
    ("Package.resolved", Ecosystem::Swift),
    ("Package.swift", Ecosystem::Swift),
    ("Cartfile.resolved", Ecosystem::Carthage),
    ("pubspec.yaml", Ecosystem::Pub),
    ("Chart.yaml", Ecosystem::Helm),
    ("Packages/manifest.json", Ecosystem::Unity),
];

const GRADLE_BUILD_FILES: [&str; 2] = ["build.gradle", "build.gradle.kts"];

/// Result of manifest discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Directory the ecosystems are analyzed in.
    pub root: PathBuf,
    pub ecosystems: Vec<Ecosystem>,
    pub manifests: Vec<PathBuf>,
}

/// Walk breadth-first from `path`, skipping `exclude_dirs`, and stop at the
/// first directory holding at least one known manifest.
pub fn detect_ecosystems(path: &Path, exclude_dirs: &[String], android_app: &str) -> Option<Detection> {
    let mut queue = VecDeque::from([path.to_path_buf()]);

    while let Some(dir) = queue.pop_front() {
        let (ecosystems, manifests) = ecosystems_in(&dir, android_app);
        if !ecosystems.is_empty() {
            info!(dir = %dir.display(), ?ecosystems, "manifests found");
            return Some(Detection {
                root: dir,
                ecosystems,
                manifests,
            });
        }

        let Ok(entries) = std::fs::read_dir(&dir) else {
            debug!(dir = %dir.display(), "unreadable directory");
            continue;
        };
        let mut children: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !exclude_dirs.iter().any(|x| x == n))
            })
            .collect();
        children.sort();
        queue.extend(children);
    }

    None
}

/// Ecosystems whose manifests sit directly in `dir`.
pub fn ecosystems_in(dir: &Path, android_app: &str) -> (Vec<Ecosystem>, Vec<PathBuf>) {
    let mut ecosystems: Vec<Ecosystem> = Vec::new();
    let mut manifests: Vec<PathBuf> = Vec::new();
    let mut push = |eco: Ecosystem, manifest: PathBuf| {
        if !ecosystems.contains(&eco) {
            ecosystems.push(eco);
        }
        manifests.push(manifest);
    };

    for (name, eco) in MANIFESTS {
        let manifest = dir.join(name);
        if manifest.is_file() {
            let eco = match eco {
                Ecosystem::Npm => node_flavor(dir),
                other => *other,
            };
            push(eco, manifest);
        }
    }

    if let Some(csproj) = first_with_extension(dir, "csproj") {
        push(Ecosystem::Nuget, csproj);
    }

    if let Some(build) = GRADLE_BUILD_FILES
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.is_file())
    {
        let eco = if is_android(dir, android_app) {
            Ecosystem::Android
        } else {
            Ecosystem::Gradle
        };
        push(eco, build);
    }

    ecosystems.sort();
    (ecosystems, manifests)
}

/// npm, yarn or pnpm, decided by the lock file next to `package.json`.
fn node_flavor(dir: &Path) -> Ecosystem {
    if dir.join("pnpm-lock.yaml").is_file() {
        Ecosystem::Pnpm
    } else if dir.join("yarn.lock").is_file() {
        Ecosystem::Yarn
    } else {
        Ecosystem::Npm
    }
}

fn is_android(dir: &Path, android_app: &str) -> bool {
    let app = dir.join(android_app);
    if GRADLE_BUILD_FILES.iter().any(|f| app.join(f).is_file()) {
        return true;
    }
    GRADLE_BUILD_FILES.iter().any(|f| {
        std::fs::read_to_string(dir.join(f)).is_ok_and(|s| s.contains("com.android"))
    })
}

fn first_with_extension(dir: &Path, ext: &str) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == ext))
        .collect();
    found.sort();
    found.into_iter().next()
}
