use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Root configuration structure, deserialized from `.dep-checkr/config.toml`.
///
/// Every section and field is optional; missing values fall back to
/// [`Config::default`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub gradle: GradleConfig,
    pub python: PythonConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    /// Upper bound for any single external tool run.
    pub timeout_secs: u64,
    /// Classify packages and resolve `depends_on`.
    pub direct: bool,
    /// Directory names never descended into while detecting manifests.
    pub exclude_dirs: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            timeout_secs: 600,
            direct: true,
            exclude_dirs: ["node_modules", "venv", ".venv", ".git", "target", "build"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ScanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GradleConfig {
    /// Configuration headers whose trees are parsed for plain gradle projects.
    pub configurations: Vec<String>,
    /// Same for android projects.
    pub android_configurations: Vec<String>,
    /// Application module of an android project.
    pub android_app: String,
}

impl Default for GradleConfig {
    fn default() -> Self {
        GradleConfig {
            configurations: vec!["runtimeClasspath".to_string(), "runtime".to_string()],
            android_configurations: vec!["releaseRuntimeClasspath".to_string()],
            android_app: "app".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PythonConfig {
    /// Interpreter of an already prepared environment.
    pub interpreter: Option<PathBuf>,
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
}

/// Load the configuration, searching in order:
///
/// 1. `config_override`, the path passed via `--config`
/// 2. `<project_path>/.dep-checkr/config.toml`
/// 3. `~/.config/dep-checkr/config.toml`
/// 4. Built-in [`Config::default`]
pub fn load_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return read_config(path);
    }

    let project_config = project_path.join(".dep-checkr").join("config.toml");
    if project_config.exists() {
        return read_config(&project_config);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".config").join("dep-checkr").join("config.toml");
        if home_config.exists() {
            return read_config(&home_config);
        }
    }

    Ok(Config::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.scan.timeout_secs, 600);
        assert!(cfg.scan.direct);
        assert!(cfg.scan.exclude_dirs.contains(&"node_modules".to_string()));
        assert_eq!(cfg.gradle.android_app, "app");
        assert_eq!(cfg.python.interpreter, None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[scan]
timeout_secs = 30

[gradle]
configurations = ["compileClasspath"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.scan.timeout(), Duration::from_secs(30));
        assert!(cfg.scan.direct);
        assert_eq!(cfg.gradle.configurations, vec!["compileClasspath".to_string()]);
        assert_eq!(
            cfg.gradle.android_configurations,
            vec!["releaseRuntimeClasspath".to_string()]
        );
    }

    #[test]
    fn test_project_config_is_found() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".dep-checkr")).unwrap();
        std::fs::write(
            dir.path().join(".dep-checkr").join("config.toml"),
            "[scan]\ndirect = false\n[python]\ninterpreter = \"/opt/venv/bin/python\"\n",
        )
        .unwrap();

        let cfg = load_config(dir.path(), None).unwrap();
        assert!(!cfg.scan.direct);
        assert_eq!(
            cfg.python.interpreter,
            Some(PathBuf::from("/opt/venv/bin/python"))
        );
    }

    #[test]
    fn test_override_wins_and_errors_surface() {
        let dir = TempDir::new().unwrap();
        let custom = dir.path().join("custom.toml");
        std::fs::write(&custom, "[scan]\ntimeout_secs = 5\n").unwrap();
        assert_eq!(
            load_config(dir.path(), Some(&custom)).unwrap().scan.timeout_secs,
            5
        );

        std::fs::write(&custom, "[scan\n").unwrap();
        assert!(load_config(dir.path(), Some(&custom)).is_err());
        assert!(load_config(dir.path(), Some(&dir.path().join("missing.toml"))).is_err());
    }
}
