use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::Ecosystem;

static PYPI_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("static regex"));

/// `(name, version)` identity of a package within one ecosystem run.
///
/// Rendered as `name(version)`. Construct through [`PackageKey::for_ecosystem`]
/// when the name or version comes straight from a tool's output so that the
/// ecosystem's casing and separator rules are applied consistently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageKey {
    name: String,
    version: String,
}

impl PackageKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        PackageKey {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn for_ecosystem(ecosystem: Ecosystem, name: &str, version: &str) -> Self {
        PackageKey {
            name: normalize_name(ecosystem, name),
            version: normalize_version(ecosystem, version),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Same name, different version.
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        PackageKey {
            name: self.name.clone(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.version)
    }
}

pub fn normalize_name(ecosystem: Ecosystem, name: &str) -> String {
    let name = name.trim();
    match ecosystem {
        Ecosystem::Pypi => PYPI_SEPARATORS
            .replace_all(&name.to_lowercase(), "-")
            .into_owned(),
        Ecosystem::Swift | Ecosystem::Nuget => name.to_lowercase(),
        _ => name.to_string(),
    }
}

pub fn normalize_version(ecosystem: Ecosystem, version: &str) -> String {
    let version = version.trim();
    match ecosystem {
        Ecosystem::Go | Ecosystem::Helm => version.strip_prefix('v').unwrap_or(version).to_string(),
        Ecosystem::Maven | Ecosystem::Gradle | Ecosystem::Android => refine_version(version),
        _ => version.to_string(),
    }
}

/// Drop a trailing `.RELEASE` / `.FINAL` qualifier, ignoring case.
pub fn refine_version(version: &str) -> String {
    for suffix in [".RELEASE", ".FINAL"] {
        if version.len() > suffix.len() {
            let split = version.len() - suffix.len();
            if version.is_char_boundary(split) && version[split..].eq_ignore_ascii_case(suffix) {
                return version[..split].to_string();
            }
        }
    }
    version.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let key = PackageKey::new("a:b", "1.0");
        assert_eq!(key.to_string(), "a:b(1.0)");
        assert_eq!(PackageKey::new("weird(name)", "2.0").to_string(), "weird(name)(2.0)");
    }

    #[test]
    fn test_pypi_normalization() {
        let key = PackageKey::for_ecosystem(Ecosystem::Pypi, "Zope.Interface__Extra", "5.0");
        assert_eq!(key.name(), "zope-interface-extra");
    }

    #[test]
    fn test_case_insensitive_ecosystems() {
        assert_eq!(
            PackageKey::for_ecosystem(Ecosystem::Nuget, "Newtonsoft.Json", "13.0.1").name(),
            "newtonsoft.json"
        );
        assert_eq!(
            PackageKey::for_ecosystem(Ecosystem::Swift, "Alamofire", "5.6.0").name(),
            "alamofire"
        );
        assert_eq!(
            PackageKey::for_ecosystem(Ecosystem::Npm, "JSONStream", "1.3.5").name(),
            "JSONStream"
        );
    }

    #[test]
    fn test_go_version_prefix() {
        let key = PackageKey::for_ecosystem(Ecosystem::Go, "golang.org/x/text", "v0.3.7");
        assert_eq!(key.to_string(), "golang.org/x/text(0.3.7)");
    }

    #[test]
    fn test_refine_version() {
        assert_eq!(refine_version("5.3.23.RELEASE"), "5.3.23");
        assert_eq!(refine_version("4.1.50.Final"), "4.1.50");
        assert_eq!(refine_version("1.0-EASE"), "1.0-EASE");
        assert_eq!(refine_version(".FINAL"), ".FINAL");
        assert_eq!(refine_version("2.0"), "2.0");
    }
}
