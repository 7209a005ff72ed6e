//! Canonical package identifiers ("purls").
//!
//! [`canonicalize`] is a pure function: it only looks at the URL and the
//! name/version it is handed. [`PurlMap`] memoizes it per [`PackageKey`] for
//! the lifetime of one ecosystem run.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::key::PackageKey;
use crate::models::Ecosystem;

static URL_PARTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z+]+://)?(?:[^@/]+@)?(?:www\.)?([^/:]+)(?::\d+)?[/:]?(.*)$")
        .expect("static regex")
});

/// Best-effort conversion of a well-known registry or forge URL to a purl.
///
/// Returns `None` for hosts that carry no package identity.
pub fn url_to_purl(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let caps = URL_PARTS.captures(url)?;
    let host = caps.get(1)?.as_str().to_lowercase();
    let path = caps
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or("")
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .trim_end_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match host.as_str() {
        "github.com" | "gitlab.com" | "bitbucket.org" => {
            let forge = host.split('.').next().unwrap_or("github");
            let owner = segments.first()?;
            let repo = segments.get(1)?.trim_end_matches(".git");
            let version = match segments.get(2).copied() {
                Some("tree") | Some("releases") => segments
                    .iter()
                    .skip(3)
                    .find(|s| **s != "tag")
                    .map(|s| s.to_string()),
                _ => None,
            };
            Some(with_optional_version(
                format!("pkg:{forge}/{owner}/{repo}"),
                version.as_deref(),
            ))
        }
        "npmjs.com" | "npmjs.org" => {
            let rest = match segments.first() {
                Some(&"package") => &segments[1..],
                _ => return None,
            };
            let (name, tail) = split_npm_name(rest)?;
            let version = match tail {
                ["v", version, ..] => Some(*version),
                _ => None,
            };
            Some(with_optional_version(
                format!("pkg:npm/{}", encode_npm_name(&name)),
                version,
            ))
        }
        "registry.npmjs.org" | "registry.yarnpkg.com" => {
            // <name>/-/<basename>-<version>.tgz
            let (name, tail) = split_npm_name(&segments)?;
            let version = match tail {
                ["-", file] => {
                    let base = name.rsplit('/').next().unwrap_or(&name);
                    file.strip_suffix(".tgz")
                        .and_then(|f| f.strip_prefix(base))
                        .and_then(|f| f.strip_prefix('-'))
                }
                [version] => Some(*version),
                _ => None,
            };
            Some(with_optional_version(
                format!("pkg:npm/{}", encode_npm_name(&name)),
                version,
            ))
        }
        "pypi.org" | "pypi.python.org" => match segments.as_slice() {
            ["project", name, rest @ ..] | ["pypi", name, rest @ ..] => Some(with_optional_version(
                format!("pkg:pypi/{}", name.to_lowercase()),
                rest.first().copied(),
            )),
            _ => None,
        },
        "crates.io" => match segments.as_slice() {
            ["crates", name, rest @ ..] => Some(with_optional_version(
                format!("pkg:cargo/{name}"),
                rest.first().copied(),
            )),
            _ => None,
        },
        "mvnrepository.com" => match segments.as_slice() {
            ["artifact", group, artifact, rest @ ..] => Some(with_optional_version(
                format!("pkg:maven/{group}/{artifact}"),
                rest.first().copied(),
            )),
            _ => None,
        },
        "repo1.maven.org" | "repo.maven.apache.org" | "search.maven.org" => {
            // maven2/<group path>/<artifact>/<version>/...
            let start = segments.iter().position(|s| *s == "maven2")? + 1;
            let coords = &segments[start..];
            if coords.len() < 3 {
                return None;
            }
            let (group, artifact, version) = if coords.len() >= 4
                && coords[coords.len() - 1].starts_with(coords[coords.len() - 3])
            {
                let n = coords.len() - 1;
                (coords[..n - 2].join("."), coords[n - 2], coords[n - 1])
            } else {
                let n = coords.len();
                (coords[..n - 2].join("."), coords[n - 2], coords[n - 1])
            };
            Some(format!("pkg:maven/{group}/{artifact}@{version}"))
        }
        "pkg.go.dev" => {
            let (module, version) = match path.split_once('@') {
                Some((m, v)) => (m, Some(v)),
                None => (path, None),
            };
            if module.is_empty() {
                return None;
            }
            Some(with_optional_version(format!("pkg:golang/{module}"), version))
        }
        "pub.dev" | "pub.dartlang.org" => match segments.as_slice() {
            ["packages", name, "versions", version, ..] => {
                Some(format!("pkg:pub/{name}@{version}"))
            }
            ["packages", name, ..] => Some(format!("pkg:pub/{name}")),
            _ => None,
        },
        "cocoapods.org" => match segments.as_slice() {
            ["pods", name, ..] => Some(format!("pkg:cocoapods/{name}")),
            _ => None,
        },
        "nuget.org" => match segments.as_slice() {
            ["packages", name, rest @ ..] => Some(with_optional_version(
                format!("pkg:nuget/{name}"),
                rest.first().copied(),
            )),
            _ => None,
        },
        _ => None,
    }
}

/// Produce the canonical purl for one package.
///
/// The generic URL conversion wins when it yields the ecosystem's own purl
/// type; otherwise an ecosystem template is applied, and finally
/// `pkg:<type>/<name>@<version>`.
pub fn canonicalize(
    ecosystem: Ecosystem,
    name: &str,
    version: &str,
    url: Option<&str>,
) -> String {
    let prefix = format!("pkg:{}/", ecosystem.purl_type());

    if let Some(generic) = url.and_then(url_to_purl) {
        let github_ok = matches!(ecosystem, Ecosystem::Carthage | Ecosystem::Unity)
            && generic.starts_with("pkg:github/");
        let subspec = ecosystem == Ecosystem::Cocoapods && name.contains('/');
        if (generic.starts_with(&prefix) || github_ok) && !subspec {
            if has_version(&generic) || version.is_empty() {
                return generic;
            }
            return format!("{generic}@{}", version_for(ecosystem, version));
        }
    }

    match ecosystem {
        Ecosystem::Maven | Ecosystem::Gradle | Ecosystem::Android => {
            match name.split_once(':') {
                Some((group, artifact)) => {
                    with_optional_version(format!("pkg:maven/{group}/{artifact}"), non_empty(version))
                }
                None => fallback(ecosystem, name, version),
            }
        }
        Ecosystem::Cocoapods => {
            let (pod, subspec) = match name.split_once('/') {
                Some((pod, sub)) => (pod, Some(sub)),
                None => (name, None),
            };
            let purl = with_optional_version(format!("pkg:cocoapods/{pod}"), non_empty(version));
            match subspec {
                Some(sub) if !sub.is_empty() => format!("{purl}#{sub}"),
                _ => purl,
            }
        }
        Ecosystem::Swift => match url.and_then(repository_path) {
            Some(path) => with_optional_version(format!("pkg:swift/{path}"), non_empty(version)),
            None => fallback(ecosystem, name, version),
        },
        Ecosystem::Carthage | Ecosystem::Unity => match url.and_then(repository_path) {
            Some(path) if path.starts_with("github.com/") => with_optional_version(
                format!("pkg:github/{}", &path["github.com/".len()..]),
                non_empty(version),
            ),
            _ => fallback(ecosystem, name, version),
        },
        _ => fallback(ecosystem, name, version),
    }
}

/// Memoized [`canonicalize`] results for one ecosystem run.
#[derive(Debug, Default)]
pub struct PurlMap {
    map: HashMap<PackageKey, String>,
}

impl PurlMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PackageKey) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Return the cached purl for `key`, computing it once with `make`.
    pub fn get_or_compute(&mut self, key: &PackageKey, make: impl FnOnce() -> String) -> &str {
        self.map.entry(key.clone()).or_insert_with(make)
    }
}

fn fallback(ecosystem: Ecosystem, name: &str, version: &str) -> String {
    let name = match ecosystem.purl_type() {
        "npm" => encode_npm_name(name),
        _ => name.to_string(),
    };
    with_optional_version(
        format!("pkg:{}/{}", ecosystem.purl_type(), name),
        non_empty(&version_for(ecosystem, version)),
    )
}

/// Go purls carry the module version exactly as `go` prints it.
fn version_for(ecosystem: Ecosystem, version: &str) -> String {
    if ecosystem == Ecosystem::Go && !version.is_empty() && !version.starts_with('v') {
        format!("v{version}")
    } else {
        version.to_string()
    }
}

fn has_version(purl: &str) -> bool {
    purl.split('#').next().unwrap_or(purl).contains('@')
}

fn with_optional_version(base: String, version: Option<&str>) -> String {
    match version {
        Some(v) if !v.is_empty() => format!("{base}@{v}"),
        _ => base,
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn encode_npm_name(name: &str) -> String {
    match name.strip_prefix('@') {
        Some(scoped) => format!("%40{scoped}"),
        None => name.to_string(),
    }
}

/// Split `[@scope, name, rest..]` or `[name, rest..]` path segments.
fn split_npm_name<'a, 'b>(segments: &'b [&'a str]) -> Option<(String, &'b [&'a str])> {
    let first = segments.first()?;
    let first = first.replace("%40", "@");
    if first.starts_with('@') {
        let second = segments.get(1)?;
        Some((format!("{first}/{second}"), &segments[2..]))
    } else {
        Some((first, &segments[1..]))
    }
}

/// `https://github.com/owner/repo.git` -> `github.com/owner/repo`.
fn repository_path(url: &str) -> Option<String> {
    let caps = URL_PARTS.captures(url.trim())?;
    let host = caps.get(1)?.as_str().to_lowercase();
    let path = caps.get(2)?.as_str().trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    Some(format!("{host}/{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_when_no_url() {
        assert_eq!(
            canonicalize(Ecosystem::Cargo, "foo", "1.0.0", None),
            "pkg:cargo/foo@1.0.0"
        );
    }

    #[test]
    fn test_generic_urls() {
        assert_eq!(
            url_to_purl("https://github.com/serde-rs/serde").as_deref(),
            Some("pkg:github/serde-rs/serde")
        );
        assert_eq!(
            url_to_purl("https://www.npmjs.com/package/@babel/core/v/7.20.0").as_deref(),
            Some("pkg:npm/%40babel/core@7.20.0")
        );
        assert_eq!(
            url_to_purl("https://registry.npmjs.org/lodash/-/lodash-4.17.21.tgz").as_deref(),
            Some("pkg:npm/lodash@4.17.21")
        );
        assert_eq!(
            url_to_purl("https://pypi.org/project/Requests/2.31.0").as_deref(),
            Some("pkg:pypi/requests@2.31.0")
        );
        assert_eq!(
            url_to_purl("https://mvnrepository.com/artifact/junit/junit/4.13.2").as_deref(),
            Some("pkg:maven/junit/junit@4.13.2")
        );
        assert_eq!(
            url_to_purl("https://pkg.go.dev/golang.org/x/text@v0.3.7").as_deref(),
            Some("pkg:golang/golang.org/x/text@v0.3.7")
        );
        assert_eq!(
            url_to_purl("https://repo1.maven.org/maven2/org/slf4j/slf4j-api/1.7.36/slf4j-api-1.7.36.jar")
                .as_deref(),
            Some("pkg:maven/org.slf4j/slf4j-api@1.7.36")
        );
        assert_eq!(url_to_purl("https://example.com/foo"), None);
        assert_eq!(url_to_purl(""), None);
    }

    #[test]
    fn test_version_appended_to_generic_purl() {
        assert_eq!(
            canonicalize(Ecosystem::Pub, "http", "0.13.5", Some("https://pub.dev/packages/http")),
            "pkg:pub/http@0.13.5"
        );
    }

    #[test]
    fn test_prefix_mismatch_uses_template() {
        // homepage on github, but the package is a pypi one
        assert_eq!(
            canonicalize(
                Ecosystem::Pypi,
                "requests",
                "2.31.0",
                Some("https://github.com/psf/requests")
            ),
            "pkg:pypi/requests@2.31.0"
        );
        assert_eq!(
            canonicalize(Ecosystem::Gradle, "com.google.guava:guava", "31.1-jre", None),
            "pkg:maven/com.google.guava/guava@31.1-jre"
        );
    }

    #[test]
    fn test_cocoapods_subspec() {
        assert_eq!(
            canonicalize(
                Ecosystem::Cocoapods,
                "GoogleUtilities/NSData+zlib",
                "7.11.0",
                Some("https://github.com/google/GoogleUtilities")
            ),
            "pkg:cocoapods/GoogleUtilities@7.11.0#NSData+zlib"
        );
    }

    #[test]
    fn test_swift_and_carthage() {
        assert_eq!(
            canonicalize(
                Ecosystem::Swift,
                "alamofire",
                "5.6.4",
                Some("https://github.com/Alamofire/Alamofire.git")
            ),
            "pkg:swift/github.com/Alamofire/Alamofire@5.6.4"
        );
        assert_eq!(
            canonicalize(
                Ecosystem::Carthage,
                "ReactiveCocoa",
                "12.0.0",
                Some("https://github.com/ReactiveCocoa/ReactiveCocoa")
            ),
            "pkg:github/ReactiveCocoa/ReactiveCocoa@12.0.0"
        );
    }

    #[test]
    fn test_go_keeps_v_prefix() {
        assert_eq!(
            canonicalize(Ecosystem::Go, "github.com/pkg/errors", "0.9.1", None),
            "pkg:golang/github.com/pkg/errors@v0.9.1"
        );
    }

    #[test]
    fn test_npm_scope_encoding() {
        assert_eq!(
            canonicalize(Ecosystem::Npm, "@types/node", "18.0.0", None),
            "pkg:npm/%40types/node@18.0.0"
        );
    }

    #[test]
    fn test_purl_map_memoizes() {
        let mut map = PurlMap::new();
        let key = PackageKey::new("foo", "1.0.0");
        let mut calls = 0;
        map.get_or_compute(&key, || {
            calls += 1;
            "pkg:cargo/foo@1.0.0".to_string()
        });
        map.get_or_compute(&key, || {
            calls += 1;
            String::new()
        });
        assert_eq!(calls, 1);
        assert_eq!(map.get(&key), Some("pkg:cargo/foo@1.0.0"));
    }
}
