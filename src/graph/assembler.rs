use std::collections::HashMap;

use tracing::debug;

use super::key::PackageKey;
use super::purl::{canonicalize, PurlMap};
use super::relation::RelationTree;
use crate::models::{Classification, DependencyItem, Ecosystem, OssItem};

/// Everything an analyzer knows about one package before assembly.
#[derive(Debug, Clone)]
pub struct PackageEntry {
    pub key: PackageKey,
    pub item: OssItem,
    /// URL handed to the canonicalizer (download location, homepage or repository).
    pub url: Option<String>,
    /// Workspace member rather than a third-party package.
    pub local: bool,
}

impl PackageEntry {
    pub fn new(key: PackageKey, item: OssItem) -> Self {
        PackageEntry {
            key,
            item,
            url: None,
            local: false,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.url = if url.is_empty() { None } else { Some(url) };
        self
    }

    pub fn local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }
}

/// Join package metadata with the relation tree.
///
/// Pass 1 computes a purl for every entry so that pass 2 can resolve edges
/// that point forward in the entry list. Edges whose target never became an
/// entry are dropped. With `classify` off the items carry no tag and no
/// `depends_on`.
pub fn assemble(
    ecosystem: Ecosystem,
    entries: Vec<PackageEntry>,
    tree: &RelationTree,
    classify: bool,
) -> Vec<DependencyItem> {
    let mut purls = PurlMap::new();
    let mut items: Vec<DependencyItem> = Vec::new();
    let mut local: Vec<bool> = Vec::new();
    let mut index: HashMap<PackageKey, usize> = HashMap::new();

    for entry in entries {
        // The first entry of a key fixes its purl for every later edge
        let purl = purls
            .get_or_compute(&entry.key, || {
                canonicalize(
                    ecosystem,
                    &entry.item.name,
                    &entry.item.version,
                    entry.url.as_deref(),
                )
            })
            .to_string();

        if let Some(&i) = index.get(&entry.key) {
            let existing = &mut items[i];
            if !existing
                .oss_items
                .iter()
                .any(|o| o.license == entry.item.license)
            {
                existing.oss_items.push(entry.item);
            }
            local[i] |= entry.local;
            continue;
        }

        index.insert(entry.key.clone(), items.len());
        local.push(entry.local);
        items.push(DependencyItem {
            ecosystem,
            depends_on_raw: tree.dependencies_of(&entry.key).to_vec(),
            key: entry.key,
            oss_items: vec![entry.item],
            purl,
            depends_on: Vec::new(),
            classification: None,
        });
    }

    if !classify {
        return items;
    }

    for (item, is_local) in items.iter_mut().zip(local) {
        item.depends_on = item
            .depends_on_raw
            .iter()
            .filter_map(|raw| match purls.get(raw) {
                Some(purl) => Some(purl.to_string()),
                None => {
                    debug!(%ecosystem, package = %item.key, edge = %raw, "dropping unresolved edge");
                    None
                }
            })
            .collect();

        item.classification = Some(if tree.is_root(&item.key) {
            Classification::Root
        } else if is_local {
            Classification::Local
        } else if tree.is_direct(&item.key) {
            Classification::Direct
        } else {
            Classification::Transitive
        });
    }

    items
}
