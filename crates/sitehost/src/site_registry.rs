//! `SiteRegistry` — the loaded multisite configuration: domain -> mount map,
//! alias map, and the reverse distributor index.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use sitehost_errors::ConfigError;

use crate::config::{ConfigSource, SiteConfigRaw, SiteConfigTree};
use crate::fqdn;
use crate::identifier::DistributorIdentifier;
use crate::path_util;

type MountList = Vec<(String, DistributorIdentifier)>;

#[derive(Default)]
struct Inner {
    domains: HashMap<String, MountList>,
    alias: HashMap<String, String>,
    reverse: HashMap<DistributorIdentifier, Vec<String>>,
}

/// Owns the loaded site configuration and exposes read access that never
/// observes a half-updated map: `reload` swaps the whole state behind a
/// `parking_lot::RwLock`.
pub struct SiteRegistry {
    inner: RwLock<Inner>,
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteRegistry {
    #[must_use]
    pub fn new() -> Self {
        SiteRegistry {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// The only mutator. Replaces every internal map atomically; invalid
    /// leaf entries (bad identifier syntax, no on-disk `dist.php`) are
    /// dropped with a `tracing::warn!`.
    pub fn reload(&self, source: &dyn ConfigSource, sites_root: &Path) -> Result<(), ConfigError> {
        let raw_value = source.load_site_config()?;
        let raw = SiteConfigRaw::from_json(&raw_value)?;

        let mut domains: HashMap<String, MountList> = HashMap::new();
        let mut reverse: HashMap<DistributorIdentifier, Vec<String>> = HashMap::new();

        for (domain, tree) in &raw.domains {
            let mut flattened = Vec::new();
            flatten_tree("/", tree, &mut flattened);

            let mut valid = Vec::new();
            for (url_path, id) in flattened {
                if source.distributor_config_exists(&id.code) {
                    valid.push((url_path, id));
                } else {
                    tracing::warn!(
                        domain = %domain,
                        url_path = %url_path,
                        identifier = %id,
                        "dropping site mount: no on-disk distributor config"
                    );
                }
            }

            let sorted = path_util::sort_by_depth_desc(valid);
            for (_, id) in &sorted {
                reverse.entry(id.clone()).or_default().push(domain.clone());
            }
            domains.insert(domain.clone(), sorted);
        }

        let mut guard = self.inner.write();
        guard.domains = domains;
        guard.alias = raw.alias.into_iter().collect();
        guard.reverse = reverse;
        Ok(())
    }

    /// All registered domain keys (canonical hosts and wildcard/catch-all
    /// patterns), for `fqdn::resolve_keys`.
    #[must_use]
    pub fn domain_keys(&self) -> Vec<String> {
        self.inner.read().domains.keys().cloned().collect()
    }

    #[must_use]
    pub fn alias_map(&self) -> HashMap<String, String> {
        self.inner.read().alias.clone()
    }

    #[must_use]
    pub fn mounts_for(&self, domain_key: &str) -> Option<MountList> {
        self.inner.read().domains.get(domain_key).cloned()
    }

    /// Every alias currently pointing at `canonical`.
    #[must_use]
    pub fn aliases_of(&self, canonical: &str) -> Vec<String> {
        self.inner
            .read()
            .alias
            .iter()
            .filter(|(_, c)| c.as_str() == canonical)
            .map(|(a, _)| a.clone())
            .collect()
    }

    /// Every domain this identifier is mounted under.
    #[must_use]
    pub fn domains_of(&self, id: &DistributorIdentifier) -> Vec<String> {
        self.inner.read().reverse.get(id).cloned().unwrap_or_default()
    }

    /// Resolve an FQDN to `(matchedDomainKey, mounts, effectiveAlias)`
    /// following the fixed resolution order.
    #[must_use]
    pub fn resolve_host(&self, raw_fqdn: &str) -> Option<(String, MountList, Option<String>)> {
        let formatted = fqdn::format(raw_fqdn);
        let keys = self.domain_keys();
        let alias = self.alias_map();
        let resolution = fqdn::resolve_keys(&formatted, keys.iter().map(String::as_str), &alias)?;
        let mounts = self.mounts_for(&resolution.matched_key)?;
        Some((resolution.matched_key, mounts, resolution.effective_alias))
    }
}

fn flatten_tree(prefix: &str, tree: &SiteConfigTree, out: &mut MountList) {
    match tree {
        SiteConfigTree::Leaf(id) => out.push((prefix.to_owned(), id.clone())),
        SiteConfigTree::Branch(children) => {
            for (segment, child) in children {
                let joined = path_util::join(&[prefix, segment]);
                flatten_tree(&joined, child, out);
            }
        }
    }
}
