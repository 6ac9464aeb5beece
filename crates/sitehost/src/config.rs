//! Config-node shapes and the `ConfigSource`/`RewriteSink` boundary traits.
//!
//! The file format is opaque to the core; everything here
//! consumes a `serde_json::Value` tree handed over by the host's codec and
//! never touches a filesystem path itself, except for the reference
//! `JsonFileConfigSource` used by tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
pub use sitehost_errors::ConfigError;

use crate::identifier::DistributorIdentifier;
use crate::module_info::ModuleManifest;

/// A site-config domain value: either a leaf mount or a nested branch that
/// recurses with joined URL paths. Replaces the dynamically-typed
/// "string or nested object" value the source config format allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteConfigTree {
    Leaf(DistributorIdentifier),
    Branch(BTreeMap<String, SiteConfigTree>),
}

/// The parsed (but not yet dist.php-validated) site configuration: an
/// ordered `domains` map and an `alias` map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteConfigRaw {
    pub domains: BTreeMap<String, SiteConfigTree>,
    pub alias: BTreeMap<String, String>,
}

impl SiteConfigRaw {
    /// A missing config file is equivalent to `{domains:{}, alias:{}}`.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the `domains`/`alias` top-level keys out of a JSON value.
    /// All other top-level keys are ignored.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let obj = value.as_object().ok_or_else(|| ConfigError::SiteConfigParse {
            path: PathBuf::new(),
            reason: "top-level site config must be a JSON object".to_owned(),
        })?;

        let mut domains = BTreeMap::new();
        if let Some(domains_val) = obj.get("domains") {
            let domains_obj = domains_val.as_object().ok_or_else(|| ConfigError::SiteConfigParse {
                path: PathBuf::new(),
                reason: "'domains' must be an object".to_owned(),
            })?;
            for (domain, tree) in domains_obj {
                domains.insert(domain.clone(), parse_tree(tree)?);
            }
        }

        let mut alias = BTreeMap::new();
        if let Some(alias_val) = obj.get("alias") {
            let alias_obj = alias_val.as_object().ok_or_else(|| ConfigError::SiteConfigParse {
                path: PathBuf::new(),
                reason: "'alias' must be an object".to_owned(),
            })?;
            for (from, to) in alias_obj {
                let canonical = to.as_str().ok_or_else(|| ConfigError::SiteConfigParse {
                    path: PathBuf::new(),
                    reason: format!("alias target for '{from}' must be a string"),
                })?;
                alias.insert(from.clone(), canonical.to_owned());
            }
        }

        Ok(SiteConfigRaw { domains, alias })
    }
}

fn parse_tree(value: &serde_json::Value) -> Result<SiteConfigTree, ConfigError> {
    match value {
        serde_json::Value::String(s) => {
            let id = DistributorIdentifier::parse(s)?;
            Ok(SiteConfigTree::Leaf(id))
        }
        serde_json::Value::Object(obj) => {
            let mut branch = BTreeMap::new();
            for (k, v) in obj {
                branch.insert(k.clone(), parse_tree(v)?);
            }
            Ok(SiteConfigTree::Branch(branch))
        }
        other => Err(ConfigError::SiteConfigParse {
            path: PathBuf::new(),
            reason: format!("domain value must be a string or object, got {other}"),
        }),
    }
}

/// `{path, version?}` entry in `dist.php`'s `modules`/`shared_modules` list.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ModuleRef {
    pub path: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// `{dist, domain}` overlay entry in `dist.php`'s `data_mapping`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DataMappingEntry {
    pub dist: String,
    pub domain: String,
}

/// The distributor's on-disk `dist.php`-equivalent configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct DistributorConfig {
    pub modules: Vec<ModuleRef>,
    pub shared_modules: Vec<ModuleRef>,
    pub prerequisites: BTreeMap<String, String>,
    pub data_mapping: BTreeMap<String, DataMappingEntry>,
    /// Handler paths run before any module-level or route-level middleware,
    /// resolved against the owning module of whichever route matched.
    pub middleware: Vec<String>,
}

/// The injected boundary for reading site/distributor configuration. The
/// concrete codec (JSON/YAML/PHP-array-like) is the host's responsibility;
/// the core only ever sees a `serde_json::Value` tree.
pub trait ConfigSource: Send + Sync {
    fn load_site_config(&self) -> Result<serde_json::Value, ConfigError>;
    fn load_distributor_config(&self, code: &str) -> Result<Option<serde_json::Value>, ConfigError>;
    fn distributor_config_exists(&self, code: &str) -> bool;
}

/// Reference `ConfigSource` that reads `sites.json` and
/// `{sites_root}/{code}/dist.json` from disk. Used by tests and as a
/// starting point for embedding binaries; production codecs remain
/// external per the Non-goals.
pub struct JsonFileConfigSource {
    pub site_config_path: PathBuf,
    pub sites_root: PathBuf,
}

impl JsonFileConfigSource {
    #[must_use]
    pub fn new(site_config_path: impl Into<PathBuf>, sites_root: impl Into<PathBuf>) -> Self {
        Self {
            site_config_path: site_config_path.into(),
            sites_root: sites_root.into(),
        }
    }

    fn dist_path(&self, code: &str) -> PathBuf {
        self.sites_root.join(code).join("dist.json")
    }
}

impl ConfigSource for JsonFileConfigSource {
    fn load_site_config(&self) -> Result<serde_json::Value, ConfigError> {
        match std::fs::read_to_string(&self.site_config_path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| ConfigError::SiteConfigParse {
                path: self.site_config_path.clone(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(serde_json::json!({ "domains": {}, "alias": {} }))
            }
            Err(e) => Err(ConfigError::Io(e.to_string())),
        }
    }

    fn load_distributor_config(&self, code: &str) -> Result<Option<serde_json::Value>, ConfigError> {
        let path = self.dist_path(code);
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| ConfigError::DistributorConfigParse {
                    code: code.to_owned(),
                    path,
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::Io(e.to_string())),
        }
    }

    fn distributor_config_exists(&self, code: &str) -> bool {
        self.dist_path(code).is_file()
    }
}

/// Walks a `dist.php` `modules[i].path` folder for module manifests (one
/// subfolder per version plus a class file). Filesystem traversal is
/// host-specific, like `ConfigSource`; a real
/// binary backs this with a directory walk, tests with a fixed list.
pub trait ModuleDiscoverySource: Send + Sync {
    fn discover_modules(&self, scan_path: &str) -> Result<Vec<(ModuleManifest, PathBuf)>, ConfigError>;
}

/// A `ModuleDiscoverySource` over a fixed, in-memory manifest list. Used by
/// tests and by embedders that already know their module set at
/// compile/startup time.
#[derive(Default)]
pub struct StaticModuleDiscoverySource {
    pub manifests_by_path: BTreeMap<String, Vec<(ModuleManifest, PathBuf)>>,
}

impl ModuleDiscoverySource for StaticModuleDiscoverySource {
    fn discover_modules(&self, scan_path: &str) -> Result<Vec<(ModuleManifest, PathBuf)>, ConfigError> {
        Ok(self.manifests_by_path.get(scan_path).cloned().unwrap_or_default())
    }
}

/// One row of the `.htaccess`-equivalent rewrite rule output: a resolved
/// `(domain, mount, module web-asset paths)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteEntry {
    pub domain: String,
    pub mount: String,
    pub module_webasset_paths: Vec<String>,
}

/// The rewrite-rule output collaborator. The core never parses what comes
/// back; it only fingerprints the file it is told to watch.
pub trait RewriteSink: Send + Sync {
    fn emit(&self, entries: &[RewriteEntry]) -> std::io::Result<()>;
}

/// Does not perform filesystem I/O itself; callers pass an existing path
/// whose mtime/content they fingerprint separately.
pub struct NullRewriteSink;

impl RewriteSink for NullRewriteSink {
    fn emit(&self, _entries: &[RewriteEntry]) -> std::io::Result<()> {
        Ok(())
    }
}

/// Check that `{sites_root}/{code}/dist.php`-equivalent exists on disk, the
/// leaf validation step for a site config mount.
#[must_use]
pub fn distributor_config_path_exists(sites_root: &Path, code: &str, source: &dyn ConfigSource) -> bool {
    let _ = sites_root;
    source.distributor_config_exists(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_branches_and_leaves() {
        let json = serde_json::json!({
            "domains": {
                "example.com": { "/api": "api", "/": "root" },
                "*.example.com": "wild"
            },
            "alias": { "x.example.com": "example.com" }
        });
        let parsed = SiteConfigRaw::from_json(&json).unwrap();
        assert_eq!(parsed.domains.len(), 2);
        assert_eq!(parsed.alias.get("x.example.com").unwrap(), "example.com");
        match parsed.domains.get("example.com").unwrap() {
            SiteConfigTree::Branch(map) => assert_eq!(map.len(), 2),
            SiteConfigTree::Leaf(_) => panic!("expected branch"),
        }
    }

    #[test]
    fn rejects_non_string_alias_target() {
        let json = serde_json::json!({ "domains": {}, "alias": { "a.com": 5 } });
        assert!(SiteConfigRaw::from_json(&json).is_err());
    }

    #[test]
    fn missing_site_config_file_is_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let src = JsonFileConfigSource::new(dir.path().join("sites.json"), dir.path().join("sites"));
        let value = src.load_site_config().unwrap();
        let parsed = SiteConfigRaw::from_json(&value).unwrap();
        assert!(parsed.domains.is_empty());
        assert!(parsed.alias.is_empty());
    }

    #[test]
    fn distributor_config_round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let sites_root = dir.path().join("sites");
        std::fs::create_dir_all(sites_root.join("blog")).unwrap();
        std::fs::write(
            sites_root.join("blog/dist.json"),
            serde_json::json!({
                "modules": [{"path": "modules/posts"}],
                "prerequisites": {"imagick": "^3.0"}
            })
            .to_string(),
        )
        .unwrap();

        let src = JsonFileConfigSource::new(dir.path().join("sites.json"), sites_root);
        assert!(src.distributor_config_exists("blog"));
        let value = src.load_distributor_config("blog").unwrap().unwrap();
        let cfg: DistributorConfig = serde_json::from_value(value).unwrap();
        assert_eq!(cfg.modules.len(), 1);
        assert_eq!(cfg.prerequisites.get("imagick").unwrap(), "^3.0");
        assert!(!src.distributor_config_exists("missing"));
    }
}
