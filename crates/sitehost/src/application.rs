//! `Application` — the top-level coordinator. Singleton flavored (one
//! unlocked instance per process), cheap to construct: a disk-free
//! constructor that records an instance id, and ordered lifecycle
//! operations that log their own name as they run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sitehost_errors::{ConfigError, ContainerError};
use uuid::Uuid;

use crate::config::{ConfigSource, DistributorConfig, ModuleDiscoverySource, RewriteEntry, RewriteSink};
use crate::contracts::{HandlerSource, Method};
use crate::distributor::dispatch::{self, DispatchOutcome};
use crate::distributor::Distributor;
use crate::domain::Domain;
use crate::identifier::DistributorIdentifier;
use crate::registry::ModuleRegistry;
use crate::site_registry::SiteRegistry;

/// The explicit process-wide configuration handed to the constructor, in
/// place of ambient global state.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub sites_root: PathBuf,
    pub site_config_path: PathBuf,
    pub rewrite_path: Option<PathBuf>,
    pub worker_revalidate_every: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            sites_root: PathBuf::from("sites"),
            site_config_path: PathBuf::from("sites.json"),
            rewrite_path: None,
            worker_revalidate_every: 100,
        }
    }
}

/// `(content_hash, path)`. `content_hash` is an opaque token the host
/// computed; the core only ever compares it for equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub path: PathBuf,
    pub content_hash: String,
}

/// The config-file-protection collaborator: computes fingerprints of the
/// on-disk site config / rewrite file and re-persists them on demand.
/// Separate from `ConfigSource`/`RewriteSink` because fingerprinting and
/// restoring are host-I/O concerns the core only decides *whether* to
/// invoke.
pub trait ConfigSink: Send + Sync {
    fn site_config_fingerprint(&self) -> Result<Fingerprint, ConfigError>;
    fn rewrite_fingerprint(&self) -> Option<Fingerprint>;
    fn restore_site_config(&self, value: &serde_json::Value) -> Result<(), ConfigError>;
    fn restore_rewrite(&self, entries: &[RewriteEntry]) -> std::io::Result<()>;
}

/// Everything that can keep `Application::query`/`dispatch` from returning
/// a handler result.
#[derive(Debug)]
pub enum QueryError {
    /// No mount in the matched `Domain` covers the requested URL.
    NoMount,
    Config(ConfigError),
    Dispatch(DispatchOutcome),
    /// `dispatch()` (the worker-mode fast path) was called before `Lock()`.
    NotLocked,
}

impl From<ConfigError> for QueryError {
    fn from(err: ConfigError) -> Self {
        QueryError::Config(err)
    }
}

impl From<DispatchOutcome> for QueryError {
    fn from(outcome: DispatchOutcome) -> Self {
        QueryError::Dispatch(outcome)
    }
}

struct CacheEntry {
    distributor: Distributor,
    mount_path: String,
    fingerprint: u64,
    requests_since_revalidate: u32,
}

/// Top-level coordinator: one per process (or per worker, in worker-mode
/// deployments). Owns the `SiteRegistry`, the compiled `ModuleRegistry`,
/// and a cache of built `Distributor`s keyed by `DistributorIdentifier`
/// — `DistributorIdentifier` already documents that two mounts sharing
/// one identifier share one cache entry.
pub struct Application {
    pub instance_id: Uuid,
    runtime: RuntimeConfig,
    config_source: Arc<dyn ConfigSource>,
    discovery: Arc<dyn ModuleDiscoverySource>,
    handler_source: Arc<dyn HandlerSource>,
    module_registry: ModuleRegistry,

    site_registry: SiteRegistry,
    sites_loaded: AtomicBool,
    locked: AtomicBool,

    distributors: RwLock<HashMap<DistributorIdentifier, CacheEntry>>,

    site_config_fp: RwLock<Option<Fingerprint>>,
    rewrite_fp: RwLock<Option<Fingerprint>>,
    last_rewrite_entries: RwLock<Vec<RewriteEntry>>,
}

impl Application {
    /// Cheap: allocates the object and records an instance id, touches no
    /// disk.
    #[must_use]
    pub fn new(
        runtime: RuntimeConfig,
        config_source: Arc<dyn ConfigSource>,
        discovery: Arc<dyn ModuleDiscoverySource>,
        handler_source: Arc<dyn HandlerSource>,
        module_registry: ModuleRegistry,
    ) -> Self {
        let instance_id = Uuid::new_v4();
        tracing::info!(instance_id = %instance_id, "Application: constructed");
        Application {
            instance_id,
            runtime,
            config_source,
            discovery,
            handler_source,
            module_registry,
            site_registry: SiteRegistry::new(),
            sites_loaded: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            distributors: RwLock::new(HashMap::new()),
            site_config_fp: RwLock::new(None),
            rewrite_fp: RwLock::new(None),
            last_rewrite_entries: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// `Lock()`: freezes the object graph. After this,
    /// `update_sites`/`write_site_config`/`update_rewrite_rules` are no-ops
    /// and `dispatch()` becomes callable.
    pub fn lock(&self) {
        tracing::info!(instance_id = %self.instance_id, "Application: locked");
        self.locked.store(true, Ordering::Release);
    }

    /// `updateSites()`: (re)loads the site config and rebuilds the
    /// `SiteRegistry`. A no-op once locked.
    pub fn update_sites(&self) -> Result<(), ConfigError> {
        if self.is_locked() {
            return Ok(());
        }
        self.site_registry.reload(self.config_source.as_ref(), &self.runtime.sites_root)?;
        self.sites_loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// `writeSiteConfig()`: persist `value` as the new site config through
    /// `sink`. A no-op once locked.
    pub fn write_site_config(&self, sink: &dyn ConfigSink, value: &serde_json::Value) -> Result<(), ConfigError> {
        if self.is_locked() {
            return Ok(());
        }
        sink.restore_site_config(value)
    }

    /// `updateRewriteRules()`: hand the current mount table to `sink` for
    /// emission, and remember it for `validation()`'s self-healing pass. A
    /// no-op once locked.
    pub fn update_rewrite_rules(&self, sink: &dyn RewriteSink, entries: Vec<RewriteEntry>) -> std::io::Result<()> {
        if self.is_locked() {
            return Ok(());
        }
        sink.emit(&entries)?;
        *self.last_rewrite_entries.write() = entries;
        Ok(())
    }

    /// Record the fingerprints used by `validation()`'s self-healing pass.
    /// Called once after the first successful `update_sites()`/
    /// `update_rewrite_rules()` pair; a no-op once locked (protection is
    /// disabled while locked).
    pub fn record_fingerprints(&self, sink: &dyn ConfigSink) -> Result<(), ConfigError> {
        if self.is_locked() {
            return Ok(());
        }
        *self.site_config_fp.write() = Some(sink.site_config_fingerprint()?);
        *self.rewrite_fp.write() = sink.rewrite_fingerprint();
        Ok(())
    }

    /// `validation()`: run post-request/on shutdown. If the
    /// on-disk site config or rewrite file no longer matches its recorded
    /// fingerprint, re-persist it through `sink`. Disabled while locked.
    pub fn validation(&self, sink: &dyn ConfigSink) -> Result<(), ConfigError> {
        if self.is_locked() {
            return Ok(());
        }

        if let Some(expected) = self.site_config_fp.read().clone() {
            let current = sink.site_config_fingerprint()?;
            if current != expected {
                tracing::warn!(path = %expected.path.display(), "site config fingerprint mismatch; re-persisting");
                let value = self.config_source.load_site_config()?;
                sink.restore_site_config(&value)?;
            }
        }

        if let Some(expected) = self.rewrite_fp.read().clone() {
            let current = sink.rewrite_fingerprint();
            if current.as_ref() != Some(&expected) {
                tracing::warn!(path = %expected.path.display(), "rewrite file fingerprint mismatch; re-persisting");
                let entries = self.last_rewrite_entries.read().clone();
                let _ = sink.restore_rewrite(&entries);
            }
        }

        Ok(())
    }

    /// `host(fqdn)`: lazily loads the site config on first
    /// call, resolves `fqdn` against the `SiteRegistry`, and returns the
    /// matched `Domain`.
    pub fn host(&self, fqdn: &str) -> Result<Option<Domain>, ConfigError> {
        if !self.sites_loaded.load(Ordering::Acquire) {
            self.update_sites()?;
        }
        Ok(self
            .site_registry
            .resolve_host(fqdn)
            .map(|(matched_key, mounts, alias)| Domain::new(matched_key, alias, mounts)))
    }

    /// `query(urlPath)`: matches `domain` to a mount,
    /// lazily builds (or reuses) that mount's `Distributor`, and dispatches
    /// the residual path against it. Always consults/updates the worker
    /// cache so `query` and `dispatch` share one code path; `query` itself
    /// carries no locked/unlocked restriction.
    pub fn query(&self, domain: &Domain, method: Method, url_path: &str) -> Result<serde_json::Value, QueryError> {
        self.run(domain, method, url_path)
    }

    /// `dispatch(urlPath)`: the worker-mode fast path. Must
    /// be preceded by `Lock()`; rejects otherwise.
    pub fn dispatch(&self, domain: &Domain, method: Method, url_path: &str) -> Result<serde_json::Value, QueryError> {
        if !self.is_locked() {
            return Err(QueryError::NotLocked);
        }
        self.run(domain, method, url_path)
    }

    fn run(&self, domain: &Domain, method: Method, url_path: &str) -> Result<serde_json::Value, QueryError> {
        let matched = domain.match_query(url_path).ok_or(QueryError::NoMount)?;
        self.ensure_distributor(&matched.identifier, &matched.mount_path)?;

        let mut distributors = self.distributors.write();
        let entry = distributors
            .get_mut(&matched.identifier)
            .expect("ensure_distributor just inserted this identifier");
        entry.requests_since_revalidate += 1;
        entry.distributor.current_routed = None;

        dispatch::dispatch(&mut entry.distributor, method, &matched.residual_path).map_err(QueryError::from)
    }

    /// Build-or-reuse the cached `Distributor` for `identifier`, revalidating
    /// every `worker_revalidate_every` requests: fingerprint the
    /// distributor config plus its module manifests, and rebuild from
    /// scratch on any change.
    fn ensure_distributor(&self, identifier: &DistributorIdentifier, mount_path: &str) -> Result<(), ConfigError> {
        let needs_revalidate = {
            let distributors = self.distributors.read();
            match distributors.get(identifier) {
                None => true,
                Some(entry) => entry.requests_since_revalidate >= self.runtime.worker_revalidate_every,
            }
        };
        if !needs_revalidate {
            return Ok(());
        }

        let config_value = self
            .config_source
            .load_distributor_config(&identifier.code)?
            .ok_or_else(|| ConfigError::DistributorConfigParse {
                code: identifier.code.clone(),
                path: self.runtime.sites_root.join(&identifier.code),
                reason: "no distributor config on disk for a mounted identifier".to_owned(),
            })?;
        let config: DistributorConfig =
            serde_json::from_value(config_value.clone()).map_err(|e| ConfigError::DistributorConfigParse {
                code: identifier.code.clone(),
                path: self.runtime.sites_root.join(&identifier.code),
                reason: e.to_string(),
            })?;

        let new_fingerprint = fingerprint_distributor(&config_value, &config, self.discovery.as_ref());

        let mut distributors = self.distributors.write();
        let rebuild = match distributors.get(identifier) {
            None => true,
            Some(entry) => entry.fingerprint != new_fingerprint,
        };
        if !rebuild {
            if let Some(entry) = distributors.get_mut(identifier) {
                entry.requests_since_revalidate = 0;
            }
            return Ok(());
        }

        tracing::info!(identifier = %identifier, "Distributor: (re)building for worker cache");
        let mut distributor = Distributor::new(identifier.clone(), mount_path, config, self.handler_source.clone());
        crate::distributor::lifecycle::initialize(&mut distributor, self.discovery.as_ref(), &self.module_registry, false);

        distributors.insert(
            identifier.clone(),
            CacheEntry {
                distributor,
                mount_path: mount_path.to_owned(),
                fingerprint: new_fingerprint,
                requests_since_revalidate: 0,
            },
        );
        Ok(())
    }

    /// `compose(code, closure)`: look up an
    /// already-cached `Distributor` by identifier and hand it to `f`.
    /// Fails with `ContainerError::UnknownModuleCode` if no distributor for
    /// `code` has been built yet (this is a lookup into the live cache, not
    /// a cold-start builder).
    pub fn compose<F, R>(&self, code: &str, f: F) -> Result<R, ContainerError>
    where
        F: FnOnce(&mut Distributor) -> R,
    {
        let identifier = DistributorIdentifier::parse(code).map_err(|_| ContainerError::UnknownModuleCode(code.to_owned()))?;
        let mut distributors = self.distributors.write();
        let entry = distributors
            .get_mut(&identifier)
            .ok_or_else(|| ContainerError::UnknownModuleCode(code.to_owned()))?;
        Ok(f(&mut entry.distributor))
    }
}

/// Hash the distributor config plus every referenced module's discovered
/// manifest set (code, version, path), standing in for "fingerprint
/// dist.php and the module folders' modification times" without requiring
/// the core to perform filesystem stats itself.
fn fingerprint_distributor(config_value: &serde_json::Value, config: &DistributorConfig, discovery: &dyn ModuleDiscoverySource) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    config_value.to_string().hash(&mut hasher);

    let mut manifest_paths: Vec<&str> = Vec::new();
    for module_ref in config.modules.iter().chain(config.shared_modules.iter()) {
        manifest_paths.push(&module_ref.path);
    }
    manifest_paths.sort_unstable();

    for scan_path in manifest_paths {
        if let Ok(manifests) = discovery.discover_modules(scan_path) {
            let mut entries: Vec<(String, String, String)> = manifests
                .into_iter()
                .map(|(m, path)| (m.code, m.version, path.to_string_lossy().into_owned()))
                .collect();
            entries.sort_unstable();
            entries.hash(&mut hasher);
        }
    }

    hasher.finish()
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::config::{ModuleDiscoverySource, StaticModuleDiscoverySource};
    use crate::contracts::{Controller, HandlerFn};
    use crate::module_info::ModuleManifest;

    struct FakeConfigSource {
        site_json: serde_json::Value,
        distributor_json: serde_json::Value,
    }

    impl ConfigSource for FakeConfigSource {
        fn load_site_config(&self) -> Result<serde_json::Value, ConfigError> {
            Ok(self.site_json.clone())
        }
        fn load_distributor_config(&self, _code: &str) -> Result<Option<serde_json::Value>, ConfigError> {
            Ok(Some(self.distributor_json.clone()))
        }
        fn distributor_config_exists(&self, _code: &str) -> bool {
            true
        }
    }

    struct NoopController;
    impl Controller for NoopController {}

    struct RootHandlerSource;
    impl HandlerSource for RootHandlerSource {
        fn resolve(&self, _module_path: &Path, _handler_path: &str) -> Result<HandlerFn, sitehost_errors::ModuleLoadError> {
            Ok(Arc::new(|_ctx| Ok(serde_json::json!("ok"))))
        }
    }

    fn app(site_json: serde_json::Value) -> Application {
        let config_source = Arc::new(FakeConfigSource {
            site_json,
            distributor_json: serde_json::json!({ "modules": [] }),
        });
        let discovery: Arc<dyn ModuleDiscoverySource> = Arc::new(StaticModuleDiscoverySource::default());
        let handler_source: Arc<dyn HandlerSource> = Arc::new(RootHandlerSource);
        Application::new(
            RuntimeConfig::default(),
            config_source,
            discovery,
            handler_source,
            ModuleRegistry::discover(),
        )
    }

    #[test]
    fn host_lazily_loads_sites_and_resolves_fqdn() {
        let application = app(serde_json::json!({
            "domains": { "example.com": { "/": "root" } },
            "alias": {}
        }));
        let domain = application.host("example.com").unwrap().unwrap();
        assert_eq!(domain.matched_key, "example.com");
    }

    #[test]
    fn unknown_fqdn_resolves_to_none() {
        let application = app(serde_json::json!({ "domains": {}, "alias": {} }));
        assert!(application.host("nope.com").unwrap().is_none());
    }

    #[test]
    fn query_dispatches_through_the_matched_mount() {
        let application = app(serde_json::json!({
            "domains": { "example.com": { "/": "root" } },
            "alias": {}
        }));
        let domain = application.host("example.com").unwrap().unwrap();
        let result = application.query(&domain, Method::Get, "/").unwrap_err();
        assert!(matches!(result, QueryError::Dispatch(DispatchOutcome::NotFound)));
    }

    #[test]
    fn dispatch_before_lock_is_rejected() {
        let application = app(serde_json::json!({
            "domains": { "example.com": { "/": "root" } },
            "alias": {}
        }));
        let domain = application.host("example.com").unwrap().unwrap();
        let err = application.dispatch(&domain, Method::Get, "/").unwrap_err();
        assert!(matches!(err, QueryError::NotLocked));
    }

    #[test]
    fn dispatch_after_lock_reaches_the_same_not_found_outcome_as_query() {
        let application = app(serde_json::json!({
            "domains": { "example.com": { "/": "root" } },
            "alias": {}
        }));
        let domain = application.host("example.com").unwrap().unwrap();
        application.lock();
        let err = application.dispatch(&domain, Method::Get, "/").unwrap_err();
        assert!(matches!(err, QueryError::Dispatch(DispatchOutcome::NotFound)));
    }

    #[test]
    fn update_sites_is_a_no_op_once_locked() {
        let application = app(serde_json::json!({
            "domains": { "example.com": { "/": "root" } },
            "alias": {}
        }));
        application.host("example.com").unwrap();
        application.lock();
        assert!(application.update_sites().is_ok());
        let domain = application.host("other.com").unwrap();
        assert!(domain.is_none(), "site registry must not have been reloaded once locked");
    }

    #[test]
    fn compose_fails_for_a_distributor_that_was_never_built() {
        let application = app(serde_json::json!({ "domains": {}, "alias": {} }));
        let err = application.compose("never-built", |_d: &mut Distributor| ()).unwrap_err();
        assert!(matches!(err, ContainerError::UnknownModuleCode(_)));
    }

    #[test]
    fn compose_reaches_a_distributor_built_by_a_prior_query() {
        let application = app(serde_json::json!({
            "domains": { "example.com": { "/": "root" } },
            "alias": {}
        }));
        let domain = application.host("example.com").unwrap().unwrap();
        let _ = application.query(&domain, Method::Get, "/");

        let module_count = application.compose("root", |d: &mut Distributor| d.modules.len()).unwrap();
        assert_eq!(module_count, 0);
    }

    #[test]
    fn revalidation_counter_triggers_rebuild_after_n_requests() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        struct CountingDiscovery;
        impl ModuleDiscoverySource for CountingDiscovery {
            fn discover_modules(&self, _scan_path: &str) -> Result<Vec<(ModuleManifest, PathBuf)>, ConfigError> {
                BUILDS.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }
        }

        let config_source = Arc::new(FakeConfigSource {
            site_json: serde_json::json!({ "domains": { "example.com": { "/": "root" } }, "alias": {} }),
            distributor_json: serde_json::json!({ "modules": [{"path": "modules/posts"}] }),
        });
        let mut runtime = RuntimeConfig::default();
        runtime.worker_revalidate_every = 2;
        let application = Application::new(
            runtime,
            config_source,
            Arc::new(CountingDiscovery),
            Arc::new(RootHandlerSource),
            ModuleRegistry::discover(),
        );

        let domain = application.host("example.com").unwrap().unwrap();
        let _ = application.query(&domain, Method::Get, "/");
        let _ = application.query(&domain, Method::Get, "/");
        let after_two = BUILDS.load(Ordering::SeqCst);
        let _ = application.query(&domain, Method::Get, "/");
        assert!(
            BUILDS.load(Ordering::SeqCst) > after_two,
            "third request should have crossed the revalidate_every=2 threshold and re-fingerprinted"
        );
    }
}
