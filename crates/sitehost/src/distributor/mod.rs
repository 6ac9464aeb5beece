//! `Distributor` — one mounted site: the module lifecycle, route tables,
//! and RPC table for one `(code, tag)` identifier. This is the most
//! complex component in the system, so its logic is split across
//! submodules: lifecycle (Phases A-F, `lifecycle.rs`), dispatch
//! (`dispatch.rs`), and RPC (`rpc.rs`).

pub mod dispatch;
pub mod lifecycle;
pub mod rpc;

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use sitehost_errors::InvalidRegistration;

use crate::agent::AgentRegistrations;
use crate::config::{DataMappingEntry, DistributorConfig};
use crate::contracts::{HandlerContext, HandlerFn, HandlerSource, RoutedInfo, Visibility};
use crate::identifier::DistributorIdentifier;
use crate::module::{Module, ModuleId, ModuleStatus};
use crate::route::{MiddlewareRef, Route};

/// One registered route plus the module that owns it, in the global
/// cross-module registration order (the "modules' registration order"
/// tie-break used when multiple regex routes match).
pub struct CompiledRoute {
    pub route: Route,
    pub owner: ModuleId,
}

pub struct LazyEntry {
    pub prefix: String,
    pub owner: ModuleId,
    pub handler_root: String,
}

pub struct ShadowEntry {
    pub compiled: Regex,
    pub raw_pattern: String,
    pub owner: ModuleId,
    pub target_module: String,
    pub target_path: String,
}

#[derive(Clone)]
pub struct RpcEntry {
    pub owner: ModuleId,
    pub handler_path: String,
    pub visibility: Visibility,
}

/// Holds one mounted site's identifier, mount path, config, module
/// registry, route tables, RPC table, and the last dispatch's `RoutedInfo`.
pub struct Distributor {
    pub identifier: DistributorIdentifier,
    pub mount_path: String,
    pub config: DistributorConfig,
    pub modules: Vec<Module>,
    pub module_index: HashMap<String, ModuleId>,

    pub regex_routes: Vec<CompiledRoute>,
    pub(crate) lazy_routes: Vec<LazyEntry>,
    pub shadow_routes: Vec<ShadowEntry>,
    pub(crate) listeners: HashMap<String, Vec<(ModuleId, String)>>,
    pub(crate) rpc_table: HashMap<ModuleId, HashMap<String, RpcEntry>>,
    pub(crate) api_group_index: HashMap<String, ModuleId>,
    pub(crate) bindings: HashMap<ModuleId, HashMap<String, String>>,
    pub(crate) await_waiters: HashMap<String, Vec<Box<dyn FnOnce() + Send>>>,
    pub(crate) module_middleware: HashMap<ModuleId, Vec<String>>,
    pub(crate) scripts: HashMap<ModuleId, Vec<String>>,

    /// Handler paths run ahead of every module's own middleware, taken
    /// verbatim from `DistributorConfig.middleware`.
    pub global_middleware: Vec<String>,

    pub handler_source: Arc<dyn HandlerSource>,
    pub current_routed: Option<RoutedInfo>,
}

impl Distributor {
    #[must_use]
    pub fn new(
        identifier: DistributorIdentifier,
        mount_path: impl Into<String>,
        config: DistributorConfig,
        handler_source: Arc<dyn HandlerSource>,
    ) -> Self {
        let global_middleware = config.middleware.clone();
        Distributor {
            identifier,
            mount_path: mount_path.into(),
            config,
            modules: Vec::new(),
            module_index: HashMap::new(),
            regex_routes: Vec::new(),
            lazy_routes: Vec::new(),
            shadow_routes: Vec::new(),
            listeners: HashMap::new(),
            rpc_table: HashMap::new(),
            api_group_index: HashMap::new(),
            bindings: HashMap::new(),
            await_waiters: HashMap::new(),
            module_middleware: HashMap::new(),
            scripts: HashMap::new(),
            global_middleware,
            handler_source,
            current_routed: None,
        }
    }

    /// Every handler path registered for `module_code` via
    /// `Controller::on_script_ready`'s counterpart, `Agent::add_script`.
    #[must_use]
    pub fn scripts_of(&self, module_code: &str) -> &[String] {
        self.module_index
            .get(module_code)
            .and_then(|id| self.scripts.get(id))
            .map_or(&[], Vec::as_slice)
    }

    /// Full onion-ordered middleware chain for a route owned by `owner`:
    /// global, then that module's own, then `route_level`.
    pub(crate) fn full_middleware(&self, owner: ModuleId, route_level: &[MiddlewareRef]) -> Vec<String> {
        let mut chain = self.global_middleware.clone();
        if let Some(module_level) = self.module_middleware.get(&owner) {
            chain.extend(module_level.iter().cloned());
        }
        chain.extend(route_level.iter().map(|m| m.0.clone()));
        chain
    }

    #[must_use]
    pub fn prerequisites(&self) -> &std::collections::BTreeMap<String, String> {
        &self.config.prerequisites
    }

    #[must_use]
    pub fn data_mapping(&self) -> &std::collections::BTreeMap<String, DataMappingEntry> {
        &self.config.data_mapping
    }

    #[must_use]
    pub fn module(&self, code: &str) -> Option<&Module> {
        self.module_index.get(code).map(|id| &self.modules[id.0])
    }

    #[must_use]
    pub fn module_mut(&mut self, code: &str) -> Option<&mut Module> {
        if let Some(id) = self.module_index.get(code).copied() {
            Some(&mut self.modules[id.0])
        } else {
            None
        }
    }

    /// Drain one module's staged `Agent` registrations into the
    /// distributor's canonical tables. Called immediately after a
    /// successful `on_init`/`on_load`, so registration order across
    /// modules matches discovery/processing order.
    pub(crate) fn drain_registrations(
        &mut self,
        owner: ModuleId,
        regs: AgentRegistrations,
    ) -> Result<(), InvalidRegistration> {
        for r in regs.routes {
            let compiled = crate::route::compile_pattern(&r.pattern).expect("format already validated by Agent");
            self.regex_routes.push(CompiledRoute {
                route: Route {
                    raw_pattern: r.pattern,
                    compiled,
                    closure_path: r.handler_path,
                    method: r.method,
                    name: r.name,
                    middleware: r.middleware.into_iter().map(MiddlewareRef).collect(),
                },
                owner,
            });
        }

        for lr in regs.lazy_routes {
            self.lazy_routes.push(LazyEntry {
                prefix: lr.prefix,
                owner,
                handler_root: lr.handler_root,
            });
        }

        for sr in regs.shadow_routes {
            let compiled = crate::route::compile_pattern(&sr.pattern).expect("format already validated by Agent");
            self.shadow_routes.push(ShadowEntry {
                compiled,
                raw_pattern: sr.pattern,
                owner,
                target_module: sr.target_module,
                target_path: sr.target_path,
            });
        }

        for listen in regs.listens {
            self.listeners.entry(listen.source).or_default().push((owner, listen.handler_path));
        }

        for cmd in regs.api_commands {
            self.rpc_table.entry(owner).or_default().insert(
                cmd.command,
                RpcEntry {
                    owner,
                    handler_path: cmd.handler_path,
                    visibility: Visibility::Distributor,
                },
            );
        }

        for cmd in regs.bridge_commands {
            self.rpc_table.entry(owner).or_default().insert(
                cmd.command,
                RpcEntry {
                    owner,
                    handler_path: cmd.handler_path,
                    visibility: Visibility::Bridge,
                },
            );
        }

        for binding in regs.bindings {
            self.bindings
                .entry(owner)
                .or_default()
                .insert(binding.method_name, binding.handler_path);
        }

        for pending_await in regs.awaits {
            self.register_await(pending_await.target_module, pending_await.continuation);
        }

        if !regs.module_middleware.is_empty() {
            self.module_middleware.entry(owner).or_default().extend(regs.module_middleware);
        }

        if !regs.scripts.is_empty() {
            self.scripts.entry(owner).or_default().extend(regs.scripts.into_iter().map(|s| s.path));
        }

        Ok(())
    }

    fn register_await(&mut self, target_module: String, continuation: Box<dyn FnOnce() + Send>) {
        let already_loaded = self
            .module_index
            .get(&target_module)
            .map(|id| self.modules[id.0].status == ModuleStatus::Loaded)
            .unwrap_or(false);
        if already_loaded {
            continuation();
        } else {
            self.await_waiters.entry(target_module).or_default().push(continuation);
        }
    }

    /// Fire and clear every continuation awaiting `module_code`, called
    /// right after that module transitions to LOADED.
    pub(crate) fn fire_await_waiters(&mut self, module_code: &str) {
        if let Some(waiters) = self.await_waiters.remove(module_code) {
            for continuation in waiters {
                continuation();
            }
        }
    }

    /// Look up every listener registered for `"{source_module_code}:{event}"`
    /// and resolve each to a callable, without invoking any of them yet.
    pub fn prepare_emit(
        &mut self,
        source_module_code: &str,
        event: &str,
    ) -> Result<EventEmitter, sitehost_errors::ModuleLoadError> {
        let key = format!("{source_module_code}:{event}");
        let entries = self.listeners.get(&key).cloned().unwrap_or_default();
        let mut listeners = Vec::with_capacity(entries.len());
        for (listener_id, handler_path) in entries {
            let module_path = self.modules[listener_id.0].info.path.clone();
            let handler = self.modules[listener_id.0].get_closure(self.handler_source.as_ref(), &module_path, &handler_path)?;
            listeners.push((listener_id, handler));
        }
        Ok(EventEmitter { event_key: key, listeners })
    }
}

/// A one-shot fan-out handle over every module listening for one event.
/// Invoking each listener is deferred to [`EventEmitter::resolve`] so
/// callers can inspect `listener_count` (the "no emitter" sentinel is simply
/// an empty list) before paying for the call.
pub struct EventEmitter {
    pub event_key: String,
    listeners: Vec<(ModuleId, HandlerFn)>,
}

impl EventEmitter {
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Invoke every listener in registration order. A listener's failure is
    /// isolated: `callback` still
    /// receives every earlier success, later listeners still run, and the
    /// overall result for the failing listener is recorded as `Err`.
    pub fn resolve(
        &self,
        args: serde_json::Value,
        mut callback: Option<&mut dyn FnMut(ModuleId, &crate::contracts::HandlerResult)>,
    ) -> Vec<(ModuleId, crate::contracts::HandlerResult)> {
        let mut results = Vec::with_capacity(self.listeners.len());
        for (id, handler) in &self.listeners {
            let ctx = HandlerContext {
                args: args.clone(),
                ..HandlerContext::default()
            };
            let outcome = handler(&ctx);
            if let Some(cb) = callback.as_deref_mut() {
                cb(*id, &outcome);
            }
            results.push((*id, outcome));
        }
        results
    }
}
