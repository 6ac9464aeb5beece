//! Per-module runtime state: status, registered-name namespaces, and the
//! handler closure cache. Cross-module tables (routes, events, RPC) are
//! owned centrally by `Distributor`, which is the only type allowed to hold
//! more than one `Module` at a time; `Module` itself only tracks what it
//! needs to validate its own registrations and serve requests once built.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sitehost_errors::ModuleLoadError;

use crate::contracts::{Controller, HandlerFn};
use crate::module_info::ModuleInfo;

/// Index of a `Module` inside its owning `Distributor`'s module vector —
/// the arena-and-index pattern that breaks the Module/Distributor/Controller
/// reference cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub usize);

/// The nine-state lifecycle. Status is monotone forward
/// except for the two terminal sentinels; legality of a transition is
/// decided by [`ModuleStatus::can_transition`] rather than relied-upon
/// ordinal comparison, since `UNLOADED`/`FAILED` are negative sentinels, not
/// "before DISABLED".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Disabled,
    Initializing,
    Ready,
    WaitingValidate,
    Preloading,
    Loaded,
    Unloaded,
    Failed,
}

impl ModuleStatus {
    /// The numeric status code, kept only for diagnostics/logging parity.
    #[must_use]
    pub fn code(self) -> i8 {
        match self {
            ModuleStatus::Disabled => 0,
            ModuleStatus::Initializing => 1,
            ModuleStatus::Ready => 2,
            ModuleStatus::WaitingValidate => 3,
            ModuleStatus::Preloading => 4,
            ModuleStatus::Loaded => 5,
            ModuleStatus::Unloaded => -1,
            ModuleStatus::Failed => -2,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ModuleStatus::Unloaded | ModuleStatus::Failed)
    }

    #[must_use]
    pub fn can_serve_requests(self) -> bool {
        matches!(self, ModuleStatus::Loaded)
    }

    #[must_use]
    pub fn can_transition(self, to: ModuleStatus) -> bool {
        matches!(
            (self, to),
            (ModuleStatus::Disabled, ModuleStatus::Initializing)
                | (ModuleStatus::Disabled, ModuleStatus::Unloaded)
                | (ModuleStatus::Initializing, ModuleStatus::WaitingValidate)
                | (ModuleStatus::Initializing, ModuleStatus::Failed)
                | (ModuleStatus::WaitingValidate, ModuleStatus::Ready)
                | (ModuleStatus::WaitingValidate, ModuleStatus::Preloading)
                | (ModuleStatus::Preloading, ModuleStatus::Ready)
                | (ModuleStatus::Preloading, ModuleStatus::Unloaded)
                | (ModuleStatus::Ready, ModuleStatus::Loaded)
                | (ModuleStatus::Ready, ModuleStatus::Failed)
                | (ModuleStatus::Loaded, ModuleStatus::Unloaded)
        )
    }
}

/// Per-module sets of already-registered names, one per registration
/// namespace. Keys are unique *within a module*, not globally;
/// `Agent` consults and updates these during a single `on_init`/`on_load`
/// call.
#[derive(Debug, Default)]
pub struct Namespaces {
    pub regex_routes: HashSet<String>,
    pub lazy_routes: HashSet<String>,
    pub shadow_routes: HashSet<String>,
    pub events: HashSet<String>,
    pub api_commands: HashSet<String>,
    pub bridge_commands: HashSet<String>,
    pub bindings: HashSet<String>,
    pub middleware: HashSet<String>,
    pub scripts: HashSet<String>,
}

/// Per-module runtime: owns a `Controller`, a status, a closure cache, and
/// the namespaces used to reject duplicate registrations.
pub struct Module {
    pub id: ModuleId,
    pub info: ModuleInfo,
    pub controller: Arc<dyn Controller>,
    pub status: ModuleStatus,
    pub namespaces: Namespaces,
    closure_cache: HashMap<String, HandlerFn>,
}

impl Module {
    #[must_use]
    pub fn new(id: ModuleId, info: ModuleInfo, controller: Arc<dyn Controller>) -> Self {
        Module {
            id,
            info,
            controller,
            status: ModuleStatus::Disabled,
            namespaces: Namespaces::default(),
            closure_cache: HashMap::new(),
        }
    }

    /// Force `status` to `to`, asserting the transition is legal. Called
    /// only by the `Distributor` lifecycle driver, never by registration
    /// code (which never changes status).
    pub fn set_status(&mut self, to: ModuleStatus) {
        debug_assert!(
            self.status.can_transition(to),
            "illegal module status transition {:?} -> {:?}",
            self.status,
            to
        );
        self.status = to;
    }

    /// Resolve and cache a handler at `path`, consulting the cache first.
    /// Cache entries live for the `Distributor`'s lifetime.
    pub fn get_closure(
        &mut self,
        source: &dyn crate::contracts::HandlerSource,
        module_path: &std::path::Path,
        path: &str,
    ) -> Result<HandlerFn, ModuleLoadError> {
        if let Some(cached) = self.closure_cache.get(path) {
            return Ok(cached.clone());
        }
        let resolved = source.resolve(module_path, path)?;
        self.closure_cache.insert(path.to_owned(), resolved.clone());
        Ok(resolved)
    }

    /// An explicit escape hatch that invokes an arbitrary closure file by
    /// path without requiring it to be registered first. Must still go
    /// through `get_closure` so the cache and resolution rules apply
    /// uniformly.
    pub fn fork(
        &mut self,
        source: &dyn crate::contracts::HandlerSource,
        module_path: &std::path::Path,
        path: &str,
        ctx: &crate::contracts::HandlerContext,
    ) -> crate::contracts::HandlerResult {
        let handler = self
            .get_closure(source, module_path, path)
            .map_err(|e| crate::contracts::HandlerError::Failure(e.into()))?;
        handler(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopController;
    impl Controller for NoopController {}

    fn info(code: &str) -> ModuleInfo {
        ModuleInfo {
            code: code.to_owned(),
            class_name: code.to_owned(),
            alias: code.to_owned(),
            version: "1.0.0".to_owned(),
            requires: Default::default(),
            api_code: None,
            author: None,
            path: "/mods/x".into(),
            shared: false,
        }
    }

    #[test]
    fn status_transitions_follow_the_allowed_edges() {
        assert!(ModuleStatus::Disabled.can_transition(ModuleStatus::Initializing));
        assert!(!ModuleStatus::Disabled.can_transition(ModuleStatus::Loaded));
        assert!(ModuleStatus::Ready.can_transition(ModuleStatus::Loaded));
        assert!(ModuleStatus::Loaded.is_terminal() == false);
        assert!(ModuleStatus::Unloaded.is_terminal());
        assert!(ModuleStatus::Failed.is_terminal());
    }

    #[test]
    #[should_panic(expected = "illegal module status transition")]
    fn set_status_rejects_illegal_jump() {
        let mut m = Module::new(ModuleId(0), info("acme.blog"), Arc::new(NoopController));
        m.set_status(ModuleStatus::Loaded);
    }

    #[test]
    fn only_loaded_modules_can_serve_requests() {
        assert!(!ModuleStatus::Ready.can_serve_requests());
        assert!(ModuleStatus::Loaded.can_serve_requests());
    }
}
