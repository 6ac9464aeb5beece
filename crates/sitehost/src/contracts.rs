//! The module author's code contract: `Controller`, the data it exchanges
//! with the host (`RoutedInfo`, `CallerInfo`), and the handler-resolution
//! seam (`HandlerFn`, `HandlerSource`).

use std::path::Path;
use std::sync::Arc;

use sitehost_errors::{HttpSignal, ModuleLoadError};

/// HTTP method filter on a `Route`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Any,
}

impl Method {
    #[must_use]
    pub fn accepts(self, requested: Method) -> bool {
        self == Method::Any || self == requested
    }
}

/// Who is calling an RPC command or a `handshake` — the owning module's code
/// plus the distributor it runs in, so the callee can tell apart
/// same-distributor ("API") and cross-distributor ("bridge") callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerInfo {
    pub module_code: String,
    pub distributor: String,
}

/// Produced at dispatch, handed to every `Controller::on_routed`/handler
/// invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedInfo {
    pub module_code: String,
    pub url_path: String,
    pub handler_path: String,
    pub captures: Vec<String>,
    pub method: Method,
    pub route_name: Option<String>,
}

/// Whether an RPC command is a distributor-local (`#`-prefixed) or a
/// bridge command reachable from peer distributors in the same
/// Application. One RPC table, one visibility attribute, rather than two
/// parallel mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Distributor,
    Bridge,
}

/// A handler raised a non-error control-flow signal (404/redirect) instead
/// of completing, or genuinely failed.
#[derive(Debug)]
pub enum HandlerError {
    Signal(HttpSignal),
    Failure(anyhow::Error),
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::Signal(s) => write!(f, "{s:?}"),
            HandlerError::Failure(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for HandlerError {}

pub type HandlerResult = Result<serde_json::Value, HandlerError>;

/// Everything a resolved handler might need, regardless of which
/// registration surface produced it: a route's captured groups and
/// `RoutedInfo`, an event's/RPC call's free-form `args`, and the caller's
/// identity for RPC. One shape keeps "handler files become registered
/// factory functions keyed by a stable path string" uniform across
/// routes, lazy routes, events, and API/bridge commands.
#[derive(Debug, Clone, Default)]
pub struct HandlerContext {
    pub captures: Vec<String>,
    pub routed: Option<RoutedInfo>,
    pub args: serde_json::Value,
    pub caller: Option<CallerInfo>,
}

/// A resolved, rebound handler callable.
pub type HandlerFn = Arc<dyn Fn(&HandlerContext) -> HandlerResult + Send + Sync>;

/// Resolves a handler path to a callable, replacing the source's dynamic
/// "require a file, grab its returned closure, rebind to Controller"
/// mechanism with an explicit lookup.
pub trait HandlerSource: Send + Sync {
    fn resolve(&self, module_path: &Path, handler_path: &str) -> Result<HandlerFn, ModuleLoadError>;
}

/// Whether a `Controller::on_error` call recovered the failing dispatch or
/// wants it to surface as a host-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDecision {
    Recovered,
    Propagate,
}

/// The module author's code contract. Every hook has a no-op/true default
/// — implementers need not override all of them — so a module only
/// overrides what it actually uses.
pub trait Controller: Send + Sync {
    /// Phase C. Register routes/events/commands/hooks through `agent`.
    /// Returning `Ok(false)` or `Err` fails the module (-> FAILED).
    fn on_init(&self, agent: &mut crate::agent::Agent<'_>) -> anyhow::Result<bool> {
        let _ = agent;
        Ok(true)
    }

    /// Phase D, re-polled while PRELOADING. `true` promotes to READY.
    fn on_require(&self) -> bool {
        true
    }

    /// Phase E. Returning `Ok(false)` or `Err` fails the module.
    fn on_load(&self, agent: &mut crate::agent::Agent<'_>) -> anyhow::Result<bool> {
        let _ = agent;
        Ok(true)
    }

    /// Phase F, once this module is LOADED.
    fn on_ready(&self) {}

    /// Invoked on the owning module immediately before its handler runs.
    fn on_entry(&self, routed: &RoutedInfo) -> anyhow::Result<()> {
        let _ = routed;
        Ok(())
    }

    /// The owning module's handler raised. Returning `Recovered` suppresses
    /// the 500; `Propagate` (the default) lets it surface to the host.
    fn on_error(&self, handler_path: &str, error: &anyhow::Error) -> ErrorDecision {
        let _ = (handler_path, error);
        ErrorDecision::Propagate
    }

    /// Gate hook for a same-distributor RPC call. `false` short-circuits
    /// with the "refused" sentinel.
    fn on_api_call(&self, caller: &CallerInfo, command: &str, fqdn: &str) -> bool {
        let _ = (caller, command, fqdn);
        true
    }

    /// Gate hook for a cross-distributor ("bridge") RPC call.
    fn on_bridge_call(&self, caller: &CallerInfo, command: &str) -> bool {
        let _ = (caller, command);
        true
    }

    /// `handshake` target hook: `true` iff this module accepts the peer's
    /// declared dependence.
    fn on_touch(&self, caller: &CallerInfo, caller_version: &str, message: &serde_json::Value) -> bool {
        let _ = (caller, caller_version, message);
        true
    }

    /// Best-effort notification fired on every other LOADED module after a
    /// successful dispatch match. A failure here is isolated and logged;
    /// it never aborts the request.
    fn on_routed(&self, routed: &RoutedInfo) -> anyhow::Result<()> {
        let _ = routed;
        Ok(())
    }

    /// Best-effort post-hook fired on every LOADED module after the
    /// handler returns.
    fn on_dispatch(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fired once, after every module has completed Phase F (NOTIFY) for
    /// this lifecycle pass, with every script path this module registered
    /// via `Agent::add_script`.
    fn on_script_ready(&self, scripts: &[String]) {
        let _ = scripts;
    }

    /// Distributor teardown.
    fn on_dispose(&self) {}
}
