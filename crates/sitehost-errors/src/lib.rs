//! Tagged error families for the `sitehost` routing and module-lifecycle engine.
//!
//! Each enum here corresponds to one error kind named in the host's error
//! handling design: malformed configuration, invalid module registrations,
//! handler resolution failures, routing conflicts, dispatch failures,
//! non-error HTTP control flow, and dependency-injection lookups. Keeping
//! them as separate types (rather than one grab-bag enum) lets each
//! component's public API commit to exactly the failure modes it can
//! produce.

use std::path::PathBuf;

/// Malformed or missing site configuration or distributor configuration.
///
/// Fatal during boot; must not occur inside request dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("site config at {path:?} could not be parsed: {reason}")]
    SiteConfigParse { path: PathBuf, reason: String },

    #[error("distributor config for '{code}' at {path:?} could not be parsed: {reason}")]
    DistributorConfigParse {
        code: String,
        path: PathBuf,
        reason: String,
    },

    #[error("distributor identifier '{raw}' is not a valid DistributorIdentifier")]
    InvalidIdentifier { raw: String },

    #[error("module manifest for '{code}' is invalid: {reason}")]
    InvalidModuleManifest { code: String, reason: String },

    #[error("I/O error while reading config: {0}")]
    Io(String),
}

/// A module's attempt to register a route, event listener, command, or
/// lifecycle hook violated a naming rule, a uniqueness rule, or was made
/// outside the lifecycle phase that permits registration.
#[derive(Debug, thiserror::Error)]
pub enum InvalidRegistration {
    #[error("module '{module}' attempted to register while in state {state}; only INITIALIZING/READY may register")]
    WrongPhase { module: String, state: &'static str },

    #[error("module '{module}' registered name '{name}' does not match the required format")]
    BadFormat { module: String, name: String },

    #[error("module '{module}' registered duplicate key '{key}' in namespace '{namespace}'")]
    DuplicateKey {
        module: String,
        namespace: &'static str,
        key: String,
    },

    #[error("module '{module}' registered an empty or unroutable handler path")]
    EmptyHandlerPath { module: String },
}

/// A handler source file was missing, did not yield a callable, or referenced
/// a controller class that does not exist / does not extend the Controller
/// base.
#[derive(Debug, thiserror::Error)]
pub enum ModuleLoadError {
    #[error("module '{module}' has no handler registered at path '{path}'")]
    HandlerNotFound { module: String, path: String },

    #[error("module '{module}' handler at '{path}' did not yield a callable")]
    NotCallable { module: String, path: String },

    #[error("controller class for module '{module}' was not found or does not implement Controller")]
    ControllerNotFound { module: String },
}

/// Ambiguous or cyclic routing state discovered during dispatch.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("shadow route cycle detected starting at '{path}' (depth limit 1 exceeded)")]
    ShadowCycle { path: String },

    #[error("ambiguous route match for '{path}': patterns {a} and {b} both matched")]
    Ambiguous { path: String, a: String, b: String },
}

/// A handler raised and the owning Controller's `on_error` hook re-raised
/// (chose not to recover).
#[derive(Debug, thiserror::Error)]
#[error("dispatch failed in module '{module}' at handler '{handler}': {source}")]
pub struct DispatchError {
    pub module: String,
    pub handler: String,
    #[source]
    pub source: anyhow::Error,
}

/// Non-error control flow (404, redirect) propagated as a distinct signal
/// rather than an exception; the host translates this into an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpSignal {
    NotFound,
    Redirect { to: String, permanent: bool },
}

/// A dependency-injection lookup failed when the caller required it to
/// succeed (e.g. a capability query against a module that does not provide
/// it).
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("no module with code '{0}' is registered in this process")]
    UnknownModuleCode(String),

    #[error("module '{module}' does not provide the requested capability")]
    MissingCapability { module: String },
}

/// A cross-module RPC lookup (`apiOf`) failed before reaching the callee's
/// `__onAPICall`/`__onBridgeCall` gate.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("no module publishes API group '{group_code}'")]
    UnknownApiGroup { group_code: String },

    #[error("module '{module}' has no RPC command '{command}'")]
    UnknownCommand { module: String, command: String },

    #[error("command '{command}' on module '{module}' is distributor-local and cannot be called from distributor '{caller_distributor}'")]
    BridgeVisibilityDenied {
        module: String,
        command: String,
        caller_distributor: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages_name_the_offending_path() {
        let err = ConfigError::SiteConfigParse {
            path: PathBuf::from("/sites/sites.json"),
            reason: "unexpected token".to_owned(),
        };
        assert!(err.to_string().contains("/sites/sites.json"));
        assert!(err.to_string().contains("unexpected token"));
    }

    #[test]
    fn invalid_registration_reports_namespace_and_key() {
        let err = InvalidRegistration::DuplicateKey {
            module: "blog".to_owned(),
            namespace: "routes",
            key: "/posts/:d+".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("blog"));
        assert!(msg.contains("routes"));
        assert!(msg.contains("/posts/:d+"));
    }

    #[test]
    fn rpc_error_names_group_and_command() {
        let err = RpcError::UnknownCommand {
            module: "acme.auth".to_owned(),
            command: "login".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("acme.auth"));
        assert!(msg.contains("login"));
    }

    #[test]
    fn http_signal_is_a_plain_value_not_a_panic() {
        let signal = HttpSignal::Redirect {
            to: "/login".to_owned(),
            permanent: false,
        };
        assert_eq!(
            signal,
            HttpSignal::Redirect {
                to: "/login".to_owned(),
                permanent: false
            }
        );
    }
}
