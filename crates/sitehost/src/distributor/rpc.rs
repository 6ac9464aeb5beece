//! Cross-module RPC: `apiOf(groupCode)` resolves an
//! `RpcEmitter` over one module's API-group commands, and `handshake` is the
//! side-effect-free declaration-of-dependence check.

use sitehost_errors::RpcError;

use crate::contracts::{CallerInfo, HandlerContext, HandlerResult, Visibility};
use crate::distributor::{Distributor, RpcEntry};
use crate::module::{ModuleId, ModuleStatus};

/// Result of a successful RPC lookup: either the callee's `__onAPICall`/
/// `__onBridgeCall` gate refused the call (the sentinel "refused" result),
/// or the command ran and produced a `HandlerResult`.
#[derive(Debug)]
pub enum RpcOutcome {
    Refused,
    Called(HandlerResult),
}

/// A resolved handle over one module's RPC command table, scoped to the
/// caller that obtained it via `apiOf`.
pub struct RpcEmitter<'d> {
    distributor: &'d mut Distributor,
    caller: CallerInfo,
    owner: ModuleId,
}

impl std::fmt::Debug for RpcEmitter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEmitter")
            .field("caller", &self.caller)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl<'d> RpcEmitter<'d> {
    /// Invoke `command` with `args`. `fqdn` is passed through to
    /// `__onAPICall` unchanged; it is not interpreted here.
    pub fn call(&mut self, command: &str, fqdn: &str, args: serde_json::Value) -> Result<RpcOutcome, RpcError> {
        let (entry, module_code) = {
            let module_code = self.distributor.modules[self.owner.0].info.code.clone();
            let entry = self
                .distributor
                .rpc_table
                .get(&self.owner)
                .and_then(|table| table.get(command))
                .cloned()
                .ok_or_else(|| RpcError::UnknownCommand {
                    module: module_code.clone(),
                    command: command.to_owned(),
                })?;
            (entry, module_code)
        };

        if entry.visibility == Visibility::Distributor && self.caller.distributor != self.distributor.identifier.to_string() {
            return Err(RpcError::BridgeVisibilityDenied {
                module: module_code,
                command: command.to_owned(),
                caller_distributor: self.caller.distributor.clone(),
            });
        }

        let controller = self.distributor.modules[self.owner.0].controller.clone();
        let gate_ok = match entry.visibility {
            Visibility::Distributor => controller.on_api_call(&self.caller, command, fqdn),
            Visibility::Bridge => controller.on_bridge_call(&self.caller, command),
        };
        if !gate_ok {
            return Ok(RpcOutcome::Refused);
        }

        let module_path = self.distributor.modules[self.owner.0].info.path.clone();
        let handler_source = self.distributor.handler_source.clone();
        let result = self
            .distributor
            .modules
            .get_mut(self.owner.0)
            .expect("owner index is stable for the lifetime of the Distributor")
            .fork(
                handler_source.as_ref(),
                &module_path,
                &entry.handler_path,
                &HandlerContext {
                    args,
                    caller: Some(self.caller.clone()),
                    ..HandlerContext::default()
                },
            );
        Ok(RpcOutcome::Called(result))
    }
}

/// `distributor.apiOf(groupCode)`: resolve the module that published
/// `group_code` as its `apiCode` and hand back an `RpcEmitter` scoped to
/// `caller`.
pub fn api_of<'d>(
    distributor: &'d mut Distributor,
    caller: CallerInfo,
    group_code: &str,
) -> Result<RpcEmitter<'d>, RpcError> {
    let owner = distributor
        .api_group_index
        .get(group_code)
        .copied()
        .ok_or_else(|| RpcError::UnknownApiGroup {
            group_code: group_code.to_owned(),
        })?;
    Ok(RpcEmitter { distributor, caller, owner })
}

/// `handshake(peerCode, message)`: true iff the peer module
/// exists, is LOADED, and its `__onTouch` accepts the declared dependence.
/// Side-effect-free from the core's own view.
#[must_use]
pub fn handshake(distributor: &Distributor, caller: &CallerInfo, peer_code: &str, caller_version: &str, message: &serde_json::Value) -> bool {
    let Some(peer_id) = distributor.module_index.get(peer_code).copied() else {
        return false;
    };
    let peer = &distributor.modules[peer_id.0];
    if peer.status != ModuleStatus::Loaded {
        return false;
    }
    peer.controller.on_touch(caller, caller_version, message)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use sitehost_errors::ModuleLoadError;

    use super::*;
    use crate::config::DistributorConfig;
    use crate::contracts::{Controller, ErrorDecision, HandlerFn, HandlerSource};
    use crate::identifier::DistributorIdentifier;
    use crate::module::Module;
    use crate::module_info::ModuleInfo;

    struct GateController {
        accept: bool,
    }
    impl Controller for GateController {
        fn on_api_call(&self, _caller: &CallerInfo, _command: &str, _fqdn: &str) -> bool {
            self.accept
        }
        fn on_bridge_call(&self, _caller: &CallerInfo, _command: &str) -> bool {
            self.accept
        }
        fn on_touch(&self, _caller: &CallerInfo, _caller_version: &str, _message: &serde_json::Value) -> bool {
            self.accept
        }
        fn on_error(&self, _handler_path: &str, _error: &anyhow::Error) -> ErrorDecision {
            ErrorDecision::Propagate
        }
    }

    struct StubHandlerSource;
    impl HandlerSource for StubHandlerSource {
        fn resolve(&self, _module_path: &Path, _handler_path: &str) -> Result<HandlerFn, ModuleLoadError> {
            Ok(Arc::new(|ctx| Ok(ctx.args.clone())))
        }
    }

    fn info(code: &str, api_code: Option<&str>) -> ModuleInfo {
        ModuleInfo {
            code: code.to_owned(),
            class_name: code.to_owned(),
            alias: code.to_owned(),
            version: "1.0.0".to_owned(),
            requires: Default::default(),
            api_code: api_code.map(str::to_owned),
            author: None,
            path: format!("/mods/{code}").into(),
            shared: false,
        }
    }

    fn loaded_module(id: usize, code: &str, api_code: Option<&str>, accept: bool) -> Module {
        let mut m = Module::new(ModuleId(id), info(code, api_code), Arc::new(GateController { accept }));
        m.set_status(ModuleStatus::Initializing);
        m.set_status(ModuleStatus::WaitingValidate);
        m.set_status(ModuleStatus::Ready);
        m.set_status(ModuleStatus::Loaded);
        m
    }

    fn fixture(accept: bool) -> Distributor {
        let mut d = Distributor::new(
            DistributorIdentifier::parse("acme").unwrap(),
            "/",
            DistributorConfig::default(),
            Arc::new(StubHandlerSource),
        );
        let m = loaded_module(0, "acme.auth", Some("auth"), accept);
        d.module_index.insert(m.info.code.clone(), m.id);
        d.api_group_index.insert("auth".to_owned(), m.id);
        d.modules.push(m);
        d.rpc_table.entry(ModuleId(0)).or_default().insert(
            "login".to_owned(),
            RpcEntry {
                owner: ModuleId(0),
                handler_path: "controller/Auth.login.php".to_owned(),
                visibility: Visibility::Distributor,
            },
        );
        d.rpc_table.entry(ModuleId(0)).or_default().insert(
            "whoami".to_owned(),
            RpcEntry {
                owner: ModuleId(0),
                handler_path: "controller/Auth.whoami.php".to_owned(),
                visibility: Visibility::Bridge,
            },
        );
        d
    }

    fn caller(distributor: &str) -> CallerInfo {
        CallerInfo {
            module_code: "acme.blog".to_owned(),
            distributor: distributor.to_owned(),
        }
    }

    #[test]
    fn unknown_api_group_is_rejected() {
        let mut d = fixture(true);
        let err = api_of(&mut d, caller("acme"), "nope").unwrap_err();
        assert!(matches!(err, RpcError::UnknownApiGroup { .. }));
    }

    #[test]
    fn distributor_local_command_rejects_cross_distributor_caller() {
        let mut d = fixture(true);
        let mut emitter = api_of(&mut d, caller("other-site"), "auth").unwrap();
        let err = emitter.call("login", "example.com", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, RpcError::BridgeVisibilityDenied { .. }));
    }

    #[test]
    fn bridge_command_is_reachable_from_a_peer_distributor() {
        let mut d = fixture(true);
        let mut emitter = api_of(&mut d, caller("other-site"), "auth").unwrap();
        let outcome = emitter.call("whoami", "example.com", serde_json::json!({"x": 1})).unwrap();
        match outcome {
            RpcOutcome::Called(Ok(v)) => assert_eq!(v, serde_json::json!({"x": 1})),
            other => panic!("expected Called(Ok(_)), got {other:?}"),
        }
    }

    #[test]
    fn gate_refusal_short_circuits_with_sentinel() {
        let mut d = fixture(false);
        let mut emitter = api_of(&mut d, caller("acme"), "auth").unwrap();
        let outcome = emitter.call("login", "example.com", serde_json::json!({})).unwrap();
        assert!(matches!(outcome, RpcOutcome::Refused));
    }

    #[test]
    fn handshake_requires_loaded_peer_and_accepting_touch_hook() {
        let d = fixture(true);
        assert!(handshake(&d, &caller("acme"), "acme.auth", "1.0.0", &serde_json::json!({})));
        assert!(!handshake(&d, &caller("acme"), "acme.missing", "1.0.0", &serde_json::json!({})));
    }

    #[test]
    fn handshake_is_false_when_touch_hook_declines() {
        let d = fixture(false);
        assert!(!handshake(&d, &caller("acme"), "acme.auth", "1.0.0", &serde_json::json!({})));
    }
}
