//! `Agent` — the narrow, validation-enforcing registration façade handed to
//! a `Controller` during `on_init`/`on_load`.
//!
//! An `Agent` never mutates the `Distributor`'s canonical tables directly:
//! it stages registrations in [`AgentRegistrations`], checking format and
//! per-module uniqueness as it goes, and the `Distributor` drains the
//! staged output into its tables once the controller call returns
//! successfully. This keeps validation synchronous and fail-fast without
//! letting a module see or corrupt another module's state.

use regex::Regex;
use sitehost_errors::InvalidRegistration;

use crate::contracts::Method;
use crate::module::{ModuleStatus, Namespaces};

fn event_key_pattern() -> Regex {
    Regex::new(r"^[a-z][\w]*(\.[a-z][\w]*)*:[A-Za-z][\w]*$").expect("static pattern is valid regex")
}

fn api_command_pattern() -> Regex {
    Regex::new(r"^#?[a-z]\w*$").expect("static pattern is valid regex")
}

fn bridge_command_pattern() -> Regex {
    Regex::new(r"^[a-z]\w*$").expect("static pattern is valid regex")
}

fn binding_pattern() -> Regex {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern is valid regex")
}

pub struct PendingRoute {
    pub pattern: String,
    pub method: Method,
    pub handler_path: String,
    pub name: Option<String>,
    pub middleware: Vec<String>,
}

pub struct PendingLazyRoute {
    pub prefix: String,
    pub handler_root: String,
}

pub struct PendingShadowRoute {
    pub pattern: String,
    pub target_module: String,
    pub target_path: String,
}

pub struct PendingListen {
    pub source: String, // "moduleCode:eventName"
    pub handler_path: String,
}

pub struct PendingCommand {
    pub command: String,
    pub handler_path: String,
}

pub struct PendingBinding {
    pub method_name: String,
    pub handler_path: String,
}

pub struct PendingAwait {
    pub target_module: String,
    pub continuation: Box<dyn FnOnce() + Send>,
}

pub struct PendingScript {
    pub path: String,
}

/// Everything an `Agent` collected during one `on_init`/`on_load` call,
/// drained into the `Distributor`'s canonical tables afterward.
#[derive(Default)]
pub struct AgentRegistrations {
    pub routes: Vec<PendingRoute>,
    pub lazy_routes: Vec<PendingLazyRoute>,
    pub shadow_routes: Vec<PendingShadowRoute>,
    pub listens: Vec<PendingListen>,
    pub api_commands: Vec<PendingCommand>,
    pub bridge_commands: Vec<PendingCommand>,
    pub bindings: Vec<PendingBinding>,
    pub awaits: Vec<PendingAwait>,
    pub module_middleware: Vec<String>,
    pub scripts: Vec<PendingScript>,
}

/// Borrowed for the duration of one `Controller::on_init`/`on_load` call.
pub struct Agent<'a> {
    module_code: &'a str,
    status: ModuleStatus,
    namespaces: &'a mut Namespaces,
    pub(crate) out: AgentRegistrations,
}

impl<'a> Agent<'a> {
    pub fn new(module_code: &'a str, status: ModuleStatus, namespaces: &'a mut Namespaces) -> Self {
        Agent {
            module_code,
            status,
            namespaces,
            out: AgentRegistrations::default(),
        }
    }

    fn check_phase(&self) -> Result<(), InvalidRegistration> {
        match self.status {
            ModuleStatus::Initializing | ModuleStatus::Ready => Ok(()),
            other => Err(InvalidRegistration::WrongPhase {
                module: self.module_code.to_owned(),
                state: phase_name(other),
            }),
        }
    }

    fn check_duplicate(&self, namespace: &'static str, set_has: bool, key: &str) -> Result<(), InvalidRegistration> {
        if set_has {
            Err(InvalidRegistration::DuplicateKey {
                module: self.module_code.to_owned(),
                namespace,
                key: key.to_owned(),
            })
        } else {
            Ok(())
        }
    }

    fn check_format(&self, ok: bool, name: &str) -> Result<(), InvalidRegistration> {
        if ok {
            Ok(())
        } else {
            Err(InvalidRegistration::BadFormat {
                module: self.module_code.to_owned(),
                name: name.to_owned(),
            })
        }
    }

    pub fn add_route(
        &mut self,
        pattern: impl Into<String>,
        method: Method,
        handler_path: impl Into<String>,
        name: Option<String>,
        middleware: Vec<String>,
    ) -> Result<(), InvalidRegistration> {
        self.check_phase()?;
        let pattern = pattern.into();
        let handler_path = handler_path.into();
        if handler_path.trim().is_empty() {
            return Err(InvalidRegistration::EmptyHandlerPath {
                module: self.module_code.to_owned(),
            });
        }
        crate::route::compile_pattern(&pattern)
            .map_err(|_| InvalidRegistration::BadFormat {
                module: self.module_code.to_owned(),
                name: pattern.clone(),
            })?;
        self.check_duplicate("routes", self.namespaces.regex_routes.contains(&pattern), &pattern)?;
        self.namespaces.regex_routes.insert(pattern.clone());
        self.out.routes.push(PendingRoute {
            pattern,
            method,
            handler_path,
            name,
            middleware,
        });
        Ok(())
    }

    /// Register a route through a [`RouteGroup`]: the group's prefix is
    /// joined onto `pattern` and its middleware stack runs before this
    /// route's own `middleware`, in that order.
    pub fn add_grouped_route(
        &mut self,
        group: &crate::route::RouteGroup,
        pattern: impl Into<String>,
        method: Method,
        handler_path: impl Into<String>,
        name: Option<String>,
        middleware: Vec<String>,
    ) -> Result<(), InvalidRegistration> {
        let full_pattern = group.scoped_pattern(&pattern.into());
        let mut full_middleware = group.middleware_paths();
        full_middleware.extend(middleware);
        self.add_route(full_pattern, method, handler_path, name, full_middleware)
    }

    pub fn add_lazy_route(
        &mut self,
        prefix: impl Into<String>,
        handler_root: impl Into<String>,
    ) -> Result<(), InvalidRegistration> {
        self.check_phase()?;
        let prefix = crate::path_util::normalize(&prefix.into(), false, '/');
        self.check_duplicate("lazy_routes", self.namespaces.lazy_routes.contains(&prefix), &prefix)?;
        self.namespaces.lazy_routes.insert(prefix.clone());
        self.out.lazy_routes.push(PendingLazyRoute {
            prefix,
            handler_root: handler_root.into(),
        });
        Ok(())
    }

    pub fn add_shadow_route(
        &mut self,
        pattern: impl Into<String>,
        target_module: impl Into<String>,
        target_path: impl Into<String>,
    ) -> Result<(), InvalidRegistration> {
        self.check_phase()?;
        let pattern = pattern.into();
        crate::route::compile_pattern(&pattern).map_err(|_| InvalidRegistration::BadFormat {
            module: self.module_code.to_owned(),
            name: pattern.clone(),
        })?;
        self.check_duplicate(
            "shadow_routes",
            self.namespaces.shadow_routes.contains(&pattern),
            &pattern,
        )?;
        self.namespaces.shadow_routes.insert(pattern.clone());
        self.out.shadow_routes.push(PendingShadowRoute {
            pattern,
            target_module: target_module.into(),
            target_path: target_path.into(),
        });
        Ok(())
    }

    pub fn listen(
        &mut self,
        source_module_code: &str,
        event_name: &str,
        handler_path: impl Into<String>,
    ) -> Result<(), InvalidRegistration> {
        self.check_phase()?;
        let key = format!("{source_module_code}:{event_name}");
        self.check_format(event_key_pattern().is_match(&key), &key)?;
        self.check_duplicate("events", self.namespaces.events.contains(&key), &key)?;
        self.namespaces.events.insert(key.clone());
        self.out.listens.push(PendingListen {
            source: key,
            handler_path: handler_path.into(),
        });
        Ok(())
    }

    pub fn add_api_command(
        &mut self,
        command: impl Into<String>,
        handler_path: impl Into<String>,
    ) -> Result<(), InvalidRegistration> {
        self.check_phase()?;
        let command = command.into();
        self.check_format(api_command_pattern().is_match(&command), &command)?;
        self.check_duplicate(
            "api_commands",
            self.namespaces.api_commands.contains(&command),
            &command,
        )?;
        self.namespaces.api_commands.insert(command.clone());
        self.out.api_commands.push(PendingCommand {
            command,
            handler_path: handler_path.into(),
        });
        Ok(())
    }

    pub fn add_bridge_command(
        &mut self,
        command: impl Into<String>,
        handler_path: impl Into<String>,
    ) -> Result<(), InvalidRegistration> {
        self.check_phase()?;
        let command = command.into();
        self.check_format(bridge_command_pattern().is_match(&command), &command)?;
        self.check_duplicate(
            "bridge_commands",
            self.namespaces.bridge_commands.contains(&command),
            &command,
        )?;
        self.namespaces.bridge_commands.insert(command.clone());
        self.out.bridge_commands.push(PendingCommand {
            command,
            handler_path: handler_path.into(),
        });
        Ok(())
    }

    pub fn bind(
        &mut self,
        method_name: impl Into<String>,
        handler_path: impl Into<String>,
    ) -> Result<(), InvalidRegistration> {
        self.check_phase()?;
        let method_name = method_name.into();
        self.check_format(binding_pattern().is_match(&method_name), &method_name)?;
        self.check_duplicate("bindings", self.namespaces.bindings.contains(&method_name), &method_name)?;
        self.namespaces.bindings.insert(method_name.clone());
        self.out.bindings.push(PendingBinding {
            method_name,
            handler_path: handler_path.into(),
        });
        Ok(())
    }

    /// Register module-level middleware: a handler path run before every
    /// one of this module's routes, after any global middleware and before
    /// each route's own middleware (onion order: global -> module -> route
    /// -> handler).
    pub fn middleware(&mut self, handler_path: impl Into<String>) -> Result<(), InvalidRegistration> {
        self.check_phase()?;
        let handler_path = handler_path.into();
        if handler_path.trim().is_empty() {
            return Err(InvalidRegistration::EmptyHandlerPath {
                module: self.module_code.to_owned(),
            });
        }
        self.check_duplicate(
            "middleware",
            self.namespaces.middleware.contains(&handler_path),
            &handler_path,
        )?;
        self.namespaces.middleware.insert(handler_path.clone());
        self.out.module_middleware.push(handler_path);
        Ok(())
    }

    /// Register a client-side/asset script path for this module. Every
    /// registered script is handed to `Controller::on_script_ready` once,
    /// after Phase F completes for this lifecycle pass.
    pub fn add_script(&mut self, path: impl Into<String>) -> Result<(), InvalidRegistration> {
        self.check_phase()?;
        let path = path.into();
        if path.trim().is_empty() {
            return Err(InvalidRegistration::EmptyHandlerPath {
                module: self.module_code.to_owned(),
            });
        }
        self.check_duplicate("scripts", self.namespaces.scripts.contains(&path), &path)?;
        self.namespaces.scripts.insert(path.clone());
        self.out.scripts.push(PendingScript { path });
        Ok(())
    }

    pub fn await_module(
        &mut self,
        target_module: impl Into<String>,
        continuation: Box<dyn FnOnce() + Send>,
    ) -> Result<(), InvalidRegistration> {
        self.check_phase()?;
        self.out.awaits.push(PendingAwait {
            target_module: target_module.into(),
            continuation,
        });
        Ok(())
    }

    #[must_use]
    pub fn group(&self, prefix: impl Into<String>) -> crate::route::RouteGroup {
        crate::route::RouteGroup::new(prefix)
    }
}

fn phase_name(status: ModuleStatus) -> &'static str {
    match status {
        ModuleStatus::Disabled => "DISABLED",
        ModuleStatus::Initializing => "INITIALIZING",
        ModuleStatus::Ready => "READY",
        ModuleStatus::WaitingValidate => "WAITING_VALIDATE",
        ModuleStatus::Preloading => "PRELOADING",
        ModuleStatus::Loaded => "LOADED",
        ModuleStatus::Unloaded => "UNLOADED",
        ModuleStatus::Failed => "FAILED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_registration_outside_init_or_ready() {
        let mut ns = Namespaces::default();
        let mut agent = Agent::new("acme.blog", ModuleStatus::Loaded, &mut ns);
        let err = agent.add_route("/x", Method::Get, "index", None, Vec::new()).unwrap_err();
        assert!(matches!(err, InvalidRegistration::WrongPhase { .. }));
    }

    #[test]
    fn rejects_duplicate_route_pattern_within_module() {
        let mut ns = Namespaces::default();
        let mut agent = Agent::new("acme.blog", ModuleStatus::Initializing, &mut ns);
        agent.add_route("/x", Method::Get, "index", None, Vec::new()).unwrap();
        let err = agent.add_route("/x", Method::Post, "other", None, Vec::new()).unwrap_err();
        assert!(matches!(err, InvalidRegistration::DuplicateKey { .. }));
    }

    #[test]
    fn add_route_carries_its_middleware_list_through() {
        let mut ns = Namespaces::default();
        let mut agent = Agent::new("acme.blog", ModuleStatus::Initializing, &mut ns);
        agent
            .add_route("/x", Method::Get, "index", None, vec!["auth".to_owned()])
            .unwrap();
        assert_eq!(agent.out.routes[0].middleware, vec!["auth".to_owned()]);
    }

    #[test]
    fn grouped_route_gets_prefix_and_group_middleware_ahead_of_its_own() {
        let mut ns = Namespaces::default();
        let mut agent = Agent::new("acme.blog", ModuleStatus::Initializing, &mut ns);
        let group = crate::route::RouteGroup::new("/api").with_middleware("auth");
        agent
            .add_grouped_route(&group, "/users", Method::Get, "index", None, vec!["rate_limit".to_owned()])
            .unwrap();
        assert_eq!(agent.out.routes[0].pattern, "/api/users");
        assert_eq!(agent.out.routes[0].middleware, vec!["auth".to_owned(), "rate_limit".to_owned()]);
    }

    #[test]
    fn rejects_duplicate_middleware_registration() {
        let mut ns = Namespaces::default();
        let mut agent = Agent::new("acme.blog", ModuleStatus::Initializing, &mut ns);
        agent.middleware("mw/auth").unwrap();
        let err = agent.middleware("mw/auth").unwrap_err();
        assert!(matches!(err, InvalidRegistration::DuplicateKey { .. }));
    }

    #[test]
    fn add_script_stages_path_and_rejects_duplicates() {
        let mut ns = Namespaces::default();
        let mut agent = Agent::new("acme.blog", ModuleStatus::Initializing, &mut ns);
        agent.add_script("assets/widget.js").unwrap();
        assert_eq!(agent.out.scripts[0].path, "assets/widget.js");
        let err = agent.add_script("assets/widget.js").unwrap_err();
        assert!(matches!(err, InvalidRegistration::DuplicateKey { .. }));
    }

    #[test]
    fn rejects_malformed_api_command() {
        let mut ns = Namespaces::default();
        let mut agent = Agent::new("acme.blog", ModuleStatus::Initializing, &mut ns);
        let err = agent.add_api_command("Bad-Name", "handler").unwrap_err();
        assert!(matches!(err, InvalidRegistration::BadFormat { .. }));
    }

    #[test]
    fn accepts_hash_prefixed_api_command_and_plain_bridge_command() {
        let mut ns = Namespaces::default();
        let mut agent = Agent::new("acme.blog", ModuleStatus::Ready, &mut ns);
        agent.add_api_command("#internalOnly", "h1").unwrap();
        agent.add_bridge_command("publicCall", "h2").unwrap();
        assert_eq!(agent.out.api_commands.len(), 1);
        assert_eq!(agent.out.bridge_commands.len(), 1);
    }

    #[test]
    fn listen_key_combines_source_module_and_event() {
        let mut ns = Namespaces::default();
        let mut agent = Agent::new("acme.blog", ModuleStatus::Initializing, &mut ns);
        agent.listen("acme.auth", "UserLoggedIn", "onLogin").unwrap();
        assert_eq!(agent.out.listens[0].source, "acme.auth:UserLoggedIn");
    }
}
