//! `dispatch(method, urlPath)`: regex routes before lazy routes, shadow
//! redirection with a 1-deep cycle guard, middleware in onion order, and
//! the `on_routed`/`on_dispatch` peer notifications.

use sitehost_errors::{DispatchError, HttpSignal, RoutingError};

use crate::contracts::{ErrorDecision, HandlerContext, HandlerError, Method, RoutedInfo};
use crate::distributor::Distributor;
use crate::module::{ModuleId, ModuleStatus};
use crate::path_util;

/// Everything that can end a dispatch call without a handler result:
/// the plain `HttpSignal` non-error control flow, a routing conflict, or
/// an unrecovered handler failure.
#[derive(Debug)]
pub enum DispatchOutcome {
    NotFound,
    Redirect { to: String, permanent: bool },
    Routing(RoutingError),
    Failed(DispatchError),
}

impl From<HttpSignal> for DispatchOutcome {
    fn from(signal: HttpSignal) -> Self {
        match signal {
            HttpSignal::NotFound => DispatchOutcome::NotFound,
            HttpSignal::Redirect { to, permanent } => DispatchOutcome::Redirect { to, permanent },
        }
    }
}

struct Matched {
    routed: RoutedInfo,
    owner: ModuleId,
    handler_path: String,
    middleware: Vec<String>,
}

fn loaded_ids(d: &Distributor) -> Vec<ModuleId> {
    d.modules.iter().filter(|m| m.status == ModuleStatus::Loaded).map(|m| m.id).collect()
}

fn owner_code<'a>(d: &'a Distributor, id: ModuleId) -> &'a str {
    &d.modules[id.0].info.code
}

fn find_regex_match(d: &Distributor, method: Method, path: &str, scope: Option<&str>) -> Option<Matched> {
    for entry in &d.regex_routes {
        if let Some(scope_code) = scope {
            if owner_code(d, entry.owner) != scope_code {
                continue;
            }
        }
        if !entry.route.method.accepts(method) {
            continue;
        }
        if let Some(caps) = entry.route.compiled.captures(path) {
            let captures = caps
                .iter()
                .skip(1)
                .filter_map(|m| m.map(|m| m.as_str().to_owned()))
                .collect();
            return Some(Matched {
                routed: RoutedInfo {
                    module_code: owner_code(d, entry.owner).to_owned(),
                    url_path: path.to_owned(),
                    handler_path: entry.route.closure_path.clone(),
                    captures,
                    method,
                    route_name: entry.route.name.clone(),
                },
                owner: entry.owner,
                handler_path: entry.route.closure_path.clone(),
                middleware: d.full_middleware(entry.owner, &entry.route.middleware),
            });
        }
    }
    None
}

fn find_lazy_match(d: &mut Distributor, path: &str, scope: Option<&str>) -> Option<Matched> {
    let candidates: Vec<(String, ModuleId, String)> = d
        .lazy_routes
        .iter()
        .filter(|e| scope.is_none_or(|s| owner_code(d, e.owner) == s))
        .map(|e| (e.prefix.clone(), e.owner, e.handler_root.clone()))
        .collect();
    let sorted = path_util::sort_by_depth_desc(
        candidates
            .into_iter()
            .map(|(prefix, owner, root)| (prefix, (owner, root)))
            .collect(),
    );

    for (prefix, (owner, handler_root)) in sorted {
        if !path_util::is_segment_prefix(&prefix, path) {
            continue;
        }
        let residual = path_util::residual_after(&prefix, path);
        let segments: Vec<String> = residual.split('/').filter(|s| !s.is_empty()).map(str::to_owned).collect();
        let leaf = if segments.is_empty() {
            "@self".to_owned()
        } else {
            segments.join("/")
        };
        let handler_path = path_util::join(&[&handler_root, &leaf]);

        let module_path = d.modules[owner.0].info.path.clone();
        let handler_source = d.handler_source.clone();
        if d.modules[owner.0]
            .get_closure(handler_source.as_ref(), &module_path, &handler_path)
            .is_ok()
        {
            let middleware = d.full_middleware(owner, &[]);
            return Some(Matched {
                routed: RoutedInfo {
                    module_code: owner_code(d, owner).to_owned(),
                    url_path: path.to_owned(),
                    handler_path: handler_path.clone(),
                    captures: segments,
                    method: Method::Any,
                    route_name: None,
                },
                owner,
                handler_path,
                middleware,
            });
        }
    }
    None
}

fn resolve(
    d: &mut Distributor,
    method: Method,
    path: &str,
    scope: Option<&str>,
    shadow_depth: u8,
) -> Result<Option<Matched>, RoutingError> {
    if shadow_depth > 1 {
        return Err(RoutingError::ShadowCycle { path: path.to_owned() });
    }

    for entry in &d.shadow_routes {
        if let Some(scope_code) = scope {
            if owner_code(d, entry.owner) != scope_code {
                continue;
            }
        }
        if entry.compiled.is_match(path) {
            let target_module = entry.target_module.clone();
            let target_path = entry.target_path.clone();
            return resolve(d, method, &target_path, Some(&target_module), shadow_depth + 1);
        }
    }

    if let Some(m) = find_regex_match(d, method, path, scope) {
        return Ok(Some(m));
    }
    Ok(find_lazy_match(d, path, scope))
}

/// Run `dispatch(method, urlPath)`. `urlPath` is mount-relative (the
/// `Domain`/`Distributor` boundary already stripped the mount prefix).
pub fn dispatch(distributor: &mut Distributor, method: Method, raw_path: &str) -> Result<serde_json::Value, DispatchOutcome> {
    let normalized = path_util::normalize(raw_path, false, '/');
    let path = if normalized.is_empty() { "/".to_owned() } else { normalized };

    let matched = resolve(distributor, method, &path, None, 0).map_err(DispatchOutcome::Routing)?;
    let Some(matched) = matched else {
        return Err(HttpSignal::NotFound.into());
    };

    distributor.current_routed = Some(matched.routed.clone());

    for id in loaded_ids(distributor) {
        if id == matched.owner {
            continue;
        }
        let controller = distributor.modules[id.0].controller.clone();
        if let Err(err) = controller.on_routed(&matched.routed) {
            tracing::warn!(module = %owner_code(distributor, id), error = %err, "on_routed failed; isolated");
        }
    }

    let result = run_handler_chain(distributor, &matched);

    for id in loaded_ids(distributor) {
        let controller = distributor.modules[id.0].controller.clone();
        if let Err(err) = controller.on_dispatch() {
            tracing::warn!(module = %owner_code(distributor, id), error = %err, "on_dispatch failed; isolated");
        }
    }

    result
}

fn run_handler_chain(distributor: &mut Distributor, matched: &Matched) -> Result<serde_json::Value, DispatchOutcome> {
    let module_path = distributor.modules[matched.owner.0].info.path.clone();
    let handler_source = distributor.handler_source.clone();

    let controller = distributor.modules[matched.owner.0].controller.clone();
    if let Err(err) = controller.on_entry(&matched.routed) {
        return Err(DispatchOutcome::Failed(DispatchError {
            module: matched.routed.module_code.clone(),
            handler: matched.handler_path.clone(),
            source: err,
        }));
    }

    let ctx = HandlerContext {
        captures: matched.routed.captures.clone(),
        routed: Some(matched.routed.clone()),
        args: serde_json::Value::Null,
        caller: None,
    };

    for mw_path in &matched.middleware {
        let handler = distributor.modules[matched.owner.0]
            .get_closure(handler_source.as_ref(), &module_path, mw_path)
            .map_err(|e| DispatchOutcome::Failed(DispatchError {
                module: matched.routed.module_code.clone(),
                handler: mw_path.clone(),
                source: e.into(),
            }))?;
        if let Err(err) = handler(&ctx) {
            return handle_failure(distributor, matched, mw_path, err);
        }
    }

    let handler = match distributor.modules[matched.owner.0].get_closure(handler_source.as_ref(), &module_path, &matched.handler_path) {
        Ok(h) => h,
        Err(e) => {
            return Err(DispatchOutcome::Failed(DispatchError {
                module: matched.routed.module_code.clone(),
                handler: matched.handler_path.clone(),
                source: e.into(),
            }))
        }
    };

    match handler(&ctx) {
        Ok(value) => Ok(value),
        Err(err) => handle_failure(distributor, matched, &matched.handler_path, err),
    }
}

/// A failing middleware/handler either surfaces a plain `HttpSignal`, gets
/// recovered by the owning module's `on_error` (treated as a successful
/// empty response), or propagates as a `DispatchError`.
fn handle_failure(
    distributor: &Distributor,
    matched: &Matched,
    handler_path: &str,
    err: HandlerError,
) -> Result<serde_json::Value, DispatchOutcome> {
    match err {
        HandlerError::Signal(signal) => Err(DispatchOutcome::from(signal)),
        HandlerError::Failure(anyhow_err) => {
            let controller = distributor.modules[matched.owner.0].controller.clone();
            match controller.on_error(handler_path, &anyhow_err) {
                ErrorDecision::Recovered => Ok(serde_json::Value::Null),
                ErrorDecision::Propagate => Err(DispatchOutcome::Failed(DispatchError {
                    module: matched.routed.module_code.clone(),
                    handler: handler_path.to_owned(),
                    source: anyhow_err,
                })),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    use sitehost_errors::ModuleLoadError;

    use super::*;
    use crate::config::DistributorConfig;
    use crate::contracts::{Controller, HandlerFn};
    use crate::distributor::{CompiledRoute, Distributor, LazyEntry, ShadowEntry};
    use crate::identifier::DistributorIdentifier;
    use crate::module::{Module, ModuleId, ModuleStatus};
    use crate::module_info::ModuleInfo;
    use crate::route::Route;

    struct DummyController;
    impl Controller for DummyController {}

    struct StubHandlerSource {
        handlers: HashMap<String, HandlerFn>,
    }

    impl crate::contracts::HandlerSource for StubHandlerSource {
        fn resolve(&self, _module_path: &Path, handler_path: &str) -> Result<HandlerFn, ModuleLoadError> {
            self.handlers
                .get(handler_path)
                .cloned()
                .ok_or_else(|| ModuleLoadError::HandlerNotFound {
                    module: "test".to_owned(),
                    path: handler_path.to_owned(),
                })
        }
    }

    fn info(code: &str) -> ModuleInfo {
        ModuleInfo {
            code: code.to_owned(),
            class_name: code.to_owned(),
            alias: code.to_owned(),
            version: "1.0.0".to_owned(),
            requires: Default::default(),
            api_code: None,
            author: None,
            path: format!("/mods/{code}").into(),
            shared: false,
        }
    }

    fn loaded_module(id: usize, code: &str) -> Module {
        let mut m = Module::new(ModuleId(id), info(code), Arc::new(DummyController));
        m.set_status(ModuleStatus::Initializing);
        m.set_status(ModuleStatus::WaitingValidate);
        m.set_status(ModuleStatus::Ready);
        m.set_status(ModuleStatus::Loaded);
        m
    }

    fn ok_handler(tag: &'static str) -> HandlerFn {
        Arc::new(move |_ctx| Ok(serde_json::json!(tag)))
    }

    fn fixture(handlers: Vec<(&str, HandlerFn)>) -> Distributor {
        let handler_source = Arc::new(StubHandlerSource {
            handlers: handlers.into_iter().map(|(k, v)| (k.to_owned(), v)).collect(),
        });
        let mut d = Distributor::new(
            DistributorIdentifier::parse("acme").unwrap(),
            "/",
            DistributorConfig::default(),
            handler_source,
        );
        d.modules.push(loaded_module(0, "acme.api"));
        d.modules.push(loaded_module(1, "acme.legacy"));
        d.module_index.insert("acme.api".to_owned(), ModuleId(0));
        d.module_index.insert("acme.legacy".to_owned(), ModuleId(1));
        d
    }

    #[test]
    fn regex_route_wins_over_overlapping_lazy_route() {
        let mut d = fixture(vec![
            ("handlers/special.php", ok_handler("regex")),
            ("lazy/special", ok_handler("lazy")),
        ]);
        d.regex_routes.push(CompiledRoute {
            route: Route {
                raw_pattern: "/api/special".to_owned(),
                compiled: crate::route::compile_pattern("/api/special").unwrap(),
                closure_path: "handlers/special.php".to_owned(),
                method: Method::Any,
                name: None,
                middleware: Vec::new(),
            },
            owner: ModuleId(0),
        });
        d.lazy_routes.push(LazyEntry {
            prefix: "/api".to_owned(),
            owner: ModuleId(1),
            handler_root: "lazy".to_owned(),
        });

        let result = dispatch(&mut d, Method::Get, "/api/special").unwrap();
        assert_eq!(result, serde_json::json!("regex"));
    }

    #[test]
    fn lazy_route_falls_back_when_no_regex_route_matches() {
        let mut d = fixture(vec![("lazy/users/@self", ok_handler("lazy-users"))]);
        d.lazy_routes.push(LazyEntry {
            prefix: "/api/users".to_owned(),
            owner: ModuleId(1),
            handler_root: "lazy/users".to_owned(),
        });

        let result = dispatch(&mut d, Method::Get, "/api/users").unwrap();
        assert_eq!(result, serde_json::json!("lazy-users"));
    }

    #[test]
    fn unmatched_path_yields_not_found() {
        let mut d = fixture(vec![]);
        let err = dispatch(&mut d, Method::Get, "/nope").unwrap_err();
        assert!(matches!(err, DispatchOutcome::NotFound));
    }

    #[test]
    fn shadow_route_redirects_into_the_target_module() {
        let mut d = fixture(vec![("new_handler.php", ok_handler("redirected"))]);
        d.regex_routes.push(CompiledRoute {
            route: Route {
                raw_pattern: "/new".to_owned(),
                compiled: crate::route::compile_pattern("/new").unwrap(),
                closure_path: "new_handler.php".to_owned(),
                method: Method::Any,
                name: None,
                middleware: Vec::new(),
            },
            owner: ModuleId(1),
        });
        d.shadow_routes.push(ShadowEntry {
            compiled: crate::route::compile_pattern("/legacy").unwrap(),
            raw_pattern: "/legacy".to_owned(),
            owner: ModuleId(0),
            target_module: "acme.legacy".to_owned(),
            target_path: "/new".to_owned(),
        });

        let result = dispatch(&mut d, Method::Get, "/legacy").unwrap();
        assert_eq!(result, serde_json::json!("redirected"));
    }

    #[test]
    fn shadow_cycle_beyond_depth_one_is_rejected() {
        let mut d = fixture(vec![]);
        d.shadow_routes.push(ShadowEntry {
            compiled: crate::route::compile_pattern("/loop").unwrap(),
            raw_pattern: "/loop".to_owned(),
            owner: ModuleId(0),
            target_module: "acme.legacy".to_owned(),
            target_path: "/loop".to_owned(),
        });
        d.shadow_routes.push(ShadowEntry {
            compiled: crate::route::compile_pattern("/loop").unwrap(),
            raw_pattern: "/loop".to_owned(),
            owner: ModuleId(1),
            target_module: "acme.api".to_owned(),
            target_path: "/loop".to_owned(),
        });

        let err = dispatch(&mut d, Method::Get, "/loop").unwrap_err();
        assert!(matches!(err, DispatchOutcome::Routing(RoutingError::ShadowCycle { .. })));
    }

    #[test]
    fn middleware_runs_in_onion_order_before_the_handler() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

        let recording_handler = |tag: &'static str| -> HandlerFn {
            let seen = seen.clone();
            Arc::new(move |_ctx| {
                seen.lock().unwrap().push(tag);
                Ok(serde_json::Value::Null)
            })
        };

        let mut d = fixture(vec![
            ("mw/global.php", recording_handler("global")),
            ("mw/module.php", recording_handler("module")),
            ("mw/route.php", recording_handler("route")),
            ("handlers/home.php", recording_handler("handler")),
        ]);
        d.global_middleware.push("mw/global.php".to_owned());
        d.module_middleware.insert(ModuleId(0), vec!["mw/module.php".to_owned()]);
        d.regex_routes.push(CompiledRoute {
            route: Route {
                raw_pattern: "/home".to_owned(),
                compiled: crate::route::compile_pattern("/home").unwrap(),
                closure_path: "handlers/home.php".to_owned(),
                method: Method::Any,
                name: None,
                middleware: vec![crate::route::MiddlewareRef("mw/route.php".to_owned())],
            },
            owner: ModuleId(0),
        });

        dispatch(&mut d, Method::Get, "/home").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["global", "module", "route", "handler"]);
    }
}
