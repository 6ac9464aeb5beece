//! Phases A-F of the module lifecycle, synchronous (no
//! cancellation/timeouts, no async fan-out from the core itself).
//! Structured as ordered `run_*_phase` calls, but collapsed into one
//! worklist for Phases D/E/F since a module's VALIDATE->READY->LOADED
//! transition can unblock a peer stuck in PRELOADING and must be observed
//! within the same `initialize()` call.

use crate::agent::Agent;
use crate::config::{ModuleDiscoverySource, ModuleRef};
use crate::distributor::Distributor;
use crate::module::{Module, ModuleId, ModuleStatus};
use crate::module_info::ModuleInfo;
use crate::registry::ModuleRegistry;
use crate::requirement::version_satisfies;

/// Run the full Phase A-F lifecycle. `scan_only` stops after Phase B
/// (discovery + requirement resolution), matching `initialize(scanOnly?)`.
pub fn initialize(
    distributor: &mut Distributor,
    discovery: &dyn ModuleDiscoverySource,
    registry: &ModuleRegistry,
    scan_only: bool,
) {
    phase_a_discovery(distributor, discovery, registry);
    phase_b_requirements(distributor);
    if scan_only {
        return;
    }
    phase_c_init(distributor);
    run_validate_load_notify_cascade(distributor);
}

fn phase_a_discovery(distributor: &mut Distributor, discovery: &dyn ModuleDiscoverySource, registry: &ModuleRegistry) {
    let refs: Vec<(ModuleRef, bool)> = distributor
        .config
        .modules
        .iter()
        .cloned()
        .map(|r| (r, false))
        .chain(distributor.config.shared_modules.iter().cloned().map(|r| (r, true)))
        .collect();

    for (module_ref, shared) in refs {
        let manifests = match discovery.discover_modules(&module_ref.path) {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(path = %module_ref.path, error = %err, "module discovery failed for scan path");
                continue;
            }
        };

        for (manifest, path) in manifests {
            let code = manifest.code.clone();
            let info = match ModuleInfo::from_manifest(manifest, path, shared) {
                Ok(info) => info,
                Err(err) => {
                    tracing::warn!(code = %code, error = %err, "dropping module with invalid manifest");
                    continue;
                }
            };

            if distributor.module_index.contains_key(&info.code) {
                let id = ModuleId(distributor.modules.len());
                let dup_code = info.code.clone();
                let placeholder = placeholder_controller();
                let mut dup = Module::new(id, info, placeholder);
                dup.set_status(ModuleStatus::Unloaded);
                distributor.modules.push(dup);
                tracing::warn!(code = %dup_code, "duplicate module code; keeping first discovery, marking UNLOADED");
                continue;
            }

            let Some(factory) = registry.factory_for(&info.code) else {
                tracing::warn!(code = %info.code, "no compiled controller registered for module code; excluding");
                continue;
            };

            let id = ModuleId(distributor.modules.len());
            let module = Module::new(id, info, factory());
            distributor.module_index.insert(module.info.code.clone(), id);
            if let Some(api_code) = module.info.api_code.clone() {
                distributor.api_group_index.insert(api_code, id);
            }
            distributor.modules.push(module);
        }
    }
}

fn placeholder_controller() -> std::sync::Arc<dyn crate::contracts::Controller> {
    struct Placeholder;
    impl crate::contracts::Controller for Placeholder {}
    std::sync::Arc::new(Placeholder)
}

fn phase_b_requirements(distributor: &mut Distributor) {
    let ids: Vec<ModuleId> = distributor
        .modules
        .iter()
        .filter(|m| m.status == ModuleStatus::Disabled)
        .map(|m| m.id)
        .collect();

    for id in ids {
        let requires = distributor.modules[id.0].info.requires.clone();
        let mut unmet = None;
        for (dep_code, range) in &requires {
            let dep_version = distributor
                .module_index
                .get(dep_code)
                .filter(|dep_id| distributor.modules[dep_id.0].status != ModuleStatus::Unloaded)
                .map(|dep_id| distributor.modules[dep_id.0].info.version.clone());
            match dep_version {
                Some(v) if version_satisfies(&v, range) => {}
                _ => {
                    unmet = Some(dep_code.clone());
                    break;
                }
            }
        }
        if let Some(dep_code) = unmet {
            let code = distributor.modules[id.0].info.code.clone();
            tracing::warn!(module = %code, requires = %dep_code, "unmet requirement; marking UNLOADED");
            distributor.modules[id.0].set_status(ModuleStatus::Unloaded);
        }
    }
}

fn phase_c_init(distributor: &mut Distributor) {
    let ids: Vec<ModuleId> = distributor
        .modules
        .iter()
        .filter(|m| m.status == ModuleStatus::Disabled)
        .map(|m| m.id)
        .collect();

    for id in ids {
        distributor.modules[id.0].set_status(ModuleStatus::Initializing);
        let controller = std::sync::Arc::clone(&distributor.modules[id.0].controller);
        let module_code = distributor.modules[id.0].info.code.clone();

        let (result, regs) = {
            let mut agent = Agent::new(&module_code, ModuleStatus::Initializing, &mut distributor.modules[id.0].namespaces);
            let result = controller.on_init(&mut agent);
            (result, agent.out)
        };

        match result {
            Ok(true) => {
                if let Err(err) = distributor.drain_registrations(id, regs) {
                    tracing::warn!(module = %module_code, error = %err, "registration drain failed during on_init");
                    distributor.modules[id.0].set_status(ModuleStatus::Failed);
                    continue;
                }
                distributor.modules[id.0].set_status(ModuleStatus::WaitingValidate);
            }
            Ok(false) => {
                distributor.modules[id.0].set_status(ModuleStatus::Failed);
            }
            Err(err) => {
                tracing::warn!(module = %module_code, error = %err, "on_init failed");
                distributor.modules[id.0].set_status(ModuleStatus::Failed);
            }
        }
    }
}

/// Phases D (VALIDATE, with PRELOADING retry), E (LOAD), and F (NOTIFY),
/// interleaved into one worklist so a peer's LOAD can unblock a module
/// still retrying VALIDATE within the same pass. Bounded by `module_count`
/// passes since there are no back-edges from LOADED.
fn run_validate_load_notify_cascade(distributor: &mut Distributor) {
    for id in waiting_validate_ids(distributor) {
        validate_one(distributor, id);
    }

    loop {
        let mut progressed = false;

        for id in preloading_ids(distributor) {
            if validate_one(distributor, id) {
                progressed = true;
            }
        }

        for id in ready_ids(distributor) {
            if load_one(distributor, id) {
                progressed = true;
            }
        }

        if !progressed {
            break;
        }
    }

    for id in preloading_ids(distributor) {
        distributor.modules[id.0].set_status(ModuleStatus::Unloaded);
    }

    for id in loaded_ids(distributor) {
        distributor.modules[id.0].controller.clone().on_ready();
    }
    for id in loaded_ids(distributor) {
        let scripts = distributor.scripts.get(&id).cloned().unwrap_or_default();
        distributor.modules[id.0].controller.clone().on_script_ready(&scripts);
    }
}

fn waiting_validate_ids(d: &Distributor) -> Vec<ModuleId> {
    d.modules.iter().filter(|m| m.status == ModuleStatus::WaitingValidate).map(|m| m.id).collect()
}
fn preloading_ids(d: &Distributor) -> Vec<ModuleId> {
    d.modules.iter().filter(|m| m.status == ModuleStatus::Preloading).map(|m| m.id).collect()
}
fn ready_ids(d: &Distributor) -> Vec<ModuleId> {
    d.modules.iter().filter(|m| m.status == ModuleStatus::Ready).map(|m| m.id).collect()
}
fn loaded_ids(d: &Distributor) -> Vec<ModuleId> {
    d.modules.iter().filter(|m| m.status == ModuleStatus::Loaded).map(|m| m.id).collect()
}

/// Returns true iff this call promoted the module to READY.
fn validate_one(distributor: &mut Distributor, id: ModuleId) -> bool {
    let controller = std::sync::Arc::clone(&distributor.modules[id.0].controller);
    if controller.on_require() {
        distributor.modules[id.0].set_status(ModuleStatus::Ready);
        true
    } else if distributor.modules[id.0].status == ModuleStatus::WaitingValidate {
        distributor.modules[id.0].set_status(ModuleStatus::Preloading);
        false
    } else {
        false
    }
}

/// Returns true iff this call loaded the module.
fn load_one(distributor: &mut Distributor, id: ModuleId) -> bool {
    let controller = std::sync::Arc::clone(&distributor.modules[id.0].controller);
    let module_code = distributor.modules[id.0].info.code.clone();

    let (result, regs) = {
        let mut agent = Agent::new(&module_code, ModuleStatus::Ready, &mut distributor.modules[id.0].namespaces);
        let result = controller.on_load(&mut agent);
        (result, agent.out)
    };

    match result {
        Ok(true) => {
            if let Err(err) = distributor.drain_registrations(id, regs) {
                tracing::warn!(module = %module_code, error = %err, "registration drain failed during on_load");
                distributor.modules[id.0].set_status(ModuleStatus::Failed);
                return false;
            }
            distributor.modules[id.0].set_status(ModuleStatus::Loaded);
            distributor.fire_await_waiters(&module_code);
            true
        }
        Ok(false) => {
            distributor.modules[id.0].set_status(ModuleStatus::Failed);
            false
        }
        Err(err) => {
            tracing::warn!(module = %module_code, error = %err, "on_load failed");
            distributor.modules[id.0].set_status(ModuleStatus::Failed);
            false
        }
    }
}
