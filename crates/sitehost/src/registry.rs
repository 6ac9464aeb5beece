//! Compile-time module registry: modules self-register a `Controller`
//! factory keyed by `code` via `inventory::submit!`, combining
//! filesystem-manifest discovery with Rust's static plugin model.

use std::collections::HashMap;
use std::sync::Arc;

use crate::contracts::Controller;

pub type ControllerFactory = fn() -> Arc<dyn Controller>;

/// One compiled module's registration: the `ModuleInfo.code` it answers to,
/// and a factory that builds a fresh `Controller` instance.
pub struct Registrator {
    pub code: &'static str,
    pub factory: ControllerFactory,
}

inventory::collect!(Registrator);

/// Register a `Controller` factory for `code`. Call at module scope (not
/// inside a function body) so `inventory` can collect it at static-init
/// time.
#[macro_export]
macro_rules! register_module {
    ($code:expr, $factory:expr) => {
        $crate::inventory::submit! {
            $crate::registry::Registrator { code: $code, factory: $factory }
        }
    };
}

/// The process-wide catalog of compiled modules, built once via
/// [`ModuleRegistry::discover`] and consulted by `Distributor`'s Phase A
/// (discovery) to resolve a `ModuleInfo.code` to a `Controller` factory.
pub struct ModuleRegistry {
    factories: HashMap<&'static str, ControllerFactory>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::discover()
    }
}

impl ModuleRegistry {
    #[must_use]
    pub fn discover() -> Self {
        let mut factories = HashMap::new();
        for registrator in inventory::iter::<Registrator> {
            factories.insert(registrator.code, registrator.factory);
        }
        ModuleRegistry { factories }
    }

    #[must_use]
    pub fn factory_for(&self, code: &str) -> Option<ControllerFactory> {
        self.factories.get(code).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyController;
    impl Controller for DummyController {}

    fn build_dummy() -> Arc<dyn Controller> {
        Arc::new(DummyController)
    }

    register_module!("acme.dummy.for_registry_test", build_dummy);

    #[test]
    fn discovered_registry_contains_statically_submitted_module() {
        let registry = ModuleRegistry::discover();
        assert!(registry.factory_for("acme.dummy.for_registry_test").is_some());
        assert!(registry.factory_for("acme.nonexistent").is_none());
    }
}
