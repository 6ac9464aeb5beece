//! FQDN routing, distributor selection, and module-lifecycle engine for a
//! multi-tenant web application host.
//!
//! Entry points: [`application::Application`] is the top-level coordinator;
//! [`domain::Domain`] resolves a matched FQDN's mount table;
//! [`distributor::Distributor`] owns one mounted site's module graph, route
//! tables, and dispatch/RPC algorithms; [`contracts::Controller`] is the
//! module author's code contract.

pub mod agent;
pub mod application;
pub mod config;
pub mod contracts;
pub mod distributor;
pub mod domain;
pub mod fqdn;
pub mod identifier;
pub mod module;
pub mod module_info;
pub mod path_util;
pub mod registry;
pub mod requirement;
pub mod route;
pub mod site_registry;

#[cfg(feature = "bootstrap")]
pub mod bootstrap;

/// Re-exported so `register_module!` can expand to `$crate::inventory::submit!`
/// from a downstream crate without that crate depending on `inventory`
/// directly.
pub use inventory;
