//! Keeps one External Secrets `ClusterSecretStore` per opted-in namespace
//!
//! A namespace opts in by carrying a configurable label with a configurable value.
//! For every such namespace a cluster-scoped store is rendered from a template kept in a
//! `ConfigMap`, labeled as belonging to this operator and owned by the namespace.
//! When the label goes away, changes value, or the namespace is deleted, the store is removed.
//! Stores this operator did not create are never modified or deleted.
//!
//! The moving parts:
//! - [`reconciler::Reconciler`] decides and acts, one namespace at a time
//! - [`passes`] sweeps the whole cluster at startup and teardown
//! - [`watch`] turns the namespace watch into lifecycle events
//! - [`dispatch`] routes those events to handlers with per-namespace ordering
//! - [`lifecycle::Lifecycle`] runs the sweeps around the event loop
//! - [`context::ClusterContext`] builds the kube-backed collaborators from one client

pub mod api;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod labels;
pub mod lifecycle;
pub mod passes;
pub mod reconciler;
pub mod render;
pub mod template;
pub mod watch;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use context::ClusterContext;
pub use error::{ApiError, ReconcileError};
pub use lifecycle::Lifecycle;
pub use reconciler::{NamespaceEvent, Outcome, Reconciler, Settings, Verb};
