//! Deciding what a namespace's store should look like and converging on it
//!
//! The desired state of a namespace is derived purely from its labels:
//! a namespace carrying the target label with the exact target value should have a store,
//! anything else (including deletion) should not. Two idempotent operations converge on that:
//! [`Reconciler::ensure_present`] and [`Reconciler::ensure_absent`].
use std::{sync::Arc, time::Duration};

use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::{
    api::{bounded, NamespaceInfo, StoreApi},
    error::{ApiError, ReconcileError},
    labels::{self, DEFAULT_TARGET_LABEL_KEY, DEFAULT_TARGET_LABEL_VALUE},
    render::render,
    template::TemplateStore,
};

/// Default prefix of derived store names
pub const DEFAULT_NAME_PREFIX: &str = "k8s-";
/// Default bound on every cluster call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
/// Default number of namespaces reconciled in parallel
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Reconciler settings, fixed at startup
#[derive(Clone, Debug)]
pub struct Settings {
    /// Label key selecting opted-in namespaces
    pub target_label_key: String,
    /// Label value selecting opted-in namespaces
    pub target_label_value: String,
    /// Prefix prepended to the namespace name to derive the store name
    pub name_prefix: String,
    /// Bound on every cluster call
    pub call_timeout: Duration,
    /// Namespaces reconciled in parallel by the passes and the event driver
    pub concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_label_key: DEFAULT_TARGET_LABEL_KEY.into(),
            target_label_value: DEFAULT_TARGET_LABEL_VALUE.into(),
            name_prefix: DEFAULT_NAME_PREFIX.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl Settings {
    /// Name of the store belonging to `namespace`
    pub fn store_name(&self, namespace: &str) -> String {
        format!("{}{}", self.name_prefix, namespace)
    }

    /// Where `namespace` stands with respect to this operator
    pub fn state(&self, namespace: &NamespaceInfo) -> NamespaceState {
        if namespace.terminating {
            return NamespaceState::ShouldNotExist;
        }
        match namespace.labels.get(&self.target_label_key) {
            Some(value) if *value == self.target_label_value => NamespaceState::ShouldExist,
            Some(_) => NamespaceState::ShouldNotExist,
            None => NamespaceState::Unmanaged,
        }
    }
}

/// Desired store state of a namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceState {
    /// The target label is absent
    ///
    /// Without persisted state this is indistinguishable from a removed label,
    /// so it converges like [`NamespaceState::ShouldNotExist`]. For a namespace that was never
    /// opted in that is a single read that finds nothing.
    Unmanaged,
    /// The target label carries the target value
    ShouldExist,
    /// The target label carries any other value, or the namespace is going away
    ShouldNotExist,
}

/// Namespace lifecycle verbs the reconciler reacts to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// The namespace was first observed
    Created,
    /// The namespace changed
    Updated,
    /// The namespace was deleted
    Deleted,
}

/// A namespace lifecycle notification
#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceEvent {
    /// What happened
    pub verb: Verb,
    /// The namespace as observed with the event
    pub namespace: NamespaceInfo,
}

impl NamespaceEvent {
    /// Build an event
    pub fn new(verb: Verb, namespace: NamespaceInfo) -> Self {
        Self { verb, namespace }
    }
}

/// What a successful reconciliation did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A new store was created
    Created,
    /// A store with the derived name already existed; left as is
    AlreadyPresent,
    /// The owned store was deleted
    Deleted,
    /// There was no store to delete
    AlreadyAbsent,
    /// A store exists but was not created by this operator; left alone
    SkippedForeign,
    /// Nothing is registered for the event
    Ignored,
}

/// The only component that decides and acts on store state
pub struct Reconciler {
    pub(crate) settings: Settings,
    templates: TemplateStore,
    pub(crate) stores: Arc<dyn StoreApi>,
}

impl Reconciler {
    /// Create a reconciler rendering from `templates` and acting through `stores`
    pub fn new(settings: Settings, templates: TemplateStore, stores: Arc<dyn StoreApi>) -> Self {
        Self {
            settings,
            templates,
            stores,
        }
    }

    /// The settings this reconciler was built with
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// React to one namespace event
    ///
    /// Failures are logged here with the namespace and the failing operation, and returned
    /// for the caller to count; they never abort anything beyond this attempt.
    pub async fn reconcile(&self, event: &NamespaceEvent) -> Result<Outcome, ReconcileError> {
        let ns = &event.namespace;
        let state = self.settings.state(ns);
        debug!(namespace = %ns.name, verb = ?event.verb, ?state, "reconciling");
        let result = match (event.verb, state) {
            (Verb::Deleted, _) => self.ensure_absent(&ns.name).await,
            (_, NamespaceState::ShouldExist) => self.ensure_present(ns).await,
            (_, NamespaceState::ShouldNotExist | NamespaceState::Unmanaged) => {
                self.ensure_absent(&ns.name).await
            }
        };
        report(&ns.name, &result);
        result
    }

    /// Make sure the store for `namespace` exists
    ///
    /// An existing store with the derived name counts as success without comparing its
    /// contents; template edits are not pushed to stores that already exist.
    pub async fn ensure_present(&self, namespace: &NamespaceInfo) -> Result<Outcome, ReconcileError> {
        let name = self.settings.store_name(&namespace.name);
        let template = self
            .templates
            .fetch_template()
            .await
            .map_err(|source| ReconcileError::Template {
                namespace: namespace.name.clone(),
                source,
            })?;
        let store = render(&template, namespace, &name).map_err(|source| ReconcileError::Render {
            name: name.clone(),
            source,
        })?;

        match bounded("create store", self.settings.call_timeout, self.stores.create(&store)).await {
            Ok(()) => {
                info!(namespace = %namespace.name, store = %name, "created ClusterSecretStore");
                Ok(Outcome::Created)
            }
            Err(ApiError::AlreadyExists) => {
                debug!(namespace = %namespace.name, store = %name, "ClusterSecretStore already exists");
                Ok(Outcome::AlreadyPresent)
            }
            Err(source) => Err(ReconcileError::Create { name, source }),
        }
    }

    /// Make sure no owned store exists for the namespace called `namespace`
    ///
    /// Stores without the identity label are never touched.
    pub async fn ensure_absent(&self, namespace: &str) -> Result<Outcome, ReconcileError> {
        let name = self.settings.store_name(namespace);
        let timeout = self.settings.call_timeout;

        let store = match bounded("get store", timeout, self.stores.get(&name)).await {
            Ok(store) => store,
            Err(ApiError::NotFound) => {
                debug!(%namespace, store = %name, "no ClusterSecretStore to delete");
                return Ok(Outcome::AlreadyAbsent);
            }
            Err(source) => return Err(ReconcileError::Get { name, source }),
        };

        if !labels::is_owned(store.labels()) {
            info!(%namespace, store = %name, "skipping ClusterSecretStore not created by this operator");
            return Ok(Outcome::SkippedForeign);
        }

        match bounded("delete store", timeout, self.stores.delete(&name)).await {
            Ok(()) => {
                info!(%namespace, store = %name, "deleted ClusterSecretStore");
                Ok(Outcome::Deleted)
            }
            Err(ApiError::NotFound) => {
                debug!(%namespace, store = %name, "ClusterSecretStore disappeared before deletion");
                Ok(Outcome::AlreadyAbsent)
            }
            Err(source) => Err(ReconcileError::Delete { name, source }),
        }
    }
}

/// Log a failed attempt; template faults are shouted since they affect every namespace
pub(crate) fn report(namespace: &str, result: &Result<Outcome, ReconcileError>) {
    match result {
        Ok(outcome) => debug!(%namespace, ?outcome, "reconciled"),
        Err(err) if err.is_template_fault() => {
            error!(
                %namespace,
                error = %err,
                "store template is unusable, every opted-in namespace is affected"
            )
        }
        Err(err) => warn!(%namespace, error = %err, "reconciliation failed"),
    }
}
