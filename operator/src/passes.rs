//! Whole-cluster sweeps run at startup and teardown
use futures::{stream, StreamExt};
use kube::ResourceExt;
use tracing::{info, warn};

use crate::{
    api::{bounded, NamespaceSource},
    error::{ApiError, ReconcileError},
    labels,
    reconciler::{report, NamespaceState, Reconciler},
};

/// Counts from a sweep, for logging
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationSummary {
    /// Namespaces (or stores) a sweep acted on
    pub attempted: usize,
    /// How many of those succeeded
    pub succeeded: usize,
}

impl ReconciliationSummary {
    /// How many attempts failed
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }

    fn record<T, E>(&mut self, result: &Result<T, E>) {
        self.attempted += 1;
        if result.is_ok() {
            self.succeeded += 1;
        }
    }
}

impl Reconciler {
    /// Ensure a store exists for every opted-in namespace
    ///
    /// Catches up on opt-ins missed while the operator was not running. Namespaces that
    /// should not have a store are left to event handling and [`Reconciler::cleanup_all`].
    /// Only a failure to list namespaces is returned; individual failures are counted.
    pub async fn reconcile_all(
        &self,
        namespaces: &dyn NamespaceSource,
    ) -> Result<ReconciliationSummary, ReconcileError> {
        let all = bounded("list namespaces", self.settings.call_timeout, namespaces.list())
            .await
            .map_err(|source| ReconcileError::List {
                what: "namespaces",
                source,
            })?;
        let targets: Vec<_> = all
            .into_iter()
            .filter(|ns| self.settings.state(ns) == NamespaceState::ShouldExist)
            .collect();
        info!(count = targets.len(), "reconciling existing opted-in namespaces");

        let summary = stream::iter(targets)
            .map(|ns| async move {
                let result = self.ensure_present(&ns).await;
                report(&ns.name, &result);
                result
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .fold(ReconciliationSummary::default(), |mut summary, result| async move {
                summary.record(&result);
                summary
            })
            .await;
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            "finished reconciling existing namespaces"
        );
        Ok(summary)
    }

    /// Delete every store this operator owns, cluster-wide
    ///
    /// Used when decommissioning the operator. Foreign stores are never listed for deletion,
    /// and one failed deletion does not stop the others.
    pub async fn cleanup_all(&self) -> Result<ReconciliationSummary, ReconcileError> {
        let timeout = self.settings.call_timeout;
        let stores = bounded("list stores", timeout, self.stores.list_all())
            .await
            .map_err(|source| ReconcileError::List {
                what: "ClusterSecretStores",
                source,
            })?;
        let owned: Vec<String> = stores
            .iter()
            .filter(|store| labels::is_owned(store.labels()))
            .map(|store| store.name_any())
            .collect();
        info!(count = owned.len(), "cleaning up owned ClusterSecretStores");

        let summary = stream::iter(owned)
            .map(|name| async move {
                let result = match bounded("delete store", timeout, self.stores.delete(&name)).await {
                    Ok(()) | Err(ApiError::NotFound) => Ok(()),
                    Err(source) => Err(ReconcileError::Delete { name: name.clone(), source }),
                };
                match &result {
                    Ok(()) => info!(store = %name, "deleted ClusterSecretStore"),
                    Err(err) => warn!(store = %name, error = %err, "failed to delete ClusterSecretStore"),
                }
                result
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .fold(ReconciliationSummary::default(), |mut summary, result| async move {
                summary.record(&result);
                summary
            })
            .await;
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            "finished cleaning up ClusterSecretStores"
        );
        Ok(summary)
    }
}
