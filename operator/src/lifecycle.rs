//! The operator's run: startup sweep, event loop, teardown sweep
use std::{future::Future, sync::Arc};

use futures::{future, Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::{
    api::NamespaceSource,
    dispatch::{self, DispatchTable, Event},
    reconciler::{NamespaceEvent, Reconciler},
};

/// Which sweeps surround the event loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lifecycle {
    /// Reconcile every opted-in namespace before handling events
    pub process_existing: bool,
    /// Delete every owned store once the event loop stops
    pub cleanup_on_exit: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            process_existing: true,
            cleanup_on_exit: true,
        }
    }
}

impl Lifecycle {
    /// Run until `events` ends or `shutdown` resolves, returning the number of events handled
    ///
    /// A failed sweep is logged and the run carries on: the event loop still starts after a
    /// failed startup sweep, and shutdown still completes after a failed teardown sweep.
    pub async fn run<S, F>(
        &self,
        reconciler: Arc<Reconciler>,
        namespaces: &dyn NamespaceSource,
        events: S,
        shutdown: F,
    ) -> usize
    where
        S: Stream<Item = NamespaceEvent> + Send + 'static,
        F: Future<Output = ()>,
    {
        if self.process_existing {
            if let Err(err) = reconciler.reconcile_all(namespaces).await {
                error!(error = %err, "startup reconciliation failed, relying on namespace events");
            }
        }

        let concurrency = reconciler.settings().concurrency;
        let table = DispatchTable::for_reconciler(reconciler.clone());
        let mut handled = 0;
        let serve = dispatch::run(table, events.map(Event::from), concurrency).for_each(|done| {
            handled += 1;
            debug!(namespace = %done.name, verb = ?done.verb, ok = done.result.is_ok(), "event handled");
            future::ready(())
        });

        tokio::select! {
            _ = serve => warn!("namespace event stream ended"),
            _ = shutdown => info!("shutdown requested"),
        }

        if self.cleanup_on_exit {
            if let Err(err) = reconciler.cleanup_all().await {
                error!(error = %err, "cleanup of owned stores failed, some may remain");
            }
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::NamespaceInfo,
        error::ApiError,
        labels::DEFAULT_TARGET_LABEL_KEY,
        reconciler::{Settings, Verb},
        template::{TemplateLocation, TemplateStore},
        testing::FakeCluster,
    };
    use std::time::Duration;

    fn reconciler(cluster: &FakeCluster) -> Arc<Reconciler> {
        cluster.set_template("metadata:\n  name: k8s-$NAMESPACE\nspec: {}\n");
        let settings = Settings::default();
        let templates = TemplateStore::new(
            Arc::new(cluster.clone()),
            TemplateLocation::default(),
            settings.call_timeout,
        );
        Arc::new(Reconciler::new(settings, templates, Arc::new(cluster.clone())))
    }

    fn opted_in(name: &str) -> NamespaceInfo {
        NamespaceInfo::new(name, format!("uid-{name}")).label(DEFAULT_TARGET_LABEL_KEY, "true")
    }

    fn timeout(operation: &'static str) -> ApiError {
        ApiError::Timeout {
            operation,
            after: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn failed_startup_sweep_still_serves_events() {
        let cluster = FakeCluster::default();
        cluster.fail_next("list", timeout("list namespaces"));
        let events = futures::stream::iter(vec![NamespaceEvent::new(Verb::Created, opted_in("late"))]);
        let lifecycle = Lifecycle {
            process_existing: true,
            cleanup_on_exit: false,
        };

        let handled = lifecycle
            .run(reconciler(&cluster), &cluster, events, future::pending())
            .await;
        assert_eq!(handled, 1);
        assert_eq!(cluster.count("list"), 1);
        assert_eq!(cluster.store_names(), vec!["k8s-late"]);
    }

    #[tokio::test]
    async fn failed_teardown_sweep_still_finishes() {
        let cluster = FakeCluster::default();
        cluster.add_owned_store("k8s-a");
        cluster.fail_next("list_all", timeout("list stores"));

        let handled = Lifecycle::default()
            .run(reconciler(&cluster), &cluster, futures::stream::empty(), future::pending())
            .await;
        assert_eq!(handled, 0);
        assert_eq!(cluster.count("list_all"), 1);
        assert_eq!(cluster.store_names(), vec!["k8s-a"]);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_and_cleans_up() {
        let cluster = FakeCluster::default();
        cluster.add_namespace(opted_in("a"));
        cluster.add_namespace(opted_in("b"));
        cluster.add_foreign_store("k8s-handmade");

        let handled = Lifecycle::default()
            .run(reconciler(&cluster), &cluster, futures::stream::pending(), future::ready(()))
            .await;
        assert_eq!(handled, 0);
        assert_eq!(cluster.count("create"), 2);
        assert_eq!(cluster.store_names(), vec!["k8s-handmade"]);
    }

    #[tokio::test]
    async fn sweeps_can_be_turned_off() {
        let cluster = FakeCluster::default();
        cluster.add_namespace(opted_in("a"));
        cluster.add_owned_store("k8s-b");
        let lifecycle = Lifecycle {
            process_existing: false,
            cleanup_on_exit: false,
        };

        lifecycle
            .run(reconciler(&cluster), &cluster, futures::stream::empty(), future::pending())
            .await;
        assert_eq!(cluster.count("list"), 0);
        assert_eq!(cluster.count("list_all"), 0);
        assert_eq!(cluster.store_names(), vec!["k8s-b"]);
    }
}
