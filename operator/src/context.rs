//! Shared cluster handles
use std::sync::Arc;

use futures::Stream;
use kube::Client;

use crate::{
    api::{ConfigSource, KubeConfigMaps, KubeNamespaces, KubeStores, NamespaceSource, StoreApi},
    reconciler::{NamespaceEvent, Reconciler, Settings},
    template::{TemplateLocation, TemplateStore},
    watch,
};

/// Everything built from one [`Client`], created once at startup and passed to whoever needs it
#[derive(Clone)]
pub struct ClusterContext {
    client: Client,
}

impl ClusterContext {
    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn infer() -> Result<Self, kube::Error> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Namespace listing
    pub fn namespaces(&self) -> Arc<dyn NamespaceSource> {
        Arc::new(KubeNamespaces::new(self.client.clone()))
    }

    /// Store management
    pub fn stores(&self) -> Arc<dyn StoreApi> {
        Arc::new(KubeStores::new(self.client.clone()))
    }

    /// Template reads
    pub fn config_maps(&self) -> Arc<dyn ConfigSource> {
        Arc::new(KubeConfigMaps::new(self.client.clone()))
    }

    /// A reconciler wired to this cluster
    pub fn reconciler(&self, settings: Settings, template: TemplateLocation) -> Reconciler {
        let templates = TemplateStore::new(self.config_maps(), template, settings.call_timeout);
        Reconciler::new(settings, templates, self.stores())
    }

    /// Lifecycle events for every namespace in the cluster
    pub fn namespace_events(&self) -> impl Stream<Item = NamespaceEvent> + Send {
        watch::namespace_events(self.client.clone())
    }
}
