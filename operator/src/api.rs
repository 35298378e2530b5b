//! Narrow views of the cluster the reconciler works through
//!
//! The reconciler only ever talks to these traits, so it can be driven against
//! an in-memory cluster in tests and against [`kube`] in production.
use std::{collections::BTreeMap, future::Future, time::Duration};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client, ResourceExt,
};

use crate::error::ApiError;

/// API group of the managed store kind
pub const STORE_GROUP: &str = "external-secrets.io";
/// API version of the managed store kind
pub const STORE_VERSION: &str = "v1";
/// Kind of the managed store
pub const STORE_KIND: &str = "ClusterSecretStore";
/// Plural resource name of the managed store
pub const STORE_PLURAL: &str = "clustersecretstores";

/// The [`ApiResource`] for `ClusterSecretStore`
pub fn store_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(STORE_GROUP, STORE_VERSION, STORE_KIND);
    ApiResource::from_gvk_with_plural(&gvk, STORE_PLURAL)
}

/// What the reconciler needs to know about a namespace
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// Namespace name
    pub name: String,
    /// Unique identifier, referenced from owner references
    pub uid: Option<String>,
    /// Current labels
    pub labels: BTreeMap<String, String>,
    /// Whether the namespace has a deletion timestamp
    pub terminating: bool,
    /// Last observed resource version
    pub resource_version: Option<String>,
}

impl NamespaceInfo {
    /// A bare namespace with a name and uid
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: Some(uid.into()),
            ..Self::default()
        }
    }

    /// Add a label
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

impl From<&Namespace> for NamespaceInfo {
    fn from(ns: &Namespace) -> Self {
        Self {
            name: ns.name_any(),
            uid: ns.uid(),
            labels: ns.labels().clone(),
            terminating: ns.metadata.deletion_timestamp.is_some(),
            resource_version: ns.resource_version(),
        }
    }
}

/// Read access to the namespaces in the cluster
#[async_trait]
pub trait NamespaceSource: Send + Sync {
    /// List every namespace currently in the cluster
    async fn list(&self) -> Result<Vec<NamespaceInfo>, ApiError>;
}

/// CRUD access to the managed store kind
#[async_trait]
pub trait StoreApi: Send + Sync {
    /// Fetch a store by name
    async fn get(&self, name: &str) -> Result<DynamicObject, ApiError>;
    /// Create a store; fails with [`ApiError::AlreadyExists`] if the name is taken
    async fn create(&self, store: &DynamicObject) -> Result<(), ApiError>;
    /// Delete a store by name; fails with [`ApiError::NotFound`] if absent
    async fn delete(&self, name: &str) -> Result<(), ApiError>;
    /// List every store in the cluster, owned or not
    async fn list_all(&self) -> Result<Vec<DynamicObject>, ApiError>;
}

/// Read access to small key/value configuration objects
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Read `key` from the object `object_name` in `namespace`
    async fn read(&self, object_name: &str, namespace: &str, key: &str) -> Result<String, ApiError>;
}

/// Run a cluster call, turning an overrun of `after` into [`ApiError::Timeout`]
pub async fn bounded<T, F>(operation: &'static str, after: Duration, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| ApiError::Timeout { operation, after })?
}

/// [`NamespaceSource`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeNamespaces {
    api: Api<Namespace>,
}

impl KubeNamespaces {
    /// Read namespaces through `client`
    pub fn new(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

#[async_trait]
impl NamespaceSource for KubeNamespaces {
    async fn list(&self) -> Result<Vec<NamespaceInfo>, ApiError> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(NamespaceInfo::from).collect())
    }
}

/// [`StoreApi`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStores {
    api: Api<DynamicObject>,
}

impl KubeStores {
    /// Manage stores through `client`
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all_with(client, &store_resource()),
        }
    }
}

#[async_trait]
impl StoreApi for KubeStores {
    async fn get(&self, name: &str) -> Result<DynamicObject, ApiError> {
        Ok(self.api.get(name).await?)
    }

    async fn create(&self, store: &DynamicObject) -> Result<(), ApiError> {
        self.api.create(&PostParams::default(), store).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        self.api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<DynamicObject>, ApiError> {
        Ok(self.api.list(&ListParams::default()).await?.items)
    }
}

/// [`ConfigSource`] reading `ConfigMap` data
#[derive(Clone)]
pub struct KubeConfigMaps {
    client: Client,
}

impl KubeConfigMaps {
    /// Read config maps through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigSource for KubeConfigMaps {
    async fn read(&self, object_name: &str, namespace: &str, key: &str) -> Result<String, ApiError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = api.get(object_name).await?;
        cm.data
            .and_then(|mut data| data.remove(key))
            .ok_or(ApiError::NotFound)
    }
}
