//! In-memory cluster for driving the reconciler in tests
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use kube::{core::DynamicObject, ResourceExt};

use crate::{
    api::{store_resource, ConfigSource, NamespaceInfo, NamespaceSource, StoreApi},
    error::ApiError,
    labels,
    template::TemplateLocation,
};

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, NamespaceInfo>,
    stores: BTreeMap<String, DynamicObject>,
    config: HashMap<(String, String), BTreeMap<String, String>>,
    failures: HashMap<&'static str, VecDeque<ApiError>>,
    calls: Vec<(&'static str, String)>,
    latency: Option<Duration>,
}

/// A cluster that implements every collaborator trait, with scripted failures
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Put the template at the default location
    pub fn set_template(&self, text: &str) {
        let loc = TemplateLocation::default();
        self.with(|s| {
            s.config
                .entry((loc.namespace, loc.name))
                .or_default()
                .insert(loc.key, text.to_string())
        });
    }

    pub fn add_namespace(&self, ns: NamespaceInfo) {
        self.with(|s| s.namespaces.insert(ns.name.clone(), ns));
    }

    /// Seed a store directly, bypassing call accounting
    pub fn add_store(&self, store: DynamicObject) {
        self.with(|s| s.stores.insert(store.name_any(), store));
    }

    /// Seed a store that was authored by hand
    pub fn add_foreign_store(&self, name: &str) {
        let mut store = DynamicObject::new(name, &store_resource()).data(serde_json::json!({ "spec": {} }));
        store.labels_mut().insert("team".into(), "platform".into());
        self.add_store(store);
    }

    /// Seed a store carrying the identity label
    pub fn add_owned_store(&self, name: &str) {
        let mut store = DynamicObject::new(name, &store_resource()).data(serde_json::json!({ "spec": {} }));
        store.labels_mut().extend(labels::identity());
        self.add_store(store);
    }

    pub fn store(&self, name: &str) -> Option<DynamicObject> {
        self.with(|s| s.stores.get(name).cloned())
    }

    pub fn store_names(&self) -> Vec<String> {
        self.with(|s| s.stores.keys().cloned().collect())
    }

    /// Make the next call to `op` fail with `err`
    pub fn fail_next(&self, op: &'static str, err: ApiError) {
        self.with(|s| s.failures.entry(op).or_default().push_back(err));
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.with(|s| s.latency = Some(latency));
    }

    /// Number of calls made to `op`
    pub fn count(&self, op: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|(o, _)| *o == op).count())
    }

    async fn enter(&self, op: &'static str, target: &str) -> Result<(), ApiError> {
        let latency = self.with(|s| {
            s.calls.push((op, target.to_string()));
            s.latency
        });
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.with(|s| s.failures.get_mut(op).and_then(VecDeque::pop_front)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NamespaceSource for FakeCluster {
    async fn list(&self) -> Result<Vec<NamespaceInfo>, ApiError> {
        self.enter("list", "namespaces").await?;
        Ok(self.with(|s| s.namespaces.values().cloned().collect()))
    }
}

#[async_trait]
impl StoreApi for FakeCluster {
    async fn get(&self, name: &str) -> Result<DynamicObject, ApiError> {
        self.enter("get", name).await?;
        self.with(|s| s.stores.get(name).cloned()).ok_or(ApiError::NotFound)
    }

    async fn create(&self, store: &DynamicObject) -> Result<(), ApiError> {
        let name = store.name_any();
        self.enter("create", &name).await?;
        self.with(|s| {
            if s.stores.contains_key(&name) {
                return Err(ApiError::AlreadyExists);
            }
            s.stores.insert(name, store.clone());
            Ok(())
        })
    }

    async fn delete(&self, name: &str) -> Result<(), ApiError> {
        self.enter("delete", name).await?;
        self.with(|s| s.stores.remove(name).map(|_| ()).ok_or(ApiError::NotFound))
    }

    async fn list_all(&self) -> Result<Vec<DynamicObject>, ApiError> {
        self.enter("list_all", "stores").await?;
        Ok(self.with(|s| s.stores.values().cloned().collect()))
    }
}

#[async_trait]
impl ConfigSource for FakeCluster {
    async fn read(&self, object_name: &str, namespace: &str, key: &str) -> Result<String, ApiError> {
        self.enter("read", object_name).await?;
        self.with(|s| {
            s.config
                .get(&(namespace.to_string(), object_name.to_string()))
                .and_then(|data| data.get(key).cloned())
                .ok_or(ApiError::NotFound)
        })
    }
}
