//! Turning the namespace watch into lifecycle events
//!
//! [`kube::runtime::watcher`] reports what it sees, not what changed: every (re)list replays
//! the whole collection. [`EventClassifier`] remembers the last observed version of each
//! namespace so that relists become [`Verb::Created`], [`Verb::Updated`] and [`Verb::Deleted`]
//! only where something actually happened. The first listing reports every namespace as
//! created, so whatever changed before the watch started still gets reconciled.
use std::collections::HashMap;

use futures::{future, stream, Stream, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    runtime::{watcher, WatchStreamExt},
    Api, Client,
};
use tracing::{debug, warn};

use crate::{
    api::NamespaceInfo,
    reconciler::{NamespaceEvent, Verb},
};

/// Classifies raw watcher events into namespace lifecycle events
#[derive(Debug, Default)]
pub struct EventClassifier {
    known: HashMap<String, NamespaceInfo>,
    relisting: Option<HashMap<String, NamespaceInfo>>,
    synced: bool,
}

impl EventClassifier {
    /// A classifier that has not seen anything yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the first listing has completed
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Feed one watcher event, returning what it means for each namespace
    pub fn classify(&mut self, event: watcher::Event<Namespace>) -> Vec<NamespaceEvent> {
        match event {
            watcher::Event::Apply(ns) => {
                let info = NamespaceInfo::from(&ns);
                let verb = match self.known.get(&info.name) {
                    Some(_) => Verb::Updated,
                    None => Verb::Created,
                };
                self.known.insert(info.name.clone(), info.clone());
                vec![NamespaceEvent::new(verb, info)]
            }
            watcher::Event::Delete(ns) => {
                let info = NamespaceInfo::from(&ns);
                self.known.remove(&info.name);
                vec![NamespaceEvent::new(Verb::Deleted, info)]
            }
            watcher::Event::Init => {
                self.relisting = Some(HashMap::new());
                Vec::new()
            }
            watcher::Event::InitApply(ns) => {
                let info = NamespaceInfo::from(&ns);
                let emitted = match self.known.get(&info.name) {
                    None => Some(Verb::Created),
                    Some(prev) if prev.resource_version != info.resource_version => Some(Verb::Updated),
                    Some(_) => None,
                }
                .map(|verb| NamespaceEvent::new(verb, info.clone()));
                self.relisting
                    .get_or_insert_with(HashMap::new)
                    .insert(info.name.clone(), info);
                emitted.into_iter().collect()
            }
            watcher::Event::InitDone => {
                let listed = self.relisting.take().unwrap_or_default();
                if !self.synced {
                    debug!(count = listed.len(), "initial namespace listing complete");
                }
                let vanished = self
                    .known
                    .drain()
                    .filter(|(name, _)| !listed.contains_key(name))
                    .map(|(_, info)| NamespaceEvent::new(Verb::Deleted, info))
                    .collect();
                self.known = listed;
                self.synced = true;
                vanished
            }
        }
    }
}

/// Watch every namespace in the cluster as a stream of lifecycle events
///
/// Watch errors are logged and retried with backoff; the stream itself never ends
/// while the client is usable.
pub fn namespace_events(client: Client) -> impl Stream<Item = NamespaceEvent> + Send {
    let mut classifier = EventClassifier::new();
    watcher(Api::<Namespace>::all(client), watcher::Config::default())
        .default_backoff()
        .filter_map(|event| {
            future::ready(match event {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(error = %err, "namespace watch failed, retrying");
                    None
                }
            })
        })
        .flat_map(move |event| stream::iter(classifier.classify(event)))
}
