//! Routing events to handlers
//!
//! Handlers are registered in a [`DispatchTable`] keyed by resource kind and verb when the
//! process starts. [`run`] drives a stream of events through the table, running events for
//! different objects concurrently while making sure that events for the same object are
//! handled one at a time, in the order they arrived.
use std::{
    collections::{hash_map::Entry, HashMap, VecDeque},
    future::Future,
    sync::Arc,
};

use async_stream::stream;
use futures::{
    future::{self, BoxFuture},
    stream::FuturesUnordered,
    FutureExt, Stream, StreamExt,
};

use crate::{
    api::NamespaceInfo,
    error::ReconcileError,
    reconciler::{NamespaceEvent, Outcome, Reconciler, Verb},
};

/// Kinds of objects events can be about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A core/v1 `Namespace`
    Namespace,
}

/// A registered event handler
pub type Handler =
    Arc<dyn Fn(NamespaceInfo) -> BoxFuture<'static, Result<Outcome, ReconcileError>> + Send + Sync>;

/// Handlers keyed by `(ResourceKind, Verb)`
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<(ResourceKind, Verb), Handler>,
}

impl DispatchTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `verb` events on `kind`, replacing any previous registration
    #[must_use]
    pub fn on<F, Fut>(mut self, kind: ResourceKind, verb: Verb, handler: F) -> Self
    where
        F: Fn(NamespaceInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome, ReconcileError>> + Send + 'static,
    {
        self.handlers
            .insert((kind, verb), Arc::new(move |obj| handler(obj).boxed()));
        self
    }

    /// Route every namespace verb into `reconciler`
    pub fn for_reconciler(reconciler: Arc<Reconciler>) -> Self {
        [Verb::Created, Verb::Updated, Verb::Deleted]
            .into_iter()
            .fold(Self::new(), |table, verb| {
                let reconciler = reconciler.clone();
                table.on(ResourceKind::Namespace, verb, move |ns| {
                    let reconciler = reconciler.clone();
                    async move { reconciler.reconcile(&NamespaceEvent::new(verb, ns)).await }
                })
            })
    }

    /// The handler registered for `kind` and `verb`, if any
    pub fn handler(&self, kind: ResourceKind, verb: Verb) -> Option<&Handler> {
        self.handlers.get(&(kind, verb))
    }

    fn invoke(&self, event: Event) -> BoxFuture<'static, Dispatched> {
        let Event { kind, verb, object } = event;
        let name = object.name.clone();
        match self.handler(kind, verb) {
            Some(handler) => {
                let run = handler(object);
                async move {
                    Dispatched {
                        kind,
                        verb,
                        name,
                        result: run.await,
                    }
                }
                .boxed()
            }
            None => future::ready(Dispatched {
                kind,
                verb,
                name,
                result: Ok(Outcome::Ignored),
            })
            .boxed(),
        }
    }
}

/// An event waiting to be dispatched
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Kind of the object
    pub kind: ResourceKind,
    /// What happened to it
    pub verb: Verb,
    /// The object as observed
    pub object: NamespaceInfo,
}

impl Event {
    fn key(&self) -> (ResourceKind, String) {
        (self.kind, self.object.name.clone())
    }
}

impl From<NamespaceEvent> for Event {
    fn from(event: NamespaceEvent) -> Self {
        Self {
            kind: ResourceKind::Namespace,
            verb: event.verb,
            object: event.namespace,
        }
    }
}

/// The result of handling one event
#[derive(Debug)]
pub struct Dispatched {
    /// Kind of the object
    pub kind: ResourceKind,
    /// Verb that was handled
    pub verb: Verb,
    /// Name of the object
    pub name: String,
    /// What the handler returned
    pub result: Result<Outcome, ReconcileError>,
}

impl Dispatched {
    fn key(&self) -> (ResourceKind, String) {
        (self.kind, self.name.clone())
    }
}

/// Drive `events` through `table`
///
/// At most `concurrency` handlers run at once, and never two for the same object. Events for
/// an object that is still being handled are queued and run in arrival order once it finishes.
/// The returned stream yields every handler result and ends once `events` ends and all queued
/// work is done.
pub fn run<S>(table: DispatchTable, events: S, concurrency: usize) -> impl Stream<Item = Dispatched> + Send
where
    S: Stream<Item = Event> + Send + 'static,
{
    let limit = concurrency.max(1);
    stream! {
        let mut events = Box::pin(events);
        let mut in_flight = FuturesUnordered::new();
        // an entry means the object has a handler running; the queue holds what arrived since
        let mut busy: HashMap<(ResourceKind, String), VecDeque<Event>> = HashMap::new();
        let mut input_open = true;

        loop {
            let finished = tokio::select! {
                event = events.next(), if input_open && in_flight.len() < limit => {
                    match event {
                        Some(event) => match busy.entry(event.key()) {
                            Entry::Occupied(mut queue) => queue.get_mut().push_back(event),
                            Entry::Vacant(slot) => {
                                slot.insert(VecDeque::new());
                                in_flight.push(table.invoke(event));
                            }
                        },
                        None => input_open = false,
                    }
                    None
                }
                Some(done) = in_flight.next(), if !in_flight.is_empty() => Some(done),
                else => break,
            };

            if let Some(done) = finished {
                let key = done.key();
                if let Entry::Occupied(mut queue) = busy.entry(key) {
                    match queue.get_mut().pop_front() {
                        Some(next) => in_flight.push(table.invoke(next)),
                        None => {
                            queue.remove();
                        }
                    }
                }
                yield done;
            }
        }
    }
}
