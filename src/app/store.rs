use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::app::notify::Fanout;
use crate::domain::field::{Comments, Field, FieldKind, Likes};
use crate::domain::post::{FeedQuery, FeedSnapshot, Post};

/// Every write to the store, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    FeedReplaced { query: FeedQuery, posts: Vec<Post> },
    PostChanged { post: Post },
    PostRemoved { post_id: Uuid },
    ViewOpened { post: Post },
    ViewClosed { post_id: Uuid },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldState<T> {
    Settled(T),
    /// `prior` is the snapshot the oldest in-flight mutation will roll back to.
    Pending { prior: T, next: T },
}

/// In-memory view model shared by the feed sync jobs, the mutator and the
/// session gateway. Cloning yields another handle to the same state.
#[derive(Clone, Default)]
pub struct LocalStateStore {
    inner: Arc<Mutex<StoreInner>>,
}

/// Non-owning handle used by remote calls that outlive the session. Writes
/// through it become no-ops once the store is closed or dropped.
#[derive(Clone)]
pub(crate) struct StoreHandle {
    inner: Weak<Mutex<StoreInner>>,
}

#[derive(Debug)]
pub(crate) struct Ticket {
    id: u64,
    post_id: Uuid,
    field: FieldKind,
    pub(crate) overlapped: bool,
}

struct InFlight {
    ticket: u64,
    prior: Box<dyn Any + Send>,
}

#[derive(Default)]
struct StoreInner {
    lists: HashMap<FeedQuery, Vec<Post>>,
    selected: Option<Post>,
    in_flight: HashMap<(Uuid, FieldKind), Vec<InFlight>>,
    next_ticket: u64,
    closed: bool,
    events: Fanout<StoreEvent>,
}

fn lock(inner: &Mutex<StoreInner>) -> MutexGuard<'_, StoreInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LocalStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        lock(&self.inner)
    }

    pub(crate) fn downgrade(&self) -> StoreHandle {
        StoreHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribing to a closed store yields a receiver that is already done.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let mut inner = self.lock();
        if inner.closed {
            let (_tx, rx) = mpsc::unbounded_channel();
            return rx;
        }
        inner.events.subscribe()
    }

    pub fn posts(&self, query: &FeedQuery) -> Vec<Post> {
        self.lock().lists.get(query).cloned().unwrap_or_default()
    }

    pub fn selected(&self) -> Option<Post> {
        self.lock().selected.clone()
    }

    /// Current local copy of a post, preferring the open view.
    pub fn post(&self, post_id: Uuid) -> Option<Post> {
        self.lock().locate(post_id).cloned()
    }

    pub fn read_field<F: Field>(&self, post_id: Uuid) -> Option<F::Value> {
        self.lock().locate(post_id).map(|post| F::get(post).clone())
    }

    pub fn field_state<F: Field>(&self, post_id: Uuid) -> Option<FieldState<F::Value>> {
        let inner = self.lock();
        let current = F::get(inner.locate(post_id)?).clone();
        match inner
            .in_flight
            .get(&(post_id, F::KIND))
            .and_then(|entries| entries.first())
        {
            Some(entry) => {
                let prior = entry.prior.downcast_ref::<F::Value>()?.clone();
                Some(FieldState::Pending {
                    prior,
                    next: current,
                })
            }
            None => Some(FieldState::Settled(current)),
        }
    }

    /// Number of mutations of this field still waiting on the remote.
    pub fn in_flight(&self, post_id: Uuid, field: FieldKind) -> usize {
        self.lock()
            .in_flight
            .get(&(post_id, field))
            .map_or(0, Vec::len)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Opens the detail view for a post that is already in one of the lists.
    pub fn open_view(&self, post_id: Uuid) -> Option<Post> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        let post = inner
            .lists
            .values()
            .flat_map(|posts| posts.iter())
            .find(|post| post.id == post_id)
            .cloned()?;
        inner.selected = Some(post.clone());
        inner.events.publish(StoreEvent::ViewOpened { post: post.clone() });
        Some(post)
    }

    pub fn close_view(&self) -> Option<Uuid> {
        let mut inner = self.lock();
        let post_id = inner.selected.take()?.id;
        inner.events.publish(StoreEvent::ViewClosed { post_id });
        Some(post_id)
    }

    /// Drops a post from every list and tears down its view if open.
    pub fn remove_post(&self, post_id: Uuid) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        for posts in inner.lists.values_mut() {
            posts.retain(|post| post.id != post_id);
        }
        if inner.selected.as_ref().map(|post| post.id) == Some(post_id) {
            inner.selected = None;
            inner.events.publish(StoreEvent::ViewClosed { post_id });
        }
        inner.events.publish(StoreEvent::PostRemoved { post_id });
    }

    /// Ends the session. Later writes, including rollbacks of mutations
    /// still in flight, are ignored.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.selected = None;
        inner.lists.clear();
        inner.events.clear();
    }

    /// Replaces the list for the snapshot's query. Fields with a mutation in
    /// flight keep their local value; everything else takes the snapshot.
    pub fn apply_snapshot(&self, snapshot: FeedSnapshot) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }

        let FeedSnapshot { query, mut posts } = snapshot;
        for post in posts.iter_mut() {
            inner.preserve_in_flight(post);
        }

        if let Some(selected_id) = inner.selected.as_ref().map(|post| post.id) {
            match posts.iter().find(|post| post.id == selected_id) {
                Some(fresh) => {
                    if inner.selected.as_ref() != Some(fresh) {
                        inner.selected = Some(fresh.clone());
                        inner
                            .events
                            .publish(StoreEvent::PostChanged { post: fresh.clone() });
                    }
                }
                None if query == FeedQuery::Discover => {
                    debug!(post_id = %selected_id, "selected post no longer exists");
                    inner.selected = None;
                    inner.events.publish(StoreEvent::ViewClosed {
                        post_id: selected_id,
                    });
                }
                None => {}
            }
        }

        inner.lists.insert(query, posts.clone());
        inner.events.publish(StoreEvent::FeedReplaced { query, posts });
    }

    /// Captures the current value, computes and publishes the next one, and
    /// registers the mutation as in flight, all under one lock.
    pub(crate) fn begin<F, C>(&self, post_id: Uuid, compute: C) -> Option<(F::Value, F::Value, Ticket)>
    where
        F: Field,
        C: FnOnce(&F::Value) -> F::Value,
    {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }

        let prior = F::get(inner.locate(post_id)?).clone();
        let next = compute(&prior);

        inner.next_ticket += 1;
        let id = inner.next_ticket;
        let entries = inner.in_flight.entry((post_id, F::KIND)).or_default();
        let overlapped = !entries.is_empty();
        entries.push(InFlight {
            ticket: id,
            prior: Box::new(prior.clone()),
        });

        if let Some(post) = inner.write::<F>(post_id, next.clone()) {
            inner.events.publish(StoreEvent::PostChanged { post });
        }

        Some((
            prior,
            next,
            Ticket {
                id,
                post_id,
                field: F::KIND,
                overlapped,
            },
        ))
    }
}

impl StoreHandle {
    pub(crate) fn settle(&self, ticket: &Ticket) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner).finish(ticket);
        }
    }

    /// Publishes `prior` back. Returns false when there was nothing left to
    /// write to.
    pub(crate) fn rollback<F: Field>(&self, ticket: &Ticket, prior: F::Value) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut inner = lock(&inner);
        inner.finish(ticket);
        if inner.closed {
            return false;
        }
        match inner.write::<F>(ticket.post_id, prior) {
            Some(post) => {
                inner.events.publish(StoreEvent::PostChanged { post });
                true
            }
            None => false,
        }
    }
}

impl StoreInner {
    fn locate(&self, post_id: Uuid) -> Option<&Post> {
        if let Some(selected) = self.selected.as_ref().filter(|post| post.id == post_id) {
            return Some(selected);
        }
        self.lists
            .values()
            .flat_map(|posts| posts.iter())
            .find(|post| post.id == post_id)
    }

    fn write<F: Field>(&mut self, post_id: Uuid, value: F::Value) -> Option<Post> {
        let mut written = None;
        for posts in self.lists.values_mut() {
            if let Some(post) = posts.iter_mut().find(|post| post.id == post_id) {
                F::set(post, value.clone());
                written = Some(post.clone());
            }
        }
        if let Some(selected) = self.selected.as_mut().filter(|post| post.id == post_id) {
            F::set(selected, value);
            written = Some(selected.clone());
        }
        written
    }

    fn finish(&mut self, ticket: &Ticket) {
        let key = (ticket.post_id, ticket.field);
        if let Some(entries) = self.in_flight.get_mut(&key) {
            entries.retain(|entry| entry.ticket != ticket.id);
            if entries.is_empty() {
                self.in_flight.remove(&key);
            }
        }
    }

    fn has_in_flight(&self, post_id: Uuid, field: FieldKind) -> bool {
        self.in_flight.contains_key(&(post_id, field))
    }

    fn preserve_in_flight(&self, incoming: &mut Post) {
        let Some(local) = self.locate(incoming.id) else {
            return;
        };
        if self.has_in_flight(incoming.id, Likes::KIND) {
            Likes::set(incoming, Likes::get(local).clone());
        }
        if self.has_in_flight(incoming.id, Comments::KIND) {
            Comments::set(incoming, Comments::get(local).clone());
        }
    }
}
