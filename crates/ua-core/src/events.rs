//! Event notification
//!
//! User agents and dialogs announce state changes through an [`EventEmitter`]:
//! handlers are registered per event kind and invoked synchronously, in
//! registration order, at the moment the transition commits. A handler added with
//! [`EventEmitter::once`] is removed before it is invoked for the first time.
//!
//! Handlers run on the task that committed the transition, after every internal
//! lock has been released, so a handler may call back into the entity that emitted
//! the event. Handlers that need to await should spawn.
//!
//! User agents also fan their events out on a `tokio::sync::broadcast` channel; see
//! [`UserAgent::subscribe`](crate::UserAgent::subscribe) and [`EventStream`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_stream::wrappers::BroadcastStream;

use crate::transaction::InviteServerTransaction;
use crate::types::CallId;

/// An event that can be routed by kind
pub trait Event: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Handle returned when a listener is registered, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registration<E> {
    id: ListenerId,
    once: bool,
    listener: Listener<E>,
}

/// Ordered per-kind listener table
pub struct EventEmitter<E: Event> {
    listeners: Mutex<HashMap<E::Kind, Vec<Registration<E>>>>,
    next_id: AtomicU64,
}

impl<E: Event> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Invoke `listener` for every event of `kind`
    pub fn on<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(kind, false, Arc::new(listener))
    }

    /// Invoke `listener` for the next event of `kind` only
    pub fn once<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(kind, true, Arc::new(listener))
    }

    /// Remove a listener; returns false if it was already gone
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        for registrations in listeners.values_mut() {
            if let Some(pos) = registrations.iter().position(|r| r.id == id) {
                registrations.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to its listeners, returning how many were invoked
    pub fn emit(&self, event: &E) -> usize {
        let to_call: Vec<Listener<E>> = {
            let mut listeners = self.listeners.lock();
            let Some(registrations) = listeners.get_mut(&event.kind()) else {
                return 0;
            };
            let selected = registrations.iter().map(|r| r.listener.clone()).collect();
            registrations.retain(|r| !r.once);
            selected
        };

        for listener in &to_call {
            listener(event);
        }
        to_call.len()
    }

    fn add(&self, kind: E::Kind, once: bool, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push(Registration { id, once, listener });
        id
    }
}

impl<E: Event> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        let counts: HashMap<_, _> = listeners.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventEmitter").field("listeners", &counts).finish()
    }
}

/// Events emitted by a [`UserAgent`](crate::UserAgent)
#[derive(Debug, Clone)]
pub enum UserAgentEvent {
    /// Registration completed
    Registered,
    /// Unregistration completed
    Unregistered,
    /// An inbound invite is ringing; it is already in the server-transaction set
    Invite(InviteServerTransaction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserAgentEventKind {
    Registered,
    Unregistered,
    Invite,
}

impl Event for UserAgentEvent {
    type Kind = UserAgentEventKind;

    fn kind(&self) -> UserAgentEventKind {
        match self {
            UserAgentEvent::Registered => UserAgentEventKind::Registered,
            UserAgentEvent::Unregistered => UserAgentEventKind::Unregistered,
            UserAgentEvent::Invite(_) => UserAgentEventKind::Invite,
        }
    }
}

/// Which side tore a dialog down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndedBy {
    Local,
    Remote,
}

/// Events emitted by a [`Dialog`](crate::Dialog)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogEvent {
    Ended { call_id: CallId, by: EndedBy },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogEventKind {
    Ended,
}

impl Event for DialogEvent {
    type Kind = DialogEventKind;

    fn kind(&self) -> DialogEventKind {
        match self {
            DialogEvent::Ended { .. } => DialogEventKind::Ended,
        }
    }
}

/// Stream of user agent events
pub type EventStream = BroadcastStream<UserAgentEvent>;
