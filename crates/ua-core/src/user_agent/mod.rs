//! The user agent
//!
//! A [`UserAgent`] owns one identity's registration state and the live sets of
//! pending outbound invites, pending inbound invites and established dialogs. It is
//! the only entry point an application needs: register, invite, and listen for
//! [`UserAgentEvent::Invite`] to answer incoming calls.
//!
//! ```rust
//! use rvoip_ua_core::prelude::*;
//! use rvoip_ua_core::transport::memory::MemoryNetwork;
//!
//! # tokio_test::block_on(async {
//! let network = MemoryNetwork::new();
//! let (transport, incoming) = network.endpoint();
//! let alice = UserAgent::new(
//!     Token::new("alice", "capability-token"),
//!     transport,
//!     incoming,
//!     UserAgentConfig::default(),
//! )?;
//!
//! alice.register(None).await?;
//! assert!(alice.is_registered());
//!
//! // Nobody is registered as "bob", so the invite is turned away.
//! let invite = alice.invite("bob", InviteOptions::default())?;
//! assert!(invite.outcome().await.unwrap_err().is_rejected());
//! assert!(alice.invite_client_transactions().is_empty());
//!
//! alice.unregister().await?;
//! # Ok::<(), UaError>(())
//! # }).unwrap();
//! ```
//!
//! Handles are cheap to clone. Transactions and dialogs only keep a weak reference
//! back to their user agent; once the application drops its last `UserAgent` handle
//! the inbound dispatcher stops and operations on what is left fail with
//! [`UaError::UserAgentClosed`].

mod dispatch;
mod registration;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::UserAgentConfig;
use crate::dialog::Dialog;
use crate::error::{UaError, UaResult};
use crate::events::{EventEmitter, EventStream, ListenerId, UserAgentEvent, UserAgentEventKind};
use crate::token::Token;
use crate::transaction::{InviteClientTransaction, InviteServerTransaction, InviteTransaction};
use crate::transport::{IncomingRequest, Transport};
use crate::types::CallId;

/// Options for [`UserAgent::invite`]
#[derive(Debug, Clone, Default)]
pub struct InviteOptions {
    /// Session description offered to the callee
    pub body: Bytes,
    /// Overrides the configured invite timeout
    pub timeout: Option<Duration>,
}

impl InviteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub(crate) struct UserAgentInner {
    pub(crate) token: RwLock<Token>,
    pub(crate) registered: AtomicBool,
    /// Queues register/unregister calls in arrival order
    pub(crate) registration_gate: tokio::sync::Mutex<()>,
    pub(crate) config: UserAgentConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) runtime: Handle,
    pub(crate) client_transactions: DashMap<CallId, InviteClientTransaction>,
    pub(crate) server_transactions: DashMap<CallId, InviteServerTransaction>,
    pub(crate) dialogs: DashMap<CallId, Dialog>,
    events: EventEmitter<UserAgentEvent>,
    event_tx: broadcast::Sender<UserAgentEvent>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl UserAgentInner {
    pub(crate) fn identity(&self) -> String {
        self.token.read().identity().to_string()
    }

    /// Notify listeners, then broadcast subscribers
    pub(crate) fn emit(&self, event: UserAgentEvent) {
        let delivered = self.events.emit(&event);
        trace!(kind = ?crate::events::Event::kind(&event), listeners = delivered, "event emitted");
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

impl Drop for UserAgentInner {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.abort();
        }
        debug!(identity = %self.token.get_mut().identity(), "user agent closed");
    }
}

/// SIP user agent for one identity
#[derive(Clone)]
pub struct UserAgent {
    inner: Arc<UserAgentInner>,
}

impl UserAgent {
    /// Create a user agent and start dispatching the requests arriving on `incoming`
    ///
    /// Must be called from within a Tokio runtime. Starts unregistered.
    pub fn new(
        token: Token,
        transport: Arc<dyn Transport>,
        incoming: mpsc::Receiver<IncomingRequest>,
        config: UserAgentConfig,
    ) -> UaResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|_| UaError::config("UserAgent::new must be called within a Tokio runtime"))?;
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        let inner = Arc::new(UserAgentInner {
            token: RwLock::new(token),
            registered: AtomicBool::new(false),
            registration_gate: tokio::sync::Mutex::new(()),
            config,
            transport,
            runtime,
            client_transactions: DashMap::new(),
            server_transactions: DashMap::new(),
            dialogs: DashMap::new(),
            events: EventEmitter::new(),
            event_tx,
            dispatcher: Mutex::new(None),
        });

        let handle = inner
            .runtime
            .spawn(dispatch::run(Arc::downgrade(&inner), incoming));
        *inner.dispatcher.lock() = Some(handle);

        debug!(identity = %inner.identity(), "user agent created");
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<UserAgentInner>) -> Self {
        Self { inner }
    }

    /// Identity of the current token
    pub fn identity(&self) -> String {
        self.inner.identity()
    }

    /// The current token
    pub fn token(&self) -> Token {
        self.inner.token.read().clone()
    }

    pub fn config(&self) -> &UserAgentConfig {
        &self.inner.config
    }

    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::SeqCst)
    }

    /// Invite `remote`
    ///
    /// The returned transaction is already in
    /// [`invite_client_transactions`](Self::invite_client_transactions) and the INVITE
    /// is on its way. Await [`InviteClientTransaction::outcome`] for the result.
    pub fn invite(&self, remote: impl Into<String>, options: InviteOptions) -> UaResult<InviteClientTransaction> {
        let remote = remote.into();
        if remote.is_empty() || remote == self.identity() {
            return Err(UaError::InvalidTarget { target: remote });
        }
        let wait = options.timeout.unwrap_or_else(|| self.inner.config.invite_timeout());
        Ok(InviteClientTransaction::start(&self.inner, remote, options.body, wait))
    }

    /// Pending outbound invites
    pub fn invite_client_transactions(&self) -> Vec<InviteClientTransaction> {
        self.inner
            .client_transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Pending inbound invites
    pub fn invite_server_transactions(&self) -> Vec<InviteServerTransaction> {
        self.inner
            .server_transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Established dialogs
    pub fn dialogs(&self) -> Vec<Dialog> {
        self.inner
            .dialogs
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn has_invite_client_transaction(&self, transaction: &InviteClientTransaction) -> bool {
        self.inner
            .client_transactions
            .get(transaction.call_id())
            .is_some_and(|t| *t == *transaction)
    }

    pub fn has_invite_server_transaction(&self, transaction: &InviteServerTransaction) -> bool {
        self.inner
            .server_transactions
            .get(transaction.call_id())
            .is_some_and(|t| *t == *transaction)
    }

    pub fn has_dialog(&self, dialog: &Dialog) -> bool {
        self.inner
            .dialogs
            .get(dialog.call_id())
            .is_some_and(|d| *d == *dialog)
    }

    /// Look up a pending transaction of either kind
    pub fn transaction(&self, call_id: &CallId) -> Option<InviteTransaction> {
        if let Some(t) = self.inner.client_transactions.get(call_id) {
            return Some(InviteTransaction::Client(t.value().clone()));
        }
        self.inner
            .server_transactions
            .get(call_id)
            .map(|t| InviteTransaction::Server(t.value().clone()))
    }

    pub fn dialog(&self, call_id: &CallId) -> Option<Dialog> {
        self.inner.dialogs.get(call_id).map(|d| d.value().clone())
    }

    /// Invoke `listener` for every event of `kind`
    pub fn on<F>(&self, kind: UserAgentEventKind, listener: F) -> ListenerId
    where
        F: Fn(&UserAgentEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    /// Invoke `listener` for the next event of `kind` only
    pub fn once<F>(&self, kind: UserAgentEventKind, listener: F) -> ListenerId
    where
        F: Fn(&UserAgentEvent) + Send + Sync + 'static,
    {
        self.inner.events.once(kind, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    /// Subscribe to events on a broadcast channel
    pub fn subscribe(&self) -> broadcast::Receiver<UserAgentEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Events as a stream
    pub fn events(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }

    /// Process one inbound request
    ///
    /// Requests arriving on the channel given to [`new`](Self::new) are handled
    /// here automatically; this is for transports that push requests directly.
    /// Returns once the request is routed. A CANCEL waiting on its transaction, or a
    /// BYE waiting on the invite it follows, completes on its own task.
    pub async fn handle_incoming(&self, request: IncomingRequest) {
        dispatch::handle(&self.inner, request).await;
    }
}

impl PartialEq for UserAgent {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserAgent")
            .field("identity", &self.identity())
            .field("registered", &self.is_registered())
            .field("client_transactions", &self.inner.client_transactions.len())
            .field("server_transactions", &self.inner.server_transactions.len())
            .field("dialogs", &self.inner.dialogs.len())
            .finish()
    }
}
