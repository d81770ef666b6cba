//! Established calls
//!
//! A [`Dialog`] is created on each side when an invite is accepted: the caller's
//! when the 200 arrives, the callee's when `accept()` answers. Each user agent keeps
//! its own dialog in its dialog set until either side ends the call.
//!
//! Ending is "locally remove, then send": [`Dialog::end`] commits the transition,
//! drops the dialog from its user agent's set and emits [`DialogEvent::Ended`] before
//! the BYE goes out, so no lock is held while waiting on the peer. The peer performs
//! the same transition when the BYE arrives.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{UaError, UaResult};
use crate::events::{DialogEvent, DialogEventKind, EndedBy, EventEmitter, ListenerId};
use crate::transport::{Method, OutgoingRequest};
use crate::types::{CallId, Role};
use crate::user_agent::{UserAgent, UserAgentInner};

/// Dialog lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Active,
    Ended(EndedBy),
}

pub(crate) struct DialogParams {
    pub call_id: CallId,
    pub local: String,
    pub remote: String,
    pub role: Role,
    pub remote_body: Bytes,
}

struct DialogInner {
    call_id: CallId,
    local: String,
    remote: String,
    role: Role,
    remote_body: Bytes,
    created_at: DateTime<Utc>,
    state: watch::Sender<DialogState>,
    events: EventEmitter<DialogEvent>,
    user_agent: Weak<UserAgentInner>,
}

/// One side of an established call
#[derive(Clone)]
pub struct Dialog {
    inner: Arc<DialogInner>,
}

impl Dialog {
    pub(crate) fn new(params: DialogParams, ua: &Arc<UserAgentInner>) -> Self {
        let (state, _) = watch::channel(DialogState::Active);
        debug!(call_id = %params.call_id, role = ?params.role, "dialog established");
        Self {
            inner: Arc::new(DialogInner {
                call_id: params.call_id,
                local: params.local,
                remote: params.remote,
                role: params.role,
                remote_body: params.remote_body,
                created_at: Utc::now(),
                state,
                events: EventEmitter::new(),
                user_agent: Arc::downgrade(ua),
            }),
        }
    }

    /// Hang up
    ///
    /// Ending an already-ended dialog resolves immediately without sending a second
    /// BYE or emitting a second [`DialogEvent::Ended`]. A BYE the peer answers with
    /// an error status still counts as ended; only a transport failure or timeout is
    /// reported, and the dialog stays ended regardless.
    pub async fn end(&self) -> UaResult<()> {
        if self.is_ended() {
            return Ok(());
        }
        let ua = self.inner.user_agent.upgrade().ok_or(UaError::UserAgentClosed)?;
        if !self.transition(EndedBy::Local) {
            return Ok(());
        }

        let call_id = &self.inner.call_id;
        let bye = OutgoingRequest::new(
            Method::Bye,
            self.inner.local.clone(),
            self.inner.remote.clone(),
            call_id.clone(),
        )
        .with_user_agent(ua.config.user_agent.clone());
        let transport = ua.transport.clone();
        let wait = ua.config.request_timeout();
        drop(ua);

        match timeout(wait, transport.exchange(bye)).await {
            Ok(Ok(response)) if response.status.is_success() => Ok(()),
            Ok(Ok(response)) => {
                warn!(call_id = %call_id, status = %response.status, "BYE answered with error");
                Ok(())
            }
            Ok(Err(e)) => Err(UaError::from_transport(call_id, e)),
            Err(_) => Err(UaError::transaction_failed(call_id, "BYE timed out")),
        }
    }

    /// Apply a BYE received from the peer; returns false if already ended
    pub(crate) fn handle_remote_end(&self) -> bool {
        self.transition(EndedBy::Remote)
    }

    /// End without a BYE, for a dialog the peer never learned about
    pub(crate) fn abandon(&self) -> bool {
        self.transition(EndedBy::Local)
    }

    fn transition(&self, by: EndedBy) -> bool {
        let ua = self.inner.user_agent.upgrade();
        let ended = self.inner.state.send_if_modified(|state| {
            if *state != DialogState::Active {
                return false;
            }
            *state = DialogState::Ended(by);
            if let Some(ua) = &ua {
                ua.dialogs
                    .remove_if(&self.inner.call_id, |_, d| Arc::ptr_eq(&d.inner, &self.inner));
            }
            true
        });
        if !ended {
            return false;
        }

        info!(call_id = %self.inner.call_id, by = ?by, "dialog ended");
        self.inner.events.emit(&DialogEvent::Ended {
            call_id: self.inner.call_id.clone(),
            by,
        });
        true
    }

    /// Wait until the dialog ends, by either side
    pub async fn wait_ended(&self) -> UaResult<EndedBy> {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|s| matches!(s, DialogState::Ended(_)))
            .await
            .map_err(|_| UaError::UserAgentClosed)?;
        match *state {
            DialogState::Ended(by) => Ok(by),
            DialogState::Active => Err(UaError::UserAgentClosed),
        }
    }

    pub fn on<F>(&self, kind: DialogEventKind, listener: F) -> ListenerId
    where
        F: Fn(&DialogEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    pub fn once<F>(&self, kind: DialogEventKind, listener: F) -> ListenerId
    where
        F: Fn(&DialogEvent) + Send + Sync + 'static,
    {
        self.inner.events.once(kind, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn call_id(&self) -> &CallId {
        &self.inner.call_id
    }

    pub fn state(&self) -> DialogState {
        *self.inner.state.borrow()
    }

    pub fn is_ended(&self) -> bool {
        self.state() != DialogState::Active
    }

    pub fn ended_by(&self) -> Option<EndedBy> {
        match self.state() {
            DialogState::Ended(by) => Some(by),
            DialogState::Active => None,
        }
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn is_initiator(&self) -> bool {
        self.inner.role.is_initiator()
    }

    pub fn local_identity(&self) -> &str {
        &self.inner.local
    }

    pub fn remote_identity(&self) -> &str {
        &self.inner.remote
    }

    /// Session description received from the peer
    pub fn remote_body(&self) -> &Bytes {
        &self.inner.remote_body
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn user_agent(&self) -> Option<UserAgent> {
        self.inner.user_agent.upgrade().map(UserAgent::from_inner)
    }
}

impl PartialEq for Dialog {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Dialog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialog")
            .field("call_id", &self.inner.call_id)
            .field("local", &self.inner.local)
            .field("remote", &self.inner.remote)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish()
    }
}
