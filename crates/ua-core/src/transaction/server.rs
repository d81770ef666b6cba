//! Callee side of an invite

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Failure, Outcome, Resolution};
use crate::dialog::{Dialog, DialogParams};
use crate::error::{UaError, UaResult};
use crate::transport::{IncomingRequest, Method, Response, StatusCode, TransactionKey};
use crate::types::{CallId, Role};
use crate::user_agent::{UserAgent, UserAgentInner};

/// Callee-side transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for the application to accept or reject
    Ringing,
    Accepted,
    Rejected,
    /// The caller withdrew the invite
    Canceled,
}

impl ServerState {
    pub fn is_terminated(self) -> bool {
        !matches!(self, ServerState::Ringing)
    }
}

struct ServerInner {
    call_id: CallId,
    from: String,
    to: String,
    offer: Bytes,
    remote_user_agent: Option<String>,
    created_at: DateTime<Utc>,
    state: Mutex<ServerState>,
    /// Serializes accept, reject and remote CANCEL
    arbiter: tokio::sync::Mutex<()>,
    outcome: Outcome,
    ringing_timer: Mutex<Option<JoinHandle<()>>>,
    user_agent: Weak<UserAgentInner>,
}

/// An inbound invite
///
/// Handed to the application through [`UserAgentEvent::Invite`](crate::UserAgentEvent::Invite).
/// The transaction is already in its user agent's server-transaction set when the
/// event fires and leaves it when accepted, rejected or canceled.
#[derive(Clone)]
pub struct InviteServerTransaction {
    inner: Arc<ServerInner>,
}

impl InviteServerTransaction {
    pub(crate) fn new(ua: &Arc<UserAgentInner>, invite: IncomingRequest) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                call_id: invite.call_id,
                from: invite.from,
                to: invite.to,
                offer: invite.body,
                remote_user_agent: invite.user_agent,
                created_at: Utc::now(),
                state: Mutex::new(ServerState::Ringing),
                arbiter: tokio::sync::Mutex::new(()),
                outcome: Outcome::new(),
                ringing_timer: Mutex::new(None),
                user_agent: Arc::downgrade(ua),
            }),
        }
    }

    /// Turn the invite away with 480 if nobody answers within `after`
    pub(crate) fn start_ringing_timer(&self, ua: &UserAgentInner, after: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let handle = ua.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let transaction = InviteServerTransaction { inner };
            info!(call_id = %transaction.inner.call_id, "invite unanswered, giving up");
            if let Err(e) = transaction
                .finish_with_failure(StatusCode::TEMPORARILY_UNAVAILABLE)
                .await
            {
                debug!(call_id = %transaction.inner.call_id, error = %e, "ringing timeout lost the race");
            }
        });
        *self.inner.ringing_timer.lock() = Some(handle);
    }

    fn invite_key(&self) -> TransactionKey {
        TransactionKey::new(self.inner.call_id.clone(), Method::Invite)
    }

    fn user_agent_inner(&self) -> UaResult<Arc<UserAgentInner>> {
        self.inner.user_agent.upgrade().ok_or(UaError::UserAgentClosed)
    }

    /// Fail fast when terminated, otherwise take the arbiter and re-check
    async fn take_turn(&self) -> UaResult<tokio::sync::MutexGuard<'_, ()>> {
        if self.state().is_terminated() {
            return Err(UaError::terminated(&self.inner.call_id));
        }
        let turn = self.inner.arbiter.lock().await;
        match self.state() {
            ServerState::Ringing => Ok(turn),
            ServerState::Canceled => Err(UaError::Canceled {
                transaction: self.clone().into(),
            }),
            _ => Err(UaError::terminated(&self.inner.call_id)),
        }
    }

    /// Answer the invite with 200 and establish the dialog
    ///
    /// Valid only while ringing. If the caller cancels while this call waits its
    /// turn, it fails with [`UaError::Canceled`]; once the transaction is terminal it
    /// fails immediately with [`UaError::TransactionTerminated`].
    ///
    /// The dialog is in the user agent's dialog set before the 200 leaves, so a BYE
    /// sent as soon as the caller sees the answer finds it. If the 200 cannot be sent
    /// the dialog is ended locally and this fails with
    /// [`UaError::TransactionFailed`].
    pub async fn accept(&self) -> UaResult<Dialog> {
        self.accept_with(Bytes::new()).await
    }

    /// Like [`accept`](Self::accept), sending `answer` as the session description
    pub async fn accept_with(&self, answer: Bytes) -> UaResult<Dialog> {
        let _turn = self.take_turn().await?;
        let ua = self.user_agent_inner()?;
        let call_id = &self.inner.call_id;

        let dialog = Dialog::new(
            DialogParams {
                call_id: call_id.clone(),
                local: self.inner.to.clone(),
                remote: self.inner.from.clone(),
                role: Role::Callee,
                remote_body: self.inner.offer.clone(),
            },
            &ua,
        );
        if !self.commit(&ua, ServerState::Accepted, Ok(dialog.clone())) {
            return Err(UaError::terminated(call_id));
        }

        let sent = ua
            .transport
            .send_response(&self.invite_key(), Response::new(StatusCode::OK).with_body(answer))
            .await;
        if let Err(e) = sent {
            warn!(call_id = %call_id, error = %e, "failed to send 200, ending dialog");
            dialog.abandon();
            return Err(UaError::from_transport(call_id, e));
        }
        Ok(dialog)
    }

    /// Decline the invite
    ///
    /// On success the transaction is rejected and this returns
    /// [`UaError::Rejected`] carrying the transaction, which is also what
    /// [`outcome`](Self::outcome) resolves to.
    pub async fn reject(&self) -> UaResult<()> {
        let status = match self.inner.user_agent.upgrade() {
            Some(ua) => StatusCode::new(ua.config.reject_status),
            None => return Err(UaError::UserAgentClosed),
        };
        self.finish_with_failure(status).await
    }

    async fn finish_with_failure(&self, status: StatusCode) -> UaResult<()> {
        let _turn = self.take_turn().await?;
        let ua = self.user_agent_inner()?;
        let call_id = &self.inner.call_id;

        ua.transport
            .send_response(&self.invite_key(), Response::new(status))
            .await
            .map_err(|e| UaError::from_transport(call_id, e))?;

        self.commit(&ua, ServerState::Rejected, Err(Failure::Rejected(status)));
        Err(UaError::Rejected {
            transaction: self.clone().into(),
            status,
        })
    }

    /// Handle a CANCEL from the caller
    pub(crate) async fn handle_remote_cancel(&self, user_agent: Weak<UserAgentInner>, cancel: TransactionKey) {
        let _turn = self.inner.arbiter.lock().await;
        let Some(ua) = user_agent.upgrade() else {
            return;
        };
        let call_id = &self.inner.call_id;

        if !self.commit(&ua, ServerState::Canceled, Err(Failure::Canceled)) {
            debug!(call_id = %call_id, state = ?self.state(), "CANCEL after final response");
            if let Err(e) = ua
                .transport
                .send_response(&cancel, Response::new(StatusCode::CALL_DOES_NOT_EXIST))
                .await
            {
                warn!(call_id = %call_id, error = %e, "failed to answer CANCEL");
            }
            return;
        }

        if let Err(e) = ua.transport.send_response(&cancel, Response::new(StatusCode::OK)).await {
            warn!(call_id = %call_id, error = %e, "failed to answer CANCEL");
        }
        if let Err(e) = ua
            .transport
            .send_response(&self.invite_key(), Response::new(StatusCode::REQUEST_TERMINATED))
            .await
        {
            warn!(call_id = %call_id, error = %e, "failed to terminate canceled INVITE");
        }
    }

    fn commit(&self, ua: &UserAgentInner, to: ServerState, result: Resolution) -> bool {
        let mut state = self.inner.state.lock();
        if state.is_terminated() {
            return false;
        }
        *state = to;

        if let Ok(dialog) = &result {
            ua.dialogs.insert(self.inner.call_id.clone(), dialog.clone());
        }
        ua.server_transactions
            .remove_if(&self.inner.call_id, |_, t| Arc::ptr_eq(&t.inner, &self.inner));
        self.inner.outcome.resolve(result);
        drop(state);

        if let Some(timer) = self.inner.ringing_timer.lock().take() {
            timer.abort();
        }
        info!(call_id = %self.inner.call_id, state = ?to, "invite server transaction resolved");
        true
    }

    /// Wait for the transaction to resolve
    pub async fn outcome(&self) -> UaResult<Dialog> {
        self.inner
            .outcome
            .wait()
            .await
            .map_err(|failure| failure.into_error(self.clone().into()))
    }

    pub fn call_id(&self) -> &CallId {
        &self.inner.call_id
    }

    /// Identity of the caller
    pub fn from(&self) -> &str {
        &self.inner.from
    }

    /// Identity the invite was addressed to
    pub fn to(&self) -> &str {
        &self.inner.to
    }

    /// Session description offered by the caller
    pub fn offer(&self) -> &Bytes {
        &self.inner.offer
    }

    /// Product string the caller sent with its INVITE
    pub fn remote_user_agent(&self) -> Option<&str> {
        self.inner.remote_user_agent.as_deref()
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.lock()
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == ServerState::Rejected
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == ServerState::Canceled
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// The user agent that received this invite, while it is alive
    pub fn user_agent(&self) -> Option<UserAgent> {
        self.inner.user_agent.upgrade().map(UserAgent::from_inner)
    }
}

impl PartialEq for InviteServerTransaction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for InviteServerTransaction {}

impl fmt::Debug for InviteServerTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InviteServerTransaction")
            .field("call_id", &self.inner.call_id)
            .field("from", &self.inner.from)
            .field("state", &self.state())
            .finish()
    }
}
