//! Caller side of an invite

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{Failure, Outcome, Resolution};
use crate::dialog::{Dialog, DialogParams};
use crate::error::{UaError, UaResult};
use crate::transport::{Method, OutgoingRequest, PendingResponse, Response, StatusCode};
use crate::types::{CallId, Role};
use crate::user_agent::{UserAgent, UserAgentInner};

/// Caller-side transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// INVITE sent, no final response yet
    Trying,
    Accepted,
    Rejected,
    Canceled,
    /// Transport failure or timeout
    Failed,
}

impl ClientState {
    pub fn is_terminated(self) -> bool {
        !matches!(self, ClientState::Trying)
    }
}

struct ClientInner {
    call_id: CallId,
    local: String,
    remote: String,
    created_at: DateTime<Utc>,
    state: Mutex<ClientState>,
    /// Serializes final-response handling with `cancel()`
    arbiter: tokio::sync::Mutex<()>,
    /// Set once the INVITE has been handed to the transport, or will never be
    submitted: watch::Sender<bool>,
    outcome: Outcome,
    user_agent: Weak<UserAgentInner>,
}

/// An outbound invite
///
/// Created by [`UserAgent::invite`]; cloning yields another handle to the same
/// transaction.
#[derive(Clone)]
pub struct InviteClientTransaction {
    inner: Arc<ClientInner>,
}

impl InviteClientTransaction {
    /// Create the transaction, add it to the user agent's pending set and send the INVITE
    pub(crate) fn start(
        ua: &Arc<UserAgentInner>,
        remote: String,
        body: Bytes,
        invite_timeout: Duration,
    ) -> Self {
        let local = ua.identity();
        let transaction = Self {
            inner: Arc::new(ClientInner {
                call_id: CallId::new_v4(),
                local: local.clone(),
                remote: remote.clone(),
                created_at: Utc::now(),
                state: Mutex::new(ClientState::Trying),
                arbiter: tokio::sync::Mutex::new(()),
                submitted: watch::channel(false).0,
                outcome: Outcome::new(),
                user_agent: Arc::downgrade(ua),
            }),
        };

        ua.client_transactions
            .insert(transaction.inner.call_id.clone(), transaction.clone());
        info!(call_id = %transaction.inner.call_id, from = %local, to = %remote, "sending INVITE");

        let request = OutgoingRequest::new(Method::Invite, local, remote, transaction.inner.call_id.clone())
            .with_user_agent(ua.config.user_agent.clone())
            .with_body(body);
        let runner = transaction.clone();
        ua.runtime.spawn(async move { runner.run(request, invite_timeout).await });

        transaction
    }

    async fn run(self, request: OutgoingRequest, invite_timeout: Duration) {
        let transport = match self.inner.user_agent.upgrade() {
            Some(ua) => ua.transport.clone(),
            None => {
                self.inner.submitted.send_replace(true);
                self.commit(ClientState::Failed, Err(Failure::Error(UaError::UserAgentClosed)));
                return;
            }
        };

        // Timer B covers submission and the wait for a final response.
        let deadline = Instant::now() + invite_timeout;
        let submitted = timeout_at(deadline, transport.send_request(request)).await;
        self.inner.submitted.send_replace(true);
        let call_id = &self.inner.call_id;

        let mut pending = match submitted {
            Ok(Ok(pending)) => pending,
            Ok(Err(e)) => {
                let _turn = self.inner.arbiter.lock().await;
                self.commit(ClientState::Failed, Err(Failure::Error(UaError::from_transport(call_id, e))));
                return;
            }
            Err(_) => {
                let _turn = self.inner.arbiter.lock().await;
                self.time_out(invite_timeout, None);
                return;
            }
        };

        let result = timeout_at(deadline, &mut pending).await;
        let _turn = self.inner.arbiter.lock().await;

        match result {
            Ok(Ok(response)) if response.status.is_success() => self.on_accepted(response),
            Ok(Ok(response)) if response.status == StatusCode::REQUEST_TERMINATED => {
                self.commit(ClientState::Canceled, Err(Failure::Canceled));
            }
            Ok(Ok(response)) => {
                self.commit(ClientState::Rejected, Err(Failure::Rejected(response.status)));
            }
            Ok(Err(e)) => {
                self.commit(ClientState::Failed, Err(Failure::Error(UaError::from_transport(call_id, e))));
            }
            Err(_) => self.time_out(invite_timeout, Some(pending)),
        }
    }

    fn time_out(&self, invite_timeout: Duration, late: Option<PendingResponse>) {
        let reason = format!("no final response within {:?}", invite_timeout);
        let failed = UaError::transaction_failed(&self.inner.call_id, reason);
        if self.commit(ClientState::Failed, Err(Failure::Error(failed))) {
            self.send_abandon_cancel(late);
        }
    }

    fn on_accepted(&self, response: Response) {
        let Some(ua) = self.inner.user_agent.upgrade() else {
            self.commit(ClientState::Failed, Err(Failure::Error(UaError::UserAgentClosed)));
            return;
        };
        let dialog = Dialog::new(
            DialogParams {
                call_id: self.inner.call_id.clone(),
                local: self.inner.local.clone(),
                remote: self.inner.remote.clone(),
                role: Role::Caller,
                remote_body: response.body,
            },
            &ua,
        );
        self.commit(ClientState::Accepted, Ok(dialog));
    }

    /// Move to a terminal state, update the user agent's sets and resolve the outcome
    ///
    /// Returns false if the transaction had already resolved.
    fn commit(&self, to: ClientState, result: Resolution) -> bool {
        let mut state = self.inner.state.lock();
        if state.is_terminated() {
            debug!(call_id = %self.inner.call_id, current = ?*state, attempted = ?to, "late transition ignored");
            return false;
        }
        *state = to;

        if let Some(ua) = self.inner.user_agent.upgrade() {
            if let Ok(dialog) = &result {
                ua.dialogs.insert(self.inner.call_id.clone(), dialog.clone());
            }
            ua.client_transactions
                .remove_if(&self.inner.call_id, |_, t| Arc::ptr_eq(&t.inner, &self.inner));
        }
        self.inner.outcome.resolve(result);
        drop(state);

        info!(call_id = %self.inner.call_id, state = ?to, "invite client transaction resolved");
        true
    }

    /// Tell the callee to stop ringing after the invite timer fired
    ///
    /// The callee may have answered before the CANCEL reached it. A 2xx that still
    /// arrives on `late` is hung up with a BYE, since no dialog exists on this side.
    fn send_abandon_cancel(&self, late: Option<PendingResponse>) {
        let Some(ua) = self.inner.user_agent.upgrade() else {
            return;
        };
        let request = |method| {
            OutgoingRequest::new(
                method,
                self.inner.local.clone(),
                self.inner.remote.clone(),
                self.inner.call_id.clone(),
            )
            .with_user_agent(ua.config.user_agent.clone())
        };
        let cancel = request(Method::Cancel);
        let bye = request(Method::Bye);
        let transport = ua.transport.clone();
        let wait = ua.config.request_timeout();
        let call_id = self.inner.call_id.clone();

        ua.runtime.spawn(async move {
            match timeout(wait, transport.exchange(cancel)).await {
                Ok(Ok(response)) => debug!(call_id = %call_id, status = %response.status, "abandon CANCEL answered"),
                Ok(Err(e)) => debug!(call_id = %call_id, error = %e, "abandon CANCEL failed"),
                Err(_) => debug!(call_id = %call_id, "abandon CANCEL timed out"),
            }

            let Some(late) = late else {
                return;
            };
            match timeout(wait, late).await {
                Ok(Ok(response)) if response.status.is_success() => {
                    info!(call_id = %call_id, "invite answered after it timed out, hanging up");
                    match timeout(wait, transport.exchange(bye)).await {
                        Ok(Ok(response)) => debug!(call_id = %call_id, status = %response.status, "BYE answered"),
                        Ok(Err(e)) => warn!(call_id = %call_id, error = %e, "BYE for late answer failed"),
                        Err(_) => warn!(call_id = %call_id, "BYE for late answer timed out"),
                    }
                }
                Ok(Ok(response)) => debug!(call_id = %call_id, status = %response.status, "late final response"),
                _ => {}
            }
        });
    }

    /// Withdraw the invite
    ///
    /// Valid only while [`ClientState::Trying`]. Resolves once the CANCEL is
    /// confirmed; the outcome then fails with [`UaError::Canceled`]. Fails with
    /// [`UaError::TransactionTerminated`] if the transaction already resolved or the
    /// callee answered first.
    pub async fn cancel(&self) -> UaResult<()> {
        let call_id = &self.inner.call_id;
        if self.state().is_terminated() {
            return Err(UaError::terminated(call_id));
        }

        // The CANCEL must not overtake its INVITE.
        let mut submitted = self.inner.submitted.subscribe();
        if submitted.wait_for(|sent| *sent).await.is_err() {
            return Err(UaError::terminated(call_id));
        }

        let _turn = self.inner.arbiter.lock().await;
        if self.state().is_terminated() {
            return Err(UaError::terminated(call_id));
        }
        let ua = self.inner.user_agent.upgrade().ok_or(UaError::UserAgentClosed)?;
        let transport = ua.transport.clone();
        let wait = ua.config.request_timeout();
        let request = OutgoingRequest::new(
            Method::Cancel,
            self.inner.local.clone(),
            self.inner.remote.clone(),
            call_id.clone(),
        )
        .with_user_agent(ua.config.user_agent.clone());
        drop(ua);

        debug!(call_id = %call_id, "sending CANCEL");
        let response = match timeout(wait, transport.exchange(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(UaError::from_transport(call_id, e)),
            Err(_) => return Err(UaError::transaction_failed(call_id, "CANCEL timed out")),
        };

        if !response.status.is_success() {
            warn!(call_id = %call_id, status = %response.status, "CANCEL refused");
            return Err(UaError::terminated(call_id));
        }

        if self.commit(ClientState::Canceled, Err(Failure::Canceled)) || self.state() == ClientState::Canceled {
            Ok(())
        } else {
            Err(UaError::terminated(call_id))
        }
    }

    /// Wait for the invite to resolve
    ///
    /// Resolves to the caller's [`Dialog`] when accepted and fails with
    /// [`UaError::Rejected`], [`UaError::Canceled`] or [`UaError::TransactionFailed`]
    /// otherwise. Any number of tasks may wait on the same transaction.
    pub async fn outcome(&self) -> UaResult<Dialog> {
        let resolution = self.inner.outcome.wait().await;
        self.settle(resolution)
    }

    /// The resolved outcome, if any, without waiting
    pub fn try_outcome(&self) -> Option<UaResult<Dialog>> {
        self.inner.outcome.peek().map(|resolution| self.settle(resolution))
    }

    fn settle(&self, resolution: Resolution) -> UaResult<Dialog> {
        resolution.map_err(|failure| failure.into_error(self.clone().into()))
    }

    pub fn call_id(&self) -> &CallId {
        &self.inner.call_id
    }

    /// Identity being invited
    pub fn remote(&self) -> &str {
        &self.inner.remote
    }

    pub fn local(&self) -> &str {
        &self.inner.local
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.lock()
    }

    pub fn is_canceled(&self) -> bool {
        self.state() == ClientState::Canceled
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == ClientState::Rejected
    }

    pub fn is_terminated(&self) -> bool {
        self.state().is_terminated()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// The user agent that sent this invite, while it is alive
    pub fn user_agent(&self) -> Option<UserAgent> {
        self.inner.user_agent.upgrade().map(UserAgent::from_inner)
    }
}

impl PartialEq for InviteClientTransaction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for InviteClientTransaction {}

impl fmt::Debug for InviteClientTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InviteClientTransaction")
            .field("call_id", &self.inner.call_id)
            .field("remote", &self.inner.remote)
            .field("state", &self.state())
            .finish()
    }
}
