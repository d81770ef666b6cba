//! Invite transactions
//!
//! An invite transaction governs one call-setup attempt. The caller side is an
//! [`InviteClientTransaction`], the callee side an [`InviteServerTransaction`].
//! Both resolve exactly once, either to a [`Dialog`] or to a terminal error, and
//! leave their user agent's pending set at the same instant they resolve.
//!
//! Every transition on a transaction goes through a per-transaction arbiter, so a
//! local action (accept, reject, cancel) and a remote event (final response,
//! CANCEL) racing each other yield exactly one terminal state. The loser observes
//! [`UaError::TransactionTerminated`] or the winner's error.

pub mod client;
pub mod server;

pub use client::{ClientState, InviteClientTransaction};
pub use server::{InviteServerTransaction, ServerState};

use tokio::sync::watch;

use crate::dialog::Dialog;
use crate::error::{UaError, UaResult};
use crate::transport::StatusCode;
use crate::types::CallId;

/// How a transaction ended, as stored on the transaction itself
///
/// Turned into a [`UaError`] carrying the transaction handle when read.
#[derive(Debug, Clone)]
pub(crate) enum Failure {
    Rejected(StatusCode),
    Canceled,
    Error(UaError),
}

impl Failure {
    pub(crate) fn into_error(self, transaction: InviteTransaction) -> UaError {
        match self {
            Failure::Rejected(status) => UaError::Rejected { transaction, status },
            Failure::Canceled => UaError::Canceled { transaction },
            Failure::Error(err) => err,
        }
    }
}

pub(crate) type Resolution = Result<Dialog, Failure>;

/// Single-assignment result shared by any number of waiters
#[derive(Debug)]
pub(crate) struct Outcome {
    tx: watch::Sender<Option<Resolution>>,
}

impl Outcome {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Store the result unless one is already present; returns whether it was stored
    pub(crate) fn resolve(&self, result: Resolution) -> bool {
        let mut result = Some(result);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = result.take();
            true
        })
    }

    pub(crate) fn peek(&self) -> Option<Resolution> {
        self.tx.borrow().clone()
    }

    pub(crate) async fn wait(&self) -> Resolution {
        let mut rx = self.tx.subscribe();
        let resolved = match rx.wait_for(Option::is_some).await {
            Ok(resolved) => resolved,
            Err(_) => return Err(Failure::Error(UaError::UserAgentClosed)),
        };
        resolved.clone().unwrap_or(Err(Failure::Error(UaError::UserAgentClosed)))
    }
}

/// State of either kind of invite transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Client(ClientState),
    Server(ServerState),
}

impl TransactionState {
    pub fn is_terminated(self) -> bool {
        match self {
            TransactionState::Client(state) => state.is_terminated(),
            TransactionState::Server(state) => state.is_terminated(),
        }
    }
}

/// Either side of an invite transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteTransaction {
    Client(InviteClientTransaction),
    Server(InviteServerTransaction),
}

impl InviteTransaction {
    pub fn call_id(&self) -> &CallId {
        match self {
            InviteTransaction::Client(t) => t.call_id(),
            InviteTransaction::Server(t) => t.call_id(),
        }
    }

    pub fn state(&self) -> TransactionState {
        match self {
            InviteTransaction::Client(t) => TransactionState::Client(t.state()),
            InviteTransaction::Server(t) => TransactionState::Server(t.state()),
        }
    }

    /// Wait for the transaction to resolve
    pub async fn outcome(&self) -> UaResult<Dialog> {
        match self {
            InviteTransaction::Client(t) => t.outcome().await,
            InviteTransaction::Server(t) => t.outcome().await,
        }
    }

    pub fn is_rejected(&self) -> bool {
        match self {
            InviteTransaction::Client(t) => t.is_rejected(),
            InviteTransaction::Server(t) => t.is_rejected(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        match self {
            InviteTransaction::Client(t) => t.is_canceled(),
            InviteTransaction::Server(t) => t.is_canceled(),
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self, InviteTransaction::Client(_))
    }
}

impl From<InviteClientTransaction> for InviteTransaction {
    fn from(t: InviteClientTransaction) -> Self {
        InviteTransaction::Client(t)
    }
}

impl From<InviteServerTransaction> for InviteTransaction {
    fn from(t: InviteServerTransaction) -> Self {
        InviteTransaction::Server(t)
    }
}
