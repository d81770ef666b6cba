//! Error types for the user agent signaling core

use thiserror::Error;

use crate::transaction::InviteTransaction;
use crate::transport::{StatusCode, TransportError};
use crate::types::CallId;

/// Result type for user agent operations
pub type UaResult<T> = Result<T, UaError>;

/// Errors that can occur while registering, inviting or managing dialogs
///
/// `UaError` is `Clone` so that a single transaction outcome can be observed by
/// any number of waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UaError {
    /// REGISTER (or un-REGISTER) was refused or never completed
    #[error("Registration failed: {reason}")]
    Registration { reason: String },

    /// The invite was declined; `transaction` is the rejected transaction
    #[error("Invite {} rejected with {status}", .transaction.call_id())]
    Rejected {
        transaction: InviteTransaction,
        status: StatusCode,
    },

    /// The invite was withdrawn before it was answered
    #[error("Invite {} was canceled", .transaction.call_id())]
    Canceled { transaction: InviteTransaction },

    /// Transport failure or timeout before a final response
    #[error("Transaction {call_id} failed: {reason}")]
    TransactionFailed { call_id: CallId, reason: String },

    /// Operation attempted on a transaction that has already resolved
    #[error("Transaction {call_id} has already terminated")]
    TransactionTerminated { call_id: CallId },

    /// Invalid invite target
    #[error("Invalid invite target: {target}")]
    InvalidTarget { target: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The owning user agent has been dropped
    #[error("User agent has been closed")]
    UserAgentClosed,
}

impl UaError {
    /// Create a registration error
    pub fn registration(reason: impl Into<String>) -> Self {
        Self::Registration {
            reason: reason.into(),
        }
    }

    /// Create a transaction failure for `call_id`
    pub fn transaction_failed(call_id: &CallId, reason: impl Into<String>) -> Self {
        Self::TransactionFailed {
            call_id: call_id.clone(),
            reason: reason.into(),
        }
    }

    /// Create a terminated-transaction error for `call_id`
    pub fn terminated(call_id: &CallId) -> Self {
        Self::TransactionTerminated {
            call_id: call_id.clone(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Map a transport error raised during a call-related exchange
    pub fn from_transport(call_id: &CallId, err: TransportError) -> Self {
        Self::transaction_failed(call_id, err.to_string())
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::TransactionTerminated { .. })
    }

    /// The transaction that was rejected or canceled
    pub fn transaction(&self) -> Option<&InviteTransaction> {
        match self {
            Self::Rejected { transaction, .. } | Self::Canceled { transaction } => Some(transaction),
            _ => None,
        }
    }

    /// The call this error refers to, if any
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::Rejected { transaction, .. } | Self::Canceled { transaction } => Some(transaction.call_id()),
            Self::TransactionFailed { call_id, .. } | Self::TransactionTerminated { call_id } => Some(call_id),
            _ => None,
        }
    }
}

impl From<TransportError> for UaError {
    /// Transport errors outside of a call context surface as registration failures,
    /// the only call-less exchange a user agent performs.
    fn from(err: TransportError) -> Self {
        Self::registration(err.to_string())
    }
}
