//! Transport seam
//!
//! The user agent does not frame or parse signaling messages. It talks to a
//! [`Transport`] that sends requests and responses and hands inbound requests back
//! through an `mpsc` channel given to [`UserAgent::new`](crate::UserAgent::new).
//!
//! Delivery is assumed reliable and in order within one call id's exchange. Inbound
//! requests may be delivered more than once; the user agent deduplicates INVITEs
//! by call id.

pub mod memory;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CallId;

/// Target of REGISTER requests, and the key for registrar faults in
/// [`MemoryNetwork`](memory::MemoryNetwork)
pub const REGISTRAR: &str = "registrar";

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised by a [`Transport`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Destination could not be reached
    #[error("Destination unreachable: {target}")]
    Unreachable { target: String },

    /// No transaction is waiting for this response
    #[error("No pending {method} transaction for call {call_id}")]
    NoSuchTransaction { call_id: CallId, method: Method },

    /// The transport has shut down
    #[error("Transport closed")]
    Closed,
}

/// Signaling request methods the user agent uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Register,
    Invite,
    Cancel,
    Bye,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Cancel => "CANCEL",
            Method::Bye => "BYE",
        };
        f.write_str(name)
    }
}

/// Response status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const TEMPORARILY_UNAVAILABLE: StatusCode = StatusCode(480);
    pub const CALL_DOES_NOT_EXIST: StatusCode = StatusCode(481);
    pub const BUSY_HERE: StatusCode = StatusCode(486);
    pub const REQUEST_TERMINATED: StatusCode = StatusCode(487);
    pub const DECLINE: StatusCode = StatusCode(603);

    pub const fn new(code: u16) -> Self {
        StatusCode(code)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// 2xx
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }

    /// 1xx responses are never final
    pub fn is_final(self) -> bool {
        self.0 >= 200
    }

    pub fn reason(self) -> &'static str {
        match self.0 {
            200 => "OK",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            480 => "Temporarily Unavailable",
            481 => "Call/Transaction Does Not Exist",
            486 => "Busy Here",
            487 => "Request Terminated",
            603 => "Decline",
            _ => "",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            "" => write!(f, "{}", self.0),
            reason => write!(f, "{} {}", self.0, reason),
        }
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

/// Identifies the server-side transaction a response belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub call_id: CallId,
    pub method: Method,
}

impl TransactionKey {
    pub fn new(call_id: CallId, method: Method) -> Self {
        Self { call_id, method }
    }
}

/// A request sent by this user agent
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    /// Identity of the sender
    pub from: String,
    /// Identity of the recipient; the registrar for REGISTER
    pub target: String,
    pub call_id: CallId,
    /// Credential attached to REGISTER
    pub credential: Option<String>,
    /// Requested registration lifetime; `Some(0)` removes the binding
    pub expires: Option<u32>,
    /// Product string of the sending user agent
    pub user_agent: Option<String>,
    /// Opaque session description
    pub body: Bytes,
}

impl OutgoingRequest {
    pub fn new(method: Method, from: impl Into<String>, target: impl Into<String>, call_id: CallId) -> Self {
        Self {
            method,
            from: from.into(),
            target: target.into(),
            call_id,
            credential: None,
            expires: None,
            user_agent: None,
            body: Bytes::new(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn key(&self) -> TransactionKey {
        TransactionKey::new(self.call_id.clone(), self.method)
    }
}

/// A request delivered to this user agent
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub method: Method,
    pub from: String,
    pub to: String,
    pub call_id: CallId,
    /// Product string of the sender, if it sent one
    pub user_agent: Option<String>,
    pub body: Bytes,
}

impl IncomingRequest {
    pub fn key(&self) -> TransactionKey {
        TransactionKey::new(self.call_id.clone(), self.method)
    }
}

/// A final response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }
}

/// Final response to a request that is already on its way
///
/// Returned by [`Transport::send_request`] once the request has been handed off.
/// Await it for the response; dropping it abandons the wait but not the request.
pub struct PendingResponse {
    inner: Pin<Box<dyn Future<Output = TransportResult<Response>> + Send>>,
}

impl PendingResponse {
    pub fn new<F>(response: F) -> Self
    where
        F: Future<Output = TransportResult<Response>> + Send + 'static,
    {
        Self {
            inner: Box::pin(response),
        }
    }

    /// A response known at submission time
    pub fn ready(response: Response) -> Self {
        Self::new(std::future::ready(Ok(response)))
    }

    /// A response that never arrives
    pub fn never() -> Self {
        Self::new(std::future::pending())
    }
}

impl Future for PendingResponse {
    type Output = TransportResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse").finish_non_exhaustive()
    }
}

/// Sends signaling messages on behalf of a user agent
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Hand a request to the network
    ///
    /// Resolves once the request is submitted, so requests for one call id that are
    /// submitted one after the other reach the peer in that order. The user agent
    /// bounds the returned [`PendingResponse`] with its own timeouts; implementations
    /// may leave it pending indefinitely.
    async fn send_request(&self, request: OutgoingRequest) -> TransportResult<PendingResponse>;

    /// Answer an inbound request
    async fn send_response(&self, key: &TransactionKey, response: Response) -> TransportResult<()>;

    /// Send a request and wait for its final response
    async fn exchange(&self, request: OutgoingRequest) -> TransportResult<Response> {
        self.send_request(request).await?.await
    }
}
