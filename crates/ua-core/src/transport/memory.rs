//! In-process transport
//!
//! [`MemoryNetwork`] plays both registrar and proxy for any number of user agents
//! living in the same process. REGISTER binds the sender's identity to its
//! endpoint; INVITE, CANCEL and BYE are routed to whichever endpoint currently holds
//! the target identity. A request is submitted once it sits in the recipient's
//! queue, and its [`PendingResponse`] resolves when the recipient answers through
//! [`Transport::send_response`].
//!
//! Faults can be injected per target identity or for the registrar, which is how
//! the timeout and transport-failure paths are exercised in tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::{
    IncomingRequest, Method, OutgoingRequest, PendingResponse, Response, StatusCode, TransactionKey,
    Transport, TransportError, TransportResult, REGISTRAR,
};

const ENDPOINT_QUEUE_DEPTH: usize = 64;

type EndpointId = u64;

/// Injected misbehaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Requests are swallowed and never answered
    Silent,
    /// Requests fail immediately with [`TransportError::Unreachable`]
    Unreachable,
}

#[derive(Debug, Default)]
struct NetworkInner {
    next_endpoint: AtomicU64,
    endpoints: DashMap<EndpointId, mpsc::Sender<IncomingRequest>>,
    bindings: DashMap<String, EndpointId>,
    pending: DashMap<(EndpointId, TransactionKey), oneshot::Sender<Response>>,
    faults: DashMap<String, Fault>,
    rejected_credentials: Mutex<HashSet<String>>,
    log: Mutex<Vec<OutgoingRequest>>,
}

/// Shared in-memory signaling network
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint
    ///
    /// Returns the transport to hand to a user agent together with the receiver on
    /// which that user agent gets its inbound requests.
    pub fn endpoint(&self) -> (Arc<MemoryTransport>, mpsc::Receiver<IncomingRequest>) {
        let id = self.inner.next_endpoint.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(ENDPOINT_QUEUE_DEPTH);
        self.inner.endpoints.insert(id, tx);
        let transport = MemoryTransport {
            id,
            network: self.inner.clone(),
        };
        (Arc::new(transport), rx)
    }

    /// Inject a fault for requests addressed to `target` (use [`REGISTRAR`] for REGISTER)
    pub fn set_fault(&self, target: impl Into<String>, fault: Fault) {
        self.inner.faults.insert(target.into(), fault);
    }

    pub fn clear_fault(&self, target: &str) {
        self.inner.faults.remove(target);
    }

    /// Make the registrar answer 403 to REGISTERs carrying `credential`
    pub fn reject_credential(&self, credential: impl Into<String>) {
        self.inner.rejected_credentials.lock().insert(credential.into());
    }

    pub fn is_bound(&self, identity: &str) -> bool {
        self.inner.bindings.contains_key(identity)
    }

    /// Number of requests of `method` sent so far across the network
    pub fn sent_count(&self, method: Method) -> usize {
        self.inner.log.lock().iter().filter(|r| r.method == method).count()
    }

    /// Requests sent so far, in send order
    pub fn sent_requests(&self) -> Vec<OutgoingRequest> {
        self.inner.log.lock().clone()
    }
}

/// One user agent's attachment to a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    id: EndpointId,
    network: Arc<NetworkInner>,
}

impl MemoryTransport {
    fn register(&self, request: &OutgoingRequest) -> Response {
        let rejected = request
            .credential
            .as_deref()
            .is_some_and(|c| self.network.rejected_credentials.lock().contains(c));
        if rejected {
            debug!(identity = %request.from, "registrar refused credential");
            return Response::new(StatusCode::FORBIDDEN);
        }

        if request.expires == Some(0) {
            self.network
                .bindings
                .remove_if(&request.from, |_, bound| *bound == self.id);
            debug!(identity = %request.from, endpoint = self.id, "binding removed");
        } else {
            self.network.bindings.insert(request.from.clone(), self.id);
            debug!(identity = %request.from, endpoint = self.id, "binding added");
        }
        Response::new(StatusCode::OK)
    }

    async fn route(&self, request: OutgoingRequest) -> TransportResult<PendingResponse> {
        let Some(destination) = self.network.bindings.get(&request.target).map(|b| *b) else {
            let status = match request.method {
                Method::Invite => StatusCode::NOT_FOUND,
                _ => StatusCode::CALL_DOES_NOT_EXIST,
            };
            debug!(to = %request.target, method = %request.method, "no binding for target");
            return Ok(PendingResponse::ready(Response::new(status)));
        };

        let sender = self
            .network
            .endpoints
            .get(&destination)
            .map(|s| s.clone())
            .ok_or_else(|| TransportError::Unreachable {
                target: request.target.clone(),
            })?;

        let key = (destination, request.key());
        let (tx, rx) = oneshot::channel();
        if self.network.pending.insert(key.clone(), tx).is_some() {
            warn!(call_id = %request.call_id, method = %request.method, "replaced pending transaction");
        }

        let incoming = IncomingRequest {
            method: request.method,
            from: request.from,
            to: request.target.clone(),
            call_id: request.call_id,
            user_agent: request.user_agent,
            body: request.body,
        };
        trace!(endpoint = destination, method = %incoming.method, call_id = %incoming.call_id, "delivering");
        if sender.send(incoming).await.is_err() {
            self.network.pending.remove(&key);
            return Err(TransportError::Unreachable {
                target: request.target,
            });
        }

        Ok(PendingResponse::new(async move {
            rx.await.map_err(|_| TransportError::Closed)
        }))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_request(&self, request: OutgoingRequest) -> TransportResult<PendingResponse> {
        self.network.log.lock().push(request.clone());

        let fault_target = match request.method {
            Method::Register => REGISTRAR,
            _ => request.target.as_str(),
        };
        let fault = self.network.faults.get(fault_target).map(|f| *f);
        match fault {
            Some(Fault::Silent) => {
                trace!(to = fault_target, method = %request.method, "swallowing request");
                return Ok(PendingResponse::never());
            }
            Some(Fault::Unreachable) => {
                return Err(TransportError::Unreachable {
                    target: fault_target.to_string(),
                });
            }
            None => {}
        }

        match request.method {
            Method::Register => Ok(PendingResponse::ready(self.register(&request))),
            _ => self.route(request).await,
        }
    }

    async fn send_response(&self, key: &TransactionKey, response: Response) -> TransportResult<()> {
        let (_, waiter) = self
            .network
            .pending
            .remove(&(self.id, key.clone()))
            .ok_or_else(|| TransportError::NoSuchTransaction {
                call_id: key.call_id.clone(),
                method: key.method,
            })?;
        // The requester may have given up; that is not an error for the responder.
        let _ = waiter.send(response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallId;

    fn register(identity: &str, credential: &str) -> OutgoingRequest {
        OutgoingRequest::new(Method::Register, identity, REGISTRAR, CallId::new_v4())
            .with_credential(credential)
            .with_expires(3600)
    }

    #[tokio::test]
    async fn test_register_binds_and_unbinds() {
        let network = MemoryNetwork::new();
        let (transport, _rx) = network.endpoint();

        let response = transport.exchange(register("alice", "t1")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert!(network.is_bound("alice"));

        let unregister = register("alice", "t1").with_expires(0);
        transport.exchange(unregister).await.unwrap();
        assert!(!network.is_bound("alice"));
        assert_eq!(network.sent_count(Method::Register), 2);
    }

    #[tokio::test]
    async fn test_rejected_credential() {
        let network = MemoryNetwork::new();
        network.reject_credential("bad");
        let (transport, _rx) = network.endpoint();

        let response = transport.exchange(register("alice", "bad")).await.unwrap();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert!(!network.is_bound("alice"));
    }

    #[tokio::test]
    async fn test_request_routed_and_answered() {
        let network = MemoryNetwork::new();
        let (alice, _alice_rx) = network.endpoint();
        let (bob, mut bob_rx) = network.endpoint();
        bob.exchange(register("bob", "t2")).await.unwrap();

        let call_id = CallId::new_v4();
        let invite = OutgoingRequest::new(Method::Invite, "alice", "bob", call_id.clone())
            .with_user_agent("softphone/2.0");
        let pending = alice.send_request(invite).await.unwrap();

        // Submitted means queued at the recipient.
        let incoming = bob_rx.try_recv().unwrap();
        assert_eq!(incoming.from, "alice");
        assert_eq!(incoming.call_id, call_id);
        assert_eq!(incoming.user_agent.as_deref(), Some("softphone/2.0"));
        bob.send_response(&incoming.key(), Response::new(StatusCode::OK))
            .await
            .unwrap();

        let response = pending.await.unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let err = bob
            .send_response(&incoming.key(), Response::new(StatusCode::OK))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoSuchTransaction { .. }));
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let network = MemoryNetwork::new();
        let (alice, _rx) = network.endpoint();

        let invite = OutgoingRequest::new(Method::Invite, "alice", "nobody", CallId::new_v4());
        assert_eq!(alice.exchange(invite).await.unwrap().status, StatusCode::NOT_FOUND);

        let bye = OutgoingRequest::new(Method::Bye, "alice", "nobody", CallId::new_v4());
        assert_eq!(
            alice.exchange(bye).await.unwrap().status,
            StatusCode::CALL_DOES_NOT_EXIST
        );
    }

    #[tokio::test]
    async fn test_unreachable_fault() {
        let network = MemoryNetwork::new();
        network.set_fault(REGISTRAR, Fault::Unreachable);
        let (alice, _rx) = network.endpoint();

        let err = alice.exchange(register("alice", "t1")).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));

        network.clear_fault(REGISTRAR);
        assert!(alice.exchange(register("alice", "t1")).await.is_ok());
    }
}
