//! Common test helpers for user agent integration tests
//!
//! Every test builds its own [`MemoryNetwork`] and attaches user agents to it, so
//! tests are independent of each other and of the wall clock unless they pause time.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use rvoip_ua_core::logging::{setup_logging, LoggingConfig};
use rvoip_ua_core::prelude::*;
use rvoip_ua_core::transport::memory::{MemoryNetwork, MemoryTransport};
use rvoip_ua_core::transport::{
    Method, OutgoingRequest, PendingResponse, Response, StatusCode, TransactionKey, TransportResult,
};
use tokio::sync::{mpsc, Notify};

/// Install a subscriber once per test binary; honours RUST_LOG
pub fn init_tracing() {
    let _ = setup_logging(&LoggingConfig::new("rvoip_ua_core=warn"));
}

pub fn user_agent(network: &MemoryNetwork, identity: &str) -> UserAgent {
    user_agent_with_config(network, identity, UserAgentConfig::default())
}

pub fn user_agent_with_config(network: &MemoryNetwork, identity: &str, config: UserAgentConfig) -> UserAgent {
    init_tracing();
    let (transport, incoming) = network.endpoint();
    UserAgent::new(token_for(identity), transport, incoming, config).expect("valid user agent")
}

pub fn token_for(identity: &str) -> Token {
    Token::new(identity, format!("capability-token-{}", identity))
}

/// A user agent that has completed registration
pub async fn registered(network: &MemoryNetwork, identity: &str) -> UserAgent {
    let ua = user_agent(network, identity);
    ua.register(None).await.expect("registration succeeds");
    ua
}

/// Channel receiving every inbound invite the user agent announces
pub fn invites(ua: &UserAgent) -> mpsc::UnboundedReceiver<InviteServerTransaction> {
    let (tx, rx) = mpsc::unbounded_channel();
    ua.on(UserAgentEventKind::Invite, move |event| {
        if let UserAgentEvent::Invite(transaction) = event {
            let _ = tx.send(transaction.clone());
        }
    });
    rx
}

/// Counts events of one kind
pub fn count_events(ua: &UserAgent, kind: UserAgentEventKind) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    ua.on(kind, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}

/// Counts `Ended` notifications of a dialog
pub fn count_ended(dialog: &Dialog) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    dialog.on(DialogEventKind::Ended, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}

/// `caller` invites `callee`, which accepts; returns (caller's dialog, callee's dialog)
pub async fn establish(caller: &UserAgent, callee: &UserAgent) -> (Dialog, Dialog) {
    let mut incoming = invites(callee);
    let invite = caller
        .invite(callee.identity(), InviteOptions::default())
        .expect("invite created");
    let ringing = incoming.recv().await.expect("callee sees the invite");
    let callee_dialog = ringing.accept().await.expect("accept succeeds");
    let caller_dialog = invite.outcome().await.expect("caller dialog");
    (caller_dialog, callee_dialog)
}

/// Holds back, then fails, the next INVITE response sent through a [`GatedTransport`]
#[derive(Debug, Default)]
pub struct ResponseGate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl ResponseGate {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Wait until a response is being held
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held response fail
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Debug)]
pub struct GatedTransport {
    inner: Arc<MemoryTransport>,
    gate: Arc<ResponseGate>,
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send_request(&self, request: OutgoingRequest) -> TransportResult<PendingResponse> {
        self.inner.send_request(request).await
    }

    async fn send_response(&self, key: &TransactionKey, response: Response) -> TransportResult<()> {
        if key.method == Method::Invite && self.gate.armed.swap(false, Ordering::SeqCst) {
            self.gate.entered.notify_one();
            self.gate.release.notified().await;
            return Err(TransportError::Closed);
        }
        self.inner.send_response(key, response).await
    }
}

/// A user agent whose INVITE responses can be held with the returned gate
pub fn gated_user_agent(network: &MemoryNetwork, identity: &str) -> (UserAgent, Arc<ResponseGate>) {
    init_tracing();
    let (inner, incoming) = network.endpoint();
    let gate = Arc::new(ResponseGate::default());
    let transport = Arc::new(GatedTransport {
        inner,
        gate: gate.clone(),
    });
    let ua = UserAgent::new(token_for(identity), transport, incoming, UserAgentConfig::default())
        .expect("valid user agent");
    (ua, gate)
}

/// Reshapes the traffic of one memory endpoint
#[derive(Debug, Default, Clone, Copy)]
pub struct Shape {
    /// Yield to the scheduler after every response is handed off
    pub yield_after_response: bool,
    /// Answer outgoing CANCELs with 481 locally instead of sending them
    pub refuse_cancel: bool,
}

#[derive(Debug)]
pub struct ShapedTransport {
    inner: Arc<MemoryTransport>,
    shape: Shape,
}

#[async_trait]
impl Transport for ShapedTransport {
    async fn send_request(&self, request: OutgoingRequest) -> TransportResult<PendingResponse> {
        if self.shape.refuse_cancel && request.method == Method::Cancel {
            return Ok(PendingResponse::ready(Response::new(StatusCode::CALL_DOES_NOT_EXIST)));
        }
        self.inner.send_request(request).await
    }

    async fn send_response(&self, key: &TransactionKey, response: Response) -> TransportResult<()> {
        let sent = self.inner.send_response(key, response).await;
        if self.shape.yield_after_response {
            tokio::task::yield_now().await;
        }
        sent
    }
}

/// A user agent whose traffic is reshaped as described by `shape`
pub fn shaped_user_agent(network: &MemoryNetwork, identity: &str, shape: Shape, config: UserAgentConfig) -> UserAgent {
    init_tracing();
    let (inner, incoming) = network.endpoint();
    let transport = Arc::new(ShapedTransport { inner, shape });
    UserAgent::new(token_for(identity), transport, incoming, config).expect("valid user agent")
}

/// Give spawned tasks on the current-thread runtime a chance to run
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
