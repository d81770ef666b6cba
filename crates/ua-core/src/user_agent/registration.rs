//! REGISTER handling
//!
//! Register and unregister calls on one user agent are serialized through a fair
//! async mutex, so they complete in the order they were issued.

use std::sync::atomic::Ordering;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::UserAgent;
use crate::error::{UaError, UaResult};
use crate::events::UserAgentEvent;
use crate::token::Token;
use crate::transport::{Method, OutgoingRequest, REGISTRAR};
use crate::types::CallId;

impl UserAgent {
    /// Register with the signaling service
    ///
    /// A supplied `token` replaces the current one; it is rolled back if the
    /// registration fails. On success the user agent is registered and
    /// [`UserAgentEvent::Registered`] is emitted.
    pub async fn register(&self, token: Option<Token>) -> UaResult<()> {
        let _gate = self.inner.registration_gate.lock().await;

        let previous = token.map(|t| std::mem::replace(&mut *self.inner.token.write(), t));
        let current = self.token();
        let request = OutgoingRequest::new(Method::Register, current.identity(), REGISTRAR, CallId::new_v4())
            .with_credential(current.credential())
            .with_expires(self.inner.config.register_expires_secs)
            .with_user_agent(self.inner.config.user_agent.clone());

        debug!(identity = %current.identity(), "sending REGISTER");
        if let Err(e) = self.send_register(request).await {
            if let Some(previous) = previous {
                *self.inner.token.write() = previous;
            }
            warn!(identity = %current.identity(), error = %e, "registration failed");
            return Err(e);
        }

        self.inner.registered.store(true, Ordering::SeqCst);
        info!(identity = %current.identity(), "registered");
        self.inner.emit(UserAgentEvent::Registered);
        Ok(())
    }

    /// Remove the registration
    ///
    /// A no-op when not registered: resolves immediately and emits nothing.
    pub async fn unregister(&self) -> UaResult<()> {
        let _gate = self.inner.registration_gate.lock().await;
        if !self.is_registered() {
            debug!(identity = %self.identity(), "unregister while not registered");
            return Ok(());
        }

        let current = self.token();
        let request = OutgoingRequest::new(Method::Register, current.identity(), REGISTRAR, CallId::new_v4())
            .with_credential(current.credential())
            .with_expires(0)
            .with_user_agent(self.inner.config.user_agent.clone());

        debug!(identity = %current.identity(), "sending REGISTER with expires 0");
        if let Err(e) = self.send_register(request).await {
            warn!(identity = %current.identity(), error = %e, "unregistration failed");
            return Err(e);
        }

        self.inner.registered.store(false, Ordering::SeqCst);
        info!(identity = %current.identity(), "unregistered");
        self.inner.emit(UserAgentEvent::Unregistered);
        Ok(())
    }

    async fn send_register(&self, request: OutgoingRequest) -> UaResult<()> {
        let wait = self.inner.config.request_timeout();
        let response = timeout(wait, self.inner.transport.exchange(request))
            .await
            .map_err(|_| UaError::registration(format!("no response within {:?}", wait)))??;

        if response.status.is_success() {
            Ok(())
        } else {
            Err(UaError::registration(format!("registrar answered {}", response.status)))
        }
    }
}
