//! Inbound request dispatch
//!
//! Requests are routed one at a time in arrival order, which keeps the exchanges of
//! a single call in order. Work that has to wait on one transaction (a CANCEL
//! queued behind an accept, a BYE racing the 200 it follows) runs on its own task,
//! so other calls keep flowing.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::UserAgentInner;
use crate::events::UserAgentEvent;
use crate::transaction::InviteServerTransaction;
use crate::transport::{IncomingRequest, Method, Response, StatusCode};

pub(super) async fn run(user_agent: Weak<UserAgentInner>, mut incoming: mpsc::Receiver<IncomingRequest>) {
    while let Some(request) = incoming.recv().await {
        let Some(ua) = user_agent.upgrade() else {
            break;
        };
        handle(&ua, request).await;
    }
    trace!("dispatcher stopped");
}

pub(super) async fn handle(ua: &Arc<UserAgentInner>, request: IncomingRequest) {
    trace!(method = %request.method, call_id = %request.call_id, from = %request.from, "inbound request");
    match request.method {
        Method::Invite => on_invite(ua, request),
        Method::Cancel => on_cancel(ua, request).await,
        Method::Bye => on_bye(ua, request).await,
        Method::Register => respond(ua, &request, StatusCode::METHOD_NOT_ALLOWED).await,
    }
}

fn on_invite(ua: &Arc<UserAgentInner>, request: IncomingRequest) {
    let call_id = request.call_id.clone();
    if ua.server_transactions.contains_key(&call_id) || ua.dialogs.contains_key(&call_id) {
        debug!(call_id = %call_id, "retransmitted INVITE ignored");
        return;
    }

    let transaction = InviteServerTransaction::new(ua, request);
    ua.server_transactions.insert(call_id.clone(), transaction.clone());
    if let Some(after) = ua.config.ringing_timeout() {
        transaction.start_ringing_timer(ua, after);
    }

    info!(call_id = %call_id, from = %transaction.from(), "incoming invite");
    ua.emit(UserAgentEvent::Invite(transaction));
}

async fn on_cancel(ua: &Arc<UserAgentInner>, request: IncomingRequest) {
    let transaction = ua
        .server_transactions
        .get(&request.call_id)
        .map(|t| t.value().clone());
    match transaction {
        Some(transaction) => {
            let user_agent = Arc::downgrade(ua);
            ua.runtime
                .spawn(async move { transaction.handle_remote_cancel(user_agent, request.key()).await });
        }
        None => {
            debug!(call_id = %request.call_id, "CANCEL for unknown invite");
            respond(ua, &request, StatusCode::CALL_DOES_NOT_EXIST).await;
        }
    }
}

async fn on_bye(ua: &Arc<UserAgentInner>, request: IncomingRequest) {
    // Checked before the dialog set: a resolving invite adds its dialog before it
    // leaves the pending set.
    let pending = ua
        .client_transactions
        .get(&request.call_id)
        .map(|t| t.value().clone());
    let Some(invite) = pending else {
        end_dialog(ua, &request).await;
        return;
    };

    debug!(call_id = %request.call_id, "BYE ahead of the final response, waiting for the invite");
    let user_agent = Arc::downgrade(ua);
    ua.runtime.spawn(async move {
        let _ = invite.outcome().await;
        if let Some(ua) = user_agent.upgrade() {
            end_dialog(&ua, &request).await;
        }
    });
}

async fn end_dialog(ua: &UserAgentInner, request: &IncomingRequest) {
    let dialog = ua.dialogs.get(&request.call_id).map(|d| d.value().clone());
    let status = match dialog {
        Some(dialog) => {
            dialog.handle_remote_end();
            StatusCode::OK
        }
        None => {
            debug!(call_id = %request.call_id, "BYE for unknown dialog");
            StatusCode::CALL_DOES_NOT_EXIST
        }
    };
    respond(ua, request, status).await;
}

async fn respond(ua: &UserAgentInner, request: &IncomingRequest, status: StatusCode) {
    if let Err(e) = ua.transport.send_response(&request.key(), Response::new(status)).await {
        warn!(call_id = %request.call_id, method = %request.method, error = %e, "failed to send response");
    }
}
