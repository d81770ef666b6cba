//! Outbound invite transactions

mod common;

use std::time::Duration;

use common::*;
use rvoip_ua_core::prelude::*;
use rvoip_ua_core::transport::memory::{Fault, MemoryNetwork};
use rvoip_ua_core::transport::{Method, StatusCode};

#[tokio::test]
async fn test_invite_is_pending_until_resolved() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;
    let bob = registered(&network, "bob").await;
    let mut incoming = invites(&bob);

    let invite = alice.invite("bob", InviteOptions::default()).unwrap();
    assert_eq!(invite.state(), ClientState::Trying);
    assert!(alice.has_invite_client_transaction(&invite));
    assert_eq!(alice.invite_client_transactions(), vec![invite.clone()]);

    let ringing = incoming.recv().await.unwrap();
    assert_eq!(ringing.call_id(), invite.call_id());
    assert_eq!(ringing.from(), "alice");

    let dialog = ringing.accept().await.unwrap();
    let caller_dialog = invite.outcome().await.unwrap();

    assert_eq!(invite.state(), ClientState::Accepted);
    assert!(!alice.has_invite_client_transaction(&invite));
    assert!(alice.has_dialog(&caller_dialog));
    assert_eq!(caller_dialog.call_id(), dialog.call_id());
    assert_eq!(caller_dialog.role(), Role::Caller);
    assert!(caller_dialog.is_initiator());
}

#[tokio::test]
async fn test_rejected_invite() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;
    let bob = registered(&network, "bob").await;
    let mut incoming = invites(&bob);

    let invite = alice.invite("bob", InviteOptions::default()).unwrap();
    let ringing = incoming.recv().await.unwrap();
    let _ = ringing.reject().await;

    let err = invite.outcome().await.unwrap_err();
    assert!(err.is_rejected());
    assert_eq!(err.call_id(), Some(invite.call_id()));
    assert!(matches!(err, UaError::Rejected { status: StatusCode::BUSY_HERE, .. }));
    let rejected = err.transaction().unwrap();
    assert_eq!(rejected, &InviteTransaction::Client(invite.clone()));
    assert!(rejected.is_rejected());
    assert!(invite.is_rejected());
    assert!(!invite.is_canceled());
    assert!(alice.invite_client_transactions().is_empty());
    assert!(alice.dialogs().is_empty());
}

#[tokio::test]
async fn test_invite_to_unregistered_identity_is_rejected() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;

    let invite = alice.invite("carol", InviteOptions::default()).unwrap();
    let err = invite.outcome().await.unwrap_err();

    assert!(matches!(err, UaError::Rejected { status: StatusCode::NOT_FOUND, .. }));
    assert!(alice.invite_client_transactions().is_empty());
}

#[tokio::test]
async fn test_invite_self_is_refused() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;

    let err = alice.invite("alice", InviteOptions::default()).unwrap_err();
    assert!(matches!(err, UaError::InvalidTarget { .. }));
    assert!(alice.invite("", InviteOptions::default()).is_err());
    assert_eq!(network.sent_count(Method::Invite), 0);
}

#[tokio::test]
async fn test_cancel_ringing_invite() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;
    let bob = registered(&network, "bob").await;
    let mut incoming = invites(&bob);

    let invite = alice.invite("bob", InviteOptions::default()).unwrap();
    let ringing = incoming.recv().await.unwrap();

    invite.cancel().await.unwrap();

    assert!(invite.is_canceled());
    let err = invite.outcome().await.unwrap_err();
    assert!(err.is_canceled());
    assert!(err.transaction().is_some_and(|t| t.is_canceled()));
    assert!(alice.invite_client_transactions().is_empty());

    assert!(ringing.is_canceled());
    assert!(!bob.has_invite_server_transaction(&ringing));
    assert!(ringing.outcome().await.unwrap_err().is_canceled());
}

#[tokio::test]
async fn test_cancel_right_after_invite_follows_it() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;
    let bob = registered(&network, "bob").await;
    let mut incoming = invites(&bob);

    let invite = alice.invite("bob", InviteOptions::default()).unwrap();
    invite.cancel().await.unwrap();

    assert!(invite.is_canceled());
    let ringing = incoming.recv().await.unwrap();
    assert_eq!(ringing.call_id(), invite.call_id());
    assert!(ringing.is_canceled());
    assert!(bob.invite_server_transactions().is_empty());

    let methods: Vec<Method> = network
        .sent_requests()
        .into_iter()
        .filter(|r| &r.call_id == invite.call_id())
        .map(|r| r.method)
        .collect();
    assert_eq!(methods, vec![Method::Invite, Method::Cancel]);
}

#[tokio::test]
async fn test_cancel_after_resolution_is_terminated() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;

    let invite = alice.invite("carol", InviteOptions::default()).unwrap();
    let _ = invite.outcome().await;

    let err = invite.cancel().await.unwrap_err();
    assert!(err.is_terminated());
    assert!(invite.is_rejected());
    assert_eq!(network.sent_count(Method::Cancel), 0);
}

#[tokio::test]
async fn test_cancel_refused_when_callee_already_answered() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;
    let bob = registered(&network, "bob").await;
    let mut incoming = invites(&bob);

    let invite = alice.invite("bob", InviteOptions::default()).unwrap();
    let ringing = incoming.recv().await.unwrap();
    let callee_dialog = ringing.accept().await.unwrap();

    // Whether the 200 or the refused CANCEL is processed first, cancel fails
    // and the invite still resolves to the dialog.
    let err = invite.cancel().await.unwrap_err();
    assert!(err.is_terminated());

    let dialog = invite.outcome().await.unwrap();
    assert_eq!(dialog.call_id(), callee_dialog.call_id());
    assert!(!invite.is_canceled());
}

#[tokio::test]
async fn test_unreachable_callee_fails_transaction() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;
    network.set_fault("bob", Fault::Unreachable);

    let invite = alice.invite("bob", InviteOptions::default()).unwrap();
    let err = invite.outcome().await.unwrap_err();

    assert!(matches!(err, UaError::TransactionFailed { .. }));
    assert_eq!(invite.state(), ClientState::Failed);
    assert!(alice.invite_client_transactions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invite_timeout_fails_and_cancels() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;
    let bob = registered(&network, "bob").await;
    let mut incoming = invites(&bob);

    let invite = alice
        .invite("bob", InviteOptions::new().with_timeout(Duration::from_secs(5)))
        .unwrap();
    let ringing = incoming.recv().await.unwrap();

    let err = invite.outcome().await.unwrap_err();
    assert!(matches!(err, UaError::TransactionFailed { .. }));
    assert!(alice.invite_client_transactions().is_empty());

    // The abandon CANCEL stops the callee ringing.
    ringing.outcome().await.unwrap_err();
    assert!(ringing.is_canceled());
    assert!(bob.invite_server_transactions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_answer_after_invite_timeout_is_hung_up() {
    let network = MemoryNetwork::new();
    let refuse_cancel = Shape {
        refuse_cancel: true,
        ..Shape::default()
    };
    let alice = shaped_user_agent(&network, "alice", refuse_cancel, UserAgentConfig::default());
    alice.register(None).await.unwrap();
    let bob = registered(&network, "bob").await;
    let mut incoming = invites(&bob);

    let invite = alice
        .invite("bob", InviteOptions::new().with_timeout(Duration::from_secs(1)))
        .unwrap();
    let ringing = incoming.recv().await.unwrap();
    assert!(matches!(invite.outcome().await, Err(UaError::TransactionFailed { .. })));

    // The CANCEL never got through, so bob still rings and answers.
    let callee_dialog = ringing.accept().await.unwrap();

    assert_eq!(callee_dialog.wait_ended().await.unwrap(), EndedBy::Remote);
    assert!(bob.dialogs().is_empty());
    assert!(alice.dialogs().is_empty());
    assert_eq!(network.sent_count(Method::Bye), 1);
}

#[tokio::test]
async fn test_outcome_shared_by_many_waiters() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;
    let bob = registered(&network, "bob").await;
    let mut incoming = invites(&bob);

    let invite = alice.invite("bob", InviteOptions::default()).unwrap();
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let invite = invite.clone();
            tokio::spawn(async move { invite.outcome().await })
        })
        .collect();

    incoming.recv().await.unwrap().accept().await.unwrap();

    let mut dialogs = Vec::new();
    for waiter in waiters {
        dialogs.push(waiter.await.unwrap().unwrap());
    }
    assert!(dialogs.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(invite.try_outcome().unwrap().unwrap(), dialogs[0]);
}

#[tokio::test]
async fn test_transaction_lookup_by_call_id() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;
    let bob = registered(&network, "bob").await;
    let mut incoming = invites(&bob);

    let invite = alice.invite("bob", InviteOptions::default()).unwrap();
    let ringing = incoming.recv().await.unwrap();

    let on_alice = alice.transaction(invite.call_id()).unwrap();
    assert!(on_alice.is_client());
    assert_eq!(on_alice, InviteTransaction::Client(invite.clone()));

    let on_bob = bob.transaction(invite.call_id()).unwrap();
    assert_eq!(on_bob.state(), TransactionState::Server(ServerState::Ringing));

    ringing.accept().await.unwrap();
    let dialog = on_alice.outcome().await.unwrap();
    assert!(alice.transaction(invite.call_id()).is_none());
    assert_eq!(alice.dialog(invite.call_id()), Some(dialog));
}

#[tokio::test]
async fn test_offer_and_answer_bodies_are_carried() {
    let network = MemoryNetwork::new();
    let alice = registered(&network, "alice").await;
    let bob = registered(&network, "bob").await;
    let mut incoming = invites(&bob);

    let invite = alice
        .invite("bob", InviteOptions::new().with_body("v=0 offer"))
        .unwrap();
    let ringing = incoming.recv().await.unwrap();
    assert_eq!(&ringing.offer()[..], b"v=0 offer");

    let callee_dialog = ringing.accept_with("v=0 answer".into()).await.unwrap();
    let caller_dialog = invite.outcome().await.unwrap();

    assert_eq!(&caller_dialog.remote_body()[..], b"v=0 answer");
    assert_eq!(&callee_dialog.remote_body()[..], b"v=0 offer");
}
