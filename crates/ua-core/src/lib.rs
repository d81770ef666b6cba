//! # RVOIP User Agent Core
//!
//! Signaling state machines for a SIP-style user agent: registering an identity,
//! placing and answering invites, and tracking the resulting calls until they end.
//!
//! ## Overview
//!
//! - [`UserAgent`] owns registration state and the live sets of pending invites and
//!   established dialogs. It is the entry point for everything else.
//! - [`InviteClientTransaction`] is an outbound invite (`Trying` until it is
//!   accepted, rejected, canceled or fails).
//! - [`InviteServerTransaction`] is an inbound invite (`Ringing` until the
//!   application accepts or rejects it, or the caller cancels).
//! - [`Dialog`] is one side of an established call, ended with [`Dialog::end`] or by
//!   a BYE from the peer.
//!
//! Framing and sending the actual messages is the job of a [`Transport`]. An
//! in-process implementation, [`transport::memory::MemoryNetwork`], connects any
//! number of user agents for tests and demos.
//!
//! ## Example
//!
//! ```rust
//! use rvoip_ua_core::prelude::*;
//! use rvoip_ua_core::transport::memory::MemoryNetwork;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> UaResult<()> {
//! let network = MemoryNetwork::new();
//!
//! let (transport, incoming) = network.endpoint();
//! let alice = UserAgent::new(Token::new("alice", "t1"), transport, incoming, UserAgentConfig::default())?;
//! let (transport, incoming) = network.endpoint();
//! let bob = UserAgent::new(Token::new("bob", "t2"), transport, incoming, UserAgentConfig::default())?;
//!
//! alice.register(None).await?;
//! bob.register(None).await?;
//!
//! // Bob answers every call.
//! bob.on(UserAgentEventKind::Invite, |event| {
//!     if let UserAgentEvent::Invite(invite) = event {
//!         let invite = invite.clone();
//!         tokio::spawn(async move { invite.accept().await });
//!     }
//! });
//!
//! let call = alice.invite("bob", InviteOptions::default())?;
//! let dialog = call.outcome().await?;
//! assert!(alice.has_dialog(&dialog));
//!
//! dialog.end().await?;
//! assert!(alice.dialogs().is_empty());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialog;
pub mod error;
pub mod events;
pub mod logging;
pub mod token;
pub mod transaction;
pub mod transport;
pub mod types;
pub mod user_agent;

pub use config::UserAgentConfig;
pub use dialog::{Dialog, DialogState};
pub use error::{UaError, UaResult};
pub use events::{DialogEvent, DialogEventKind, EndedBy, EventStream, UserAgentEvent, UserAgentEventKind};
pub use token::Token;
pub use transaction::{
    ClientState, InviteClientTransaction, InviteServerTransaction, InviteTransaction, ServerState,
    TransactionState,
};
pub use logging::{setup_logging, LogFormat, LoggingConfig};
pub use transport::{PendingResponse, Transport, TransportError};
pub use types::{CallId, Role};
pub use user_agent::{InviteOptions, UserAgent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything an application usually needs
pub mod prelude {
    pub use crate::config::UserAgentConfig;
    pub use crate::dialog::{Dialog, DialogState};
    pub use crate::error::{UaError, UaResult};
    pub use crate::events::{
        DialogEvent, DialogEventKind, EndedBy, UserAgentEvent, UserAgentEventKind,
    };
    pub use crate::token::Token;
    pub use crate::transaction::{
        ClientState, InviteClientTransaction, InviteServerTransaction, InviteTransaction, ServerState,
        TransactionState,
    };
    pub use crate::transport::{Transport, TransportError};
    pub use crate::types::{CallId, Role};
    pub use crate::user_agent::{InviteOptions, UserAgent};
}
