//! Identity credential presented at registration

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identity credential
///
/// The user agent never inspects the credential; it is handed to the transport
/// with every REGISTER. The identity is the address other user agents invite.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    identity: String,
    credential: String,
}

impl Token {
    pub fn new(identity: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            credential: credential.into(),
        }
    }

    /// Address of record this token registers
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Raw credential string
    pub fn credential(&self) -> &str {
        &self.credential
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("identity", &self.identity)
            .field("credential", &"<redacted>")
            .finish()
    }
}
