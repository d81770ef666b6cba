//! Identifier types shared by transactions and dialogs

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Call identifier, stable for the life of a transaction and the dialog it produces
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    /// Generate a fresh random call id
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which side of the call a dialog represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Sent the INVITE
    Caller,
    /// Received the INVITE
    Callee,
}

impl Role {
    pub fn is_initiator(self) -> bool {
        matches!(self, Role::Caller)
    }
}
