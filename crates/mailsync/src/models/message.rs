//! Message model representing a cached mailbox item

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Header fields retrieved by a detail fetch
///
/// Each field is empty when the remote message does not carry the header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemHeaders {
    pub to: String,
    pub from: String,
    pub subject: String,
}

impl ItemHeaders {
    pub fn new(
        to: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            subject: subject.into(),
        }
    }
}

/// One message known to the local cache
///
/// Created only from a successful detail fetch and never mutated afterwards.
/// Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedItem {
    pub id: MessageId,
    pub to: String,
    pub from: String,
    pub subject: String,
}

impl CachedItem {
    pub fn new(id: MessageId, headers: ItemHeaders) -> Self {
        Self {
            id,
            to: headers.to,
            from: headers.from,
            subject: headers.subject,
        }
    }

    /// Subject for display, with a placeholder when empty
    pub fn display_subject(&self) -> &str {
        if self.subject.is_empty() {
            "(no subject)"
        } else {
            &self.subject
        }
    }
}
