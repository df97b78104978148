//! Provider-neutral message representation.
//!
//! Every adapter normalizes its backend's wire format into [`Message`] before
//! anything else sees it. Message identity drives deduplication during
//! monitoring, so the fallback id for providers that omit a native id must be
//! stable across repeated fetches of the same underlying message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An attachment on an inbox message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    /// Filename as reported by the provider.
    pub name: String,
    /// Size in bytes, zero when unknown.
    pub size: u64,
    /// Provider-specific locator (download URL), if any.
    pub url: Option<String>,
}

/// One normalized inbox message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Provider-assigned id, or [`Message::fallback_id`] when absent.
    pub id: String,
    /// Sender address as reported by the provider.
    pub sender: String,
    /// Message subject.
    pub subject: String,
    /// Plain text body (or excerpt when the provider only lists excerpts).
    pub text: String,
    /// HTML body, when the provider supplies one.
    pub html: Option<String>,
    /// Delivery timestamp, when the provider supplies one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Attachment metadata.
    pub attachments: Vec<Attachment>,
    /// Opaque provider payload, retained for extraction fallback only.
    pub raw: Option<serde_json::Value>,
}

impl Message {
    /// Creates a message with just the identity and body fields populated.
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            text: text.into(),
            html: None,
            timestamp: None,
            attachments: Vec::new(),
            raw: None,
        }
    }

    /// Deterministic id for messages whose provider omits a native id.
    ///
    /// The hash is computed over `(sender, subject, text)` with a separator
    /// byte between fields, so re-fetching the same underlying message always
    /// produces the same id. Without that stability the monitoring loop would
    /// redeliver the message on every poll.
    pub fn fallback_id(sender: &str, subject: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(sender.as_bytes());
        hasher.update([0x1f]);
        hasher.update(subject.as_bytes());
        hasher.update([0x1f]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
