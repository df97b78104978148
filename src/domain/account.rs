//! Account domain types.
//!
//! An [`Account`] identifies one provisioned mailbox. Credentials are a
//! tagged enum keyed by the service name: each adapter pattern-matches its
//! own variant, while storage and the orchestrator treat the whole thing as
//! opaque JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A provisioned disposable mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Provider identifier (matches the adapter's canonical service name).
    pub service: String,
    /// Mailbox address.
    pub address: String,
    /// Provider-specific credentials. Opaque outside the owning adapter.
    pub credentials: Credentials,
    /// When the account was provisioned. Advisory only.
    pub created_at: DateTime<Utc>,
    /// When the account was last used. Advisory only.
    pub last_used: DateTime<Utc>,
}

impl Account {
    /// Creates an account stamped with the current time.
    pub fn new(
        service: impl Into<String>,
        address: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        let now = Utc::now();
        Self {
            service: service.into(),
            address: address.into(),
            credentials,
            created_at: now,
            last_used: now,
        }
    }
}

/// Provider-specific credentials, tagged by service.
///
/// Serialized into the `data` field of a stored account record. The tag uses
/// the provider's canonical service name so an adapter can reject records
/// that belong to a different backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "service")]
pub enum Credentials {
    /// mail.tm bearer token plus the password used to mint it.
    #[serde(rename = "mailtm")]
    MailTm {
        /// JWT bearer token for the API.
        token: String,
        /// Account password, kept so an expired token can be re-minted.
        password: String,
    },
    /// Guerrilla Mail session. Sessions expire roughly an hour after
    /// `email_timestamp` and can be renewed by re-setting the address.
    #[serde(rename = "guerrillamail")]
    GuerrillaMail {
        /// Session token returned by the ajax API.
        sid_token: String,
        /// Unix timestamp the session was issued at.
        email_timestamp: i64,
    },
    /// TempMail.Plus mailboxes are purely structural: the address is the
    /// credential, so restoration recreates it from its parts.
    #[serde(rename = "tempmail.plus")]
    TempMailPlus {
        /// Local part of the address.
        name: String,
        /// Domain the mailbox lives under.
        domain: String,
        /// Optional inbox PIN.
        epin: Option<String>,
    },
}
