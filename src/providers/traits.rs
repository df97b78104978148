//! Mail provider trait definition.
//!
//! This module defines the [`MailProvider`] trait which abstracts over
//! heterogeneous disposable-mailbox backends (push-based, poll-based, and
//! hybrid APIs). All adapters implement this trait so the registry, the CLI,
//! and the monitoring orchestrator can drive any backend through one
//! lifecycle and one delivery contract.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{Account, Message};

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Account creation failed: upstream unreachable or malformed response.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// Stored credentials could not be revalidated. Adapters convert this to
    /// a fallback provisioning internally; it never crosses the trait
    /// boundary from `restore_account`.
    #[error("restoration failed: {0}")]
    Restoration(String),

    /// Requested message id does not match any current message.
    #[error("message not found: {0}")]
    NotFound(String),

    /// A poll/listen tick failed. Logged and retried, never escalated out of
    /// the monitoring loop.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Registry lookup miss.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// An optional capability was invoked on an adapter without it.
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),

    /// Transport-level error from the HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Options for account creation.
///
/// Both fields are provider-specific hints; adapters ignore what they do not
/// understand and pick random values for what is absent.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Requested local part of the address.
    pub name: Option<String>,
    /// Requested domain (TempMail.Plus only).
    pub domain: Option<String>,
}

/// Trait for disposable-mailbox provider adapters.
///
/// Each adapter owns its provider session exclusively and realizes
/// `monitor_messages` with its backend's natural strategy (polling, push
/// events, or both), but every strategy must satisfy the same delivery
/// contract:
///
/// 1. On the first successful fetch of a session, every message present is
///    marked known *and* delivered once, so a verification email that
///    arrived before monitoring started is still processed.
/// 2. Afterwards only messages with unseen ids are delivered, and an id is
///    recorded before (or atomically with) delivery so a mid-delivery
///    failure cannot cause redelivery.
/// 3. Transient fetch errors are logged and retried after `interval`.
/// 4. Cancellation is cooperative and observed within one `interval`.
#[async_trait]
pub trait MailProvider: std::fmt::Debug + Send + Sync {
    /// Canonical service name, also the credentials tag.
    fn service_name(&self) -> &'static str;

    /// One-line description for discovery output.
    fn description(&self) -> &'static str;

    /// Allocates a new mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Provisioning`] when the upstream API is
    /// unreachable or returns no address.
    async fn create_account(&mut self, options: &CreateOptions) -> Result<Account>;

    /// Revalidates or recreates local provider state from stored credentials.
    ///
    /// Restoration is best-effort: on missing or expired credentials the
    /// adapter renews in place when the backend allows it, and otherwise
    /// falls back to [`create_account`](Self::create_account) rather than
    /// propagating the failure.
    async fn restore_account(&mut self, account: Account) -> Result<Account>;

    /// Returns the full currently-visible mailbox contents, normalized.
    ///
    /// No dedup filtering is applied; ordering follows the provider's API
    /// response and is treated as unordered for correctness purposes.
    async fn get_messages(&self, account: &Account) -> Result<Vec<Message>>;

    /// Fetches a single message by id.
    ///
    /// The default implementation scans [`get_messages`](Self::get_messages);
    /// adapters with a direct fetch endpoint override it.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] when the id matches nothing.
    async fn get_message_by_id(&self, account: &Account, id: &str) -> Result<Message> {
        let messages = self.get_messages(account).await?;
        messages
            .into_iter()
            .find(|message| message.id == id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    /// Best-effort, non-throwing liveness check of the account's session.
    async fn validate_account(&self, account: &Account) -> bool;

    /// Monitors the mailbox, sending each qualifying message exactly once on
    /// `sink`.
    ///
    /// Does not return until cancelled via
    /// [`stop_monitoring`](Self::stop_monitoring), the sink is dropped, or a
    /// fatal unrecoverable error occurs. Session dedup state is reset at the
    /// start of every call.
    async fn monitor_messages(
        &self,
        account: &Account,
        sink: mpsc::Sender<Message>,
        interval: Duration,
    ) -> Result<()>;

    /// Requests cooperative cancellation of the monitoring loop.
    ///
    /// Idempotent. Sets the cancellation flag, cancels any owned background
    /// tasks, and waits (bounded) for their termination before returning.
    async fn stop_monitoring(&self);

    /// Stops monitoring and releases the provider session.
    async fn close(&mut self) {
        self.stop_monitoring().await;
    }

    /// Sends a message from this mailbox. Optional capability.
    async fn send_message(
        &self,
        _account: &Account,
        _to: &str,
        _subject: &str,
        _text: &str,
    ) -> Result<()> {
        Err(ProviderError::Unsupported("sending messages"))
    }

    /// Deletes a message. Optional capability.
    async fn delete_message(&self, _account: &Account, _id: &str) -> Result<()> {
        Err(ProviderError::Unsupported("deleting messages"))
    }
}
