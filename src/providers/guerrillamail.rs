//! Guerrilla Mail provider implementation.
//!
//! Guerrilla Mail exposes a single `ajax.php` endpoint where the function
//! name travels as the `f` query parameter and the session as `sid_token`.
//! Sessions expire roughly an hour after creation; restoration renews an
//! expired session in place by re-claiming the address's local part, and
//! falls back to provisioning when even that fails.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::session::{poll_loop, MonitorSignal};
use super::traits::{CreateOptions, MailProvider, ProviderError, Result};
use crate::domain::{Account, Credentials, Message};

const DEFAULT_AJAX_URL: &str = "https://api.guerrillamail.com/ajax.php";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream session lifetime, with a small safety margin subtracted so we
/// renew just before the server would have discarded the session.
const SESSION_LIFETIME_SECS: i64 = 3600 - 5;

/// Poll-driven adapter for the Guerrilla Mail JSON API.
#[derive(Debug)]
pub struct GuerrillaMailProvider {
    http: reqwest::Client,
    ajax_url: String,
    signal: MonitorSignal,
}

impl GuerrillaMailProvider {
    pub fn new() -> Self {
        Self::with_ajax_url(DEFAULT_AJAX_URL)
    }

    /// Creates a provider against a custom endpoint. Used by tests.
    pub fn with_ajax_url(ajax_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            ajax_url: ajax_url.into(),
            signal: MonitorSignal::new(),
        }
    }

    async fn call(&self, params: &[(&str, &str)]) -> Result<Value> {
        let payload = self
            .http
            .get(&self.ajax_url)
            .timeout(REQUEST_TIMEOUT)
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(payload)
    }

    fn session_for(account: &Account) -> Result<(&str, i64)> {
        match &account.credentials {
            Credentials::GuerrillaMail {
                sid_token,
                email_timestamp,
            } => Ok((sid_token, *email_timestamp)),
            _ => Err(ProviderError::Restoration(
                "stored credentials do not belong to guerrillamail".to_string(),
            )),
        }
    }

    fn session_expired(email_timestamp: i64) -> bool {
        Utc::now().timestamp() >= email_timestamp + SESSION_LIFETIME_SECS
    }

    /// Re-claims `local_part` on an existing or fresh session, returning the
    /// new session credentials.
    async fn renew_session(&self, local_part: &str, sid_token: &str) -> Result<Account> {
        let payload = self
            .call(&[
                ("f", "set_email_user"),
                ("email_user", local_part),
                ("lang", "en"),
                ("sid_token", sid_token),
            ])
            .await?;
        Self::account_from_session(&payload)
    }

    fn account_from_session(payload: &Value) -> Result<Account> {
        let address = payload
            .get("email_addr")
            .and_then(Value::as_str)
            .filter(|addr| !addr.is_empty())
            .ok_or_else(|| {
                ProviderError::Provisioning("no email address in response".to_string())
            })?;
        let sid_token = payload
            .get("sid_token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let email_timestamp = payload
            .get("email_timestamp")
            .and_then(value_as_i64)
            .unwrap_or_else(|| Utc::now().timestamp());

        Ok(Account::new(
            "guerrillamail",
            address,
            Credentials::GuerrillaMail {
                sid_token,
                email_timestamp,
            },
        ))
    }

    fn normalize(item: &Value) -> Message {
        let sender = item
            .get("mail_from")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let subject = item
            .get("mail_subject")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("No Subject")
            .to_string();
        let text = item
            .get("mail_excerpt")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // The list endpoint reports ids as numbers, fetch_email as strings.
        let id = item
            .get("mail_id")
            .and_then(value_as_string)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Message::fallback_id(&sender, &subject, &text));

        let timestamp = item
            .get("mail_timestamp")
            .and_then(value_as_i64)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        let mut message = Message::new(id, sender, subject, text);
        message.timestamp = timestamp;
        message.raw = Some(item.clone());
        message
    }
}

impl Default for GuerrillaMailProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Guerrilla Mail is loose about scalar types; numbers and numeric strings
/// appear interchangeably across endpoints.
fn value_as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl MailProvider for GuerrillaMailProvider {
    fn service_name(&self) -> &'static str {
        "guerrillamail"
    }

    fn description(&self) -> &'static str {
        "Guerrilla Mail disposable mailboxes (polling, hourly sessions)"
    }

    async fn create_account(&mut self, options: &CreateOptions) -> Result<Account> {
        let payload = self
            .call(&[
                ("f", "get_email_address"),
                ("lang", "en"),
                ("ip", "127.0.0.1"),
                ("agent", "tmpmail"),
            ])
            .await
            .map_err(|err| ProviderError::Provisioning(err.to_string()))?;
        let mut account = Self::account_from_session(&payload)?;

        // A requested local part needs a second call; the initial address is
        // server-assigned.
        if let Some(name) = &options.name {
            let sid_token = Self::session_for(&account)?.0.to_string();
            account = self
                .renew_session(name, &sid_token)
                .await
                .map_err(|err| ProviderError::Provisioning(err.to_string()))?;
        }

        info!(address = %account.address, "guerrillamail account created");
        Ok(account)
    }

    async fn restore_account(&mut self, account: Account) -> Result<Account> {
        let (sid_token, email_timestamp) = match &account.credentials {
            Credentials::GuerrillaMail {
                sid_token,
                email_timestamp,
            } => (sid_token.clone(), *email_timestamp),
            _ => {
                warn!("stored credentials are not guerrillamail, provisioning a new account");
                return self.create_account(&CreateOptions::default()).await;
            }
        };

        let local_part = account
            .address
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string();

        if !Self::session_expired(email_timestamp) {
            // Session should still be live; confirm with a cheap list call.
            if self
                .call(&[("f", "get_email_list"), ("offset", "0"), ("sid_token", &sid_token)])
                .await
                .is_ok()
            {
                debug!(address = %account.address, "guerrillamail session still valid");
                return Ok(account);
            }
        }

        match self.renew_session(&local_part, &sid_token).await {
            Ok(renewed) if renewed.address == account.address => {
                info!(address = %account.address, "guerrillamail session renewed");
                Ok(renewed)
            }
            Ok(renewed) => {
                warn!(
                    old = %account.address,
                    new = %renewed.address,
                    "guerrillamail handed back a different address"
                );
                Ok(renewed)
            }
            Err(err) => {
                warn!(error = %err, "guerrillamail renewal failed, provisioning a new account");
                self.create_account(&CreateOptions::default()).await
            }
        }
    }

    async fn get_messages(&self, account: &Account) -> Result<Vec<Message>> {
        let (sid_token, _) = Self::session_for(account)?;
        let payload = self
            .call(&[("f", "get_email_list"), ("offset", "0"), ("sid_token", sid_token)])
            .await?;

        let messages = payload
            .get("list")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(Self::normalize).collect::<Vec<_>>())
            .unwrap_or_default();

        debug!(count = messages.len(), "fetched guerrillamail messages");
        Ok(messages)
    }

    async fn get_message_by_id(&self, account: &Account, id: &str) -> Result<Message> {
        let (sid_token, _) = Self::session_for(account)?;
        let payload = self
            .call(&[("f", "fetch_email"), ("email_id", id), ("sid_token", sid_token)])
            .await?;

        // fetch_email answers `false` for unknown ids.
        if !payload.is_object() || payload.get("mail_id").is_none() {
            return Err(ProviderError::NotFound(id.to_string()));
        }

        let mut message = Self::normalize(&payload);
        if let Some(body) = payload.get("mail_body").and_then(Value::as_str) {
            message.html = Some(body.to_string());
        }
        Ok(message)
    }

    async fn validate_account(&self, account: &Account) -> bool {
        match Self::session_for(account) {
            Ok((sid_token, email_timestamp)) => {
                !Self::session_expired(email_timestamp)
                    && self
                        .call(&[
                            ("f", "get_email_list"),
                            ("offset", "0"),
                            ("sid_token", sid_token),
                        ])
                        .await
                        .is_ok()
            }
            Err(_) => false,
        }
    }

    async fn monitor_messages(
        &self,
        account: &Account,
        sink: mpsc::Sender<Message>,
        interval: Duration,
    ) -> Result<()> {
        self.signal.reset();
        info!(interval = ?interval, "starting guerrillamail monitoring");
        let result = poll_loop(|| self.get_messages(account), &sink, interval, &self.signal).await;
        info!("guerrillamail monitoring stopped");
        result
    }

    async fn stop_monitoring(&self) {
        self.signal.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;

    fn live_account() -> Account {
        Account::new(
            "guerrillamail",
            "frog@guerrillamailblock.com",
            Credentials::GuerrillaMail {
                sid_token: "sid-1".to_string(),
                email_timestamp: Utc::now().timestamp(),
            },
        )
    }

    fn expired_account() -> Account {
        Account::new(
            "guerrillamail",
            "frog@guerrillamailblock.com",
            Credentials::GuerrillaMail {
                sid_token: "sid-old".to_string(),
                email_timestamp: Utc::now().timestamp() - 7200,
            },
        )
    }

    #[tokio::test]
    async fn create_account_claims_server_assigned_address() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ajax.php")
                    .query_param("f", "get_email_address");
                then.status(200).json_body(serde_json::json!({
                    "email_addr": "xyzzy@guerrillamailblock.com",
                    "sid_token": "sid-new",
                    "email_timestamp": 1700000000
                }));
            })
            .await;

        let mut provider =
            GuerrillaMailProvider::with_ajax_url(format!("{}/ajax.php", server.base_url()));
        let account = provider
            .create_account(&CreateOptions::default())
            .await
            .unwrap();

        assert_eq!(account.service, "guerrillamail");
        assert_eq!(account.address, "xyzzy@guerrillamailblock.com");
        match account.credentials {
            Credentials::GuerrillaMail { sid_token, .. } => assert_eq!(sid_token, "sid-new"),
            _ => panic!("expected guerrillamail credentials"),
        }
    }

    #[tokio::test]
    async fn create_account_with_name_sets_email_user() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ajax.php")
                    .query_param("f", "get_email_address");
                then.status(200).json_body(serde_json::json!({
                    "email_addr": "random@guerrillamailblock.com",
                    "sid_token": "sid-new",
                    "email_timestamp": 1700000000
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ajax.php")
                    .query_param("f", "set_email_user")
                    .query_param("email_user", "frog");
                then.status(200).json_body(serde_json::json!({
                    "email_addr": "frog@guerrillamailblock.com",
                    "sid_token": "sid-new",
                    "email_timestamp": 1700000001
                }));
            })
            .await;

        let mut provider =
            GuerrillaMailProvider::with_ajax_url(format!("{}/ajax.php", server.base_url()));
        let account = provider
            .create_account(&CreateOptions {
                name: Some("frog".to_string()),
                domain: None,
            })
            .await
            .unwrap();
        assert_eq!(account.address, "frog@guerrillamailblock.com");
    }

    #[tokio::test]
    async fn restore_keeps_live_session() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ajax.php")
                    .query_param("f", "get_email_list")
                    .query_param("sid_token", "sid-1");
                then.status(200).json_body(serde_json::json!({ "list": [] }));
            })
            .await;

        let mut provider =
            GuerrillaMailProvider::with_ajax_url(format!("{}/ajax.php", server.base_url()));
        let restored = provider.restore_account(live_account()).await.unwrap();
        assert_eq!(restored.address, "frog@guerrillamailblock.com");
        match restored.credentials {
            Credentials::GuerrillaMail { sid_token, .. } => assert_eq!(sid_token, "sid-1"),
            _ => panic!("expected guerrillamail credentials"),
        }
    }

    #[tokio::test]
    async fn restore_renews_expired_session_by_local_part() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ajax.php")
                    .query_param("f", "set_email_user")
                    .query_param("email_user", "frog");
                then.status(200).json_body(serde_json::json!({
                    "email_addr": "frog@guerrillamailblock.com",
                    "sid_token": "sid-renewed",
                    "email_timestamp": 1800000000
                }));
            })
            .await;

        let mut provider =
            GuerrillaMailProvider::with_ajax_url(format!("{}/ajax.php", server.base_url()));
        let restored = provider.restore_account(expired_account()).await.unwrap();

        assert_eq!(restored.address, "frog@guerrillamailblock.com");
        match restored.credentials {
            Credentials::GuerrillaMail {
                sid_token,
                email_timestamp,
            } => {
                assert_eq!(sid_token, "sid-renewed");
                assert_eq!(email_timestamp, 1800000000);
            }
            _ => panic!("expected guerrillamail credentials"),
        }
    }

    #[tokio::test]
    async fn restore_falls_back_to_create_when_renewal_fails() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ajax.php")
                    .query_param("f", "set_email_user");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ajax.php")
                    .query_param("f", "get_email_address");
                then.status(200).json_body(serde_json::json!({
                    "email_addr": "fresh@guerrillamailblock.com",
                    "sid_token": "sid-fresh",
                    "email_timestamp": 1800000000
                }));
            })
            .await;

        let mut provider =
            GuerrillaMailProvider::with_ajax_url(format!("{}/ajax.php", server.base_url()));
        let restored = provider.restore_account(expired_account()).await.unwrap();
        assert_eq!(restored.address, "fresh@guerrillamailblock.com");
    }

    #[tokio::test]
    async fn get_messages_normalizes_numeric_ids_and_timestamps() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ajax.php")
                    .query_param("f", "get_email_list");
                then.status(200).json_body(serde_json::json!({
                    "list": [
                        {
                            "mail_id": 42,
                            "mail_from": "noreply@example.com",
                            "mail_subject": "Verify",
                            "mail_excerpt": "Click the link",
                            "mail_timestamp": "1700000000"
                        },
                        {
                            "mail_id": "",
                            "mail_from": "anon@example.com",
                            "mail_subject": "",
                            "mail_excerpt": "hello"
                        }
                    ]
                }));
            })
            .await;

        let provider =
            GuerrillaMailProvider::with_ajax_url(format!("{}/ajax.php", server.base_url()));
        let messages = provider.get_messages(&live_account()).await.unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "42");
        assert_eq!(messages[0].subject, "Verify");
        assert_eq!(
            messages[0].timestamp,
            Utc.timestamp_opt(1700000000, 0).single()
        );
        // Empty id and subject fall back to the hash and placeholder.
        assert_eq!(messages[1].subject, "No Subject");
        assert_eq!(
            messages[1].id,
            Message::fallback_id("anon@example.com", "No Subject", "hello")
        );
    }

    #[tokio::test]
    async fn fetch_email_fills_html_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ajax.php")
                    .query_param("f", "fetch_email")
                    .query_param("email_id", "42");
                then.status(200).json_body(serde_json::json!({
                    "mail_id": "42",
                    "mail_from": "noreply@example.com",
                    "mail_subject": "Verify",
                    "mail_excerpt": "Click",
                    "mail_body": "<a href=\"https://example.com/v\">verify</a>"
                }));
            })
            .await;

        let provider =
            GuerrillaMailProvider::with_ajax_url(format!("{}/ajax.php", server.base_url()));
        let message = provider
            .get_message_by_id(&live_account(), "42")
            .await
            .unwrap();
        assert_eq!(message.id, "42");
        assert!(message.html.unwrap().contains("https://example.com/v"));
    }

    #[tokio::test]
    async fn fetch_email_maps_false_to_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ajax.php")
                    .query_param("f", "fetch_email");
                then.status(200).json_body(serde_json::json!(false));
            })
            .await;

        let provider =
            GuerrillaMailProvider::with_ajax_url(format!("{}/ajax.php", server.base_url()));
        let err = provider
            .get_message_by_id(&live_account(), "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[test]
    fn expiry_honors_safety_margin() {
        let now = Utc::now().timestamp();
        assert!(!GuerrillaMailProvider::session_expired(now));
        assert!(GuerrillaMailProvider::session_expired(now - 3600));
        // Exactly at the margin counts as expired.
        assert!(GuerrillaMailProvider::session_expired(
            now - (3600 - 5)
        ));
    }
}
