//! mail.tm provider implementation.
//!
//! mail.tm is a REST API with real accounts: provisioning registers an
//! address under one of the service's domains and mints a JWT bearer token.
//! The API has no push surface, so monitoring is the shared poll loop.
//!
//! Restoration probes the stored token against `/me`; an expired token is
//! re-minted from the stored password, and anything worse falls back to
//! provisioning a fresh account.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::session::{poll_loop, MonitorSignal};
use super::traits::{CreateOptions, MailProvider, ProviderError, Result};
use super::random_token;
use crate::domain::{Account, Attachment, Credentials, Message};

const DEFAULT_BASE_URL: &str = "https://api.mail.tm";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll-driven adapter for the mail.tm API.
#[derive(Debug)]
pub struct MailTmProvider {
    http: reqwest::Client,
    base_url: String,
    signal: MonitorSignal,
}

impl MailTmProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a provider against a custom API endpoint. Used by tests.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            signal: MonitorSignal::new(),
        }
    }

    /// Picks the first domain the service currently offers.
    async fn first_domain(&self) -> Result<String> {
        let payload: Value = self
            .http
            .get(format!("{}/domains", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| ProviderError::Provisioning(err.to_string()))?
            .error_for_status()
            .map_err(|err| ProviderError::Provisioning(err.to_string()))?
            .json()
            .await
            .map_err(|err| ProviderError::Provisioning(err.to_string()))?;

        payload
            .get("hydra:member")
            .and_then(Value::as_array)
            .and_then(|members| members.first())
            .and_then(|member| member.get("domain"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Provisioning("no domains available".to_string()))
    }

    /// Mints a bearer token for an existing account.
    async fn mint_token(&self, address: &str, password: &str) -> Result<String> {
        let payload: Value = self
            .http
            .post(format!("{}/token", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({ "address": address, "password": password }))
            .send()
            .await?
            .error_for_status()
            .map_err(|err| ProviderError::Restoration(err.to_string()))?
            .json()
            .await?;

        payload
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Restoration("token missing from response".to_string()))
    }

    /// Probes token validity against `/me`.
    async fn me(&self, token: &str) -> Result<Value> {
        let payload: Value = self
            .http
            .get(format!("{}/me", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()
            .map_err(|err| ProviderError::Restoration(err.to_string()))?
            .json()
            .await?;
        Ok(payload)
    }

    fn token_for<'a>(&self, account: &'a Account) -> Result<&'a str> {
        match &account.credentials {
            Credentials::MailTm { token, .. } => Ok(token),
            _ => Err(ProviderError::Restoration(
                "stored credentials do not belong to mailtm".to_string(),
            )),
        }
    }

    fn normalize(parsed: MailTmMessage, raw: Value) -> Message {
        let sender = parsed
            .from
            .map(|from| from.address)
            .unwrap_or_default();
        let subject = parsed.subject.unwrap_or_else(|| "No Subject".to_string());
        let text = parsed.text.or(parsed.intro).unwrap_or_default();
        let html = parsed
            .html
            .filter(|parts| !parts.is_empty())
            .map(|parts| parts.concat());

        let id = if parsed.id.is_empty() {
            Message::fallback_id(&sender, &subject, &text)
        } else {
            parsed.id
        };

        Message {
            id,
            sender,
            subject,
            text,
            html,
            timestamp: parsed.created_at,
            attachments: parsed
                .attachments
                .into_iter()
                .map(|att| Attachment {
                    name: att.filename,
                    size: att.size,
                    url: att.download_url,
                })
                .collect(),
            raw: Some(raw),
        }
    }
}

impl Default for MailTmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct MailTmMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    from: Option<MailTmAddress>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    intro: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    html: Option<Vec<String>>,
    #[serde(rename = "createdAt", default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    attachments: Vec<MailTmAttachment>,
}

#[derive(Debug, Deserialize)]
struct MailTmAddress {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct MailTmAttachment {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "downloadUrl", default)]
    download_url: Option<String>,
}

#[async_trait]
impl MailProvider for MailTmProvider {
    fn service_name(&self) -> &'static str {
        "mailtm"
    }

    fn description(&self) -> &'static str {
        "mail.tm disposable mailboxes (polling)"
    }

    async fn create_account(&mut self, options: &CreateOptions) -> Result<Account> {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| random_token(10));
        let domain = self.first_domain().await?;
        let address = format!("{name}@{domain}");
        let password = random_token(16);

        debug!(%address, "registering mail.tm account");
        self.http
            .post(format!("{}/accounts", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({ "address": address, "password": password }))
            .send()
            .await
            .map_err(|err| ProviderError::Provisioning(err.to_string()))?
            .error_for_status()
            .map_err(|err| ProviderError::Provisioning(err.to_string()))?;

        let token = self
            .mint_token(&address, &password)
            .await
            .map_err(|err| ProviderError::Provisioning(err.to_string()))?;

        info!(%address, "mail.tm account created");
        Ok(Account::new(
            self.service_name(),
            address,
            Credentials::MailTm { token, password },
        ))
    }

    async fn restore_account(&mut self, account: Account) -> Result<Account> {
        let (token, password) = match &account.credentials {
            Credentials::MailTm { token, password } => (token.clone(), password.clone()),
            _ => {
                warn!("stored credentials are not mailtm, provisioning a new account");
                return self.create_account(&CreateOptions::default()).await;
            }
        };

        if self.me(&token).await.is_ok() {
            debug!(address = %account.address, "mail.tm token still valid");
            return Ok(account);
        }

        match self.mint_token(&account.address, &password).await {
            Ok(token) => {
                info!(address = %account.address, "mail.tm token renewed");
                Ok(Account {
                    credentials: Credentials::MailTm { token, password },
                    last_used: Utc::now(),
                    ..account
                })
            }
            Err(err) => {
                warn!(error = %err, "mail.tm restoration failed, provisioning a new account");
                self.create_account(&CreateOptions::default()).await
            }
        }
    }

    async fn get_messages(&self, account: &Account) -> Result<Vec<Message>> {
        let token = self.token_for(account)?;

        let payload: Value = self
            .http
            .get(format!("{}/messages", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .query(&[("page", "1")])
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let members = payload
            .get("hydra:member")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut messages = Vec::with_capacity(members.len());
        for item in members {
            match serde_json::from_value::<MailTmMessage>(item.clone()) {
                Ok(parsed) => messages.push(Self::normalize(parsed, item)),
                Err(err) => debug!(error = %err, "skipping malformed mail.tm message"),
            }
        }

        debug!(count = messages.len(), "fetched mail.tm messages");
        Ok(messages)
    }

    async fn get_message_by_id(&self, account: &Account, id: &str) -> Result<Message> {
        let token = self.token_for(account)?;

        let response = self
            .http
            .get(format!("{}/messages/{id}", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(id.to_string()));
        }

        let item: Value = response.error_for_status()?.json().await?;
        let parsed: MailTmMessage = serde_json::from_value(item.clone())
            .map_err(|_| ProviderError::NotFound(id.to_string()))?;
        Ok(Self::normalize(parsed, item))
    }

    async fn validate_account(&self, account: &Account) -> bool {
        match self.token_for(account) {
            Ok(token) => self.me(token).await.is_ok(),
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
        info!(interval = ?interval, "starting mail.tm monitoring");
        let result = poll_loop(|| self.get_messages(account), &sink, interval, &self.signal).await;
        info!("mail.tm monitoring stopped");
        result
    }

    async fn stop_monitoring(&self) {
        self.signal.stop();
    }
}
