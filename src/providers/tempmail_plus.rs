//! TempMail.Plus provider implementation.
//!
//! TempMail.Plus mailboxes are structural: any `name@domain` pair over the
//! service's public domains is a valid inbox with no server-side signup, so
//! provisioning and restoration just (re)build the address locally and probe
//! the inbox once. Monitoring is hybrid: a background listener task follows
//! the inbox watermark at a short cadence while the outer loop re-checks the
//! full inbox every `interval` and restarts the listener if it died.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::session::{shutdown_task, MonitorSignal};
use super::traits::{CreateOptions, MailProvider, ProviderError, Result};
use super::random_token;
use crate::domain::{Account, Attachment, Credentials, Message};

const DEFAULT_BASE_URL: &str = "https://tempmail.plus";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Cadence of the background listener, deliberately shorter than the outer
/// monitoring interval so pushes feel immediate.
const LISTEN_INTERVAL: Duration = Duration::from_secs(2);

/// Domains the service accepts for structural mailboxes.
pub const DOMAINS: &[&str] = &[
    "mailto.plus",
    "fexpost.com",
    "fexbox.org",
    "mailbox.in.ua",
    "chitthi.in",
    "fextemp.com",
    "any.pink",
    "merepost.com",
];

/// Hybrid adapter for the TempMail.Plus API.
#[derive(Debug)]
pub struct TempMailPlusProvider {
    http: reqwest::Client,
    base_url: String,
    signal: MonitorSignal,
    listener: AsyncMutex<Option<JoinHandle<()>>>,
}

impl TempMailPlusProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a provider against a custom endpoint. Used by tests.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            signal: MonitorSignal::new(),
            listener: AsyncMutex::new(None),
        }
    }

    fn pin_for(account: &Account) -> Result<&str> {
        match &account.credentials {
            Credentials::TempMailPlus { epin, .. } => Ok(epin.as_deref().unwrap_or("")),
            _ => Err(ProviderError::Restoration(
                "stored credentials do not belong to tempmail.plus".to_string(),
            )),
        }
    }

    async fn fetch_inbox(
        http: &reqwest::Client,
        base_url: &str,
        address: &str,
        epin: &str,
    ) -> Result<Value> {
        let payload = http
            .get(format!("{base_url}/api/mails"))
            .timeout(REQUEST_TIMEOUT)
            .query(&[("email", address), ("limit", "20"), ("epin", epin)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(payload)
    }

    async fn fetch_detail(
        http: &reqwest::Client,
        base_url: &str,
        address: &str,
        epin: &str,
        mail_id: &str,
    ) -> Result<Value> {
        let response = http
            .get(format!("{base_url}/api/mails/{mail_id}"))
            .timeout(REQUEST_TIMEOUT)
            .query(&[("email", address), ("epin", epin)])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(mail_id.to_string()));
        }
        Ok(response.error_for_status()?.json().await?)
    }

    fn normalize_entry(item: &Value) -> Message {
        let sender = item
            .get("from_mail")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let subject = item
            .get("subject")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("No Subject")
            .to_string();
        let text = item
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let id = match item.get("mail_id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => Message::fallback_id(&sender, &subject, &text),
        };

        let timestamp = item
            .get("time")
            .and_then(Value::as_str)
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
            .and_then(|naive| Utc.from_local_datetime(&naive).single());

        let mut message = Message::new(id, sender, subject, text);
        message.html = item
            .get("html")
            .and_then(Value::as_str)
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        message.timestamp = timestamp;
        message.attachments = item
            .get("attachments")
            .and_then(Value::as_array)
            .map(|atts| {
                atts.iter()
                    .map(|att| Attachment {
                        name: att
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        size: att.get("size").and_then(Value::as_u64).unwrap_or(0),
                        url: None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        message.raw = Some(item.clone());
        message
    }

    fn inbox_messages(payload: &Value) -> Vec<Message> {
        payload
            .get("result")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(Self::normalize_entry).collect())
            .unwrap_or_default()
    }

    fn numeric_id(message: &Message) -> i64 {
        message.id.parse().unwrap_or(0)
    }

    /// Background watermark follower. Polls the inbox at [`LISTEN_INTERVAL`],
    /// fetches the detail of every message above the watermark, and pushes it
    /// to the internal channel. Exits on cancellation or when the channel
    /// closes.
    fn spawn_listener(
        &self,
        address: String,
        epin: String,
        mut watermark: i64,
        tx: mpsc::Sender<Message>,
    ) -> JoinHandle<()> {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let signal = self.signal.clone();

        tokio::spawn(async move {
            loop {
                if signal.sleep(LISTEN_INTERVAL).await {
                    break;
                }

                let payload =
                    match Self::fetch_inbox(&http, &base_url, &address, &epin).await {
                        Ok(payload) => payload,
                        Err(err) => {
                            debug!(error = %err, "inbox listener poll failed");
                            continue;
                        }
                    };

                let mut fresh: Vec<Message> = Self::inbox_messages(&payload)
                    .into_iter()
                    .filter(|message| Self::numeric_id(message) > watermark)
                    .collect();
                fresh.sort_by_key(Self::numeric_id);

                for shallow in fresh {
                    watermark = watermark.max(Self::numeric_id(&shallow));
                    // Prefer the full body; the shallow entry is good enough
                    // when the detail fetch hiccups.
                    let message = match Self::fetch_detail(
                        &http, &base_url, &address, &epin, &shallow.id,
                    )
                    .await
                    {
                        Ok(detail) => {
                            let mut full = Self::normalize_entry(&detail);
                            full.id = shallow.id.clone();
                            if full.sender.is_empty() {
                                full.sender = shallow.sender.clone();
                            }
                            full
                        }
                        Err(err) => {
                            debug!(error = %err, id = %shallow.id, "detail fetch failed");
                            shallow
                        }
                    };
                    if tx.send(message).await.is_err() {
                        debug!("listener channel closed");
                        return;
                    }
                }
            }
            debug!("inbox listener cancelled");
        })
    }

    async fn replace_listener(&self, handle: JoinHandle<()>) {
        let old = self.listener.lock().await.replace(handle);
        if let Some(old) = old {
            shutdown_task(old).await;
        }
    }

    async fn take_listener(&self) -> Option<JoinHandle<()>> {
        self.listener.lock().await.take()
    }
}

impl Default for TempMailPlusProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailProvider for TempMailPlusProvider {
    fn service_name(&self) -> &'static str {
        "tempmail.plus"
    }

    fn description(&self) -> &'static str {
        "TempMail.Plus structural mailboxes (hybrid push/poll)"
    }

    async fn create_account(&mut self, options: &CreateOptions) -> Result<Account> {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| random_token(10).to_lowercase());
        let domain = match &options.domain {
            Some(domain) if DOMAINS.contains(&domain.as_str()) => domain.clone(),
            Some(domain) => {
                return Err(ProviderError::Provisioning(format!(
                    "unsupported domain: {domain}"
                )))
            }
            None => DOMAINS[0].to_string(),
        };
        let address = format!("{name}@{domain}");

        // Structural mailbox: one probe confirms the service accepts it.
        Self::fetch_inbox(&self.http, &self.base_url, &address, "")
            .await
            .map_err(|err| ProviderError::Provisioning(err.to_string()))?;

        info!(%address, "tempmail.plus mailbox ready");
        Ok(Account::new(
            self.service_name(),
            address,
            Credentials::TempMailPlus {
                name,
                domain,
                epin: None,
            },
        ))
    }

    async fn restore_account(&mut self, account: Account) -> Result<Account> {
        if Self::pin_for(&account).is_err() {
            warn!("stored credentials are not tempmail.plus, provisioning a new mailbox");
            return self.create_account(&CreateOptions::default()).await;
        }

        // Nothing server-side to renew; a failed probe is transient and the
        // mailbox stays usable.
        if !self.validate_account(&account).await {
            warn!(address = %account.address, "tempmail.plus probe failed, keeping mailbox anyway");
        }
        Ok(Account {
            last_used: Utc::now(),
            ..account
        })
    }

    async fn get_messages(&self, account: &Account) -> Result<Vec<Message>> {
        let epin = Self::pin_for(account)?;
        let payload =
            Self::fetch_inbox(&self.http, &self.base_url, &account.address, epin).await?;
        let messages = Self::inbox_messages(&payload);
        debug!(count = messages.len(), "fetched tempmail.plus messages");
        Ok(messages)
    }

    async fn get_message_by_id(&self, account: &Account, id: &str) -> Result<Message> {
        let epin = Self::pin_for(account)?;
        let detail =
            Self::fetch_detail(&self.http, &self.base_url, &account.address, epin, id).await?;
        if !detail.is_object() {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        let mut message = Self::normalize_entry(&detail);
        message.id = id.to_string();
        Ok(message)
    }

    async fn validate_account(&self, account: &Account) -> bool {
        match Self::pin_for(account) {
            Ok(epin) => {
                Self::fetch_inbox(&self.http, &self.base_url, &account.address, epin)
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
        let epin = Self::pin_for(account)?.to_string();
        info!(interval = ?interval, "starting tempmail.plus monitoring");

        let mut known: HashSet<String> = HashSet::new();
        let mut watermark: i64 = 0;

        // Initial flush: everything already in the inbox is delivered once
        // and marked known.
        match self.get_messages(account).await {
            Ok(existing) => {
                if !existing.is_empty() {
                    info!(count = existing.len(), "delivering pre-existing messages");
                }
                for message in existing {
                    watermark = watermark.max(Self::numeric_id(&message));
                    if known.insert(message.id.clone()) && sink.send(message).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Err(err) => warn!(error = %err, "initial inbox flush failed"),
        }

        let (raw_tx, mut raw_rx) = mpsc::channel::<Message>(32);
        let handle = self.spawn_listener(
            account.address.clone(),
            epin.clone(),
            watermark,
            raw_tx.clone(),
        );
        self.replace_listener(handle).await;

        loop {
            tokio::select! {
                _ = self.signal.cancelled() => break,
                maybe = raw_rx.recv() => {
                    let Some(message) = maybe else { break };
                    if known.insert(message.id.clone()) {
                        info!(id = %message.id, sender = %message.sender, "new message");
                        if sink.send(message).await.is_err() {
                            debug!("message sink closed, ending monitor");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    // Periodic full re-check covers anything the listener
                    // missed, and revives a dead listener.
                    match self.get_messages(account).await {
                        Ok(messages) => {
                            for message in messages {
                                watermark = watermark.max(Self::numeric_id(&message));
                                if known.insert(message.id.clone()) {
                                    info!(id = %message.id, sender = %message.sender, "new message");
                                    if sink.send(message).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        Err(err) => warn!(error = %err, "periodic re-check failed"),
                    }

                    let dead = self
                        .listener
                        .lock()
                        .await
                        .as_ref()
                        .map(JoinHandle::is_finished)
                        .unwrap_or(true);
                    if dead && !self.signal.is_stopped() {
                        debug!("restarting inbox listener");
                        let handle = self.spawn_listener(
                            account.address.clone(),
                            epin.clone(),
                            watermark,
                            raw_tx.clone(),
                        );
                        self.replace_listener(handle).await;
                    }
                }
            }
        }

        if let Some(handle) = self.take_listener().await {
            shutdown_task(handle).await;
        }
        info!("tempmail.plus monitoring stopped");
        Ok(())
    }

    async fn stop_monitoring(&self) {
        self.signal.stop();
        if let Some(handle) = self.take_listener().await {
            shutdown_task(handle).await;
        }
    }

    async fn delete_message(&self, account: &Account, id: &str) -> Result<()> {
        let epin = Self::pin_for(account)?;
        let payload: Value = self
            .http
            .delete(format!("{}/api/mails/{id}", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .query(&[("email", account.address.as_str()), ("epin", epin)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if payload.get("result").and_then(Value::as_bool) == Some(true) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(id.to_string()))
        }
    }
}
