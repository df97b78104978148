//! Monitoring orchestrator.
//!
//! Drives one provider's monitoring session end to end: receives messages
//! over the delivery channel, suppresses duplicates independently of the
//! adapter's own dedup, extracts links, and hands the first acceptable link
//! to the consumer. Bounded by an optional wall-clock timeout and by Ctrl-C.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::links::LinkConsumer;
use crate::domain::{Account, Message};
use crate::extract::LinkExtractor;
use crate::providers::MailProvider;

/// Delivery channel depth between the adapter and the orchestrator.
const CHANNEL_DEPTH: usize = 32;

/// Bounds for one monitoring session.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Poll/re-check cadence handed to the adapter.
    pub interval: Duration,
    /// Wall-clock bound on the whole session; zero means unbounded.
    pub timeout: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(300),
        }
    }
}

/// How a monitoring session ended. All variants are normal returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The adapter's monitor returned on its own (sink closed or fatal).
    Completed,
    /// The wall-clock timeout elapsed.
    TimedOut,
    /// Ctrl-C was received.
    Interrupted,
}

/// Runs one monitoring session over `provider` for `account`.
///
/// Every message is processed at most once even if an adapter misbehaves and
/// redelivers: the orchestrator keeps its own processed-id set. For each new
/// message the extractor runs and the first link (if any) goes to `consumer`;
/// consumer failures are logged and never abort the session.
pub async fn run_monitor(
    provider: &dyn MailProvider,
    account: &Account,
    extractor: &LinkExtractor,
    consumer: &dyn LinkConsumer,
    options: &MonitorOptions,
) -> anyhow::Result<MonitorOutcome> {
    let (tx, mut rx) = mpsc::channel::<Message>(CHANNEL_DEPTH);

    info!(
        address = %account.address,
        service = %account.service,
        timeout = ?options.timeout,
        "monitoring mailbox"
    );

    let monitor = provider.monitor_messages(account, tx, options.interval);
    tokio::pin!(monitor);

    let deadline = async {
        if options.timeout.is_zero() {
            futures::future::pending::<()>().await
        } else {
            tokio::time::sleep(options.timeout).await
        }
    };
    tokio::pin!(deadline);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut processed: HashSet<String> = HashSet::new();
    let mut outcome = MonitorOutcome::Completed;
    let mut stopping = false;
    let mut rx_open = true;

    loop {
        tokio::select! {
            result = &mut monitor => {
                if let Err(err) = result {
                    if stopping {
                        debug!(error = %err, "monitor ended with error during shutdown");
                    } else {
                        warn!(error = %err, "monitoring ended with error");
                    }
                }
                // The adapter dropped its sender; drain what is already
                // queued before returning.
                while let Ok(message) = rx.try_recv() {
                    handle_message(message, &mut processed, extractor, consumer).await;
                }
                break;
            }
            maybe = rx.recv(), if rx_open => {
                match maybe {
                    Some(message) => {
                        handle_message(message, &mut processed, extractor, consumer).await;
                    }
                    None => rx_open = false,
                }
            }
            _ = &mut deadline, if !stopping => {
                info!("monitoring window elapsed");
                outcome = MonitorOutcome::TimedOut;
                stopping = true;
                provider.stop_monitoring().await;
            }
            _ = &mut ctrl_c, if !stopping => {
                info!("interrupt received, stopping monitor");
                outcome = MonitorOutcome::Interrupted;
                stopping = true;
                provider.stop_monitoring().await;
            }
        }
    }

    info!(
        processed = processed.len(),
        outcome = ?outcome,
        "monitoring session finished"
    );
    Ok(outcome)
}

async fn handle_message(
    message: Message,
    processed: &mut HashSet<String>,
    extractor: &LinkExtractor,
    consumer: &dyn LinkConsumer,
) {
    if !processed.insert(message.id.clone()) {
        debug!(id = %message.id, "duplicate message suppressed");
        return;
    }

    info!(
        sender = %message.sender,
        subject = %message.subject,
        "processing message"
    );

    let links = extractor.extract_links(&message);
    match links.first() {
        Some(first) => {
            info!(url = %first, candidates = links.len(), "link found");
            if let Err(err) = consumer.consume(first).await {
                warn!(error = %err, "failed to act on link");
            }
        }
        None => debug!(id = %message.id, "no matching links in message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Credentials;
    use crate::providers::{CreateOptions, MonitorSignal, ProviderError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Provider that delivers a scripted batch once, then idles until
    /// cancelled.
    #[derive(Debug)]
    struct ScriptedProvider {
        messages: Mutex<Vec<Message>>,
        signal: MonitorSignal,
    }

    impl ScriptedProvider {
        fn new(messages: Vec<Message>) -> Self {
            Self {
                messages: Mutex::new(messages),
                signal: MonitorSignal::new(),
            }
        }
    }

    #[async_trait]
    impl MailProvider for ScriptedProvider {
        fn service_name(&self) -> &'static str {
            "scripted"
        }

        fn description(&self) -> &'static str {
            "test provider"
        }

        async fn create_account(&mut self, _: &CreateOptions) -> crate::providers::Result<Account> {
            Err(ProviderError::Unsupported("create"))
        }

        async fn restore_account(&mut self, account: Account) -> crate::providers::Result<Account> {
            Ok(account)
        }

        async fn get_messages(&self, _: &Account) -> crate::providers::Result<Vec<Message>> {
            Ok(self.messages.lock().unwrap().clone())
        }

        async fn validate_account(&self, _: &Account) -> bool {
            true
        }

        async fn monitor_messages(
            &self,
            _: &Account,
            sink: mpsc::Sender<Message>,
            _: Duration,
        ) -> crate::providers::Result<()> {
            self.signal.reset();
            let batch = self.messages.lock().unwrap().clone();
            for message in batch {
                if sink.send(message).await.is_err() {
                    return Ok(());
                }
            }
            self.signal.cancelled().await;
            Ok(())
        }

        async fn stop_monitoring(&self) {
            self.signal.stop();
        }
    }

    /// Consumer recording everything it receives.
    #[derive(Default)]
    struct RecordingConsumer {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LinkConsumer for RecordingConsumer {
        async fn consume(&self, url: &str) -> anyhow::Result<()> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    /// Consumer that always fails.
    struct FailingConsumer;

    #[async_trait]
    impl LinkConsumer for FailingConsumer {
        async fn consume(&self, _: &str) -> anyhow::Result<()> {
            anyhow::bail!("no clipboard here")
        }
    }

    fn account() -> Account {
        Account::new(
            "scripted",
            "frog@example.com",
            Credentials::TempMailPlus {
                name: "frog".to_string(),
                domain: "example.com".to_string(),
                epin: None,
            },
        )
    }

    fn message_with_link(id: &str, url: &str) -> Message {
        Message::new(id, "noreply@example.com", "Verify", format!("go to {url}"))
    }

    #[tokio::test(start_paused = true)]
    async fn first_link_of_each_new_message_reaches_the_consumer() {
        let provider = ScriptedProvider::new(vec![
            message_with_link("1", "https://one.example/a"),
            message_with_link("2", "https://two.example/b"),
        ]);
        let extractor = LinkExtractor::new(Some(r"https://\S+")).unwrap();
        let consumer = RecordingConsumer::default();
        let options = MonitorOptions {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        };

        let outcome = run_monitor(&provider, &account(), &extractor, &consumer, &options)
            .await
            .unwrap();

        assert_eq!(outcome, MonitorOutcome::TimedOut);
        assert_eq!(
            *consumer.urls.lock().unwrap(),
            vec!["https://one.example/a", "https://two.example/b"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_deliveries_are_processed_once() {
        let provider = ScriptedProvider::new(vec![
            message_with_link("same", "https://one.example/a"),
            message_with_link("same", "https://one.example/a"),
        ]);
        let extractor = LinkExtractor::new(Some(r"https://\S+")).unwrap();
        let consumer = RecordingConsumer::default();
        let options = MonitorOptions {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
        };

        run_monitor(&provider, &account(), &extractor, &consumer, &options)
            .await
            .unwrap();

        assert_eq!(consumer.urls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_failure_does_not_abort_the_session() {
        let provider = ScriptedProvider::new(vec![
            message_with_link("1", "https://one.example/a"),
            message_with_link("2", "https://two.example/b"),
        ]);
        let extractor = LinkExtractor::new(Some(r"https://\S+")).unwrap();
        let options = MonitorOptions {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
        };

        let outcome = run_monitor(&provider, &account(), &extractor, &FailingConsumer, &options)
            .await
            .unwrap();
        assert_eq!(outcome, MonitorOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_even_with_no_messages() {
        let provider = ScriptedProvider::new(Vec::new());
        let extractor = LinkExtractor::new(None).unwrap();
        let consumer = RecordingConsumer::default();
        let options = MonitorOptions {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        };

        let started = tokio::time::Instant::now();
        let outcome = run_monitor(&provider, &account(), &extractor, &consumer, &options)
            .await
            .unwrap();

        assert_eq!(outcome, MonitorOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(consumer.urls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn messages_without_links_are_skipped() {
        let provider = ScriptedProvider::new(vec![Message::new(
            "plain",
            "noreply@example.com",
            "Hello",
            "no links in here",
        )]);
        let extractor = LinkExtractor::new(Some(r"https://\S+")).unwrap();
        let consumer = RecordingConsumer::default();
        let options = MonitorOptions {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
        };

        run_monitor(&provider, &account(), &extractor, &consumer, &options)
            .await
            .unwrap();
        assert!(consumer.urls.lock().unwrap().is_empty());
    }
}
