//! Shared monitoring-session machinery.
//!
//! Every adapter strategy (poll, push, hybrid) is built from the same two
//! pieces: a [`MonitorSignal`] for cooperative cancellation, and the
//! [`poll_loop`] that implements the delivery contract for poll-driven
//! backends. The hybrid adapter reuses the signal and adds its own listener
//! task on top.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::traits::Result;
use crate::domain::Message;

/// How long to wait for a cancelled background task to wind down.
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Cooperative cancellation signal shared between a monitoring loop and
/// `stop_monitoring`.
///
/// Backed by a watch channel so sleeping loops wake immediately instead of
/// noticing the flag one interval later.
#[derive(Debug, Clone)]
pub struct MonitorSignal {
    tx: watch::Sender<bool>,
}

impl MonitorSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Clears the flag at the start of a monitoring session.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    /// Requests cancellation and wakes any sleeper.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleeps for `duration`, returning `true` when interrupted by
    /// cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.cancelled() => true,
        }
    }
}

impl Default for MonitorSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Aborts a background task and waits briefly for it to wind down.
pub(crate) async fn shutdown_task(handle: JoinHandle<()>) {
    handle.abort();
    if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
        warn!("background task did not terminate within grace period");
    }
}

/// Poll-driven monitoring loop implementing the shared delivery contract.
///
/// Each tick fetches the full mailbox via `fetch` and delivers every message
/// whose id has not been seen this session. On the first successful fetch
/// that means all pre-existing messages are delivered once and marked known.
/// Ids are inserted into the known set before delivery, so a failure mid
/// callback cannot cause redelivery on the next tick. Transient fetch errors
/// are logged and retried after `interval`; cancellation is observed within
/// one `interval`. Returns when cancelled or when the receiving side of
/// `sink` is dropped.
pub async fn poll_loop<F, Fut>(
    mut fetch: F,
    sink: &mpsc::Sender<Message>,
    interval: Duration,
    signal: &MonitorSignal,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<Message>>>,
{
    let mut known_ids: HashSet<String> = HashSet::new();
    let mut first_fetch_done = false;
    let mut tick: u64 = 0;

    while !signal.is_stopped() {
        tick += 1;
        debug!(tick, "poll tick");

        match fetch().await {
            Ok(messages) => {
                if !first_fetch_done && !messages.is_empty() {
                    info!(
                        count = messages.len(),
                        "first poll, delivering pre-existing messages"
                    );
                }
                for message in messages {
                    if known_ids.insert(message.id.clone()) {
                        if first_fetch_done {
                            info!(id = %message.id, sender = %message.sender, "new message");
                        }
                        if sink.send(message).await.is_err() {
                            debug!("message sink closed, ending poll loop");
                            return Ok(());
                        }
                    }
                }
                first_fetch_done = true;
            }
            Err(err) => {
                warn!(error = %err, "poll failed, retrying after interval");
            }
        }

        if signal.sleep(interval).await {
            break;
        }
    }

    debug!("poll loop cancelled");
    Ok(())
}
