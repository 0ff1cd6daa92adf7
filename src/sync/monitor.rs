//! Periodic refresh
//!
//! Polls the remote source at a fixed interval and on demand. Forced
//! refreshes arrive over a channel, e.g. shortly after a confirmed mutation.

use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sync::engine::Mailbox;

/// Why a refresh is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshTrigger {
    /// Time for a poll check
    Poll,
    /// Refresh now, outside the regular schedule
    Forced,
    /// Monitor is stopping
    Shutdown,
}

/// Drives `Mailbox::refresh` on a timer
pub struct RefreshMonitor {
    mailbox: Mailbox,
    interval: Duration,
    running: Arc<AtomicBool>,
    trigger_tx: Sender<RefreshTrigger>,
    trigger_rx: Receiver<RefreshTrigger>,
}

impl RefreshMonitor {
    /// Create a monitor using the mailbox's configured poll interval.
    /// Forced refreshes requested by the mailbox are routed to this monitor.
    pub fn new(mailbox: Mailbox) -> Self {
        let interval = mailbox.config().poll_interval();
        Self::with_interval(mailbox, interval)
    }

    pub fn with_interval(mailbox: Mailbox, interval: Duration) -> Self {
        let (trigger_tx, trigger_rx) = flume::unbounded();
        mailbox.attach_refresh_trigger(trigger_tx.clone());

        Self {
            mailbox,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            trigger_tx,
            trigger_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the trigger sender (for external refresh requests)
    pub fn trigger_sender(&self) -> Sender<RefreshTrigger> {
        self.trigger_tx.clone()
    }

    /// Stop the monitor
    pub fn stop(&self) {
        info!(
            "Stopping refresh monitor for account: {}",
            self.mailbox.account_id()
        );
        self.running.store(false, Ordering::SeqCst);
        let _ = self.trigger_tx.send(RefreshTrigger::Shutdown);
    }

    /// Spawn the monitoring loop on the current tokio runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let monitor = Arc::clone(self);
        tokio::spawn(async move { monitor.run().await })
    }

    /// Run the refresh loop until stopped.
    ///
    /// The first tick fires immediately, so the initial snapshot is fetched
    /// as soon as the loop starts.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "Starting refresh loop for account: {} (interval: {:?})",
            self.mailbox.account_id(),
            self.interval
        );

        let mut refresh_count = 0u64;

        while self.running.load(Ordering::SeqCst) {
            let trigger = tokio::select! {
                _ = ticker.tick() => RefreshTrigger::Poll,
                received = self.trigger_rx.recv_async() => match received {
                    Ok(trigger) => trigger,
                    Err(_) => RefreshTrigger::Shutdown,
                },
            };

            if trigger == RefreshTrigger::Shutdown || !self.running.load(Ordering::SeqCst) {
                break;
            }

            refresh_count += 1;
            debug!(
                "Refresh #{} ({:?}) for account: {}",
                refresh_count,
                trigger,
                self.mailbox.account_id()
            );

            if let Err(e) = self.mailbox.refresh().await {
                warn!(
                    "Scheduled refresh failed for account {}: {}",
                    self.mailbox.account_id(),
                    e
                );
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(
            "Refresh loop stopped for account: {} after {} refreshes",
            self.mailbox.account_id(),
            refresh_count
        );
    }
}
