use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::{runtime::Handle, sync::watch, time::sleep};

use crate::{
    domain::status::FeedHealth,
    infra::config::FeedConfig,
    store::contracts::StoreError,
    usecases::unread_tracker::{TrackerError, UnreadTracker},
};

const LIVE_UPDATES_STARTED: &str = "UNREAD_LIVE_UPDATES_STARTED";
const LIVE_UPDATES_STOPPED: &str = "UNREAD_LIVE_UPDATES_STOPPED";
const LIVE_UPDATES_SUBSCRIBED: &str = "UNREAD_LIVE_UPDATES_SUBSCRIBED";
const LIVE_UPDATES_SUBSCRIBE_FAILED: &str = "UNREAD_LIVE_UPDATES_SUBSCRIBE_FAILED";
const LIVE_UPDATES_DISCONNECTED: &str = "UNREAD_LIVE_UPDATES_DISCONNECTED";
const LIVE_UPDATES_RESYNC_FAILED: &str = "UNREAD_LIVE_UPDATES_RESYNC_FAILED";

/// Floor for every reconnect delay so a misconfigured policy cannot spin.
const MIN_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF_EXPONENT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&FeedConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &FeedConfig) -> Self {
        let base = Duration::from_millis(config.backoff_base_ms).max(MIN_BACKOFF);
        Self {
            base,
            max: Duration::from_millis(config.backoff_max_ms).max(base),
            jitter: Duration::from_millis(config.backoff_jitter_ms),
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based): doubling from `base`, capped at `max`, plus jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let exponential = self.base.saturating_mul(2_u32.saturating_pow(exponent));
        let capped = exponential.min(self.max).max(MIN_BACKOFF);

        capped.saturating_add(rand_jitter(self.jitter))
    }
}

fn rand_jitter(max: Duration) -> Duration {
    let max_nanos = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
    if max_nanos == 0 {
        return Duration::ZERO;
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);

    Duration::from_nanos(nanos % max_nanos)
}

/// Handle to a tracker's standing insert-feed subscription.
///
/// Dropping the handle disposes it. `dispose` may be called any number of times.
#[derive(Debug)]
pub struct LiveSubscription {
    stop_tx: Option<watch::Sender<bool>>,
}

impl LiveSubscription {
    pub(crate) fn start(runtime: &Handle, tracker: UnreadTracker) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        runtime.spawn(run_feed(tracker, stop_rx));

        tracing::info!(code = LIVE_UPDATES_STARTED, "live unread updates started");

        Self {
            stop_tx: Some(stop_tx),
        }
    }

    pub fn dispose(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
            tracing::debug!("live unread updates stop signal sent");
        }
    }

    pub fn is_active(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

enum StreamEnd {
    Stopped,
    SessionClosed,
    Disconnected,
}

async fn run_feed(tracker: UnreadTracker, mut stop_rx: watch::Receiver<bool>) {
    let feed = tracker.feed();
    let policy = tracker.settings().backoff;
    let resync_on_reconnect = tracker.settings().resync_on_reconnect;
    let mut attempt: u32 = 0;
    let mut had_gap = false;

    'session: loop {
        if *stop_rx.borrow() {
            break;
        }

        match feed.subscribe_inserts() {
            Ok(mut stream) => {
                attempt = 0;
                if tracker.report_feed(FeedHealth::Live).await.is_err() {
                    break;
                }
                tracing::info!(code = LIVE_UPDATES_SUBSCRIBED, "insert feed subscribed");

                if had_gap && resync_on_reconnect {
                    if let Err(error) = tracker.refresh().await {
                        tracing::warn!(
                            code = LIVE_UPDATES_RESYNC_FAILED,
                            error = %error,
                            "resync after feed gap failed; counts may be stale"
                        );
                    }
                }
                had_gap = false;

                let end = loop {
                    tokio::select! {
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                break StreamEnd::Stopped;
                            }
                        }
                        received = stream.recv() => {
                            match received {
                                Some(message) => {
                                    if tracker.push_insert(message).await.is_err() {
                                        break StreamEnd::SessionClosed;
                                    }
                                }
                                None => break StreamEnd::Disconnected,
                            }
                        }
                    }
                };

                match end {
                    StreamEnd::Stopped | StreamEnd::SessionClosed => break 'session,
                    StreamEnd::Disconnected => {
                        let error = TrackerError::FeedDisconnected {
                            cause: StoreError::FeedClosed,
                        };
                        tracing::warn!(
                            code = LIVE_UPDATES_DISCONNECTED,
                            error = %error,
                            "insert feed dropped; counts are stale until resubscribed"
                        );
                    }
                }
            }
            Err(cause) => {
                tracing::warn!(
                    code = LIVE_UPDATES_SUBSCRIBE_FAILED,
                    error = %cause,
                    attempt,
                    "insert feed subscription failed"
                );
            }
        }

        had_gap = true;
        attempt = attempt.saturating_add(1);
        if tracker
            .report_feed(FeedHealth::Reconnecting { attempt })
            .await
            .is_err()
        {
            break;
        }

        let delay = policy.delay_for(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis(), "resubscribing to insert feed");

        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = sleep(delay) => {}
        }
    }

    let _ = tracker.report_feed(FeedHealth::Idle).await;
    tracing::info!(code = LIVE_UPDATES_STOPPED, "live unread updates stopped");
}
