//! Per-viewer unread-message tracker.
//!
//! [`UnreadTracker`] is a cheap, cloneable handle. All state lives in a
//! single writer task (see `tracker_core`); the handle submits commands to it
//! and reads the snapshots it publishes.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot, watch},
};

use crate::{
    domain::{
        message::{ConversationId, Message, MessageId},
        status::{FeedHealth, UnreadSnapshot},
        viewer::{Viewer, ViewerInputError},
    },
    infra::config::AppConfig,
    store::contracts::{with_timeout, InsertFeed, MessageStore, StoreError},
    usecases::{
        live_updates::{BackoffPolicy, LiveSubscription},
        tracker_core::{self, Command, TrackerCore},
    },
};

const TRACKER_LOAD_FAILED: &str = "UNREAD_TRACKER_LOAD_FAILED";
const TRACKER_MARK_READ_FAILED: &str = "UNREAD_TRACKER_MARK_READ_FAILED";
const TRACKER_ABORT_NOT_QUEUED: &str = "UNREAD_TRACKER_ABORT_NOT_QUEUED";
const MIN_COMMAND_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid viewer: {0}")]
    InvalidViewer(#[source] ViewerInputError),
    #[error("tracker has no viewer yet; initialize it first")]
    NotInitialized,
    #[error("unread snapshot load failed for viewer {viewer_id}: {cause}")]
    TrackerLoadFailed {
        viewer_id: String,
        #[source]
        cause: StoreError,
    },
    #[error("mark-as-read failed for conversation {conversation_id}: {cause}")]
    MarkReadFailed {
        conversation_id: ConversationId,
        #[source]
        cause: StoreError,
    },
    #[error("live insert feed disconnected: {cause}")]
    FeedDisconnected {
        #[source]
        cause: StoreError,
    },
    #[error("tracker session closed")]
    SessionClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadOutcome {
    /// The conversation had nothing unread; no remote write was issued.
    NothingUnread,
    Cleared { cleared: u32, remaining: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    pub store_timeout: Duration,
    pub command_queue_capacity: usize,
    pub reconcile_after_mark_read: bool,
    pub resync_on_reconnect: bool,
    pub backoff: BackoffPolicy,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl TrackerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            store_timeout: Duration::from_millis(config.tracker.store_timeout_ms.max(1)),
            command_queue_capacity: config
                .tracker
                .command_queue_capacity
                .max(MIN_COMMAND_QUEUE_CAPACITY),
            reconcile_after_mark_read: config.tracker.reconcile_after_mark_read,
            resync_on_reconnect: config.tracker.resync_on_reconnect,
            backoff: BackoffPolicy::from_config(&config.feed),
        }
    }
}

#[derive(Clone)]
pub struct UnreadTracker {
    runtime: Handle,
    store: Arc<dyn MessageStore>,
    feed: Arc<dyn InsertFeed>,
    settings: TrackerSettings,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<UnreadSnapshot>,
    viewer: Arc<Mutex<Option<Viewer>>>,
}

impl UnreadTracker {
    /// Spawns the tracker's writer task on `runtime` and returns a handle to it.
    ///
    /// The task ends once every handle and live subscription is dropped.
    pub fn start(
        runtime: &Handle,
        store: Arc<dyn MessageStore>,
        feed: Arc<dyn InsertFeed>,
        settings: TrackerSettings,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(settings.command_queue_capacity);
        let (snapshot_tx, snapshots) = watch::channel(UnreadSnapshot::default());
        let core = TrackerCore::new(
            Arc::clone(&store),
            settings.store_timeout,
            settings.reconcile_after_mark_read,
            snapshot_tx,
        );
        runtime.spawn(tracker_core::run(core, command_rx));

        Self {
            runtime: runtime.clone(),
            store,
            feed,
            settings,
            commands,
            snapshots,
            viewer: Arc::new(Mutex::new(None)),
        }
    }

    /// Loads one consistent snapshot of unread counts for the viewer.
    ///
    /// On failure the previously installed counts and `ready` flag are left
    /// as they were; calling again retries.
    pub async fn initialize(&self, viewer_id: &str, viewer_role: &str) -> Result<(), TrackerError> {
        let viewer = Viewer::parse(viewer_id, viewer_role).map_err(TrackerError::InvalidViewer)?;
        self.load(viewer).await
    }

    /// Re-runs the snapshot load for the current viewer.
    pub async fn refresh(&self) -> Result<(), TrackerError> {
        let viewer = self.current_viewer()?;
        self.load(viewer).await
    }

    pub fn subscribe_to_live_updates(&self) -> Result<LiveSubscription, TrackerError> {
        let viewer = self.current_viewer()?;
        tracing::debug!(viewer_id = %viewer.id, "starting live unread updates");
        Ok(LiveSubscription::start(&self.runtime, self.clone()))
    }

    /// Marks every message from the other side of the conversation as read.
    ///
    /// Local counts change only after the store acknowledges the write.
    pub async fn mark_as_read(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<MarkReadOutcome, TrackerError> {
        let viewer = self.current_viewer()?;

        let (reply, proceed) = oneshot::channel();
        self.send(Command::BeginMarkRead {
            conversation_id: conversation_id.clone(),
            reply,
        })
        .await?;
        if !proceed.await.map_err(|_| TrackerError::SessionClosed)? {
            return Ok(MarkReadOutcome::NothingUnread);
        }

        let claim = InFlightClaim::new(&self.commands, conversation_id.clone());
        let write = self
            .store
            .update_messages_read(conversation_id, viewer.role);

        if let Err(cause) = with_timeout(self.settings.store_timeout, write).await {
            tracing::warn!(
                code = TRACKER_MARK_READ_FAILED,
                conversation_id = %conversation_id,
                error = %cause,
                "mark-as-read write failed; local counts left unchanged"
            );
            claim.abort().await;
            return Err(TrackerError::MarkReadFailed {
                conversation_id: conversation_id.clone(),
                cause,
            });
        }

        claim.disarm();
        let (reply, committed) = oneshot::channel();
        self.send(Command::CommitMarkRead {
            conversation_id: conversation_id.clone(),
            reply,
        })
        .await?;
        let outcome = committed.await.map_err(|_| TrackerError::SessionClosed)?;

        Ok(MarkReadOutcome::Cleared {
            cleared: outcome.cleared,
            remaining: outcome.remaining,
        })
    }

    pub fn get_unread_count(&self, conversation_id: &ConversationId) -> u32 {
        self.snapshots.borrow().count(conversation_id)
    }

    /// Total unread across every conversation.
    pub fn unread_count(&self) -> u32 {
        self.snapshots.borrow().total
    }

    pub fn unread_counts(&self) -> BTreeMap<ConversationId, u32> {
        self.snapshots.borrow().counts.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.snapshots.borrow().ready
    }

    pub fn feed_health(&self) -> FeedHealth {
        self.snapshots.borrow().feed
    }

    pub fn snapshot(&self) -> UnreadSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<UnreadSnapshot> {
        self.snapshots.clone()
    }

    pub fn viewer(&self) -> Option<Viewer> {
        self.viewer.lock().ok().and_then(|viewer| viewer.clone())
    }

    pub(crate) fn feed(&self) -> Arc<dyn InsertFeed> {
        Arc::clone(&self.feed)
    }

    pub(crate) fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub(crate) async fn push_insert(&self, message: Message) -> Result<(), TrackerError> {
        self.send(Command::Insert(message)).await
    }

    pub(crate) async fn report_feed(&self, health: FeedHealth) -> Result<(), TrackerError> {
        self.send(Command::Feed(health)).await
    }

    async fn load(&self, viewer: Viewer) -> Result<(), TrackerError> {
        let unread = self.fetch_unread(&viewer).await.map_err(|cause| {
            tracing::warn!(
                code = TRACKER_LOAD_FAILED,
                viewer_id = %viewer.id,
                error = %cause,
                "unread snapshot load failed; keeping last known counts"
            );
            TrackerError::TrackerLoadFailed {
                viewer_id: viewer.id.to_string(),
                cause,
            }
        })?;

        let (reply, installed) = oneshot::channel();
        self.send(Command::Install {
            viewer: viewer.clone(),
            unread,
            reply,
        })
        .await?;
        let total = installed.await.map_err(|_| TrackerError::SessionClosed)?;

        if let Ok(mut current) = self.viewer.lock() {
            *current = Some(viewer.clone());
        }
        tracing::info!(
            viewer_id = %viewer.id,
            viewer_role = %viewer.role,
            total,
            "unread snapshot loaded"
        );
        Ok(())
    }

    /// Unread message ids per visible conversation. Installing ids rather than
    /// bare counts lets the writer task drop feed events the snapshot already covers.
    async fn fetch_unread(
        &self,
        viewer: &Viewer,
    ) -> Result<BTreeMap<ConversationId, BTreeSet<MessageId>>, StoreError> {
        let timeout = self.settings.store_timeout;
        let conversation_ids =
            with_timeout(timeout, self.store.query_conversation_ids(viewer)).await?;

        let mut unread = BTreeMap::new();
        for conversation_id in conversation_ids {
            let ids = with_timeout(
                timeout,
                self.store.query_unread_ids(&conversation_id, viewer.role),
            )
            .await?;
            unread.insert(conversation_id, ids);
        }

        Ok(unread)
    }

    fn current_viewer(&self) -> Result<Viewer, TrackerError> {
        self.viewer().ok_or(TrackerError::NotInitialized)
    }

    async fn send(&self, command: Command) -> Result<(), TrackerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TrackerError::SessionClosed)
    }
}

/// Holds a mark-read claim in the writer task until committed or aborted.
///
/// Dropping an armed claim (the caller's future was cancelled mid-write)
/// queues an abort so the conversation is not left marked as in flight.
struct InFlightClaim<'a> {
    commands: &'a mpsc::Sender<Command>,
    conversation_id: Option<ConversationId>,
}

impl<'a> InFlightClaim<'a> {
    fn new(commands: &'a mpsc::Sender<Command>, conversation_id: ConversationId) -> Self {
        Self {
            commands,
            conversation_id: Some(conversation_id),
        }
    }

    async fn abort(mut self) {
        if let Some(conversation_id) = self.conversation_id.take() {
            let _ = self
                .commands
                .send(Command::AbortMarkRead { conversation_id })
                .await;
        }
    }

    fn disarm(mut self) {
        self.conversation_id = None;
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        if let Some(conversation_id) = self.conversation_id.take() {
            if self
                .commands
                .try_send(Command::AbortMarkRead {
                    conversation_id: conversation_id.clone(),
                })
                .is_err()
            {
                tracing::debug!(
                    code = TRACKER_ABORT_NOT_QUEUED,
                    conversation_id = %conversation_id,
                    "cancelled mark-as-read could not queue its abort"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{conversation::Conversation, message::SenderRole},
        store::memory::InMemoryMessageStore,
        test_support::{conversation, message, wait_for_snapshot},
    };

    fn seeded_store(entries: &[(&str, &str, SenderRole)]) -> Arc<InMemoryMessageStore> {
        let store = Arc::new(InMemoryMessageStore::new());
        for id in ["A", "B", "C"] {
            store
                .add_conversation(Conversation::new(id, "agent-1"))
                .expect("conversation");
        }
        store
            .add_conversation(Conversation::new("X", "agent-2"))
            .expect("conversation");
        for (id, conv, role) in entries {
            store
                .seed_message(message(id, conv, *role))
                .expect("seed message");
        }
        store
    }

    fn tracker_for(store: &Arc<InMemoryMessageStore>) -> UnreadTracker {
        let settings = TrackerSettings {
            store_timeout: Duration::from_secs(2),
            ..TrackerSettings::default()
        };
        UnreadTracker::start(&Handle::current(), store.clone(), store.clone(), settings)
    }

    fn assert_total_matches_counts(tracker: &UnreadTracker) {
        let snapshot = tracker.snapshot();
        let sum: u32 = snapshot.counts.values().sum();
        assert_eq!(snapshot.total, sum);
    }

    #[tokio::test]
    async fn initialize_rejects_empty_viewer_input() {
        let store = seeded_store(&[]);
        let tracker = tracker_for(&store);

        let missing_id = tracker.initialize("", "agent").await;
        let missing_role = tracker.initialize("agent-1", "").await;

        assert!(matches!(missing_id, Err(TrackerError::InvalidViewer(_))));
        assert!(matches!(missing_role, Err(TrackerError::InvalidViewer(_))));
        assert!(!tracker.is_ready());
    }

    #[tokio::test]
    async fn snapshot_counts_only_other_role_unread_messages() {
        let store = seeded_store(&[
            ("m1", "A", SenderRole::Admin),
            ("m2", "A", SenderRole::Admin),
            ("m3", "A", SenderRole::Admin),
            ("m4", "B", SenderRole::Agent),
            ("m5", "X", SenderRole::Admin),
        ]);
        let tracker = tracker_for(&store);

        tracker
            .initialize("agent-1", "agent")
            .await
            .expect("initialize should succeed");

        let expected: BTreeMap<_, _> = [
            (conversation("A"), 3),
            (conversation("B"), 0),
            (conversation("C"), 0),
        ]
        .into_iter()
        .collect();
        assert_eq!(tracker.unread_counts(), expected);
        assert_eq!(tracker.unread_count(), 3);
        assert!(tracker.is_ready());
        assert_total_matches_counts(&tracker);
    }

    #[tokio::test]
    async fn admin_snapshot_covers_every_conversation() {
        let store = seeded_store(&[
            ("m1", "A", SenderRole::Agent),
            ("m2", "X", SenderRole::Agent),
            ("m3", "X", SenderRole::Admin),
        ]);
        let tracker = tracker_for(&store);

        tracker
            .initialize("admin-1", "admin")
            .await
            .expect("initialize should succeed");

        assert_eq!(tracker.unread_counts().len(), 4);
        assert_eq!(tracker.get_unread_count(&conversation("X")), 1);
        assert_eq!(tracker.unread_count(), 2);
    }

    #[tokio::test]
    async fn failed_reload_preserves_last_known_state() {
        let store = seeded_store(&[("m1", "A", SenderRole::Admin), ("m2", "A", SenderRole::Admin)]);
        let tracker = tracker_for(&store);
        tracker
            .initialize("agent-1", "agent")
            .await
            .expect("first load should succeed");

        store.fail_queries(true);
        let err = tracker
            .refresh()
            .await
            .expect_err("reload must fail");

        assert!(matches!(err, TrackerError::TrackerLoadFailed { .. }));
        assert_eq!(tracker.get_unread_count(&conversation("A")), 2);
        assert_eq!(tracker.unread_count(), 2);
        assert!(tracker.is_ready());
    }

    #[tokio::test]
    async fn first_load_failure_leaves_tracker_not_ready_and_retryable() {
        let store = seeded_store(&[("m1", "A", SenderRole::Admin)]);
        let tracker = tracker_for(&store);

        store.fail_queries(true);
        assert!(tracker.initialize("agent-1", "agent").await.is_err());
        assert!(!tracker.is_ready());
        assert!(tracker.unread_counts().is_empty());

        store.fail_queries(false);
        tracker
            .initialize("agent-1", "agent")
            .await
            .expect("retry should succeed");
        assert_eq!(tracker.unread_count(), 1);
    }

    #[tokio::test]
    async fn mark_as_read_clears_conversation_and_lowers_total() {
        let store = seeded_store(&[
            ("m1", "A", SenderRole::Admin),
            ("m2", "A", SenderRole::Admin),
            ("m3", "B", SenderRole::Admin),
        ]);
        let tracker = tracker_for(&store);
        tracker.initialize("agent-1", "agent").await.expect("load");

        let outcome = tracker
            .mark_as_read(&conversation("A"))
            .await
            .expect("mark should succeed");

        assert_eq!(outcome, MarkReadOutcome::Cleared { cleared: 2, remaining: 0 });
        assert_eq!(tracker.get_unread_count(&conversation("A")), 0);
        assert_eq!(tracker.unread_count(), 1);
        assert_eq!(store.is_read("m1"), Some(true));
        assert_total_matches_counts(&tracker);
    }

    #[tokio::test]
    async fn mark_as_read_is_noop_for_zero_or_unknown_conversation() {
        let store = seeded_store(&[("m1", "A", SenderRole::Admin)]);
        store.fail_updates(true);
        let tracker = tracker_for(&store);
        tracker.initialize("agent-1", "agent").await.expect("load");

        let zero = tracker.mark_as_read(&conversation("B")).await;
        let unknown = tracker.mark_as_read(&conversation("nope")).await;

        assert_eq!(zero.expect("no-op"), MarkReadOutcome::NothingUnread);
        assert_eq!(unknown.expect("no-op"), MarkReadOutcome::NothingUnread);
    }

    #[tokio::test]
    async fn failed_write_leaves_counts_untouched() {
        let store = seeded_store(&[("m1", "A", SenderRole::Admin)]);
        let tracker = tracker_for(&store);
        tracker.initialize("agent-1", "agent").await.expect("load");
        store.fail_updates(true);

        let err = tracker
            .mark_as_read(&conversation("A"))
            .await
            .expect_err("write must fail");

        assert!(matches!(
            err,
            TrackerError::MarkReadFailed { ref conversation_id, .. } if conversation_id == &conversation("A")
        ));
        assert_eq!(tracker.get_unread_count(&conversation("A")), 1);
        assert_eq!(tracker.unread_count(), 1);
    }

    #[tokio::test]
    async fn write_timeout_maps_to_mark_read_failure() {
        let store = seeded_store(&[("m1", "A", SenderRole::Admin)]);
        let _gate = store.hold_update_acks();
        let settings = TrackerSettings {
            store_timeout: Duration::from_millis(30),
            ..TrackerSettings::default()
        };
        let tracker = UnreadTracker::start(&Handle::current(), store.clone(), store.clone(), settings);
        tracker.initialize("agent-1", "agent").await.expect("load");

        let err = tracker
            .mark_as_read(&conversation("A"))
            .await
            .expect_err("write must time out");

        assert!(matches!(
            err,
            TrackerError::MarkReadFailed {
                cause: StoreError::Timeout { .. },
                ..
            }
        ));
        assert_eq!(tracker.get_unread_count(&conversation("A")), 1);
    }

    #[tokio::test]
    async fn operations_before_initialize_are_rejected() {
        let store = seeded_store(&[]);
        let tracker = tracker_for(&store);

        assert!(matches!(tracker.refresh().await, Err(TrackerError::NotInitialized)));
        assert!(matches!(
            tracker.mark_as_read(&conversation("A")).await,
            Err(TrackerError::NotInitialized)
        ));
        assert!(matches!(
            tracker.subscribe_to_live_updates(),
            Err(TrackerError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn live_insert_from_other_role_increments_counts() {
        let store = seeded_store(&[("m1", "A", SenderRole::Admin)]);
        let tracker = tracker_for(&store);
        tracker.initialize("agent-1", "agent").await.expect("load");
        let _live = tracker.subscribe_to_live_updates().expect("subscribe");
        let mut rx = tracker.watch();
        wait_for_snapshot(&mut rx, |s| s.feed == FeedHealth::Live).await;

        store
            .insert_message(message("m2", "C", SenderRole::Admin))
            .expect("insert");
        let snapshot = wait_for_snapshot(&mut rx, |s| s.total == 2).await;

        assert_eq!(snapshot.count(&conversation("C")), 1);
        assert_eq!(snapshot.count(&conversation("A")), 1);
    }

    #[tokio::test]
    async fn own_role_and_duplicate_inserts_do_not_change_counts() {
        let store = seeded_store(&[]);
        let tracker = tracker_for(&store);
        tracker.initialize("agent-1", "agent").await.expect("load");
        let _live = tracker.subscribe_to_live_updates().expect("subscribe");
        let mut rx = tracker.watch();
        wait_for_snapshot(&mut rx, |s| s.feed == FeedHealth::Live).await;

        let duplicate = message("m2", "A", SenderRole::Admin);
        store
            .insert_message(message("m1", "A", SenderRole::Agent))
            .expect("own insert");
        tracker
            .push_insert(duplicate.clone())
            .await
            .expect("first delivery");
        tracker
            .push_insert(duplicate)
            .await
            .expect("duplicate delivery");
        store
            .insert_message(message("m3", "B", SenderRole::Admin))
            .expect("sentinel insert");

        let snapshot = wait_for_snapshot(&mut rx, |s| s.count(&conversation("B")) == 1).await;
        assert_eq!(snapshot.count(&conversation("A")), 1);
        assert_eq!(snapshot.total, 2);
    }

    #[tokio::test]
    async fn insert_during_in_flight_mark_read_survives_commit() {
        let store = seeded_store(&[("m1", "C", SenderRole::Admin)]);
        let gate = store.hold_update_acks();
        let tracker = tracker_for(&store);
        tracker.initialize("agent-1", "agent").await.expect("load");
        let _live = tracker.subscribe_to_live_updates().expect("subscribe");
        let mut rx = tracker.watch();
        wait_for_snapshot(&mut rx, |s| s.feed == FeedHealth::Live).await;

        let marking = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.mark_as_read(&conversation("C")).await })
        };
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.is_read("m1") != Some(true) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("remote write should be applied");

        store
            .insert_message(message("m2", "C", SenderRole::Admin))
            .expect("insert during write");
        wait_for_snapshot(&mut rx, |s| s.count(&conversation("C")) == 2).await;
        gate.notify_one();

        let outcome = marking
            .await
            .expect("task should join")
            .expect("mark should succeed");

        assert_eq!(outcome, MarkReadOutcome::Cleared { cleared: 1, remaining: 1 });
        assert_eq!(tracker.get_unread_count(&conversation("C")), 1);
        assert_eq!(tracker.unread_count(), 1);
        assert_total_matches_counts(&tracker);
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_the_writer_task() {
        let store = seeded_store(&[]);
        let tracker = tracker_for(&store);
        tracker.initialize("agent-1", "agent").await.expect("load");
        let mut rx = tracker.watch();

        drop(tracker);

        let snapshot = wait_for_snapshot(&mut rx, |s| s.feed == FeedHealth::Stopped).await;
        assert!(snapshot.ready);
    }
}
