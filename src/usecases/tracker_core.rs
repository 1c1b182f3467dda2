//! Single-writer task that owns one viewer's [`UnreadIndex`].
//!
//! Feed inserts, snapshot installs and mark-read commits all arrive as
//! [`Command`]s on one bounded queue and are applied strictly in the order
//! they were enqueued. After every applied transition a fresh
//! [`UnreadSnapshot`] is published on the watch channel.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    domain::{
        message::{ConversationId, Message, MessageId},
        status::{FeedHealth, UnreadSnapshot},
        unread_index::{InsertOutcome, UnreadIndex},
        viewer::Viewer,
    },
    store::contracts::{with_timeout, MessageStore},
};

const TRACKER_STARTED: &str = "UNREAD_TRACKER_STARTED";
const TRACKER_STOPPED: &str = "UNREAD_TRACKER_STOPPED";
const TRACKER_RECONCILE_FAILED: &str = "UNREAD_TRACKER_RECONCILE_FAILED";

#[derive(Debug)]
pub(crate) enum Command {
    Install {
        viewer: Viewer,
        unread: BTreeMap<ConversationId, BTreeSet<MessageId>>,
        reply: oneshot::Sender<u32>,
    },
    Insert(Message),
    BeginMarkRead {
        conversation_id: ConversationId,
        reply: oneshot::Sender<bool>,
    },
    CommitMarkRead {
        conversation_id: ConversationId,
        reply: oneshot::Sender<CommitOutcome>,
    },
    AbortMarkRead {
        conversation_id: ConversationId,
    },
    Feed(FeedHealth),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CommitOutcome {
    pub cleared: u32,
    pub remaining: u32,
}

#[derive(Debug, Default)]
struct InFlightWrite {
    writers: u32,
    arrived: u32,
}

pub(crate) struct TrackerCore {
    store: Arc<dyn MessageStore>,
    store_timeout: Duration,
    reconcile_after_mark_read: bool,
    viewer: Option<Viewer>,
    index: UnreadIndex,
    ready: bool,
    feed: FeedHealth,
    in_flight: HashMap<ConversationId, InFlightWrite>,
    snapshots: watch::Sender<UnreadSnapshot>,
}

impl TrackerCore {
    pub(crate) fn new(
        store: Arc<dyn MessageStore>,
        store_timeout: Duration,
        reconcile_after_mark_read: bool,
        snapshots: watch::Sender<UnreadSnapshot>,
    ) -> Self {
        Self {
            store,
            store_timeout,
            reconcile_after_mark_read,
            viewer: None,
            index: UnreadIndex::new(),
            ready: false,
            feed: FeedHealth::Idle,
            in_flight: HashMap::new(),
            snapshots,
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Install {
                viewer,
                unread,
                reply,
            } => {
                self.install(viewer, unread);
                let _ = reply.send(self.index.total());
            }
            Command::Insert(message) => self.apply_insert(&message),
            Command::BeginMarkRead {
                conversation_id,
                reply,
            } => {
                let proceed = self.begin_mark_read(conversation_id);
                let _ = reply.send(proceed);
            }
            Command::CommitMarkRead {
                conversation_id,
                reply,
            } => {
                let outcome = self.commit_mark_read(&conversation_id).await;
                self.publish();
                let _ = reply.send(outcome);
            }
            Command::AbortMarkRead { conversation_id } => {
                self.release(&conversation_id);
            }
            Command::Feed(health) => {
                if self.feed != health {
                    self.feed = health;
                    self.publish();
                }
            }
        }
    }

    fn install(&mut self, viewer: Viewer, unread: BTreeMap<ConversationId, BTreeSet<MessageId>>) {
        if self.viewer.as_ref() != Some(&viewer) {
            self.index = UnreadIndex::new();
            self.in_flight.clear();
        }

        self.index.install(unread);
        self.ready = true;
        tracing::debug!(
            viewer_id = %viewer.id,
            viewer_role = %viewer.role,
            conversations = self.index.counts().len(),
            total = self.index.total(),
            "unread snapshot installed"
        );
        self.viewer = Some(viewer);
        self.publish();
    }

    fn apply_insert(&mut self, message: &Message) {
        let Some(viewer) = self.viewer.as_ref() else {
            tracing::debug!(
                message_id = %message.id,
                "insert arrived before viewer was set; ignored"
            );
            return;
        };

        match self.index.apply_insert(message, viewer.role) {
            InsertOutcome::Counted => {
                if let Some(write) = self.in_flight.get_mut(&message.conversation_id) {
                    write.arrived = write.arrived.saturating_add(1);
                }
                tracing::debug!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    count = self.index.get(&message.conversation_id),
                    "unread count incremented"
                );
                self.publish();
            }
            InsertOutcome::Duplicate => {
                tracing::debug!(message_id = %message.id, "duplicate insert ignored");
            }
            InsertOutcome::OwnMessage | InsertOutcome::AlreadyRead => {}
        }
    }

    fn begin_mark_read(&mut self, conversation_id: ConversationId) -> bool {
        if self.index.get(&conversation_id) == 0 {
            return false;
        }

        let write = self.in_flight.entry(conversation_id).or_default();
        write.writers = write.writers.saturating_add(1);
        true
    }

    /// Drops one writer's claim and returns the inserts counted while it was in flight.
    fn release(&mut self, conversation_id: &ConversationId) -> u32 {
        let Some(write) = self.in_flight.get_mut(conversation_id) else {
            return 0;
        };

        let arrived = std::mem::take(&mut write.arrived);
        write.writers = write.writers.saturating_sub(1);
        if write.writers == 0 {
            self.in_flight.remove(conversation_id);
        }
        arrived
    }

    async fn commit_mark_read(&mut self, conversation_id: &ConversationId) -> CommitOutcome {
        let arrived = self.release(conversation_id);
        let before = self.index.get(conversation_id);

        if arrived == 0 {
            let cleared = self.index.reset(conversation_id);
            return CommitOutcome {
                cleared,
                remaining: 0,
            };
        }

        let reconciled = match (self.reconcile_after_mark_read, self.viewer.as_ref()) {
            (true, Some(viewer)) => {
                let query = self.store.query_unread_ids(conversation_id, viewer.role);
                match with_timeout(self.store_timeout, query).await {
                    Ok(ids) => Some(ids),
                    Err(error) => {
                        tracing::warn!(
                            code = TRACKER_RECONCILE_FAILED,
                            conversation_id = %conversation_id,
                            error = %error,
                            arrived,
                            "post mark-read reconcile failed; keeping inserts seen during write"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        // Ids from the store are marked applied so their queued feed events drain as duplicates.
        match reconciled {
            Some(ids) => self.index.set_unread(conversation_id, ids),
            None => self.index.set_count(conversation_id, arrived),
        }
        let remaining = self.index.get(conversation_id);
        tracing::debug!(
            conversation_id = %conversation_id,
            arrived,
            remaining,
            "mark-read committed with concurrent inserts"
        );

        CommitOutcome {
            cleared: before.saturating_sub(remaining),
            remaining,
        }
    }

    fn publish(&self) {
        let snapshot = UnreadSnapshot::capture(&self.index, self.ready, self.feed);
        self.snapshots.send_replace(snapshot);
    }
}

pub(crate) async fn run(mut core: TrackerCore, mut commands: mpsc::Receiver<Command>) {
    tracing::info!(code = TRACKER_STARTED, "unread tracker started");

    while let Some(command) = commands.recv().await {
        core.handle(command).await;
    }

    core.feed = FeedHealth::Stopped;
    core.publish();
    tracing::info!(code = TRACKER_STOPPED, "unread tracker stopped");
}
