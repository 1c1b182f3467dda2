use std::sync::{Arc, Mutex};

use tokio::{
    runtime::Handle,
    sync::mpsc::{self, error::TrySendError},
};

use crate::{
    domain::message::Message,
    store::contracts::{InsertFeed, InsertStream, StoreError},
};

const FEED_HUB_UPSTREAM_STARTED: &str = "FEED_HUB_UPSTREAM_STARTED";
const FEED_HUB_UPSTREAM_CLOSED: &str = "FEED_HUB_UPSTREAM_CLOSED";
const FEED_HUB_SESSION_OVERFLOW: &str = "FEED_HUB_SESSION_OVERFLOW";
const FEED_HUB_UPSTREAM_RELEASED: &str = "FEED_HUB_UPSTREAM_RELEASED";

/// Shares one upstream insert subscription between many viewer sessions.
///
/// Each session gets its own bounded queue. A session that lets its queue
/// fill up is cut off, which it observes as a disconnect. When the upstream
/// stream ends every session is cut off and the next subscriber reopens it.
/// The upstream is also released once a delivery finds no session left.
#[derive(Clone)]
pub struct FeedHub {
    runtime: Handle,
    upstream: Arc<dyn InsertFeed>,
    session_capacity: usize,
    inner: Arc<Mutex<HubState>>,
}

#[derive(Debug, Default)]
struct HubState {
    upstream_open: bool,
    sessions: Vec<mpsc::Sender<Message>>,
}

impl FeedHub {
    pub fn new(runtime: Handle, upstream: Arc<dyn InsertFeed>, session_capacity: usize) -> Self {
        Self {
            runtime,
            upstream,
            session_capacity: session_capacity.max(1),
            inner: Arc::new(Mutex::new(HubState::default())),
        }
    }

    pub fn session_count(&self) -> usize {
        self.inner
            .lock()
            .map(|state| state.sessions.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or_default()
    }

    pub fn is_upstream_open(&self) -> bool {
        self.inner
            .lock()
            .map(|state| state.upstream_open)
            .unwrap_or_default()
    }
}

impl InsertFeed for FeedHub {
    fn subscribe_inserts(&self) -> Result<InsertStream, StoreError> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("feed hub state poisoned".to_owned()))?;

        if !state.upstream_open {
            let upstream = self.upstream.subscribe_inserts()?;
            state.upstream_open = true;
            self.runtime
                .spawn(run_pump(Arc::clone(&self.inner), upstream));
            tracing::info!(code = FEED_HUB_UPSTREAM_STARTED, "feed hub opened upstream insert feed");
        }

        let (tx, rx) = mpsc::channel(self.session_capacity);
        state.sessions.push(tx);
        Ok(rx)
    }
}

async fn run_pump(inner: Arc<Mutex<HubState>>, mut upstream: InsertStream) {
    while let Some(message) = upstream.recv().await {
        let Ok(mut state) = inner.lock() else {
            return;
        };

        state
            .sessions
            .retain(|session| match session.try_send(message.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        code = FEED_HUB_SESSION_OVERFLOW,
                        conversation_id = %message.conversation_id,
                        "session insert queue overflowed; disconnecting session"
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });

        if state.sessions.is_empty() {
            state.upstream_open = false;
            tracing::info!(
                code = FEED_HUB_UPSTREAM_RELEASED,
                "no sessions left; feed hub released upstream insert feed"
            );
            return;
        }
    }

    if let Ok(mut state) = inner.lock() {
        state.upstream_open = false;
        state.sessions.clear();
    }

    tracing::warn!(
        code = FEED_HUB_UPSTREAM_CLOSED,
        "feed hub upstream insert feed closed; sessions disconnected"
    );
}
