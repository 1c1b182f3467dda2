use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::{runtime::Handle, sync::watch};

use crate::{
    cli::{Cli, Command, SessionArgs},
    domain::{
        self,
        message::Message,
        status::{FeedHealth, UnreadSnapshot},
    },
    infra::{self, fixture::Fixture},
    store::{
        self,
        contracts::{with_timeout, MessageStore},
        feed_hub::FeedHub,
        memory::InMemoryMessageStore,
    },
    usecases::{
        self, bootstrap,
        context::AppContext,
        notifications::NotificationPresenter,
        unread_tracker::{MarkReadOutcome, UnreadTracker},
    },
};

const REPLAY_DEADLINE: Duration = Duration::from_secs(10);
const REPLAY_INSERT_FAILED: &str = "REPLAY_INSERT_FAILED";

pub fn run(cli: Cli) -> Result<()> {
    let context = bootstrap::bootstrap(cli.config.as_deref())?;

    tracing::debug!(
        domain = domain::module_name(),
        store = store::module_name(),
        usecases = usecases::module_name(),
        infra = infra::module_name(),
        "module boundaries loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    let report = match &cli.command {
        Command::Snapshot(args) => runtime.block_on(snapshot(&context, args))?,
        Command::Replay(args) => runtime.block_on(replay(&context, args))?,
    };

    for line in report {
        println!("{line}");
    }

    Ok(())
}

struct Session {
    store: Arc<InMemoryMessageStore>,
    tracker: UnreadTracker,
    fixture: Fixture,
    live: Vec<Message>,
}

async fn open_session(context: &AppContext, args: &SessionArgs) -> Result<Session> {
    let fixture = Fixture::load(&args.fixture)?;
    let store = Arc::new(InMemoryMessageStore::new());
    let base = Utc::now();
    fixture.seed(&store, base)?;
    let live = fixture.live_messages(base);

    let runtime = Handle::current();
    let hub = FeedHub::new(
        runtime.clone(),
        store.clone(),
        context.config.feed.session_queue_capacity,
    );
    let tracker = UnreadTracker::start(
        &runtime,
        store.clone(),
        Arc::new(hub),
        context.tracker_settings(),
    );
    tracker
        .initialize(&args.viewer, &args.role)
        .await
        .context("initial unread load failed")?;

    Ok(Session {
        store,
        tracker,
        fixture,
        live,
    })
}

/// Loads the viewer's counts once and reports them.
pub async fn snapshot(context: &AppContext, args: &SessionArgs) -> Result<Vec<String>> {
    let session = open_session(context, args).await?;
    Ok(render_counts(&session.tracker.snapshot()))
}

/// Loads counts, pushes the fixture's live messages through the feed, then
/// applies its mark-read list, reporting toasts as they are raised.
pub async fn replay(context: &AppContext, args: &SessionArgs) -> Result<Vec<String>> {
    let session = open_session(context, args).await?;
    let tracker = &session.tracker;
    let mut presenter = NotificationPresenter::new(&context.config.notifications);
    let mut report = vec!["initial:".to_owned()];
    report.extend(render_counts(&tracker.snapshot()));

    let mut rx = tracker.watch();
    let mut subscription = tracker.subscribe_to_live_updates()?;
    follow_until(&mut rx, &mut presenter, &mut report, |s| {
        s.feed == FeedHealth::Live
    })
    .await?;

    for message in &session.live {
        if let Err(error) = session.store.insert_message(message.clone()) {
            tracing::warn!(
                code = REPLAY_INSERT_FAILED,
                message_id = %message.id,
                error = %error,
                "fixture live message was not inserted"
            );
        }
    }

    let expected = authoritative_total(&session.store, tracker, context).await?;
    follow_until(&mut rx, &mut presenter, &mut report, |s| s.total == expected).await?;

    for conversation_id in &session.fixture.mark_read {
        let line = match tracker.mark_as_read(conversation_id).await {
            Ok(MarkReadOutcome::Cleared { cleared, remaining }) => format!(
                "marked {conversation_id} read: cleared {cleared}, {remaining} still unread"
            ),
            Ok(MarkReadOutcome::NothingUnread) => {
                format!("marked {conversation_id} read: nothing unread")
            }
            Err(error) => format!("mark {conversation_id} read failed: {error}"),
        };
        report.push(line);
        presenter.observe(&tracker.snapshot(), std::time::Instant::now());
    }

    subscription.dispose();

    report.push("final:".to_owned());
    report.extend(render_counts(&tracker.snapshot()));
    if let Some(banner) = presenter.banner() {
        report.push(banner.text);
    }

    Ok(report)
}

async fn follow_until<F>(
    rx: &mut watch::Receiver<UnreadSnapshot>,
    presenter: &mut NotificationPresenter,
    report: &mut Vec<String>,
    mut done: F,
) -> Result<UnreadSnapshot>
where
    F: FnMut(&UnreadSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + REPLAY_DEADLINE;
    loop {
        let snapshot = rx.borrow_and_update().clone();
        for toast in presenter.observe(&snapshot, std::time::Instant::now()) {
            report.push(format!("toast: {}", toast.text));
        }
        if done(&snapshot) {
            return Ok(snapshot);
        }

        tokio::time::timeout_at(deadline, rx.changed())
            .await
            .context("timed out waiting for unread counts to settle")?
            .context("unread tracker stopped")?;
    }
}

/// Sum of per-conversation counts straight from the store.
async fn authoritative_total(
    store: &InMemoryMessageStore,
    tracker: &UnreadTracker,
    context: &AppContext,
) -> Result<u32> {
    let viewer = tracker.viewer().context("tracker has no viewer")?;
    let timeout = context.tracker_settings().store_timeout;

    let ids = with_timeout(timeout, store.query_conversation_ids(&viewer)).await?;
    let mut total = 0u32;
    for id in &ids {
        let count = with_timeout(timeout, store.query_unread_count(id, viewer.role)).await?;
        total = total.saturating_add(count);
    }

    Ok(total)
}

fn render_counts(snapshot: &UnreadSnapshot) -> Vec<String> {
    let mut lines: Vec<String> = snapshot
        .counts
        .iter()
        .map(|(id, count)| format!("  {id}\t{count}"))
        .collect();
    lines.push(format!("  total\t{}", snapshot.total));
    lines
}
