/// Live feed session: one subscription, one reconciler, one event task
///
/// Every input (snapshots, mutation results, user commands, timer ticks) is
/// funnelled into a single task that owns the reconciler, so state changes
/// happen strictly in arrival order. Mutation calls run in their own tasks and
/// report back through a channel.
use crate::auth::CurrentUser;
use crate::error::{ErrorKind, FeedError};
use crate::feed::reconciler::{
    FeedReconciler, FeedStatus, MutationOp, MutationRequest, MutationTicket,
};
use crate::feed::source::{FeedEvent, FeedFilter, FeedSource, PostBackend, Subscription};
use crate::post::{Post, PostDraft, PostId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

type Reply<T> = oneshot::Sender<Result<T, FeedError>>;
type MutationOutcome = (MutationTicket, Result<(), crate::error::BackendError>);

/// Tunables for a feed session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub pending_timeout: Duration,
    /// How often stale optimistic entries are checked without a snapshot
    pub timeout_check_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            pending_timeout: crate::feed::reconciler::DEFAULT_PENDING_TIMEOUT,
            timeout_check_interval: Duration::from_secs(1),
        }
    }
}

/// What the view renders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedView {
    pub status: FeedStatus,
    pub posts: Vec<Post>,
    pub pending: usize,
}

impl Default for FeedView {
    fn default() -> Self {
        Self {
            status: FeedStatus::Loading,
            posts: Vec::new(),
            pending: 0,
        }
    }
}

enum Command {
    Create {
        draft: PostDraft,
        reply: Reply<PostId>,
    },
    Edit {
        post_id: PostId,
        content: String,
        reply: Reply<()>,
    },
    Delete {
        post_id: PostId,
        reply: Reply<()>,
    },
    Resubscribe {
        reply: Reply<()>,
    },
    Close,
}

struct ActiveSubscription {
    handle: Subscription,
    events: mpsc::UnboundedReceiver<FeedEvent>,
}

async fn next_event(active: &mut Option<ActiveSubscription>) -> Option<FeedEvent> {
    match active {
        Some(sub) => sub.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle to a running feed session.
///
/// Dropping the handle tears the session down and cancels its subscription.
pub struct FeedSession {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<FeedView>,
    errors: mpsc::UnboundedReceiver<FeedError>,
    task: Option<JoinHandle<()>>,
}

impl FeedSession {
    /// Subscribe to `filter` and start processing. Must be called within a
    /// tokio runtime.
    pub fn spawn(
        source: Arc<dyn FeedSource>,
        backend: Arc<dyn PostBackend>,
        filter: FeedFilter,
        user: Option<CurrentUser>,
        options: SessionOptions,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(FeedView::default());
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            reconciler: FeedReconciler::with_timeout(user, options.pending_timeout),
            source,
            backend,
            filter,
            active: None,
            view: view_tx,
            errors: errors_tx,
            results: results_tx,
        };
        let task = tokio::spawn(worker.run(
            commands_rx,
            results_rx,
            options.timeout_check_interval,
        ));

        Self {
            commands: commands_tx,
            view: view_rx,
            errors: errors_rx,
            task: Some(task),
        }
    }

    /// Receiver for render-state updates
    pub fn view(&self) -> watch::Receiver<FeedView> {
        self.view.clone()
    }

    /// Latest render state
    pub fn current(&self) -> FeedView {
        self.view.borrow().clone()
    }

    /// Next asynchronously surfaced error (mutation failures, timeouts,
    /// subscription loss). `None` once the session has stopped.
    pub async fn next_error(&mut self) -> Option<FeedError> {
        self.errors.recv().await
    }

    /// Surfaced errors already queued
    pub fn drain_errors(&mut self) -> Vec<FeedError> {
        let mut out = Vec::new();
        while let Ok(err) = self.errors.try_recv() {
            out.push(err);
        }
        out
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, FeedError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| FeedError::unavailable("feed session closed"))?;
        rx.await
            .map_err(|_| FeedError::unavailable("feed session closed"))?
    }

    /// Create a post. It shows up once a snapshot includes it.
    pub async fn create(&self, draft: PostDraft) -> Result<PostId, FeedError> {
        self.request(|reply| Command::Create { draft, reply }).await
    }

    /// Optimistically edit a post's content
    pub async fn edit(&self, post_id: PostId, content: impl Into<String>) -> Result<(), FeedError> {
        let content = content.into();
        self.request(|reply| Command::Edit {
            post_id,
            content,
            reply,
        })
        .await
    }

    /// Optimistically delete a post
    pub async fn delete(&self, post_id: PostId) -> Result<(), FeedError> {
        self.request(|reply| Command::Delete { post_id, reply }).await
    }

    /// Open a new subscription after the previous one failed
    pub async fn resubscribe(&self) -> Result<(), FeedError> {
        self.request(|reply| Command::Resubscribe { reply }).await
    }

    /// Cancel the subscription and wait for the session task to stop.
    /// In-flight mutations are abandoned; their results are discarded.
    pub async fn close(mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

struct Worker {
    reconciler: FeedReconciler,
    source: Arc<dyn FeedSource>,
    backend: Arc<dyn PostBackend>,
    filter: FeedFilter,
    active: Option<ActiveSubscription>,
    view: watch::Sender<FeedView>,
    errors: mpsc::UnboundedSender<FeedError>,
    results: mpsc::UnboundedSender<MutationOutcome>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut results: mpsc::UnboundedReceiver<MutationOutcome>,
        check_interval: Duration,
    ) {
        self.subscribe();
        let mut ticker = interval(check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Close) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                event = next_event(&mut self.active) => self.handle_event(event),
                Some((ticket, outcome)) = results.recv() => {
                    if let Some(err) = self.reconciler.on_mutation_result(&ticket, outcome) {
                        self.surface(err);
                    }
                    self.publish();
                }
                _ = ticker.tick() => {
                    let errors = self.reconciler.poll_timeouts(Instant::now());
                    if !errors.is_empty() {
                        for err in errors {
                            self.surface(err);
                        }
                        self.publish();
                    }
                }
            }
        }

        if let Some(active) = self.active.take() {
            active.handle.cancel();
        }
        info!("Feed session for {:?} stopped", self.filter);
    }

    fn subscribe(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.source.subscribe(self.filter.clone(), tx);
        debug!("Feed subscription {} opened for {:?}", handle.id(), self.filter);
        self.active = Some(ActiveSubscription { handle, events: rx });
    }

    fn handle_event(&mut self, event: Option<FeedEvent>) {
        match event {
            Some(FeedEvent::Snapshot(snapshot)) => {
                for err in self.reconciler.on_snapshot(snapshot, Instant::now()) {
                    self.surface(err);
                }
            }
            Some(FeedEvent::Error(err)) => {
                let err = self.reconciler.on_subscription_error(err);
                self.drop_subscription();
                self.surface(err);
            }
            None => {
                let err = self
                    .reconciler
                    .on_subscription_error(FeedError::unavailable("feed stream ended"));
                self.drop_subscription();
                self.surface(err);
            }
        }
        self.publish();
    }

    fn drop_subscription(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.cancel();
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Create { draft, reply } => self.create(draft, reply),
            Command::Edit {
                post_id,
                content,
                reply,
            } => {
                let result = self
                    .reconciler
                    .begin_edit(&post_id, content, Instant::now())
                    .map(|req| self.dispatch(req));
                self.publish();
                let _ = reply.send(result);
            }
            Command::Delete { post_id, reply } => {
                let result = self
                    .reconciler
                    .begin_delete(&post_id, Instant::now())
                    .map(|req| self.dispatch(req));
                self.publish();
                let _ = reply.send(result);
            }
            Command::Resubscribe { reply } => {
                if self.active.is_none() {
                    info!("Resubscribing feed {:?}", self.filter);
                    self.reconciler.on_resubscribe();
                    self.subscribe();
                    self.publish();
                }
                let _ = reply.send(Ok(()));
            }
            Command::Close => {}
        }
    }

    fn create(&self, draft: PostDraft, reply: Reply<PostId>) {
        let Some(user) = self.reconciler.current_user() else {
            let _ = reply.send(Err(FeedError::not_authenticated()));
            return;
        };
        let new_post = match draft.into_new_post(&user.uid, &user.author_display_name()) {
            Ok(p) => p,
            Err(errors) => {
                let _ = reply.send(Err(FeedError::validation(errors.summary())));
                return;
            }
        };

        let backend = self.backend.clone();
        tokio::spawn(async move {
            let result = backend.create_post(new_post).await.map_err(|e| {
                warn!("Create post rejected: {}", e);
                FeedError::new(
                    ErrorKind::MutationFailure,
                    format!("create failed: {}", e.cause()),
                )
            });
            let _ = reply.send(result);
        });
    }

    /// Fire the remote call for an accepted optimistic mutation
    fn dispatch(&self, req: MutationRequest) {
        let backend = self.backend.clone();
        let results = self.results.clone();
        tokio::spawn(async move {
            let MutationRequest { ticket, op } = req;
            let outcome = match op {
                MutationOp::UpdateContent(content) => {
                    backend.update_post_content(&ticket.post_id, &content).await
                }
                MutationOp::Delete => backend.delete_post(&ticket.post_id).await,
            };
            // The session may already be gone
            let _ = results.send((ticket, outcome));
        });
    }

    fn surface(&self, err: FeedError) {
        let _ = self.errors.send(err);
    }

    fn publish(&self) {
        self.view.send_replace(FeedView {
            status: self.reconciler.status(),
            posts: self.reconciler.render(),
            pending: self.reconciler.pending().len(),
        });
    }
}
