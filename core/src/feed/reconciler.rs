/// Feed reconciliation: authoritative snapshots plus optimistic edit/delete
///
/// Snapshots are full replacements. Local mutations by the current user are
/// overlaid until a snapshot confirms them, the backend rejects them, or they
/// outlive the pending timeout. The remote snapshot wins once it arrives.
use crate::auth::CurrentUser;
use crate::error::{BackendError, ErrorKind, FeedError};
use crate::post::{validate_edit, FeedSnapshot, Post, PostId};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Edit,
    Delete,
}

/// Identifies one optimistic mutation. Results for superseded tickets are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MutationTicket {
    pub post_id: PostId,
    pub kind: MutationKind,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    UpdateContent(String),
    Delete,
}

/// Remote call the caller must issue after a successful `begin_*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub ticket: MutationTicket,
    pub op: MutationOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticEdit {
    pub post_id: PostId,
    pub new_content: String,
    pub submitted_at: Instant,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticDelete {
    pub post_id: PostId,
    pub submitted_at: Instant,
    pub seq: u64,
}

/// In-flight optimistic mutations, at most one per post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingOps {
    edits: HashMap<PostId, OptimisticEdit>,
    deletes: HashMap<PostId, OptimisticDelete>,
}

impl PendingOps {
    pub fn edit(&self, id: &PostId) -> Option<&OptimisticEdit> {
        self.edits.get(id)
    }

    pub fn delete(&self, id: &PostId) -> Option<&OptimisticDelete> {
        self.deletes.get(id)
    }

    pub fn insert_edit(&mut self, edit: OptimisticEdit) {
        self.deletes.remove(&edit.post_id);
        self.edits.insert(edit.post_id.clone(), edit);
    }

    /// A delete supersedes any pending edit on the same post
    pub fn insert_delete(&mut self, delete: OptimisticDelete) {
        self.edits.remove(&delete.post_id);
        self.deletes.insert(delete.post_id.clone(), delete);
    }

    pub fn len(&self) -> usize {
        self.edits.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty() && self.deletes.is_empty()
    }
}

fn is_expired(submitted_at: Instant, now: Instant, timeout: Duration) -> bool {
    now.saturating_duration_since(submitted_at) > timeout
}

fn save_timeout(post_id: &PostId, timeout: Duration) -> FeedError {
    FeedError::for_post(
        ErrorKind::Timeout,
        post_id,
        format!("save failed: not confirmed within {}s", timeout.as_secs()),
    )
}

fn delete_timeout(post_id: &PostId, timeout: Duration) -> FeedError {
    FeedError::for_post(
        ErrorKind::Timeout,
        post_id,
        format!("delete failed: not confirmed within {}s", timeout.as_secs()),
    )
}

/// Reconcile pending mutations against a fresh snapshot.
///
/// Returns the entries that remain pending and the errors to surface, the
/// latter in snapshot order.
pub fn reconcile(
    snapshot: &FeedSnapshot,
    pending: PendingOps,
    now: Instant,
    timeout: Duration,
) -> (PendingOps, Vec<FeedError>) {
    let PendingOps { edits, deletes } = pending;
    let mut kept = PendingOps::default();
    let mut failures: Vec<(usize, FeedError)> = Vec::new();
    let position = |id: &PostId| snapshot.posts().iter().position(|p| &p.id == id);

    for (id, edit) in edits {
        let Some(idx) = position(&id) else {
            debug!("Post {} gone from feed, dropping pending edit", id);
            continue;
        };
        let post = &snapshot.posts()[idx];
        if post.content == edit.new_content {
            debug!("Edit on {} confirmed", id);
        } else if is_expired(edit.submitted_at, now, timeout) {
            warn!("Edit on {} timed out, reverting", id);
            failures.push((idx, save_timeout(&id, timeout)));
        } else {
            kept.edits.insert(id, edit);
        }
    }

    for (id, delete) in deletes {
        match position(&id) {
            None => debug!("Delete of {} confirmed", id),
            Some(idx) if is_expired(delete.submitted_at, now, timeout) => {
                warn!("Delete of {} timed out, restoring post", id);
                failures.push((idx, delete_timeout(&id, timeout)));
            }
            Some(_) => {
                kept.deletes.insert(id, delete);
            }
        }
    }

    failures.sort_by_key(|(idx, _)| *idx);
    (kept, failures.into_iter().map(|(_, e)| e).collect())
}

/// Drop entries older than `timeout` regardless of snapshot arrival.
pub fn expire(
    pending: PendingOps,
    now: Instant,
    timeout: Duration,
) -> (PendingOps, Vec<FeedError>) {
    let PendingOps { edits, deletes } = pending;
    let mut kept = PendingOps::default();
    let mut failures: Vec<(u64, FeedError)> = Vec::new();

    for (id, edit) in edits {
        if is_expired(edit.submitted_at, now, timeout) {
            warn!("Edit on {} timed out without confirmation", id);
            failures.push((edit.seq, save_timeout(&id, timeout)));
        } else {
            kept.edits.insert(id, edit);
        }
    }
    for (id, delete) in deletes {
        if is_expired(delete.submitted_at, now, timeout) {
            warn!("Delete of {} timed out without confirmation", id);
            failures.push((delete.seq, delete_timeout(&id, timeout)));
        } else {
            kept.deletes.insert(id, delete);
        }
    }

    failures.sort_by_key(|(seq, _)| *seq);
    (kept, failures.into_iter().map(|(_, e)| e).collect())
}

/// Posts to render: snapshot order, edits overlaid, deletes hidden.
pub fn overlay(snapshot: &FeedSnapshot, pending: &PendingOps) -> Vec<Post> {
    snapshot
        .posts()
        .iter()
        .filter(|p| pending.delete(&p.id).is_none())
        .map(|p| match pending.edit(&p.id) {
            Some(edit) => Post {
                content: edit.new_content.clone(),
                ..p.clone()
            },
            None => p.clone(),
        })
        .collect()
}

/// Lifecycle of the feed's live subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    /// Waiting for the first snapshot
    Loading,
    Live,
    /// The subscription terminated; an explicit resubscribe is required
    Unavailable,
}

/// Render state for one feed view.
///
/// Not thread-safe by intent: drive it from a single event context.
#[derive(Debug)]
pub struct FeedReconciler {
    user: Option<CurrentUser>,
    pending_timeout: Duration,
    snapshot: Option<FeedSnapshot>,
    pending: PendingOps,
    status: FeedStatus,
    next_seq: u64,
}

impl FeedReconciler {
    pub fn new(user: Option<CurrentUser>) -> Self {
        Self::with_timeout(user, DEFAULT_PENDING_TIMEOUT)
    }

    pub fn with_timeout(user: Option<CurrentUser>, pending_timeout: Duration) -> Self {
        Self {
            user,
            pending_timeout,
            snapshot: None,
            pending: PendingOps::default(),
            status: FeedStatus::Loading,
            next_seq: 1,
        }
    }

    pub fn current_user(&self) -> Option<&CurrentUser> {
        self.user.as_ref()
    }

    pub fn status(&self) -> FeedStatus {
        self.status
    }

    pub fn pending(&self) -> &PendingOps {
        &self.pending
    }

    pub fn render(&self) -> Vec<Post> {
        self.snapshot
            .as_ref()
            .map(|s| overlay(s, &self.pending))
            .unwrap_or_default()
    }

    /// Replace the authoritative state with `snapshot`.
    pub fn on_snapshot(&mut self, snapshot: FeedSnapshot, now: Instant) -> Vec<FeedError> {
        let pending = std::mem::take(&mut self.pending);
        let (pending, errors) = reconcile(&snapshot, pending, now, self.pending_timeout);
        debug!(
            "Snapshot with {} posts applied, {} mutations pending",
            snapshot.len(),
            pending.len()
        );
        self.pending = pending;
        self.snapshot = Some(snapshot);
        self.status = FeedStatus::Live;
        errors
    }

    /// Expire stale optimistic entries when no snapshot has arrived.
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<FeedError> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let pending = std::mem::take(&mut self.pending);
        let (pending, errors) = expire(pending, now, self.pending_timeout);
        self.pending = pending;
        errors
    }

    /// Mark the subscription dead. The last snapshot stays rendered.
    pub fn on_subscription_error(&mut self, error: FeedError) -> FeedError {
        warn!("Feed subscription terminated: {}", error.message);
        self.status = FeedStatus::Unavailable;
        if error.kind == ErrorKind::Subscription {
            error
        } else {
            FeedError::unavailable(error.message)
        }
    }

    /// Prepare for a fresh subscription after `on_subscription_error`.
    pub fn on_resubscribe(&mut self) {
        self.status = FeedStatus::Loading;
    }

    fn require_own_post(&self, post_id: &PostId) -> Result<&Post, FeedError> {
        let user = self.user.as_ref().ok_or_else(FeedError::not_authenticated)?;
        let post = self
            .snapshot
            .as_ref()
            .and_then(|s| s.get(post_id))
            .ok_or_else(|| FeedError::for_post(ErrorKind::NotFound, post_id, "post not found"))?;
        if !post.is_owned_by(&user.uid) {
            return Err(FeedError::for_post(
                ErrorKind::Forbidden,
                post_id,
                "only the author can change this post",
            ));
        }
        Ok(post)
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Record an optimistic content edit and return the remote call to make.
    pub fn begin_edit(
        &mut self,
        post_id: &PostId,
        new_content: impl Into<String>,
        now: Instant,
    ) -> Result<MutationRequest, FeedError> {
        let new_content = new_content.into();
        let post = self.require_own_post(post_id)?;
        if self.pending.delete(post_id).is_some() {
            return Err(FeedError::for_post(
                ErrorKind::Conflict,
                post_id,
                "post is being deleted",
            ));
        }
        validate_edit(post, &new_content).map_err(|msg| FeedError {
            post_id: Some(post_id.clone()),
            ..FeedError::validation(msg)
        })?;

        let seq = self.take_seq();
        if self.pending.edit(post_id).is_some() {
            debug!("Replacing pending edit on {}", post_id);
        }
        self.pending.insert_edit(OptimisticEdit {
            post_id: post_id.clone(),
            new_content: new_content.clone(),
            submitted_at: now,
            seq,
        });
        info!("Edit #{} on {} pending", seq, post_id);

        Ok(MutationRequest {
            ticket: MutationTicket {
                post_id: post_id.clone(),
                kind: MutationKind::Edit,
                seq,
            },
            op: MutationOp::UpdateContent(new_content),
        })
    }

    /// Hide a post optimistically and return the remote call to make.
    pub fn begin_delete(
        &mut self,
        post_id: &PostId,
        now: Instant,
    ) -> Result<MutationRequest, FeedError> {
        self.require_own_post(post_id)?;
        if self.pending.delete(post_id).is_some() {
            return Err(FeedError::for_post(
                ErrorKind::Conflict,
                post_id,
                "post is already being deleted",
            ));
        }
        if self.pending.edit(post_id).is_some() {
            debug!("Delete of {} supersedes pending edit", post_id);
        }

        let seq = self.take_seq();
        self.pending.insert_delete(OptimisticDelete {
            post_id: post_id.clone(),
            submitted_at: now,
            seq,
        });
        info!("Delete #{} of {} pending", seq, post_id);

        Ok(MutationRequest {
            ticket: MutationTicket {
                post_id: post_id.clone(),
                kind: MutationKind::Delete,
                seq,
            },
            op: MutationOp::Delete,
        })
    }

    /// Apply the backend's answer to a mutation.
    ///
    /// A failure reverts the optimistic entry immediately. A success leaves it
    /// in place until a snapshot confirms it. Results whose entry is already
    /// gone are ignored.
    pub fn on_mutation_result(
        &mut self,
        ticket: &MutationTicket,
        outcome: std::result::Result<(), BackendError>,
    ) -> Option<FeedError> {
        let live = match ticket.kind {
            MutationKind::Edit => self
                .pending
                .edit(&ticket.post_id)
                .is_some_and(|e| e.seq == ticket.seq),
            MutationKind::Delete => self
                .pending
                .delete(&ticket.post_id)
                .is_some_and(|d| d.seq == ticket.seq),
        };
        if !live {
            debug!(
                "Ignoring result for settled {:?} #{} on {}",
                ticket.kind, ticket.seq, ticket.post_id
            );
            return None;
        }

        let err = outcome.err()?;
        match ticket.kind {
            MutationKind::Edit => {
                self.pending.edits.remove(&ticket.post_id);
            }
            MutationKind::Delete => {
                self.pending.deletes.remove(&ticket.post_id);
            }
        }
        warn!(
            "{:?} #{} on {} rejected: {}",
            ticket.kind, ticket.seq, ticket.post_id, err
        );
        let verb = match ticket.kind {
            MutationKind::Edit => "save failed",
            MutationKind::Delete => "delete failed",
        };
        Some(FeedError::for_post(
            ErrorKind::MutationFailure,
            &ticket.post_id,
            format!("{}: {}", verb, err.cause()),
        ))
    }
}
