/// Contracts for the live feed query and the mutation calls behind it
use crate::error::{BackendError, FeedError};
use crate::post::{FeedSnapshot, NewPost, PostId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Which documents a feed subscription matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFilter {
    /// Every post (home feed)
    All,
    /// Posts by one author (profile view)
    Author(String),
}

impl FeedFilter {
    pub fn matches(&self, author_id: &str) -> bool {
        match self {
            FeedFilter::All => true,
            FeedFilter::Author(id) => id == author_id,
        }
    }
}

/// One delivery from a live subscription
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Complete current result set
    Snapshot(FeedSnapshot),
    /// The stream terminated; nothing follows
    Error(FeedError),
}

/// Handle to a live subscription.
///
/// Cancelling is idempotent. Dropping the handle cancels it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    pub fn new(id: u64) -> (Self, SubscriptionToken) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let token = SubscriptionToken {
            cancelled: cancelled.clone(),
        };
        (Self { id, cancelled }, token)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!("Subscription {} cancelled", self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Source-side view of a subscription's cancellation flag
#[derive(Debug, Clone)]
pub struct SubscriptionToken {
    cancelled: Arc<AtomicBool>,
}

impl SubscriptionToken {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Live query over the post collection.
///
/// Implementations deliver a `Snapshot` at least once after `subscribe` and
/// again whenever the matching set changes, always with the full ordered
/// result set. At most one `Error` may be delivered, after which the
/// subscription is dead.
pub trait FeedSource: Send + Sync {
    fn subscribe(&self, filter: FeedFilter, sink: mpsc::UnboundedSender<FeedEvent>)
        -> Subscription;
}

/// Remote mutation calls. Each is at-most-once; callers do not retry.
#[async_trait]
pub trait PostBackend: Send + Sync {
    async fn create_post(&self, post: NewPost) -> std::result::Result<PostId, BackendError>;

    async fn update_post_content(
        &self,
        id: &PostId,
        content: &str,
    ) -> std::result::Result<(), BackendError>;

    async fn delete_post(&self, id: &PostId) -> std::result::Result<(), BackendError>;
}
