/// Embedded post collection with live queries, backed by sled
///
/// Stands in for the hosted document database: assigns ids and creation
/// timestamps, answers feed subscriptions with full ordered snapshots, and
/// executes mutation calls. Also keeps the account registry the auth flows
/// sign in against. Keys are `post:<id>` and `account:<email>`, values JSON.
use crate::auth::{AuthProvider, CurrentUser, LoginForm, RegistrationForm};
use crate::error::{BackendError, FeedError, Result, VoxieError};
use crate::feed::source::{
    FeedEvent, FeedFilter, FeedSource, PostBackend, Subscription, SubscriptionToken,
};
use crate::post::{FeedSnapshot, NewPost, Post, PostId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "post:";
const ACCOUNT_PREFIX: &str = "account:";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAccount {
    user: CurrentUser,
    salt: String,
    password_hash: String,
}

fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPost {
    /// Insertion order, breaks `created_at` ties
    seq: u64,
    post: Post,
}

struct Subscriber {
    id: u64,
    filter: FeedFilter,
    sink: mpsc::UnboundedSender<FeedEvent>,
    token: SubscriptionToken,
}

#[derive(Default)]
struct Hub {
    subscribers: Vec<Subscriber>,
    next_subscription_id: u64,
    next_seq: u64,
    last_created_at: Option<DateTime<Utc>>,
}

struct Inner {
    db: sled::Db,
    hub: Mutex<Hub>,
    faults: Mutex<VecDeque<BackendError>>,
    /// Mutation calls park while this reads `true`
    stalled: watch::Sender<bool>,
}

/// Local post store implementing both the live query and the mutation calls
#[derive(Clone)]
pub struct LocalBackend {
    inner: Arc<Inner>,
}

impl LocalBackend {
    /// Open (or create) the store in the given data directory
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("posts.db");
        debug!("Opening post store at {:?}", db_path);
        let db = sled::open(&db_path)
            .map_err(|e| VoxieError::Storage(format!("Failed to open post store: {}", e)))?;
        let backend = Self::from_db(db)?;
        info!("Post store initialized at {:?}", db_path);
        Ok(backend)
    }

    /// In-memory store discarded on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| VoxieError::Storage(format!("Failed to open temporary store: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let stored = load_all(&db)?;
        let hub = Hub {
            next_seq: stored.iter().map(|s| s.seq + 1).max().unwrap_or(0),
            last_created_at: stored.iter().map(|s| s.post.created_at).max(),
            ..Default::default()
        };
        Ok(Self {
            inner: Arc::new(Inner {
                db,
                hub: Mutex::new(hub),
                faults: Mutex::new(VecDeque::new()),
                stalled: watch::channel(false).0,
            }),
        })
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.inner.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current ordered result set for `filter`
    pub fn snapshot(&self, filter: &FeedFilter) -> Result<FeedSnapshot> {
        Ok(build_snapshot(load_all(&self.inner.db)?, filter))
    }

    pub fn count(&self) -> usize {
        self.inner.db.scan_prefix(KEY_PREFIX.as_bytes()).count()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let mut hub = self.hub();
        hub.subscribers.retain(|s| !s.token.is_cancelled());
        hub.subscribers.len()
    }

    /// Make the next mutation call fail with `error`
    pub fn fail_next_mutation(&self, error: BackendError) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// While stalled, mutation calls park. Clearing the flag releases them.
    pub fn set_stalled(&self, stalled: bool) {
        self.inner.stalled.send_replace(stalled);
    }

    /// End every live subscription with an error
    pub fn terminate_subscriptions(&self, message: &str) {
        let mut hub = self.hub();
        for sub in hub.subscribers.drain(..) {
            if !sub.token.is_cancelled() {
                warn!("Terminating subscription {}", sub.id);
                let _ = sub.sink.send(FeedEvent::Error(FeedError::unavailable(message)));
            }
        }
    }

    async fn before_mutation(&self) -> std::result::Result<(), BackendError> {
        let mut stalled = self.inner.stalled.subscribe();
        if *stalled.borrow_and_update() {
            debug!("Backend stalled, parking mutation");
            // The sender lives as long as `self`
            let _ = stalled.wait_for(|stalled| !*stalled).await;
        }
        let fault = self
            .inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Push a fresh snapshot to every subscriber, pruning dead ones.
    fn publish(&self, hub: &mut Hub) -> Result<()> {
        let stored = load_all(&self.inner.db)?;
        hub.subscribers.retain(|sub| {
            if sub.token.is_cancelled() {
                debug!("Pruning cancelled subscription {}", sub.id);
                return false;
            }
            let snapshot = build_snapshot(stored.clone(), &sub.filter);
            sub.sink.send(FeedEvent::Snapshot(snapshot)).is_ok()
        });
        Ok(())
    }

    fn write(&self, stored: &StoredPost) -> Result<()> {
        let key = format!("{}{}", KEY_PREFIX, stored.post.id);
        let value = serde_json::to_vec(stored).map_err(VoxieError::Serialization)?;
        self.inner
            .db
            .insert(key.as_bytes(), value)
            .map_err(|e| VoxieError::Storage(format!("Failed to store post: {}", e)))?;
        self.inner
            .db
            .flush()
            .map_err(|e| VoxieError::Storage(format!("Failed to flush post store: {}", e)))?;
        Ok(())
    }

    fn read(&self, id: &PostId) -> Result<Option<StoredPost>> {
        let key = format!("{}{}", KEY_PREFIX, id);
        match self.inner.db.get(key.as_bytes()) {
            Ok(Some(value)) => Ok(Some(serde_json::from_slice(&value)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(VoxieError::Storage(format!("Failed to fetch post: {}", e))),
        }
    }

    fn insert_post(&self, new_post: NewPost) -> Result<PostId> {
        let mut hub = self.hub();

        // Creation timestamps are strictly increasing per insert
        let mut created_at = Utc::now();
        if let Some(last) = hub.last_created_at {
            if created_at <= last {
                created_at = last + chrono::Duration::microseconds(1);
            }
        }
        hub.last_created_at = Some(created_at);
        let seq = hub.next_seq;
        hub.next_seq += 1;

        let id = PostId::new(Uuid::new_v4().simple().to_string());
        let stored = StoredPost {
            seq,
            post: Post {
                id: id.clone(),
                title: new_post.title,
                content: new_post.content,
                author_id: new_post.author_id,
                author_display_name: new_post.author_display_name,
                created_at,
                updated_at: None,
            },
        };
        self.write(&stored)?;
        info!("Post {} created", id);
        self.publish(&mut hub)?;
        Ok(id)
    }

    fn update_content(&self, id: &PostId, content: &str) -> Result<bool> {
        let mut hub = self.hub();
        let Some(mut stored) = self.read(id)? else {
            return Ok(false);
        };
        stored.post.content = content.to_string();
        stored.post.updated_at = Some(Utc::now());
        self.write(&stored)?;
        debug!("Post {} updated", id);
        self.publish(&mut hub)?;
        Ok(true)
    }

    fn remove_post(&self, id: &PostId) -> Result<bool> {
        let mut hub = self.hub();
        let key = format!("{}{}", KEY_PREFIX, id);
        let removed = self
            .inner
            .db
            .remove(key.as_bytes())
            .map_err(|e| VoxieError::Storage(format!("Failed to delete post: {}", e)))?;
        if removed.is_none() {
            return Ok(false);
        }
        debug!("Post {} deleted", id);
        self.publish(&mut hub)?;
        Ok(true)
    }
}

impl LocalBackend {
    fn account_key(email: &str) -> String {
        format!("{}{}", ACCOUNT_PREFIX, email.trim().to_lowercase())
    }

    fn read_account(&self, email: &str) -> Result<Option<StoredAccount>> {
        match self.inner.db.get(Self::account_key(email).as_bytes()) {
            Ok(Some(value)) => Ok(Some(serde_json::from_slice(&value)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(VoxieError::Storage(format!("Failed to fetch account: {}", e))),
        }
    }

    fn create_account(&self, form: &RegistrationForm) -> Result<Option<CurrentUser>> {
        let user = CurrentUser::from_email(&form.email, None)
            .with_display_name(form.username.trim());
        let salt = Uuid::new_v4().simple().to_string();
        let account = StoredAccount {
            password_hash: password_digest(&salt, &form.password),
            salt,
            user: user.clone(),
        };
        let value = serde_json::to_vec(&account)?;

        // Only the first registration for an email wins
        let swapped = self
            .inner
            .db
            .compare_and_swap(
                Self::account_key(&form.email).as_bytes(),
                None as Option<&[u8]>,
                Some(value),
            )
            .map_err(|e| VoxieError::Storage(format!("Failed to store account: {}", e)))?;
        if swapped.is_err() {
            return Ok(None);
        }
        self.inner
            .db
            .flush()
            .map_err(|e| VoxieError::Storage(format!("Failed to flush account: {}", e)))?;
        info!("Account {} registered", user.uid);
        Ok(Some(user))
    }
}

fn load_all(db: &sled::Db) -> Result<Vec<StoredPost>> {
    let mut out = Vec::new();
    for entry in db.scan_prefix(KEY_PREFIX.as_bytes()) {
        let (_, value) =
            entry.map_err(|e| VoxieError::Storage(format!("Failed to list posts: {}", e)))?;
        match serde_json::from_slice::<StoredPost>(&value) {
            Ok(stored) => out.push(stored),
            Err(e) => warn!("Skipping unreadable post record: {}", e),
        }
    }
    Ok(out)
}

fn build_snapshot(mut stored: Vec<StoredPost>, filter: &FeedFilter) -> FeedSnapshot {
    stored.retain(|s| filter.matches(&s.post.author_id));
    stored.sort_by(|a, b| {
        b.post
            .created_at
            .cmp(&a.post.created_at)
            .then_with(|| b.seq.cmp(&a.seq))
    });
    FeedSnapshot::new(stored.into_iter().map(|s| s.post).collect())
}

fn unavailable(err: VoxieError) -> BackendError {
    BackendError::new("unavailable", err.to_string())
}

fn not_found(id: &PostId) -> BackendError {
    BackendError::new("not-found", format!("no post with id {}", id))
}

impl FeedSource for LocalBackend {
    fn subscribe(
        &self,
        filter: FeedFilter,
        sink: mpsc::UnboundedSender<FeedEvent>,
    ) -> Subscription {
        let mut hub = self.hub();
        let id = hub.next_subscription_id;
        hub.next_subscription_id += 1;
        let (subscription, token) = Subscription::new(id);

        let initial = match self.snapshot(&filter) {
            Ok(snapshot) => FeedEvent::Snapshot(snapshot),
            Err(e) => {
                // Terminal: the subscriber is never registered
                let _ = sink.send(FeedEvent::Error(FeedError::unavailable(e.to_string())));
                return subscription;
            }
        };
        if sink.send(initial).is_ok() {
            debug!("Subscription {} registered for {:?}", id, filter);
            hub.subscribers.push(Subscriber {
                id,
                filter,
                sink,
                token,
            });
        }
        subscription
    }
}

#[async_trait]
impl PostBackend for LocalBackend {
    async fn create_post(&self, post: NewPost) -> std::result::Result<PostId, BackendError> {
        self.before_mutation().await?;
        self.insert_post(post).map_err(unavailable)
    }

    async fn update_post_content(
        &self,
        id: &PostId,
        content: &str,
    ) -> std::result::Result<(), BackendError> {
        self.before_mutation().await?;
        match self.update_content(id, content).map_err(unavailable)? {
            true => Ok(()),
            false => Err(not_found(id)),
        }
    }

    async fn delete_post(&self, id: &PostId) -> std::result::Result<(), BackendError> {
        self.before_mutation().await?;
        match self.remove_post(id).map_err(unavailable)? {
            true => Ok(()),
            false => Err(not_found(id)),
        }
    }
}

#[async_trait]
impl AuthProvider for LocalBackend {
    async fn sign_up(
        &self,
        form: &RegistrationForm,
    ) -> std::result::Result<CurrentUser, BackendError> {
        match self.create_account(form).map_err(unavailable)? {
            Some(user) => Ok(user),
            None => Err(BackendError::new(
                "auth/email-already-in-use",
                format!("{} is already registered", form.email.trim()),
            )),
        }
    }

    async fn sign_in(&self, form: &LoginForm) -> std::result::Result<CurrentUser, BackendError> {
        let Some(account) = self.read_account(&form.email).map_err(unavailable)? else {
            return Err(BackendError::new("auth/user-not-found", "no such account"));
        };
        if password_digest(&account.salt, &form.password) != account.password_hash {
            warn!("Rejected sign-in for {}", account.user.uid);
            return Err(BackendError::new("auth/wrong-password", "password mismatch"));
        }
        debug!("Signed in {}", account.user.uid);
        Ok(account.user)
    }
}
