/// Voxie - social feed client core
///
/// Live feed reconciliation with optimistic edit/delete over a push-updated
/// post collection, plus the local store, form rules and view state used by
/// the terminal client.

pub mod auth;
pub mod cli_app;
pub mod config;
pub mod error;
pub mod feed;
pub mod local_store;
pub mod post;
pub mod ui_state;

pub use auth::CurrentUser;
pub use config::Config;
pub use error::{ErrorKind, FeedError, Result, VoxieError};
pub use feed::{FeedReconciler, FeedSession};
pub use local_store::LocalBackend;
pub use post::{FeedSnapshot, Post, PostDraft, PostId};
