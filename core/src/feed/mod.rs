/// Live feed: source contracts, reconciliation and the session driver
pub mod reconciler;
pub mod session;
pub mod source;

pub use reconciler::{FeedReconciler, FeedStatus, MutationKind, MutationTicket};
pub use session::{FeedSession, FeedView, SessionOptions};
pub use source::{FeedEvent, FeedFilter, FeedSource, PostBackend, Subscription};
