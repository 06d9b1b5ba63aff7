//! Client-side sync core: keeps a feed of posts and the signed-in user's
//! profile coherent with the backend.
//!
//! A [`FeedSynchronizer`] loads the feed, patches author avatars in place as
//! profile change events arrive and publishes snapshots to the view layer.
//! A [`ProfileMirror`] does the same for the user's own profile. Both own a
//! [`SubscriptionManager`] that closes their live subscriptions on unmount.

pub mod config;
pub mod error;
pub mod feed;
pub mod notify;
pub mod profile;
pub mod subscriptions;
pub mod view;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use ripple_gateway::Gateway;
use ripple_types::models::AuthUser;

pub use config::{Policy, SyncConfig, TeardownPolicy};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use feed::{FeedSnapshot, FeedSynchronizer, LoadOutcome, WeakFeed};
pub use notify::{ChannelNotifier, Notice, Notifier, NullNotifier, Severity, TracingNotifier};
pub use profile::{ProfileMirror, ProfileSnapshot};
pub use subscriptions::SubscriptionManager;
pub use view::{AuthorPatch, PatchStats, PostView};

pub const MISSING_SESSION_MESSAGE: &str = "Sign in to continue";

/// Everything a sync component needs from its surroundings: the backend,
/// somewhere to send user-visible notices, and the policies to apply.
pub struct SyncContext<G> {
    pub gateway: Arc<G>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<SyncConfig>,
}

impl<G> Clone for SyncContext<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            notifier: self.notifier.clone(),
            config: self.config.clone(),
        }
    }
}

impl<G: Gateway> SyncContext<G> {
    pub fn new(gateway: Arc<G>, notifier: Arc<dyn Notifier>, config: SyncConfig) -> Self {
        Self {
            gateway,
            notifier,
            config: Arc::new(config),
        }
    }

    /// Log `err` and raise at most one notice for it.
    ///
    /// A missing session follows the configured policy; everything else
    /// surfaces as `message`.
    pub fn report(&self, message: &str, err: &SyncError) {
        match err {
            SyncError::AuthRequired => match self.config.missing_session {
                Policy::Silent => warn!("{}: no signed-in user", message),
                Policy::Notify => {
                    warn!("{}: no signed-in user", message);
                    self.notifier
                        .notify(Notice::error(MISSING_SESSION_MESSAGE, ErrorKind::AuthRequired));
                }
            },
            other => {
                error!("{}: {}", message, other);
                self.notifier.notify(Notice::error(message, other.kind()));
            }
        }
    }

    pub(crate) async fn require_user(&self) -> SyncResult<AuthUser> {
        match self.gateway.current_user().await? {
            Some(user) => Ok(user),
            None => {
                debug!("current_user returned no session");
                Err(SyncError::AuthRequired)
            }
        }
    }
}

pub(crate) fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>, what: &'static str) -> SyncResult<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(SyncError::decode(what)))
        .collect()
}
