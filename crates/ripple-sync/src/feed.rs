use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ripple_gateway::{Gateway, Query};
use ripple_types::events::Table;
use ripple_types::models::{NewPost, Post};

use crate::config::Policy;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::notify::Notice;
use crate::subscriptions::SubscriptionManager;
use crate::view::{AuthorPatch, PatchStats, PostView};
use crate::{SyncContext, decode_rows};

pub const LOAD_FAILED_MESSAGE: &str = "Something went wrong";
pub const CREATE_FAILED_MESSAGE: &str = "Failed to share post";
pub const LIVE_UPDATES_FAILED_MESSAGE: &str = "Live updates are unavailable";

/// What the view layer renders.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub posts: Vec<Arc<Post>>,
    /// Any load or refresh is in flight.
    pub loading: bool,
    /// A user-initiated refresh is in flight.
    pub refreshing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The result replaced the view.
    Applied { posts: usize },
    /// The load failed; the view was cleared and one notice raised.
    Failed(ErrorKind),
    /// A newer load was issued before this one resolved.
    Superseded,
    /// The feed was unmounted before this load resolved.
    Detached,
}

struct FeedState {
    view: PostView,
    /// Sequence number of the most recently issued load.
    issued: u64,
    in_flight: usize,
    refreshes_in_flight: usize,
    /// Patches applied while a load was in flight, replayed on top of its
    /// result so a slow response cannot undo a newer live change.
    journal: Vec<(String, AuthorPatch)>,
    detached: bool,
}

impl FeedState {
    fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            posts: self.view.snapshot(),
            loading: !self.detached && self.in_flight > 0,
            refreshing: !self.detached && self.refreshes_in_flight > 0,
        }
    }
}

struct FeedInner<G: Gateway> {
    ctx: SyncContext<G>,
    state: Mutex<FeedState>,
    snapshot: watch::Sender<FeedSnapshot>,
    subscriptions: SubscriptionManager<G>,
}

/// Keeps the home feed coherent with the backend.
///
/// Cheap to clone; clones share one feed.
pub struct FeedSynchronizer<G: Gateway> {
    inner: Arc<FeedInner<G>>,
}

impl<G: Gateway> Clone for FeedSynchronizer<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Non-owning handle, used by subscriptions and other components so they
/// do not keep an unmounted feed alive.
pub struct WeakFeed<G: Gateway> {
    inner: Weak<FeedInner<G>>,
}

impl<G: Gateway> Clone for WeakFeed<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<G: Gateway> WeakFeed<G> {
    pub fn upgrade(&self) -> Option<FeedSynchronizer<G>> {
        self.inner.upgrade().map(|inner| FeedSynchronizer { inner })
    }
}

#[derive(Deserialize)]
struct Inserted {
    id: String,
}

impl<G: Gateway> FeedSynchronizer<G> {
    pub fn new(ctx: SyncContext<G>) -> Self {
        let subscriptions = SubscriptionManager::new(ctx.gateway.clone(), ctx.config.teardown);
        let (snapshot, _) = watch::channel(FeedSnapshot::default());
        Self {
            inner: Arc::new(FeedInner {
                ctx,
                state: Mutex::new(FeedState {
                    view: PostView::new(),
                    issued: 0,
                    in_flight: 0,
                    refreshes_in_flight: 0,
                    journal: Vec::new(),
                    detached: false,
                }),
                snapshot,
                subscriptions,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakFeed<G> {
        WeakFeed {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // -- Lifecycle --

    /// Subscribe to profile changes, then load the feed.
    pub async fn mount(&self) -> LoadOutcome {
        self.inner.state.lock().detached = false;

        let weak = self.downgrade();
        let channel = self.inner.ctx.config.profile_channel.clone();
        let subscribed = self
            .inner
            .subscriptions
            .subscribe_to_profile_updates(&channel, move |profile| {
                if let Some(feed) = weak.upgrade() {
                    feed.apply_avatar_patch(&profile.id, profile.avatar_url);
                }
            })
            .await;
        if let Err(e) = subscribed {
            self.inner.ctx.report(LIVE_UPDATES_FAILED_MESSAGE, &e);
        }

        self.load().await
    }

    /// Close subscriptions and discard the view. Loads still in flight are
    /// dropped when they resolve.
    pub fn unmount(&self) {
        let closed = self.inner.subscriptions.teardown();
        let mut state = self.inner.state.lock();
        state.detached = true;
        state.issued += 1;
        state.view.clear();
        state.journal.clear();
        self.publish(&state);
        info!("Feed unmounted ({} subscriptions closed)", closed);
    }

    // -- Loading --

    pub async fn load(&self) -> LoadOutcome {
        self.run_load(false).await
    }

    /// Same as [`load`](Self::load) but flagged as `refreshing` while in flight.
    pub async fn refresh(&self) -> LoadOutcome {
        self.run_load(true).await
    }

    async fn run_load(&self, refresh: bool) -> LoadOutcome {
        let seq = {
            let mut state = self.inner.state.lock();
            if state.detached {
                debug!("Ignoring load on unmounted feed");
                return LoadOutcome::Detached;
            }
            state.issued += 1;
            state.in_flight += 1;
            if refresh {
                state.refreshes_in_flight += 1;
            }
            self.publish(&state);
            state.issued
        };

        let result = self.fetch_posts().await;

        let mut state = self.inner.state.lock();
        state.in_flight -= 1;
        if refresh {
            state.refreshes_in_flight -= 1;
        }

        let mut failure = None;
        let outcome = if state.detached {
            debug!("Load {} resolved after unmount, dropping it", seq);
            LoadOutcome::Detached
        } else if seq != state.issued {
            debug!("Load {} superseded by load {}", seq, state.issued);
            LoadOutcome::Superseded
        } else {
            match result {
                Ok(posts) => {
                    state.view.replace_all(posts);
                    let journal = std::mem::take(&mut state.journal);
                    for (user_id, patch) in &journal {
                        state.view.patch_by_user_id(user_id, patch);
                    }
                    if !journal.is_empty() {
                        debug!("Replayed {} live patches onto load {}", journal.len(), seq);
                    }
                    state.journal = journal;
                    info!("Loaded {} posts", state.view.len());
                    LoadOutcome::Applied {
                        posts: state.view.len(),
                    }
                }
                Err(e) => {
                    state.view.clear();
                    let kind = e.kind();
                    failure = Some(e);
                    LoadOutcome::Failed(kind)
                }
            }
        };

        if state.in_flight == 0 {
            state.journal.clear();
        }
        self.publish(&state);
        drop(state);

        if let Some(e) = failure {
            self.inner.ctx.report(LOAD_FAILED_MESSAGE, &e);
        }
        outcome
    }

    async fn fetch_posts(&self) -> SyncResult<Vec<Post>> {
        let query = Query::from(Table::Posts).order("created_at", false).with_author();
        let rows = self.inner.ctx.gateway.query(query).await?;
        decode_rows(rows, "post")
    }

    // -- Patching --

    /// Point every post by `user_id` at a new avatar. Returns what matched.
    pub fn apply_avatar_patch(&self, user_id: &str, avatar_url: Option<String>) -> PatchStats {
        let (stats, journaled) = self.patch_author(user_id, AuthorPatch::avatar(avatar_url));

        if stats.matched == 0 && !journaled {
            match self.inner.ctx.config.unmatched_patch {
                Policy::Silent => debug!("Avatar change for {} matched no posts", user_id),
                Policy::Notify => {
                    debug!("Avatar change for {} matched no posts", user_id);
                    self.inner
                        .ctx
                        .notifier
                        .notify(Notice::info(format!("No posts by {} to update", user_id)));
                }
            }
        } else if stats.changed > 0 {
            debug!("Patched avatar on {} posts by {}", stats.changed, user_id);
        }
        stats
    }

    /// Apply `patch` without consulting the unmatched-patch policy.
    /// Returns the stats and whether the patch was journaled.
    pub(crate) fn patch_author(&self, user_id: &str, patch: AuthorPatch) -> (PatchStats, bool) {
        let mut state = self.inner.state.lock();
        if state.detached {
            return (PatchStats::default(), false);
        }

        let stats = state.view.patch_by_user_id(user_id, &patch);
        let journaled = state.in_flight > 0;
        if journaled {
            state.journal.push((user_id.to_string(), patch));
        }
        if stats.changed > 0 {
            self.publish(&state);
        }
        (stats, journaled)
    }

    // -- Posting --

    /// Share a post as the signed-in user. The feed is not touched; new
    /// posts show up on the next refresh.
    pub async fn try_create_post(&self, post: NewPost) -> SyncResult<String> {
        let user = self.inner.ctx.require_user().await?;
        let record = json!({
            "user_id": user.id,
            "caption": post.caption,
            "image": post.image,
        });
        let row = self.inner.ctx.gateway.insert(Table::Posts, record).await?;
        let inserted: Inserted = serde_json::from_value(row).map_err(SyncError::decode("post"))?;
        info!("{} shared post {}", user.id, inserted.id);
        Ok(inserted.id)
    }

    pub async fn create_post(&self, post: NewPost) -> Option<String> {
        match self.try_create_post(post).await {
            Ok(id) => Some(id),
            Err(e) => {
                self.inner.ctx.report(CREATE_FAILED_MESSAGE, &e);
                None
            }
        }
    }

    // -- Reading --

    pub fn posts(&self) -> Vec<Arc<Post>> {
        self.inner.state.lock().view.snapshot()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.snapshot.borrow().loading
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.snapshot.borrow().refreshing
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscriptions.is_subscribed(&self.inner.ctx.config.profile_channel)
    }

    fn publish(&self, state: &FeedState) {
        self.inner.snapshot.send_replace(state.snapshot());
    }
}

impl<G: Gateway> Drop for FeedInner<G> {
    fn drop(&mut self) {
        if self.subscriptions.active() > 0 {
            warn!("Feed dropped while still mounted");
        }
    }
}
