use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ripple_gateway::{Filter, Gateway, Query};
use ripple_types::events::Table;
use ripple_types::models::{Post, Profile, ProfileUpdate};

use crate::error::{SyncError, SyncResult};
use crate::feed::{FeedSynchronizer, WeakFeed};
use crate::notify::Notice;
use crate::subscriptions::SubscriptionManager;
use crate::view::{AuthorPatch, PostView};
use crate::{SyncContext, decode_rows};

pub const FETCH_PROFILE_FAILED_MESSAGE: &str = "Failed to fetch profile";
pub const FETCH_POSTS_FAILED_MESSAGE: &str = "Failed to fetch posts";
pub const UPDATE_SUCCEEDED_MESSAGE: &str = "Profile updated successfully!";
pub const UPDATE_FAILED_MESSAGE: &str = "Failed to update profile";

#[derive(Debug, Clone, Default)]
pub struct ProfileSnapshot {
    pub profile: Option<Profile>,
    /// The signed-in user's own posts, newest first.
    pub posts: Vec<Arc<Post>>,
}

#[derive(Default)]
struct MirrorState {
    /// Set while mounted.
    user_id: Option<String>,
    profile: Option<Profile>,
    posts: PostView,
    detached: bool,
    /// Sequence numbers of the most recently issued fetches. Kept across
    /// unmount so a fetch from a previous mount can never match.
    profile_issued: u64,
    posts_issued: u64,
    /// Profile and post fetches not yet resolved.
    in_flight: usize,
    /// Latest own-row change seen while a fetch was in flight. A fetch that
    /// read the row before the change replays it when it resolves.
    pending: Option<Profile>,
}

impl MirrorState {
    fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            profile: self.profile.clone(),
            posts: self.posts.snapshot(),
        }
    }

    fn begin_profile_fetch(&mut self) -> u64 {
        self.in_flight += 1;
        self.profile_issued += 1;
        self.profile_issued
    }

    fn begin_posts_fetch(&mut self) -> u64 {
        self.in_flight += 1;
        self.posts_issued += 1;
        self.posts_issued
    }

    fn end_fetch(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.pending = None;
        }
    }

    /// Make `profile` the mirror's profile and restamp own posts with it.
    fn store_profile(&mut self, profile: Profile) {
        let patch = AuthorPatch::avatar(profile.avatar_url.clone()).username(profile.username.clone());
        self.posts.patch_by_user_id(&profile.id, &patch);
        self.profile = Some(profile);
    }
}

struct MirrorInner<G: Gateway> {
    ctx: SyncContext<G>,
    state: Mutex<MirrorState>,
    snapshot: watch::Sender<ProfileSnapshot>,
    subscriptions: SubscriptionManager<G>,
    feeds: Mutex<Vec<WeakFeed<G>>>,
}

/// Local copy of the signed-in user's profile and posts.
pub struct ProfileMirror<G: Gateway> {
    inner: Arc<MirrorInner<G>>,
}

impl<G: Gateway> Clone for ProfileMirror<G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<G: Gateway> ProfileMirror<G> {
    pub fn new(ctx: SyncContext<G>) -> Self {
        let subscriptions = SubscriptionManager::new(ctx.gateway.clone(), ctx.config.teardown);
        let (snapshot, _) = watch::channel(ProfileSnapshot::default());
        Self {
            inner: Arc::new(MirrorInner {
                ctx,
                state: Mutex::new(MirrorState::default()),
                snapshot,
                subscriptions,
                feeds: Mutex::new(Vec::new()),
            }),
        }
    }

    // -- Lifecycle --

    /// Follow changes to the signed-in user's row, then fetch profile and posts.
    pub async fn mount(&self) {
        let user = match self.inner.ctx.require_user().await {
            Ok(user) => user,
            Err(e) => {
                self.inner.ctx.report(FETCH_PROFILE_FAILED_MESSAGE, &e);
                return;
            }
        };

        {
            let mut state = self.inner.state.lock();
            state.detached = false;
            state.user_id = Some(user.id.clone());
        }

        let weak: Weak<MirrorInner<G>> = Arc::downgrade(&self.inner);
        let channel = self.inner.ctx.config.profile_channel.clone();
        let subscribed = self
            .inner
            .subscriptions
            .subscribe_to_profile_updates(&channel, move |profile| {
                if let Some(inner) = weak.upgrade() {
                    ProfileMirror { inner }.apply_remote(profile);
                }
            })
            .await;
        if let Err(e) = subscribed {
            warn!("Profile mirror has no live updates: {}", e);
        }

        info!("Profile mirror mounted for {}", user.id);
        self.fetch_own_profile().await;
        self.fetch_own_posts().await;
    }

    pub fn unmount(&self) {
        let closed = self.inner.subscriptions.teardown();
        let mut state = self.inner.state.lock();
        *state = MirrorState {
            detached: true,
            profile_issued: state.profile_issued + 1,
            posts_issued: state.posts_issued + 1,
            in_flight: state.in_flight,
            ..MirrorState::default()
        };
        self.inner.snapshot.send_replace(state.snapshot());
        info!("Profile mirror unmounted ({} subscriptions closed)", closed);
    }

    /// Push avatar changes this mirror learns about from now on into `feed`.
    ///
    /// Nothing already cached is pushed: the feed's own load is at least as
    /// fresh as anything the mirror saw before attaching.
    pub fn attach_feed(&self, feed: &FeedSynchronizer<G>) {
        self.inner.feeds.lock().push(feed.downgrade());
    }

    // -- Profile --

    /// Fetch the signed-in user's row into the mirror.
    ///
    /// A fetch overtaken by a newer one, or resolving after unmount, leaves
    /// the mirror alone. Own-row changes that arrived while it was in flight
    /// win over what it read.
    pub async fn try_fetch_own_profile(&self) -> SyncResult<Profile> {
        let user = self.inner.ctx.require_user().await?;
        let seq = self.inner.state.lock().begin_profile_fetch();

        let fetched = self.query_own_profile(user.id).await;

        let stored = {
            let mut state = self.inner.state.lock();
            let current = seq == state.profile_issued && !state.detached;
            let stored = match (&fetched, current) {
                (Ok(profile), true) => {
                    let newest = state
                        .pending
                        .clone()
                        .filter(|pending| pending.id == profile.id)
                        .unwrap_or_else(|| profile.clone());
                    state.store_profile(newest.clone());
                    self.inner.snapshot.send_replace(state.snapshot());
                    Some(newest)
                }
                (Ok(_), false) => {
                    debug!("Profile fetch {} dropped (latest {})", seq, state.profile_issued);
                    None
                }
                (Err(_), _) => None,
            };
            state.end_fetch();
            stored
        };

        match stored {
            Some(profile) => {
                self.propagate_avatar(&profile);
                Ok(profile)
            }
            None => fetched,
        }
    }

    async fn query_own_profile(&self, user_id: String) -> SyncResult<Profile> {
        let rows = self
            .inner
            .ctx
            .gateway
            .query(Query::from(Table::Profiles).eq("id", user_id.clone()))
            .await?;
        decode_rows::<Profile>(rows, "profile")?
            .into_iter()
            .next()
            .ok_or(SyncError::NotFound {
                what: "profile",
                id: user_id,
            })
    }

    pub async fn fetch_own_profile(&self) -> Option<Profile> {
        match self.try_fetch_own_profile().await {
            Ok(profile) => Some(profile),
            Err(e) => {
                self.inner.ctx.report(FETCH_PROFILE_FAILED_MESSAGE, &e);
                None
            }
        }
    }

    /// Write the present fields of `update` to the signed-in user's row.
    ///
    /// Returns false for an empty update. The mirror itself changes only
    /// when the backend echoes the write back as a change event.
    pub async fn try_update_own_profile(&self, update: ProfileUpdate) -> SyncResult<bool> {
        if update.is_empty() {
            debug!("Empty profile update, nothing to write");
            return Ok(false);
        }

        let user = self.inner.ctx.require_user().await?;
        let patch = serde_json::to_value(&update).map_err(SyncError::decode("profile update"))?;
        self.inner
            .ctx
            .gateway
            .update(Table::Profiles, vec![Filter::eq("id", user.id.clone())], patch)
            .await?;
        info!("{} updated their profile", user.id);
        Ok(true)
    }

    pub async fn update_own_profile(&self, update: ProfileUpdate) -> bool {
        match self.try_update_own_profile(update).await {
            Ok(true) => {
                self.inner.ctx.notifier.notify(Notice::info(UPDATE_SUCCEEDED_MESSAGE));
                true
            }
            Ok(false) => false,
            Err(e) => {
                self.inner.ctx.report(UPDATE_FAILED_MESSAGE, &e);
                false
            }
        }
    }

    /// Store the device's push token on the user's row. Best effort: an
    /// empty token or a missing session is skipped, failures are only logged.
    pub async fn save_push_token(&self, token: &str) -> bool {
        if token.trim().is_empty() {
            debug!("No push token to save");
            return false;
        }

        let user = match self.inner.ctx.gateway.current_user().await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("Not saving push token, nobody is signed in");
                return false;
            }
            Err(e) => {
                warn!("Could not resolve session for push token: {}", e);
                return false;
            }
        };

        let result = self
            .inner
            .ctx
            .gateway
            .update(
                Table::Profiles,
                vec![Filter::eq("id", user.id.clone())],
                json!({ "push_token": token }),
            )
            .await;
        match result {
            Ok(()) => {
                debug!("Saved push token for {}", user.id);
                true
            }
            Err(e) => {
                warn!("Failed to save push token for {}: {}", user.id, e);
                false
            }
        }
    }

    // -- Posts --

    pub async fn try_fetch_own_posts(&self) -> SyncResult<Vec<Arc<Post>>> {
        let user = self.inner.ctx.require_user().await?;
        let seq = self.inner.state.lock().begin_posts_fetch();

        let query = Query::from(Table::Posts)
            .eq("user_id", user.id)
            .order("created_at", false)
            .with_author();
        let fetched = match self.inner.ctx.gateway.query(query).await {
            Ok(rows) => decode_rows::<Post>(rows, "post"),
            Err(e) => Err(e.into()),
        };

        let mut state = self.inner.state.lock();
        let result = match fetched {
            Ok(posts) if seq == state.posts_issued && !state.detached => {
                state.posts.replace_all(posts);
                if let Some(profile) = state.pending.clone() {
                    state.store_profile(profile);
                }
                self.inner.snapshot.send_replace(state.snapshot());
                Ok(state.posts.snapshot())
            }
            Ok(_) => {
                debug!("Own posts fetch {} dropped (latest {})", seq, state.posts_issued);
                Ok(state.posts.snapshot())
            }
            Err(e) => Err(e),
        };
        state.end_fetch();
        result
    }

    pub async fn fetch_own_posts(&self) -> Option<Vec<Arc<Post>>> {
        match self.try_fetch_own_posts().await {
            Ok(posts) => Some(posts),
            Err(e) => {
                self.inner.ctx.report(FETCH_POSTS_FAILED_MESSAGE, &e);
                None
            }
        }
    }

    // -- Reading --

    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.lock().profile.clone()
    }

    pub fn posts(&self) -> Vec<Arc<Post>> {
        self.inner.state.lock().posts.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<ProfileSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscriptions.is_subscribed(&self.inner.ctx.config.profile_channel)
    }

    // -- Internals --

    /// Change event for some profile row. Only the signed-in user's is kept.
    fn apply_remote(&self, profile: Profile) {
        {
            let mut state = self.inner.state.lock();
            if state.detached || state.user_id.as_deref() != Some(profile.id.as_str()) {
                debug!("Ignoring profile change for {}", profile.id);
                return;
            }
            debug!("Own profile changed remotely");
            if state.in_flight > 0 {
                state.pending = Some(profile.clone());
            }
            state.store_profile(profile.clone());
            self.inner.snapshot.send_replace(state.snapshot());
        }
        self.propagate_avatar(&profile);
    }

    fn propagate_avatar(&self, profile: &Profile) {
        let feeds: Vec<FeedSynchronizer<G>> = {
            let mut feeds = self.inner.feeds.lock();
            feeds.retain(|feed| feed.upgrade().is_some());
            feeds.iter().filter_map(WeakFeed::upgrade).collect()
        };
        for feed in feeds {
            feed.patch_author(&profile.id, AuthorPatch::avatar(profile.avatar_url.clone()));
        }
    }
}
