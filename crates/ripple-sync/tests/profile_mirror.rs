mod support;

use ripple_gateway::{Gateway, Query};
use ripple_sync::{ErrorKind, FeedSynchronizer, ProfileMirror, SyncConfig, SyncError};
use ripple_types::events::Table;
use ripple_types::models::ProfileUpdate;

use support::{ids, seeded, settle, wait_until};

#[tokio::test]
async fn fetches_the_signed_in_users_profile() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u2");
    let mirror = ProfileMirror::new(h.ctx.clone());

    let profile = mirror.fetch_own_profile().await.unwrap();
    assert_eq!(profile.id, "u2");
    assert_eq!(profile.username.as_deref(), Some("ben"));
    assert_eq!(mirror.profile(), Some(profile));
}

#[tokio::test]
async fn missing_profile_row_is_not_found() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("ghost");
    let mirror = ProfileMirror::new(h.ctx.clone());

    let err = mirror.try_fetch_own_profile().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert!(mirror.fetch_own_profile().await.is_none());
    assert_eq!(h.notifier.errors(), vec!["Failed to fetch profile"]);
    assert!(mirror.profile().is_none());
}

#[tokio::test]
async fn signed_out_fetch_is_auth_required() {
    let h = seeded(SyncConfig::default()).await;
    let mirror = ProfileMirror::new(h.ctx.clone());

    assert!(matches!(
        mirror.try_fetch_own_profile().await,
        Err(SyncError::AuthRequired)
    ));
}

#[tokio::test]
async fn fetches_own_posts_newest_first() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");
    let mirror = ProfileMirror::new(h.ctx.clone());

    let posts = mirror.fetch_own_posts().await.unwrap();
    assert_eq!(ids(&posts), vec!["t2", "t1"]);

    h.gateway.fail_next_queries(1);
    assert!(mirror.fetch_own_posts().await.is_none());
    assert_eq!(h.notifier.errors(), vec!["Failed to fetch posts"]);
    assert_eq!(mirror.posts().len(), 2);
}

#[tokio::test]
async fn update_notifies_once_and_does_not_touch_the_mirror() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");
    let mirror = ProfileMirror::new(h.ctx.clone());
    mirror.fetch_own_profile().await;

    let update = ProfileUpdate {
        username: Some("ana.b".into()),
        avatar_url: None,
    };
    assert!(mirror.update_own_profile(update).await);
    assert_eq!(h.notifier.messages(), vec!["Profile updated successfully!"]);

    // not mounted, so nothing echoes the write back
    assert_eq!(mirror.profile().unwrap().username.as_deref(), Some("ana"));

    let rows = h
        .gateway
        .local
        .query(Query::from(Table::Profiles).eq("id", "u1"))
        .await
        .unwrap();
    assert_eq!(rows[0]["username"], "ana.b");
    assert_eq!(rows[0]["avatar_url"], serde_json::Value::Null);
}

#[tokio::test]
async fn failed_update_notifies_once() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");
    let mirror = ProfileMirror::new(h.ctx.clone());

    h.gateway.fail_next_writes(1);
    assert!(!mirror.update_own_profile(ProfileUpdate::set_avatar("A")).await);
    assert_eq!(h.notifier.errors(), vec!["Failed to update profile"]);
    assert_eq!(h.notifier.notices().len(), 1);
}

#[tokio::test]
async fn empty_update_is_a_no_op() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");
    let mirror = ProfileMirror::new(h.ctx.clone());

    assert!(!mirror.update_own_profile(ProfileUpdate::default()).await);
    assert!(h.notifier.notices().is_empty());
}

#[tokio::test]
async fn mounted_mirror_follows_only_its_own_row() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");
    let mirror = ProfileMirror::new(h.ctx.clone());
    mirror.mount().await;
    assert!(mirror.is_subscribed());
    assert_eq!(mirror.posts().len(), 2);

    h.gateway.change_avatar("u2", "theirs").await;
    settle().await;
    assert_eq!(mirror.profile().unwrap().avatar_url, None);

    mirror
        .update_own_profile(ProfileUpdate::set_avatar("mine"))
        .await;
    wait_until("own avatar echo", || {
        mirror.profile().and_then(|p| p.avatar_url).as_deref() == Some("mine")
    })
    .await;

    for post in mirror.posts() {
        assert_eq!(post.user.avatar_url.as_deref(), Some("mine"));
    }
}

#[tokio::test]
async fn attached_feed_gets_own_avatar_changes() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");
    let feed = FeedSynchronizer::new(h.ctx.clone());
    feed.load().await;

    let mirror = ProfileMirror::new(h.ctx.clone());
    mirror.attach_feed(&feed);
    mirror.mount().await;

    mirror
        .update_own_profile(ProfileUpdate::set_avatar("fresh"))
        .await;

    // the feed itself is not subscribed; the mirror forwards the change
    wait_until("feed to pick up the avatar", || {
        feed.posts()
            .iter()
            .filter(|p| p.user.id == "u1")
            .all(|p| p.user.avatar_url.as_deref() == Some("fresh"))
    })
    .await;
    assert!(!feed.is_subscribed());
}

#[tokio::test]
async fn clearing_the_avatar_reaches_mirror_and_posts() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u2");
    let mirror = ProfileMirror::new(h.ctx.clone());
    mirror.mount().await;
    assert!(mirror.profile().unwrap().avatar_url.is_some());

    assert!(mirror.update_own_profile(ProfileUpdate::clear_avatar()).await);
    wait_until("avatar to clear", || {
        mirror.profile().is_some_and(|p| p.avatar_url.is_none())
    })
    .await;

    let rows = h
        .gateway
        .local
        .query(Query::from(Table::Profiles).eq("id", "u2"))
        .await
        .unwrap();
    assert_eq!(rows[0]["avatar_url"], serde_json::Value::Null);
    assert_eq!(rows[0]["username"], "ben");
    assert!(mirror.posts().iter().all(|p| p.user.avatar_url.is_none()));
}

#[tokio::test]
async fn live_change_wins_over_a_slower_mount_fetch() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");
    let feed = FeedSynchronizer::new(h.ctx.clone());
    feed.load().await;
    let mirror = ProfileMirror::new(h.ctx.clone());
    mirror.attach_feed(&feed);

    let release = h.gateway.hold_next_query();
    let mount = {
        let mirror = mirror.clone();
        tokio::spawn(async move { mirror.mount().await })
    };
    // the mirror's profile fetch has read the row and is held
    wait_until("profile fetch to run", || h.gateway.queries() == 2).await;

    h.gateway.change_avatar("u1", "B").await;
    wait_until("feed to show B", || {
        feed.posts()
            .iter()
            .filter(|p| p.user.id == "u1")
            .all(|p| p.user.avatar_url.as_deref() == Some("B"))
    })
    .await;

    release.send(()).unwrap();
    mount.await.unwrap();

    assert_eq!(mirror.profile().unwrap().avatar_url.as_deref(), Some("B"));
    assert!(mirror.posts().iter().all(|p| p.user.avatar_url.as_deref() == Some("B")));
    for post in feed.posts().iter().filter(|p| p.user.id == "u1") {
        assert_eq!(post.user.avatar_url.as_deref(), Some("B"));
    }
}

#[tokio::test]
async fn overtaken_profile_fetch_is_dropped() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");
    let mirror = ProfileMirror::new(h.ctx.clone());

    let release = h.gateway.hold_next_query();
    let slow = {
        let mirror = mirror.clone();
        tokio::spawn(async move { mirror.fetch_own_profile().await })
    };
    wait_until("slow fetch to run", || h.gateway.queries() == 1).await;

    h.gateway.change_avatar("u1", "B").await;
    let fresh = mirror.fetch_own_profile().await.unwrap();
    assert_eq!(fresh.avatar_url.as_deref(), Some("B"));

    release.send(()).unwrap();
    slow.await.unwrap();
    assert_eq!(mirror.profile().unwrap().avatar_url.as_deref(), Some("B"));
}

#[tokio::test]
async fn attaching_does_not_push_a_stale_cached_profile() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");
    let mirror = ProfileMirror::new(h.ctx.clone());
    mirror.fetch_own_profile().await;
    assert_eq!(mirror.profile().unwrap().avatar_url, None);

    // not mounted, so the mirror never hears about this
    h.gateway.change_avatar("u1", "B").await;

    let feed = FeedSynchronizer::new(h.ctx.clone());
    feed.load().await;
    mirror.attach_feed(&feed);
    settle().await;

    for post in feed.posts().iter().filter(|p| p.user.id == "u1") {
        assert_eq!(post.user.avatar_url.as_deref(), Some("B"));
    }
}

#[tokio::test]
async fn unmount_closes_the_mirror() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");
    let mirror = ProfileMirror::new(h.ctx.clone());
    mirror.mount().await;
    assert_eq!(h.gateway.local.dispatcher().active(), 1);

    mirror.unmount();
    assert_eq!(h.gateway.local.dispatcher().active(), 0);
    assert!(mirror.profile().is_none());
    assert!(mirror.posts().is_empty());
}

#[tokio::test]
async fn push_token_is_saved_best_effort() {
    let h = seeded(SyncConfig::default()).await;
    let mirror = ProfileMirror::new(h.ctx.clone());

    assert!(!mirror.save_push_token("device-token").await);

    h.gateway.sign_in("u1");
    assert!(!mirror.save_push_token("   ").await);
    assert!(mirror.save_push_token("device-token").await);

    let rows = h
        .gateway
        .local
        .query(Query::from(Table::Profiles).eq("id", "u1"))
        .await
        .unwrap();
    assert_eq!(rows[0]["push_token"], "device-token");

    h.gateway.fail_next_writes(1);
    assert!(!mirror.save_push_token("device-token").await);
    assert!(h.notifier.notices().is_empty());
}
