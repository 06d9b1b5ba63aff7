//! Two components sharing one gateway: what one of them closes on unmount.
mod support;

use ripple_sync::{FeedSynchronizer, ProfileMirror, SyncConfig, TeardownPolicy};

use support::{seeded, wait_until};

#[tokio::test]
async fn owned_teardown_leaves_other_components_live() {
    let h = seeded(SyncConfig::default()).await;
    h.gateway.sign_in("u1");

    let feed = FeedSynchronizer::new(h.ctx.clone());
    let mirror = ProfileMirror::new(h.ctx.clone());
    feed.mount().await;
    mirror.mount().await;
    assert_eq!(h.gateway.local.dispatcher().active(), 2);

    mirror.unmount();
    assert_eq!(h.gateway.local.dispatcher().active(), 1);

    h.gateway.change_avatar("u2", "still-live").await;
    wait_until("feed to keep patching", || {
        feed.posts()
            .iter()
            .any(|p| p.user.avatar_url.as_deref() == Some("still-live"))
    })
    .await;
}

#[tokio::test]
async fn process_wide_teardown_closes_every_channel() {
    let config = SyncConfig {
        teardown: TeardownPolicy::ProcessWide,
        ..SyncConfig::default()
    };
    let h = seeded(config).await;
    h.gateway.sign_in("u1");

    let feed = FeedSynchronizer::new(h.ctx.clone());
    let mirror = ProfileMirror::new(h.ctx.clone());
    feed.mount().await;
    mirror.mount().await;

    mirror.unmount();
    assert_eq!(h.gateway.local.dispatcher().active(), 0);
}

#[tokio::test]
async fn dropping_a_mounted_feed_closes_its_channel() {
    let h = seeded(SyncConfig::default()).await;
    {
        let feed = FeedSynchronizer::new(h.ctx.clone());
        feed.mount().await;
        assert_eq!(h.gateway.local.dispatcher().active(), 1);
    }
    assert_eq!(h.gateway.local.dispatcher().active(), 0);
}

#[tokio::test]
async fn feed_resubscribes_after_another_component_closed_everything() {
    let config = SyncConfig {
        teardown: TeardownPolicy::ProcessWide,
        ..SyncConfig::default()
    };
    let h = seeded(config).await;

    let first = FeedSynchronizer::new(h.ctx.clone());
    let second = FeedSynchronizer::new(h.ctx.clone());
    first.mount().await;
    second.mount().await;

    first.unmount();
    assert_eq!(h.gateway.local.dispatcher().active(), 0);
    assert!(!second.is_subscribed());

    second.mount().await;
    assert!(second.is_subscribed());
    assert_eq!(h.gateway.local.dispatcher().active(), 1);

    h.gateway.change_avatar("u1", "Z").await;
    wait_until("second feed to patch u1", || {
        second
            .posts()
            .iter()
            .filter(|p| p.user.id == "u1")
            .all(|p| p.user.avatar_url.as_deref() == Some("Z"))
    })
    .await;
}
