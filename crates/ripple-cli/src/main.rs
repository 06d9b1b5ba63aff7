use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use ripple_db::LocalGateway;
use ripple_gateway::{Gateway, Query};
use ripple_sync::{FeedSnapshot, FeedSynchronizer, ProfileMirror, SyncConfig, SyncContext, TracingNotifier};
use ripple_types::display::time_ago;
use ripple_types::events::Table;
use ripple_types::models::{AuthUser, Profile};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug,ripple_sync=debug".into()),
        )
        .init();

    // Config
    let config = SyncConfig::from_env()?;
    let db_path = std::env::var("RIPPLE_DB_PATH").unwrap_or_else(|_| "ripple.db".into());
    let user_id = std::env::var("RIPPLE_USER_ID").ok();

    // Local backend
    let gateway = Arc::new(LocalGateway::open(&PathBuf::from(&db_path))?);
    info!("Using local backend at {}", db_path);

    match user_id {
        Some(id) => {
            ensure_profile(&gateway, &id).await?;
            gateway.sign_in(AuthUser { id, email: None });
        }
        None => warn!("RIPPLE_USER_ID not set, browsing signed out"),
    }

    let media_base_url = config.media_base_url.clone();
    let ctx = SyncContext::new(gateway.clone(), Arc::new(TracingNotifier), config);
    let feed = FeedSynchronizer::new(ctx.clone());
    let mirror = ProfileMirror::new(ctx);
    mirror.attach_feed(&feed);

    feed.mount().await;
    mirror.mount().await;

    if let Some(profile) = mirror.profile() {
        print_profile(&profile, mirror.posts().len());
    }

    let mut updates = feed.watch();
    print_feed(&updates.borrow_and_update(), &media_base_url);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if !snapshot.loading {
                    print_feed(&snapshot, &media_base_url);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    mirror.unmount();
    feed.unmount();
    Ok(())
}

/// Signing up creates an empty profile row; do the same for a fresh local user.
async fn ensure_profile(gateway: &LocalGateway, user_id: &str) -> anyhow::Result<()> {
    let rows = gateway.query(Query::from(Table::Profiles).eq("id", user_id)).await?;
    if rows.is_empty() {
        gateway.insert(Table::Profiles, json!({ "id": user_id })).await?;
        info!("Created profile for {}", user_id);
    }
    Ok(())
}

fn print_profile(profile: &Profile, posts: usize) {
    println!("{} ({} posts)", profile.display_name(), posts);
    println!("  avatar: {}", profile.display_avatar());
}

fn print_feed(snapshot: &FeedSnapshot, media_base_url: &str) {
    let now = Utc::now();
    println!("-- feed: {} posts --", snapshot.posts.len());
    for post in &snapshot.posts {
        println!(
            "{} · {}",
            post.user.display_name(),
            time_ago(post.created_at, now)
        );
        if let Some(caption) = post.caption.as_deref().filter(|c| !c.is_empty()) {
            println!("  {}", caption);
        }
        if let Some(url) = post.media_url(media_base_url) {
            println!("  {}", url);
        }
    }
}
