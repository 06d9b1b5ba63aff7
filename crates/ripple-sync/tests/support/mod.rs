#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use ripple_db::LocalGateway;
use ripple_gateway::{
    Filter, Gateway, GatewayError, GatewayResult, Query, Subscription, SubscriptionId, SubscriptionSpec,
};
use ripple_sync::{Notice, Notifier, SyncConfig, SyncContext};
use ripple_types::events::Table;
use ripple_types::models::{AuthUser, Post};

/// Keeps every notice for later inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.notices
            .lock()
            .iter()
            .filter(|n| n.is_error())
            .map(|n| n.message.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices.lock().iter().map(|n| n.message.clone()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Local SQLite gateway with knobs for failures and slow responses.
pub struct ScriptedGateway {
    pub local: LocalGateway,
    failing_queries: AtomicUsize,
    failing_writes: AtomicUsize,
    held: Mutex<VecDeque<oneshot::Receiver<()>>>,
    queries: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            local: LocalGateway::in_memory().unwrap(),
            failing_queries: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
            held: Mutex::new(VecDeque::new()),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_queries(&self, n: usize) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// The next query runs immediately but does not return until the
    /// sender fires (or is dropped).
    pub fn hold_next_query(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.held.lock().push_back(rx);
        tx
    }

    /// Queries that have reached the database so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn sign_in(&self, id: &str) {
        self.local.sign_in(AuthUser {
            id: id.into(),
            email: Some(format!("{}@example.com", id)),
        });
    }

    pub async fn seed_profile(&self, id: &str, username: &str, avatar_url: Option<&str>) {
        self.local
            .insert(
                Table::Profiles,
                json!({ "id": id, "username": username, "avatar_url": avatar_url }),
            )
            .await
            .unwrap();
    }

    pub async fn seed_post(&self, id: &str, user_id: &str, created_at: &str) {
        self.local
            .insert(
                Table::Posts,
                json!({ "id": id, "user_id": user_id, "created_at": created_at, "caption": id, "image": id }),
            )
            .await
            .unwrap();
    }

    /// A backend-side avatar change, as if made from another device.
    pub async fn change_avatar(&self, user_id: &str, avatar_url: &str) {
        self.local
            .update(
                Table::Profiles,
                vec![Filter::eq("id", user_id)],
                json!({ "avatar_url": avatar_url }),
            )
            .await
            .unwrap();
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Gateway for ScriptedGateway {
    async fn query(&self, query: Query) -> GatewayResult<Vec<Value>> {
        if Self::take_failure(&self.failing_queries) {
            return Err(GatewayError::Network("connection reset".into()));
        }
        let held = self.held.lock().pop_front();
        let result = self.local.query(query).await;
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(rx) = held {
            let _ = rx.await;
        }
        result
    }

    async fn insert(&self, table: Table, record: Value) -> GatewayResult<Value> {
        if Self::take_failure(&self.failing_writes) {
            return Err(GatewayError::Server("insert rejected".into()));
        }
        self.local.insert(table, record).await
    }

    async fn update(&self, table: Table, filters: Vec<Filter>, patch: Value) -> GatewayResult<()> {
        if Self::take_failure(&self.failing_writes) {
            return Err(GatewayError::Server("update rejected".into()));
        }
        self.local.update(table, filters, patch).await
    }

    async fn subscribe(&self, spec: SubscriptionSpec) -> GatewayResult<Subscription> {
        self.local.subscribe(spec).await
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.local.unsubscribe(id)
    }

    fn unsubscribe_all(&self) -> usize {
        self.local.unsubscribe_all()
    }

    async fn current_user(&self) -> GatewayResult<Option<AuthUser>> {
        self.local.current_user().await
    }
}

pub struct Harness {
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: SyncContext<ScriptedGateway>,
}

pub fn harness(config: SyncConfig) -> Harness {
    let gateway = Arc::new(ScriptedGateway::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let ctx = SyncContext::new(gateway.clone(), notifier.clone(), config);
    Harness { gateway, notifier, ctx }
}

/// Two posts by u1 and one by u2, inserted out of order.
pub async fn seeded(config: SyncConfig) -> Harness {
    let h = harness(config);
    h.gateway.seed_profile("u1", "ana", None).await;
    h.gateway.seed_profile("u2", "ben", Some("https://cdn.example/ben.png")).await;
    h.gateway.seed_post("t1", "u1", "2024-05-01T10:00:01Z").await;
    h.gateway.seed_post("t3", "u2", "2024-05-01T10:00:03Z").await;
    h.gateway.seed_post("t2", "u1", "2024-05-01T10:00:02Z").await;
    h
}

pub fn ids(posts: &[Arc<Post>]) -> Vec<String> {
    posts.iter().map(|p| p.id.clone()).collect()
}

pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned delivery tasks a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
