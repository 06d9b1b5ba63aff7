use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ripple_gateway::{Gateway, Liveness, Subscription, SubscriptionId, SubscriptionSpec};
use ripple_types::events::{ChangeEvent, ChangeKind, Table};
use ripple_types::models::Profile;

use crate::config::TeardownPolicy;
use crate::error::SyncResult;

/// Open/closed flag checked around every handler call. Teardown flips it
/// while holding the lock, so once teardown returns no handler is running
/// and none will start. Reentrant so a handler that drops the last owner
/// of its manager can still tear down from inside the delivery task.
type Gate = Arc<ReentrantMutex<Cell<bool>>>;

type Slots = Mutex<HashMap<String, Slot>>;

enum Slot {
    /// `subscribe` is waiting on the gateway. The token tells a late
    /// completion whether its slot survived a teardown in the meantime.
    Pending(u64),
    Active(ActiveSlot),
}

struct ActiveSlot {
    id: SubscriptionId,
    gate: Gate,
    liveness: Liveness,
    task: JoinHandle<()>,
}

impl Slot {
    /// False once the gateway has ended the stream, even if the delivery
    /// task has not noticed yet.
    fn is_live(&self) -> bool {
        match self {
            Slot::Pending(_) => true,
            Slot::Active(active) => active.liveness.is_open() && !active.task.is_finished(),
        }
    }
}

/// Owns the live subscriptions of one component, one per channel name.
pub struct SubscriptionManager<G: Gateway> {
    gateway: Arc<G>,
    policy: TeardownPolicy,
    slots: Arc<Slots>,
    next_token: AtomicU64,
}

impl<G: Gateway> SubscriptionManager<G> {
    pub fn new(gateway: Arc<G>, policy: TeardownPolicy) -> Self {
        Self {
            gateway,
            policy,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
        }
    }

    /// Subscribe `handler` to `kind` events on `table`.
    ///
    /// Returns `Ok(false)` without touching the gateway when `channel` is
    /// already subscribed or being subscribed. A channel whose stream the
    /// gateway closed counts as free.
    pub async fn subscribe<F>(&self, channel: &str, table: Table, kind: ChangeKind, handler: F) -> SyncResult<bool>
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let token = {
            let mut slots = self.slots.lock();
            match slots.get(channel) {
                Some(slot) if slot.is_live() => {
                    debug!("Channel {} already subscribed", channel);
                    return Ok(false);
                }
                Some(_) => {
                    if let Some(Slot::Active(stale)) = slots.remove(channel) {
                        stale.task.abort();
                        debug!("Stream {} on {} was closed by the gateway, resubscribing", stale.id, channel);
                    }
                }
                None => {}
            }
            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            slots.insert(channel.to_string(), Slot::Pending(token));
            token
        };

        let spec = SubscriptionSpec::new(channel, table, kind);
        let subscription = match self.gateway.subscribe(spec).await {
            Ok(subscription) => subscription,
            Err(e) => {
                let mut slots = self.slots.lock();
                if matches!(slots.get(channel), Some(Slot::Pending(t)) if *t == token) {
                    slots.remove(channel);
                }
                return Err(e.into());
            }
        };

        let id = subscription.id();
        let mut slots = self.slots.lock();
        if !matches!(slots.get(channel), Some(Slot::Pending(t)) if *t == token) {
            drop(slots);
            debug!("Channel {} torn down while subscribing, closing {}", channel, id);
            self.gateway.unsubscribe(id);
            return Ok(false);
        }

        let gate: Gate = Arc::new(ReentrantMutex::new(Cell::new(true)));
        let liveness = subscription.liveness();
        let task = tokio::spawn(deliver(subscription, gate.clone(), Arc::downgrade(&self.slots), handler));
        slots.insert(
            channel.to_string(),
            Slot::Active(ActiveSlot {
                id,
                gate,
                liveness,
                task,
            }),
        );
        info!("Subscribed to {} {} events on {} ({})", table, kind, channel, id);
        Ok(true)
    }

    /// Subscribe to `UPDATE` events on `profiles`. `on_update` sees every
    /// changed profile, not only the signed-in user's.
    pub async fn subscribe_to_profile_updates<F>(&self, channel: &str, on_update: F) -> SyncResult<bool>
    where
        F: Fn(Profile) + Send + Sync + 'static,
    {
        self.subscribe(channel, Table::Profiles, ChangeKind::Update, move |event| {
            match event.decode_new::<Profile>() {
                Ok(profile) => on_update(profile),
                Err(e) => warn!("Skipping undecodable profile event: {}", e),
            }
        })
        .await
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.slots
            .lock()
            .get(channel)
            .is_some_and(|slot| matches!(slot, Slot::Active(_)) && slot.is_live())
    }

    /// Number of active subscriptions whose streams are still open.
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Active(_)) && slot.is_live())
            .count()
    }

    /// Close every subscription this manager opened. Returns how many were
    /// active. Handlers are never invoked after this returns.
    pub fn teardown(&self) -> usize {
        let slots: Vec<(String, Slot)> = self.slots.lock().drain().collect();

        let mut closed = 0;
        for (channel, slot) in slots {
            let Slot::Active(active) = slot else {
                debug!("Abandoning pending subscribe on {}", channel);
                continue;
            };
            {
                let gate = active.gate.lock();
                gate.set(false);
            }
            active.task.abort();
            if !self.gateway.unsubscribe(active.id) {
                debug!("Subscription {} on {} was already closed", active.id, channel);
            }
            closed += 1;
        }

        if self.policy == TeardownPolicy::ProcessWide {
            let foreign = self.gateway.unsubscribe_all();
            if foreign > 0 {
                warn!("Process-wide teardown closed {} subscriptions owned by other components", foreign);
            }
        }

        if closed > 0 {
            info!("Closed {} subscriptions", closed);
        }
        closed
    }
}

impl<G: Gateway> Drop for SubscriptionManager<G> {
    fn drop(&mut self) {
        if !self.slots.lock().is_empty() {
            self.teardown();
        }
    }
}

async fn deliver<F>(mut subscription: Subscription, gate: Gate, slots: Weak<Slots>, handler: F)
where
    F: Fn(ChangeEvent) + Send + Sync + 'static,
{
    let id = subscription.id();
    let channel = subscription.spec().channel.clone();

    while let Some(event) = subscription.next().await {
        let open = gate.lock();
        if !open.get() {
            debug!("Delivery for {} on {} stopped by teardown", id, channel);
            return;
        }
        handler(event);
    }

    // The gateway ended the stream. Free the channel unless a newer
    // subscription already took it over.
    if let Some(slots) = slots.upgrade() {
        let mut slots = slots.lock();
        if matches!(slots.get(&channel), Some(Slot::Active(active)) if active.id == id) {
            slots.remove(&channel);
        }
    }
    debug!("Stream {} on {} closed by the gateway", id, channel);
}
