use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use ripple_types::events::ChangeEvent;

use crate::subscription::{Subscription, SubscriptionId, SubscriptionSpec};

struct Registration {
    spec: SubscriptionSpec,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

/// Fans row changes out to every live subscription whose spec matches.
/// Gateway implementations own one and publish into it after each write.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// subscription_id -> registration
    registrations: RwLock<HashMap<SubscriptionId, Registration>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Returns the receiving end.
    pub fn register(&self, spec: SubscriptionSpec) -> Subscription {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        debug!("subscription {} opened on channel '{}' ({} {})", id, spec.channel, spec.kind, spec.table);
        let subscription = Subscription::new(id, spec.clone(), &tx, rx);
        self.inner
            .registrations
            .write()
            .insert(id, Registration { spec, tx });
        subscription
    }

    /// Drop a subscriber. Its stream ends. Returns false if it was already gone.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.registrations.write().remove(&id);
        if let Some(reg) = &removed {
            debug!("subscription {} closed on channel '{}'", id, reg.spec.channel);
        }
        removed.is_some()
    }

    /// Drop every subscriber, whoever created it. Returns how many were closed.
    pub fn unregister_all(&self) -> usize {
        let mut registrations = self.inner.registrations.write();
        let count = registrations.len();
        registrations.clear();
        count
    }

    /// Deliver an event to every matching subscriber. Returns the delivery count.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let registrations = self.inner.registrations.read();
            for (id, reg) in registrations.iter() {
                if !reg.spec.matches(event) {
                    continue;
                }
                if reg.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        // Receivers dropped without unsubscribing
        if !dead.is_empty() {
            let mut registrations = self.inner.registrations.write();
            for id in dead {
                registrations.remove(&id);
            }
        }

        delivered
    }

    /// Number of open subscriptions.
    pub fn active(&self) -> usize {
        self.inner.registrations.read().len()
    }

    /// Channel names of every open subscription.
    pub fn channels(&self) -> Vec<String> {
        self.inner
            .registrations
            .read()
            .values()
            .map(|reg| reg.spec.channel.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_types::events::{ChangeKind, Table};
    use serde_json::json;

    fn profile_updates() -> SubscriptionSpec {
        SubscriptionSpec::new("profile-updates", Table::Profiles, ChangeKind::Update)
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscribers_only() {
        let dispatcher = Dispatcher::new();
        let mut profiles = dispatcher.register(profile_updates());
        let mut posts = dispatcher.register(SubscriptionSpec::new("posts", Table::Posts, ChangeKind::Update));

        let delivered = dispatcher.publish(&ChangeEvent::update(Table::Profiles, json!({ "id": "u1" })));
        assert_eq!(delivered, 1);

        let event = profiles.next().await.unwrap();
        assert_eq!(event.new["id"], "u1");
        assert!(posts.try_next().is_none());
    }

    #[tokio::test]
    async fn unregister_ends_the_stream() {
        let dispatcher = Dispatcher::new();
        let mut sub = dispatcher.register(profile_updates());
        let liveness = sub.liveness();
        assert!(liveness.is_open());

        assert!(dispatcher.unregister(sub.id()));
        assert!(!liveness.is_open());
        assert!(!dispatcher.unregister(sub.id()));
        assert!(sub.next().await.is_none());
        assert_eq!(dispatcher.active(), 0);
    }

    #[test]
    fn dropped_receivers_are_pruned_on_publish() {
        let dispatcher = Dispatcher::new();
        let sub = dispatcher.register(profile_updates());
        drop(sub);

        let delivered = dispatcher.publish(&ChangeEvent::update(Table::Profiles, json!({ "id": "u1" })));
        assert_eq!(delivered, 0);
        assert_eq!(dispatcher.active(), 0);
    }

    #[test]
    fn unregister_all_closes_everything() {
        let dispatcher = Dispatcher::new();
        let a = dispatcher.register(profile_updates());
        let _b = dispatcher.register(profile_updates());
        let liveness = a.liveness();
        assert_eq!(dispatcher.channels(), vec!["profile-updates", "profile-updates"]);
        assert_eq!(dispatcher.unregister_all(), 2);
        assert_eq!(dispatcher.active(), 0);
        assert!(!liveness.is_open());
    }
}
