use std::fmt;

use ripple_types::events::{ChangeEvent, ChangeKind, Table};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one live subscription on one gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a subscriber wants to hear about.
/// The backend does no per-row filtering; subscribers filter themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub channel: String,
    pub table: Table,
    pub kind: ChangeKind,
}

impl SubscriptionSpec {
    pub fn new(channel: impl Into<String>, table: Table, kind: ChangeKind) -> Self {
        Self {
            channel: channel.into(),
            table,
            kind,
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.table == event.table && self.kind == event.kind
    }
}

/// Receiving end of a live subscription.
/// The stream ends once the gateway drops the subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    spec: SubscriptionSpec,
    sender: mpsc::WeakUnboundedSender<ChangeEvent>,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Tells whether the gateway still holds the sending side of a
/// subscription, without owning the stream.
#[derive(Debug, Clone)]
pub struct Liveness(mpsc::WeakUnboundedSender<ChangeEvent>);

impl Liveness {
    pub fn is_open(&self) -> bool {
        self.0.upgrade().is_some()
    }
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        spec: SubscriptionSpec,
        sender: &mpsc::UnboundedSender<ChangeEvent>,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> Self {
        Self {
            id,
            spec,
            sender: sender.downgrade(),
            events,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn spec(&self) -> &SubscriptionSpec {
        &self.spec
    }

    /// Handle that outlives moving the stream into a delivery task.
    pub fn liveness(&self) -> Liveness {
        Liveness(self.sender.clone())
    }

    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Non-blocking poll for an already-delivered event.
    pub fn try_next(&mut self) -> Option<ChangeEvent> {
        self.events.try_recv().ok()
    }
}
