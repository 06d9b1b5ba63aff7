//! Contract between the sync core and the hosted backend.
//!
//! The backend owns persistence, auth and change delivery. Everything the
//! core needs from it goes through [`Gateway`]; rows travel as JSON objects
//! shaped like the backend's `posts` and `profiles` tables.

pub mod dispatcher;
pub mod error;
pub mod query;
pub mod subscription;

use std::future::Future;

use serde_json::Value;

use ripple_types::events::Table;
use ripple_types::models::AuthUser;

pub use error::{GatewayError, GatewayResult};
pub use query::{Filter, Order, Query};
pub use subscription::{Liveness, Subscription, SubscriptionId, SubscriptionSpec};

/// Query, mutate, subscribe and auth operations against the backend.
///
/// One gateway is shared by every component of a signed-in session; it is
/// handed to components explicitly rather than looked up globally.
pub trait Gateway: Send + Sync + 'static {
    /// Read rows from one table.
    fn query(&self, query: Query) -> impl Future<Output = GatewayResult<Vec<Value>>> + Send;

    /// Insert one record. Returns the stored row.
    fn insert(&self, table: Table, record: Value) -> impl Future<Output = GatewayResult<Value>> + Send;

    /// Apply `patch` to every row matching all `filters`.
    fn update(
        &self,
        table: Table,
        filters: Vec<Filter>,
        patch: Value,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Open a live change stream.
    fn subscribe(&self, spec: SubscriptionSpec) -> impl Future<Output = GatewayResult<Subscription>> + Send;

    /// Close one subscription. Returns false if it was not open.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Close every subscription on this gateway, including ones other
    /// components opened. Returns how many were closed.
    fn unsubscribe_all(&self) -> usize;

    /// The signed-in account, or `None` when nobody is signed in.
    fn current_user(&self) -> impl Future<Output = GatewayResult<Option<AuthUser>>> + Send;
}
