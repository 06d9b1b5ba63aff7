use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use ripple_gateway::dispatcher::Dispatcher;
use ripple_gateway::{
    Filter, Gateway, GatewayError, GatewayResult, Query, Subscription, SubscriptionId, SubscriptionSpec,
};
use ripple_types::events::{ChangeEvent, Table};
use ripple_types::models::AuthUser;

use crate::Database;
use crate::models::{ProfileRow, is_column};
use crate::queries::{Condition, PostInsert, normalize_timestamp, timestamp, to_sql_value};

/// In-process gateway over a local SQLite file.
///
/// Writes publish change events through its own [`Dispatcher`], so live
/// subscriptions behave the way they do against the hosted backend.
#[derive(Clone)]
pub struct LocalGateway {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    db: Database,
    dispatcher: Dispatcher,
    session: RwLock<Option<AuthUser>>,
}

impl LocalGateway {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(LocalInner {
                db,
                dispatcher: Dispatcher::new(),
                session: RwLock::new(None),
            }),
        }
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn sign_in(&self, user: AuthUser) {
        info!("{} signed in", user.id);
        *self.inner.session.write() = Some(user);
    }

    pub fn sign_out(&self) {
        if let Some(user) = self.inner.session.write().take() {
            info!("{} signed out", user.id);
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Run blocking SQLite work off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> GatewayResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner.db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                GatewayError::Network(e.to_string())
            })?
            .map_err(|e| GatewayError::Server(format!("{:#}", e)))
    }
}

fn check_column(table: Table, column: &str) -> GatewayResult<()> {
    if is_column(table, column) {
        Ok(())
    } else {
        Err(GatewayError::InvalidQuery(format!("unknown column '{}' on {}", column, table)))
    }
}

fn sql_value(value: &Value) -> GatewayResult<rusqlite::types::Value> {
    to_sql_value(value).map_err(|e| GatewayError::InvalidQuery(e.to_string()))
}

fn conditions(table: Table, filters: &[Filter]) -> GatewayResult<Vec<Condition>> {
    filters
        .iter()
        .map(|f| {
            check_column(table, &f.column)?;
            Ok((f.column.clone(), sql_value(&f.value)?))
        })
        .collect()
}

fn object(value: &Value) -> GatewayResult<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| GatewayError::InvalidQuery(format!("expected a JSON object, got {}", value)))
}

fn assignments(table: Table, patch: &Value) -> GatewayResult<Vec<Condition>> {
    let mut out = Vec::new();
    for (column, value) in object(patch)? {
        check_column(table, column)?;
        if column == "id" {
            return Err(GatewayError::InvalidQuery("row ids are immutable".into()));
        }
        out.push((column.clone(), sql_value(value)?));
    }
    Ok(out)
}

fn opt_text(record: &Map<String, Value>, key: &str) -> GatewayResult<Option<String>> {
    match record.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(GatewayError::InvalidQuery(format!("'{}' must be text, got {}", key, other))),
    }
}

fn required_text(record: &Map<String, Value>, key: &str) -> GatewayResult<String> {
    opt_text(record, key)?.ok_or_else(|| GatewayError::InvalidQuery(format!("'{}' is required", key)))
}

impl Gateway for LocalGateway {
    async fn query(&self, query: Query) -> GatewayResult<Vec<Value>> {
        let table = query.table;
        let conditions = conditions(table, &query.filters)?;
        if let Some(order) = &query.order {
            check_column(table, &order.column)?;
        }
        if query.with_author && table != Table::Posts {
            return Err(GatewayError::InvalidQuery(format!("{} has no author to embed", table)));
        }

        let order = query.order;
        let with_author = query.with_author;
        self.blocking(move |db| {
            let order = order.as_ref().map(|o| (o.column.as_str(), o.ascending));
            let rows: Vec<Value> = match table {
                Table::Posts => db
                    .select_posts(&conditions, order)?
                    .iter()
                    .map(|row| row.to_json(with_author))
                    .collect(),
                Table::Profiles => db
                    .select_profiles(&conditions, order)?
                    .iter()
                    .map(ProfileRow::to_json)
                    .collect(),
            };
            Ok(rows)
        })
        .await
    }

    async fn insert(&self, table: Table, record: Value) -> GatewayResult<Value> {
        let fields = object(&record)?;
        for column in fields.keys() {
            check_column(table, column)?;
        }

        let row = match table {
            Table::Posts => {
                let created_at = match opt_text(fields, "created_at")? {
                    Some(raw) => normalize_timestamp(&raw).map_err(|e| GatewayError::InvalidQuery(e.to_string()))?,
                    None => timestamp(chrono::Utc::now()),
                };
                let post = PostInsert {
                    id: opt_text(fields, "id")?.unwrap_or_else(|| Uuid::new_v4().to_string()),
                    created_at,
                    caption: opt_text(fields, "caption")?,
                    image: opt_text(fields, "image")?,
                    user_id: required_text(fields, "user_id")?,
                };
                self.blocking(move |db| Ok(db.insert_post(&post)?.to_json(false))).await?
            }
            Table::Profiles => {
                let profile = ProfileRow {
                    id: required_text(fields, "id")?,
                    username: opt_text(fields, "username")?,
                    avatar_url: opt_text(fields, "avatar_url")?,
                    push_token: opt_text(fields, "push_token")?,
                };
                self.blocking(move |db| Ok(db.insert_profile(&profile)?.to_json())).await?
            }
        };

        let delivered = self.inner.dispatcher.publish(&ChangeEvent::insert(table, row.clone()));
        debug!("insert on {} delivered to {} subscribers", table, delivered);
        Ok(row)
    }

    async fn update(&self, table: Table, filters: Vec<Filter>, patch: Value) -> GatewayResult<()> {
        if filters.is_empty() {
            return Err(GatewayError::InvalidQuery(format!("update on {} needs a filter", table)));
        }
        let conditions = conditions(table, &filters)?;
        let assignments = assignments(table, &patch)?;

        let rows = self
            .blocking(move |db| {
                let ids = db.update_rows(table, &conditions, &assignments)?;
                let mut rows = Vec::with_capacity(ids.len());
                for id in ids {
                    let by_id = [("id".to_string(), rusqlite::types::Value::Text(id))];
                    match table {
                        Table::Posts => rows.extend(db.select_posts(&by_id, None)?.iter().map(|r| r.to_json(false))),
                        Table::Profiles => rows.extend(db.select_profiles(&by_id, None)?.iter().map(ProfileRow::to_json)),
                    }
                }
                Ok(rows)
            })
            .await?;

        for row in rows {
            let delivered = self.inner.dispatcher.publish(&ChangeEvent::update(table, row));
            debug!("update on {} delivered to {} subscribers", table, delivered);
        }
        Ok(())
    }

    async fn subscribe(&self, spec: SubscriptionSpec) -> GatewayResult<Subscription> {
        Ok(self.inner.dispatcher.register(spec))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.dispatcher.unregister(id)
    }

    fn unsubscribe_all(&self) -> usize {
        self.inner.dispatcher.unregister_all()
    }

    async fn current_user(&self) -> GatewayResult<Option<AuthUser>> {
        Ok(self.inner.session.read().clone())
    }
}
