use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use serde_json::Value;

use ripple_types::events::Table;

use crate::Database;
use crate::models::{PostRow, ProfileRow, is_column};

/// `column = value` pair, already validated against the table's allowlist
/// by the time it reaches SQL.
pub type Condition = (String, SqlValue);

/// Fields of a post about to be stored. Id and timestamp are filled in by
/// the gateway when the caller leaves them out.
#[derive(Debug, Clone)]
pub struct PostInsert {
    pub id: String,
    pub created_at: String,
    pub caption: Option<String>,
    pub image: Option<String>,
    pub user_id: String,
}

const POST_SELECT: &str = "SELECT p.id, p.created_at, p.caption, p.image, p.user_id, pr.username, pr.avatar_url
     FROM posts p
     LEFT JOIN profiles pr ON pr.id = p.user_id";

const PROFILE_SELECT: &str = "SELECT id, username, avatar_url, push_token FROM profiles";

/// Timestamps are stored as fixed-width RFC 3339 UTC so text order is time order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn normalize_timestamp(raw: &str) -> Result<String> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow!("bad timestamp '{}': {}", raw, e))?;
    Ok(timestamp(parsed.with_timezone(&Utc)))
}

pub fn to_sql_value(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            _ => bail!("number out of range: {}", n),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => bail!("unsupported column value: {}", other),
    })
}

fn check_column(table: Table, column: &str) -> Result<()> {
    if !is_column(table, column) {
        bail!("unknown column '{}' on {}", column, table);
    }
    Ok(())
}

fn where_clause(table: Table, prefix: &str, filters: &[Condition]) -> Result<(String, Vec<SqlValue>)> {
    if filters.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut parts = Vec::with_capacity(filters.len());
    let mut params = Vec::with_capacity(filters.len());
    for (column, value) in filters {
        check_column(table, column)?;
        if matches!(value, SqlValue::Null) {
            parts.push(format!("{}{} IS NULL", prefix, column));
        } else {
            params.push(value.clone());
            parts.push(format!("{}{} = ?{}", prefix, column, params.len()));
        }
    }

    Ok((format!(" WHERE {}", parts.join(" AND ")), params))
}

fn order_clause(table: Table, prefix: &str, order: Option<(&str, bool)>) -> Result<String> {
    let Some((column, ascending)) = order else {
        return Ok(String::new());
    };
    check_column(table, column)?;
    let direction = if ascending { "ASC" } else { "DESC" };
    // id breaks ties so equal timestamps still come back in a stable order
    Ok(format!(" ORDER BY {p}{} {}, {p}id ASC", column, direction, p = prefix))
}

impl Database {
    // -- Posts --

    pub fn select_posts(&self, filters: &[Condition], order: Option<(&str, bool)>) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| query_posts(conn, filters, order))
    }

    pub fn insert_post(&self, post: &PostInsert) -> Result<PostRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, created_at, caption, image, user_id) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![post.id, post.created_at, post.caption, post.image, post.user_id],
            )?;
            query_posts(conn, &[("id".to_string(), SqlValue::Text(post.id.clone()))], None)?
                .pop()
                .ok_or_else(|| anyhow!("post {} vanished after insert", post.id))
        })
    }

    // -- Profiles --

    pub fn select_profiles(&self, filters: &[Condition], order: Option<(&str, bool)>) -> Result<Vec<ProfileRow>> {
        self.with_conn(|conn| query_profiles(conn, filters, order))
    }

    pub fn insert_profile(&self, profile: &ProfileRow) -> Result<ProfileRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, username, avatar_url, push_token) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![profile.id, profile.username, profile.avatar_url, profile.push_token],
            )?;
            Ok(profile.clone())
        })
    }

    // -- Updates --

    /// Apply `assignments` to every row matching `filters`, atomically.
    /// Returns the ids of the rows that were touched.
    pub fn update_rows(&self, table: Table, filters: &[Condition], assignments: &[Condition]) -> Result<Vec<String>> {
        if filters.is_empty() {
            bail!("refusing to update every row of {}", table);
        }
        if assignments.is_empty() {
            return Ok(Vec::new());
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;

            let (where_sql, where_params) = where_clause(table, "", filters)?;
            let ids: Vec<String> = {
                let mut stmt = tx.prepare(&format!("SELECT id FROM {}{}", table, where_sql))?;
                let ids = stmt
                    .query_map(params_from_iter(where_params.iter()), |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                ids
            };

            let mut sets = Vec::with_capacity(assignments.len());
            let mut params = Vec::with_capacity(assignments.len() + 1);
            for (column, value) in assignments {
                check_column(table, column)?;
                params.push(value.clone());
                sets.push(format!("{} = ?{}", column, params.len()));
            }
            let sql = format!("UPDATE {} SET {} WHERE id = ?{}", table, sets.join(", "), params.len() + 1);

            for id in &ids {
                let mut row_params = params.clone();
                row_params.push(SqlValue::Text(id.clone()));
                tx.execute(&sql, params_from_iter(row_params.iter()))?;
            }

            tx.commit()?;
            Ok(ids)
        })
    }
}

fn query_posts(conn: &Connection, filters: &[Condition], order: Option<(&str, bool)>) -> Result<Vec<PostRow>> {
    let (where_sql, params) = where_clause(Table::Posts, "p.", filters)?;
    let order_sql = order_clause(Table::Posts, "p.", order)?;

    let mut stmt = conn.prepare(&format!("{}{}{}", POST_SELECT, where_sql, order_sql))?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok(PostRow {
                id: row.get(0)?,
                created_at: row.get(1)?,
                caption: row.get(2)?,
                image: row.get(3)?,
                user_id: row.get(4)?,
                author_username: row.get(5)?,
                author_avatar_url: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_profiles(conn: &Connection, filters: &[Condition], order: Option<(&str, bool)>) -> Result<Vec<ProfileRow>> {
    let (where_sql, params) = where_clause(Table::Profiles, "", filters)?;
    let order_sql = order_clause(Table::Profiles, "", order)?;

    let mut stmt = conn.prepare(&format!("{}{}{}", PROFILE_SELECT, where_sql, order_sql))?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok(ProfileRow {
                id: row.get(0)?,
                username: row.get(1)?,
                avatar_url: row.get(2)?,
                push_token: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
