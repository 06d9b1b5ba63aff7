use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend tables the client reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Posts,
    Profiles,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Profiles => "profiles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => f.write_str("INSERT"),
            Self::Update => f.write_str("UPDATE"),
            Self::Delete => f.write_str("DELETE"),
        }
    }
}

/// A row-level change pushed by the backend to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Row state after the change. `Null` for deletes.
    #[serde(default)]
    pub new: Value,
    /// Row state before the change, when the backend reports it.
    #[serde(default)]
    pub old: Option<Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn update(table: Table, new: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            new,
            old: None,
            commit_timestamp: Utc::now(),
        }
    }

    pub fn insert(table: Table, new: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            new,
            old: None,
            commit_timestamp: Utc::now(),
        }
    }

    /// Decode the post-change row into a typed model.
    pub fn decode_new<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.new)
    }
}
