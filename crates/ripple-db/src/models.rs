//! Database row types — these map directly to SQLite rows.
//! The gateway hands them out as JSON shaped like the hosted backend's rows.

use ripple_types::events::Table;
use serde_json::{Value, json};

pub const POST_COLUMNS: &[&str] = &["id", "created_at", "caption", "image", "user_id"];

pub const PROFILE_COLUMNS: &[&str] = &["id", "username", "avatar_url", "push_token"];

/// Columns a caller may filter, order or write by.
pub fn columns(table: Table) -> &'static [&'static str] {
    match table {
        Table::Posts => POST_COLUMNS,
        Table::Profiles => PROFILE_COLUMNS,
    }
}

pub fn is_column(table: Table, column: &str) -> bool {
    columns(table).contains(&column)
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: String,
    pub created_at: String,
    pub caption: Option<String>,
    pub image: Option<String>,
    pub user_id: String,
    pub author_username: Option<String>,
    pub author_avatar_url: Option<String>,
}

impl PostRow {
    pub fn to_json(&self, with_author: bool) -> Value {
        let mut row = json!({
            "id": self.id,
            "created_at": self.created_at,
            "caption": self.caption,
            "image": self.image,
            "user_id": self.user_id,
        });
        if with_author {
            row["user"] = json!({
                "id": self.user_id,
                "username": self.author_username,
                "avatar_url": self.author_avatar_url,
            });
        }
        row
    }
}

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub id: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub push_token: Option<String>,
}

impl ProfileRow {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "username": self.username,
            "avatar_url": self.avatar_url,
            "push_token": self.push_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_is_embedded_on_request() {
        let row = PostRow {
            id: "p1".into(),
            created_at: "2024-05-01T10:00:00.000Z".into(),
            caption: None,
            image: Some("img".into()),
            user_id: "u1".into(),
            author_username: Some("ana".into()),
            author_avatar_url: None,
        };

        assert!(row.to_json(false).get("user").is_none());
        let joined = row.to_json(true);
        assert_eq!(joined["user"]["id"], "u1");
        assert_eq!(joined["user"]["username"], "ana");
        assert!(joined["user"]["avatar_url"].is_null());
    }

    #[test]
    fn allowlist_rejects_unknown_columns() {
        assert!(is_column(Table::Posts, "user_id"));
        assert!(!is_column(Table::Posts, "user_id; DROP TABLE posts"));
        assert!(!is_column(Table::Profiles, "user_id"));
    }
}
