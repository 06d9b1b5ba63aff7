use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Denormalized author snapshot embedded in every post.
/// May lag behind the live `Profile` until a change event patches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAuthor {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Older rows carry the text under `content`.
    #[serde(default, alias = "content")]
    pub caption: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub user: PostAuthor,
}

/// Account metadata, one row per signed-up user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Write-only from the client's point of view; never echoed back out.
    #[serde(default, skip_serializing)]
    pub push_token: Option<String>,
}

/// The signed-in account as reported by the auth session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

// -- Mutations --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Partial profile update. Only fields that are `Some` get written.
///
/// `avatar_url: Some(None)` clears the avatar (written as `null`), while
/// `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub avatar_url: Option<Option<String>>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.avatar_url.is_none()
    }

    pub fn set_avatar(url: impl Into<String>) -> Self {
        Self {
            avatar_url: Some(Some(url.into())),
            ..Self::default()
        }
    }

    pub fn clear_avatar() -> Self {
        Self {
            avatar_url: Some(None),
            ..Self::default()
        }
    }
}

/// A key that is present deserializes to `Some`, even when its value is null.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
