//! Presentation rules shared by every screen that renders posts or profiles.

use chrono::{DateTime, Utc};

use crate::models::{Post, PostAuthor, Profile};

/// Avatars a user can pick from. The first entry doubles as the fallback.
pub const AVATAR_CATALOG: &[&str] = &[
    "https://cdn-icons-png.flaticon.com/128/1326/1326377.png",
    "https://cdn-icons-png.flaticon.com/128/3940/3940403.png",
    "https://cdn-icons-png.flaticon.com/128/1308/1308845.png",
    "https://cdn-icons-png.flaticon.com/128/1326/1326390.png",
    "https://cdn-icons-png.flaticon.com/128/4322/4322991.png",
    "https://cdn-icons-png.flaticon.com/128/3940/3940417.png",
    "https://cdn-icons-png.flaticon.com/128/1326/1326405.png",
    "https://cdn-icons-png.flaticon.com/128/4322/4322992.png",
    "https://cdn-icons-png.flaticon.com/128/9308/9308979.png",
    "https://cdn-icons-png.flaticon.com/128/9308/9308963.png",
    "https://cdn-icons-png.flaticon.com/128/1810/1810917.png",
    "https://cdn-icons-png.flaticon.com/128/9308/9308891.png",
    "https://cdn-icons-png.flaticon.com/128/9308/9308938.png",
    "https://cdn-icons-png.flaticon.com/128/9308/9308879.png",
    "https://cdn-icons-png.flaticon.com/128/6740/6740990.png",
    "https://cdn-icons-png.flaticon.com/128/9308/9308872.png",
    "https://cdn-icons-png.flaticon.com/128/2021/2021646.png",
    "https://cdn-icons-png.flaticon.com/128/9985/9985812.png",
];

pub const DEFAULT_AVATAR: &str = AVATAR_CATALOG[0];

pub const DEFAULT_USERNAME: &str = "New user";

pub const DEFAULT_MEDIA_BASE_URL: &str = "https://res.cloudinary.com/dupithuzj/image/upload";

pub fn is_catalog_avatar(url: &str) -> bool {
    AVATAR_CATALOG.contains(&url)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn avatar_or_default(avatar_url: Option<&str>) -> &str {
    non_empty(avatar_url).unwrap_or(DEFAULT_AVATAR)
}

pub fn username_or_default(username: Option<&str>) -> &str {
    non_empty(username).unwrap_or(DEFAULT_USERNAME)
}

impl PostAuthor {
    pub fn display_avatar(&self) -> &str {
        avatar_or_default(self.avatar_url.as_deref())
    }

    pub fn display_name(&self) -> &str {
        username_or_default(self.username.as_deref())
    }
}

impl Profile {
    pub fn display_avatar(&self) -> &str {
        avatar_or_default(self.avatar_url.as_deref())
    }

    pub fn display_name(&self) -> &str {
        username_or_default(self.username.as_deref())
    }
}

impl Post {
    /// CDN URL of the attached media, if any.
    pub fn media_url(&self, base_url: &str) -> Option<String> {
        non_empty(self.image.as_deref()).map(|image| media_url(base_url, image))
    }
}

/// Media references are public ids on the CDN; renditions are served as JPEG.
pub fn media_url(base_url: &str, image: &str) -> String {
    format!("{}/{}.jpg", base_url.trim_end_matches('/'), image)
}

/// Coarse "N units ago" label used under each post.
pub fn time_ago(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - created_at).num_seconds().max(0);
    if seconds < 60 {
        return format!("{} seconds ago", seconds);
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{} minutes ago", minutes);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{} hours ago", hours);
    }
    format!("{} days ago", hours / 24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn time_ago_buckets() {
        let now = at(0);
        assert_eq!(time_ago(now, now), "0 seconds ago");
        assert_eq!(time_ago(now - Duration::seconds(59), now), "59 seconds ago");
        assert_eq!(time_ago(now - Duration::seconds(60), now), "1 minutes ago");
        assert_eq!(time_ago(now - Duration::minutes(61), now), "1 hours ago");
        assert_eq!(time_ago(now - Duration::hours(49), now), "2 days ago");
    }

    #[test]
    fn future_timestamps_clamp_to_zero() {
        assert_eq!(time_ago(at(30), at(0)), "0 seconds ago");
    }

    #[test]
    fn fallbacks_apply_to_empty_values() {
        let author = PostAuthor {
            id: "u1".into(),
            username: Some("   ".into()),
            avatar_url: Some(String::new()),
        };
        assert_eq!(author.display_name(), DEFAULT_USERNAME);
        assert_eq!(author.display_avatar(), DEFAULT_AVATAR);
        assert!(is_catalog_avatar(DEFAULT_AVATAR));
    }

    #[test]
    fn media_url_trims_trailing_slash() {
        assert_eq!(
            media_url("https://cdn.example/upload/", "abc123"),
            "https://cdn.example/upload/abc123.jpg"
        );
    }

    #[test]
    fn default_media_base_is_the_production_cloud() {
        assert_eq!(
            media_url(DEFAULT_MEDIA_BASE_URL, "abc123"),
            "https://res.cloudinary.com/dupithuzj/image/upload/abc123.jpg"
        );
    }
}
