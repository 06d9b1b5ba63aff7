use std::str::FromStr;

use thiserror::Error;

use ripple_types::display::DEFAULT_MEDIA_BASE_URL;

pub const DEFAULT_PROFILE_CHANNEL: &str = "profile-updates";

/// How to surface a situation the user may or may not care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Log only.
    #[default]
    Silent,
    /// Log and raise a user-visible notice.
    Notify,
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(Self::Silent),
            "notify" => Ok(Self::Notify),
            other => Err(format!("expected 'silent' or 'notify', got '{}'", other)),
        }
    }
}

/// Which subscriptions a component closes when it unmounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeardownPolicy {
    /// Only the handles this component opened.
    #[default]
    Owned,
    /// Also every other channel on the gateway. Breaks concurrently mounted
    /// views that share the gateway.
    ProcessWide,
}

impl FromStr for TeardownPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owned" => Ok(Self::Owned),
            "process-wide" | "process_wide" | "all" => Ok(Self::ProcessWide),
            other => Err(format!("expected 'owned' or 'process-wide', got '{}'", other)),
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// A user-scoped operation ran with nobody signed in.
    pub missing_session: Policy,
    /// A live avatar change matched no post in the feed.
    pub unmatched_patch: Policy,
    pub teardown: TeardownPolicy,
    /// Channel name for the profile change subscription.
    pub profile_channel: String,
    pub media_base_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            missing_session: Policy::Silent,
            unmatched_patch: Policy::Silent,
            teardown: TeardownPolicy::Owned,
            profile_channel: DEFAULT_PROFILE_CHANNEL.to_string(),
            media_base_url: DEFAULT_MEDIA_BASE_URL.to_string(),
        }
    }
}

impl SyncConfig {
    /// Read `RIPPLE_*` variables from the process environment, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("RIPPLE_MISSING_SESSION") {
            config.missing_session = parse("RIPPLE_MISSING_SESSION", &raw)?;
        }
        if let Some(raw) = lookup("RIPPLE_UNMATCHED_PATCH") {
            config.unmatched_patch = parse("RIPPLE_UNMATCHED_PATCH", &raw)?;
        }
        if let Some(raw) = lookup("RIPPLE_TEARDOWN") {
            config.teardown = parse("RIPPLE_TEARDOWN", &raw)?;
        }
        if let Some(raw) = lookup("RIPPLE_PROFILE_CHANNEL") {
            if raw.trim().is_empty() {
                return Err(ConfigError {
                    var: "RIPPLE_PROFILE_CHANNEL",
                    reason: "channel name is empty".into(),
                });
            }
            config.profile_channel = raw;
        }
        if let Some(raw) = lookup("RIPPLE_MEDIA_BASE_URL") {
            config.media_base_url = raw;
        }

        Ok(config)
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = String>,
{
    raw.parse().map_err(|reason| ConfigError { var, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.profile_channel, "profile-updates");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("RIPPLE_MISSING_SESSION", "Notify"),
            ("RIPPLE_UNMATCHED_PATCH", "silent"),
            ("RIPPLE_TEARDOWN", "process-wide"),
            ("RIPPLE_PROFILE_CHANNEL", "avatars"),
        ]))
        .unwrap();

        assert_eq!(config.missing_session, Policy::Notify);
        assert_eq!(config.unmatched_patch, Policy::Silent);
        assert_eq!(config.teardown, TeardownPolicy::ProcessWide);
        assert_eq!(config.profile_channel, "avatars");
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = SyncConfig::from_lookup(lookup(&[("RIPPLE_TEARDOWN", "sometimes")])).unwrap_err();
        assert_eq!(err.var, "RIPPLE_TEARDOWN");

        let err = SyncConfig::from_lookup(lookup(&[("RIPPLE_PROFILE_CHANNEL", " ")])).unwrap_err();
        assert_eq!(err.var, "RIPPLE_PROFILE_CHANNEL");
    }
}
