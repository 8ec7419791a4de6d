//! Sync tuning parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_PRESENCE_THROTTLE_MS: u64 = 100;
pub const DEFAULT_PRESENCE_TTL_MS: u64 = 30_000;
pub const DEFAULT_ASSET_FETCH_TIMEOUT_SECS: u64 = 30;

/// Timing knobs for a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiescence window before a burst of local edits is written.
    pub save_debounce: Duration,
    /// Minimum spacing between outbound cursor presence writes.
    pub presence_throttle: Duration,
    /// Presence rows older than this are hidden from the collaborator view.
    pub presence_ttl: Duration,
    /// Upper bound on a single asset download.
    pub asset_fetch_timeout: Duration,
}

impl SyncConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// - `SAVE_DEBOUNCE_MS`: default 300
    /// - `PRESENCE_THROTTLE_MS`: default 100
    /// - `PRESENCE_TTL_MS`: default 30000
    /// - `ASSET_FETCH_TIMEOUT_SECS`: default 30
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            save_debounce: Duration::from_millis(env_parse("SAVE_DEBOUNCE_MS", DEFAULT_SAVE_DEBOUNCE_MS)),
            presence_throttle: Duration::from_millis(env_parse("PRESENCE_THROTTLE_MS", DEFAULT_PRESENCE_THROTTLE_MS)),
            presence_ttl: Duration::from_millis(env_parse("PRESENCE_TTL_MS", DEFAULT_PRESENCE_TTL_MS)),
            asset_fetch_timeout: Duration::from_secs(env_parse(
                "ASSET_FETCH_TIMEOUT_SECS",
                DEFAULT_ASSET_FETCH_TIMEOUT_SECS,
            )),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            save_debounce: Duration::from_millis(DEFAULT_SAVE_DEBOUNCE_MS),
            presence_throttle: Duration::from_millis(DEFAULT_PRESENCE_THROTTLE_MS),
            presence_ttl: Duration::from_millis(DEFAULT_PRESENCE_TTL_MS),
            asset_fetch_timeout: Duration::from_secs(DEFAULT_ASSET_FETCH_TIMEOUT_SECS),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
