//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::ws::ReconnectConfig;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/ws";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Socket endpoint, e.g. `wss://search.example.com/ws`.
    pub url: String,
    /// Where identity tokens are persisted. `None` means the platform config dir.
    pub state_dir: Option<PathBuf>,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            state_dir: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from the process environment.
    ///
    /// Environment variables:
    /// - `PARLEY_WS_URL`: socket endpoint (default: "ws://localhost:8000/ws")
    /// - `PARLEY_STATE_DIR`: directory for persisted identity (default: platform config dir)
    /// - `PARLEY_RECONNECT_BASE_MS`: first backoff delay (default: 1000)
    /// - `PARLEY_RECONNECT_MAX_ATTEMPTS`: attempts before giving up (default: 5)
    /// - `PARLEY_RECONNECT_MAX_DELAY_MS`: backoff cap, `0` for none (default: 30000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let url = lookup("PARLEY_WS_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(defaults.url);
        let state_dir = lookup("PARLEY_STATE_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        let base_ms = parse_or(&lookup, "PARLEY_RECONNECT_BASE_MS", 1000u64);
        let max_attempts = parse_or(
            &lookup,
            "PARLEY_RECONNECT_MAX_ATTEMPTS",
            defaults.reconnect.max_attempts,
        );
        let max_delay_ms = parse_or(&lookup, "PARLEY_RECONNECT_MAX_DELAY_MS", 30_000u64);

        Self {
            url,
            state_dir,
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(base_ms),
                max_attempts,
                max_delay: (max_delay_ms > 0).then(|| Duration::from_millis(max_delay_ms)),
            },
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                crate::log_warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
                default
            }
        },
    }
}
