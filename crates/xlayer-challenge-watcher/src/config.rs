//! Configuration

use crate::{retry::RetryConfig, types::AssertionHash};
use serde::{Deserialize, Serialize};
use std::{env, time::Duration};
use tracing::warn;

/// Watcher configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Name of the validator, attached to log lines
    pub validator_name: String,
    /// Delay between head polls in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum number of blocks covered by a single log filter during the initial scan
    pub max_get_log_blocks: u64,
    /// Only track challenges on these assertions. Empty tracks every assertion.
    pub track_challenge_parent_assertion_hashes: Vec<AssertionHash>,
    /// Backoff for retried chain reads and event processing
    pub retry: RetryConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            validator_name: "validator".to_string(),
            poll_interval_ms: 500,
            max_get_log_blocks: 1000,
            track_challenge_parent_assertion_hashes: Vec::new(),
            retry: RetryConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(default)
        };

        let validator_name = lookup("WATCHER_VALIDATOR_NAME")
            .unwrap_or(defaults.validator_name);
        let allow_list = lookup("WATCHER_TRACK_ASSERTIONS")
            .map(|list| parse_assertion_list(&list))
            .unwrap_or_default();
        let retry = RetryConfig {
            initial_backoff_ms: number(
                "WATCHER_RETRY_INITIAL_BACKOFF_MS",
                defaults.retry.initial_backoff_ms,
            ),
            max_backoff_ms: number(
                "WATCHER_RETRY_MAX_BACKOFF_MS",
                defaults.retry.max_backoff_ms,
            ),
        };

        Self {
            validator_name,
            poll_interval_ms: number("WATCHER_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            max_get_log_blocks: number("WATCHER_MAX_GET_LOG_BLOCKS", defaults.max_get_log_blocks),
            track_challenge_parent_assertion_hashes: allow_list,
            retry,
        }
    }

    /// Poll interval as a duration, never zero.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Whether challenges on `assertion_hash` should be tracked.
    pub fn tracks_assertion(&self, assertion_hash: AssertionHash) -> bool {
        self.track_challenge_parent_assertion_hashes.is_empty()
            || self.track_challenge_parent_assertion_hashes.contains(&assertion_hash)
    }
}

fn parse_assertion_list(list: &str) -> Vec<AssertionHash> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(hash) => Some(AssertionHash(hash)),
            Err(e) => {
                warn!(
                    target: "challenge_watcher",
                    value = s,
                    error = %e,
                    "Ignoring invalid assertion hash"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = WatcherConfig::from_lookup(lookup(&[]));
        assert_eq!(config, WatcherConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert!(config.tracks_assertion(AssertionHash(B256::repeat_byte(9))));
    }

    #[test]
    fn test_overrides_and_allow_list() {
        let tracked = B256::repeat_byte(0xab);
        let list = format!("{tracked}, not-a-hash ,,");
        let config = WatcherConfig::from_lookup(lookup(&[
            ("WATCHER_VALIDATOR_NAME", "alice"),
            ("WATCHER_POLL_INTERVAL_MS", "50"),
            ("WATCHER_MAX_GET_LOG_BLOCKS", "bogus"),
            ("WATCHER_TRACK_ASSERTIONS", &list),
            ("WATCHER_RETRY_MAX_BACKOFF_MS", "2000"),
        ]));

        assert_eq!(config.validator_name, "alice");
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.max_get_log_blocks, 1000);
        assert_eq!(
            config.track_challenge_parent_assertion_hashes,
            vec![AssertionHash(tracked)]
        );
        assert_eq!(config.retry.initial_backoff_ms, 250);
        assert_eq!(config.retry.max_backoff_ms, 2000);
        assert!(config.tracks_assertion(AssertionHash(tracked)));
        assert!(!config.tracks_assertion(AssertionHash(B256::repeat_byte(1))));
    }
}
