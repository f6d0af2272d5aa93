// Copyright (c) 2024 Botho Foundation

//! Router configuration.
//!
//! [`RouterConfig`] is read from a TOML file:
//!
//! ```toml
//! [session_keys]
//! tags_to_send = 40
//! low_tag_threshold = 10
//!
//! [client]
//! client_message_timeout_ms = 60000
//! should_bundle_reply_info = true
//!
//! [telemetry]
//! enabled = false
//! ```
//!
//! Per-message behaviour is further tuned by [`ClientOptions`], the string
//! key/value options a client attaches to its session.

use crate::telemetry::TelemetryConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path, str::FromStr, time::Duration};
use tracing::warn;

/// Smallest and largest tag counts a session may be configured with.
pub const MIN_TAGS: usize = 1;
pub const MAX_TAGS: usize = 128;

pub const OPT_CLIENT_MESSAGE_TIMEOUT: &str = "clientMessageTimeout";
pub const OPT_BUNDLE_REPLY_INFO: &str = "shouldBundleReplyInfo";
pub const OPT_BUNDLE_REPLY_INFO_PROBABILITY: &str = "bundleReplyInfoProbability";
pub const OPT_TAGS_TO_SEND: &str = "crypto.tagsToSend";
pub const OPT_LOW_TAG_THRESHOLD: &str = "crypto.lowTagThreshold";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub session_keys: SessionKeyConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub outbound_cache: OutboundCacheConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl RouterConfig {
    /// Load config from a TOML file. Out-of-range values are clamped.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let mut config: RouterConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.session_keys = config.session_keys.clamped();
        config.client.bundle_reply_info_probability =
            config.client.bundle_reply_info_probability.min(100);
        Ok(config)
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }
}

/// Session tag and session key lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionKeyConfig {
    /// Tags bundled when a session runs low
    #[serde(default = "default_tags_to_send")]
    pub tags_to_send: usize,

    /// Bundle new tags once fewer than this many remain
    #[serde(default = "default_low_tag_threshold")]
    pub low_tag_threshold: usize,

    /// How long a delivered tag set stays usable
    #[serde(default = "default_tag_duration_secs")]
    pub tag_duration_secs: u64,

    /// Idle time after which an outbound session is forgotten
    #[serde(default = "default_session_lifetime_secs")]
    pub session_lifetime_secs: u64,

    /// Bundle new tags once the live tags expire within this window
    #[serde(default = "default_expiration_window_secs")]
    pub expiration_window_secs: u64,

    /// Soft cap on the inbound tag index
    #[serde(default = "default_max_inbound_tags")]
    pub max_inbound_tags: usize,

    /// Consecutive tag delivery failures before a session stops trusting
    /// unconfirmed tag sets
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_tags_to_send() -> usize {
    40
}

fn default_low_tag_threshold() -> usize {
    10
}

fn default_tag_duration_secs() -> u64 {
    12 * 60
}

fn default_session_lifetime_secs() -> u64 {
    15 * 60
}

fn default_expiration_window_secs() -> u64 {
    30
}

fn default_max_inbound_tags() -> usize {
    750_000
}

fn default_max_consecutive_failures() -> u32 {
    2
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for SessionKeyConfig {
    fn default() -> Self {
        Self {
            tags_to_send: default_tags_to_send(),
            low_tag_threshold: default_low_tag_threshold(),
            tag_duration_secs: default_tag_duration_secs(),
            session_lifetime_secs: default_session_lifetime_secs(),
            expiration_window_secs: default_expiration_window_secs(),
            max_inbound_tags: default_max_inbound_tags(),
            max_consecutive_failures: default_max_consecutive_failures(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl SessionKeyConfig {
    /// Same config with tag counts forced into `1..=128` and a failure
    /// threshold of at least one.
    pub fn clamped(mut self) -> Self {
        self.tags_to_send = clamp_tags("tags_to_send", self.tags_to_send);
        self.low_tag_threshold = clamp_tags("low_tag_threshold", self.low_tag_threshold);
        if self.max_consecutive_failures == 0 {
            warn!("max_consecutive_failures must be at least 1, using 1");
            self.max_consecutive_failures = 1;
        }
        self
    }

    pub fn tag_duration(&self) -> Duration {
        Duration::from_secs(self.tag_duration_secs)
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime_secs)
    }

    pub fn expiration_window(&self) -> Duration {
        Duration::from_secs(self.expiration_window_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

fn clamp_tags(name: &str, value: usize) -> usize {
    let clamped = value.clamp(MIN_TAGS, MAX_TAGS);
    if clamped != value {
        warn!(option = name, value, clamped, "tag count out of range");
    }
    clamped
}

/// Router-wide defaults for client sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_message_timeout_ms")]
    pub client_message_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub should_bundle_reply_info: bool,

    /// Percent chance of bundling our lease set when allowed (0-100)
    #[serde(default = "default_bundle_reply_info_probability")]
    pub bundle_reply_info_probability: u8,
}

fn default_client_message_timeout_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_bundle_reply_info_probability() -> u8 {
    100
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_message_timeout_ms: default_client_message_timeout_ms(),
            should_bundle_reply_info: true,
            bundle_reply_info_probability: default_bundle_reply_info_probability(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundCacheConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

impl Default for OutboundCacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl OutboundCacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Key/value options a client attaches to its session.
///
/// Unparseable values are logged and treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    props: HashMap<String, String>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(option = key, value = raw, "ignoring unparseable client option");
                None
            }
        }
    }

    /// Send timeout in milliseconds.
    pub fn client_message_timeout(&self) -> Option<u64> {
        self.parsed(OPT_CLIENT_MESSAGE_TIMEOUT)
    }

    pub fn should_bundle_reply_info(&self) -> Option<bool> {
        self.parsed(OPT_BUNDLE_REPLY_INFO)
    }

    pub fn bundle_reply_info_probability(&self) -> Option<u8> {
        self.parsed::<u32>(OPT_BUNDLE_REPLY_INFO_PROBABILITY)
            .map(|p| p.min(100) as u8)
    }

    pub fn tags_to_send(&self) -> Option<usize> {
        self.parsed::<usize>(OPT_TAGS_TO_SEND)
            .map(|n| clamp_tags(OPT_TAGS_TO_SEND, n))
    }

    pub fn low_tag_threshold(&self) -> Option<usize> {
        self.parsed::<usize>(OPT_LOW_TAG_THRESHOLD)
            .map(|n| clamp_tags(OPT_LOW_TAG_THRESHOLD, n))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ClientOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            props: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("router.toml");

        let mut config = RouterConfig::default();
        config.session_keys.tags_to_send = 20;
        config.client.should_bundle_reply_info = false;
        config.save(&path).unwrap();

        let loaded = RouterConfig::load(&path).unwrap();
        assert_eq!(loaded.session_keys.tags_to_send, 20);
        assert!(!loaded.client.should_bundle_reply_info);
        assert_eq!(loaded.outbound_cache.sweep_interval_secs, 300);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("router.toml");
        fs::write(&path, "[session_keys]\nlow_tag_threshold = 500\n").unwrap();

        let loaded = RouterConfig::load(&path).unwrap();
        assert_eq!(loaded.session_keys.low_tag_threshold, MAX_TAGS);
        assert_eq!(loaded.session_keys.tags_to_send, 40);
        assert_eq!(loaded.session_keys.max_inbound_tags, 750_000);
        assert_eq!(loaded.client.client_message_timeout_ms, 60_000);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempdir().unwrap();
        assert!(RouterConfig::load(&dir.path().join("nope.toml")).is_err());
    }

    #[test]
    fn test_client_options_parsing() {
        let opts: ClientOptions = [
            (OPT_CLIENT_MESSAGE_TIMEOUT, "30000"),
            (OPT_BUNDLE_REPLY_INFO, "false"),
            (OPT_BUNDLE_REPLY_INFO_PROBABILITY, "250"),
            (OPT_TAGS_TO_SEND, "0"),
        ]
        .into_iter()
        .collect();

        assert_eq!(opts.client_message_timeout(), Some(30_000));
        assert_eq!(opts.should_bundle_reply_info(), Some(false));
        assert_eq!(opts.bundle_reply_info_probability(), Some(100));
        assert_eq!(opts.tags_to_send(), Some(MIN_TAGS));
        assert_eq!(opts.low_tag_threshold(), None);
    }

    #[test]
    fn test_bad_client_option_is_ignored() {
        let mut opts = ClientOptions::new();
        opts.set(OPT_CLIENT_MESSAGE_TIMEOUT, "soon");
        assert_eq!(opts.client_message_timeout(), None);
    }
}
