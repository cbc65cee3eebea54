//! Configuration for the bulk pipeline and scroll cursors.
//!
//! Every setting has a default, so an empty document deserializes into a
//! working configuration:
//!
//! | Setting | Default |
//! |---------|---------|
//! | `bulk.max_batch_count` | 10000 |
//! | `bulk.max_batch_bytes` | 5 MB |
//! | `bulk.flush_interval` | 10s |
//! | `bulk.concurrent_requests` | 1 |
//! | `bulk.initial_backoff_delay` | 50ms |
//! | `bulk.max_retries` | 8 |
//! | `scroll.ttl` | 60s |
//! | `scroll.page_size` | 2000 |
//!
//! Durations are written in humantime form (`"10s"`, `"50ms"`).
//!
//! # Example
//!
//! ```
//! use helios_indexer::config::IndexerConfig;
//!
//! let config: IndexerConfig = serde_json::from_str(
//!     r#"{ "bulk": { "max_batch_count": 500, "flush_interval": "2s" } }"#,
//! ).unwrap();
//! assert_eq!(config.bulk.max_batch_count, 500);
//! assert_eq!(config.scroll.page_size, 2000);
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bulk::BackoffPolicy;
use crate::error::ConfigurationError;

/// Top-level indexer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Write buffer, flush scheduler and bulk pipeline settings.
    #[serde(default)]
    pub bulk: BulkConfig,

    /// Scroll cursor settings.
    #[serde(default)]
    pub scroll: ScrollConfig,
}

impl IndexerConfig {
    /// Validates every section, collecting all problems.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut problems = self.bulk.problems();
        problems.extend(self.scroll.problems());

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid { problems })
        }
    }
}

/// Settings for buffering and submitting bulk batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Flush once this many mutations are pending.
    #[serde(default = "default_max_batch_count")]
    pub max_batch_count: usize,

    /// Flush once the pending mutations reach this many bytes.
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,

    /// Flush a non-empty buffer this long after the previous flush.
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    pub flush_interval: Duration,

    /// Maximum number of batches in flight at once.
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,

    /// Delay before the first retry of a failed bulk call.
    #[serde(with = "humantime_serde", default = "default_initial_backoff_delay")]
    pub initial_backoff_delay: Duration,

    /// Retries of a failed bulk call before its mutations are reported as
    /// transport errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_batch_count() -> usize {
    10_000
}

fn default_max_batch_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_concurrent_requests() -> usize {
    1
}

fn default_initial_backoff_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_max_retries() -> u32 {
    8
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_batch_count: default_max_batch_count(),
            max_batch_bytes: default_max_batch_bytes(),
            flush_interval: default_flush_interval(),
            concurrent_requests: default_concurrent_requests(),
            initial_backoff_delay: default_initial_backoff_delay(),
            max_retries: default_max_retries(),
        }
    }
}

impl BulkConfig {
    /// Returns the retry schedule described by this configuration.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(self.initial_backoff_delay, self.max_retries)
    }

    /// Validates the bulk section on its own.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid { problems })
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.max_batch_count == 0 {
            problems.push("bulk max_batch_count cannot be 0".to_string());
        }

        if self.max_batch_bytes == 0 {
            problems.push("bulk max_batch_bytes cannot be 0".to_string());
        }

        if self.flush_interval.is_zero() {
            problems.push("bulk flush_interval cannot be 0".to_string());
        }

        if self.concurrent_requests == 0 {
            problems.push("bulk concurrent_requests cannot be 0".to_string());
        }

        problems
    }
}

/// Settings for scroll sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollConfig {
    /// Keep-alive of an idle scroll context.
    #[serde(with = "humantime_serde", default = "default_scroll_ttl")]
    pub ttl: Duration,

    /// Documents per page.
    #[serde(default = "default_scroll_page_size")]
    pub page_size: usize,
}

fn default_scroll_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_scroll_page_size() -> usize {
    2000
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            ttl: default_scroll_ttl(),
            page_size: default_scroll_page_size(),
        }
    }
}

impl ScrollConfig {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.ttl < Duration::from_secs(1) {
            problems.push("scroll ttl must be at least 1s".to_string());
        }

        if self.page_size == 0 {
            problems.push("scroll page_size cannot be 0".to_string());
        }

        problems
    }
}

/// Serde module for Duration with humantime format.
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexerConfig::default();
        assert_eq!(config.bulk.max_batch_count, 10_000);
        assert_eq!(config.bulk.max_batch_bytes, 5 * 1024 * 1024);
        assert_eq!(config.bulk.flush_interval, Duration::from_secs(10));
        assert_eq!(config.bulk.concurrent_requests, 1);
        assert_eq!(config.bulk.initial_backoff_delay, Duration::from_millis(50));
        assert_eq!(config.bulk.max_retries, 8);
        assert_eq!(config.scroll.ttl, Duration::from_secs(60));
        assert_eq!(config.scroll.page_size, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_empty_document() {
        let config: IndexerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.bulk.max_retries, 8);
        assert_eq!(config.scroll.page_size, 2000);
    }

    #[test]
    fn test_humantime_round_trip() {
        let config = IndexerConfig {
            bulk: BulkConfig {
                flush_interval: Duration::from_millis(1500),
                ..Default::default()
            },
            ..Default::default()
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["bulk"]["flush_interval"], "1s 500ms");

        let parsed: IndexerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.bulk.flush_interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let result: Result<IndexerConfig, _> =
            serde_json::from_str(r#"{ "scroll": { "ttl": "sixty seconds" } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let config = IndexerConfig {
            bulk: BulkConfig {
                max_batch_count: 0,
                concurrent_requests: 0,
                ..Default::default()
            },
            scroll: ScrollConfig {
                page_size: 0,
                ..Default::default()
            },
        };

        match config.validate() {
            Err(ConfigurationError::Invalid { problems }) => {
                assert_eq!(problems.len(), 3);
                assert!(problems[0].contains("max_batch_count"));
                assert!(problems[1].contains("concurrent_requests"));
                assert!(problems[2].contains("page_size"));
            }
            other => panic!("expected invalid configuration, got {:?}", other),
        }
    }

    #[test]
    fn test_backoff_from_config() {
        let config = BulkConfig {
            initial_backoff_delay: Duration::from_millis(10),
            max_retries: 3,
            ..Default::default()
        };
        let delays: Vec<_> = config.backoff().delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40)
            ]
        );
    }
}
