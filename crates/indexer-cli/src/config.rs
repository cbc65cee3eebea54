//! Command-line configuration for the indexer.
//!
//! Every connection and tuning flag can also be set through the environment.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HFS_INDEXER_BACKEND` | elasticsearch | `elasticsearch` or `memory` |
//! | `HFS_INDEXER_HOSTS` | localhost:9200 | Comma-separated `host[:port]` list |
//! | `HFS_INDEXER_USERNAME` | | Basic auth username |
//! | `HFS_INDEXER_PASSWORD` | | Basic auth password |
//! | `HFS_INDEXER_TOKEN` | | Bearer token |
//! | `HFS_INDEXER_REQUEST_TIMEOUT_MS` | 30000 | Request timeout |
//! | `HFS_INDEXER_INSECURE` | false | Skip certificate validation |
//! | `HFS_INDEXER_LOG_LEVEL` | info | Log level |
//! | `HFS_INDEXER_MAX_BATCH_COUNT` | 10000 | Mutations per batch |
//! | `HFS_INDEXER_MAX_BATCH_BYTES` | 5242880 | Bytes per batch |
//! | `HFS_INDEXER_FLUSH_INTERVAL` | 10s | Time-based flush |
//! | `HFS_INDEXER_CONCURRENT_REQUESTS` | 1 | Batches in flight |
//! | `HFS_INDEXER_INITIAL_BACKOFF` | 50ms | First retry delay |
//! | `HFS_INDEXER_MAX_RETRIES` | 8 | Retries per batch |
//! | `HFS_INDEXER_SCROLL_TTL` | 60s | Scroll keep-alive |
//! | `HFS_INDEXER_SCROLL_PAGE_SIZE` | 2000 | Scroll page size |
//! | `HFS_INDEXER_SHUTDOWN_TIMEOUT` | 60s | Wait for in-flight batches on exit |

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use helios_indexer::backends::elasticsearch::{ElasticsearchAuth, ElasticsearchConfig};
use helios_indexer::config::{BulkConfig, IndexerConfig, ScrollConfig};

/// Which cluster client to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// A remote Elasticsearch cluster.
    Elasticsearch,
    /// An in-process cluster, discarded on exit.
    Memory,
}

/// Top-level command line.
#[derive(Debug, Clone, Parser)]
#[command(name = "hfs-indexer")]
#[command(about = "Bulk load, export and update Elasticsearch indices")]
pub struct CliConfig {
    /// Cluster client.
    #[arg(long, value_enum, env = "HFS_INDEXER_BACKEND", default_value = "elasticsearch")]
    pub backend: BackendKind,

    /// Comma-separated `host[:port]` list.
    #[arg(long, env = "HFS_INDEXER_HOSTS", default_value = "localhost:9200")]
    pub hosts: String,

    /// Basic auth username.
    #[arg(long, env = "HFS_INDEXER_USERNAME")]
    pub username: Option<String>,

    /// Basic auth password.
    #[arg(long, env = "HFS_INDEXER_PASSWORD")]
    pub password: Option<String>,

    /// Bearer token, used when no username is given.
    #[arg(long, env = "HFS_INDEXER_TOKEN")]
    pub token: Option<String>,

    /// Request timeout in milliseconds.
    #[arg(long, env = "HFS_INDEXER_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Skip TLS certificate validation.
    #[arg(long, env = "HFS_INDEXER_INSECURE", default_value = "false")]
    pub insecure: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "HFS_INDEXER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Mutations per batch.
    #[arg(long, env = "HFS_INDEXER_MAX_BATCH_COUNT", default_value = "10000")]
    pub max_batch_count: usize,

    /// Bytes per batch.
    #[arg(long, env = "HFS_INDEXER_MAX_BATCH_BYTES", default_value = "5242880")]
    pub max_batch_bytes: usize,

    /// Flush a non-empty buffer this long after the previous flush.
    #[arg(long, env = "HFS_INDEXER_FLUSH_INTERVAL", default_value = "10s", value_parser = humantime::parse_duration)]
    pub flush_interval: Duration,

    /// Batches in flight at once.
    #[arg(long, env = "HFS_INDEXER_CONCURRENT_REQUESTS", default_value = "1")]
    pub concurrent_requests: usize,

    /// Delay before the first retry.
    #[arg(long, env = "HFS_INDEXER_INITIAL_BACKOFF", default_value = "50ms", value_parser = humantime::parse_duration)]
    pub initial_backoff: Duration,

    /// Retries per batch.
    #[arg(long, env = "HFS_INDEXER_MAX_RETRIES", default_value = "8")]
    pub max_retries: u32,

    /// Scroll keep-alive.
    #[arg(long, env = "HFS_INDEXER_SCROLL_TTL", default_value = "60s", value_parser = humantime::parse_duration)]
    pub scroll_ttl: Duration,

    /// Scroll page size.
    #[arg(long, env = "HFS_INDEXER_SCROLL_PAGE_SIZE", default_value = "2000")]
    pub scroll_page_size: usize,

    /// How long to wait for in-flight batches on exit.
    #[arg(long, env = "HFS_INDEXER_SHUTDOWN_TIMEOUT", default_value = "60s", value_parser = humantime::parse_duration)]
    pub shutdown_timeout: Duration,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Index every line of an NDJSON file.
    Load {
        /// Target index.
        #[arg(long)]
        index: String,

        /// NDJSON file, one document per line.
        #[arg(long)]
        file: PathBuf,

        /// Document field holding the id; documents without it get a
        /// cluster-assigned id.
        #[arg(long, default_value = "id")]
        id_field: String,

        /// Leave existing documents untouched.
        #[arg(long)]
        create_only: bool,
    },

    /// Write every matching document as NDJSON.
    Export {
        /// Source index.
        #[arg(long)]
        index: String,

        /// Query as JSON; all documents when omitted.
        #[arg(long)]
        query: Option<String>,

        /// Output file; standard output when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Apply a script to every matching document.
    UpdateByQuery {
        /// Target index.
        #[arg(long)]
        index: String,

        /// Query as JSON.
        #[arg(long)]
        query: String,

        /// Painless script source.
        #[arg(long)]
        script_source: String,

        /// Script parameters as a JSON object.
        #[arg(long)]
        params: Option<String>,
    },

    /// Make recent writes searchable.
    Refresh {
        /// Indices to refresh.
        #[arg(long = "index", required = true)]
        indices: Vec<String>,
    },
}

impl CliConfig {
    /// Bulk and scroll settings.
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            bulk: BulkConfig {
                max_batch_count: self.max_batch_count,
                max_batch_bytes: self.max_batch_bytes,
                flush_interval: self.flush_interval,
                concurrent_requests: self.concurrent_requests,
                initial_backoff_delay: self.initial_backoff,
                max_retries: self.max_retries,
            },
            scroll: ScrollConfig {
                ttl: self.scroll_ttl,
                page_size: self.scroll_page_size,
            },
        }
    }

    /// Connection settings.
    pub fn elasticsearch_config(&self) -> ElasticsearchConfig {
        let auth = match (&self.username, &self.password, &self.token) {
            (Some(username), Some(password), _) => Some(ElasticsearchAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, _, Some(token)) => Some(ElasticsearchAuth::Bearer {
                token: token.clone(),
            }),
            _ => None,
        };

        ElasticsearchConfig {
            request_timeout_ms: self.request_timeout_ms,
            auth,
            disable_certificate_validation: self.insecure,
            ..Default::default()
        }
        .with_hosts(&self.hosts)
    }

    /// Checks flags that the library configuration cannot.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.username.is_some() != self.password.is_some() {
            errors.push("username and password must be given together".to_string());
        }

        if self.backend == BackendKind::Elasticsearch
            && self.hosts.split(',').all(|h| h.trim().is_empty())
        {
            errors.push("at least one host is required".to_string());
        }

        if let Err(e) = self.indexer_config().validate() {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliConfig {
        let mut argv = vec!["hfs-indexer"];
        argv.extend_from_slice(args);
        CliConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["refresh", "--index", "a"]);
        let indexer = config.indexer_config();

        assert_eq!(config.backend, BackendKind::Elasticsearch);
        assert_eq!(indexer.bulk.max_batch_count, 10_000);
        assert_eq!(indexer.bulk.max_batch_bytes, 5 * 1024 * 1024);
        assert_eq!(indexer.bulk.flush_interval, Duration::from_secs(10));
        assert_eq!(indexer.bulk.initial_backoff_delay, Duration::from_millis(50));
        assert_eq!(indexer.bulk.max_retries, 8);
        assert_eq!(indexer.scroll.ttl, Duration::from_secs(60));
        assert_eq!(indexer.scroll.page_size, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hosts_and_auth() {
        let config = parse(&[
            "--hosts",
            "es1,es2:9201",
            "--username",
            "elastic",
            "--password",
            "secret",
            "refresh",
            "--index",
            "a",
        ]);
        let es = config.elasticsearch_config();

        assert_eq!(es.nodes, vec!["http://es1:9200", "http://es2:9201"]);
        assert!(matches!(es.auth, Some(ElasticsearchAuth::Basic { .. })));
    }

    #[test]
    fn test_bearer_token() {
        let config = parse(&["--token", "abc", "refresh", "--index", "a"]);
        assert!(matches!(
            config.elasticsearch_config().auth,
            Some(ElasticsearchAuth::Bearer { .. })
        ));
    }

    #[test]
    fn test_username_without_password_is_invalid() {
        let config = parse(&["--username", "elastic", "refresh", "--index", "a"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_count_is_invalid() {
        let config = parse(&["--max-batch-count", "0", "refresh", "--index", "a"]);
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("max_batch_count"));
    }

    #[test]
    fn test_load_command() {
        let config = parse(&[
            "--flush-interval",
            "2s",
            "load",
            "--index",
            "people",
            "--file",
            "people.ndjson",
            "--create-only",
        ]);

        assert_eq!(config.flush_interval, Duration::from_secs(2));
        match config.command {
            Command::Load {
                index,
                id_field,
                create_only,
                ..
            } => {
                assert_eq!(index, "people");
                assert_eq!(id_field, "id");
                assert!(create_only);
            }
            other => panic!("Expected load, got {:?}", other),
        }
    }

    #[test]
    fn test_refresh_requires_index() {
        assert!(CliConfig::try_parse_from(["hfs-indexer", "refresh"]).is_err());
    }
}
