//! Elasticsearch cluster client.
//!
//! Translates [`ClusterClient`](crate::core::ClusterClient) calls into REST
//! requests through the `elasticsearch` crate:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | `bulk` | `POST /_bulk` (NDJSON) |
//! | `search` | `POST /{indices}/_search[?scroll=]` |
//! | `scroll` | `POST /_search/scroll` |
//! | `clear_scroll` | `DELETE /_search/scroll` |
//! | `update_by_query` | `POST /{index}/_update_by_query` |
//! | `refresh` | `POST /{indices}/_refresh` |
//! | `get` / `mget` | `GET /{index}/_doc/{id}`, `POST /{index}/_mget` |
//! | `indices_exist` | `HEAD /{indices}` |
//!
//! # Example
//!
//! ```ignore
//! use helios_indexer::backends::elasticsearch::{ElasticsearchClient, ElasticsearchConfig};
//!
//! let config = ElasticsearchConfig::default().with_hosts("es1:9200,es2");
//! let client = ElasticsearchClient::new(config)?;
//! ```

mod backend;
mod codec;

pub use backend::{DEFAULT_PORT, ElasticsearchAuth, ElasticsearchClient, ElasticsearchConfig};
